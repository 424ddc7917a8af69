//! Error types for the Grid Engine plugin.

use gridsub_parsers::CommandError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GridError {
    /// The request is malformed, the scheduler refused it, or the scheduler
    /// tooling is missing.
    #[error("{0}")]
    BadSubmission(String),
    /// The method configuration is internally inconsistent.
    #[error("Bad configuration: {0}")]
    BadConfiguration(String),
    #[error("Missing configuration: {0}")]
    MissingConfiguration(String),
    /// Scheduler output could not be understood.
    #[error("Unable to understand Grid Engine output: {0}")]
    GridOutput(String),
    #[error("Job {0} not found")]
    UnknownJobId(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type GridResult<T> = Result<T, GridError>;

impl GridError {
    pub(crate) fn not_installed() -> Self {
        Self::BadSubmission("Grid Engine software may not be correctly installed".to_string())
    }
}

impl From<CommandError> for GridError {
    fn from(e: CommandError) -> Self {
        match e {
            CommandError::Execution { command, error } => {
                tracing::debug!("Unable to start {}: {}", command, error);
                Self::not_installed()
            }
            CommandError::Failed { stderr, .. } => Self::GridOutput(stderr),
        }
    }
}

impl From<serde_yaml_ng::Error> for GridError {
    fn from(e: serde_yaml_ng::Error) -> Self {
        Self::BadConfiguration(e.to_string())
    }
}

impl From<roxmltree::Error> for GridError {
    fn from(e: roxmltree::Error) -> Self {
        Self::GridOutput(format!("Unable to understand XML output: {}", e))
    }
}
