//! Snapshot of the process environment the plugin depends on.

use gridsub_parsers::affirmative;
use std::path::PathBuf;

/// Everything read from the submitting process's environment.
///
/// Captured once so that submission logic never reads environment
/// variables directly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostEnv {
    /// `JOB_ID`: set when we are already running inside a Grid Engine job
    pub job_id: Option<String>,
    /// `FSLSUB_NESTED=1` permits submitting from inside a job
    pub nested: bool,
    /// `FSLSUB_NOTIMELIMIT` suppresses `h_rt` requests
    pub no_time_limit: bool,
    /// `FSLSUB_SHELL`: shell for wrapper scripts and array tasks
    pub shell: Option<String>,
    /// Environment modules currently loaded (`LOADEDMODULES`)
    pub loaded_modules: Vec<String>,
    /// Command line of the submitting program, recorded in wrapper scripts
    pub argv: Vec<String>,
    pub cwd: PathBuf,
}

impl HostEnv {
    pub fn from_process() -> Self {
        let var = |name: &str| std::env::var(name).ok();

        Self {
            job_id: var("JOB_ID"),
            nested: var("FSLSUB_NESTED").is_some_and(|v| v == "1"),
            no_time_limit: var("FSLSUB_NOTIMELIMIT").is_some_and(|v| affirmative(&v)),
            shell: var("FSLSUB_SHELL").filter(|s| !s.is_empty()),
            loaded_modules: var("LOADEDMODULES")
                .map(|m| parse_loaded_modules(&m))
                .unwrap_or_default(),
            argv: std::env::args().collect(),
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

fn parse_loaded_modules(s: &str) -> Vec<String> {
    s.split(':')
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect()
}
