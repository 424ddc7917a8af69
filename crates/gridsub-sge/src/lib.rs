//! Grid Engine (Son of Grid Engine, Univa Grid Engine) support for gridsub.
//!
//! The plugin turns a [`SubmitRequest`] into qsub options or a `#$`
//! wrapper script, submits it, and reports job state by combining
//! `qstat -j -xml` with `qacct -j`. It can also derive queue definitions
//! for the configuration file from `qconf` and `qhost`.

pub mod config;
pub mod encoder;
pub mod engine;
pub mod env;
pub mod error;
pub mod jobscript;
pub mod locator;
pub mod qacct;
pub mod qstat;
pub mod qsub;
pub mod queues;
pub mod resources;
pub mod types;

pub use config::{
    AffinityControl, CoproClass, CoprocessorConfig, METHOD_NAME, MethodConfig, PluginConfig,
    QueueConfig, default_conf,
};
pub use encoder::{EncodeContext, EncodedJob, SubmitRequest, encode};
pub use engine::{GridEngine, parse_job_ref, plugin_version};
pub use env::HostEnv;
pub use error::{GridError, GridResult};
pub use locator::BinaryLocator;
pub use queues::{QueueDefinition, QueueDefs};
pub use types::{JobState, JobStatus, TaskStatus};
