//! CLI argument parsing for gridsub.

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use gridsub_sge::SubmitRequest;

/// Environment variable naming the configuration file when `--config` is absent.
pub const CONFIG_ENV: &str = "GRIDSUB_CONF";

#[derive(Parser, Debug)]
#[command(name = "gridsub", version)]
#[command(about = "Submit and track jobs on Grid Engine clusters")]
pub struct Args {
    /// Plugin configuration file (defaults to $GRIDSUB_CONF, then built-in settings)
    #[arg(long, global = true)]
    pub config: Option<Utf8PathBuf>,

    /// Log debugging detail to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Submit a job and print its id
    Submit(Box<SubmitArgs>),

    /// Show the state of a job or array task
    Status {
        /// Job id, or job id and task as ID.TASK
        job_id: String,

        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete a job
    Qdel { job_id: String },

    /// Print queue definitions generated from the cluster configuration
    QueueDefs,

    /// List projects jobs can be charged to
    Projects,

    /// Print the built-in configuration
    DefaultConf,
}

#[derive(clap::Args, Debug)]
pub struct SubmitArgs {
    /// Job name (defaults to the command)
    #[arg(short = 'N', long)]
    pub name: Option<String>,

    /// Queue(s), comma separated, optionally with @host qualifiers
    #[arg(short, long)]
    pub queue: Option<String>,

    /// Threads (slots) for the job
    #[arg(short = 's', long, default_value = "1")]
    pub threads: u32,

    /// Parallel environment providing the threads
    #[arg(long)]
    pub parallel_env: Option<String>,

    /// Total RAM required, in GB
    #[arg(short = 'R', long)]
    pub jobram: Option<u64>,

    /// Run time, in minutes
    #[arg(short = 'T', long)]
    pub jobtime: Option<u64>,

    /// Divide the RAM request between the job's threads
    #[arg(long)]
    pub ramsplit: bool,

    /// Resource request of the form NAME=VALUE
    #[arg(short = 'r', long = "resource")]
    pub resources: Vec<String>,

    /// Scheduling priority
    #[arg(short, long, allow_negative_numbers = true)]
    pub priority: Option<i32>,

    /// Mail mode (a key of the configured mail_modes)
    #[arg(short = 'm', long)]
    pub mail_on: Option<String>,

    /// Address to send job mail to
    #[arg(short = 'M', long)]
    pub mailto: Option<String>,

    /// Directory for job output and error logs
    #[arg(short, long)]
    pub logdir: Option<String>,

    /// Coprocessor required (e.g. cuda)
    #[arg(short, long)]
    pub coprocessor: Option<String>,

    /// Coprocessor class required
    #[arg(long)]
    pub coprocessor_class: Option<String>,

    /// Only accept the exact coprocessor class requested
    #[arg(long)]
    pub coprocessor_class_strict: bool,

    /// Number of coprocessors, or a more complex request
    #[arg(long, default_value = "1")]
    pub coprocessor_multi: String,

    /// Coprocessor toolkit version to load
    #[arg(long)]
    pub coprocessor_toolkit: Option<String>,

    /// Wait for these jobs to finish first
    #[arg(short = 'j', long = "hold")]
    pub jobhold: Vec<String>,

    /// The command is a file of array task lines
    #[arg(short = 't', long)]
    pub array_task: bool,

    /// Wait for the matching tasks of these array jobs
    #[arg(long)]
    pub array_hold: Vec<String>,

    /// Maximum array tasks to run at once
    #[arg(short = 'x', long)]
    pub array_limit: Option<u32>,

    /// Array range, n[-m[:s]]
    #[arg(long)]
    pub array_specifier: Option<String>,

    /// Project to charge the job to
    #[arg(long)]
    pub project: Option<String>,

    /// Environment variable to pass on, as NAME or NAME=VALUE
    #[arg(long = "export")]
    pub export_vars: Vec<String>,

    /// The command is a ready-made Grid Engine script
    #[arg(short = 'F', long)]
    pub usescript: bool,

    /// Keep the generated wrapper script as wrapper_<id>.sh
    #[arg(long)]
    pub keep_jobscript: bool,

    /// Do not let Grid Engine rerun the job after a node failure
    #[arg(long)]
    pub no_requeue: bool,

    /// Argument passed to qsub unchanged
    #[arg(long = "extra-arg", allow_hyphen_values = true)]
    pub extra_args: Vec<String>,

    /// Command to run, or the array task file
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl SubmitArgs {
    pub fn to_request(&self) -> SubmitRequest {
        SubmitRequest {
            command: self.command.clone(),
            job_name: self.name.clone(),
            queue: self.queue.clone(),
            threads: self.threads,
            parallel_env: self.parallel_env.clone(),
            jobram: self.jobram,
            jobtime: self.jobtime,
            ramsplit: self.ramsplit,
            resources: self.resources.clone(),
            priority: self.priority,
            mail_on: self.mail_on.clone(),
            mailto: self.mailto.clone(),
            logdir: self.logdir.clone(),
            coprocessor: self.coprocessor.clone(),
            coprocessor_toolkit: self.coprocessor_toolkit.clone(),
            coprocessor_class: self.coprocessor_class.clone(),
            coprocessor_class_strict: self.coprocessor_class_strict,
            coprocessor_multi: self.coprocessor_multi.clone(),
            jobhold: self.jobhold.clone(),
            array_task: self.array_task,
            array_hold: self.array_hold.clone(),
            array_limit: self.array_limit,
            array_specifier: self.array_specifier.clone(),
            usescript: self.usescript,
            requeueable: !self.no_requeue,
            project: self.project.clone(),
            export_vars: self.export_vars.clone(),
            keep_jobscript: self.keep_jobscript,
            extra_args: self.extra_args.clone(),
        }
    }
}
