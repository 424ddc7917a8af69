//! Grid Engine operations that talk to the cluster.
//!
//! [`GridEngine`] ties the pure pieces of this crate together: it validates
//! and encodes a [`SubmitRequest`], asks the live cluster the questions the
//! encoder cannot answer (parallel environment layout, queue start mode),
//! writes wrapper scripts and runs qsub. It also answers job status, job
//! deletion and queue discovery queries.
//!
//! Every scheduler call goes through a [`CommandRunner`], so the whole
//! engine can be driven by a scripted runner in tests.

use crate::config::{METHOD_NAME, PluginConfig};
use crate::encoder::{
    EncodeContext, SubmitRequest, encode_validated, validate_request, wrapper_modules,
};
use crate::env::HostEnv;
use crate::error::{GridError, GridResult};
use crate::jobscript::{JobScript, ScriptHeader};
use crate::locator::BinaryLocator;
use crate::qacct::{is_unknown_job, parse_qacct_job};
use crate::qstat::parse_qstat_job;
use crate::qsub::parse_qsub_output;
use crate::queues::{
    QueueDefs, build_queue_definition, parse_pe_queue_names, parse_qhost, parse_queue_info,
    parse_start_mode, queue_ram_map,
};
use crate::types::JobStatus;
use gridsub_parsers::{CommandOutput, CommandRunner, TokioRunner};
use tempfile::NamedTempFile;

/// Shell used when neither the environment nor the search path offers one.
const FALLBACK_SHELL: &str = "/bin/bash";

/// Version of this plugin.
pub fn plugin_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Split `"123"` or `"123.4"` into a job id and optional task id.
pub fn parse_job_ref(job: &str) -> GridResult<(u64, Option<u32>)> {
    let invalid = || GridError::BadSubmission(format!("Invalid job id {}", job));
    match job.trim().split_once('.') {
        Some((id, task)) => Ok((
            id.parse().map_err(|_| invalid())?,
            Some(task.parse().map_err(|_| invalid())?),
        )),
        None => Ok((job.trim().parse().map_err(|_| invalid())?, None)),
    }
}

/// Queue names match exactly, or when only one of them carries a `.suffix`.
fn same_queue(a: &str, b: &str) -> bool {
    fn base(q: &str) -> &str {
        q.rsplit_once('.').map_or(q, |(name, _)| name)
    }
    a == b || base(a) == b || a == base(b)
}

/// A Grid Engine cluster, reached through scheduler binaries.
pub struct GridEngine<R = TokioRunner> {
    config: PluginConfig,
    locator: BinaryLocator,
    runner: R,
    env: HostEnv,
    /// (name, version) of the program submitting jobs, for wrapper headers
    submitter: (String, String),
}

impl GridEngine<TokioRunner> {
    /// An engine running real subprocesses in the current process environment.
    pub fn new(config: PluginConfig) -> Self {
        Self::with_parts(config, BinaryLocator::new(), TokioRunner, HostEnv::from_process())
    }
}

impl<R: CommandRunner> GridEngine<R> {
    pub fn with_parts(config: PluginConfig, locator: BinaryLocator, runner: R, env: HostEnv) -> Self {
        Self {
            config,
            locator,
            runner,
            env,
            submitter: ("gridsub".to_string(), plugin_version().to_string()),
        }
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    pub fn locator(&self) -> &BinaryLocator {
        &self.locator
    }

    async fn run(&self, tool: &str, args: Vec<String>) -> GridResult<CommandOutput> {
        let program = self.locator.locate(tool)?;
        Ok(self.runner.run(&program, &args).await?)
    }

    /// Shell for wrapper scripts and array task lines.
    pub fn shell(&self) -> String {
        if let Some(shell) = &self.env.shell {
            return shell.clone();
        }
        self.locator
            .locate("bash")
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| FALLBACK_SHELL.to_string())
    }

    /// Is this process itself a Grid Engine job that must not queue more?
    pub fn already_queued(&self) -> bool {
        if self.env.nested || self.config.method.allow_nested_queuing {
            return false;
        }
        self.env.job_id.is_some()
    }

    /// Does every queue in a comma separated spec exist?
    ///
    /// `@host` qualifiers are dropped; qsub reports bad hosts itself.
    pub async fn queue_exists(&self, qname: &str) -> GridResult<bool> {
        let queues = qname
            .split(',')
            .map(|q| q.split('@').next().unwrap_or(q))
            .collect::<Vec<_>>()
            .join(",");
        let output = self.run("qconf", vec!["-sq".to_string(), queues]).await?;
        Ok(output.success())
    }

    /// Check that parallel environment `pe` exists and is attached to `queue`.
    pub async fn check_pe(&self, pe: &str, queue: &str) -> GridResult<()> {
        let defined = self
            .run("qconf", vec!["-sp".to_string(), pe.to_string()])
            .await?;
        if !defined.success() {
            return Err(GridError::BadSubmission(format!("{} is not a valid PE", pe)));
        }

        let args = ["-g", "c", "-pe", pe, "-xml"].map(str::to_string).to_vec();
        let instances = self.run("qstat", args).await?;
        if !instances.success() || instances.stderr.contains("error: no such parallel environment")
        {
            return Err(GridError::BadSubmission(format!(
                "No instances of {} configured",
                pe
            )));
        }

        if !parse_pe_queue_names(&instances.stdout)?
            .iter()
            .any(|q| same_queue(q, queue))
        {
            return Err(GridError::BadSubmission(format!(
                "PE {} is not configured on {}",
                pe, queue
            )));
        }
        Ok(())
    }

    /// The queue's `shell_start_mode`.
    pub async fn start_mode(&self, queue: &str) -> GridResult<String> {
        let output = self
            .run("qconf", vec!["-sq".to_string(), queue.to_string()])
            .await?;
        if !output.success() {
            return Err(GridError::BadSubmission(format!(
                "{} configuration cannot be found - is it a valid queue: {}",
                queue, output.stderr
            )));
        }
        parse_start_mode(&output.stdout).ok_or_else(|| {
            GridError::GridOutput(format!("Queue {} reports no shell_start_mode", queue))
        })
    }

    async fn task_file_lines(&self, path: &str) -> GridResult<usize> {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            GridError::BadSubmission(format!("Unable to read array task file {}: {}", path, e))
        })?;
        Ok(text.lines().count())
    }

    fn script_header(&self) -> ScriptHeader {
        ScriptHeader {
            built_by: [
                self.submitter.clone(),
                (METHOD_NAME.to_string(), plugin_version().to_string()),
            ],
            command_line: self.env.argv.join(" "),
            submitted: chrono::Local::now().naive_local(),
        }
    }

    /// Submit a job, returning its Grid Engine job id.
    pub async fn submit(&self, req: &SubmitRequest) -> GridResult<u64> {
        validate_request(req, &self.config)?;
        let qsub = self.locator.locate("qsub")?;
        let task_file = req.is_task_file() && !req.usescript;

        if !req.usescript {
            if let Some(pe) = &req.parallel_env {
                for queue in req.pure_queues() {
                    self.check_pe(pe, &queue).await?;
                }
            }
        }

        let task_file_lines = if task_file {
            Some(self.task_file_lines(&req.command[0]).await?)
        } else {
            None
        };
        let ctx = EncodeContext {
            config: &self.config,
            env: &self.env,
            task_file_lines,
        };
        let mut job = encode_validated(req, &ctx)?;

        let shell = self.shell();
        let command = if task_file {
            tracing::info!("executing array task");
            job.into_task_file_wrapper(&req.command[0], &shell)
        } else {
            if req.usescript {
                tracing::info!("executing cluster script");
            } else if req.array_task {
                tracing::info!("executing array task {}", req.array_specifier.as_deref().unwrap_or_default());
            } else {
                tracing::info!("executing single task");
            }
            req.command.clone()
        };

        let mut wrapper: Option<NamedTempFile> = None;
        let args = if job.use_jobscript {
            let modules = wrapper_modules(req, &ctx)?;
            let script = JobScript {
                shell: &shell,
                directives: &job.directives,
                module_paths: &self.config.method.add_module_paths,
                modules: &modules,
                header: self.script_header(),
                extra_lines: &job.extra_lines,
                command: &command,
            };
            tracing::debug!("Wrapper script:\n{}", script.render());
            let file = script.write_temp()?;

            // All requested queues are assumed to share a start mode
            let queues = req.pure_queues();
            let queue = queues
                .first()
                .ok_or_else(|| GridError::BadSubmission("Queue not specified".to_string()))?;
            let mut args = Vec::new();
            let mode = self.start_mode(queue).await?;
            if mode == "posix_compliant" || mode == "script_from_stdin" {
                args.extend(["-S".to_string(), shell.clone()]);
            }
            args.push(file.path().display().to_string());
            wrapper = Some(file);
            args
        } else {
            let mut args = job.flatten();
            if !req.usescript {
                args.extend(["-shell", "n", "-b", "y"].map(str::to_string));
            }
            args.extend(command);
            args
        };

        let output = self.runner.run(&qsub, &args).await?;
        if !output.success() {
            return Err(GridError::BadSubmission(output.stderr));
        }
        let job_id = parse_qsub_output(&output.stdout)?;

        if let Some(file) = &wrapper {
            if job.keep_jobscript {
                let kept = self.env.cwd.join(format!("wrapper_{}.sh", job_id));
                tracing::debug!("Preserving wrapper as {}", kept.display());
                if let Err(e) = tokio::fs::copy(file.path(), &kept).await {
                    tracing::warn!("Unable to preserve wrapper script: {}", e);
                }
            }
        }
        Ok(job_id)
    }

    async fn qstat_job(&self, id: u64, task: Option<u32>) -> GridResult<Option<JobStatus>> {
        let args = vec!["-j".to_string(), id.to_string(), "-xml".to_string()];
        let output = self.run("qstat", args).await?;
        // Unknown jobs exit non-zero but still print an <unknown_jobs> document
        if !output.success() && !output.stdout.trim_start().starts_with('<') {
            return Err(GridError::GridOutput(output.stderr));
        }
        parse_qstat_job(&output.stdout, task)
    }

    async fn qacct_job(&self, id: u64, task: Option<u32>) -> GridResult<Option<JobStatus>> {
        let output = self
            .run("qacct", vec!["-j".to_string(), id.to_string()])
            .await?;
        if !output.success() {
            if is_unknown_job(&output.stderr, id) {
                return Ok(None);
            }
            return Err(GridError::GridOutput(output.stderr));
        }
        parse_qacct_job(&output.stdout, task)
    }

    /// Status of job `"id"` or array task `"id.task"`.
    ///
    /// Live qstat information takes precedence over accounting records.
    pub async fn job_status(&self, job: &str) -> GridResult<JobStatus> {
        let (id, task) = parse_job_ref(job)?;
        let running = self.qstat_job(id, task).await?;
        let finished = self.qacct_job(id, task).await?;

        match (finished, running) {
            (None, None) => Err(GridError::UnknownJobId(id.to_string())),
            (Some(finished), None) => Ok(finished),
            (None, Some(running)) => Ok(running),
            (Some(finished), Some(running)) => Ok(finished.merge(running)),
        }
    }

    /// Delete a job, returning qdel's combined output and exit code.
    pub async fn qdel(&self, job_id: &str) -> GridResult<(String, i32)> {
        let output = self.run("qdel", vec![job_id.to_string()]).await?;
        Ok((output.combined(), output.status))
    }

    /// Projects jobs may be charged to.
    pub async fn project_list(&self) -> GridResult<Vec<String>> {
        let stdout = self
            .run("qconf", vec!["-sprjl".to_string()])
            .await?
            .into_stdout("qconf")?;
        Ok(stdout.split_whitespace().map(str::to_string).collect())
    }

    /// Generate queue definitions from the live cluster configuration.
    pub async fn build_queue_defs(&self) -> GridResult<QueueDefs> {
        let listing = self.run("qconf", vec!["-sql".to_string()]).await?;
        if !listing.success() {
            return Err(GridError::not_installed());
        }

        let hosts_xml = self
            .run("qhost", vec!["-q".to_string(), "-xml".to_string()])
            .await?
            .into_stdout("qhost")?;
        let ram_map = queue_ram_map(&parse_qhost(&hosts_xml)?);

        let mut defs = QueueDefs::default();
        for queue in listing.stdout.lines().map(str::trim).filter(|q| !q.is_empty()) {
            let output = self
                .run("qconf", vec!["-sq".to_string(), queue.to_string()])
                .await?;
            if !output.success() {
                return Err(GridError::BadSubmission(format!("Queue {} not found!", queue)));
            }
            let info = parse_queue_info(&output.stdout);
            if let Some((name, def)) = build_queue_definition(&info, &ram_map, self.config.method.map_ram)
            {
                defs.queues.insert(name, def);
            }
        }
        Ok(defs)
    }
}
