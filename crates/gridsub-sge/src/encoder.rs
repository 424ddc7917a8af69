//! Translate a job submission request into qsub options.
//!
//! The encoder is pure: it never runs a scheduler command. Checks that need
//! the live cluster (parallel environment availability, queue start mode)
//! are done by [`crate::GridEngine`] around it.

use crate::config::{AffinityControl, CoprocessorConfig, PluginConfig};
use crate::env::HostEnv;
use crate::error::{GridError, GridResult};
use crate::queues::get_queue_time;
use crate::resources::{filter_on_resource_dict, resource_dict, valid_resources};
use gridsub_parsers::{minutes_to_seconds, split_ram_by_slots};
use std::collections::HashMap;

/// Variables every job gets, mapping generic names onto Grid Engine's own.
/// An empty target is exported as an empty string.
const ARRAY_ENV_MAP: &[(&str, &str)] = &[
    ("FSLSUB_JOBID_VAR", "JOB_ID"),
    ("FSLSUB_ARRAYTASKID_VAR", "SGE_TASK_ID"),
    ("FSLSUB_ARRAYSTARTID_VAR", "SGE_TASK_FIRST"),
    ("FSLSUB_ARRAYENDID_VAR", "SGE_TASK_LAST"),
    ("FSLSUB_ARRAYSTEPSIZE_VAR", "SGE_TASK_STEPSIZE"),
    ("FSLSUB_ARRAYCOUNT_VAR", ""),
    ("FSLSUB_NSLOTS", "NSLOTS"),
];

/// Shell fragment exposing the GPUs Grid Engine granted to CUDA.
const GPU_VISIBILITY_BLOCK: &[&str] = &[
    r#"if [ -n "$SGE_HGR_gpu" ]"#,
    "then",
    r#"  if [ -z "$CUDA_VISIBLE_DEVICES" ]"#,
    "  then",
    "     export CUDA_VISIBLE_DEVICES=${SGE_HGR_gpu// /,}",
    "  fi",
    r#"  if [ -z "$GPU_DEVICE_ORDINAL" ]"#,
    "  then",
    "     export GPU_DEVICE_ORDINAL=${SGE_HGR_gpu// /,}",
    "  fi",
    "fi",
];

/// Everything a caller can ask of a job submission.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitRequest {
    /// Command and arguments; for file-based array tasks, the task file
    pub command: Vec<String>,
    pub job_name: Option<String>,
    /// Queue spec, possibly comma separated and with `@host` qualifiers
    pub queue: Option<String>,
    pub threads: u32,
    pub parallel_env: Option<String>,
    /// Total RAM in GB
    pub jobram: Option<u64>,
    /// Run time in minutes
    pub jobtime: Option<u64>,
    pub ramsplit: bool,
    pub resources: Vec<String>,
    pub priority: Option<i32>,
    pub mail_on: Option<String>,
    pub mailto: Option<String>,
    pub logdir: Option<String>,
    pub coprocessor: Option<String>,
    pub coprocessor_toolkit: Option<String>,
    pub coprocessor_class: Option<String>,
    pub coprocessor_class_strict: bool,
    pub coprocessor_multi: String,
    pub jobhold: Vec<String>,
    pub array_task: bool,
    pub array_hold: Vec<String>,
    pub array_limit: Option<u32>,
    /// `n[-m[:s]]`
    pub array_specifier: Option<String>,
    /// The command is a ready-made submission script
    pub usescript: bool,
    pub requeueable: bool,
    pub project: Option<String>,
    /// `NAME` or `NAME=value`
    pub export_vars: Vec<String>,
    pub keep_jobscript: bool,
    /// Passed to qsub untouched
    pub extra_args: Vec<String>,
}

impl Default for SubmitRequest {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            job_name: None,
            queue: None,
            threads: 1,
            parallel_env: None,
            jobram: None,
            jobtime: None,
            ramsplit: false,
            resources: Vec::new(),
            priority: None,
            mail_on: None,
            mailto: None,
            logdir: None,
            coprocessor: None,
            coprocessor_toolkit: None,
            coprocessor_class: None,
            coprocessor_class_strict: false,
            coprocessor_multi: "1".to_string(),
            jobhold: Vec::new(),
            array_task: false,
            array_hold: Vec::new(),
            array_limit: None,
            array_specifier: None,
            usescript: false,
            requeueable: true,
            project: None,
            export_vars: Vec::new(),
            keep_jobscript: false,
            extra_args: Vec::new(),
        }
    }
}

impl SubmitRequest {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            ..Self::default()
        }
    }

    /// Is this an array job whose tasks are the lines of a file?
    pub fn is_task_file(&self) -> bool {
        self.array_task && self.array_specifier.is_none()
    }

    /// Queue names with any `@host` / `@@hostgroup` qualifier removed.
    pub fn pure_queues(&self) -> Vec<String> {
        split_queues(self.queue.as_deref().unwrap_or_default())
            .iter()
            .map(|q| strip_host(q).to_string())
            .collect()
    }
}

/// One qsub option with its arguments, e.g. `["-binding", "linear:1"]`.
pub type Directive = Vec<String>;

/// The result of encoding a request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncodedJob {
    pub directives: Vec<Directive>,
    /// Wrapper script lines placed between the header and the command
    pub extra_lines: Vec<String>,
    pub use_jobscript: bool,
    pub keep_jobscript: bool,
}

impl EncodedJob {
    /// Directives as a flat qsub argument list.
    pub fn flatten(&self) -> Vec<String> {
        self.directives.iter().flatten().cloned().collect()
    }

    /// Rework this job into a wrapper that runs line `$SGE_TASK_ID` of
    /// `task_file`, returning the command the wrapper should execute.
    pub fn into_task_file_wrapper(&mut self, task_file: &str, shell: &str) -> Vec<String> {
        self.extra_lines.insert(0, format!("#$ -S {}", shell));
        self.extra_lines.push(String::new());
        self.extra_lines.push(format!(
            r#"the_command=$(sed -n -e "${{SGE_TASK_ID}}p" {})"#,
            task_file
        ));
        self.extra_lines.push(String::new());
        self.use_jobscript = true;

        vec![
            "exec".to_string(),
            shell.to_string(),
            "-c".to_string(),
            r#""$the_command""#.to_string(),
        ]
    }
}

/// Inputs to [`encode`] beyond the request itself.
#[derive(Debug, Clone, Copy)]
pub struct EncodeContext<'a> {
    pub config: &'a PluginConfig,
    pub env: &'a HostEnv,
    /// Line count of the array task file, for file-based array jobs
    pub task_file_lines: Option<usize>,
}

macro_rules! directive {
    ($($part:expr),+ $(,)?) => {
        vec![$($part.to_string()),+]
    };
}

fn bad(msg: impl Into<String>) -> GridError {
    GridError::BadSubmission(msg.into())
}

pub(crate) fn split_queues(queue: &str) -> Vec<String> {
    queue
        .split(',')
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(str::to_string)
        .collect()
}

pub(crate) fn strip_host(queue: &str) -> &str {
    queue.split('@').next().unwrap_or(queue)
}

/// Reject requests whose shape can never be submitted.
pub fn validate_request(req: &SubmitRequest, config: &PluginConfig) -> GridResult<()> {
    if req.command.is_empty() {
        return Err(bad("Must provide command line or array task file name"));
    }
    if !req.array_hold.is_empty() {
        if !req.array_task {
            return Err(bad("array_hold requires an array task"));
        }
        if !config.method.array_holds {
            return Err(bad("Array holds are not enabled for this cluster"));
        }
    }
    if req.array_limit.is_some() {
        if !req.array_task {
            return Err(bad("array_limit requires an array task"));
        }
        if !config.method.array_limit {
            return Err(bad("Array limits are not enabled for this cluster"));
        }
    }

    if req.usescript {
        if req.command.len() > 1 {
            return Err(bad(
                "Command should be a grid submission script (no arguments)",
            ));
        }
        return Ok(());
    }
    if req.queue.as_deref().is_none_or(|q| split_queues(q).is_empty()) {
        return Err(bad("Queue not specified"));
    }
    Ok(())
}

/// Replace the entry for the same variable name, or append.
pub fn update_envvar_list(list: &mut Vec<String>, var: &str) {
    let name = var.split('=').next().unwrap_or(var);
    match list
        .iter_mut()
        .find(|existing| existing.split('=').next() == Some(name))
    {
        Some(existing) => *existing = var.to_string(),
        None => list.push(var.to_string()),
    }
}

/// Parse `n[-m[:s]]` into its start, end and step.
pub fn parse_array_specifier(spec: &str) -> GridResult<(u64, Option<u64>, Option<u64>)> {
    let nonsense = || bad("array_specifier doesn't make sense");
    let number = |s: &str| s.trim().parse::<u64>().map_err(|_| nonsense());

    let (start, rest) = match spec.split_once('-') {
        Some((start, rest)) => (number(start)?, Some(rest)),
        None => (number(spec)?, None),
    };
    if start == 0 {
        return Err(nonsense());
    }

    let (end, step) = match rest {
        None => (None, None),
        Some(rest) => match rest.split_once(':') {
            Some((end, step)) => (Some(number(end)?), Some(number(step)?)),
            None => (Some(number(rest)?), None),
        },
    };
    if end.is_some_and(|e| e < start) || step == Some(0) {
        return Err(nonsense());
    }
    Ok((start, end, step))
}

fn array_range(spec: &str) -> GridResult<String> {
    let (start, end, step) = parse_array_specifier(spec)?;
    let mut range = start.to_string();
    if let Some(end) = end {
        range.push_str(&format!("-{}", end));
    }
    if let Some(step) = step {
        range.push_str(&format!(":{}", step));
    }
    Ok(range)
}

/// The `-l {class_resource}=...` value selecting acceptable coprocessor classes.
fn coprocessor_classes(
    copro: &CoprocessorConfig,
    requested: Option<&str>,
    strict: bool,
) -> GridResult<String> {
    let class = requested
        .or(copro.default_class.as_deref())
        .ok_or_else(|| bad("No coprocessor class requested and no default configured"))?;
    let wanted = copro
        .class_types
        .get(class)
        .ok_or_else(|| bad("Unrecognised coprocessor class"))?;

    if strict || !copro.include_more_capable {
        return Ok(wanted.resource.clone());
    }

    let mut capable: Vec<_> = copro
        .class_types
        .values()
        .filter(|c| c.capability >= wanted.capability)
        .collect();
    capable.sort_by_key(|c| c.capability);
    Ok(capable
        .iter()
        .map(|c| c.resource.as_str())
        .collect::<Vec<_>>()
        .join("|"))
}

/// Build the qsub options for `req`.
pub fn encode(req: &SubmitRequest, ctx: &EncodeContext<'_>) -> GridResult<EncodedJob> {
    validate_request(req, ctx.config)?;
    encode_validated(req, ctx)
}

/// [`encode`] for a request that has already passed [`validate_request`].
pub(crate) fn encode_validated(
    req: &SubmitRequest,
    ctx: &EncodeContext<'_>,
) -> GridResult<EncodedJob> {
    let mconf = &ctx.config.method;

    if req.usescript {
        return Ok(EncodedJob::default());
    }

    let queue_spec = req.queue.as_deref().unwrap_or_default();
    let queues = split_queues(queue_spec);
    let job_name = req.job_name.as_deref().unwrap_or(&req.command[0]);
    let keep_jobscript = req.keep_jobscript || mconf.keep_jobscript;
    let mut use_jobscript = mconf.use_jobscript || keep_jobscript;

    let mut directives: Vec<Directive> = Vec::new();
    let mut extra_lines: Vec<String> = Vec::new();

    if let Some(pe) = &req.parallel_env {
        directives.push(directive!("-pe", pe, &req.threads.to_string()));
        directives.push(directive!("-R", "y"));
    }
    if mconf.copy_environment {
        directives.push(directive!("-V"));
    }

    // Exported environment
    let mut export_vars = req.export_vars.clone();
    for (var, value) in ARRAY_ENV_MAP {
        let value = if value.is_empty() { "\"\"" } else { value };
        update_envvar_list(&mut export_vars, &format!("{}={}", var, value));
    }
    for var in &mconf.export_vars {
        update_envvar_list(&mut export_vars, var);
    }
    let mut simple_vars = Vec::new();
    for var in export_vars {
        match var.split_once('=') {
            Some((name, value)) if value.contains([',', ' ']) => {
                let quoted = (value.starts_with('"') && value.ends_with('"'))
                    || (value.starts_with('\'') && value.ends_with('\''));
                if quoted {
                    extra_lines.push(format!("export {}={}", name, value));
                } else {
                    extra_lines.push(format!("export {}=\"{}\"", name, value));
                }
                use_jobscript = true;
            }
            _ => simple_vars.push(var),
        }
    }
    directives.push(directive!("-v", &simple_vars.join(",")));

    let mut binding = mconf.affinity_type.clone();

    if let Some(name) = &req.coprocessor {
        let copro = ctx.config.coprocessor(name)?;
        if copro.set_visible {
            extra_lines.extend(GPU_VISIBILITY_BLOCK.iter().map(|l| l.to_string()));
        }
        if copro.no_binding {
            binding = None;
        }
        if copro.classes {
            let classes = coprocessor_classes(
                copro,
                req.coprocessor_class.as_deref(),
                req.coprocessor_class_strict,
            )?;
            let class_resource = copro.class_resource.as_deref().unwrap_or_default();
            directives.push(directive!("-l", &format!("{}={}", class_resource, classes)));
        }
        directives.push(directive!(
            "-l",
            &format!("{}={}", copro.resource, req.coprocessor_multi),
        ));
    }

    if let Some(affinity_type) = binding {
        let spec = match mconf.affinity_control {
            AffinityControl::Threads => format!("{}:{}", affinity_type, req.threads),
            AffinityControl::Slots => format!("{}:slots", affinity_type),
        };
        directives.push(directive!("-binding", &spec));
    }

    if mconf.job_priorities {
        if let Some(priority) = req.priority {
            let clamped = priority.clamp(mconf.min_priority, mconf.max_priority);
            directives.push(directive!("-p", &clamped.to_string()));
        }
    }

    let mut requested: Option<HashMap<String, String>> = None;
    if !req.resources.is_empty() && valid_resources(&req.resources) {
        directives.push(directive!("-l", &req.resources.join(",")));
        requested = Some(resource_dict(&req.resources));
    }

    for arg in &req.extra_args {
        directives.push(vec![arg.clone()]);
    }

    if let Some(logdir) = &req.logdir {
        directives.push(directive!("-o", logdir));
        directives.push(directive!("-e", logdir));
    }

    if !req.array_hold.is_empty() {
        directives.push(directive!("-hold_jid_ad", &req.array_hold.join(",")));
    } else if !req.jobhold.is_empty() {
        directives.push(directive!("-hold_jid", &req.jobhold.join(",")));
    }

    if let Some(limit) = req.array_limit {
        directives.push(directive!("-tc", &limit.to_string()));
    }

    if let Some(mut jobram) = req.jobram {
        if req.ramsplit {
            jobram = split_ram_by_slots(jobram, req.threads);
        }
        if mconf.notify_ram_usage {
            let mut ram_resources =
                filter_on_resource_dict(&mconf.ram_resources, requested.as_ref());
            ram_resources.sort();
            if !ram_resources.is_empty() {
                let request = ram_resources
                    .iter()
                    .map(|r| format!("{}={}G", r, jobram))
                    .collect::<Vec<_>>()
                    .join(",");
                directives.push(directive!("-l", &request));
            }
        }
    }

    if !ctx.env.no_time_limit {
        let minutes = match req.jobtime {
            Some(jobtime) if mconf.set_time_limit => Some(jobtime),
            _ if mconf.set_hard_time => Some(get_queue_time(&queues, ctx.config)?),
            _ => None,
        };
        if let Some(minutes) = minutes {
            let seconds = minutes_to_seconds(minutes)
                .ok_or_else(|| bad(format!("Job time of {} minutes is too long", minutes)))?;
            let limit = format!("h_rt={}", seconds);
            directives.push(directive!("-l", limit));
        }
    }

    if mconf.mail_support {
        if let Some(mailto) = &req.mailto {
            directives.push(directive!("-M", mailto));
            let mode = req.mail_on.as_deref().unwrap_or(&mconf.mail_mode);
            let letters = mconf
                .mail_modes
                .get(mode)
                .ok_or_else(|| bad("Unrecognised mail mode"))?;
            directives.push(directive!("-m", &letters.join(",")));
        }
    }

    directives.push(directive!("-N", job_name));
    directives.push(directive!("-cwd"));
    directives.push(directive!("-q", &queues.join(",")));

    if req.requeueable {
        directives.push(directive!("-r", "y"));
    }
    if let Some(project) = &req.project {
        directives.push(directive!("-P", project));
    }

    if req.array_task {
        let range = match (&req.array_specifier, ctx.task_file_lines) {
            (Some(spec), _) => array_range(spec)?,
            (None, Some(lines)) => format!("1-{}", lines),
            (None, None) => return Err(bad("Unable to read array task file")),
        };
        directives.push(directive!("-t", &range));
    }

    let encoded = EncodedJob {
        directives,
        extra_lines,
        use_jobscript,
        keep_jobscript,
    };
    tracing::info!("qsub arguments: {}", encoded.flatten().join(" "));
    Ok(encoded)
}

/// Modules a wrapper script should load for this job.
pub fn wrapper_modules(req: &SubmitRequest, ctx: &EncodeContext<'_>) -> GridResult<Vec<String>> {
    let mconf = &ctx.config.method;
    let mut modules = Vec::new();

    if mconf.preserve_modules {
        if mconf.copy_environment {
            tracing::warn!(
                "'preserve_modules' and 'copy_environment' settings are mutually exclusive - not reloading modules"
            );
        } else {
            modules = ctx.env.loaded_modules.clone();
            tracing::debug!("Found following loaded modules: {:?}", modules);
        }
    }

    if mconf.copy_environment {
        if let (Some(copro), Some(toolkit)) = (&req.coprocessor, &req.coprocessor_toolkit) {
            let module = ctx.config.coprocessor(copro)?.toolkit_module(toolkit);
            if let Some(module) = module {
                if !ctx.env.loaded_modules.contains(&module) {
                    modules.push(module);
                }
            }
        }
    }
    Ok(modules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;

    fn config() -> PluginConfig {
        PluginConfig::embedded().unwrap()
    }

    fn request(queue: &str) -> SubmitRequest {
        SubmitRequest {
            job_name: Some("test_job".to_string()),
            queue: Some(queue.to_string()),
            ..SubmitRequest::new(vec!["acmd".into(), "arg1".into(), "arg2".into()])
        }
    }

    fn run(req: &SubmitRequest, config: &PluginConfig) -> GridResult<EncodedJob> {
        let env = HostEnv::default();
        let ctx = EncodeContext {
            config,
            env: &env,
            task_file_lines: None,
        };
        encode(req, &ctx)
    }

    fn env_token() -> String {
        "FSLSUB_JOBID_VAR=JOB_ID,FSLSUB_ARRAYTASKID_VAR=SGE_TASK_ID,\
FSLSUB_ARRAYSTARTID_VAR=SGE_TASK_FIRST,FSLSUB_ARRAYENDID_VAR=SGE_TASK_LAST,\
FSLSUB_ARRAYSTEPSIZE_VAR=SGE_TASK_STEPSIZE,FSLSUB_ARRAYCOUNT_VAR=\"\",FSLSUB_NSLOTS=NSLOTS"
            .to_string()
    }

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    /// Flattened args with `expected` spliced in before `-N`.
    fn with_before_name(extra: &[&str]) -> Vec<String> {
        let mut expected = args(&["-V", "-v"]);
        expected.push(env_token());
        expected.extend(args(&["-binding", "linear:1"]));
        expected.extend(args(extra));
        expected.extend(args(&["-N", "test_job", "-cwd", "-q", "a.q", "-r", "y"]));
        expected
    }

    #[test]
    fn test_basic_submission() {
        let job = run(&request("a.q"), &config()).unwrap();
        assert_eq!(job.flatten(), with_before_name(&[]));
        assert!(!job.use_jobscript);
        assert!(job.extra_lines.is_empty());
    }

    #[test]
    fn test_job_name_defaults_to_command() {
        let mut req = request("a.q");
        req.job_name = None;
        let job = run(&req, &config()).unwrap();
        assert!(job.directives.contains(&args(&["-N", "acmd"])));
    }

    #[test]
    fn test_ram_resources() {
        let mut req = request("a.q");
        req.jobram = Some(1024);
        let job = run(&req, &config()).unwrap();
        assert_eq!(
            job.flatten(),
            with_before_name(&["-l", "h_vmem=1024G,m_mem_free=1024G"])
        );
    }

    #[test]
    fn test_ram_split_by_threads() {
        let mut req = request("a.q");
        req.jobram = Some(10);
        req.threads = 4;
        req.ramsplit = true;
        let job = run(&req, &config()).unwrap();
        assert!(job.directives.contains(&args(&["-l", "h_vmem=3G,m_mem_free=3G"])));
    }

    #[test]
    fn test_ram_skips_explicit_resource() {
        let mut req = request("a.q");
        req.jobram = Some(64);
        req.resources = args(&["h_vmem=32G"]);
        let job = run(&req, &config()).unwrap();
        assert!(job.directives.contains(&args(&["-l", "h_vmem=32G"])));
        assert!(job.directives.contains(&args(&["-l", "m_mem_free=64G"])));
    }

    #[test]
    fn test_ram_needs_notify() {
        let mut config = config();
        config.method.notify_ram_usage = false;
        let mut req = request("a.q");
        req.jobram = Some(64);
        let job = run(&req, &config).unwrap();
        assert_eq!(job.flatten(), with_before_name(&[]));
    }

    #[test]
    fn test_priority_clamping() {
        let config = config();
        for (input, expected) in [(-2000, "-1023"), (1000, "0"), (-500, "-500")] {
            let mut req = request("a.q");
            req.priority = Some(input);
            let job = run(&req, &config).unwrap();
            assert!(
                job.directives.contains(&args(&["-p", expected])),
                "priority {} should clamp to {}",
                input,
                expected
            );
        }
    }

    #[test]
    fn test_priority_disabled() {
        let mut config = config();
        config.method.job_priorities = false;
        let mut req = request("a.q");
        req.priority = Some(-10);
        let job = run(&req, &config).unwrap();
        assert!(!job.flatten().contains(&"-p".to_string()));
    }

    #[test]
    fn test_mail_modes() {
        let mut req = request("a.q");
        req.mailto = Some("user@example.com".to_string());
        req.mail_on = Some("f".to_string());
        let job = run(&req, &config()).unwrap();
        assert_eq!(
            job.flatten(),
            with_before_name(&["-M", "user@example.com", "-m", "a,e,b"])
        );

        req.mail_on = None;
        let job = run(&req, &config()).unwrap();
        assert!(job.directives.contains(&args(&["-m", "a"])));

        req.mail_on = Some("z".to_string());
        assert!(matches!(
            run(&req, &config()),
            Err(GridError::BadSubmission(_))
        ));
    }

    #[test]
    fn test_coprocessor_more_capable() {
        let mut req = request("gpu.q");
        req.coprocessor = Some("cuda".to_string());
        let job = run(&req, &config()).unwrap();
        let flat = job.flatten();
        assert!(flat.windows(2).any(|w| w == ["-l", "gputype=k80|p100"]));
        assert!(flat.windows(2).any(|w| w == ["-l", "gpu=1"]));
        // no_binding on the cuda coprocessor suppresses -binding
        assert!(!flat.contains(&"-binding".to_string()));
    }

    #[test]
    fn test_coprocessor_strict_class() {
        let mut req = request("gpu.q");
        req.coprocessor = Some("cuda".to_string());
        req.coprocessor_class = Some("K".to_string());
        req.coprocessor_class_strict = true;
        req.coprocessor_multi = "2".to_string();
        let job = run(&req, &config()).unwrap();
        assert!(job.directives.contains(&args(&["-l", "gputype=k80"])));
        assert!(job.directives.contains(&args(&["-l", "gpu=2"])));

        req.coprocessor_class = Some("P".to_string());
        req.coprocessor_class_strict = false;
        let job = run(&req, &config()).unwrap();
        assert!(job.directives.contains(&args(&["-l", "gputype=p100"])));
    }

    #[test]
    fn test_coprocessor_unknown_class() {
        let mut req = request("gpu.q");
        req.coprocessor = Some("cuda".to_string());
        req.coprocessor_class = Some("V".to_string());
        assert!(matches!(
            run(&req, &config()),
            Err(GridError::BadSubmission(_))
        ));
    }

    #[test]
    fn test_coprocessor_set_visible() {
        let mut config = config();
        if let Some(cuda) = config.coprocessors.get_mut("cuda") {
            cuda.set_visible = true;
        }
        let mut req = request("gpu.q");
        req.coprocessor = Some("cuda".to_string());
        let job = run(&req, &config).unwrap();
        assert_eq!(job.extra_lines[0], r#"if [ -n "$SGE_HGR_gpu" ]"#);
        assert_eq!(job.extra_lines.len(), GPU_VISIBILITY_BLOCK.len());
    }

    #[test]
    fn test_affinity_slots() {
        let mut config = config();
        config.method.affinity_control = AffinityControl::Slots;
        let mut req = request("a.q");
        req.threads = 4;
        let job = run(&req, &config).unwrap();
        assert!(job.directives.contains(&args(&["-binding", "linear:slots"])));
    }

    #[test]
    fn test_parallel_env() {
        let mut req = request("a.q");
        req.parallel_env = Some("shmem".to_string());
        req.threads = 4;
        let job = run(&req, &config()).unwrap();
        assert_eq!(job.directives[0], args(&["-pe", "shmem", "4"]));
        assert_eq!(job.directives[1], args(&["-R", "y"]));
        assert!(job.directives.contains(&args(&["-binding", "linear:4"])));
    }

    #[test]
    fn test_time_limits() {
        let mut config = config();
        config.method.set_time_limit = true;
        let mut req = request("a.q");
        req.jobtime = Some(60);
        let job = run(&req, &config).unwrap();
        assert!(job.directives.contains(&args(&["-l", "h_rt=3600"])));

        // Hard time falls back to the queue's configured limit
        config.method.set_time_limit = false;
        config.method.set_hard_time = true;
        config.queues.insert(
            "a.q".to_string(),
            QueueConfig {
                time: Some(1440),
                ..QueueConfig::default()
            },
        );
        let job = run(&req, &config).unwrap();
        assert!(job.directives.contains(&args(&["-l", "h_rt=86400"])));

        // ...and fails when the queue has no configured time
        req.queue = Some("b.q".to_string());
        assert!(run(&req, &config).is_err());
    }

    #[test]
    fn test_no_time_limit_env() {
        let mut config = config();
        config.method.set_time_limit = true;
        let mut req = request("a.q");
        req.jobtime = Some(60);
        let env = HostEnv {
            no_time_limit: true,
            ..HostEnv::default()
        };
        let ctx = EncodeContext {
            config: &config,
            env: &env,
            task_file_lines: None,
        };
        let job = encode(&req, &ctx).unwrap();
        assert!(!job.flatten().iter().any(|a| a.starts_with("h_rt")));
    }

    #[test]
    fn test_holds() {
        let mut req = request("a.q");
        req.jobhold = args(&["123", "456"]);
        let job = run(&req, &config()).unwrap();
        assert!(job.directives.contains(&args(&["-hold_jid", "123,456"])));

        req.jobhold.clear();
        req.array_task = true;
        req.array_specifier = Some("1-10".to_string());
        req.array_hold = args(&["789"]);
        req.array_limit = Some(2);
        let job = run(&req, &config()).unwrap();
        assert!(job.directives.contains(&args(&["-hold_jid_ad", "789"])));
        assert!(job.directives.contains(&args(&["-tc", "2"])));
        assert_eq!(job.directives.last().unwrap(), &args(&["-t", "1-10"]));
    }

    #[test]
    fn test_array_options_need_array_task() {
        let config = config();
        let mut req = request("a.q");
        req.array_hold = args(&["789"]);
        assert!(matches!(run(&req, &config), Err(GridError::BadSubmission(_))));

        let mut req = request("a.q");
        req.array_limit = Some(4);
        assert!(matches!(run(&req, &config), Err(GridError::BadSubmission(_))));
    }

    #[test]
    fn test_array_options_need_config_flag() {
        let mut config = config();
        config.method.array_holds = false;
        config.method.array_limit = false;
        let mut req = request("a.q");
        req.array_task = true;
        req.array_specifier = Some("4".to_string());
        req.array_hold = args(&["789"]);
        assert!(matches!(run(&req, &config), Err(GridError::BadSubmission(_))));

        req.array_hold.clear();
        req.array_limit = Some(4);
        assert!(matches!(run(&req, &config), Err(GridError::BadSubmission(_))));
    }

    #[test]
    fn test_parse_array_specifier() {
        assert_eq!(parse_array_specifier("8").unwrap(), (8, None, None));
        assert_eq!(parse_array_specifier("1-8").unwrap(), (1, Some(8), None));
        assert_eq!(parse_array_specifier("2-8:2").unwrap(), (2, Some(8), Some(2)));
        assert!(parse_array_specifier("0-4").is_err());
        assert!(parse_array_specifier("a-b").is_err());
        assert!(parse_array_specifier("8-2").is_err());
        assert!(parse_array_specifier("1-8:0").is_err());
    }

    #[test]
    fn test_task_file_range() {
        let config = config();
        let env = HostEnv::default();
        let mut req = request("a.q");
        req.command = args(&["tasks.txt"]);
        req.array_task = true;
        let ctx = EncodeContext {
            config: &config,
            env: &env,
            task_file_lines: Some(12),
        };
        let job = encode(&req, &ctx).unwrap();
        assert_eq!(job.directives.last().unwrap(), &args(&["-t", "1-12"]));
    }

    #[test]
    fn test_export_vars() {
        let mut config = config();
        config.method.export_vars = args(&["CONF_VAR"]);
        let mut req = request("a.q");
        req.export_vars = args(&[
            "PLAIN",
            "FSLSUB_NSLOTS=4",
            "LIST=a,b",
            "QUOTED='x y'",
        ]);
        let job = run(&req, &config).unwrap();

        // Fixed mapping replaces caller values of the same name
        let v = job.directives.iter().find(|d| d[0] == "-v").unwrap();
        assert!(v[1].starts_with("PLAIN,FSLSUB_NSLOTS=NSLOTS,FSLSUB_JOBID_VAR=JOB_ID"));
        assert!(v[1].ends_with(",CONF_VAR"));
        assert!(!v[1].contains("LIST"));

        assert_eq!(
            job.extra_lines,
            args(&["export LIST=\"a,b\"", "export QUOTED='x y'"])
        );
        assert!(job.use_jobscript);
    }

    #[test]
    fn test_update_envvar_list() {
        let mut list = args(&["A=1", "B"]);
        update_envvar_list(&mut list, "B=2");
        update_envvar_list(&mut list, "C=3");
        assert_eq!(list, args(&["A=1", "B=2", "C=3"]));
    }

    #[test]
    fn test_usescript() {
        let mut req = SubmitRequest::new(args(&["myscript.sh"]));
        req.usescript = true;
        let job = run(&req, &config()).unwrap();
        assert!(job.directives.is_empty());
        assert!(!job.use_jobscript);

        req.command.push("arg".to_string());
        assert!(matches!(run(&req, &config()), Err(GridError::BadSubmission(_))));
    }

    #[test]
    fn test_usescript_array_options_need_array_task() {
        let mut req = SubmitRequest::new(args(&["myscript.sh"]));
        req.usescript = true;
        req.array_hold = args(&["789"]);
        assert!(matches!(run(&req, &config()), Err(GridError::BadSubmission(_))));

        req.array_hold.clear();
        req.array_limit = Some(4);
        assert!(matches!(run(&req, &config()), Err(GridError::BadSubmission(_))));
    }

    #[test]
    fn test_time_limit_overflow() {
        let mut config = config();
        config.method.set_time_limit = true;
        let mut req = request("a.q");
        req.jobtime = Some(u64::MAX);
        assert!(matches!(run(&req, &config), Err(GridError::BadSubmission(_))));
    }

    #[test]
    fn test_missing_queue() {
        let mut req = request("a.q");
        req.queue = None;
        assert!(matches!(run(&req, &config()), Err(GridError::BadSubmission(_))));
    }

    #[test]
    fn test_misc_options() {
        let mut req = request("a.q,b.q@host1");
        req.logdir = Some("/logs".to_string());
        req.project = Some("proj".to_string());
        req.requeueable = false;
        req.extra_args = args(&["-l arch=lx-amd64"]);
        let job = run(&req, &config()).unwrap();
        let flat = job.flatten();
        assert!(flat.windows(4).any(|w| w == ["-o", "/logs", "-e", "/logs"]));
        assert!(flat.windows(2).any(|w| w == ["-q", "a.q,b.q@host1"]));
        assert!(flat.windows(2).any(|w| w == ["-P", "proj"]));
        assert!(flat.contains(&"-l arch=lx-amd64".to_string()));
        assert!(!flat.windows(2).any(|w| w == ["-r", "y"]));
        assert_eq!(req.pure_queues(), args(&["a.q", "b.q"]));
    }

    #[test]
    fn test_task_file_wrapper() {
        let mut job = EncodedJob::default();
        let cmd = job.into_task_file_wrapper("tasks.txt", "/bin/bash");
        assert_eq!(cmd, args(&["exec", "/bin/bash", "-c", "\"$the_command\""]));
        assert_eq!(
            job.extra_lines,
            args(&[
                "#$ -S /bin/bash",
                "",
                "the_command=$(sed -n -e \"${SGE_TASK_ID}p\" tasks.txt)",
                "",
            ])
        );
        assert!(job.use_jobscript);
    }

    #[test]
    fn test_wrapper_modules() {
        let mut config = config();
        let env = HostEnv {
            loaded_modules: args(&["fsl/6.0"]),
            ..HostEnv::default()
        };
        let mut req = request("gpu.q");
        req.coprocessor = Some("cuda".to_string());
        req.coprocessor_toolkit = Some("11.2".to_string());
        if let Some(cuda) = config.coprocessors.get_mut("cuda") {
            cuda.uses_modules = true;
        }

        // copy_environment on: only the toolkit module
        let ctx = EncodeContext {
            config: &config,
            env: &env,
            task_file_lines: None,
        };
        assert_eq!(wrapper_modules(&req, &ctx).unwrap(), args(&["cuda/11.2"]));

        // preserve_modules without copy_environment: reload the session's modules
        config.method.copy_environment = false;
        config.method.preserve_modules = true;
        let ctx = EncodeContext {
            config: &config,
            env: &env,
            task_file_lines: None,
        };
        assert_eq!(wrapper_modules(&req, &ctx).unwrap(), args(&["fsl/6.0"]));
    }
}
