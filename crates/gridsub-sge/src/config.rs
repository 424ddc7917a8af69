//! Plugin configuration, loaded from YAML and validated once.

use crate::error::{GridError, GridResult};
use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Name of this plugin's section under `method_opts`.
pub const METHOD_NAME: &str = "sge";

const DEFAULT_CONFIG: &str = include_str!("../default_config.yml");

/// The default configuration document, suitable as a template for users.
pub fn default_conf() -> &'static str {
    DEFAULT_CONFIG
}

/// How `-binding` sizes its core request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum AffinityControl {
    /// Bind as many cores as threads requested
    #[default]
    Threads,
    /// Bind the number of slots granted
    Slots,
}

impl TryFrom<String> for AffinityControl {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "threads" => Ok(Self::Threads),
            "slots" => Ok(Self::Slots),
            other => Err(format!("Unrecognised affinity_control setting {}", other)),
        }
    }
}

impl From<AffinityControl> for String {
    fn from(value: AffinityControl) -> Self {
        value.to_string()
    }
}

impl fmt::Display for AffinityControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Threads => write!(f, "threads"),
            Self::Slots => write!(f, "slots"),
        }
    }
}

fn yes() -> bool {
    true
}

fn default_min_priority() -> i32 {
    -1023
}

fn default_mail_mode() -> String {
    "a".to_string()
}

/// Settings for the Grid Engine submission method (`method_opts.sge`).
///
/// `large_job_split_pe`, `architecture`, `job_resources` and `projects` are
/// read by the submitting front end, not by this plugin. They are kept so a
/// method config loads and serializes with every key it documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodConfig {
    pub large_job_split_pe: Option<String>,
    /// Binding strategy passed to `-binding` (e.g. "linear"); None disables binding
    pub affinity_type: Option<String>,
    pub affinity_control: AffinityControl,
    pub mail_support: bool,
    /// Mail mode name -> `-m` letters it expands to
    pub mail_modes: BTreeMap<String, Vec<String>>,
    pub mail_mode: String,
    pub map_ram: bool,
    pub notify_ram_usage: bool,
    pub ram_resources: Vec<String>,
    pub set_time_limit: bool,
    pub set_hard_time: bool,
    pub job_priorities: bool,
    pub min_priority: i32,
    pub max_priority: i32,
    pub array_holds: bool,
    pub array_limit: bool,
    pub architecture: bool,
    pub job_resources: bool,
    pub projects: bool,
    #[serde(default = "yes")]
    pub use_jobscript: bool,
    pub keep_jobscript: bool,
    #[serde(default = "yes")]
    pub preserve_modules: bool,
    pub add_module_paths: Vec<String>,
    pub export_vars: Vec<String>,
    pub copy_environment: bool,
    pub allow_nested_queuing: bool,
}

impl Default for MethodConfig {
    fn default() -> Self {
        Self {
            large_job_split_pe: None,
            affinity_type: None,
            affinity_control: AffinityControl::Threads,
            mail_support: false,
            mail_modes: BTreeMap::new(),
            mail_mode: default_mail_mode(),
            map_ram: false,
            notify_ram_usage: false,
            ram_resources: Vec::new(),
            set_time_limit: false,
            set_hard_time: false,
            job_priorities: false,
            min_priority: default_min_priority(),
            max_priority: 0,
            array_holds: false,
            array_limit: false,
            architecture: false,
            job_resources: false,
            projects: false,
            use_jobscript: true,
            keep_jobscript: false,
            preserve_modules: true,
            add_module_paths: Vec::new(),
            export_vars: Vec::new(),
            copy_environment: false,
            allow_nested_queuing: false,
        }
    }
}

/// One class of a coprocessor family (e.g. a GPU generation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoproClass {
    /// Value of the class resource that selects this class
    pub resource: String,
    /// Higher is more capable
    pub capability: u32,
    #[serde(default)]
    pub doc: Option<String>,
}

/// Settings for one coprocessor type (`copro_opts.<name>`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoprocessorConfig {
    /// Consumable resource counting devices
    pub resource: String,
    #[serde(default)]
    pub classes: bool,
    #[serde(default)]
    pub class_resource: Option<String>,
    #[serde(default)]
    pub class_types: BTreeMap<String, CoproClass>,
    #[serde(default)]
    pub default_class: Option<String>,
    #[serde(default = "yes")]
    pub include_more_capable: bool,
    #[serde(default)]
    pub uses_modules: bool,
    #[serde(default)]
    pub module_parent: Option<String>,
    #[serde(default)]
    pub no_binding: bool,
    #[serde(default)]
    pub set_visible: bool,
}

impl CoprocessorConfig {
    /// Environment module providing `toolkit` for this coprocessor, if modules are in use.
    pub fn toolkit_module(&self, toolkit: &str) -> Option<String> {
        if !self.uses_modules {
            return None;
        }
        match &self.module_parent {
            Some(parent) => Some(format!("{}/{}", parent, toolkit)),
            None => Some(toolkit.to_string()),
        }
    }
}

/// A configured queue, as written out by `build_queue_defs`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum run time in minutes
    pub time: Option<u64>,
    pub max_size: Option<u64>,
    pub slot_size: Option<u64>,
    pub max_slots: Option<u32>,
    pub map_ram: bool,
    pub parallel_envs: Vec<String>,
    pub group: Option<u32>,
    pub priority: Option<u32>,
    pub default: bool,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    method_opts: BTreeMap<String, MethodConfig>,
    #[serde(default)]
    copro_opts: BTreeMap<String, CoprocessorConfig>,
    #[serde(default)]
    queues: BTreeMap<String, QueueConfig>,
}

/// Complete, validated plugin configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginConfig {
    pub method: MethodConfig,
    pub coprocessors: BTreeMap<String, CoprocessorConfig>,
    pub queues: BTreeMap<String, QueueConfig>,
}

impl PluginConfig {
    /// The embedded default configuration.
    pub fn embedded() -> GridResult<Self> {
        Self::from_yaml_str(DEFAULT_CONFIG)
    }

    pub fn from_path(path: &Utf8Path) -> GridResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            GridError::MissingConfiguration(format!("Unable to read {}: {}", path, e))
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> GridResult<Self> {
        let mut raw: RawConfig = serde_yaml_ng::from_str(text)?;
        let method = raw.method_opts.remove(METHOD_NAME).ok_or_else(|| {
            GridError::MissingConfiguration(format!("No method_opts.{} section", METHOD_NAME))
        })?;

        let config = Self {
            method,
            coprocessors: raw.copro_opts,
            queues: raw.queues,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> GridResult<()> {
        let m = &self.method;
        if m.min_priority > m.max_priority {
            return Err(GridError::BadConfiguration(format!(
                "min_priority ({}) is greater than max_priority ({})",
                m.min_priority, m.max_priority
            )));
        }
        if m.mail_support && !m.mail_modes.contains_key(&m.mail_mode) {
            return Err(GridError::BadConfiguration(format!(
                "Default mail_mode '{}' is not one of the configured mail_modes",
                m.mail_mode
            )));
        }

        for (name, copro) in &self.coprocessors {
            if !copro.classes {
                continue;
            }
            if copro.class_resource.is_none() {
                return Err(GridError::BadConfiguration(format!(
                    "Coprocessor {} has classes but no class_resource",
                    name
                )));
            }
            match &copro.default_class {
                Some(class) if copro.class_types.contains_key(class) => {}
                Some(class) => {
                    return Err(GridError::BadConfiguration(format!(
                        "Coprocessor {} default_class {} is not in class_types",
                        name, class
                    )));
                }
                None => {
                    return Err(GridError::BadConfiguration(format!(
                        "Coprocessor {} has classes but no default_class",
                        name
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn coprocessor(&self, name: &str) -> GridResult<&CoprocessorConfig> {
        self.coprocessors.get(name).ok_or_else(|| {
            GridError::BadConfiguration(format!("Coprocessor {} not configured", name))
        })
    }
}
