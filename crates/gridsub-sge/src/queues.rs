//! Queue configuration lookups and parsing of qconf/qhost/qstat queue output.

use crate::config::PluginConfig;
use crate::encoder::strip_host;
use crate::error::{GridError, GridResult};
use gridsub_parsers::{RamUnit, hms_to_minutes, human_to_ram_int, split_key_value};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Upper bound on a generated queue time, in minutes.
const MAX_QUEUE_TIME: u64 = 1_000_000;

const COPRO_QUEUE: &str =
    "Queue name looks like it might be a queue supporting co-processors. Cannot auto-configure.";
const MIXED_HOST_MEMORY: &str = "Queue has hosts of different total memory size, consider creating multiple queues for the different host hardware in Grid Engine and then set the same 'group' integer to allow jobs to use all the hardware they can run on. Alternatively consider turning on notify_ram_usage.";
const MIXED_SLOT_MEMORY: &str = "Queue has hosts of different per-slot memory size, consider creating multiple queues for the different host hardware in Grid Engine and then add these queues to the configuration setting the same 'group' integer to allow jobs to use all the hardware they can run on.";
const NO_SLOT_MEMORY: &str =
    "Queue has no h_vmem or h_rss specified, slot_size calculated with max_size divided by slots.";
const MIXED_SLOTS: &str =
    "Queue has multiple slot sizes - this calculation will not be correct for all hosts.";
const BOILERPLATE: &[&str] = &[
    "default: true # Is this the default partition?",
    "priority: 1 # Priority in group - higher wins",
    "group: 1 # Group partitions with the same integer then order by priority",
    "For co-processor queues you need the following:",
    "copros:",
    "  cuda: # CUDA Co-processor available",
    "    max_quantity: # Maximum available per node",
    "    classes: # List of classes (if classes supported)",
    "    exclusive: False # Does this only run jobs requiring this co-processor?",
];

/// Longest configured run time (minutes) over `queues`.
///
/// Each queue spec is looked up as given, then without its `@host` or
/// `@@hostgroup` qualifier, then against configured entries whose own
/// qualifier-free name matches.
pub fn get_queue_time(queues: &[String], config: &PluginConfig) -> GridResult<u64> {
    let mut times = Vec::new();
    for spec in queues {
        let name = strip_host(spec);
        let entry = config
            .queues
            .get(spec.as_str())
            .or_else(|| config.queues.get(name))
            .or_else(|| {
                config
                    .queues
                    .iter()
                    .find(|(key, _)| strip_host(key) == name)
                    .map(|(_, q)| q)
            });
        match entry.and_then(|q| q.time) {
            Some(time) => times.push(time),
            None => tracing::debug!("Queue {} has no configured time", spec),
        }
    }

    times.into_iter().max().ok_or_else(|| {
        GridError::BadConfiguration(format!(
            "No run time configured for queue {}",
            queues.join(",")
        ))
    })
}

/// Parse `qconf -sq` output into key -> value, joining continuation lines.
pub fn parse_queue_info(output: &str) -> HashMap<String, String> {
    output
        .replace(" \\\n", "")
        .replace("\\\n", "")
        .lines()
        .filter_map(split_key_value)
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// The `shell_start_mode` of a queue, from `qconf -sq` output.
pub fn parse_start_mode(output: &str) -> Option<String> {
    output
        .lines()
        .filter_map(split_key_value)
        .find(|(k, _)| *k == "shell_start_mode")
        .map(|(_, v)| v.to_string())
}

/// Queue names listed in `qstat -g c -pe <pe> -xml` output.
pub fn parse_pe_queue_names(xml: &str) -> GridResult<Vec<String>> {
    let doc = roxmltree::Document::parse(xml)?;
    Ok(doc
        .descendants()
        .filter(|n| n.has_tag_name("name"))
        .filter_map(|n| n.text())
        .map(|t| t.trim().to_string())
        .collect())
}

/// Values of a per-host list such as `0,[host1=2],[host2=4]`.
fn host_list_values(list: &str) -> Vec<String> {
    list.split(',')
        .map(|entry| match entry.split_once('=') {
            Some((_, value)) => value.trim_end_matches(']').to_string(),
            None => entry.to_string(),
        })
        .collect()
}

/// Parallel environment names from a `pe_list` such as `make,[host1=smp mpi]`.
fn pe_list_values(list: &str) -> Vec<String> {
    list.split(',')
        .flat_map(|entry| {
            let names = match entry.split_once('=') {
                Some((_, value)) => value.trim_end_matches(']'),
                None => entry,
            };
            names
                .split_whitespace()
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// One execution host from `qhost -q -xml`.
#[derive(Debug, Clone, PartialEq)]
pub struct HostInfo {
    pub name: String,
    /// Total memory in GB
    pub mem: u64,
    /// Queue name -> slots on this host
    pub queue_slots: BTreeMap<String, u32>,
}

/// Parse `qhost -q -xml`, skipping the `global` pseudo-host.
pub fn parse_qhost(xml: &str) -> GridResult<Vec<HostInfo>> {
    let doc = roxmltree::Document::parse(xml)?;
    let mut hosts = Vec::new();

    for host in doc.descendants().filter(|n| n.has_tag_name("host")) {
        let Some(name) = host.attribute("name") else {
            continue;
        };
        if name == "global" {
            continue;
        }

        let mem_total = host
            .children()
            .find(|n| n.has_tag_name("hostvalue") && n.attribute("name") == Some("mem_total"))
            .and_then(|n| n.text())
            .unwrap_or("-");
        let Some(mem) = human_to_ram_int(mem_total, RamUnit::G) else {
            tracing::warn!("Host {} reports unusable mem_total {}", name, mem_total);
            continue;
        };

        let mut queue_slots = BTreeMap::new();
        for queue in host.children().filter(|n| n.has_tag_name("queue")) {
            let Some(qname) = queue.attribute("name") else {
                continue;
            };
            let slots = queue
                .children()
                .find(|n| n.has_tag_name("queuevalue") && n.attribute("name") == Some("slots"))
                .and_then(|n| n.text())
                .and_then(|t| t.trim().parse().ok())
                .unwrap_or(0);
            queue_slots.insert(qname.to_string(), slots);
        }

        hosts.push(HostInfo {
            name: name.to_string(),
            mem,
            queue_slots,
        });
    }
    Ok(hosts)
}

/// Memory and slot summary of one queue across its hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueRam {
    /// Largest host memory in GB
    pub max_mem: u64,
    pub mixed_mem: bool,
    pub max_slots: u32,
    pub mixed_slots: bool,
}

/// Summarise host memory and slots per queue.
pub fn queue_ram_map(hosts: &[HostInfo]) -> HashMap<String, QueueRam> {
    let mut queues: HashMap<String, QueueRam> = HashMap::new();
    for host in hosts {
        for (queue, &slots) in &host.queue_slots {
            queues
                .entry(queue.clone())
                .and_modify(|q| {
                    q.mixed_mem |= q.max_mem != host.mem;
                    q.max_mem = q.max_mem.max(host.mem);
                    q.mixed_slots |= q.max_slots != slots;
                    q.max_slots = q.max_slots.max(slots);
                })
                .or_insert(QueueRam {
                    max_mem: host.mem,
                    mixed_mem: false,
                    max_slots: slots,
                    mixed_slots: false,
                });
        }
    }
    queues
}

/// A queue as it should appear in the plugin configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueDefinition {
    /// Maximum run time in minutes
    pub time: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parallel_envs: Vec<String>,
    pub max_slots: u32,
    /// GB
    pub max_size: u64,
    /// GB per slot
    pub slot_size: u64,
    pub map_ram: bool,
    #[serde(skip)]
    pub comments: Vec<String>,
}

fn add_comment(comments: &mut Vec<String>, comment: &str) {
    if !comments.iter().any(|c| c == comment) {
        comments.push(comment.to_string());
    }
}

/// Largest memory value of a per-host list, plus whether the values differ.
fn slot_memory(list: Option<&String>) -> Option<(u64, bool)> {
    let values: BTreeSet<u64> = host_list_values(list.map(String::as_str).unwrap_or("INFINITY"))
        .iter()
        .filter(|v| v.as_str() != "INFINITY")
        .filter_map(|v| human_to_ram_int(v, RamUnit::G))
        .collect();
    let max = values.iter().next_back().copied()?;
    Some((max, values.len() > 1))
}

/// Build a queue definition from `qconf -sq` fields and host summaries.
///
/// Returns None for non-batch queues and for queues with no hosts.
pub fn build_queue_definition(
    qinfo: &HashMap<String, String>,
    ram_map: &HashMap<String, QueueRam>,
    map_ram: bool,
) -> Option<(String, QueueDefinition)> {
    let field = |k: &str| qinfo.get(k).map(String::as_str);
    let name = field("qname")?.to_string();
    if !field("qtype").unwrap_or_default().contains("BATCH") {
        tracing::debug!("Skipping non-batch queue {}", name);
        return None;
    }

    let mut comments = Vec::new();
    if ["gpu", "cuda", "phi"].iter().any(|c| name.contains(c)) {
        add_comment(&mut comments, COPRO_QUEUE);
    }

    let limit = |k: &str| hms_to_minutes(field(k).unwrap_or("INFINITY")).unwrap_or(MAX_QUEUE_TIME);
    let time = MAX_QUEUE_TIME.min(limit("h_rt")).min(limit("h_cpu"));

    let mut parallel_envs: Vec<String> = match field("pe_list") {
        Some(list) if list != "NONE" => pe_list_values(list),
        _ => Vec::new(),
    };
    parallel_envs.sort();
    parallel_envs.dedup();
    parallel_envs.retain(|pe| pe != "NONE");

    let max_slots = host_list_values(field("slots").unwrap_or("0"))
        .iter()
        .filter_map(|s| s.trim().parse::<u32>().ok())
        .max()
        .unwrap_or(0);

    let Some(ram) = ram_map.get(&name) else {
        tracing::error!("Queue {} is not defined on any hosts and is not usable", name);
        return None;
    };
    if ram.mixed_mem {
        add_comment(&mut comments, MIXED_HOST_MEMORY);
    }

    let slot_size = match slot_memory(qinfo.get("h_vmem")).or(slot_memory(qinfo.get("h_rss"))) {
        Some((size, mixed)) => {
            if mixed {
                add_comment(&mut comments, MIXED_SLOT_MEMORY);
            }
            size
        }
        None => {
            add_comment(&mut comments, NO_SLOT_MEMORY);
            if ram.mixed_slots {
                add_comment(&mut comments, MIXED_SLOTS);
            }
            ram.max_mem / u64::from(ram.max_slots.max(1))
        }
    };

    for line in BOILERPLATE {
        add_comment(&mut comments, line);
    }

    Some((
        name,
        QueueDefinition {
            time,
            parallel_envs,
            max_slots,
            max_size: ram.max_mem,
            slot_size,
            map_ram,
            comments,
        },
    ))
}

/// Generated queue definitions, keyed by queue name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueDefs {
    pub queues: BTreeMap<String, QueueDefinition>,
}

impl QueueDefs {
    /// Render as a `queues:` YAML section, each queue's comments under its name.
    pub fn to_yaml(&self) -> GridResult<String> {
        let mut out = String::from("queues:\n");
        for (name, queue) in &self.queues {
            let body = serde_yaml_ng::to_string(&BTreeMap::from([(name, queue)]))?;
            let mut lines = body.lines();
            if let Some(key) = lines.next() {
                out.push_str(&format!("  {}\n", key));
            }
            for comment in &queue.comments {
                out.push_str(&format!("  # {}\n", comment));
            }
            for line in lines {
                out.push_str(&format!("  {}\n", line));
            }
        }
        Ok(out)
    }
}
