//! Parse `qstat -j <id> -xml` for queued and running jobs.
//!
//! Son of Grid Engine and Univa Grid Engine produce the same document with
//! two differences: Univa reports times in milliseconds rather than seconds,
//! and groups array tasks under `element` rather than `ulong_sublist`.
//! [`Dialect::detect`] picks the matching [`JobXmlDialect`] implementation.

use crate::error::{GridError, GridResult};
use crate::types::{JobState, JobStatus, TaskStatus};
use chrono::NaiveDateTime;
use gridsub_parsers::{from_epoch_millis, from_epoch_secs};
use roxmltree::{Document, Node};
use std::collections::BTreeMap;

const UNIVA_MARKER: &str = "http://www.univa.com";

// JAT_status bits
const JHELD: u32 = 0x10;
const JSUSPENDED: u32 = 0x100;
const JTRANSFERING: u32 = 0x200;
const JERROR: u32 = 0x8000;
const JSUSPENDED_ON_THRESHOLD: u32 = 0x10000;

/// Which flavour of Grid Engine produced some output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sge,
    Univa,
}

impl Dialect {
    pub fn detect(xml: &str) -> Self {
        if xml.contains(UNIVA_MARKER) {
            Self::Univa
        } else {
            Self::Sge
        }
    }

    pub fn parser(self) -> &'static dyn JobXmlDialect {
        match self {
            Self::Sge => &SgeXml,
            Self::Univa => &UnivaXml,
        }
    }
}

/// Dialect-specific details of the qstat job XML.
pub trait JobXmlDialect: Sync {
    /// Element wrapping each entry of `JB_ja_tasks`.
    fn task_group(&self) -> &'static str;

    /// Convert a raw timestamp field to local time.
    fn timestamp(&self, raw: &str) -> Option<NaiveDateTime>;
}

/// Son of / Sun Grid Engine: epoch seconds, `ulong_sublist` tasks.
pub struct SgeXml;

impl JobXmlDialect for SgeXml {
    fn task_group(&self) -> &'static str {
        "ulong_sublist"
    }

    fn timestamp(&self, raw: &str) -> Option<NaiveDateTime> {
        from_epoch_secs(raw.trim().parse().ok()?)
    }
}

/// Univa Grid Engine: epoch milliseconds, `element` tasks.
pub struct UnivaXml;

impl JobXmlDialect for UnivaXml {
    fn task_group(&self) -> &'static str {
        "element"
    }

    fn timestamp(&self, raw: &str) -> Option<NaiveDateTime> {
        from_epoch_millis(raw.trim().parse().ok()?)
    }
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(name))
}

fn child_text<'a>(node: Node<'a, '_>, name: &str) -> Option<&'a str> {
    child(node, name).and_then(|n| n.text()).map(str::trim)
}

fn has_elements(node: Option<Node<'_, '_>>) -> bool {
    node.is_some_and(|n| n.children().any(|c| c.is_element()))
}

fn decode_task_status(bits: u32) -> JobState {
    if bits & JERROR != 0 {
        JobState::FailedButRequeued
    } else if bits & (JSUSPENDED | JSUSPENDED_ON_THRESHOLD) != 0 {
        JobState::Suspended
    } else if bits & JTRANSFERING != 0 {
        JobState::Starting
    } else if bits & JHELD != 0 {
        JobState::Held
    } else {
        JobState::Running
    }
}

fn parse_task(task: Node<'_, '_>, dialect: &dyn JobXmlDialect) -> TaskStatus {
    let status = if has_elements(child(task, "JAT_message_list")) {
        JobState::FailedButRequeued
    } else {
        child_text(task, "JAT_status")
            .and_then(|s| s.parse().ok())
            .map(decode_task_status)
            .unwrap_or(JobState::Running)
    };

    TaskStatus {
        status,
        start_time: child_text(task, "JAT_start_time").and_then(|t| dialect.timestamp(t)),
        end_time: None,
    }
}

/// Parse qstat job XML. Returns None when qstat does not know the job, or
/// when `task` is given and that task is not active.
pub fn parse_qstat_job(xml: &str, task: Option<u32>) -> GridResult<Option<JobStatus>> {
    let dialect = Dialect::detect(xml).parser();
    let doc = Document::parse(xml)?;

    let Some(djob_info) = child(doc.root_element(), "djob_info") else {
        return Ok(None);
    };
    let job = child(djob_info, "element")
        .ok_or_else(|| GridError::GridOutput("qstat job record is empty".to_string()))?;

    let id = child_text(job, "JB_job_number")
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| GridError::GridOutput("qstat job record has no job number".to_string()))?;
    let name = child_text(job, "JB_job_name").unwrap_or_default().to_string();
    let sub_time = child_text(job, "JB_submission_time").and_then(|t| dialect.timestamp(t));

    let mut tasks = BTreeMap::new();
    let ja_tasks = child(job, "JB_ja_tasks");
    if has_elements(ja_tasks) {
        let grouper = dialect.task_group();
        // Task groups can nest; only those holding a task number are tasks
        for group in ja_tasks
            .into_iter()
            .flat_map(|n| n.descendants())
            .filter(|n| n.has_tag_name(grouper))
        {
            let Some(number) = child_text(group, "JAT_task_number").and_then(|s| s.parse().ok())
            else {
                continue;
            };
            tasks.insert(number, parse_task(group, dialect));
        }
    } else {
        // A pending array job has no task records yet; every task shares its state
        let status = if has_elements(child(job, "JB_jid_predecessor_list")) {
            JobState::Held
        } else {
            JobState::Queued
        };
        tasks.insert(
            task.unwrap_or(1),
            TaskStatus {
                status,
                start_time: None,
                end_time: None,
            },
        );
    }

    if let Some(wanted) = task {
        tasks.retain(|number, _| *number == wanted);
        if tasks.is_empty() {
            return Ok(None);
        }
    }

    Ok(Some(JobStatus {
        id,
        name,
        sub_time,
        tasks,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SGE_RUNNING: &str = r#"<?xml version='1.0'?>
<detailed_job_info  xmlns:xsd="http://arc.liv.ac.uk/repos/darcs/sge/source/dist/util/resources/schemas/qstat/detailed_job_info.xsd">
  <djob_info>
    <element>
      <JB_job_number>123456</JB_job_number>
      <JB_submission_time>1603383001</JB_submission_time>
      <JB_owner>auser</JB_owner>
      <JB_job_name>feat</JB_job_name>
      <JB_hard_queue_list>
        <destin_ident_list>
          <QR_name>long.q</QR_name>
        </destin_ident_list>
      </JB_hard_queue_list>
      <JB_ja_tasks>
        <ulong_sublist>
          <JAT_status>128</JAT_status>
          <JAT_task_number>1</JAT_task_number>
          <JAT_scaled_usage_list>
            <scaled>
              <UA_name>cpu</UA_name>
              <UA_value>1610382.910000</UA_value>
            </scaled>
          </JAT_scaled_usage_list>
          <JAT_start_time>1603383003</JAT_start_time>
        </ulong_sublist>
      </JB_ja_tasks>
      <JB_cwd>/path/to/workdir</JB_cwd>
    </element>
  </djob_info>
  <messages>
    <element>
      <SME_global_message_list>
        <element>
          <MES_message_number>1</MES_message_number>
          <MES_message>queue instance &quot;long.q@host1.com&quot; dropped because it is full</MES_message>
        </element>
      </SME_global_message_list>
    </element>
  </messages>
</detailed_job_info>
"#;

    const UNIVA_RUNNING: &str = r#"<?xml version='1.0'?>
<detailed_job_info  xmlns:xsd="http://www.univa.com" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <djob_info>
    <element>
      <JB_job_number>123456</JB_job_number>
      <JB_job_name>feat</JB_job_name>
      <JB_submission_time>1605791398720</JB_submission_time>
      <JB_hard_resource_list>
        <element>
          <CE_name>h_vmem</CE_name>
          <CE_stringval>4.45G</CE_stringval>
        </element>
      </JB_hard_resource_list>
      <JB_ja_tasks>
        <element>
          <JAT_task_number>1</JAT_task_number>
          <JAT_status>128</JAT_status>
          <JAT_start_time>1605791407703</JAT_start_time>
          <JAT_granted_resources_list>
            <element>
              <GRU_type>1</GRU_type>
            </element>
          </JAT_granted_resources_list>
        </element>
      </JB_ja_tasks>
    </element>
  </djob_info>
</detailed_job_info>
"#;

    const SGE_PENDING_HELD: &str = r#"<?xml version='1.0'?>
<detailed_job_info>
  <djob_info>
    <element>
      <JB_job_number>99</JB_job_number>
      <JB_job_name>waiting</JB_job_name>
      <JB_submission_time>1603383001</JB_submission_time>
      <JB_jid_predecessor_list>
        <job_predecessors>
          <JRE_job_number>98</JRE_job_number>
        </job_predecessors>
      </JB_jid_predecessor_list>
    </element>
  </djob_info>
</detailed_job_info>
"#;

    const SGE_UNKNOWN: &str = "<?xml version='1.0'?>\n<unknown_jobs >\n    <ST_name>12345</ST_name>\n</unknown_jobs>\n";

    fn secs(t: i64) -> Option<NaiveDateTime> {
        from_epoch_secs(t)
    }

    #[test]
    fn test_dialect_detect() {
        assert_eq!(Dialect::detect(SGE_RUNNING), Dialect::Sge);
        assert_eq!(Dialect::detect(UNIVA_RUNNING), Dialect::Univa);
    }

    #[test]
    fn test_parse_sge_running() {
        let job = parse_qstat_job(SGE_RUNNING, None).unwrap().unwrap();
        assert_eq!(job.id, 123456);
        assert_eq!(job.name, "feat");
        assert_eq!(job.sub_time, secs(1603383001));
        assert_eq!(job.tasks.len(), 1);
        assert_eq!(job.tasks[&1].status, JobState::Running);
        assert_eq!(job.tasks[&1].start_time, secs(1603383003));
        assert_eq!(job.tasks[&1].end_time, None);
    }

    #[test]
    fn test_parse_univa_running() {
        let job = parse_qstat_job(UNIVA_RUNNING, None).unwrap().unwrap();
        assert_eq!(job.sub_time, from_epoch_millis(1605791398720));
        // Nested <element>s without a task number are not tasks
        assert_eq!(job.tasks.len(), 1);
        assert_eq!(job.tasks[&1].start_time, from_epoch_millis(1605791407703));
        assert_eq!(job.tasks[&1].status, JobState::Running);
    }

    #[test]
    fn test_parse_pending() {
        let job = parse_qstat_job(SGE_PENDING_HELD, None).unwrap().unwrap();
        assert_eq!(job.tasks[&1].status, JobState::Held);
        assert_eq!(job.tasks[&1].start_time, None);

        let queued = SGE_PENDING_HELD.replace(
            "<JRE_job_number>98</JRE_job_number>",
            "",
        );
        let queued = queued
            .replace("<job_predecessors>", "")
            .replace("</job_predecessors>", "");
        let job = parse_qstat_job(&queued, None).unwrap().unwrap();
        assert_eq!(job.tasks[&1].status, JobState::Queued);
    }

    #[test]
    fn test_pending_array_task() {
        let job = parse_qstat_job(SGE_PENDING_HELD, Some(3)).unwrap().unwrap();
        assert_eq!(job.tasks.len(), 1);
        assert_eq!(job.tasks[&3].status, JobState::Held);
    }

    #[test]
    fn test_parse_unknown_job() {
        assert!(parse_qstat_job(SGE_UNKNOWN, None).unwrap().is_none());
    }

    #[test]
    fn test_task_filter() {
        assert!(parse_qstat_job(SGE_RUNNING, Some(1)).unwrap().is_some());
        assert!(parse_qstat_job(SGE_RUNNING, Some(2)).unwrap().is_none());
    }

    #[test]
    fn test_error_state() {
        let xml = SGE_RUNNING.replace(
            "<JAT_status>128</JAT_status>",
            "<JAT_status>128</JAT_status><JAT_message_list><ulong_sublist><QIM_message>failed</QIM_message></ulong_sublist></JAT_message_list>",
        );
        let job = parse_qstat_job(&xml, None).unwrap().unwrap();
        assert_eq!(job.tasks[&1].status, JobState::FailedButRequeued);
    }

    #[test]
    fn test_decode_task_status() {
        assert_eq!(decode_task_status(0x80), JobState::Running);
        assert_eq!(decode_task_status(0x80 | JERROR), JobState::FailedButRequeued);
        assert_eq!(decode_task_status(0x80 | JSUSPENDED), JobState::Suspended);
        assert_eq!(decode_task_status(JSUSPENDED_ON_THRESHOLD), JobState::Suspended);
        assert_eq!(decode_task_status(JTRANSFERING), JobState::Starting);
        assert_eq!(decode_task_status(JHELD), JobState::Held);
    }

    #[test]
    fn test_bad_xml() {
        assert!(matches!(
            parse_qstat_job("<not closed", None),
            Err(GridError::GridOutput(_))
        ));
    }
}
