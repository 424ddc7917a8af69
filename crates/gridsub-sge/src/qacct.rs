//! Parse `qacct -j <id>` accounting records for completed jobs.

use crate::error::{GridError, GridResult};
use crate::types::{JobState, JobStatus, TaskStatus};
use chrono::NaiveDateTime;
use gridsub_parsers::{parse_sge_timestamp, parse_univa_timestamp, split_key_value};
use std::collections::{BTreeMap, HashMap};

/// One `====`-delimited accounting block.
type Record = HashMap<String, String>;

/// Parse a qacct timestamp in either the Univa or the SGE layout.
pub fn qacct_timestamp(s: &str) -> GridResult<NaiveDateTime> {
    parse_univa_timestamp(s)
        .or_else(|| parse_sge_timestamp(s))
        .ok_or_else(|| GridError::GridOutput(format!("Can't understand time stamp - {}", s)))
}

/// True when qacct's stderr says it has no record of the job.
pub fn is_unknown_job(stderr: &str, job_id: u64) -> bool {
    stderr.contains(&format!("job id {} not found", job_id))
}

fn split_records(output: &str) -> Vec<Record> {
    let mut records = Vec::new();
    let mut current: Option<Record> = None;

    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if line.starts_with("====") {
            records.extend(current.take());
            current = Some(Record::new());
            continue;
        }
        let Some(record) = current.as_mut() else {
            continue;
        };
        if let Some((key, value)) = split_key_value(line) {
            let value = value.split_whitespace().collect::<Vec<_>>().join(" ");
            record.insert(key.to_string(), value);
        }
    }
    records.extend(current);
    records
}

fn field<'a>(record: &'a Record, key: &str) -> GridResult<&'a str> {
    record
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| GridError::GridOutput(format!("qacct record has no {}", key)))
}

fn nonzero(record: &Record, key: &str) -> bool {
    record
        .get(key)
        .and_then(|v| v.split_whitespace().next())
        .and_then(|v| v.parse::<i64>().ok())
        .is_some_and(|v| v != 0)
}

fn task_number(record: &Record) -> u32 {
    // "undefined" for non-array jobs
    record
        .get("taskid")
        .and_then(|t| t.parse().ok())
        .unwrap_or(1)
}

fn parse_task(record: &Record) -> GridResult<TaskStatus> {
    let status = if nonzero(record, "exit_status") || nonzero(record, "failed") {
        JobState::Failed
    } else {
        JobState::Finished
    };
    Ok(TaskStatus {
        status,
        start_time: Some(qacct_timestamp(field(record, "start_time")?)?),
        end_time: Some(qacct_timestamp(field(record, "end_time")?)?),
    })
}

/// Parse qacct output. Returns None when there are no records, or when
/// `task` is given and no record matches it.
pub fn parse_qacct_job(output: &str, task: Option<u32>) -> GridResult<Option<JobStatus>> {
    let records = split_records(output);
    let Some(sample) = records.first() else {
        return Ok(None);
    };

    let id = field(sample, "jobnumber")?
        .parse()
        .map_err(|_| GridError::GridOutput("qacct job number is not numeric".to_string()))?;
    let name = field(sample, "jobname")?.to_string();
    let sub_time = Some(qacct_timestamp(field(sample, "qsub_time")?)?);

    let mut tasks = BTreeMap::new();
    for record in &records {
        let number = task_number(record);
        if task.is_some_and(|wanted| wanted != number) {
            continue;
        }
        tasks.insert(number, parse_task(record)?);
    }
    if tasks.is_empty() {
        return Ok(None);
    }

    Ok(Some(JobStatus {
        id,
        name,
        sub_time,
        tasks,
    }))
}
