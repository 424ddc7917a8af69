//! Normalized job status types.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// State of one task of a Grid Engine job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Waiting for a slot
    Queued,
    /// Currently running
    Running,
    /// Completed with exit status 0
    Finished,
    /// Completed with a non-zero exit status or a scheduler failure
    Failed,
    /// In an error state and waiting to be rescheduled (Eqw)
    FailedButRequeued,
    /// Waiting on a hold or dependency
    Held,
    Requeued,
    Restarted,
    Suspended,
    /// Being transferred to its execution host
    Starting,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "Queued",
            Self::Running => "Running",
            Self::Finished => "Finished",
            Self::Failed => "Failed",
            Self::FailedButRequeued => "Failed but requeued",
            Self::Held => "Held",
            Self::Requeued => "Requeued",
            Self::Restarted => "Restarted",
            Self::Suspended => "Suspended",
            Self::Starting => "Starting",
        };
        write!(f, "{}", s)
    }
}

/// Status of a single array task (plain jobs have one task, number 1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub status: JobState,
    pub start_time: Option<NaiveDateTime>,
    pub end_time: Option<NaiveDateTime>,
}

/// A job as reported by qstat and/or qacct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: u64,
    pub name: String,
    pub sub_time: Option<NaiveDateTime>,
    /// Task number -> task status
    pub tasks: BTreeMap<u32, TaskStatus>,
}

impl JobStatus {
    /// Overlay `newer` onto this record; `newer` wins for every field it
    /// carries, and tasks are merged per task number.
    pub fn merge(mut self, newer: JobStatus) -> JobStatus {
        self.id = newer.id;
        self.name = newer.name;
        if newer.sub_time.is_some() {
            self.sub_time = newer.sub_time;
        }
        self.tasks.extend(newer.tasks);
        self
    }
}
