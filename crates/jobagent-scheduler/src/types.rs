use std::sync::Arc;

use chrono::{DateTime, Utc};
use jobagent_core::JobId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{agent::Agent, job::Job};

/// Every schedule position and status time is a UTC instant.
pub type Timestamp = DateTime<Utc>;

/// Outcome of the most recent execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LastRunState {
    #[default]
    NeverExecuted,
    Success,
    Failed,
}

impl std::fmt::Display for LastRunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LastRunState::NeverExecuted => "never_executed",
            LastRunState::Success => "success",
            LastRunState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Status record of a job, updated at the end of every execution.
///
/// Fields written by an execution thread are only final once the job's
/// not-running signal is set; wait for idle before trusting them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: JobId,
    pub name: String,
    pub last_run_state: LastRunState,
    /// When the most recent execution finished.
    pub last_run_time: Option<Timestamp>,
    /// Value returned by the most recent successful execution.
    pub last_return: Option<Value>,
    /// Error message of the most recent failed execution.
    pub last_error: Option<String>,
    /// Consecutive failures; reset to 0 by a success.
    pub fail_count: u32,
}

impl JobStatus {
    pub fn new(job_id: JobId, name: &str) -> Self {
        Self {
            job_id,
            name: name.to_string(),
            last_run_state: LastRunState::NeverExecuted,
            last_run_time: None,
            last_return: None,
            last_error: None,
            fail_count: 0,
        }
    }

    pub(crate) fn record_success(&mut self, at: Timestamp, value: Value) {
        self.last_run_state = LastRunState::Success;
        self.last_run_time = Some(at);
        self.last_return = Some(value);
        self.last_error = None;
        self.fail_count = 0;
    }

    pub(crate) fn record_failure(&mut self, at: Timestamp, error: &anyhow::Error) {
        self.last_run_state = LastRunState::Failed;
        self.last_run_time = Some(at);
        self.last_error = Some(format!("{error:#}"));
        self.fail_count += 1;
    }
}

/// Persistable state of a job: everything except its id and its callables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub name: String,
    pub enabled: bool,
    pub next_run_time: Option<Timestamp>,
    pub status: JobStatus,
    #[serde(default)]
    pub variables: Map<String, Value>,
}

/// Context handed to every pluggable callable: the work function, the custom
/// next-run-time calculator, and the success/fail handlers.
///
/// `agent` is `None` only when the owning agent has already been dropped.
#[derive(Clone, Copy)]
pub struct JobContext<'a> {
    pub job: &'a Arc<Job>,
    pub agent: Option<&'a Agent>,
}

impl<'a> JobContext<'a> {
    /// Arguments bound to the job at registration time.
    pub fn args(&self) -> &'a Value {
        self.job.args()
    }
}
