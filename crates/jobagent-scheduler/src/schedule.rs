//! Schedule configuration: which next-run-time calculator and which
//! success / fail handlers a job is built with.
//!
//! The declarative part deserializes from TOML or JSON using the same keys a
//! config file would carry:
//!
//! ```toml
//! scheduler = "interval"
//! interval = 30
//! start_time = "2026-01-01T00:00:00Z"
//!
//! [job_fail_handler]
//! Handler = "restart_after_fail"
//! num_restart_trys_after_fail = 2
//! overwrite_agent_not_running = "force_run_agent"
//! ```
//!
//! Callables (custom calculator, custom handlers) can only be supplied from
//! code through the builder methods.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, SchedulerError},
    types::{JobContext, Timestamp},
};

/// User-supplied next-run-time function. Returning `None` is a configuration
/// error: the job cannot be scheduled without a timestamp.
pub type CalculatorFn = Arc<dyn Fn(&JobContext<'_>) -> Option<Timestamp> + Send + Sync>;

/// User-supplied fail handler, called with the error the execution produced.
pub type FailHandlerFn =
    Arc<dyn Fn(&JobContext<'_>, &anyhow::Error) -> anyhow::Result<()> + Send + Sync>;

/// User-supplied success handler.
pub type SuccessHandlerFn = Arc<dyn Fn(&JobContext<'_>) -> anyhow::Result<()> + Send + Sync>;

pub const DEFAULT_RESTART_TRIES: u32 = 1;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum CalculatorKind {
    #[default]
    Interval,
    Custom,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum FailHandlerKind {
    #[default]
    Basics,
    RestartAfterFail,
    Custom,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum SuccessHandlerKind {
    #[default]
    Basics,
    Custom,
}

/// What `restart_after_fail` does when the owning agent's loop is not started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum AgentNotRunningPolicy {
    /// Start the job directly, bypassing the agent loop.
    #[default]
    ForceRestartJob,
    /// Start the agent, then queue the rerun on its loop.
    ForceRunAgent,
}

impl FromStr for CalculatorKind {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "interval" => Ok(CalculatorKind::Interval),
            "custom" => Ok(CalculatorKind::Custom),
            other => Err(SchedulerError::Configuration(format!(
                "unknown scheduler: {other}"
            ))),
        }
    }
}

impl TryFrom<String> for CalculatorKind {
    type Error = SchedulerError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl FromStr for FailHandlerKind {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "basics" => Ok(FailHandlerKind::Basics),
            "restart_after_fail" => Ok(FailHandlerKind::RestartAfterFail),
            "custom" => Ok(FailHandlerKind::Custom),
            other => Err(SchedulerError::Configuration(format!(
                "unknown job fail handler: {other}"
            ))),
        }
    }
}

impl TryFrom<String> for FailHandlerKind {
    type Error = SchedulerError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl FromStr for SuccessHandlerKind {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "basics" => Ok(SuccessHandlerKind::Basics),
            "custom" => Ok(SuccessHandlerKind::Custom),
            other => Err(SchedulerError::Configuration(format!(
                "unknown job success handler: {other}"
            ))),
        }
    }
}

impl TryFrom<String> for SuccessHandlerKind {
    type Error = SchedulerError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl FromStr for AgentNotRunningPolicy {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "force_restart_job" => Ok(AgentNotRunningPolicy::ForceRestartJob),
            "force_run_agent" => Ok(AgentNotRunningPolicy::ForceRunAgent),
            other => Err(SchedulerError::Configuration(format!(
                "unknown overwrite_agent_not_running policy: {other}"
            ))),
        }
    }
}

impl TryFrom<String> for AgentNotRunningPolicy {
    type Error = SchedulerError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct FailHandlerConfig {
    #[serde(rename = "Handler", default)]
    pub handler: FailHandlerKind,
    /// Reruns allowed while `fail_count <= num_restart_trys_after_fail`.
    #[serde(default = "default_restart_tries")]
    pub num_restart_trys_after_fail: u32,
    #[serde(default)]
    pub overwrite_agent_not_running: AgentNotRunningPolicy,
    #[serde(skip)]
    pub custom_job_fail_handler: Option<FailHandlerFn>,
}

impl Default for FailHandlerConfig {
    fn default() -> Self {
        Self {
            handler: FailHandlerKind::Basics,
            num_restart_trys_after_fail: DEFAULT_RESTART_TRIES,
            overwrite_agent_not_running: AgentNotRunningPolicy::default(),
            custom_job_fail_handler: None,
        }
    }
}

impl FailHandlerConfig {
    pub fn basics() -> Self {
        Self::default()
    }

    pub fn restart_after_fail(max_retries: u32, policy: AgentNotRunningPolicy) -> Self {
        Self {
            handler: FailHandlerKind::RestartAfterFail,
            num_restart_trys_after_fail: max_retries,
            overwrite_agent_not_running: policy,
            custom_job_fail_handler: None,
        }
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&JobContext<'_>, &anyhow::Error) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            handler: FailHandlerKind::Custom,
            custom_job_fail_handler: Some(Arc::new(f)),
            ..Self::default()
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct SuccessHandlerConfig {
    #[serde(rename = "Handler", default)]
    pub handler: SuccessHandlerKind,
    #[serde(skip)]
    pub custom_success_handler: Option<SuccessHandlerFn>,
}

impl SuccessHandlerConfig {
    pub fn basics() -> Self {
        Self::default()
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&JobContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self {
            handler: SuccessHandlerKind::Custom,
            custom_success_handler: Some(Arc::new(f)),
        }
    }
}

/// Named-option schedule structure a job is constructed from.
#[derive(Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub scheduler: CalculatorKind,
    /// Seconds between runs for the `interval` calculator.
    #[serde(default)]
    pub interval: Option<f64>,
    /// First due time for the `interval` calculator.
    #[serde(default)]
    pub start_time: Option<Timestamp>,
    #[serde(skip)]
    pub custom_time_scheduler: Option<CalculatorFn>,
    #[serde(default)]
    pub job_fail_handler: FailHandlerConfig,
    #[serde(default)]
    pub job_success_handler: SuccessHandlerConfig,
    /// When false, `Agent::stop` also joins the job's execution thread.
    #[serde(default = "bool_true")]
    pub daemon: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            scheduler: CalculatorKind::Interval,
            interval: None,
            start_time: None,
            custom_time_scheduler: None,
            job_fail_handler: FailHandlerConfig::default(),
            job_success_handler: SuccessHandlerConfig::default(),
            daemon: true,
        }
    }
}

impl ScheduleConfig {
    /// Fixed cadence anchored at `start_time`.
    pub fn interval(seconds: f64, start_time: Timestamp) -> Self {
        Self {
            scheduler: CalculatorKind::Interval,
            interval: Some(seconds),
            start_time: Some(start_time),
            ..Self::default()
        }
    }

    /// Next run times come from `f`.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&JobContext<'_>) -> Option<Timestamp> + Send + Sync + 'static,
    {
        Self {
            scheduler: CalculatorKind::Custom,
            custom_time_scheduler: Some(Arc::new(f)),
            ..Self::default()
        }
    }

    pub fn with_start_time(mut self, start_time: Timestamp) -> Self {
        self.start_time = Some(start_time);
        self
    }

    pub fn with_fail_handler(mut self, handler: FailHandlerConfig) -> Self {
        self.job_fail_handler = handler;
        self
    }

    pub fn with_success_handler(mut self, handler: SuccessHandlerConfig) -> Self {
        self.job_success_handler = handler;
        self
    }

    pub fn with_daemon(mut self, daemon: bool) -> Self {
        self.daemon = daemon;
        self
    }

    /// Parse the declarative part of a schedule from a JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| SchedulerError::Configuration(e.to_string()))
    }
}

impl fmt::Debug for ScheduleConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleConfig")
            .field("scheduler", &self.scheduler)
            .field("interval", &self.interval)
            .field("start_time", &self.start_time)
            .field("custom_time_scheduler", &self.custom_time_scheduler.is_some())
            .field("job_fail_handler", &self.job_fail_handler.handler)
            .field("job_success_handler", &self.job_success_handler.handler)
            .field("daemon", &self.daemon)
            .finish()
    }
}

fn bool_true() -> bool {
    true
}
fn default_restart_tries() -> u32 {
    DEFAULT_RESTART_TRIES
}
