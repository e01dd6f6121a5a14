//! `jobagent-scheduler`: thread-based job agent.
//!
//! # Overview
//!
//! An [`Agent`] owns a registry of [`Job`]s and a loop thread. Every poll
//! interval the loop drains at most one [`Interrupt`] from its single-slot
//! mailbox, then starts each enabled, idle job whose next run time has
//! passed. Each execution runs on its own thread; when it finishes the job
//! goes idle and its success or fail handler runs.
//!
//! # Pluggable strategies
//!
//! | Slot              | Built-in                  | Custom                       |
//! |-------------------|---------------------------|------------------------------|
//! | Next run time     | `interval` (anchored)     | `custom_time_scheduler` fn   |
//! | On failure        | `basics`, `restart_after_fail` | `custom_job_fail_handler` fn |
//! | On success        | `basics`                  | `custom_success_handler` fn  |
//!
//! Strategies are picked through a [`ScheduleConfig`], which also
//! deserializes from TOML or JSON. Job state can be persisted through a
//! [`JobStore`]; [`SqliteJobStore`] is the bundled implementation.

pub mod agent;
pub mod calculator;
pub mod db;
pub mod error;
pub mod handler;
pub mod interrupt;
pub mod job;
pub mod schedule;
pub mod signal;
pub mod store;
pub mod types;

pub use agent::{Agent, JobOptions, JobRegistration};
pub use error::{Result, SchedulerError};
pub use interrupt::{Interrupt, InterruptKind};
pub use job::{Job, StopOutcome, WorkFn};
pub use schedule::{
    AgentNotRunningPolicy, CalculatorKind, FailHandlerConfig, FailHandlerKind, ScheduleConfig,
    SuccessHandlerConfig, SuccessHandlerKind,
};
pub use store::{JobStore, SqliteJobStore};
pub use types::{JobContext, JobSnapshot, JobStatus, LastRunState, Timestamp};
