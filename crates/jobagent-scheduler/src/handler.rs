//! Post-execution strategies. Handlers run on the job's execution thread
//! after the job has gone idle; their errors and panics are logged here and
//! never reach the agent loop.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, error, info, warn};

use crate::{
    error::{Result, SchedulerError},
    schedule::{
        AgentNotRunningPolicy, FailHandlerConfig, FailHandlerFn, FailHandlerKind,
        SuccessHandlerConfig, SuccessHandlerFn, SuccessHandlerKind,
    },
    types::JobContext,
};

#[derive(Clone)]
pub enum FailHandler {
    /// Log the failure and nothing else.
    Basics,
    /// Rerun immediately while `fail_count <= max_retries`.
    RestartAfterFail {
        max_retries: u32,
        when_agent_idle: AgentNotRunningPolicy,
    },
    Custom(FailHandlerFn),
}

#[derive(Clone)]
pub enum SuccessHandler {
    Basics,
    Custom(SuccessHandlerFn),
}

impl FailHandler {
    pub fn from_config(config: &FailHandlerConfig) -> Result<Self> {
        match config.handler {
            FailHandlerKind::Basics => Ok(FailHandler::Basics),
            FailHandlerKind::RestartAfterFail => Ok(FailHandler::RestartAfterFail {
                max_retries: config.num_restart_trys_after_fail,
                when_agent_idle: config.overwrite_agent_not_running,
            }),
            FailHandlerKind::Custom => config
                .custom_job_fail_handler
                .clone()
                .map(FailHandler::Custom)
                .ok_or_else(|| {
                    SchedulerError::Configuration(
                        "custom fail handler needs a `custom_job_fail_handler` function".into(),
                    )
                }),
        }
    }

    /// Run the strategy for a failed execution.
    pub(crate) fn handle(&self, ctx: &JobContext<'_>, err: &anyhow::Error) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(ctx, err)));
        report(ctx, "fail", outcome);
    }

    fn dispatch(&self, ctx: &JobContext<'_>, err: &anyhow::Error) -> anyhow::Result<()> {
        match self {
            FailHandler::Basics => {
                error!(
                    job_id = %ctx.job.id(),
                    job = %ctx.job.name(),
                    fail_count = ctx.job.fail_count(),
                    "job failed to execute: {err:#}"
                );
                Ok(())
            }
            FailHandler::RestartAfterFail {
                max_retries,
                when_agent_idle,
            } => restart_after_fail(ctx, *max_retries, *when_agent_idle),
            FailHandler::Custom(f) => f(ctx, err),
        }
    }
}

impl SuccessHandler {
    pub fn from_config(config: &SuccessHandlerConfig) -> Result<Self> {
        match config.handler {
            SuccessHandlerKind::Basics => Ok(SuccessHandler::Basics),
            SuccessHandlerKind::Custom => config
                .custom_success_handler
                .clone()
                .map(SuccessHandler::Custom)
                .ok_or_else(|| {
                    SchedulerError::Configuration(
                        "custom success handler needs a `custom_success_handler` function".into(),
                    )
                }),
        }
    }

    pub(crate) fn handle(&self, ctx: &JobContext<'_>) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match self {
            SuccessHandler::Basics => Ok(()),
            SuccessHandler::Custom(f) => f(ctx),
        }));
        report(ctx, "success", outcome);
    }
}

fn restart_after_fail(
    ctx: &JobContext<'_>,
    max_retries: u32,
    when_agent_idle: AgentNotRunningPolicy,
) -> anyhow::Result<()> {
    let job = ctx.job;
    let fail_count = job.fail_count();
    if fail_count > max_retries {
        warn!(
            job_id = %job.id(),
            job = %job.name(),
            fail_count,
            max_retries,
            "restart budget exhausted, not rerunning job"
        );
        return Ok(());
    }

    let Some(agent) = ctx.agent else {
        info!(job_id = %job.id(), fail_count, "job has no agent, restarting it directly");
        job.start(None)?;
        return Ok(());
    };

    if agent.is_running() {
        if agent.request_run_now(job) {
            info!(job_id = %job.id(), fail_count, "rerun queued on agent loop");
        } else {
            warn!(job_id = %job.id(), "agent refused rerun request");
        }
        return Ok(());
    }

    if agent.is_stopping() {
        warn!(job_id = %job.id(), "agent is stopping, skipping rerun");
        return Ok(());
    }

    match when_agent_idle {
        AgentNotRunningPolicy::ForceRestartJob => {
            info!(job_id = %job.id(), fail_count, "agent not running, restarting job directly");
            job.start(None)?;
        }
        AgentNotRunningPolicy::ForceRunAgent => {
            info!(job_id = %job.id(), fail_count, "agent not running, starting it for rerun");
            match agent.start() {
                Ok(()) => {}
                // Raced with another starter; the loop is up either way.
                Err(SchedulerError::State(_)) => debug!("agent already started"),
                Err(e) => return Err(e.into()),
            }
            if !agent.request_run_now(job) {
                warn!(job_id = %job.id(), "agent refused rerun request");
            }
        }
    }
    Ok(())
}

fn report(
    ctx: &JobContext<'_>,
    kind: &str,
    outcome: std::thread::Result<anyhow::Result<()>>,
) {
    match outcome {
        Ok(Ok(())) => debug!(job_id = %ctx.job.id(), handler = kind, "handler completed"),
        Ok(Err(e)) => error!(
            job_id = %ctx.job.id(),
            job = %ctx.job.name(),
            handler = kind,
            "handler returned an error: {e:#}"
        ),
        Err(payload) => error!(
            job_id = %ctx.job.id(),
            job = %ctx.job.name(),
            handler = kind,
            "handler panicked: {}",
            panic_message(payload.as_ref())
        ),
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
