use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::Utc;
use jobagent_scheduler::{Agent, Job, JobContext, JobOptions};
use serde_json::{json, Value};
use tokio::{process::Command, runtime::Handle};
use tracing::{debug, warn};

use crate::config::CommandJob;

/// Register a config-declared shell command on `agent`.
///
/// Commands run on `runtime`; an interval schedule without a `start_time`
/// starts now.
pub fn register(
    agent: &Agent,
    spec: &CommandJob,
    runtime: &Handle,
) -> jobagent_scheduler::Result<Arc<Job>> {
    let mut schedule = spec.schedule.clone();
    if schedule.start_time.is_none() {
        schedule.start_time = Some(Utc::now());
    }
    let runtime = runtime.clone();
    agent.register_job(
        move |ctx| run_command(ctx, &runtime),
        &schedule,
        JobOptions {
            name: Some(spec.name.clone()),
            args: json!({ "command": spec.command, "timeout_secs": spec.timeout_secs }),
            enabled: spec.enabled,
        },
    )
}

/// Work function: run `args.command` through `sh -c`, killing it once
/// `args.timeout_secs` elapses.
///
/// A non-zero exit or a timeout is a failed run.
fn run_command(ctx: &JobContext<'_>, runtime: &Handle) -> anyhow::Result<Value> {
    let command = ctx.args()["command"]
        .as_str()
        .context("job has no `command` argument")?;
    let timeout_secs = ctx.args()["timeout_secs"]
        .as_u64()
        .context("job has no `timeout_secs` argument")?;
    debug!(job = %ctx.job.name(), timeout_secs, "exec: {command}");

    let mut child = Command::new("sh");
    child.arg("-c").arg(command).kill_on_drop(true);
    // Dropping the timed-out future kills the child.
    let output = match runtime.block_on(tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        child.output(),
    )) {
        Ok(output) => output.with_context(|| format!("failed to spawn `{command}`"))?,
        Err(_elapsed) => {
            warn!(job = %ctx.job.name(), timeout_secs, "command timed out, killed");
            bail!("`{command}` timed out after {timeout_secs}s");
        }
    };

    let exit_code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        bail!("`{command}` exited with {exit_code}: {stderr}");
    }
    Ok(json!({ "exit_code": exit_code, "stdout": stdout }))
}
