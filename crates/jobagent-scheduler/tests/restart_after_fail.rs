// Bounded auto-restart: the rerun budget, and how the rerun is issued
// depending on the owning agent's state.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use common::{eventually, fast_agent};
use jobagent_scheduler::{
    Agent, AgentNotRunningPolicy, FailHandlerConfig, Job, JobOptions, ScheduleConfig,
};
use serde_json::Value;

fn always_failing(agent: &Agent, runs: &Arc<AtomicUsize>, policy: AgentNotRunningPolicy) -> Arc<Job> {
    let schedule = ScheduleConfig::interval(3600.0, Utc::now() + ChronoDuration::hours(1))
        .with_fail_handler(FailHandlerConfig::restart_after_fail(2, policy));
    let runs = Arc::clone(runs);
    agent
        .register_job(
            move |_| -> anyhow::Result<Value> {
                runs.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("still broken")
            },
            &schedule,
            JobOptions::named("broken"),
        )
        .unwrap()
}

/// Wait for `expected` runs, then make sure no further rerun shows up.
fn assert_settles_at(runs: &AtomicUsize, job: &Job, expected: usize) {
    assert!(
        eventually(Duration::from_secs(5), || runs.load(Ordering::SeqCst) >= expected),
        "only {} runs",
        runs.load(Ordering::SeqCst)
    );
    thread::sleep(Duration::from_millis(300));
    assert_eq!(runs.load(Ordering::SeqCst), expected);
    assert!(eventually(Duration::from_secs(5), || !job.is_running()));
    assert_eq!(job.fail_count(), expected as u32);
}

#[test]
fn reruns_through_agent_loop_until_budget_is_spent() {
    let agent = fast_agent("restart-running");
    let runs = Arc::new(AtomicUsize::new(0));
    let job = always_failing(&agent, &runs, AgentNotRunningPolicy::ForceRestartJob);

    agent.start().unwrap();
    job.start(None).unwrap();
    // Reruns after the 1st and 2nd failure, none after the 3rd.
    assert_settles_at(&runs, &job, 3);
    agent.stop().unwrap();
}

#[test]
fn idle_agent_force_restart_job_starts_job_directly() {
    let agent = fast_agent("restart-direct");
    let runs = Arc::new(AtomicUsize::new(0));
    let job = always_failing(&agent, &runs, AgentNotRunningPolicy::ForceRestartJob);

    job.start(None).unwrap();
    assert_settles_at(&runs, &job, 3);
    assert!(!agent.is_running());
}

#[test]
fn idle_agent_force_run_agent_starts_the_loop() {
    let agent = fast_agent("restart-agent");
    let runs = Arc::new(AtomicUsize::new(0));
    let job = always_failing(&agent, &runs, AgentNotRunningPolicy::ForceRunAgent);

    job.start(None).unwrap();
    assert_settles_at(&runs, &job, 3);
    assert!(agent.is_running());
    agent.stop().unwrap();
}

#[test]
fn orphaned_job_restarts_itself() {
    let agent = Agent::named("short-lived");
    let runs = Arc::new(AtomicUsize::new(0));
    let job = always_failing(&agent, &runs, AgentNotRunningPolicy::ForceRunAgent);
    drop(agent);
    assert!(job.agent().is_none());

    job.start(None).unwrap();
    assert_settles_at(&runs, &job, 3);
}

#[test]
fn success_clears_the_budget() {
    let agent = fast_agent("restart-recover");
    let runs = Arc::new(AtomicUsize::new(0));
    let schedule = ScheduleConfig::interval(3600.0, Utc::now() + ChronoDuration::hours(1))
        .with_fail_handler(FailHandlerConfig::restart_after_fail(
            1,
            AgentNotRunningPolicy::ForceRestartJob,
        ));
    let r = Arc::clone(&runs);
    let job = agent
        .register_job(
            move |_| {
                // Fails on the first attempt only.
                if r.fetch_add(1, Ordering::SeqCst) == 0 {
                    anyhow::bail!("transient");
                }
                Ok(Value::Bool(true))
            },
            &schedule,
            JobOptions::named("recovering"),
        )
        .unwrap();

    job.start(None).unwrap();
    assert!(eventually(Duration::from_secs(5), || runs.load(Ordering::SeqCst) == 2
        && !job.is_running()));
    assert_eq!(job.fail_count(), 0);
    assert_eq!(job.status().last_return, Some(Value::Bool(true)));
}
