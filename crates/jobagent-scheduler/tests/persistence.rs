// Dumping job state into a store and restoring it onto a fresh agent.

use chrono::{Duration as ChronoDuration, Utc};
use jobagent_scheduler::{
    Agent, JobOptions, JobSnapshot, JobStore, LastRunState, ScheduleConfig, SqliteJobStore,
};
use serde_json::{json, Value};

fn schedule() -> ScheduleConfig {
    ScheduleConfig::interval(600.0, Utc::now() - ChronoDuration::minutes(1))
}

fn register(agent: &Agent) -> std::sync::Arc<jobagent_scheduler::Job> {
    agent
        .register_job(|_| Ok(json!({ "rows": 42 })), &schedule(), JobOptions::named("export"))
        .unwrap()
}

#[test]
fn dump_then_load_restores_state() {
    let store = SqliteJobStore::open_in_memory().unwrap();

    let before = Agent::named("persisted");
    let job = register(&before);
    job.set_variable("cursor", json!("2026-01-01"));
    job.start(None).unwrap();
    job.join_thread();
    job.set_enabled(false);

    assert_eq!(before.dump_jobs(&store).unwrap(), 1);
    let saved = store.load("persisted/export").unwrap().unwrap();
    let snapshot: JobSnapshot = serde_json::from_slice(&saved).unwrap();
    assert_eq!(snapshot.status.last_run_state, LastRunState::Success);

    let after = Agent::named("persisted");
    // Shift ids so the restored job keeps its own.
    after
        .register_job(|_| Ok(Value::Null), &schedule(), JobOptions::named("filler"))
        .unwrap();
    let fresh = register(&after);
    assert_eq!(fresh.last_run_state(), LastRunState::NeverExecuted);

    assert_eq!(after.load_jobs(&store).unwrap(), 1);
    let status = fresh.status();
    assert_eq!(status.job_id, fresh.id());
    assert_eq!(status.name, "export");
    assert_eq!(status.last_run_state, LastRunState::Success);
    assert_eq!(status.last_return, Some(json!({ "rows": 42 })));
    assert_eq!(fresh.next_run_time(), job.next_run_time());
    assert_eq!(fresh.variable("cursor"), Some(json!("2026-01-01")));
    assert!(!fresh.is_enabled());
}

#[test]
fn load_ignores_jobs_without_snapshot() {
    let store = SqliteJobStore::open_in_memory().unwrap();
    let agent = Agent::named("empty-store");
    let job = register(&agent);
    let next = job.next_run_time();

    assert_eq!(agent.load_jobs(&store).unwrap(), 0);
    assert_eq!(job.next_run_time(), next);
}

#[test]
fn snapshots_are_keyed_by_agent_name() {
    let store = SqliteJobStore::open_in_memory().unwrap();
    let a = Agent::named("alpha");
    register(&a);
    a.dump_jobs(&store).unwrap();

    let b = Agent::named("beta");
    register(&b);
    assert_eq!(b.load_jobs(&store).unwrap(), 0);
    assert!(store.load("alpha/export").unwrap().is_some());
}
