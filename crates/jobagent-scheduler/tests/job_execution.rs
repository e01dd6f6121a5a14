// Job state machine: schedule anchoring, serialized starts, status records
// and stop semantics. The agent is never started here; jobs run directly.

mod common;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use jobagent_scheduler::{
    Agent, FailHandlerConfig, JobOptions, LastRunState, ScheduleConfig, SchedulerError,
    StopOutcome,
};
use serde_json::{json, Value};

fn hourly_from_past() -> ScheduleConfig {
    ScheduleConfig::interval(3600.0, Utc::now() - ChronoDuration::seconds(10))
}

#[test]
fn interval_next_run_time_advances_from_previous_schedule() {
    let agent = Agent::new();
    let start = Utc::now() - ChronoDuration::minutes(5);
    let job = agent
        .register_job(|_| Ok(Value::Null), &ScheduleConfig::interval(60.0, start), JobOptions::default())
        .unwrap();

    assert!(job.is_initialized());
    assert_eq!(job.next_run_time(), Some(start));

    job.start(None).unwrap();
    assert!(job.wait_idle(Some(Duration::from_secs(5))));
    // Anchored on the previous due time, not on when the run happened.
    assert_eq!(job.next_run_time(), Some(start + ChronoDuration::seconds(60)));

    job.start(None).unwrap();
    assert!(job.wait_idle(Some(Duration::from_secs(5))));
    assert_eq!(job.next_run_time(), Some(start + ChronoDuration::seconds(120)));
}

#[test]
fn start_on_running_job_never_overlaps() {
    let agent = Agent::new();
    let active = Arc::new(AtomicUsize::new(0));
    let max_seen = Arc::new(AtomicUsize::new(0));
    let runs = Arc::new(AtomicUsize::new(0));

    let (a, m, r) = (Arc::clone(&active), Arc::clone(&max_seen), Arc::clone(&runs));
    let job = agent
        .register_job(
            move |_| {
                let now = a.fetch_add(1, Ordering::SeqCst) + 1;
                m.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(200));
                a.fetch_sub(1, Ordering::SeqCst);
                r.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            },
            &hourly_from_past(),
            JobOptions::named("slow"),
        )
        .unwrap();

    job.start(None).unwrap();
    assert!(job.is_running());
    // Shorter than the remaining run: warns, then waits for it anyway.
    job.start(Some(Duration::from_millis(20))).unwrap();
    assert!(job.wait_idle(Some(Duration::from_secs(5))));

    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
}

#[test]
fn failure_then_success_resets_fail_count() {
    let agent = Agent::new();
    let should_fail = Arc::new(AtomicBool::new(true));
    let seen_errors = Arc::new(Mutex::new(Vec::<String>::new()));

    let flag = Arc::clone(&should_fail);
    let errors = Arc::clone(&seen_errors);
    let schedule = hourly_from_past().with_fail_handler(FailHandlerConfig::custom(
        move |_ctx, err| {
            errors.lock().unwrap().push(err.to_string());
            Ok(())
        },
    ));
    let job = agent
        .register_job(
            move |_| {
                if flag.load(Ordering::SeqCst) {
                    anyhow::bail!("disk full");
                }
                Ok(json!("ok"))
            },
            &schedule,
            JobOptions::named("flaky"),
        )
        .unwrap();

    assert_eq!(job.last_run_state(), LastRunState::NeverExecuted);

    job.start(None).unwrap();
    job.join_thread();
    assert_eq!(job.fail_count(), 1);
    assert_eq!(job.last_run_state(), LastRunState::Failed);
    assert_eq!(job.status().last_error.as_deref(), Some("disk full"));
    assert_eq!(*seen_errors.lock().unwrap(), vec!["disk full".to_string()]);

    job.start(None).unwrap();
    job.join_thread();
    assert_eq!(job.fail_count(), 2);

    should_fail.store(false, Ordering::SeqCst);
    job.start(None).unwrap();
    job.join_thread();
    let status = job.status();
    assert_eq!(status.fail_count, 0);
    assert_eq!(status.last_run_state, LastRunState::Success);
    assert_eq!(status.last_return, Some(json!("ok")));
    assert!(status.last_error.is_none());
    assert!(status.last_run_time.is_some());
    assert_eq!(seen_errors.lock().unwrap().len(), 2);
}

#[test]
fn panicking_work_is_recorded_as_failure() {
    let agent = Agent::new();
    let job = agent
        .register_job(
            |_| -> anyhow::Result<Value> { panic!("exploded") },
            &hourly_from_past(),
            JobOptions::default(),
        )
        .unwrap();

    job.start(None).unwrap();
    job.join_thread();
    assert!(!job.is_running());
    assert_eq!(job.fail_count(), 1);
    assert_eq!(job.last_run_state(), LastRunState::Failed);
    assert!(job.status().last_error.unwrap().contains("exploded"));
}

#[test]
fn calculator_failure_skips_work_and_keeps_schedule() {
    let agent = Agent::new();
    let first = Utc::now() - ChronoDuration::seconds(1);
    let calls = Arc::new(AtomicUsize::new(0));
    let worked = Arc::new(AtomicBool::new(false));

    let c = Arc::clone(&calls);
    let schedule = ScheduleConfig::custom(move |_ctx| {
        // Only the initial computation yields a timestamp.
        (c.fetch_add(1, Ordering::SeqCst) == 0).then_some(first)
    });
    let w = Arc::clone(&worked);
    let job = agent
        .register_job(
            move |_| {
                w.store(true, Ordering::SeqCst);
                Ok(Value::Null)
            },
            &schedule,
            JobOptions::default(),
        )
        .unwrap();
    assert_eq!(job.next_run_time(), Some(first));

    job.start(None).unwrap();
    job.join_thread();
    assert!(!worked.load(Ordering::SeqCst));
    assert_eq!(job.fail_count(), 1);
    assert_eq!(job.next_run_time(), Some(first));
}

#[test]
fn custom_calculator_receives_job_context() {
    let agent = Agent::named("ctx-agent");
    let at = Utc::now() + ChronoDuration::hours(1);
    let schedule = ScheduleConfig::custom(move |ctx| {
        assert_eq!(ctx.agent.map(|a| a.name()), Some("ctx-agent".to_string()));
        assert_eq!(ctx.args()["every"], json!(5));
        Some(at)
    });
    let job = agent
        .register_job(
            |ctx| Ok(ctx.args().clone()),
            &schedule,
            JobOptions {
                args: json!({ "every": 5 }),
                ..JobOptions::default()
            },
        )
        .unwrap();
    assert_eq!(job.next_run_time(), Some(at));

    job.start(None).unwrap();
    job.join_thread();
    assert_eq!(job.status().last_return, Some(json!({ "every": 5 })));
}

#[test]
fn stop_on_idle_job_is_not_running_error_unless_silenced() {
    let agent = Agent::new();
    let job = agent
        .register_job(|_| Ok(Value::Null), &hourly_from_past(), JobOptions::named("idle"))
        .unwrap();

    let err = job.stop(Duration::from_millis(10), false).unwrap_err();
    assert!(matches!(err, SchedulerError::NotRunning { ref name } if name == "idle"));
    assert_eq!(err.code(), "NOT_RUNNING");
    assert_eq!(
        job.stop(Duration::from_millis(10), true).unwrap(),
        StopOutcome::NotRunning
    );
}

#[test]
fn stop_marks_job_idle_after_timeout() {
    let agent = Agent::new();
    let job = agent
        .register_job(
            |_| {
                thread::sleep(Duration::from_millis(300));
                Ok(Value::Null)
            },
            &hourly_from_past(),
            JobOptions::default(),
        )
        .unwrap();

    job.start(None).unwrap();
    assert_eq!(
        job.stop(Duration::from_millis(20), false).unwrap(),
        StopOutcome::TimedOut
    );
    assert!(!job.is_running());
    job.join_thread();

    job.start(None).unwrap();
    assert_eq!(
        job.stop(Duration::from_secs(5), false).unwrap(),
        StopOutcome::Finished
    );
}

#[test]
fn rename_rules() {
    let agent = Agent::new();
    let busy = agent
        .register_job(
            |_| {
                thread::sleep(Duration::from_millis(200));
                Ok(Value::Null)
            },
            &hourly_from_past(),
            JobOptions::named("busy"),
        )
        .unwrap();
    agent
        .register_job(|_| Ok(Value::Null), &hourly_from_past(), JobOptions::named("other"))
        .unwrap();

    busy.start(None).unwrap();
    assert!(matches!(busy.set_name("renamed"), Err(SchedulerError::State(_))));
    busy.join_thread();

    assert!(matches!(
        busy.set_name("other"),
        Err(SchedulerError::DuplicateName { .. })
    ));

    busy.set_name("renamed").unwrap();
    assert_eq!(busy.name(), "renamed");
    assert_eq!(busy.status().name, "renamed");
    assert!(agent.get_job_by_name("busy").is_none());
    assert_eq!(agent.get_job_by_name("renamed").unwrap().id(), busy.id());
}

#[test]
fn variables_persist_between_runs() {
    let agent = Agent::new();
    let job = agent
        .register_job(
            |ctx| {
                let count = ctx.job.update_variables(|vars| {
                    let next = vars.get("count").and_then(Value::as_u64).unwrap_or(0) + 1;
                    vars.insert("count".into(), json!(next));
                    next
                });
                Ok(json!(count))
            },
            &hourly_from_past(),
            JobOptions::default(),
        )
        .unwrap();

    for _ in 0..3 {
        job.start(None).unwrap();
        job.join_thread();
    }
    assert_eq!(job.variable("count"), Some(json!(3)));
    assert_eq!(job.status().last_return, Some(json!(3)));

    job.set_variable("count", json!(10));
    assert_eq!(job.variable("count"), Some(json!(10)));
}

#[test]
fn construction_fails_on_incomplete_schedule() {
    let agent = Agent::new();
    let err = agent
        .register_job(|_| Ok(Value::Null), &ScheduleConfig::default(), JobOptions::default())
        .unwrap_err();
    assert_eq!(err.code(), "CONFIGURATION_ERROR");
    assert!(agent.get_all_jobs().is_empty());
}

#[test]
fn schedule_overflow_is_a_failed_run_not_a_panic() {
    let agent = Agent::new();
    let job = agent
        .register_job(|_| Ok(Value::Null), &hourly_from_past(), JobOptions::named("edge"))
        .unwrap();

    let near_end = chrono::DateTime::<Utc>::MAX_UTC - ChronoDuration::minutes(1);
    let mut snapshot = job.snapshot();
    snapshot.next_run_time = Some(near_end);
    job.restore(&snapshot).unwrap();

    job.start(None).unwrap();
    job.join_thread();
    assert_eq!(job.fail_count(), 1);
    let error = job.status().last_error.unwrap();
    assert!(error.contains("out of range"), "{error}");
    assert!(!error.contains("panicked"), "{error}");
    assert_eq!(job.next_run_time(), Some(near_end));
}
