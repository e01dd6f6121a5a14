// A misbehaving success or fail handler must never take the agent loop
// down with it.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{eventually, fast_agent};
use jobagent_scheduler::{
    FailHandlerConfig, JobOptions, LastRunState, ScheduleConfig, SuccessHandlerConfig,
};
use serde_json::Value;

#[test]
fn loop_keeps_dispatching_past_broken_handlers() {
    let agent = fast_agent("unruly-handlers");
    let runs = Arc::new(AtomicUsize::new(0));
    let success_calls = Arc::new(AtomicUsize::new(0));
    let fail_calls = Arc::new(AtomicUsize::new(0));

    let s = Arc::clone(&success_calls);
    let f = Arc::clone(&fail_calls);
    let schedule = ScheduleConfig::interval(0.05, Utc::now())
        .with_success_handler(SuccessHandlerConfig::custom(move |_| {
            s.fetch_add(1, Ordering::SeqCst);
            panic!("success handler blew up");
        }))
        .with_fail_handler(FailHandlerConfig::custom(move |_, _| {
            f.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("fail handler gave up")
        }));

    let r = Arc::clone(&runs);
    let job = agent
        .register_job(
            move |_| {
                // Alternate so both handlers get exercised.
                if r.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                    anyhow::bail!("odd run failed");
                }
                Ok(Value::Null)
            },
            &schedule,
            JobOptions::named("alternating"),
        )
        .unwrap();

    agent.start().unwrap();
    assert!(eventually(Duration::from_secs(5), || {
        runs.load(Ordering::SeqCst) >= 6
    }));
    agent.stop().unwrap();

    assert!(success_calls.load(Ordering::SeqCst) >= 2);
    assert!(fail_calls.load(Ordering::SeqCst) >= 2);
    assert!(!job.is_running());
    assert_ne!(job.last_run_state(), LastRunState::NeverExecuted);
    assert!(!agent.is_running());
}
