#![allow(dead_code)]

use std::thread;
use std::time::{Duration, Instant};

use jobagent_core::config::AgentSettings;
use jobagent_scheduler::Agent;

/// Poll `cond` every 10 ms until it holds or `timeout` elapses.
pub fn eventually(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    cond()
}

/// Agent with a short poll interval so schedule-driven tests stay fast.
pub fn fast_agent(name: &str) -> Agent {
    Agent::with_settings(&AgentSettings {
        name: Some(name.to_string()),
        poll_interval_ms: 20,
    })
}
