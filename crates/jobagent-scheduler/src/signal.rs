use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A binary flag threads can block on until it becomes set.
///
/// Used for a job's "not running" state, an interrupt's pending/processed
/// markers and the agent loop's wake-up call.
#[derive(Debug, Default)]
pub struct Signal {
    flag: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    pub fn new(initial: bool) -> Self {
        Self {
            flag: Mutex::new(initial),
            cond: Condvar::new(),
        }
    }

    pub fn set(&self) {
        let mut flag = self.flag.lock().expect("signal poisoned");
        *flag = true;
        self.cond.notify_all();
    }

    pub fn clear(&self) {
        *self.flag.lock().expect("signal poisoned") = false;
    }

    pub fn is_set(&self) -> bool {
        *self.flag.lock().expect("signal poisoned")
    }

    /// Block until the flag is set or `timeout` elapses (`None` waits forever).
    ///
    /// Returns the flag's value on return, so `false` means the wait timed out.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let guard = self.flag.lock().expect("signal poisoned");
        match timeout {
            None => *self
                .cond
                .wait_while(guard, |set| !*set)
                .expect("signal poisoned"),
            Some(timeout) => {
                let (guard, _) = self
                    .cond
                    .wait_timeout_while(guard, timeout, |set| !*set)
                    .expect("signal poisoned");
                *guard
            }
        }
    }
}
