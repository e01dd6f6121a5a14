//! Single-slot control mailbox between producers (agent `stop`, rerun
//! requests from fail handlers) and the agent loop, which is the only
//! consumer.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::{
    agent::{Agent, AgentShared},
    job::Job,
    signal::Signal,
};

pub enum InterruptKind {
    /// Placeholder installed when the agent starts; handling it is a no-op.
    None,
    /// Wait for every running job of the agent to go idle, then end the loop.
    Stop,
    /// Start the given job now, regardless of its schedule.
    RunJobNow(Arc<Job>),
}

impl InterruptKind {
    pub fn label(&self) -> &'static str {
        match self {
            InterruptKind::None => "none",
            InterruptKind::Stop => "stop",
            InterruptKind::RunJobNow(_) => "run_job_now",
        }
    }
}

pub struct Interrupt {
    kind: InterruptKind,
    /// Held by the loop for the whole duration of handling.
    lock: Mutex<()>,
    pending: Signal,
    processed: Signal,
    agent: Weak<AgentShared>,
}

impl Interrupt {
    pub(crate) fn new(kind: InterruptKind, agent: Weak<AgentShared>) -> Self {
        Self {
            kind,
            lock: Mutex::new(()),
            pending: Signal::new(false),
            processed: Signal::new(false),
            agent,
        }
    }

    pub fn kind(&self) -> &InterruptKind {
        &self.kind
    }

    /// Signalled and not yet taken by the loop.
    pub fn is_pending(&self) -> bool {
        self.pending.is_set()
    }

    /// Currently being handled by the loop.
    pub fn is_in_flight(&self) -> bool {
        self.lock.try_lock().is_err()
    }

    pub fn is_processed(&self) -> bool {
        self.processed.is_set()
    }

    pub(crate) fn signal(&self) {
        self.pending.set();
    }

    /// Block until the loop has finished handling this interrupt.
    pub fn wait_processed(&self, timeout: Option<Duration>) -> bool {
        self.processed.wait(timeout)
    }

    /// Consume the interrupt on the loop thread: lock, handle, unlock, clear.
    ///
    /// Returns `false` when nothing was pending.
    pub(crate) fn process(&self) -> bool {
        if !self.pending.is_set() {
            return false;
        }
        let guard = self.lock.lock().expect("interrupt lock poisoned");
        match self.agent.upgrade() {
            Some(shared) => self.handle(&Agent::from_shared(shared)),
            None => debug!(kind = self.kind.label(), "agent gone, dropping interrupt"),
        }
        drop(guard);
        self.pending.clear();
        self.processed.set();
        true
    }

    fn handle(&self, agent: &Agent) {
        match &self.kind {
            InterruptKind::None => {}
            InterruptKind::Stop => {
                let running = agent.get_all_running_jobs();
                info!(
                    agent = %agent.name(),
                    running = running.len(),
                    "stop interrupt: waiting for running jobs"
                );
                for job in running {
                    job.wait_idle(None);
                }
            }
            InterruptKind::RunJobNow(job) => {
                debug!(agent = %agent.name(), job_id = %job.id(), "run-now interrupt");
                if let Err(e) = agent.run_job(job, None) {
                    warn!(job_id = %job.id(), "run-now interrupt failed to start job: {e}");
                }
            }
        }
    }
}
