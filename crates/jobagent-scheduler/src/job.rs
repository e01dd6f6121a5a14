use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::anyhow;
use chrono::Utc;
use jobagent_core::JobId;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::{
    agent::{Agent, AgentShared},
    calculator::Calculator,
    error::{Result, SchedulerError},
    handler::{panic_message, FailHandler, SuccessHandler},
    schedule::ScheduleConfig,
    signal::Signal,
    types::{JobContext, JobSnapshot, JobStatus, LastRunState, Timestamp},
};

/// The user work a job runs. Arguments bound at registration are reachable
/// through [`JobContext::args`]; the returned value lands in
/// [`JobStatus::last_return`].
pub type WorkFn = Arc<dyn Fn(&JobContext<'_>) -> anyhow::Result<Value> + Send + Sync>;

/// Result of [`Job::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The running execution finished within the timeout.
    Finished,
    /// The timeout elapsed; the job was marked idle but its thread may
    /// still be running.
    TimedOut,
    /// The job was idle and the caller asked to silence the error.
    NotRunning,
}

/// Everything needed to build a job besides its id and owner.
pub(crate) struct JobSpec {
    pub name: String,
    pub work: WorkFn,
    pub args: Value,
    pub enabled: bool,
}

struct JobState {
    next_run_time: Option<Timestamp>,
    status: JobStatus,
}

/// Sets the not-running signal when dropped, so the job goes idle even if
/// the execution body unwinds.
struct IdleOnDrop<'a>(&'a Signal);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        self.0.set();
    }
}

/// A schedulable unit of work owned by an [`Agent`].
///
/// Jobs are always handled through `Arc<Job>`: the registry, the agent loop
/// and each execution thread hold their own reference.
pub struct Job {
    id: JobId,
    name: RwLock<String>,
    enabled: AtomicBool,
    initialized: AtomicBool,
    daemon: bool,
    args: Value,
    agent: Weak<AgentShared>,
    work: WorkFn,
    calculator: Calculator,
    fail_handler: FailHandler,
    success_handler: SuccessHandler,
    state: Mutex<JobState>,
    variables: Mutex<Map<String, Value>>,
    /// Set while idle, cleared for the duration of an execution.
    idle: Signal,
    /// Serializes `start` so only one execution is ever issued at a time.
    start_lock: Mutex<()>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Job {
    /// Resolve the strategies and compute the initial next run time.
    pub(crate) fn build(
        id: JobId,
        spec: JobSpec,
        schedule: &ScheduleConfig,
        agent: Weak<AgentShared>,
    ) -> Result<Arc<Self>> {
        info!(job_id = %id, job = %spec.name, "initializing job");
        let calculator = Calculator::from_config(schedule)?;
        let fail_handler = FailHandler::from_config(&schedule.job_fail_handler)?;
        let success_handler = SuccessHandler::from_config(&schedule.job_success_handler)?;

        let job = Arc::new(Self {
            id,
            name: RwLock::new(spec.name.clone()),
            enabled: AtomicBool::new(spec.enabled),
            initialized: AtomicBool::new(false),
            daemon: schedule.daemon,
            args: spec.args,
            agent,
            work: spec.work,
            calculator,
            fail_handler,
            success_handler,
            state: Mutex::new(JobState {
                next_run_time: None,
                status: JobStatus::new(id, &spec.name),
            }),
            variables: Mutex::new(Map::new()),
            idle: Signal::new(true),
            start_lock: Mutex::new(()),
            thread: Mutex::new(None),
        });
        job.initialize()?;
        Ok(job)
    }

    fn initialize(self: &Arc<Self>) -> Result<()> {
        let agent = self.agent();
        let ctx = JobContext {
            job: self,
            agent: agent.as_ref(),
        };
        let next = self.calculator.next_run_time(None, &ctx)?;
        self.lock_state().next_run_time = Some(next);
        self.initialized.store(true, Ordering::SeqCst);
        info!(job_id = %self.id, job = %self.name(), next_run_time = %next, "job initialized");
        Ok(())
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn name(&self) -> String {
        self.name.read().expect("job name poisoned").clone()
    }

    /// Rename the job. Fails with `State` while running and with
    /// `DuplicateName` when the owning agent already has a job by that name.
    pub fn set_name(&self, name: &str) -> Result<()> {
        let _serial = self.start_lock.lock().expect("job start lock poisoned");
        if self.is_running() {
            return Err(SchedulerError::State(format!(
                "cannot rename running job {}",
                self.name()
            )));
        }
        match self.agent() {
            Some(agent) => agent.rename_job(self, name),
            None => {
                self.apply_name(name);
                Ok(())
            }
        }
    }

    pub(crate) fn apply_name(&self, name: &str) {
        *self.name.write().expect("job name poisoned") = name.to_string();
        self.lock_state().status.name = name.to_string();
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Disabled jobs are skipped by the agent loop but can still be run
    /// explicitly.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        !self.idle.is_set()
    }

    pub fn is_daemon(&self) -> bool {
        self.daemon
    }

    pub fn args(&self) -> &Value {
        &self.args
    }

    /// The owning agent, if it is still alive.
    pub fn agent(&self) -> Option<Agent> {
        self.agent.upgrade().map(Agent::from_shared)
    }

    pub(crate) fn belongs_to(&self, shared: &Arc<AgentShared>) -> bool {
        std::ptr::eq(self.agent.as_ptr(), Arc::as_ptr(shared))
    }

    pub fn next_run_time(&self) -> Option<Timestamp> {
        self.lock_state().next_run_time
    }

    pub fn fail_count(&self) -> u32 {
        self.lock_state().status.fail_count
    }

    pub fn last_run_state(&self) -> LastRunState {
        self.lock_state().status.last_run_state
    }

    pub fn status(&self) -> JobStatus {
        self.lock_state().status.clone()
    }

    /// True when the agent loop should start this job at `now`.
    pub fn is_due(&self, now: Timestamp) -> bool {
        self.is_initialized()
            && self.is_enabled()
            && !self.is_running()
            && self.next_run_time().is_some_and(|next| next <= now)
    }

    // --- user variables ----------------------------------------------------

    pub fn variable(&self, key: &str) -> Option<Value> {
        self.lock_variables().get(key).cloned()
    }

    pub fn set_variable(&self, key: &str, value: Value) {
        self.lock_variables().insert(key.to_string(), value);
    }

    /// Read-modify-write the variable map atomically.
    pub fn update_variables<R>(&self, f: impl FnOnce(&mut Map<String, Value>) -> R) -> R {
        f(&mut self.lock_variables())
    }

    // --- execution -----------------------------------------------------------

    /// Run the job on a new thread.
    ///
    /// If an execution is in progress, waits up to `timeout` (forever when
    /// `None`) for it, warns on timeout, and still lets it finish before the
    /// new execution is issued.
    pub fn start(self: &Arc<Self>, timeout: Option<Duration>) -> Result<()> {
        let _serial = self.start_lock.lock().expect("job start lock poisoned");
        if self.is_running() {
            warn!(job_id = %self.id, job = %self.name(), "job is running, waiting for it to finish");
            if !self.idle.wait(timeout) {
                warn!(
                    job_id = %self.id,
                    job = %self.name(),
                    timeout_ms = timeout.map(|t| t.as_millis() as u64),
                    "timed out waiting for job, letting current run finish first"
                );
                self.idle.wait(None);
            }
        }

        // Running from here on, so nobody else can issue a start.
        self.idle.clear();
        let job = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(format!("job-{}", self.name()))
            .spawn(move || job.execute())
            .map_err(|e| {
                self.idle.set();
                SchedulerError::Spawn(e)
            })?;
        *self.thread.lock().expect("job thread poisoned") = Some(handle);
        Ok(())
    }

    fn execute(self: Arc<Self>) {
        let idle = IdleOnDrop(&self.idle);
        let agent = self.agent();
        let ctx = JobContext {
            job: &self,
            agent: agent.as_ref(),
        };

        info!(job_id = %self.id, job = %self.name(), "starting job");
        let outcome = self
            .advance_schedule(&ctx)
            .and_then(|()| self.invoke_work(&ctx));
        let finished_at = Utc::now();

        match outcome {
            Ok(value) => {
                self.lock_state().status.record_success(finished_at, value);
                drop(idle);
                info!(job_id = %self.id, job = %self.name(), "job executed successfully");
                self.success_handler.handle(&ctx);
            }
            Err(err) => {
                let fail_count = {
                    let mut state = self.lock_state();
                    state.status.record_failure(finished_at, &err);
                    state.status.fail_count
                };
                drop(idle);
                warn!(job_id = %self.id, job = %self.name(), fail_count, "job execution failed: {err:#}");
                self.fail_handler.handle(&ctx, &err);
            }
        }
    }

    /// Recompute `next_run_time` from the previous scheduled time.
    fn advance_schedule(&self, ctx: &JobContext<'_>) -> anyhow::Result<()> {
        let previous = self.next_run_time();
        let next = panic::catch_unwind(AssertUnwindSafe(|| {
            self.calculator.next_run_time(previous, ctx)
        }))
        .map_err(|payload| {
            anyhow!(
                "next run time calculation panicked: {}",
                panic_message(payload.as_ref())
            )
        })??;
        self.lock_state().next_run_time = Some(next);
        debug!(job_id = %self.id, next_run_time = %next, "next run time computed");
        Ok(())
    }

    fn invoke_work(&self, ctx: &JobContext<'_>) -> anyhow::Result<Value> {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.work)(ctx))) {
            Ok(result) => result,
            Err(payload) => Err(anyhow!("job panicked: {}", panic_message(payload.as_ref()))),
        }
    }

    /// Wait up to `timeout` for the running execution, then mark the job
    /// idle regardless. The execution thread is never killed.
    pub fn stop(&self, timeout: Duration, silence_error: bool) -> Result<StopOutcome> {
        if !self.is_running() {
            if silence_error {
                return Ok(StopOutcome::NotRunning);
            }
            return Err(SchedulerError::NotRunning { name: self.name() });
        }

        let finished = self.idle.wait(Some(timeout));
        self.idle.set();
        if finished {
            Ok(StopOutcome::Finished)
        } else {
            warn!(
                job_id = %self.id,
                job = %self.name(),
                "job did not finish in time; marked idle, its thread keeps running"
            );
            Ok(StopOutcome::TimedOut)
        }
    }

    /// Block until the job is idle. Returns `false` on timeout.
    pub fn wait_idle(&self, timeout: Option<Duration>) -> bool {
        self.idle.wait(timeout)
    }

    /// Join the latest execution thread, including its handler chain.
    ///
    /// No-op when called from that thread itself.
    pub fn join_thread(&self) {
        let handle = self.thread.lock().expect("job thread poisoned").take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!(job_id = %self.id, "job thread panicked outside of its work function");
            }
        }
    }

    // --- persistence -------------------------------------------------------

    pub fn snapshot(&self) -> JobSnapshot {
        let state = self.lock_state();
        JobSnapshot {
            name: self.name(),
            enabled: self.is_enabled(),
            next_run_time: state.next_run_time,
            status: state.status.clone(),
            variables: self.lock_variables().clone(),
        }
    }

    /// Apply persisted state. The job keeps its own id and name.
    pub fn restore(&self, snapshot: &JobSnapshot) -> Result<()> {
        let _serial = self.start_lock.lock().expect("job start lock poisoned");
        if self.is_running() {
            return Err(SchedulerError::State(format!(
                "cannot restore running job {}",
                self.name()
            )));
        }
        self.set_enabled(snapshot.enabled);
        {
            let mut state = self.lock_state();
            if snapshot.next_run_time.is_some() {
                state.next_run_time = snapshot.next_run_time;
            }
            state.status = JobStatus {
                job_id: self.id,
                name: self.name(),
                ..snapshot.status.clone()
            };
        }
        *self.lock_variables() = snapshot.variables.clone();
        Ok(())
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, JobState> {
        self.state.lock().expect("job state poisoned")
    }

    fn lock_variables(&self) -> std::sync::MutexGuard<'_, Map<String, Value>> {
        self.variables.lock().expect("job variables poisoned")
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("enabled", &self.is_enabled())
            .field("running", &self.is_running())
            .field("next_run_time", &self.next_run_time())
            .finish()
    }
}
