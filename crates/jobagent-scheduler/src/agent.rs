use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::Utc;
use jobagent_core::{config::AgentSettings, AgentId, JobId};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::{
    error::{Result, SchedulerError},
    interrupt::{Interrupt, InterruptKind},
    job::{Job, JobSpec, WorkFn},
    schedule::ScheduleConfig,
    signal::Signal,
    store::JobStore,
    types::{JobContext, JobSnapshot},
};

/// How long the loop's own dispatch waits on a job that went busy between
/// the due check and the start call.
const DISPATCH_WAIT: Duration = Duration::from_millis(10);

/// Per-job registration options.
#[derive(Debug, Clone)]
pub struct JobOptions {
    /// Defaults to `job_<id>`.
    pub name: Option<String>,
    /// Bound arguments, reachable from every callable via the context.
    pub args: Value,
    pub enabled: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            name: None,
            args: Value::Null,
            enabled: true,
        }
    }
}

impl JobOptions {
    pub fn named(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::default()
        }
    }
}

pub(crate) struct AgentShared {
    id: AgentId,
    name: RwLock<String>,
    poll_interval: Duration,
    /// Insertion order is dispatch order.
    jobs: RwLock<Vec<Arc<Job>>>,
    next_job_id: AtomicU64,
    started: AtomicBool,
    stopping: AtomicBool,
    interrupt: Mutex<Arc<Interrupt>>,
    /// One interrupt producer at a time.
    install_lock: Mutex<()>,
    wake: Arc<Signal>,
    loop_thread: Mutex<Option<JoinHandle<()>>>,
}

/// The scheduler: owns a job registry and the dispatch loop thread.
///
/// `Agent` is a cheap handle; clones refer to the same scheduler. The loop
/// thread only holds a weak reference and exits once every handle is gone.
#[derive(Clone)]
pub struct Agent {
    shared: Arc<AgentShared>,
}

impl Agent {
    /// Agent with default settings and the name `Agent-<id>`.
    pub fn new() -> Self {
        Self::with_settings(&AgentSettings::default())
    }

    pub fn named(name: &str) -> Self {
        Self::with_settings(&AgentSettings {
            name: Some(name.to_string()),
            ..AgentSettings::default()
        })
    }

    pub fn with_settings(settings: &AgentSettings) -> Self {
        let id = AgentId::next();
        let name = settings
            .name
            .clone()
            .unwrap_or_else(|| format!("Agent-{id}"));
        let shared = Arc::new_cyclic(|weak: &Weak<AgentShared>| AgentShared {
            id,
            name: RwLock::new(name),
            poll_interval: Duration::from_millis(settings.poll_interval_ms.max(1)),
            jobs: RwLock::new(Vec::new()),
            next_job_id: AtomicU64::new(1),
            started: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            interrupt: Mutex::new(Arc::new(Interrupt::new(InterruptKind::None, weak.clone()))),
            install_lock: Mutex::new(()),
            wake: Arc::new(Signal::new(false)),
            loop_thread: Mutex::new(None),
        });
        Self { shared }
    }

    pub(crate) fn from_shared(shared: Arc<AgentShared>) -> Self {
        Self { shared }
    }

    pub fn id(&self) -> AgentId {
        self.shared.id
    }

    pub fn name(&self) -> String {
        self.shared.name.read().expect("agent name poisoned").clone()
    }

    /// Display name only; fails with `State` while the agent is started.
    pub fn set_name(&self, name: &str) -> Result<()> {
        if self.is_started() {
            return Err(SchedulerError::State(
                "cannot set name of an active agent".into(),
            ));
        }
        *self.shared.name.write().expect("agent name poisoned") = name.to_string();
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        self.shared.poll_interval
    }

    // --- registry ------------------------------------------------------------

    /// Build and register a job. Fails with `DuplicateName` on a name
    /// collision and with `Configuration` when the schedule is incomplete.
    pub fn register_job<F>(
        &self,
        work: F,
        schedule: &ScheduleConfig,
        options: JobOptions,
    ) -> Result<Arc<Job>>
    where
        F: Fn(&JobContext<'_>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let job = self.build_job(Arc::new(work), schedule, options)?;
        let mut jobs = self.write_jobs();
        let name = job.name();
        if jobs.iter().any(|j| j.name() == name) {
            return Err(SchedulerError::DuplicateName { name });
        }
        jobs.push(Arc::clone(&job));
        info!(agent = %self.name(), job_id = %job.id(), job = %name, "job registered");
        Ok(job)
    }

    /// Builder-style registration:
    /// `agent.job(&schedule).name("backup").register(|ctx| ...)`.
    pub fn job(&self, schedule: &ScheduleConfig) -> JobRegistration<'_> {
        JobRegistration {
            agent: self,
            schedule: schedule.clone(),
            options: JobOptions::default(),
        }
    }

    /// Build a job owned by this agent without registering it; pair with
    /// [`Agent::append_job`].
    pub fn new_job<F>(
        &self,
        work: F,
        schedule: &ScheduleConfig,
        options: JobOptions,
    ) -> Result<Arc<Job>>
    where
        F: Fn(&JobContext<'_>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let id = self.allocate_job_id();
        Job::build(
            id,
            job_spec(id, Arc::new(work), options),
            schedule,
            Arc::downgrade(&self.shared),
        )
    }

    fn build_job(
        &self,
        work: WorkFn,
        schedule: &ScheduleConfig,
        options: JobOptions,
    ) -> Result<Arc<Job>> {
        let id = self.allocate_job_id();
        let spec = job_spec(id, work, options);
        // Fail before any user calculator runs.
        if self.get_job_by_name(&spec.name).is_some() {
            return Err(SchedulerError::DuplicateName { name: spec.name });
        }
        Job::build(id, spec, schedule, Arc::downgrade(&self.shared))
    }

    fn allocate_job_id(&self) -> JobId {
        JobId(self.shared.next_job_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Add a job built by [`Agent::new_job`]. A colliding name is renamed to
    /// the first free `<name>_<n>`.
    pub fn append_job(&self, job: Arc<Job>, name: Option<&str>) -> Result<Arc<Job>> {
        if !job.belongs_to(&self.shared) {
            return Err(SchedulerError::State(format!(
                "job {} belongs to another agent",
                job.id()
            )));
        }
        let mut jobs = self.write_jobs();
        if jobs.iter().any(|j| j.id() == job.id()) {
            return Err(SchedulerError::State(format!(
                "job {} is already registered",
                job.id()
            )));
        }

        let wanted = name.map(str::to_string).unwrap_or_else(|| job.name());
        let mut candidate = wanted.clone();
        let mut suffix = 1u32;
        while jobs.iter().any(|j| j.name() == candidate) {
            candidate = format!("{wanted}_{suffix}");
            suffix += 1;
        }
        if candidate != wanted {
            info!(job_id = %job.id(), requested = %wanted, assigned = %candidate, "job name taken, renamed");
        }
        if candidate != job.name() {
            job.apply_name(&candidate);
        }
        jobs.push(Arc::clone(&job));
        info!(agent = %self.name(), job_id = %job.id(), job = %candidate, "job appended");
        Ok(job)
    }

    pub(crate) fn rename_job(&self, job: &Job, name: &str) -> Result<()> {
        let jobs = self.write_jobs();
        if jobs.iter().any(|j| j.id() != job.id() && j.name() == name) {
            return Err(SchedulerError::DuplicateName {
                name: name.to_string(),
            });
        }
        job.apply_name(name);
        Ok(())
    }

    pub fn get_job_by_name(&self, name: &str) -> Option<Arc<Job>> {
        self.read_jobs().iter().find(|j| j.name() == name).cloned()
    }

    pub fn get_job_by_id(&self, id: impl Into<JobId>) -> Option<Arc<Job>> {
        let id = id.into();
        self.read_jobs().iter().find(|j| j.id() == id).cloned()
    }

    /// Snapshot of the registry in insertion order.
    pub fn get_all_jobs(&self) -> Vec<Arc<Job>> {
        self.read_jobs().clone()
    }

    pub fn get_all_running_jobs(&self) -> Vec<Arc<Job>> {
        self.read_jobs()
            .iter()
            .filter(|j| j.is_running())
            .cloned()
            .collect()
    }

    pub fn remove_job_by_name(&self, name: &str) -> Option<Arc<Job>> {
        let mut jobs = self.write_jobs();
        let pos = jobs.iter().position(|j| j.name() == name)?;
        let job = jobs.remove(pos);
        info!(agent = %self.name(), job_id = %job.id(), job = %name, "job removed");
        Some(job)
    }

    pub fn remove_job_by_id(&self, id: impl Into<JobId>) -> Option<Arc<Job>> {
        let id = id.into();
        let mut jobs = self.write_jobs();
        let pos = jobs.iter().position(|j| j.id() == id)?;
        let job = jobs.remove(pos);
        info!(agent = %self.name(), job_id = %id, "job removed");
        Some(job)
    }

    // --- running jobs --------------------------------------------------------

    pub fn run_job(&self, job: &Arc<Job>, timeout: Option<Duration>) -> Result<()> {
        job.start(timeout)
    }

    /// Start a job by name. `Ok(false)` when no such job exists.
    pub fn run_job_by_name(&self, name: &str, timeout: Option<Duration>) -> Result<bool> {
        match self.get_job_by_name(name) {
            Some(job) => job.start(timeout).map(|()| true),
            None => Ok(false),
        }
    }

    /// Start a job by id. `Ok(false)` when no such job exists.
    pub fn run_job_by_id(&self, id: impl Into<JobId>, timeout: Option<Duration>) -> Result<bool> {
        match self.get_job_by_id(id) {
            Some(job) => job.start(timeout).map(|()| true),
            None => Ok(false),
        }
    }

    /// Queue `job` to be started by the loop on its next tick.
    ///
    /// Returns `false` when the agent is not started or is stopping.
    pub fn request_run_now(&self, job: &Arc<Job>) -> bool {
        self.install_interrupt(InterruptKind::RunJobNow(Arc::clone(job)))
            .is_some()
    }

    // --- lifecycle -----------------------------------------------------------

    pub fn is_started(&self) -> bool {
        self.shared.started.load(Ordering::SeqCst)
    }

    pub fn is_stopping(&self) -> bool {
        self.shared.stopping.load(Ordering::SeqCst)
    }

    /// Started and not on its way down: the loop accepts interrupts.
    pub fn is_running(&self) -> bool {
        self.is_started() && !self.is_stopping()
    }

    /// Spawn the dispatch loop. Fails with `State` if already started.
    pub fn start(&self) -> Result<()> {
        if self
            .shared
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(SchedulerError::State(
                "agent can only be started once".into(),
            ));
        }

        let name = self.name();
        info!(agent_id = %self.id(), agent = %name, "agent is starting");
        *self.lock_interrupt() = Arc::new(Interrupt::new(
            InterruptKind::None,
            Arc::downgrade(&self.shared),
        ));
        self.shared.wake.clear();

        let weak = Arc::downgrade(&self.shared);
        let wake = Arc::clone(&self.shared.wake);
        let poll = self.shared.poll_interval;
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || run_loop(weak, wake, poll))
            .map_err(|e| {
                self.shared.started.store(false, Ordering::SeqCst);
                SchedulerError::Spawn(e)
            })?;
        *self.shared.loop_thread.lock().expect("agent loop handle poisoned") = Some(handle);
        Ok(())
    }

    /// Stop the loop and wait for every running job to go idle.
    ///
    /// Fails with `State` if the agent is not started or already stopping.
    pub fn stop(&self) -> Result<()> {
        if !self.is_started() {
            return Err(SchedulerError::State(
                "cannot stop agent before it is started".into(),
            ));
        }
        if self.shared.stopping.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::State("agent is already stopping".into()));
        }
        info!(agent_id = %self.id(), agent = %self.name(), "agent is stopping");

        if let Some(stop) = self.install_interrupt(InterruptKind::Stop) {
            while !stop.wait_processed(Some(self.shared.poll_interval)) {
                if !self.loop_alive() {
                    error!(agent = %self.name(), "agent loop died before processing stop");
                    break;
                }
            }
        }

        let handle = self
            .shared
            .loop_thread
            .lock()
            .expect("agent loop handle poisoned")
            .take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                error!(agent = %self.name(), "agent loop thread panicked");
            }
        }

        // Stop has already waited for the jobs to go idle; non-daemon jobs
        // also get their handler chain joined.
        for job in self.get_all_jobs() {
            if !job.is_daemon() {
                job.join_thread();
            }
        }

        self.shared.started.store(false, Ordering::SeqCst);
        self.shared.stopping.store(false, Ordering::SeqCst);
        info!(agent_id = %self.id(), agent = %self.name(), "agent stopped");
        Ok(())
    }

    fn loop_alive(&self) -> bool {
        self.shared
            .loop_thread
            .lock()
            .expect("agent loop handle poisoned")
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    // --- interrupts ----------------------------------------------------------

    /// The interrupt currently sitting in the slot.
    pub fn current_interrupt(&self) -> Arc<Interrupt> {
        Arc::clone(&self.lock_interrupt())
    }

    /// Install `kind` into the single slot and wake the loop.
    ///
    /// Waits while the previous interrupt is still pending or in flight, so
    /// none is overwritten before the loop has handled it. Only `Stop` is
    /// accepted while the agent is stopping or not started.
    pub(crate) fn install_interrupt(&self, kind: InterruptKind) -> Option<Arc<Interrupt>> {
        let _producer = self
            .shared
            .install_lock
            .lock()
            .expect("interrupt install lock poisoned");
        if !matches!(kind, InterruptKind::Stop) && !self.is_running() {
            debug!(kind = kind.label(), "agent not accepting interrupts");
            return None;
        }

        let previous = self.current_interrupt();
        if previous.is_pending() {
            if previous.is_in_flight() {
                warn!(
                    agent = %self.name(),
                    kind = previous.kind().label(),
                    "interrupt in flight, waiting for it to clear"
                );
            }
            while !previous.wait_processed(Some(self.shared.poll_interval)) {
                if !self.loop_alive() {
                    warn!(agent = %self.name(), "agent loop gone, replacing unprocessed interrupt");
                    break;
                }
            }
        }

        let interrupt = Arc::new(Interrupt::new(kind, Arc::downgrade(&self.shared)));
        *self.lock_interrupt() = Arc::clone(&interrupt);
        interrupt.signal();
        self.shared.wake.set();
        debug!(agent = %self.name(), kind = interrupt.kind().label(), "interrupt installed");
        Some(interrupt)
    }

    /// One loop iteration: drain at most one interrupt, then start due jobs.
    /// Returns `false` once a stop interrupt has been handled.
    fn tick(&self) -> bool {
        let current = self.current_interrupt();
        if current.process() && matches!(current.kind(), InterruptKind::Stop) {
            return false;
        }

        let now = Utc::now();
        for job in self.get_all_jobs() {
            if job.is_due(now) {
                debug!(job_id = %job.id(), job = %job.name(), "job due");
                if let Err(e) = job.start(Some(DISPATCH_WAIT)) {
                    error!(job_id = %job.id(), "failed to start due job: {e}");
                }
            }
        }
        true
    }

    // --- persistence ---------------------------------------------------------

    /// Save every registered job's snapshot under `<agent name>/<job name>`.
    pub fn dump_jobs(&self, store: &dyn JobStore) -> Result<usize> {
        let jobs = self.get_all_jobs();
        for job in &jobs {
            let blob = serde_json::to_vec(&job.snapshot())?;
            store.save(&self.store_key(&job.name()), &blob)?;
        }
        info!(agent = %self.name(), count = jobs.len(), "jobs dumped");
        Ok(jobs.len())
    }

    /// Restore persisted state onto registered jobs with matching names.
    /// Jobs without a stored snapshot are left untouched.
    pub fn load_jobs(&self, store: &dyn JobStore) -> Result<usize> {
        let mut restored = 0;
        for job in self.get_all_jobs() {
            let Some(blob) = store.load(&self.store_key(&job.name()))? else {
                continue;
            };
            let snapshot: JobSnapshot = serde_json::from_slice(&blob)?;
            job.restore(&snapshot)?;
            restored += 1;
        }
        info!(agent = %self.name(), restored, "jobs loaded");
        Ok(restored)
    }

    fn store_key(&self, job_name: &str) -> String {
        format!("{}/{}", self.name(), job_name)
    }

    // --- private helpers -----------------------------------------------------

    fn read_jobs(&self) -> std::sync::RwLockReadGuard<'_, Vec<Arc<Job>>> {
        self.shared.jobs.read().expect("job registry poisoned")
    }

    fn write_jobs(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Arc<Job>>> {
        self.shared.jobs.write().expect("job registry poisoned")
    }

    fn lock_interrupt(&self) -> MutexGuard<'_, Arc<Interrupt>> {
        self.shared.interrupt.lock().expect("interrupt slot poisoned")
    }
}

impl Default for Agent {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("started", &self.is_started())
            .field("jobs", &self.read_jobs().len())
            .finish()
    }
}

/// Functional registration: configure, then hand over the work function.
pub struct JobRegistration<'a> {
    agent: &'a Agent,
    schedule: ScheduleConfig,
    options: JobOptions,
}

impl JobRegistration<'_> {
    pub fn name(mut self, name: &str) -> Self {
        self.options.name = Some(name.to_string());
        self
    }

    pub fn args(mut self, args: Value) -> Self {
        self.options.args = args;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.options.enabled = enabled;
        self
    }

    pub fn register<F>(self, work: F) -> Result<Arc<Job>>
    where
        F: Fn(&JobContext<'_>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.agent.register_job(work, &self.schedule, self.options)
    }
}

fn job_spec(id: JobId, work: WorkFn, options: JobOptions) -> JobSpec {
    JobSpec {
        name: options.name.unwrap_or_else(|| format!("job_{id}")),
        work,
        args: options.args,
        enabled: options.enabled,
    }
}

/// Body of the agent thread. Sleeps for the poll interval between ticks,
/// or less when an interrupt install wakes it.
fn run_loop(weak: Weak<AgentShared>, wake: Arc<Signal>, poll: Duration) {
    debug!("agent loop started");
    loop {
        let Some(shared) = weak.upgrade() else {
            debug!("agent dropped, loop exiting");
            return;
        };
        let agent = Agent::from_shared(shared);
        if !agent.tick() {
            info!(agent = %agent.name(), "stop interrupt processed, loop exiting");
            return;
        }
        // Release the strong reference while sleeping.
        drop(agent);
        wake.wait(Some(poll));
        wake.clear();
    }
}
