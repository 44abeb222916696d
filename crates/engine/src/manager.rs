use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Notify};
use tokio::task::JoinSet;

use jobtree_core::{validate_script_path, GroupConfig, JobState, Trigger};

use crate::group::Group;
use crate::job::{Job, JobExit};
use crate::message::Message;
use crate::protocol::ProtocolError;
use crate::scheduler::{FireEvent, Scheduler};
use crate::stats::Stats;
use crate::{logging_task, supervisor};

/// The manager's registries and shared services.
///
/// Owns no child processes directly: each admitted job's process lifecycle
/// runs in its own spawned task (`Manager::run_job`), which holds the
/// `tokio::process::Child` and reports back into the registries here.
pub(crate) struct Manager {
    root: PathBuf,
    entry_name: String,
    jobs: Mutex<HashMap<String, Arc<Job>>>,
    groups: Mutex<HashMap<Option<String>, Arc<Group>>>,
    messages: Mutex<HashMap<String, Arc<Message>>>,
    scheduler: Arc<Scheduler>,
    scheduled_params: Mutex<HashMap<String, (PathBuf, Vec<String>, Option<String>, u32, f64)>>,
    stats: Arc<Stats>,
    job_counter: AtomicU64,
    message_counter: AtomicU64,
    schedule_counter: AtomicU64,
    fire_tx: mpsc::UnboundedSender<FireEvent>,
    idle: Notify,
    events: broadcast::Sender<ManagerEvent>,
}

/// Emitted by the manager whenever a job starts running or finishes, for
/// an embedding front end to observe (mirrors the teacher's `EngineEvent`
/// broadcast channel).
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    /// A job transitioned into `RUNNING`.
    JobStarted {
        /// The job's ident.
        ident: String,
    },
    /// A job reached `DONE`.
    JobFinished {
        /// The job's ident.
        ident: String,
        /// Its exit outcome, or `None` if the child was never spawned.
        exit: Option<JobExit>,
    },
}

/// The outcome of a `waitjobs`/`killjobs` wait on a single job ident.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum JobReport {
    /// Still not `DONE` when the wait window elapsed.
    Timeout,
    /// `DONE`, killed by a signal (no exit code available).
    Signaled,
    /// `DONE`, exited with this code.
    Code(i32),
}

impl JobReport {
    /// Render as the single wire token used in `waitjobs`/`killjobs`
    /// structured replies: `T`, `N`, or the exit code.
    pub(crate) fn token(&self) -> String {
        match self {
            JobReport::Timeout => "T".to_string(),
            JobReport::Signaled => "N".to_string(),
            JobReport::Code(code) => code.to_string(),
        }
    }
}

impl Manager {
    /// Build a manager rooted at `root`, spawning its `Stats` sampler at
    /// `stats_interval` and its trigger-firing loop.
    pub(crate) fn new(root: PathBuf, entry_name: String, stats_interval: Duration) -> Arc<Self> {
        let (fire_tx, fire_rx) = mpsc::unbounded_channel();
        let (events, _rx) = broadcast::channel(256);
        let manager = Arc::new(Self {
            root,
            entry_name,
            jobs: Mutex::new(HashMap::new()),
            groups: Mutex::new(HashMap::new()),
            messages: Mutex::new(HashMap::new()),
            scheduler: Arc::new(Scheduler::new()),
            scheduled_params: Mutex::new(HashMap::new()),
            stats: Arc::new(Stats::spawn(stats_interval)),
            job_counter: AtomicU64::new(0),
            message_counter: AtomicU64::new(0),
            schedule_counter: AtomicU64::new(0),
            fire_tx,
            idle: Notify::new(),
            events,
        });
        tokio::spawn(Self::run_fire_loop(manager.clone(), fire_rx));
        manager
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn entry_name(&self) -> &str {
        &self.entry_name
    }

    /// Subscribe to [`ManagerEvent`]s. Lagging subscribers miss events
    /// rather than blocking the engine; callers that need every event
    /// should subscribe before any job is enqueued.
    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }

    /// `true` once no job is active and no trigger is registered — the
    /// manager's termination condition.
    pub(crate) fn is_idle(&self) -> bool {
        let no_active_jobs = self
            .jobs
            .lock()
            .unwrap()
            .values()
            .all(|job| job.state() == JobState::Done);
        no_active_jobs && self.scheduler.is_empty()
    }

    /// Resolves the next time a job finishes or a trigger is removed, so
    /// the caller can re-check [`Manager::is_idle`] without polling.
    pub(crate) async fn idle_changed(&self) {
        self.idle.notified().await;
    }

    /// The exit outcome of a still-registered job, or `None` if it was
    /// never spawned, is still running, or has already been reaped.
    pub(crate) fn exit_of(&self, ident: &str) -> Option<JobExit> {
        self.jobs.lock().unwrap().get(ident).and_then(|j| j.exit())
    }

    /// Request `SIGTERM` on every currently-registered job; used by an
    /// embedding front end on graceful shutdown, e.g. Ctrl-C.
    pub(crate) fn kill_all(&self) {
        for job in self.jobs.lock().unwrap().values() {
            job.request_kill();
        }
    }

    /// Tear down the trigger source and clear every registry. Call only
    /// after [`Manager::is_idle`] is `true`.
    pub(crate) fn shutdown(&self) {
        self.scheduler.clear();
        self.jobs.lock().unwrap().clear();
        self.groups.lock().unwrap().clear();
        self.messages.lock().unwrap().clear();
    }

    fn next_ident(counter: &AtomicU64, prefix: &str) -> String {
        let n = counter.fetch_add(1, Ordering::Relaxed);
        format!("{prefix}/{n}")
    }

    fn group_for(&self, ident: Option<String>, max_jobs: u32, max_cpu: f64) -> Arc<Group> {
        let mut groups = self.groups.lock().unwrap();
        groups
            .entry(ident.clone())
            .or_insert_with(|| {
                let config = if max_jobs == 0 && max_cpu == 0.0 {
                    GroupConfig::unbounded(ident.clone())
                } else {
                    GroupConfig {
                        ident: ident.clone(),
                        max_jobs,
                        max_cpu,
                    }
                };
                Group::spawn(config, self.stats.clone())
            })
            .clone()
    }

    /// `enqueue`: validate the script, register a new job, and hand it to
    /// its group's admission queue. Returns the job's ident immediately;
    /// admission and execution continue in the background.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn enqueue(
        self: &Arc<Self>,
        parent: Option<String>,
        ident: Option<String>,
        script: PathBuf,
        args: Vec<String>,
        group: Option<String>,
        forget: bool,
        max_jobs: u32,
        max_cpu: f64,
    ) -> Result<String, ProtocolError> {
        let resolved_script = validate_script_path(&self.root, &script)
            .map_err(|e| ProtocolError::InvalidArgument(e.to_string()))?;

        let ident = ident.unwrap_or_else(|| {
            let stem = script.to_string_lossy().to_string();
            Self::next_ident(&self.job_counter, &stem)
        });

        {
            let mut jobs = self.jobs.lock().unwrap();
            if jobs.contains_key(&ident) {
                return Err(ProtocolError::InvalidArgument(format!(
                    "job already exists: {ident}"
                )));
            }
            let job = Arc::new(Job::new(
                ident.clone(),
                parent,
                resolved_script.clone(),
                args,
                group.clone(),
                forget,
            ));
            jobs.insert(ident.clone(), job);
        }

        let group_handle = self.group_for(group, max_jobs, max_cpu);
        let manager = self.clone();
        let job_ident = ident.clone();
        tokio::spawn(async move {
            manager.run_job(job_ident, group_handle).await;
        });

        Ok(ident)
    }

    async fn run_job(self: Arc<Self>, ident: String, group: Arc<Group>) {
        let job = match self.jobs.lock().unwrap().get(&ident).cloned() {
            Some(job) => job,
            None => return,
        };

        job.set_state(JobState::Waiting);
        group.admit(ident.clone()).await;
        job.set_state(JobState::Starting);

        let spawn_result = supervisor::spawn(
            &job.script,
            &job.args,
            &self.root,
            &job.ident,
            job.parent.as_deref(),
        );

        let mut spawned = match spawn_result {
            Ok(spawned) => spawned,
            Err(err) => {
                tracing::error!(job = %ident, error = %err, "failed to spawn job");
                job.set_exit(JobExit::Signaled);
                job.set_state(JobState::Done);
                group.release(&ident);
                self.finish(&ident).await;
                return;
            }
        };

        job.set_state(JobState::Running);
        tracing::info!(job = %ident, "job running");
        let _ = self.events.send(ManagerEvent::JobStarted {
            ident: ident.clone(),
        });

        let log_handle = tokio::spawn(logging_task::run(ident.clone(), spawned.log));
        let command_task = crate::command_task::CommandTask::new(self.clone(), job.clone(), spawned.control);
        let command_handle = tokio::spawn(command_task.run());

        let exit = tokio::select! {
            exit = supervisor::wait(&mut spawned.child) => exit.unwrap_or(JobExit::Signaled),
            _ = job.killed() => {
                let _ = supervisor::terminate(&spawned.child);
                supervisor::wait(&mut spawned.child).await.unwrap_or(JobExit::Signaled)
            }
        };

        command_handle.abort();
        let _ = log_handle.await;

        job.set_exit(exit);
        job.set_state(JobState::Done);
        group.release(&ident);
        self.scheduler.mark_idle(&ident);
        let _ = self.events.send(ManagerEvent::JobFinished {
            ident: ident.clone(),
            exit: Some(exit),
        });
        self.finish(&ident).await;
    }

    async fn finish(&self, ident: &str) {
        let forget = self
            .jobs
            .lock()
            .unwrap()
            .get(ident)
            .map(|j| j.forget)
            .unwrap_or(false);
        if forget {
            self.jobs.lock().unwrap().remove(ident);
        }
        self.idle.notify_waiters();
    }

    /// `repeat`: register a recurring trigger. Each firing enqueues another
    /// invocation of `script`, forgotten as soon as it finishes since no
    /// caller holds its ident.
    pub(crate) fn repeat(self: &Arc<Self>, script: PathBuf, args: Vec<String>, trigger: Trigger) -> Result<(), ProtocolError> {
        validate_script_path(&self.root, &script)
            .map_err(|e| ProtocolError::InvalidArgument(e.to_string()))?;
        let schedule_ident = Self::next_ident(&self.schedule_counter, "schedule");
        self.scheduler
            .register(schedule_ident.clone(), trigger, self.fire_tx.clone());
        self.scheduled_params
            .lock()
            .unwrap()
            .insert(schedule_ident, (script, args, None, 0, 0.0));
        Ok(())
    }

    async fn run_fire_loop(self: Arc<Self>, mut fire_rx: mpsc::UnboundedReceiver<FireEvent>) {
        while let Some(event) = fire_rx.recv().await {
            let params = self
                .scheduled_params
                .lock()
                .unwrap()
                .get(&event.schedule_ident)
                .cloned();
            let Some((script, args, group, max_jobs, max_cpu)) = params else {
                continue;
            };
            let schedule_ident = event.schedule_ident.clone();
            match self.enqueue(None, None, script, args, group, true, max_jobs, max_cpu) {
                Ok(job_ident) => {
                    if let Some(job) = self.jobs.lock().unwrap().get(&job_ident).cloned() {
                        let manager = self.clone();
                        tokio::spawn(async move {
                            job.wait_done().await;
                            manager.scheduler.mark_idle(&schedule_ident);
                        });
                    }
                }
                Err(err) => {
                    tracing::error!(schedule = %event.schedule_ident, error = %err, "scheduled enqueue failed");
                    self.scheduler.mark_idle(&event.schedule_ident);
                }
            }
        }
    }

    /// Snapshot the named jobs, silently dropping any ident not currently
    /// known. An empty `idents` slice snapshots nothing — `waitjobs -t 5`
    /// and `killjobs` with no idents are legal no-op calls, not a request
    /// to act on every job in the tree.
    fn known_jobs(&self, idents: &[String]) -> Vec<Arc<Job>> {
        let jobs = self.jobs.lock().unwrap();
        idents.iter().filter_map(|id| jobs.get(id).cloned()).collect()
    }

    /// Wait (up to `timeout`, or forever) for every named job to reach
    /// `DONE`, then report each one's outcome and reap those that finished.
    /// Unknown idents are silently omitted from the report.
    async fn wait_and_report(&self, idents: &[String], timeout: Option<Duration>) -> Vec<(String, JobReport)> {
        let targets = self.known_jobs(idents);

        let wait_all = async {
            let mut set = JoinSet::new();
            for job in &targets {
                let job = job.clone();
                set.spawn(async move { job.wait_done().await });
            }
            while set.join_next().await.is_some() {}
        };
        match timeout {
            Some(d) => {
                let _ = tokio::time::timeout(d, wait_all).await;
            }
            None => wait_all.await,
        }

        let mut reports = Vec::with_capacity(targets.len());
        let mut done_idents = Vec::new();
        for job in &targets {
            let report = if job.state() != JobState::Done {
                JobReport::Timeout
            } else {
                done_idents.push(job.ident.clone());
                match job.exit() {
                    Some(JobExit::Code(code)) => JobReport::Code(code),
                    Some(JobExit::Signaled) | None => JobReport::Signaled,
                }
            };
            reports.push((job.ident.clone(), report));
        }

        if !done_idents.is_empty() {
            let mut jobs = self.jobs.lock().unwrap();
            for ident in &done_idents {
                jobs.remove(ident);
            }
        }
        reports
    }

    /// `waitjobs`: wait until each named job is `DONE` or `timeout` elapses,
    /// then reap every job that finished (the canonical reaper).
    pub(crate) async fn waitjobs(&self, idents: &[String], timeout: Option<Duration>) -> Vec<(String, JobReport)> {
        self.wait_and_report(idents, timeout).await
    }

    /// `killjobs`: send `SIGTERM` to each named job, then behave exactly
    /// like `waitjobs`.
    pub(crate) async fn killjobs(&self, idents: &[String], timeout: Option<Duration>) -> Vec<(String, JobReport)> {
        for job in self.known_jobs(idents) {
            job.request_kill();
        }
        self.wait_and_report(idents, timeout).await
    }

    /// `sendmsg`: deliver a message to a job's inbox, returning the new
    /// message's ident.
    pub(crate) fn sendmsg(&self, to: &str, body: Vec<u8>) -> Result<String, ProtocolError> {
        let job = self
            .jobs
            .lock()
            .unwrap()
            .get(to)
            .cloned()
            .ok_or_else(|| ProtocolError::UnknownJob(to.to_string()))?;
        let n = self.message_counter.fetch_add(1, Ordering::Relaxed);
        let ident = format!("msg:{n}");
        let msg = Arc::new(Message::new(ident.clone(), body));
        self.messages.lock().unwrap().insert(ident.clone(), msg.clone());
        job.enqueue_message(msg);
        Ok(ident)
    }

    /// `recvmsg`: dequeue the next message for `job_ident`, waiting up to
    /// `timeout`. Marks the message delivered and removes it from the
    /// manager's message registry once the recipient collects it.
    pub(crate) async fn recvmsg(&self, job_ident: &str, timeout: Option<Duration>) -> Result<Option<Vec<u8>>, ProtocolError> {
        let job = self
            .jobs
            .lock()
            .unwrap()
            .get(job_ident)
            .cloned()
            .ok_or_else(|| ProtocolError::UnknownJob(job_ident.to_string()))?;

        let recv = job.collect_message();
        let msg = match timeout {
            Some(d) => match tokio::time::timeout(d, recv).await {
                Ok(msg) => msg,
                Err(_) => return Ok(None),
            },
            None => recv.await,
        };
        msg.mark_delivered();
        self.messages.lock().unwrap().remove(&msg.ident);
        Ok(Some(msg.body.clone()))
    }

    /// `waitrecv`: for each named message, wait (up to `timeout`) for
    /// delivery without consuming it. A message ident already reaped by
    /// `recvmsg` (or never known) is reported delivered, matching the
    /// wire contract's optimistic read of "not pending means delivered".
    pub(crate) async fn waitrecv(&self, idents: &[String], timeout: Option<Duration>) -> Vec<(String, bool)> {
        let pending: Vec<Arc<Message>> = {
            let messages = self.messages.lock().unwrap();
            idents.iter().filter_map(|id| messages.get(id).cloned()).collect()
        };

        let wait_all = async {
            let mut set = JoinSet::new();
            for msg in &pending {
                let msg = msg.clone();
                set.spawn(async move { msg.wait_delivered().await });
            }
            while set.join_next().await.is_some() {}
        };
        match timeout {
            Some(d) => {
                let _ = tokio::time::timeout(d, wait_all).await;
            }
            None => wait_all.await,
        }

        let messages = self.messages.lock().unwrap();
        idents
            .iter()
            .map(|id| {
                let delivered = messages.get(id).map(|m| m.is_delivered()).unwrap_or(true);
                (id.clone(), delivered)
            })
            .collect()
    }
}
