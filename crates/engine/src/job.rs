use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;

use tokio::sync::{watch, Notify};
use tracing::info_span;

use jobtree_core::JobState;

use crate::message::Message;

/// How a job's child process ended, once it has been reaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobExit {
    /// Exited normally with this code.
    Code(i32),
    /// Killed by a signal; no exit code is available.
    Signaled,
}

/// One script invocation.
///
/// Shared via `Arc<Job>` between the `Manager` registry, the `Group` it is
/// admitted into, its `ProcessSupervisor`, and its `CommandTask`. Interior
/// state (lifecycle, inbox, exit code) is mutated through a handful of
/// narrow, lock-scoped methods rather than exposed directly, mirroring how
/// the teacher's engine keeps per-worker runtime state behind small mutator
/// methods on `WorkerRuntime`.
pub(crate) struct Job {
    /// Unique within the manager: either user-supplied or `"<script>/<n>"`.
    pub(crate) ident: String,
    /// Ident of the enqueueing job, or `None` for the entry job.
    pub(crate) parent: Option<String>,
    /// Script path, relative to the job-tree root.
    pub(crate) script: PathBuf,
    /// Positional arguments passed to the script.
    pub(crate) args: Vec<String>,
    /// Group this job was admitted into.
    pub(crate) group: Option<String>,
    /// `-F`: remove from the manager's registry as soon as this job is
    /// `DONE`, since no `waitjobs`/`killjobs` caller is expected to reap it.
    pub(crate) forget: bool,

    state_tx: watch::Sender<JobState>,
    exit: Mutex<Option<JobExit>>,
    inbox: Mutex<VecDeque<std::sync::Arc<Message>>>,
    inbox_notify: Notify,
    kill_notify: Notify,
}

impl Job {
    /// Construct a new job in `JobState::Init`.
    pub(crate) fn new(
        ident: String,
        parent: Option<String>,
        script: PathBuf,
        args: Vec<String>,
        group: Option<String>,
        forget: bool,
    ) -> Self {
        let (state_tx, _rx) = watch::channel(JobState::Init);
        Self {
            ident,
            parent,
            script,
            args,
            group,
            forget,
            state_tx,
            exit: Mutex::new(None),
            inbox: Mutex::new(VecDeque::new()),
            inbox_notify: Notify::new(),
            kill_notify: Notify::new(),
        }
    }

    /// Request termination (`killjobs`). The task supervising this job's
    /// child process observes this via [`Job::killed`]. Uses
    /// `notify_one` so a kill requested before the supervisor starts
    /// waiting is not lost.
    pub(crate) fn request_kill(&self) {
        self.kill_notify.notify_one();
    }

    /// Resolves the next time [`Job::request_kill`] is called.
    pub(crate) async fn killed(&self) {
        self.kill_notify.notified().await;
    }

    /// Whether the inbox currently has at least one undelivered message.
    /// Used by `waitrecv`, which peeks without consuming.
    pub(crate) fn has_message(&self) -> bool {
        !self.inbox.lock().unwrap().is_empty()
    }

    /// Resolves once the inbox is non-empty, without consuming anything.
    pub(crate) async fn wait_for_message(&self) {
        loop {
            let notified = self.inbox_notify.notified();
            if self.has_message() {
                return;
            }
            notified.await;
        }
    }

    /// Current lifecycle state.
    pub(crate) fn state(&self) -> JobState {
        *self.state_tx.borrow()
    }

    /// Advance to `newstate`. No-op if already there; lifecycle progression
    /// (monotonic, no regressions) is the caller's responsibility — the
    /// `tracing` span below records every transition so a regression is
    /// visible in logs even though this type does not assert it.
    pub(crate) fn set_state(&self, newstate: JobState) {
        if *self.state_tx.borrow() == newstate {
            return;
        }
        let _span = info_span!("job", ident = %self.ident).entered();
        tracing::debug!(?newstate, "state transition");
        let _ = self.state_tx.send(newstate);
    }

    /// A future that resolves the next time this job's state satisfies
    /// `pred`, or immediately if it already does.
    pub(crate) async fn wait_for(&self, pred: impl Fn(JobState) -> bool) {
        let mut rx = self.state_tx.subscribe();
        if pred(*rx.borrow()) {
            return;
        }
        while rx.changed().await.is_ok() {
            if pred(*rx.borrow()) {
                return;
            }
        }
    }

    /// Resolves once this job reaches `DONE`.
    pub(crate) async fn wait_done(&self) {
        self.wait_for(|s| s == JobState::Done).await;
    }

    /// Record the exit outcome. Must be called before `set_state(Done)` so
    /// that waiters released by the `DONE` transition already see it.
    pub(crate) fn set_exit(&self, exit: JobExit) {
        *self.exit.lock().unwrap() = Some(exit);
    }

    /// The recorded exit outcome, if the job has been reaped.
    pub(crate) fn exit(&self) -> Option<JobExit> {
        *self.exit.lock().unwrap()
    }

    /// Append a message to this job's inbox (`sendmsg`) and wake any
    /// `recvmsg`/`waitrecv` waiter.
    pub(crate) fn enqueue_message(&self, msg: std::sync::Arc<Message>) {
        self.inbox.lock().unwrap().push_back(msg);
        self.inbox_notify.notify_waiters();
    }

    /// Collect one message FIFO (`recvmsg`), waiting if the inbox is empty.
    /// Callers apply their own timeout around this future.
    pub(crate) async fn collect_message(&self) -> std::sync::Arc<Message> {
        loop {
            let notified = self.inbox_notify.notified();
            if let Some(msg) = self.inbox.lock().unwrap().pop_front() {
                return msg;
            }
            notified.await;
        }
    }
}
