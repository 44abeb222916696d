use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot, Notify};

use jobtree_core::GroupConfig;

use crate::stats::Stats;

/// A pending admission request: resolved by dropping/sending on `grant` once
/// the job may proceed.
struct AdmitRequest {
    ident: String,
    grant: oneshot::Sender<()>,
}

/// A named (or default) admission gate.
///
/// The reference implementation resolves admission order via
/// `asyncio.wait` over a list of futures, popping whichever is ready first.
/// That pattern does not translate cleanly to a language with real
/// channels; the design notes for this kind of system explicitly recommend
/// the alternative used here: a single task owns the group's admission
/// queue and drains it strictly in FIFO receive order, which is both
/// simpler to reason about and trivially fair.
pub(crate) struct Group {
    config: GroupConfig,
    admit_tx: mpsc::UnboundedSender<AdmitRequest>,
    members: Mutex<HashSet<String>>,
    release: Notify,
}

impl Group {
    /// Construct a group and spawn its admitter task. `stats` is shared
    /// process-wide; only consulted when `config.max_cpu > 0.0`.
    pub(crate) fn spawn(config: GroupConfig, stats: Arc<Stats>) -> Arc<Self> {
        let (admit_tx, admit_rx) = mpsc::unbounded_channel();
        let group = Arc::new(Self {
            config,
            admit_tx,
            members: Mutex::new(HashSet::new()),
            release: Notify::new(),
        });
        tokio::spawn(Self::run_admitter(group.clone(), stats, admit_rx));
        group
    }

    /// `None` denotes the unnamed default group.
    pub(crate) fn ident(&self) -> Option<&str> {
        self.config.ident.as_deref()
    }

    fn admitted_count(&self) -> usize {
        self.members.lock().unwrap().len()
    }

    fn has_room(&self, stats: &Stats) -> bool {
        if self.config.max_jobs > 0 && self.admitted_count() as u32 >= self.config.max_jobs {
            return false;
        }
        if self.config.max_cpu > 0.0 && stats.current() >= self.config.max_cpu {
            return false;
        }
        true
    }

    async fn run_admitter(
        self_: Arc<Self>,
        stats: Arc<Stats>,
        mut admit_rx: mpsc::UnboundedReceiver<AdmitRequest>,
    ) {
        while let Some(req) = admit_rx.recv().await {
            if !self_.config.has_caps() {
                self_.members.lock().unwrap().insert(req.ident);
                let _ = req.grant.send(());
                continue;
            }

            let mut logged_wait = false;
            loop {
                if self_.has_room(&stats) {
                    self_.members.lock().unwrap().insert(req.ident.clone());
                    let _ = req.grant.send(());
                    break;
                }
                if !logged_wait {
                    tracing::info!(job = %req.ident, "Waiting for slot.");
                    logged_wait = true;
                }
                tokio::select! {
                    _ = stats.next_sample() => {}
                    _ = self_.release.notified() => {}
                }
            }
        }
    }

    /// Enqueue an admission request and wait for the grant. FIFO order is
    /// guaranteed by the underlying `mpsc` channel.
    pub(crate) async fn admit(self: &Arc<Self>, ident: String) {
        let (grant_tx, grant_rx) = oneshot::channel();
        let _ = self.admit_tx.send(AdmitRequest {
            ident,
            grant: grant_tx,
        });
        let _ = grant_rx.await;
    }

    /// Release a member's slot, waking the admitter to reconsider the head
    /// of its queue: a completing job's slot is offered to the next waiter.
    pub(crate) fn release(&self, ident: &str) {
        self.members.lock().unwrap().remove(ident);
        self.release.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn unbounded_group_admits_immediately() {
        let stats = Arc::new(Stats::spawn(Duration::from_millis(50)));
        let group = Group::spawn(GroupConfig::unbounded(None), stats);
        group.admit("a".into()).await;
        assert_eq!(group.admitted_count(), 1);
    }

    #[tokio::test]
    async fn max_jobs_cap_blocks_until_release() {
        let stats = Arc::new(Stats::spawn(Duration::from_millis(50)));
        let config = GroupConfig {
            ident: Some("g".into()),
            max_jobs: 1,
            max_cpu: 0.0,
        };
        let group = Group::spawn(config, stats);

        group.admit("a".into()).await;
        assert_eq!(group.admitted_count(), 1);

        let group2 = group.clone();
        let waiter = tokio::spawn(async move { group2.admit("b".into()).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(group.admitted_count(), 1);

        group.release("a");
        waiter.await.unwrap();
        assert_eq!(group.admitted_count(), 1);
        assert!(group.members.lock().unwrap().contains("b"));
    }

    #[tokio::test]
    async fn admission_is_fifo() {
        let stats = Arc::new(Stats::spawn(Duration::from_millis(50)));
        let config = GroupConfig {
            ident: Some("g".into()),
            max_jobs: 1,
            max_cpu: 0.0,
        };
        let group = Group::spawn(config, stats);
        group.admit("first".into()).await;

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut waiters = Vec::new();
        for name in ["second", "third"] {
            let group = group.clone();
            let order = order.clone();
            waiters.push(tokio::spawn(async move {
                group.admit(name.into()).await;
                order.lock().unwrap().push(name.to_string());
            }));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        group.release("first");
        tokio::time::sleep(Duration::from_millis(20)).await;
        group.release("second");
        for w in waiters {
            w.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec!["second", "third"]);
    }
}
