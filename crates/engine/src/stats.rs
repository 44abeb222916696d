use std::sync::Arc;
use std::time::Duration;

use sysinfo::System;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Periodic whole-system CPU sampler, replacing the Python implementation's
/// `psutil.cpu_percent(interval=None)` poll with `sysinfo`'s refresh cycle.
///
/// Holds the latest sample in a `watch` channel so `Group` admitters can
/// both read the current value and await its next change without polling.
pub(crate) struct Stats {
    rx: watch::Receiver<f64>,
    _task: Arc<JoinHandle<()>>,
}

impl Stats {
    /// Spawn the sampling task, refreshing every `interval`.
    pub(crate) fn spawn(interval: Duration) -> Self {
        let (tx, rx) = watch::channel(0.0);
        let task = tokio::spawn(async move {
            let mut sys = System::new();
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                sys.refresh_cpu_usage();
                let usage = sys.global_cpu_usage() as f64;
                if tx.send(usage).is_err() {
                    return;
                }
            }
        });
        Self {
            rx,
            _task: Arc::new(task),
        }
    }

    /// The most recently sampled whole-system CPU percentage.
    pub(crate) fn current(&self) -> f64 {
        *self.rx.borrow()
    }

    /// Resolves the next time a sample is published, so callers gating on
    /// `max_cpu` can re-check their admission condition without busy-polling.
    pub(crate) async fn next_sample(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.changed().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn samples_are_published() {
        let stats = Stats::spawn(Duration::from_millis(10));
        stats.next_sample().await;
        assert!(stats.current() >= 0.0);
    }
}
