use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Local;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use jobtree_core::Trigger;

/// A single `repeat`-registered trigger. Each fires `enqueue` requests down
/// a shared channel for the manager to act on; overlapping
/// firings are dropped (`max_instances=1`, matching the reference
/// implementation's APScheduler default) rather than queued.
pub(crate) struct ScheduledJob {
    pub(crate) ident: String,
    in_flight: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Drop for ScheduledJob {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A request for the manager to enqueue a new invocation of a recurring
/// job's script, emitted by a fired trigger.
pub(crate) struct FireEvent {
    pub(crate) schedule_ident: String,
}

/// Holds every live `repeat` registration. The manager treats the scheduler
/// as empty as one of its two termination conditions: it shuts down once
/// both the job registry and the trigger registry are empty.
#[derive(Default)]
pub(crate) struct Scheduler {
    jobs: std::sync::Mutex<Vec<Arc<ScheduledJob>>>,
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.jobs.lock().unwrap().is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    /// Register a trigger, spawning its firing loop. Fire events are sent on
    /// `fire_tx`; the caller (the manager's command task) is responsible for
    /// turning each into an `enqueue`.
    pub(crate) fn register(
        self: &Arc<Self>,
        ident: String,
        trigger: Trigger,
        fire_tx: mpsc::UnboundedSender<FireEvent>,
    ) {
        let in_flight = Arc::new(AtomicBool::new(false));
        let schedule_ident = ident.clone();
        let in_flight_task = in_flight.clone();
        let task = tokio::spawn(async move {
            Self::run_trigger(trigger, schedule_ident, in_flight_task, fire_tx).await;
        });
        self.jobs.lock().unwrap().push(Arc::new(ScheduledJob {
            ident,
            in_flight,
            task,
        }));
    }

    /// Remove a trigger by ident (`killjobs` on a schedule ident).
    pub(crate) fn remove(&self, ident: &str) -> bool {
        let mut jobs = self.jobs.lock().unwrap();
        let before = jobs.len();
        jobs.retain(|j| j.ident != ident);
        jobs.len() != before
    }

    pub(crate) fn idents(&self) -> Vec<String> {
        self.jobs.lock().unwrap().iter().map(|j| j.ident.clone()).collect()
    }

    /// Drop every registration, aborting each trigger's firing loop: asks
    /// the trigger source to shut down.
    pub(crate) fn clear(&self) {
        self.jobs.lock().unwrap().clear();
    }

    async fn run_trigger(
        trigger: Trigger,
        ident: String,
        in_flight: Arc<AtomicBool>,
        fire_tx: mpsc::UnboundedSender<FireEvent>,
    ) {
        match trigger {
            Trigger::Interval(period) => {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    Self::fire(&ident, &in_flight, &fire_tx);
                }
            }
            Trigger::Cron(schedule) => loop {
                let Some(next) = schedule.upcoming(Local).next() else {
                    return;
                };
                let now = Local::now();
                let delay = (next - now).to_std().unwrap_or(std::time::Duration::ZERO);
                tokio::time::sleep(delay).await;
                Self::fire(&ident, &in_flight, &fire_tx);
            },
        }
    }

    fn fire(ident: &str, in_flight: &AtomicBool, fire_tx: &mpsc::UnboundedSender<FireEvent>) {
        if in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!(schedule = ident, "skipping overlapping firing");
            return;
        }
        let _ = fire_tx.send(FireEvent {
            schedule_ident: ident.to_string(),
        });
    }

    /// Called once the enqueued job from a firing has finished, allowing the
    /// next firing to proceed (`max_instances=1`).
    pub(crate) fn mark_idle(&self, ident: &str) {
        if let Some(job) = self.jobs.lock().unwrap().iter().find(|j| j.ident == ident) {
            job.in_flight.store(false, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn interval_trigger_fires_repeatedly() {
        let scheduler = Arc::new(Scheduler::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        scheduler.register("s/0".into(), Trigger::Interval(Duration::from_millis(10)), tx);
        let first = rx.recv().await.unwrap();
        assert_eq!(first.schedule_ident, "s/0");
        scheduler.mark_idle("s/0");
        let second = rx.recv().await.unwrap();
        assert_eq!(second.schedule_ident, "s/0");
    }

    #[tokio::test]
    async fn overlapping_firings_are_dropped_until_idle() {
        let scheduler = Arc::new(Scheduler::new());
        let (tx, mut rx) = mpsc::unbounded_channel();
        scheduler.register("s/0".into(), Trigger::Interval(Duration::from_millis(5)), tx);
        let _ = rx.recv().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(rx.try_recv().is_err());
        scheduler.mark_idle("s/0");
        let _ = rx.recv().await.unwrap();
    }

    #[tokio::test]
    async fn remove_drops_the_schedule() {
        let scheduler = Arc::new(Scheduler::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        scheduler.register("s/0".into(), Trigger::Interval(Duration::from_secs(60)), tx);
        assert_eq!(scheduler.len(), 1);
        assert!(scheduler.remove("s/0"));
        assert!(scheduler.is_empty());
    }
}
