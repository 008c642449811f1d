// pgvault/src/scheduler/runner.rs
use async_trait::async_trait;
use chrono::{DateTime, Local};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{Cadence, ScheduleSpec};

/// Work invoked each time a trigger fires.
#[async_trait]
pub trait ScheduledBackup: Send + Sync + 'static {
    async fn run_scheduled(&self, cadence: Cadence);
}

struct ScheduledJob {
    cadence: Cadence,
    token: CancellationToken,
}

/// Owns the recurring triggers. `Stopped -> Running` on `start`,
/// `Running -> Stopped` on `stop`, and `start` while running replaces every
/// trigger.
#[derive(Default)]
pub struct Scheduler {
    jobs: Mutex<Vec<ScheduledJob>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one trigger per enabled cadence and returns how many were
    /// registered. Must be called from within a tokio runtime.
    pub fn start(&self, spec: &ScheduleSpec, target: Arc<dyn ScheduledBackup>) -> usize {
        let mut jobs = self.lock_jobs();
        cancel_all(&mut jobs);

        for cadence in spec.cadences() {
            let token = CancellationToken::new();
            tokio::spawn(run_trigger(cadence, token.clone(), Arc::clone(&target)));
            info!("📅 Scheduled {} backups", cadence);
            jobs.push(ScheduledJob { cadence, token });
        }
        jobs.len()
    }

    /// Cancels every registered trigger. A backup already running is left to
    /// finish. Returns how many triggers were cancelled.
    pub fn stop(&self) -> usize {
        let mut jobs = self.lock_jobs();
        let stopped = cancel_all(&mut jobs);
        if stopped > 0 {
            info!("⏹️  Stopped {} scheduled backup job(s)", stopped);
        }
        stopped
    }

    pub fn is_running(&self) -> bool {
        !self.lock_jobs().is_empty()
    }

    #[cfg(test)]
    pub fn active_cadences(&self) -> Vec<Cadence> {
        self.lock_jobs().iter().map(|job| job.cadence).collect()
    }

    pub fn next_runs(&self, now: DateTime<Local>) -> Vec<(Cadence, Option<DateTime<Local>>)> {
        self.lock_jobs()
            .iter()
            .map(|job| (job.cadence, job.cadence.next_fire(&now)))
            .collect()
    }

    fn lock_jobs(&self) -> MutexGuard<'_, Vec<ScheduledJob>> {
        // Job bookkeeping stays valid even if a holder panicked.
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let jobs = self.jobs.get_mut().unwrap_or_else(|poisoned| poisoned.into_inner());
        cancel_all(jobs);
    }
}

fn cancel_all(jobs: &mut Vec<ScheduledJob>) -> usize {
    let count = jobs.len();
    for job in jobs.drain(..) {
        job.token.cancel();
    }
    count
}

async fn run_trigger(cadence: Cadence, token: CancellationToken, target: Arc<dyn ScheduledBackup>) {
    let mut after = Local::now();
    loop {
        let Some(next) = cadence.next_fire(&after) else {
            warn!("No upcoming fire time for {} schedule, trigger stopped", cadence);
            return;
        };
        let wait = (next - Local::now()).to_std().unwrap_or_default();

        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }

        info!("⏰ Running scheduled {} backup", cadence.name());
        target.run_scheduled(cadence).await;
        after = next.max(Local::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TimeOfDay;
    use chrono::Weekday;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingTarget {
        runs: AtomicUsize,
    }

    #[async_trait]
    impl ScheduledBackup for CountingTarget {
        async fn run_scheduled(&self, _cadence: Cadence) {
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn full_spec() -> ScheduleSpec {
        ScheduleSpec {
            daily: TimeOfDay::new(2, 0),
            weekly: Some((Weekday::Sun, TimeOfDay::new(3, 0).unwrap())),
            monthly: Some((1, TimeOfDay::new(4, 0).unwrap())),
        }
    }

    #[tokio::test]
    async fn restart_keeps_one_trigger_per_cadence() {
        let scheduler = Scheduler::new();
        let target = Arc::new(CountingTarget::default());

        assert_eq!(scheduler.start(&full_spec(), target.clone()), 3);
        assert_eq!(scheduler.start(&full_spec(), target.clone()), 3);
        assert_eq!(scheduler.active_cadences().len(), 3);
        assert!(scheduler.is_running());
    }

    #[tokio::test]
    async fn restart_with_new_spec_replaces_triggers() {
        let scheduler = Scheduler::new();
        let target = Arc::new(CountingTarget::default());
        scheduler.start(&full_spec(), target.clone());

        let daily_only = ScheduleSpec {
            daily: TimeOfDay::new(1, 30),
            ..ScheduleSpec::default()
        };
        assert_eq!(scheduler.start(&daily_only, target), 1);
        assert_eq!(
            scheduler.active_cadences(),
            vec![Cadence::Daily { at: TimeOfDay::new(1, 30).unwrap() }]
        );
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let scheduler = Scheduler::new();
        assert_eq!(scheduler.stop(), 0);

        scheduler.start(&full_spec(), Arc::new(CountingTarget::default()));
        assert_eq!(scheduler.stop(), 3);
        assert_eq!(scheduler.stop(), 0);
        assert!(!scheduler.is_running());
    }

    #[tokio::test]
    async fn next_runs_are_in_the_future() {
        let scheduler = Scheduler::new();
        scheduler.start(&full_spec(), Arc::new(CountingTarget::default()));
        let now = Local::now();
        for (_, next) in scheduler.next_runs(now) {
            assert!(next.unwrap() > now);
        }
    }

    #[tokio::test]
    async fn cancelled_triggers_never_fire() {
        let scheduler = Scheduler::new();
        let target = Arc::new(CountingTarget::default());
        scheduler.start(&full_spec(), target.clone());
        scheduler.stop();
        tokio::task::yield_now().await;
        assert_eq!(target.runs.load(Ordering::SeqCst), 0);
    }
}
