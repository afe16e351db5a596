//! Recovery sweep for zombie jobs
//!
//! Staleness of `updated_at` is the only liveness signal: a job left in
//! `processing` longer than the threshold is presumed abandoned.

use chrono::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::Queue;
use crate::error::QueueError;

pub const DEFAULT_STALENESS_MINUTES: i64 = 5;

#[derive(Debug, Clone)]
pub struct RecoverySweep {
    queue: Queue,
    staleness: Duration,
}

impl RecoverySweep {
    pub fn new(queue: Queue, staleness: Duration) -> Self {
        Self { queue, staleness }
    }

    pub fn staleness(&self) -> Duration {
        self.staleness
    }

    /// One pass; returns how many jobs were reset to `pending`
    pub async fn run_once(&self) -> Result<u64, QueueError> {
        self.queue.recover_jobs(self.staleness).await
    }

    /// Repeat the sweep every `every` until `shutdown` fires. The first pass
    /// happens one period after start, since startup runs its own sweep.
    pub async fn run(self, every: std::time::Duration, shutdown: CancellationToken) {
        let every = every.max(std::time::Duration::from_secs(1));
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        info!(
            queue = %self.queue.name(),
            every_secs = every.as_secs(),
            staleness_mins = self.staleness.num_minutes(),
            "Recovery sweep scheduled"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => match self.run_once().await {
                    Ok(0) => debug!(queue = %self.queue.name(), "No stale jobs found"),
                    Ok(_) => {}
                    Err(e) => warn!(queue = %self.queue.name(), error = %e, "Recovery sweep failed"),
                },
            }
        }

        debug!(queue = %self.queue.name(), "Recovery sweep stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RECOVERED_ERROR;
    use crate::clock::ManualClock;
    use crate::job::JobStatus;
    use crate::memory::MemoryQueue;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_sweep_only_reclaims_after_threshold() {
        let clock = ManualClock::default();
        let queue = Queue::new("q", Arc::new(MemoryQueue::with_clock(Arc::new(clock.clone()))));
        let id = queue.add(json!({}), Duration::zero()).await.unwrap();
        queue.poll().await.unwrap().unwrap();

        let sweep = RecoverySweep::new(queue.clone(), Duration::minutes(DEFAULT_STALENESS_MINUTES));

        clock.advance(Duration::minutes(3));
        assert_eq!(sweep.run_once().await.unwrap(), 0);
        assert_eq!(queue.get(id).await.unwrap().unwrap().status, JobStatus::Processing);

        clock.advance(Duration::minutes(3));
        assert_eq!(sweep.run_once().await.unwrap(), 1);
        assert_eq!(queue.get(id).await.unwrap().unwrap().status, JobStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_sweep_reclaims_stale_job() {
        let clock = ManualClock::default();
        let queue = Queue::new("q", Arc::new(MemoryQueue::with_clock(Arc::new(clock.clone()))));
        let id = queue.add(json!({}), Duration::zero()).await.unwrap();
        queue.poll().await.unwrap().unwrap();

        let shutdown = CancellationToken::new();
        let sweep = RecoverySweep::new(queue.clone(), Duration::minutes(DEFAULT_STALENESS_MINUTES));
        let task = tokio::spawn(sweep.run(std::time::Duration::from_secs(60), shutdown.clone()));

        // Stale, but the first pass is one period away
        clock.advance(Duration::minutes(6));
        tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        assert_eq!(queue.get(id).await.unwrap().unwrap().status, JobStatus::Processing);

        tokio::time::sleep(std::time::Duration::from_secs(31)).await;
        let job = queue.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempts, 2);
        assert_eq!(job.last_error.as_deref(), Some(RECOVERED_ERROR));

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_periodic_sweep_stops_on_cancel() {
        let queue = Queue::new("q", Arc::new(MemoryQueue::new()));
        let sweep = RecoverySweep::new(queue, Duration::minutes(5));
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(sweep.run(std::time::Duration::from_secs(1), shutdown.clone()));
        shutdown.cancel();

        tokio::time::timeout(std::time::Duration::from_secs(2), task)
            .await
            .expect("sweep should exit after cancel")
            .unwrap();
    }
}
