//! Queue Engine: a named façade over a [`JobStore`]

use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::backend::JobStore;
use crate::error::QueueError;
use crate::job::{FailureOutcome, Job, JobId, JobStatus, StatsSnapshot};

/// A logical queue bound to a store.
///
/// Cloning is cheap and clones share the same wake-up signal, so a producer
/// holding one clone wakes an idle worker holding another.
#[derive(Debug, Clone)]
pub struct Queue {
    name: Arc<str>,
    store: Arc<dyn JobStore>,
    wakeup: Arc<Notify>,
}

impl Queue {
    pub fn new(name: &str, store: Arc<dyn JobStore>) -> Self {
        Self {
            name: Arc::from(name),
            store,
            wakeup: Arc::new(Notify::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> Arc<dyn JobStore> {
        self.store.clone()
    }

    /// Enqueue a job eligible after `delay`
    pub async fn add(&self, payload: serde_json::Value, delay: Duration) -> Result<JobId, QueueError> {
        if Utc::now().checked_add_signed(delay).is_none() {
            return Err(QueueError::InvalidDelay(format!(
                "{}s is out of range",
                delay.num_seconds()
            )));
        }

        let id = self.store.enqueue(&self.name, payload, delay).await?;
        info!(queue = %self.name, job_id = id, delay_secs = delay.num_seconds(), "Job added");

        if delay <= Duration::zero() {
            self.wakeup.notify_one();
        }
        Ok(id)
    }

    /// Claim the next eligible job, if any
    pub async fn poll(&self) -> Result<Option<Job>, QueueError> {
        self.store.claim(&self.name).await
    }

    pub async fn complete(&self, id: JobId) -> Result<(), QueueError> {
        if !self.store.mark_complete(id).await? {
            debug!(queue = %self.name, job_id = id, "Complete was a no-op; job not processing");
        }
        Ok(())
    }

    /// Record a failed attempt; retry-vs-fail is decided by the store from the
    /// job's attempt counters.
    pub async fn handle_failure(&self, job: &Job, error: &str) -> Result<FailureOutcome, QueueError> {
        let outcome = self
            .store
            .mark_failure_or_retry(job.id, job.attempts, job.max_attempts, error)
            .await?;

        match outcome.status {
            JobStatus::Failed => warn!(
                queue = %self.name,
                job_id = job.id,
                attempts = job.attempts,
                error = %error,
                "Job failed permanently"
            ),
            _ => info!(
                queue = %self.name,
                job_id = job.id,
                attempts = job.attempts,
                next_run = %outcome.run_at,
                "Job scheduled for retry"
            ),
        }

        Ok(outcome)
    }

    /// Reset jobs stuck in `processing` longer than `staleness`
    pub async fn recover_jobs(&self, staleness: Duration) -> Result<u64, QueueError> {
        let reclaimed = self.store.recover_stale(&self.name, staleness).await?;
        if reclaimed > 0 {
            info!(queue = %self.name, reclaimed, "Reset stale jobs to pending");
            self.wakeup.notify_one();
        }
        Ok(reclaimed)
    }

    pub async fn stats(&self) -> Result<StatsSnapshot, QueueError> {
        let stats = self.store.aggregate_stats(&self.name).await?;
        Ok(StatsSnapshot {
            queue: self.name.to_string(),
            timestamp: Utc::now(),
            stats,
        })
    }

    pub async fn get(&self, id: JobId) -> Result<Option<Job>, QueueError> {
        self.store.get(id).await
    }

    /// Resolves when a job is added without delay
    pub async fn notified(&self) {
        self.wakeup.notified().await
    }
}
