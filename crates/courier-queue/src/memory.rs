//! In-memory job store
//!
//! Every operation runs under a single async mutex, which gives the same
//! claim-and-mark indivisibility the SQL store gets from row locks.

use async_trait::async_trait;
use chrono::Duration;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::backend::{JobStore, RECOVERED_ERROR};
use crate::clock::{Clock, SystemClock};
use crate::error::QueueError;
use crate::job::{retry_delay, FailureOutcome, Job, JobId, JobStatus, QueueStats, DEFAULT_MAX_ATTEMPTS};

#[derive(Debug, Default)]
struct Inner {
    next_id: JobId,
    jobs: BTreeMap<JobId, Job>,
}

#[derive(Debug)]
pub struct MemoryQueue {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    max_attempts: i32,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Override the attempt ceiling given to newly enqueued jobs
    pub fn max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Number of stored jobs across all queues
    pub async fn len(&self) -> usize {
        self.inner.lock().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl JobStore for MemoryQueue {
    fn name(&self) -> &str {
        "memory"
    }

    async fn is_healthy(&self) -> bool {
        true
    }

    async fn enqueue(
        &self,
        queue_name: &str,
        payload: serde_json::Value,
        delay: Duration,
    ) -> Result<JobId, QueueError> {
        let now = self.clock.now();
        let run_at = now
            .checked_add_signed(delay)
            .ok_or_else(|| QueueError::InvalidDelay(format!("{}s is out of range", delay.num_seconds())))?;
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let id = inner.next_id;

        inner.jobs.insert(
            id,
            Job {
                id,
                queue_name: queue_name.to_string(),
                payload,
                status: JobStatus::Pending,
                run_at,
                attempts: 0,
                max_attempts: self.max_attempts,
                last_error: None,
                created_at: now,
                updated_at: now,
            },
        );

        Ok(id)
    }

    async fn claim(&self, queue_name: &str) -> Result<Option<Job>, QueueError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;

        // Oldest run_at first; id breaks ties the way insertion order would
        let next = inner
            .jobs
            .values()
            .filter(|job| job.queue_name == queue_name && job.is_eligible(now))
            .min_by_key(|job| (job.run_at, job.id))
            .map(|job| job.id);

        let Some(id) = next else {
            return Ok(None);
        };

        let job = inner
            .jobs
            .get_mut(&id)
            .ok_or_else(|| QueueError::Corrupt(format!("job {} vanished during claim", id)))?;
        job.status = JobStatus::Processing;
        job.attempts += 1;
        job.updated_at = now;

        Ok(Some(job.clone()))
    }

    async fn mark_complete(&self, id: JobId) -> Result<bool, QueueError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;

        match inner.jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Processing => {
                job.status = JobStatus::Completed;
                job.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_failure_or_retry(
        &self,
        id: JobId,
        attempts: i32,
        max_attempts: i32,
        error_message: &str,
    ) -> Result<FailureOutcome, QueueError> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;

        let job = match inner.jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Processing => job,
            _ => return Err(QueueError::NotClaimed(id)),
        };

        match retry_delay(attempts, max_attempts) {
            Some(delay) => {
                job.run_at = now.checked_add_signed(delay).ok_or_else(|| {
                    QueueError::InvalidDelay(format!("backoff of {}s is out of range", delay.num_seconds()))
                })?;
                job.status = JobStatus::Pending;
            }
            None => job.status = JobStatus::Failed,
        }
        job.last_error = Some(error_message.to_string());
        job.updated_at = now;

        Ok(FailureOutcome {
            status: job.status,
            run_at: job.run_at,
        })
    }

    async fn recover_stale(
        &self,
        queue_name: &str,
        staleness: Duration,
    ) -> Result<u64, QueueError> {
        let now = self.clock.now();
        let cutoff = now - staleness;
        let mut inner = self.inner.lock().await;
        let mut reclaimed = 0;

        for job in inner.jobs.values_mut().filter(|job| {
            job.queue_name == queue_name
                && job.status == JobStatus::Processing
                && job.updated_at < cutoff
        }) {
            job.status = JobStatus::Pending;
            job.attempts += 1;
            job.last_error = Some(RECOVERED_ERROR.to_string());
            job.updated_at = now;
            reclaimed += 1;
        }

        Ok(reclaimed)
    }

    async fn aggregate_stats(&self, queue_name: &str) -> Result<QueueStats, QueueError> {
        let inner = self.inner.lock().await;
        let mut stats = QueueStats::default();

        for job in inner.jobs.values().filter(|job| job.queue_name == queue_name) {
            stats.set(job.status, stats.get(job.status) + 1);
        }

        Ok(stats)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, QueueError> {
        Ok(self.inner.lock().await.jobs.get(&id).cloned())
    }
}
