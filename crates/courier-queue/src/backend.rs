//! Job Store trait
//!
//! Every method is one indivisible operation against the store. Implementations
//! must never express a cross-field transition as a read followed by a write.

use async_trait::async_trait;
use chrono::Duration;

use crate::error::QueueError;
use crate::job::{FailureOutcome, Job, JobId, QueueStats};

/// `last_error` stamped on jobs reclaimed by the recovery sweep
pub const RECOVERED_ERROR: &str = "recovered from stale processing state";

#[async_trait]
pub trait JobStore: Send + Sync + std::fmt::Debug {
    /// Backend name for logs and health output
    fn name(&self) -> &str;

    /// Cheap reachability check
    async fn is_healthy(&self) -> bool;

    /// Insert a pending job eligible at `now + delay`, with zero attempts
    async fn enqueue(
        &self,
        queue_name: &str,
        payload: serde_json::Value,
        delay: Duration,
    ) -> Result<JobId, QueueError>;

    /// Claim the oldest eligible job of `queue_name` (by `run_at`), moving it to
    /// `processing` and incrementing `attempts` in the same step.
    ///
    /// Concurrent callers never block on, or both receive, the same row.
    async fn claim(&self, queue_name: &str) -> Result<Option<Job>, QueueError>;

    /// Mark a processing job completed. Returns `false` when nothing changed,
    /// so a repeated call is a harmless no-op.
    async fn mark_complete(&self, id: JobId) -> Result<bool, QueueError>;

    /// Record a failed attempt. Retries with `2^attempts` seconds of backoff
    /// while `attempts < max_attempts`, otherwise fails the job permanently.
    /// `error_message` is stored either way.
    async fn mark_failure_or_retry(
        &self,
        id: JobId,
        attempts: i32,
        max_attempts: i32,
        error_message: &str,
    ) -> Result<FailureOutcome, QueueError>;

    /// Reset every job of `queue_name` stuck in `processing` for longer than
    /// `staleness` back to `pending`. Returns how many were reclaimed.
    async fn recover_stale(&self, queue_name: &str, staleness: Duration)
        -> Result<u64, QueueError>;

    /// Fresh per-status counts for `queue_name`, zero-filled
    async fn aggregate_stats(&self, queue_name: &str) -> Result<QueueStats, QueueError>;

    /// Direct inspection of one job
    async fn get(&self, id: JobId) -> Result<Option<Job>, QueueError>;
}
