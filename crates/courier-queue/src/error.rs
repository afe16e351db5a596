//! Queue and job error types

use crate::job::JobId;

/// Errors raised by a [`JobStore`](crate::JobStore)
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The backing store could not be reached or a statement failed.
    /// Retryable at the loop level, never a job-level failure.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The job is not in `processing`, so no outcome can be recorded for it
    #[error("Job {0} is not claimed")]
    NotClaimed(JobId),

    /// `now + delay` falls outside the representable time range
    #[error("Invalid delay: {0}")]
    InvalidDelay(String),

    /// A row could not be mapped back into a [`Job`](crate::Job)
    #[error("Corrupt job row: {0}")]
    Corrupt(String),
}

/// Error raised by a job handler
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobError {
    #[error("{0}")]
    Failed(String),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl JobError {
    pub fn failed(msg: impl Into<String>) -> Self {
        JobError::Failed(msg.into())
    }
}
