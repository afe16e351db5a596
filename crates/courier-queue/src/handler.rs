//! Job handler boundary

use async_trait::async_trait;

use crate::error::JobError;
use crate::job::Job;

/// The side effect executed for each claimed job.
///
/// Returning `Ok` completes the job; any `Err` goes through the retry policy.
/// Handlers must tolerate being run more than once for the same job, since
/// delivery is at-least-once.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<(), JobError>;
}

