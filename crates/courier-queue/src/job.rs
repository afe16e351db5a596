//! Job definitions

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::QueueError;

/// Job Identifier (monotonically assigned by the store)
pub type JobId = i64;

/// Ceiling on attempts when the producer does not pick one
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

/// Largest exponent fed into the backoff; keeps `2^n` well inside `i64` seconds
const MAX_BACKOFF_EXPONENT: i32 = 30;

/// Job lifecycle state
///
/// Valid transitions: `Pending -> Processing -> {Completed | Pending | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting for `run_at` and a free worker
    Pending,
    /// Claimed by exactly one worker
    Processing,
    /// Handler returned successfully
    Completed,
    /// Attempts exhausted
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Completed and failed jobs are never touched again
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(QueueError::Corrupt(format!("unknown job status '{}'", other))),
        }
    }
}

/// A persisted job row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub queue_name: String,
    /// Opaque to the queue; only the handler reads it
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub run_at: DateTime<Utc>,
    pub attempts: i32,
    pub max_attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Eligible for claim at `now`
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending && self.run_at <= now
    }
}

/// Result of recording a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureOutcome {
    /// `Pending` when a retry was scheduled, `Failed` when attempts are exhausted
    pub status: JobStatus,
    pub run_at: DateTime<Utc>,
}

/// Delay before a failed job becomes eligible again: `2^attempts` seconds.
///
/// `attempts` is the already-incremented count of the claim that failed.
pub fn backoff_delay(attempts: i32) -> Duration {
    let exponent = attempts.clamp(0, MAX_BACKOFF_EXPONENT) as u32;
    Duration::seconds(2_i64.pow(exponent))
}

/// Next state after a failed attempt, decided before anything is written.
///
/// Returns `Some(delay)` when the job should be retried, `None` when it has
/// run out of attempts.
pub fn retry_delay(attempts: i32, max_attempts: i32) -> Option<Duration> {
    (attempts < max_attempts).then(|| backoff_delay(attempts))
}

/// Per-status counts for one queue; statuses with no rows read as zero
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl QueueStats {
    pub fn get(&self, status: JobStatus) -> u64 {
        match status {
            JobStatus::Pending => self.pending,
            JobStatus::Processing => self.processing,
            JobStatus::Completed => self.completed,
            JobStatus::Failed => self.failed,
        }
    }

    pub fn set(&mut self, status: JobStatus, count: u64) {
        match status {
            JobStatus::Pending => self.pending = count,
            JobStatus::Processing => self.processing = count,
            JobStatus::Completed => self.completed = count,
            JobStatus::Failed => self.failed = count,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed
    }
}

/// Stats as returned to callers, stamped with when they were taken
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub queue: String,
    pub timestamp: DateTime<Utc>,
    pub stats: QueueStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
        }
        assert!("dead_letter".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&JobStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }

    #[test]
    fn test_backoff_is_power_of_two() {
        assert_eq!(backoff_delay(1), Duration::seconds(2));
        assert_eq!(backoff_delay(2), Duration::seconds(4));
        assert_eq!(backoff_delay(3), Duration::seconds(8));
    }

    #[test]
    fn test_retry_delay_stops_at_max_attempts() {
        assert_eq!(retry_delay(1, 3), Some(Duration::seconds(2)));
        assert_eq!(retry_delay(2, 3), Some(Duration::seconds(4)));
        assert_eq!(retry_delay(3, 3), None);
        assert_eq!(retry_delay(4, 3), None);
    }

    #[test]
    fn test_default_stats_are_zero_filled() {
        let stats = QueueStats::default();
        let json = serde_json::to_value(stats).unwrap();
        for status in JobStatus::ALL {
            assert_eq!(json[status.as_str()], 0);
        }
    }

    proptest! {
        #[test]
        fn backoff_never_shrinks(a in 0i32..64, b in 0i32..64) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(backoff_delay(lo) <= backoff_delay(hi));
        }

        #[test]
        fn retry_only_below_ceiling(attempts in 0i32..20, max_attempts in 1i32..20) {
            let delay = retry_delay(attempts, max_attempts);
            prop_assert_eq!(delay.is_some(), attempts < max_attempts);
        }
    }
}
