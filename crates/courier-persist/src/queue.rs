//! PostgreSQL job store
//!
//! Each operation is a single statement. Claim uses `FOR UPDATE SKIP LOCKED`
//! so concurrent pollers skip rows another transaction already holds instead
//! of blocking on them or selecting them twice.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use courier_queue::job::retry_delay;
use courier_queue::{
    FailureOutcome, Job, JobId, JobStatus, JobStore, QueueError, QueueStats,
    DEFAULT_MAX_ATTEMPTS, RECOVERED_ERROR,
};
use sqlx::postgres::PgPool;
use sqlx::Row;
use tracing::debug;

const JOB_COLUMNS: &str =
    "id, queue_name, payload, status, run_at, attempts, max_attempts, last_error, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: i64,
    queue_name: String,
    payload: serde_json::Value,
    status: String,
    run_at: DateTime<Utc>,
    attempts: i32,
    max_attempts: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = QueueError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            id: row.id,
            queue_name: row.queue_name,
            payload: row.payload,
            status: row.status.parse()?,
            run_at: row.run_at,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn unavailable(e: sqlx::Error) -> QueueError {
    QueueError::StoreUnavailable(e.to_string())
}

fn seconds(d: Duration) -> f64 {
    d.num_milliseconds() as f64 / 1000.0
}

/// Durable job store on PostgreSQL
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
    max_attempts: i32,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Override the attempt ceiling given to newly enqueued jobs
    pub fn max_attempts(mut self, max_attempts: i32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    async fn enqueue(
        &self,
        queue_name: &str,
        payload: serde_json::Value,
        delay: Duration,
    ) -> Result<JobId, QueueError> {
        let row = sqlx::query(
            r#"
            INSERT INTO jobs (queue_name, payload, run_at, max_attempts)
            VALUES ($1, $2, NOW() + make_interval(secs => $3), $4)
            RETURNING id
            "#,
        )
        .bind(queue_name)
        .bind(payload)
        .bind(seconds(delay))
        .bind(self.max_attempts)
        .fetch_one(&self.pool)
        .await
        .map_err(unavailable)?;

        row.try_get("id").map_err(unavailable)
    }

    async fn claim(&self, queue_name: &str) -> Result<Option<Job>, QueueError> {
        let sql = format!(
            r#"
            UPDATE jobs
            SET status = 'processing',
                attempts = attempts + 1,
                updated_at = NOW()
            WHERE id = (
                SELECT id FROM jobs
                WHERE queue_name = $1
                  AND status = 'pending'
                  AND run_at <= NOW()
                ORDER BY run_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {}
            "#,
            JOB_COLUMNS
        );

        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(queue_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;

        row.map(Job::try_from).transpose()
    }

    async fn mark_complete(&self, id: JobId) -> Result<bool, QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed', updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_failure_or_retry(
        &self,
        id: JobId,
        attempts: i32,
        max_attempts: i32,
        error_message: &str,
    ) -> Result<FailureOutcome, QueueError> {
        let delay = retry_delay(attempts, max_attempts);
        let status = if delay.is_some() {
            JobStatus::Pending
        } else {
            JobStatus::Failed
        };

        // run_at is only moved when retrying; a permanent failure keeps the
        // last schedule
        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2,
                run_at = CASE
                    WHEN $3::float8 IS NULL THEN run_at
                    ELSE NOW() + make_interval(secs => $3::float8)
                END,
                last_error = $4,
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            RETURNING status, run_at
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(delay.map(seconds))
        .bind(error_message)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?
        .ok_or(QueueError::NotClaimed(id))?;

        let status: String = row.try_get("status").map_err(unavailable)?;
        let run_at: DateTime<Utc> = row.try_get("run_at").map_err(unavailable)?;

        Ok(FailureOutcome {
            status: status.parse()?,
            run_at,
        })
    }

    async fn recover_stale(
        &self,
        queue_name: &str,
        staleness: Duration,
    ) -> Result<u64, QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending',
                attempts = attempts + 1,
                last_error = $3,
                updated_at = NOW()
            WHERE queue_name = $1
              AND status = 'processing'
              AND updated_at < NOW() - make_interval(secs => $2)
            "#,
        )
        .bind(queue_name)
        .bind(seconds(staleness))
        .bind(RECOVERED_ERROR)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        debug!(queue = queue_name, reclaimed = result.rows_affected(), "Stale job sweep");
        Ok(result.rows_affected())
    }

    async fn aggregate_stats(&self, queue_name: &str) -> Result<QueueStats, QueueError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM jobs WHERE queue_name = $1 GROUP BY status",
        )
        .bind(queue_name)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        let mut stats = QueueStats::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(unavailable)?;
            let count: i64 = row.try_get("count").map_err(unavailable)?;
            stats.set(status.parse()?, count.max(0) as u64);
        }

        Ok(stats)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, QueueError> {
        let sql = format!("SELECT {} FROM jobs WHERE id = $1", JOB_COLUMNS);
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;

        row.map(Job::try_from).transpose()
    }
}
