//! Worker loop tests against the in-memory store

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use serde_json::json;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use courier_queue::{
    FailureOutcome, Job, JobError, JobHandler, JobId, JobStatus, JobStore, ManualClock,
    MemoryQueue, Queue, QueueError, QueueStats, Worker, WorkerConfig, WorkerState,
    RECOVERED_ERROR,
};

fn fast_config() -> WorkerConfig {
    WorkerConfig {
        idle_interval: Duration::from_millis(10),
        sweep_interval: None,
        ..Default::default()
    }
}

/// Poll `queue` until job `id` satisfies `check`, or panic after a few seconds
async fn wait_for_job<F>(queue: &Queue, id: JobId, check: F) -> Job
where
    F: Fn(&Job) -> bool,
{
    for _ in 0..500 {
        if let Some(job) = queue.get(id).await.unwrap() {
            if check(&job) {
                return job;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} never reached the expected state", id);
}

/// Counts executions and fails the first `fail_times`
struct CounterHandler {
    calls: Arc<AtomicU32>,
    fail_times: u32,
}

#[async_trait]
impl JobHandler for CounterHandler {
    async fn handle(&self, _job: &Job) -> Result<(), JobError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_times {
            Err(JobError::failed(format!("attempt {} failed", n + 1)))
        } else {
            Ok(())
        }
    }
}

struct PanicHandler;

#[async_trait]
impl JobHandler for PanicHandler {
    async fn handle(&self, _job: &Job) -> Result<(), JobError> {
        panic!("mailbox exploded");
    }
}

/// Signals when it starts, then takes a while to finish
struct SlowHandler {
    started: Arc<Notify>,
    delay: Duration,
}

#[async_trait]
impl JobHandler for SlowHandler {
    async fn handle(&self, _job: &Job) -> Result<(), JobError> {
        self.started.notify_one();
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

#[tokio::test]
async fn test_worker_completes_job() {
    let queue = Queue::new("email_queue", Arc::new(MemoryQueue::new()));
    let calls = Arc::new(AtomicU32::new(0));
    let handler = Arc::new(CounterHandler {
        calls: calls.clone(),
        fail_times: 0,
    });

    let handle = Worker::new(queue.clone(), handler, fast_config())
        .start(CancellationToken::new())
        .await
        .unwrap();

    let id = queue.add(json!({"email": "a@example.com"}), ChronoDuration::zero()).await.unwrap();
    let job = wait_for_job(&queue, id, |j| j.status == JobStatus::Completed).await;

    assert_eq!(job.attempts, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_worker_retries_until_permanent_failure() {
    let clock = ManualClock::default();
    let store = Arc::new(MemoryQueue::with_clock(Arc::new(clock.clone())));
    let queue = Queue::new("email_queue", store);
    let handler = Arc::new(CounterHandler {
        calls: Arc::new(AtomicU32::new(0)),
        fail_times: u32::MAX,
    });

    let id = queue.add(json!({}), ChronoDuration::zero()).await.unwrap();
    let handle = Worker::new(queue.clone(), handler, fast_config())
        .start(CancellationToken::new())
        .await
        .unwrap();

    let job = wait_for_job(&queue, id, |j| j.attempts == 1 && j.status == JobStatus::Pending).await;
    assert_eq!(job.last_error.as_deref(), Some("attempt 1 failed"));

    clock.advance(ChronoDuration::seconds(2));
    let job = wait_for_job(&queue, id, |j| j.attempts == 2 && j.status == JobStatus::Pending).await;
    let second_run_at = job.run_at;

    clock.advance(ChronoDuration::seconds(4));
    let job = wait_for_job(&queue, id, |j| j.status == JobStatus::Failed).await;

    assert_eq!(job.attempts, 3);
    assert_eq!(job.run_at, second_run_at);
    assert_eq!(job.last_error.as_deref(), Some("attempt 3 failed"));
    assert_eq!(queue.stats().await.unwrap().stats.failed, 1);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_handler_panic_is_recorded_as_failure() {
    let queue = Queue::new("q", Arc::new(MemoryQueue::new()));
    let id = queue.add(json!({}), ChronoDuration::zero()).await.unwrap();

    let handle = Worker::new(queue.clone(), Arc::new(PanicHandler), fast_config())
        .start(CancellationToken::new())
        .await
        .unwrap();

    let job = wait_for_job(&queue, id, |j| j.last_error.is_some()).await;
    assert_eq!(job.status, JobStatus::Pending);
    assert!(job.last_error.unwrap().contains("mailbox exploded"));

    handle.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_job() {
    let queue = Queue::new("q", Arc::new(MemoryQueue::new()));
    let started = Arc::new(Notify::new());
    let handler = Arc::new(SlowHandler {
        started: started.clone(),
        delay: Duration::from_millis(200),
    });

    let id = queue.add(json!({}), ChronoDuration::zero()).await.unwrap();
    let handle = Worker::new(queue.clone(), handler, fast_config())
        .start(CancellationToken::new())
        .await
        .unwrap();

    started.notified().await;
    assert_eq!(handle.state(), WorkerState::Executing(id));

    let states = handle.subscribe();
    handle.shutdown().await;

    assert_eq!(queue.get(id).await.unwrap().unwrap().status, JobStatus::Completed);
    assert_eq!(*states.borrow(), WorkerState::Stopped);
}

#[tokio::test]
async fn test_no_claims_after_shutdown() {
    let queue = Queue::new("q", Arc::new(MemoryQueue::new()));
    let handler = Arc::new(CounterHandler {
        calls: Arc::new(AtomicU32::new(0)),
        fail_times: 0,
    });

    let handle = Worker::new(queue.clone(), handler, fast_config())
        .start(CancellationToken::new())
        .await
        .unwrap();
    handle.shutdown().await;

    let id = queue.add(json!({}), ChronoDuration::zero()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(queue.get(id).await.unwrap().unwrap().status, JobStatus::Pending);
}

#[tokio::test]
async fn test_startup_sweep_recovers_zombie() {
    let clock = ManualClock::default();
    let queue = Queue::new("q", Arc::new(MemoryQueue::with_clock(Arc::new(clock.clone()))));

    // A previous process claimed the job and died
    let id = queue.add(json!({}), ChronoDuration::zero()).await.unwrap();
    queue.poll().await.unwrap().unwrap();
    clock.advance(ChronoDuration::minutes(6));

    let handler = Arc::new(CounterHandler {
        calls: Arc::new(AtomicU32::new(0)),
        fail_times: 0,
    });
    let handle = Worker::new(queue.clone(), handler, fast_config())
        .start(CancellationToken::new())
        .await
        .unwrap();

    let job = wait_for_job(&queue, id, |j| j.status == JobStatus::Completed).await;
    // claim, recovery, claim
    assert_eq!(job.attempts, 3);
    assert_eq!(job.last_error.as_deref(), Some(RECOVERED_ERROR));

    handle.shutdown().await;
}

/// Fails the first `outages` claims as if the database were down
#[derive(Debug)]
struct FlakyStore {
    inner: MemoryQueue,
    outages: AtomicU32,
}

#[async_trait]
impl JobStore for FlakyStore {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn is_healthy(&self) -> bool {
        self.outages.load(Ordering::SeqCst) == 0
    }

    async fn enqueue(
        &self,
        queue_name: &str,
        payload: serde_json::Value,
        delay: ChronoDuration,
    ) -> Result<JobId, QueueError> {
        self.inner.enqueue(queue_name, payload, delay).await
    }

    async fn claim(&self, queue_name: &str) -> Result<Option<Job>, QueueError> {
        let remaining = self.outages.load(Ordering::SeqCst);
        if remaining > 0 {
            self.outages.store(remaining - 1, Ordering::SeqCst);
            return Err(QueueError::StoreUnavailable("connection refused".to_string()));
        }
        self.inner.claim(queue_name).await
    }

    async fn mark_complete(&self, id: JobId) -> Result<bool, QueueError> {
        self.inner.mark_complete(id).await
    }

    async fn mark_failure_or_retry(
        &self,
        id: JobId,
        attempts: i32,
        max_attempts: i32,
        error_message: &str,
    ) -> Result<FailureOutcome, QueueError> {
        self.inner
            .mark_failure_or_retry(id, attempts, max_attempts, error_message)
            .await
    }

    async fn recover_stale(
        &self,
        queue_name: &str,
        staleness: ChronoDuration,
    ) -> Result<u64, QueueError> {
        self.inner.recover_stale(queue_name, staleness).await
    }

    async fn aggregate_stats(&self, queue_name: &str) -> Result<QueueStats, QueueError> {
        self.inner.aggregate_stats(queue_name).await
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, QueueError> {
        self.inner.get(id).await
    }
}

#[tokio::test]
async fn test_worker_survives_store_outage() {
    let store = Arc::new(FlakyStore {
        inner: MemoryQueue::new(),
        outages: AtomicU32::new(3),
    });
    let queue = Queue::new("q", store);
    let id = queue.add(json!({}), ChronoDuration::zero()).await.unwrap();

    let handler = Arc::new(CounterHandler {
        calls: Arc::new(AtomicU32::new(0)),
        fail_times: 0,
    });
    let handle = Worker::new(queue.clone(), handler, fast_config())
        .start(CancellationToken::new())
        .await
        .unwrap();

    let job = wait_for_job(&queue, id, |j| j.status == JobStatus::Completed).await;
    assert_eq!(job.attempts, 1);

    handle.shutdown().await;
}
