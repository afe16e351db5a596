//! Worker Loop: a single consumer that polls, executes and reports.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::engine::Queue;
use crate::error::{JobError, QueueError};
use crate::handler::JobHandler;
use crate::job::{Job, JobId};
use crate::recovery::{RecoverySweep, DEFAULT_STALENESS_MINUTES};

#[derive(Clone, Copy, Debug)]
pub struct WorkerConfig {
    /// Sleep between polls when the queue is empty
    pub idle_interval: Duration,
    /// Age after which a `processing` job is presumed abandoned
    pub staleness: chrono::Duration,
    /// Period of the background recovery sweep; `None` sweeps at startup only
    pub sweep_interval: Option<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_secs(2),
            staleness: chrono::Duration::minutes(DEFAULT_STALENESS_MINUTES),
            sweep_interval: Some(Duration::from_secs(60)),
        }
    }
}

/// Where the loop is in its current iteration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Claimed(JobId),
    Executing(JobId),
    Reporting(JobId),
    Stopped,
}

impl WorkerState {
    /// The job held between claim and report, if any
    pub fn in_flight(&self) -> Option<JobId> {
        match self {
            WorkerState::Claimed(id) | WorkerState::Executing(id) | WorkerState::Reporting(id) => {
                Some(*id)
            }
            WorkerState::Idle | WorkerState::Stopped => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::Claimed(_) => "claimed",
            WorkerState::Executing(_) => "executing",
            WorkerState::Reporting(_) => "reporting",
            WorkerState::Stopped => "stopped",
        }
    }
}

pub struct Worker {
    queue: Queue,
    handler: Arc<dyn JobHandler>,
    config: WorkerConfig,
    state: watch::Sender<WorkerState>,
}

impl Worker {
    pub fn new(queue: Queue, handler: Arc<dyn JobHandler>, config: WorkerConfig) -> Self {
        let (state, _) = watch::channel(WorkerState::Idle);
        Self {
            queue,
            handler,
            config,
            state,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Run the startup recovery sweep, then spawn the loop and, if configured,
    /// the periodic sweep. A store failure during the startup sweep aborts.
    pub async fn start(self, shutdown: CancellationToken) -> Result<WorkerHandle, QueueError> {
        let sweep = RecoverySweep::new(self.queue.clone(), self.config.staleness);
        sweep.run_once().await?;

        let mut tasks = Vec::with_capacity(2);
        if let Some(every) = self.config.sweep_interval {
            tasks.push(tokio::spawn(sweep.run(every, shutdown.clone())));
        }

        let state = self.subscribe();
        let token = shutdown.clone();
        tasks.push(tokio::spawn(async move { self.run(token).await }));

        Ok(WorkerHandle {
            shutdown,
            state,
            tasks,
        })
    }

    /// Loop until `shutdown` fires. An in-flight job is always carried through
    /// to its report before the flag is checked again.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(queue = %self.queue.name(), "Worker started");

        while !shutdown.is_cancelled() {
            match self.queue.poll().await {
                Ok(Some(job)) => self.process(job).await,
                Ok(None) => self.idle(&shutdown).await,
                Err(e) => {
                    error!(queue = %self.queue.name(), error = %e, "Poll failed");
                    self.idle(&shutdown).await;
                }
            }
        }

        self.state.send_replace(WorkerState::Stopped);
        info!(queue = %self.queue.name(), "Worker loop exited");
    }

    async fn idle(&self, shutdown: &CancellationToken) {
        tokio::select! {
            _ = shutdown.cancelled() => {}
            _ = tokio::time::sleep(self.config.idle_interval) => {}
            _ = self.queue.notified() => {}
        }
    }

    async fn process(&self, job: Job) {
        let id = job.id;
        self.state.send_replace(WorkerState::Claimed(id));
        info!(job_id = id, attempt = job.attempts, max_attempts = job.max_attempts, "Processing job");

        self.state.send_replace(WorkerState::Executing(id));
        let result = self.execute(&job).await;

        self.state.send_replace(WorkerState::Reporting(id));
        let reported = match result {
            Ok(()) => self.queue.complete(id).await.map(|()| {
                info!(job_id = id, "Job completed");
            }),
            Err(e) => {
                warn!(job_id = id, attempt = job.attempts, error = %e, "Job failed");
                self.queue.handle_failure(&job, &e.to_string()).await.map(|_| ())
            }
        };

        // The job stays `processing` until the recovery sweep picks it up
        if let Err(e) = reported {
            error!(job_id = id, error = %e, "Failed to record job outcome");
        }

        self.state.send_replace(WorkerState::Idle);
    }

    /// Run the handler on its own task so a panic is reported as a failure
    async fn execute(&self, job: &Job) -> Result<(), JobError> {
        let handler = self.handler.clone();
        let owned = job.clone();

        match tokio::spawn(async move { handler.handle(&owned).await }).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(JobError::Panicked(panic_message(e.into_panic()))),
            Err(e) => Err(JobError::Failed(e.to_string())),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Running worker plus its sweep
pub struct WorkerHandle {
    shutdown: CancellationToken,
    state: watch::Receiver<WorkerState>,
    tasks: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.clone()
    }

    /// Stop claiming, wait for any in-flight job to be reported, then return
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();

        if let Some(id) = self.state().in_flight() {
            info!(job_id = id, "Waiting for active job to finish");
            let _ = self.state.wait_for(|s| s.in_flight().is_none()).await;
        }

        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Worker task ended abnormally");
            }
        }
    }
}
