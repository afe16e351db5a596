//! Application State

use courier_queue::{Queue, WorkerState};
use tokio::sync::watch;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    queue: Queue,
    worker: Option<watch::Receiver<WorkerState>>,
}

impl AppState {
    pub fn new(queue: Queue) -> Self {
        Self { queue, worker: None }
    }

    /// Expose the worker's state on the health route
    pub fn with_worker_state(mut self, worker: watch::Receiver<WorkerState>) -> Self {
        self.worker = Some(worker);
        self
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    /// `None` when no worker runs in this process
    pub fn worker_state(&self) -> Option<WorkerState> {
        self.worker.as_ref().map(|rx| *rx.borrow())
    }
}
