//! # Courier Queue
//!
//! Durable at-least-once job queue core.
//!
//! - `JobStore`: atomic claim/complete/fail/recover/aggregate primitives
//! - `Queue`: named façade binding a queue name to a store
//! - `Worker`: single-consumer poll loop with graceful shutdown
//! - `RecoverySweep`: reclaims jobs abandoned in `processing`

pub mod backend;
pub mod clock;
pub mod engine;
pub mod error;
pub mod handler;
pub mod job;
pub mod memory;
pub mod recovery;
pub mod worker;

pub use backend::{JobStore, RECOVERED_ERROR};
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::Queue;
pub use error::{JobError, QueueError};
pub use handler::JobHandler;
pub use job::{FailureOutcome, Job, JobId, JobStatus, QueueStats, StatsSnapshot, DEFAULT_MAX_ATTEMPTS};
pub use memory::MemoryQueue;
pub use recovery::RecoverySweep;
pub use worker::{Worker, WorkerConfig, WorkerHandle, WorkerState};
