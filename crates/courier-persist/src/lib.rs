//! # Courier Persistence
//!
//! PostgreSQL-backed [`JobStore`](courier_queue::JobStore).
//!
//! The claim primitive relies on `FOR UPDATE SKIP LOCKED`, so any number of
//! workers may poll the same queue name concurrently.

pub mod postgres;
pub mod queue;

pub use postgres::{PgConfig, PostgresBackend, MIGRATOR};
pub use queue::PgJobStore;
