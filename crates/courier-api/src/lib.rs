//! # Courier API
//!
//! HTTP façade over the Courier queue plus the process wiring that runs the
//! email worker next to it.
//!
//! - `POST /jobs` enqueues an email
//! - `GET /stats` reports per-status counts
//! - `GET /jobs/{id}` inspects one job
//! - `GET /health` checks the store and the worker

pub mod config;
pub mod error;
pub mod jobs;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use config::{AppConfig, ConfigError, MailConfig};
pub use error::{ApiError, ApiResult};
pub use server::{CourierServer, ServerConfig};
pub use state::AppState;
