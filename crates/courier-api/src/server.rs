//! Courier server with graceful shutdown

use axum::{middleware, Router};
use courier_persist::{PgJobStore, PostgresBackend};
use courier_queue::{Queue, Worker, WorkerHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use crate::config::{env_or, AppConfig, ConfigError};
use crate::error::ApiError;
use crate::jobs::{EmailJob, LogMailer, Mailer, SmtpMailer};
use crate::middleware::{body_limit_layer, request_id_middleware, timeout_layer, tracing_middleware};
use crate::routes::api_router;
use crate::state::AppState;

/// HTTP listener configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server address
    pub addr: SocketAddr,
    /// Request timeout
    pub timeout: Duration,
    /// Max request body size (bytes)
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            timeout: Duration::from_secs(30),
            max_body_size: 64 * 1024, // 64KB
        }
    }
}

impl ServerConfig {
    /// Create from `COURIER_PORT` (or `PORT`) and `COURIER_TIMEOUT_SECS`
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let port_key = if std::env::var("COURIER_PORT").is_ok() {
            "COURIER_PORT"
        } else {
            "PORT"
        };
        let port: u16 = env_or(port_key, defaults.addr.port())?;
        let timeout_secs: u64 = env_or("COURIER_TIMEOUT_SECS", defaults.timeout.as_secs())?;

        Ok(Self {
            addr: SocketAddr::from(([0, 0, 0, 0], port)),
            timeout: Duration::from_secs(timeout_secs),
            ..defaults
        })
    }
}

/// Apply middleware to the API routes
pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    api_router(state)
        .layer(body_limit_layer(config.max_body_size))
        .layer(timeout_layer(config.timeout))
        .layer(middleware::from_fn(tracing_middleware))
        // Outermost, so the id exists before tracing reads it
        .layer(middleware::from_fn(request_id_middleware))
}

/// HTTP façade plus the email worker, sharing one connection pool
pub struct CourierServer {
    config: AppConfig,
    backend: PostgresBackend,
    state: AppState,
    worker: Worker,
}

impl CourierServer {
    /// Connect to the store and wire the queue, worker and routes
    pub async fn new(config: AppConfig) -> Result<Self, ApiError> {
        let backend = PostgresBackend::new_with_config(&config.database)
            .await
            .map_err(|e| ApiError::Internal(format!("DB init failed: {}", e)))?;

        let store = PgJobStore::new(backend.pool().clone());
        let queue = Queue::new(&config.queue_name, Arc::new(store));

        let mailer: Arc<dyn Mailer> = match SmtpMailer::from_config(&config.mail)
            .map_err(|e| ApiError::Internal(format!("Mailer init failed: {}", e)))?
        {
            Some(smtp) => {
                tracing::info!(host = %config.mail.smtp_host, "Using SMTP mailer");
                Arc::new(smtp)
            }
            None => {
                tracing::warn!("EMAIL_USER/EMAIL_PASS not set. Emails will only be logged.");
                Arc::new(LogMailer)
            }
        };

        let handler = Arc::new(EmailJob::new(mailer, config.mail.from.clone()));
        let worker = Worker::new(queue.clone(), handler, config.worker);
        let state = AppState::new(queue).with_worker_state(worker.subscribe());

        Ok(Self {
            config,
            backend,
            state,
            worker,
        })
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone(), &self.config.server)
    }

    /// Run until SIGINT/SIGTERM.
    ///
    /// The recovery sweep runs before the worker polls; a store failure there
    /// aborts startup. On shutdown no new job is claimed, an in-flight job is
    /// reported before the pool closes.
    pub async fn run(self) -> Result<(), ApiError> {
        let app = self.router();
        let addr = self.config.server.addr;
        let shutdown = CancellationToken::new();

        let (listener, worker) = match start_services(addr, self.worker, shutdown.clone()).await {
            Ok(started) => started,
            Err(e) => {
                self.backend.close().await;
                return Err(e);
            }
        };
        tracing::info!(queue = %self.state.queue().name(), "Courier listening on http://{}", addr);

        let token = shutdown.clone();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                token.cancel();
            })
            .await;

        // Cancel in case the listener failed on its own
        shutdown.cancel();
        worker.shutdown().await;
        tracing::info!("HTTP server closed");

        self.backend.close().await;
        served.map_err(|e| ApiError::Internal(format!("Server error: {}", e)))?;

        tracing::info!("Shutdown complete");
        Ok(())
    }
}

/// Bind the listener, then start the worker. A taken port fails before the
/// worker can claim anything.
async fn start_services(
    addr: SocketAddr,
    worker: Worker,
    shutdown: CancellationToken,
) -> Result<(TcpListener, WorkerHandle), ApiError> {
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        tracing::error!(%addr, error = %e, "Failed to bind listener");
        ApiError::from(e)
    })?;

    let worker = worker
        .start(shutdown)
        .await
        .map_err(|e| ApiError::Internal(format!("Startup recovery failed: {}", e)))?;

    Ok((listener, worker))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Initialize tracing subscriber
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,courier_api=debug,courier_queue=debug,tower_http=debug")
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}
