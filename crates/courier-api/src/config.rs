//! Environment configuration

use courier_persist::PgConfig;
use courier_queue::WorkerConfig;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::server::ServerConfig;

/// Error types for configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
}

/// Read `key`, falling back to `default` when unset. A set but unparsable
/// value is an error rather than a silent default.
pub(crate) fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value,
        }),
        Err(_) => Ok(default),
    }
}

/// Outgoing mail settings
#[derive(Debug, Clone)]
pub struct MailConfig {
    /// SMTP relay host (env: SMTP_HOST)
    pub smtp_host: String,
    /// SMTP port, implicit TLS (env: SMTP_PORT)
    pub smtp_port: u16,
    /// SMTP username (env: EMAIL_USER)
    pub username: Option<String>,
    /// SMTP password (env: EMAIL_PASS)
    pub password: Option<String>,
    /// Sender mailbox (env: EMAIL_FROM, defaults to EMAIL_USER)
    pub from: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            smtp_host: "smtp.gmail.com".to_string(),
            smtp_port: 465,
            username: None,
            password: None,
            from: "\"Courier\" <no-reply@localhost>".to_string(),
        }
    }
}

impl MailConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let username = env::var("EMAIL_USER").ok().filter(|v| !v.is_empty());
        let password = env::var("EMAIL_PASS").ok().filter(|v| !v.is_empty());

        let from = env::var("EMAIL_FROM")
            .ok()
            .or_else(|| username.as_ref().map(|u| format!("\"Courier\" <{}>", u)))
            .unwrap_or(defaults.from);

        Ok(Self {
            smtp_host: env::var("SMTP_HOST").unwrap_or(defaults.smtp_host),
            smtp_port: env_or("SMTP_PORT", defaults.smtp_port)?,
            username,
            password,
            from,
        })
    }

    /// Both halves of the SMTP login, if configured
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => Some((user.as_str(), pass.as_str())),
            _ => None,
        }
    }
}

/// Full process configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: PgConfig,
    /// Queue name bound to the engine (env: COURIER_QUEUE)
    pub queue_name: String,
    pub worker: WorkerConfig,
    pub mail: MailConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let worker_defaults = WorkerConfig::default();

        let idle_ms: u64 = env_or(
            "COURIER_IDLE_INTERVAL_MS",
            worker_defaults.idle_interval.as_millis() as u64,
        )?;
        let staleness_mins: i64 = env_or(
            "COURIER_STALENESS_MINUTES",
            worker_defaults.staleness.num_minutes(),
        )?;
        // 0 disables the periodic sweep; the startup sweep always runs
        let sweep_secs: u64 = env_or(
            "COURIER_SWEEP_INTERVAL_SECS",
            worker_defaults.sweep_interval.map(|d| d.as_secs()).unwrap_or(0),
        )?;

        if staleness_mins <= 0 {
            return Err(ConfigError::Invalid {
                key: "COURIER_STALENESS_MINUTES".to_string(),
                value: staleness_mins.to_string(),
            });
        }

        Ok(Self {
            server: ServerConfig::from_env()?,
            database: PgConfig::from_env(),
            queue_name: env::var("COURIER_QUEUE").unwrap_or_else(|_| "email_queue".to_string()),
            worker: WorkerConfig {
                idle_interval: Duration::from_millis(idle_ms.max(1)),
                staleness: chrono::Duration::minutes(staleness_mins),
                sweep_interval: (sweep_secs > 0).then(|| Duration::from_secs(sweep_secs)),
            },
            mail: MailConfig::from_env()?,
        })
    }
}
