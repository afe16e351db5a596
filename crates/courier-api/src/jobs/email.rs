use async_trait::async_trait;
use courier_queue::{Job, JobError, JobHandler};
use lettre::message::{header::ContentType, Mailbox, Message};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::config::MailConfig;

/// Payload of an email job. Read only by [`EmailJob`]; the queue never looks inside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailPayload {
    pub email: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Invalid address '{0}'")]
    Address(String),
    #[error("Message build failed: {0}")]
    Build(String),
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Mail transport
#[async_trait]
pub trait Mailer: Send + Sync {
    fn name(&self) -> &str;

    async fn send(&self, from: &str, message: &EmailPayload) -> Result<(), MailError>;
}

/// SMTP relay over implicit TLS
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    /// `None` when no credentials are configured
    pub fn from_config(config: &MailConfig) -> Result<Option<Self>, MailError> {
        let Some((user, pass)) = config.credentials() else {
            return Ok(None);
        };

        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
            .map_err(|e| MailError::Transport(e.to_string()))?
            .port(config.smtp_port)
            .credentials(Credentials::new(user.to_string(), pass.to_string()))
            .build();

        Ok(Some(Self { transport }))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    fn name(&self) -> &str {
        "smtp"
    }

    async fn send(&self, from: &str, message: &EmailPayload) -> Result<(), MailError> {
        let from: Mailbox = from
            .parse()
            .map_err(|_| MailError::Address(from.to_string()))?;
        let to: Mailbox = message
            .email
            .parse()
            .map_err(|_| MailError::Address(message.email.clone()))?;

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(message.subject.as_str())
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())
            .map_err(|e| MailError::Build(e.to_string()))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| MailError::Transport(e.to_string()))?;

        Ok(())
    }
}

/// Logs instead of sending; used when SMTP is not configured
#[derive(Debug, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, from: &str, message: &EmailPayload) -> Result<(), MailError> {
        info!(
            from = %from,
            to = %message.email,
            subject = %message.subject,
            "Email delivery skipped (no SMTP credentials)"
        );
        Ok(())
    }
}

/// Sends the email described by a job's payload
pub struct EmailJob {
    mailer: Arc<dyn Mailer>,
    from: String,
}

impl EmailJob {
    pub fn new(mailer: Arc<dyn Mailer>, from: impl Into<String>) -> Self {
        Self {
            mailer,
            from: from.into(),
        }
    }
}

#[async_trait]
impl JobHandler for EmailJob {
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        let payload: EmailPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| JobError::failed(format!("invalid email payload: {}", e)))?;

        self.mailer
            .send(&self.from, &payload)
            .await
            .map_err(|e| JobError::failed(e.to_string()))?;

        info!(job_id = job.id, to = %payload.email, mailer = self.mailer.name(), "Email sent");
        Ok(())
    }
}
