//! Job handlers run by the worker

pub mod email;

pub use email::{EmailJob, EmailPayload, LogMailer, MailError, Mailer, SmtpMailer};
