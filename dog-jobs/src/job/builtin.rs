use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::{Handler, Queueable};
use crate::JobError;

/// Logs its arguments; handy for smoke tests and demos
#[derive(Debug, Default, Clone, Copy)]
pub struct LogHandler;

#[async_trait]
impl Handler for LogHandler {
    async fn handle(&self, args: &Value, _credentials: Option<&Value>) -> Result<(), JobError> {
        info!(args = %args, "LogQueueable executed");
        Ok(())
    }
}

impl Queueable for LogHandler {
    const JOB_TYPE: &'static str = "LogQueueable";
}

/// Arguments accepted by [`SendEmail`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailMessage {
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// SMTP settings expected in the worker credentials
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpCredentials {
    pub smtp_server: String,
    pub smtp_user: String,
    pub smtp_password: String,
}

impl std::fmt::Debug for SmtpCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpCredentials")
            .field("smtp_server", &self.smtp_server)
            .field("smtp_user", &self.smtp_user)
            .field("smtp_password", &"***")
            .finish()
    }
}

/// Outgoing mail transport used by [`SendEmail`]
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, credentials: &SmtpCredentials, message: &EmailMessage) -> Result<(), JobError>;
}

/// Mailer that only logs what would have been sent
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, credentials: &SmtpCredentials, message: &EmailMessage) -> Result<(), JobError> {
        info!(
            smtp_server = %credentials.smtp_server,
            recipient = %message.recipient,
            subject = %message.subject,
            "Email handed to log mailer"
        );
        Ok(())
    }
}

/// Sends one email using the worker's SMTP credentials
#[derive(Clone)]
pub struct SendEmail {
    mailer: Arc<dyn Mailer>,
}

impl SendEmail {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }

    /// Registry factory that hands every constructed handler the same mailer
    pub fn factory(mailer: Arc<dyn Mailer>) -> impl Fn() -> Result<Box<dyn Handler>, JobError> + Send + Sync + 'static {
        move || Ok(Box::new(SendEmail::new(mailer.clone())) as Box<dyn Handler>)
    }
}

impl Default for SendEmail {
    fn default() -> Self {
        Self::new(Arc::new(LogMailer))
    }
}

#[async_trait]
impl Handler for SendEmail {
    async fn handle(&self, args: &Value, credentials: Option<&Value>) -> Result<(), JobError> {
        let message: EmailMessage = serde_json::from_value(args.clone())
            .map_err(|e| JobError::invalid_args(e.to_string()))?;

        let credentials = credentials
            .ok_or_else(|| JobError::MissingCredentials("SendEmail needs SMTP credentials".to_string()))?;
        let credentials: SmtpCredentials = serde_json::from_value(credentials.clone())
            .map_err(|e| JobError::MissingCredentials(e.to_string()))?;

        self.mailer.send(&credentials, &message).await
    }

    fn requires_credentials(&self) -> bool {
        true
    }
}

impl Queueable for SendEmail {
    const JOB_TYPE: &'static str = "SendEmail";
}
