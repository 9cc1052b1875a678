//! Outgoing email
//!
//! Reminders go through the [`Mailer`] trait so the SMTP transport can be
//! swapped for [`LogMailer`] when email is disabled.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
#[cfg(test)]
use mockall::automock;
use tracing::info;

use crate::config::EmailConfig;
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: EmailMessage) -> Result<(), AppError>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &EmailConfig) -> Result<Self, AppError> {
        let from: Mailbox = config
            .from_address
            .parse()
            .map_err(|e| AppError::ConfigError(format!("Invalid email.from_address: {}", e)))?;

        let mut builder = if config.smtp_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
                .map_err(|e| AppError::ConfigError(format!("Invalid SMTP relay: {}", e)))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.smtp_host)
        };
        builder = builder.port(config.smtp_port);

        if let (Some(username), Some(password)) = (&config.smtp_username, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, message: EmailMessage) -> Result<(), AppError> {
        let to: Mailbox = message
            .to
            .parse()
            .map_err(|e| AppError::EmailError(format!("Invalid recipient {}: {}", message.to, e)))?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(message.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(message.body)
            .map_err(|e| AppError::EmailError(e.to_string()))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| AppError::EmailError(e.to_string()))?;

        Ok(())
    }
}

/// Writes messages to the log instead of sending them.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: EmailMessage) -> Result<(), AppError> {
        info!(
            to = %message.to,
            subject = %message.subject,
            "Email delivery disabled, message logged:\n{}",
            message.body
        );
        Ok(())
    }
}

pub fn mailer_from_config(config: &EmailConfig) -> Result<Arc<dyn Mailer>, AppError> {
    if config.enabled {
        info!("SMTP mailer configured for {}:{}", config.smtp_host, config.smtp_port);
        Ok(Arc::new(SmtpMailer::new(config)?))
    } else {
        Ok(Arc::new(LogMailer))
    }
}
