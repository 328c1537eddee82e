use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{error, info, warn};

use super::EmailSender;
use crate::config::SmtpConfig;
use crate::error::{Result, StatusError};

/// Port that speaks TLS from the first byte; anything else upgrades with STARTTLS.
const IMPLICIT_TLS_PORT: u16 = 465;

pub struct SmtpEmailSender {
    config: SmtpConfig,
}

struct Ready<'a> {
    host: &'a str,
    user: &'a str,
    password: &'a str,
}

impl SmtpEmailSender {
    pub fn new(config: SmtpConfig) -> Self {
        Self { config }
    }

    fn ready(&self) -> Option<Ready<'_>> {
        if self.config.to.is_empty() {
            return None;
        }
        Some(Ready {
            host: self.config.host.as_deref()?,
            user: self.config.user.as_deref()?,
            password: self.config.password.as_deref()?,
        })
    }

    pub fn build_message(&self, subject: &str, html_body: &str) -> Result<Message> {
        let from_addr: lettre::Address = self
            .config
            .from
            .as_deref()
            .unwrap_or("noreply@example.com")
            .parse()
            .map_err(|e| StatusError::Mail(format!("invalid sender address: {e}")))?;
        let mut builder = Message::builder()
            .from(Mailbox::new(Some(self.config.sender_name.clone()), from_addr))
            .subject(subject)
            .header(ContentType::TEXT_HTML);

        for recipient in &self.config.to {
            let mailbox: Mailbox = recipient
                .parse()
                .map_err(|e| StatusError::Mail(format!("invalid recipient {recipient}: {e}")))?;
            builder = builder.to(mailbox);
        }

        builder
            .body(html_body.to_string())
            .map_err(|e| StatusError::Mail(e.to_string()))
    }

    async fn deliver(&self, ready: Ready<'_>, message: Message) -> Result<()> {
        let builder = if self.config.port == IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(ready.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(ready.host)
        }
        .map_err(|e| StatusError::Mail(e.to_string()))?;

        let transport = builder
            .port(self.config.port)
            .credentials(Credentials::new(
                ready.user.to_string(),
                ready.password.to_string(),
            ))
            .timeout(Some(self.config.timeout))
            .build();

        transport
            .send(message)
            .await
            .map_err(|e| StatusError::Mail(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send_email(&self, subject: &str, html_body: &str) -> bool {
        let Some(ready) = self.ready() else {
            warn!("SMTP not fully configured, skipping email");
            return false;
        };

        let message = match self.build_message(subject, html_body) {
            Ok(message) => message,
            Err(e) => {
                error!(error = %e, "cannot compose summary email");
                return false;
            }
        };

        match self.deliver(ready, message).await {
            Ok(()) => {
                info!(%subject, recipients = self.config.to.len(), "summary email sent");
                true
            }
            Err(e) => {
                error!(error = %e, %subject, "summary email delivery failed");
                false
            }
        }
    }
}
