//! SMTP delivery backend using lettre.
//!
//! Intended for local development against MailHog/Mailpit and for
//! deployments with a plain SMTP relay.

use super::{DeliveryOutcome, EmailContent, EmailProvider};
use crate::error::{NotificationError, NotificationResult};
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, MultiPart, SinglePart, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// SMTP configuration.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    /// SMTP server host.
    pub host: String,
    /// SMTP server port.
    pub port: u16,
    /// Sender email address.
    pub from_email: String,
    /// Sender name.
    pub from_name: String,
    /// SMTP username (optional for dev servers like Mailpit).
    pub username: Option<String>,
    /// SMTP password (optional for dev servers like Mailpit).
    pub password: Option<String>,
    /// Whether to use TLS (false for local dev servers).
    pub use_tls: bool,
}

impl SmtpConfig {
    /// Create a new SMTP configuration.
    pub fn new(host: String, port: u16, from_email: String, from_name: String) -> Self {
        Self {
            host,
            port,
            from_email,
            from_name,
            username: None,
            password: None,
            use_tls: false,
        }
    }

    /// Create configuration from environment variables, defaulting to a
    /// local MailHog/Mailpit setup.
    pub fn from_env() -> Self {
        Self {
            host: std::env::var("SMTP_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("SMTP_PORT")
                .unwrap_or_else(|_| "1025".to_string())
                .parse()
                .unwrap_or(1025),
            from_email: std::env::var("SMTP_FROM_EMAIL")
                .unwrap_or_else(|_| "noreply@localhost".to_string()),
            from_name: std::env::var("SMTP_FROM_NAME")
                .unwrap_or_else(|_| "Atrium".to_string()),
            username: std::env::var("SMTP_USERNAME").ok(),
            password: std::env::var("SMTP_PASSWORD").ok(),
            use_tls: std::env::var("SMTP_USE_TLS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }

    /// Builder method to set TLS.
    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    /// Builder method to set credentials.
    pub fn with_credentials(mut self, username: String, password: String) -> Self {
        self.username = Some(username);
        self.password = Some(password);
        self
    }
}

/// SMTP delivery backend.
pub struct SmtpProvider {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    config: Arc<SmtpConfig>,
}

impl SmtpProvider {
    /// Create a new SMTP provider.
    pub fn new(config: SmtpConfig) -> NotificationResult<Self> {
        let transport = Self::build_transport(&config)?;
        Ok(Self {
            transport,
            config: Arc::new(config),
        })
    }

    /// Create a provider from environment variables.
    pub fn from_env() -> NotificationResult<Self> {
        Self::new(SmtpConfig::from_env())
    }

    /// Build the SMTP transport based on configuration.
    fn build_transport(
        config: &SmtpConfig,
    ) -> NotificationResult<AsyncSmtpTransport<Tokio1Executor>> {
        let mut builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| {
                    NotificationError::Config(format!("Failed to create SMTP relay: {}", e))
                })?
                .port(config.port)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
                .port(config.port)
        };

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(builder.build())
    }

    /// Build a lettre Message from the email content.
    ///
    /// A malformed recipient address is an ordinary delivery failure and is
    /// reported through the outcome, not as an error.
    fn build_message(&self, email: &EmailContent) -> NotificationResult<Result<Message, String>> {
        let from: Mailbox = format!("{} <{}>", self.config.from_name, self.config.from_email)
            .parse()
            .map_err(|e| {
                NotificationError::Config(format!("Invalid sender address: {}", e))
            })?;

        let to: Result<Mailbox, _> = if email.to_name.is_empty() {
            email.to_email.parse()
        } else {
            format!("{} <{}>", email.to_name, email.to_email).parse()
        };
        let to = match to {
            Ok(mailbox) => mailbox,
            Err(e) => return Ok(Err(format!("Invalid recipient address: {}", e))),
        };

        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(&email.subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(email.text_body.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(email.html_body.clone()),
                    ),
            )
            .map_err(|e| {
                NotificationError::Provider(format!("Failed to build email message: {}", e))
            })?;

        Ok(Ok(message))
    }
}

#[async_trait]
impl EmailProvider for SmtpProvider {
    async fn send(&self, email: &EmailContent) -> NotificationResult<DeliveryOutcome> {
        debug!(
            to = %email.to_email,
            subject = %email.subject,
            category = %email.category,
            host = %self.config.host,
            port = %self.config.port,
            "Sending email via SMTP"
        );

        let message = match self.build_message(email)? {
            Ok(message) => message,
            Err(reason) => {
                warn!(to = %email.to_email, reason = %reason, "Rejected malformed recipient");
                return Ok(DeliveryOutcome::rejected(reason));
            }
        };

        match self.transport.send(message).await {
            Ok(response) => {
                let message_id = response.message().next().map(|s| s.to_string());
                info!(
                    to = %email.to_email,
                    message_id = ?message_id,
                    "Email sent via SMTP"
                );
                Ok(DeliveryOutcome::accepted(message_id))
            }
            Err(e) => {
                warn!(to = %email.to_email, error = %e, "SMTP delivery failed");
                Ok(DeliveryOutcome::rejected(format!("SMTP send failed: {}", e)))
            }
        }
    }

    fn name(&self) -> &'static str {
        "smtp"
    }

    async fn health_check(&self) -> NotificationResult<bool> {
        self.transport.test_connection().await.map_err(|e| {
            NotificationError::Provider(format!("SMTP health check failed: {}", e))
        })
    }
}

// AsyncSmtpTransport does not implement Clone; rebuild it from config.
impl Clone for SmtpProvider {
    fn clone(&self) -> Self {
        let transport = Self::build_transport(&self.config)
            .unwrap_or_else(|_| {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&self.config.host)
                    .port(self.config.port)
                    .build()
            });
        Self {
            transport,
            config: Arc::clone(&self.config),
        }
    }
}
