//! Delivery backend implementations.
//!
//! This module contains the `EmailProvider` trait and implementations
//! for different transactional-email services.

mod mock;
mod sendgrid;
mod smtp;

pub use mock::MockProvider;
pub use sendgrid::{SendGridConfig, SendGridProvider};
pub use smtp::{SmtpConfig, SmtpProvider};

use crate::error::NotificationResult;
use crate::models::EmailCategory;
use async_trait::async_trait;
use uuid::Uuid;

/// Result of one delivery attempt.
///
/// Ordinary delivery failures (bounce, rejection, unreachable relay) are
/// reported through `accepted == false`, never as an `Err`; the error
/// channel is reserved for invariant violations such as broken provider
/// configuration. The queue treats both the same way, as record-level
/// failures.
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    /// Whether the email was accepted for delivery.
    pub accepted: bool,
    /// Provider-specific message ID for tracking, when available.
    pub message_id: Option<String>,
    /// Failure reason when the email was not accepted.
    pub error: Option<String>,
}

impl DeliveryOutcome {
    /// A successful delivery.
    pub fn accepted(message_id: Option<String>) -> Self {
        Self {
            accepted: true,
            message_id,
            error: None,
        }
    }

    /// A delivery the provider rejected.
    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            accepted: false,
            message_id: None,
            error: Some(error.into()),
        }
    }
}

/// Email content ready for sending.
#[derive(Debug, Clone)]
pub struct EmailContent {
    /// Recipient email address.
    pub to_email: String,
    /// Recipient display name.
    pub to_name: String,
    /// Email subject.
    pub subject: String,
    /// HTML body content.
    pub html_body: String,
    /// Plain text body content.
    pub text_body: String,
    /// Notification purpose, passed through for provider-side tagging.
    pub category: EmailCategory,
    /// Recipient user reference.
    pub recipient_user_id: Uuid,
}

/// Trait for transactional-email delivery backends.
#[async_trait]
pub trait EmailProvider: Send + Sync {
    /// Attempt delivery of one email.
    async fn send(&self, email: &EmailContent) -> NotificationResult<DeliveryOutcome>;

    /// Provider name for logging.
    fn name(&self) -> &'static str;

    /// Check if the provider is healthy/configured.
    async fn health_check(&self) -> NotificationResult<bool>;
}
