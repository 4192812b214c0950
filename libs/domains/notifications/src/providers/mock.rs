//! Mock delivery backend for testing.

use super::{DeliveryOutcome, EmailContent, EmailProvider};
use crate::error::{NotificationError, NotificationResult};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Mock provider that captures sent emails.
///
/// Can be configured to reject every delivery (`rejecting`), to fail with
/// a provider error (`erroring`), or to delay each send (`with_delay`) to
/// exercise timeout and concurrency behavior.
#[derive(Default)]
pub struct MockProvider {
    sent: Arc<Mutex<Vec<EmailContent>>>,
    rejection: Option<String>,
    error: Option<String>,
    delay: Option<Duration>,
}

impl MockProvider {
    /// Create a mock provider that accepts every delivery.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a mock provider that rejects every delivery.
    pub fn rejecting(message: impl Into<String>) -> Self {
        Self {
            rejection: Some(message.into()),
            ..Self::default()
        }
    }

    /// Create a mock provider that fails with a provider error.
    pub fn erroring(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    /// Delay each send by the given duration.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// All captured emails.
    pub async fn sent_emails(&self) -> Vec<EmailContent> {
        self.sent.lock().await.clone()
    }

    /// Number of captured emails.
    pub async fn sent_count(&self) -> usize {
        self.sent.lock().await.len()
    }

    /// Check if an email was sent to a specific address.
    pub async fn was_sent_to(&self, email: &str) -> bool {
        self.sent.lock().await.iter().any(|e| e.to_email == email)
    }
}

#[async_trait]
impl EmailProvider for MockProvider {
    async fn send(&self, email: &EmailContent) -> NotificationResult<DeliveryOutcome> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(message) = &self.error {
            return Err(NotificationError::Provider(message.clone()));
        }

        if let Some(message) = &self.rejection {
            return Ok(DeliveryOutcome::rejected(message.clone()));
        }

        self.sent.lock().await.push(email.clone());

        Ok(DeliveryOutcome::accepted(Some(format!(
            "mock-{}",
            email.recipient_user_id
        ))))
    }

    fn name(&self) -> &'static str {
        "mock"
    }

    async fn health_check(&self) -> NotificationResult<bool> {
        Ok(self.error.is_none())
    }
}
