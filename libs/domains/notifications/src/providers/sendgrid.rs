//! SendGrid delivery backend.

use super::{DeliveryOutcome, EmailContent, EmailProvider};
use crate::error::{NotificationError, NotificationResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// SendGrid API configuration.
#[derive(Debug, Clone)]
pub struct SendGridConfig {
    /// SendGrid API key.
    pub api_key: String,
    /// Sender email address.
    pub from_email: String,
    /// Sender name.
    pub from_name: String,
    /// SendGrid API base URL (defaults to production).
    pub api_url: String,
}

impl SendGridConfig {
    /// Create a new SendGrid configuration.
    pub fn new(api_key: String, from_email: String, from_name: String) -> Self {
        Self {
            api_key,
            from_email,
            from_name,
            api_url: "https://api.sendgrid.com/v3".to_string(),
        }
    }

    /// Create configuration from environment variables.
    pub fn from_env() -> NotificationResult<Self> {
        let api_key = std::env::var("SENDGRID_API_KEY")
            .map_err(|_| NotificationError::Config("SENDGRID_API_KEY not set".to_string()))?;
        let from_email = std::env::var("SENDGRID_FROM_EMAIL")
            .map_err(|_| NotificationError::Config("SENDGRID_FROM_EMAIL not set".to_string()))?;
        let from_name =
            std::env::var("SENDGRID_FROM_NAME").unwrap_or_else(|_| "Atrium".to_string());

        Ok(Self::new(api_key, from_email, from_name))
    }
}

/// SendGrid delivery backend.
pub struct SendGridProvider {
    config: SendGridConfig,
    client: Client,
}

impl SendGridProvider {
    /// Create a new SendGrid provider.
    pub fn new(config: SendGridConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    /// Create a provider from environment variables.
    pub fn from_env() -> NotificationResult<Self> {
        let config = SendGridConfig::from_env()?;
        Ok(Self::new(config))
    }
}

// SendGrid API request/response structures

#[derive(Debug, Serialize)]
struct SendGridRequest {
    personalizations: Vec<Personalization>,
    from: EmailAddress,
    subject: String,
    content: Vec<Content>,
    categories: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Personalization {
    to: Vec<EmailAddress>,
}

#[derive(Debug, Serialize)]
struct EmailAddress {
    email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(rename = "type")]
    content_type: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct SendGridError {
    errors: Vec<SendGridErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct SendGridErrorDetail {
    message: String,
}

#[async_trait]
impl EmailProvider for SendGridProvider {
    async fn send(&self, email: &EmailContent) -> NotificationResult<DeliveryOutcome> {
        let request = SendGridRequest {
            personalizations: vec![Personalization {
                to: vec![EmailAddress {
                    email: email.to_email.clone(),
                    name: if email.to_name.is_empty() {
                        None
                    } else {
                        Some(email.to_name.clone())
                    },
                }],
            }],
            from: EmailAddress {
                email: self.config.from_email.clone(),
                name: Some(self.config.from_name.clone()),
            },
            subject: email.subject.clone(),
            content: vec![
                Content {
                    content_type: "text/plain".to_string(),
                    value: email.text_body.clone(),
                },
                Content {
                    content_type: "text/html".to_string(),
                    value: email.html_body.clone(),
                },
            ],
            categories: vec![email.category.to_string()],
        };

        debug!(
            to = %email.to_email,
            subject = %email.subject,
            category = %email.category,
            "Sending email via SendGrid"
        );

        let response = match self
            .client
            .post(format!("{}/mail/send", self.config.api_url))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            // A transport-level failure is an ordinary delivery failure.
            Err(e) => {
                warn!(to = %email.to_email, error = %e, "SendGrid request failed");
                return Ok(DeliveryOutcome::rejected(format!(
                    "SendGrid request failed: {}",
                    e
                )));
            }
        };

        let status = response.status();
        let message_id = response
            .headers()
            .get("x-message-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        if status.is_success() {
            info!(
                to = %email.to_email,
                message_id = ?message_id,
                "Email sent via SendGrid"
            );
            Ok(DeliveryOutcome::accepted(message_id))
        } else {
            let error_body = response.text().await.unwrap_or_default();
            warn!(
                to = %email.to_email,
                status = %status,
                error = %error_body,
                "SendGrid rejected email"
            );

            let error_message =
                if let Ok(sg_error) = serde_json::from_str::<SendGridError>(&error_body) {
                    sg_error
                        .errors
                        .into_iter()
                        .map(|e| e.message)
                        .collect::<Vec<_>>()
                        .join(", ")
                } else {
                    error_body
                };

            Ok(DeliveryOutcome::rejected(format!(
                "SendGrid error ({}): {}",
                status, error_message
            )))
        }
    }

    fn name(&self) -> &'static str {
        "sendgrid"
    }

    async fn health_check(&self) -> NotificationResult<bool> {
        // SendGrid has no dedicated health endpoint; validate the API key format.
        if self.config.api_key.starts_with("SG.") {
            Ok(true)
        } else {
            Err(NotificationError::Config(
                "Invalid SendGrid API key format".to_string(),
            ))
        }
    }
}
