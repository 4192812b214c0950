//! Notifications Domain
//!
//! Asynchronous email notification pipeline for the platform: callers
//! queue notification records, a background drain loop delivers them in
//! bounded batches through a pluggable provider, and tracking computes
//! read-only analytics over the store.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  Application    │  ← registration, admin actions, newsletter signup
//! └────────┬────────┘
//!          │ add_email / add_bulk_emails
//! ┌────────▼────────┐
//! │   EmailQueue    │  ← claims due records, bounded batches, retry
//! └────────┬────────┘
//!          │ NotificationRepository
//! ┌────────▼────────┐
//! │ Notification    │  ← email_notifications / email_events
//! │ Store (Postgres)│
//! └────────┬────────┘
//!          │
//! ┌────────▼────────┐
//! │ EmailProvider   │  ← SMTP, SendGrid
//! └─────────────────┘
//!
//! EmailTracking reads the same store for analytics and reports.
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use domain_notifications::{
//!     EmailQueue, QueueConfig,
//!     providers::SmtpProvider,
//!     repository::InMemoryNotificationRepository,
//!     users::StaticUserDirectory,
//! };
//!
//! # async fn example() -> domain_notifications::NotificationResult<()> {
//! let queue = EmailQueue::new(
//!     InMemoryNotificationRepository::new(),
//!     SmtpProvider::from_env()?,
//!     StaticUserDirectory::new(),
//!     QueueConfig::default(),
//! );
//!
//! queue.start_processing().await;
//! # Ok(())
//! # }
//! ```

pub mod entity;
pub mod error;
pub mod models;
pub mod postgres;
pub mod providers;
pub mod queue;
pub mod repository;
pub mod tracking;
pub mod users;

// Re-export commonly used types
pub use error::{NotificationError, NotificationResult};
pub use models::{
    BulkRetryReport, DeliveryReport, EmailAnalytics, EmailCategory, EmailEvent, EmailStats,
    EmailStatus, FailedEmail, NewNotification, NotificationRecord, ProcessReport, QueueStats,
    StatusMetadata,
};
pub use postgres::PgNotificationRepository;
pub use providers::{DeliveryOutcome, EmailContent, EmailProvider, MockProvider};
pub use queue::{EmailQueue, QueueConfig};
pub use repository::{InMemoryNotificationRepository, NotificationRepository};
pub use tracking::EmailTracking;
pub use users::{ContactInfo, PgUserDirectory, StaticUserDirectory, UserDirectory};
