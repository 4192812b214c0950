//! Data models for the notifications domain.

use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{DeriveActiveEnum, EnumIter};
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

// ============================================================================
// Enumerations
// ============================================================================

/// Purpose of a notification email.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    DeriveActiveEnum,
    EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "email_category")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EmailCategory {
    /// Welcome email sent after registration.
    #[sea_orm(string_value = "welcome")]
    Welcome,
    /// Account approval notification.
    #[sea_orm(string_value = "approval")]
    Approval,
    /// Account rejection notification.
    #[sea_orm(string_value = "rejection")]
    Rejection,
    /// Session or task reminder.
    #[sea_orm(string_value = "reminder")]
    Reminder,
    /// Newsletter signup confirmation.
    #[sea_orm(string_value = "newsletter_welcome")]
    NewsletterWelcome,
    /// Periodic activity digest.
    #[sea_orm(string_value = "digest")]
    Digest,
    /// Marketing campaign email.
    #[sea_orm(string_value = "marketing")]
    Marketing,
    /// Progress or delivery report.
    #[sea_orm(string_value = "report")]
    Report,
    /// System-generated notification.
    #[sea_orm(string_value = "system")]
    System,
}

/// Delivery state of a notification record.
///
/// `Sending` marks a record claimed by a drain cycle; the claim is a
/// conditional store update, so a record is owned by at most one drain
/// even across processes. Stale `Sending` claims are released back to
/// `Queued` after a timeout.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    DeriveActiveEnum,
    EnumIter,
)]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "email_status")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EmailStatus {
    /// Waiting to be picked up by a drain cycle.
    #[sea_orm(string_value = "queued")]
    Queued,
    /// Claimed by a drain cycle, delivery in flight.
    #[sea_orm(string_value = "sending")]
    Sending,
    /// Accepted by the delivery backend.
    #[sea_orm(string_value = "delivered")]
    Delivered,
    /// Delivery failed; `error_message` holds the reason.
    #[sea_orm(string_value = "failed")]
    Failed,
    /// Opened by the recipient.
    #[sea_orm(string_value = "opened")]
    Opened,
    /// A link in the email was clicked.
    #[sea_orm(string_value = "clicked")]
    Clicked,
}

impl EmailStatus {
    /// Whether the record reached the delivery backend successfully.
    pub fn is_successful(&self) -> bool {
        matches!(
            self,
            EmailStatus::Delivered | EmailStatus::Opened | EmailStatus::Clicked
        )
    }

    /// Whether the record is eligible for the retention sweep.
    ///
    /// Only `Delivered` and `Failed` rows may be purged; `Opened`/`Clicked`
    /// carry engagement data and queued/in-flight rows are never deleted.
    pub fn is_purgeable(&self) -> bool {
        matches!(self, EmailStatus::Delivered | EmailStatus::Failed)
    }
}

// ============================================================================
// Notification records
// ============================================================================

/// Input for queueing a new notification email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNotification {
    /// Recipient user (weak reference, resolved at send time).
    pub recipient_user_id: Uuid,
    /// Notification purpose.
    pub category: EmailCategory,
    /// Email subject line.
    pub subject: String,
    /// Rendered HTML body.
    pub html_body: String,
    /// Rendered plain-text body.
    pub text_body: String,
}

/// One persisted email-send attempt and its outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: Uuid,
    pub recipient_user_id: Uuid,
    pub category: EmailCategory,
    pub subject: String,
    pub html_body: String,
    pub text_body: String,
    pub status: EmailStatus,
    /// Present iff `status == Failed`.
    pub error_message: Option<String>,
    /// Delivery attempts so far.
    pub attempts: i32,
    /// Intended send time; refreshed on retry.
    pub scheduled_at: DateTime<Utc>,
    /// Stamped when a drain cycle claims the record.
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl NotificationRecord {
    /// Create a new record in queued status.
    pub fn new_queued(input: NewNotification, scheduled_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            recipient_user_id: input.recipient_user_id,
            category: input.category,
            subject: input.subject,
            html_body: input.html_body,
            text_body: input.text_body,
            status: EmailStatus::Queued,
            error_message: None,
            attempts: 0,
            scheduled_at,
            last_attempt_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Append-only tracking entry for a status-change event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailEvent {
    pub id: Uuid,
    /// Record the event refers to, when known.
    pub notification_id: Option<Uuid>,
    pub category: EmailCategory,
    pub status: EmailStatus,
    pub occurred_at: DateTime<Utc>,
}

impl EmailEvent {
    /// Create a new tracking event stamped with the current time.
    pub fn new(notification_id: Option<Uuid>, category: EmailCategory, status: EmailStatus) -> Self {
        Self {
            id: Uuid::new_v4(),
            notification_id,
            category,
            status,
            occurred_at: Utc::now(),
        }
    }
}

// ============================================================================
// Queue reporting
// ============================================================================

/// Raw per-status record counts from the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub queued: u64,
    pub sending: u64,
    pub delivered: u64,
    pub failed: u64,
    pub opened: u64,
    pub clicked: u64,
}

impl StatusCounts {
    /// Total records across all statuses.
    pub fn total(&self) -> u64 {
        self.queued + self.sending + self.delivered + self.failed + self.opened + self.clicked
    }

    /// Records that reached the delivery backend successfully.
    pub fn successful(&self) -> u64 {
        self.delivered + self.opened + self.clicked
    }
}

/// Aggregate queue counters reported by `get_queue_stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Records waiting to be drained.
    pub pending: u64,
    /// Records claimed by an in-flight drain cycle.
    pub processing: u64,
    /// Records delivered (including those later opened or clicked).
    pub successful: u64,
    pub failed: u64,
    pub total: u64,
}

impl From<StatusCounts> for QueueStats {
    fn from(counts: StatusCounts) -> Self {
        Self {
            pending: counts.queued,
            processing: counts.sending,
            successful: counts.successful(),
            failed: counts.failed,
            total: counts.total(),
        }
    }
}

/// Outcome of one drain cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessReport {
    pub processed: u64,
    pub successful: u64,
    pub failed: u64,
}

/// Outcome of a bulk retry pass over recently failed records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkRetryReport {
    /// Records returned to the queue.
    pub retried: u64,
    /// Per-record requeue failures, as `"{id}: {error}"`.
    pub errors: Vec<String>,
}

// ============================================================================
// Tracking & analytics
// ============================================================================

/// Optional metadata for a status update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusMetadata {
    /// Failure reason, recorded only when the new status is `Failed`.
    pub error: Option<String>,
}

/// Aggregate delivery analytics over a date window.
///
/// Raw counts are exclusive (a record has exactly one status); the rates
/// are computed over the cumulative funnel, so an opened email still
/// counts as delivered. All rates are percentages rounded to two
/// decimals, and 0 whenever the denominator is 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailAnalytics {
    pub total_emails: u64,
    pub queued: u64,
    pub sending: u64,
    pub delivered: u64,
    pub failed: u64,
    pub opened: u64,
    pub clicked: u64,
    pub delivery_rate: f64,
    pub open_rate: f64,
    pub click_rate: f64,
    pub failure_rate: f64,
}

/// Count of records for one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCount {
    pub category: EmailCategory,
    pub count: u64,
}

/// Count of records in one status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCount {
    pub status: EmailStatus,
    pub count: u64,
}

/// Count of records created on one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: u64,
}

/// Count of records addressed to one recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientCount {
    pub recipient_user_id: Uuid,
    pub count: u64,
}

/// Grouped counts reported by `get_email_stats`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmailStats {
    /// Counts per category, largest first.
    pub by_category: Vec<CategoryCount>,
    /// Counts per status, largest first.
    pub by_status: Vec<StatusCount>,
    /// Counts per calendar day over the last 30 days, oldest first.
    pub by_day: Vec<DailyCount>,
    /// Top 10 recipients by record count.
    pub top_recipients: Vec<RecipientCount>,
}

/// A recently failed record joined with minimal recipient info.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedEmail {
    pub id: Uuid,
    pub recipient_user_id: Uuid,
    /// Recipient contact details, when the user could be resolved.
    pub recipient: Option<crate::users::ContactInfo>,
    pub category: EmailCategory,
    pub subject: String,
    pub error_message: Option<String>,
    pub attempts: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

/// One day of the delivery report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyDeliveryRow {
    pub date: NaiveDate,
    pub total: u64,
    pub delivered: u64,
    pub failed: u64,
    pub opened: u64,
    pub clicked: u64,
    pub open_rate: f64,
    pub click_rate: f64,
}

/// One category of the delivery report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CategoryDeliveryRow {
    pub category: EmailCategory,
    pub total: u64,
    pub delivered: u64,
    pub failed: u64,
    pub opened: u64,
    pub clicked: u64,
    pub open_rate: f64,
    pub click_rate: f64,
}

/// Combined delivery report over an explicit date window.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub summary: EmailAnalytics,
    /// Day-by-day breakdown, oldest first.
    pub daily_breakdown: Vec<DailyDeliveryRow>,
    /// Category-by-category breakdown, largest first.
    pub type_breakdown: Vec<CategoryDeliveryRow>,
}
