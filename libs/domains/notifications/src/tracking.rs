//! Delivery tracking and analytics.
//!
//! Records status-change events and computes read-only analytics over the
//! notification store. Tracking never owns retry/send logic beyond the
//! single-record operator retry, and tracking-event writes are best-effort:
//! a persistence failure there must never affect delivery correctness.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{NotificationError, NotificationResult};
use crate::models::{
    CategoryCount, CategoryDeliveryRow, DailyCount, DailyDeliveryRow, DeliveryReport,
    EmailAnalytics, EmailCategory, EmailEvent, EmailStats, EmailStatus, FailedEmail,
    NotificationRecord, RecipientCount, StatusCount, StatusMetadata,
};
use crate::repository::NotificationRepository;
use crate::users::UserDirectory;

/// Default retention threshold for `cleanup_old_email_data`, in days.
pub const DEFAULT_TRACKING_RETENTION_DAYS: u32 = 90;

/// Window inside which `get_failed_emails` reports failures.
const FAILED_EMAILS_WINDOW_DAYS: i64 = 7;

/// Days of history covered by the `by_day` grouping in `get_email_stats`.
const STATS_DAILY_WINDOW_DAYS: i64 = 30;

/// Tracking and analytics service.
pub struct EmailTracking<R, U> {
    repository: Arc<R>,
    users: Arc<U>,
}

impl<R, U> EmailTracking<R, U>
where
    R: NotificationRepository,
    U: UserDirectory,
{
    /// Create a new tracking service.
    pub fn new(repository: R, users: U) -> Self {
        Self::with_arcs(Arc::new(repository), Arc::new(users))
    }

    /// Create a tracking service with shared collaborators.
    pub fn with_arcs(repository: Arc<R>, users: Arc<U>) -> Self {
        Self { repository, users }
    }

    /// Append a tracking event.
    ///
    /// Best-effort telemetry: a persistence error is logged and swallowed.
    pub async fn track_email_event(&self, event: EmailEvent) {
        if let Err(e) = self.repository.append_event(event).await {
            warn!(error = %e, "Failed to record email tracking event");
        }
    }

    /// Apply a status transition to a specific record.
    ///
    /// `metadata.error` is recorded only when the new status is `Failed`;
    /// any previous error message is cleared otherwise.
    pub async fn update_email_status(
        &self,
        id: Uuid,
        status: EmailStatus,
        metadata: Option<StatusMetadata>,
    ) -> NotificationResult<NotificationRecord> {
        let error = match status {
            EmailStatus::Failed => metadata.and_then(|m| m.error),
            _ => None,
        };

        let record = self.repository.set_status(id, status, error).await?;

        self.track_email_event(EmailEvent::new(Some(id), record.category, status))
            .await;

        debug!(notification_id = %id, status = %status, "Email status updated");
        Ok(record)
    }

    /// Aggregate delivery analytics over an optional date window.
    pub async fn get_email_analytics(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> NotificationResult<EmailAnalytics> {
        let records = self.repository.list_between(start, end).await?;
        Ok(summarize(&records))
    }

    /// Grouped counts: by category, by status, by calendar day (last 30
    /// days), and top-10 recipients.
    pub async fn get_email_stats(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> NotificationResult<EmailStats> {
        let records = self.repository.list_between(start, end).await?;

        let mut by_category: HashMap<EmailCategory, u64> = HashMap::new();
        let mut by_status: HashMap<EmailStatus, u64> = HashMap::new();
        let mut by_day: HashMap<NaiveDate, u64> = HashMap::new();
        let mut by_recipient: HashMap<Uuid, u64> = HashMap::new();

        let daily_cutoff = Utc::now() - ChronoDuration::days(STATS_DAILY_WINDOW_DAYS);

        for record in &records {
            *by_category.entry(record.category).or_default() += 1;
            *by_status.entry(record.status).or_default() += 1;
            *by_recipient.entry(record.recipient_user_id).or_default() += 1;
            if record.created_at >= daily_cutoff {
                *by_day.entry(record.created_at.date_naive()).or_default() += 1;
            }
        }

        let mut by_category: Vec<CategoryCount> = by_category
            .into_iter()
            .map(|(category, count)| CategoryCount { category, count })
            .collect();
        by_category.sort_by(|a, b| b.count.cmp(&a.count));

        let mut by_status: Vec<StatusCount> = by_status
            .into_iter()
            .map(|(status, count)| StatusCount { status, count })
            .collect();
        by_status.sort_by(|a, b| b.count.cmp(&a.count));

        let mut by_day: Vec<DailyCount> = by_day
            .into_iter()
            .map(|(date, count)| DailyCount { date, count })
            .collect();
        by_day.sort_by_key(|d| d.date);

        let mut top_recipients: Vec<RecipientCount> = by_recipient
            .into_iter()
            .map(|(recipient_user_id, count)| RecipientCount {
                recipient_user_id,
                count,
            })
            .collect();
        top_recipients.sort_by(|a, b| b.count.cmp(&a.count));
        top_recipients.truncate(10);

        Ok(EmailStats {
            by_category,
            by_status,
            by_day,
            top_recipients,
        })
    }

    /// Failed records from the last 7 days, joined with recipient info.
    pub async fn get_failed_emails(&self) -> NotificationResult<Vec<FailedEmail>> {
        let cutoff = Utc::now() - ChronoDuration::days(FAILED_EMAILS_WINDOW_DAYS);
        let failed = self.repository.find_failed_since(cutoff).await?;

        let mut result = Vec::with_capacity(failed.len());
        for record in failed {
            let recipient = match self.users.contact_info(record.recipient_user_id).await {
                Ok(contact) => contact,
                Err(e) => {
                    warn!(
                        user_id = %record.recipient_user_id,
                        error = %e,
                        "Failed to resolve recipient for failed-email report"
                    );
                    None
                }
            };

            result.push(FailedEmail {
                id: record.id,
                recipient_user_id: record.recipient_user_id,
                recipient,
                category: record.category,
                subject: record.subject,
                error_message: record.error_message,
                attempts: record.attempts,
                last_attempt_at: record.last_attempt_at,
            });
        }

        Ok(result)
    }

    /// Return a single failed record to the queue.
    ///
    /// Unlike the bulk retry there is no 24-hour window: an operator can
    /// retry any failed record. Fails with `NotFound` for an unknown id and
    /// `InvalidState` when the record is not currently failed; neither case
    /// has side effects.
    pub async fn retry_failed_email(&self, id: Uuid) -> NotificationResult<()> {
        let record = self
            .repository
            .find_by_id(id)
            .await?
            .ok_or(NotificationError::NotFound(id))?;

        if record.status != EmailStatus::Failed {
            return Err(NotificationError::InvalidState(format!(
                "notification {} is {}, only failed emails can be retried",
                id, record.status
            )));
        }

        if !self.repository.requeue_failed(id, Utc::now()).await? {
            // Lost a race with a concurrent transition.
            return Err(NotificationError::InvalidState(format!(
                "notification {} is no longer failed",
                id
            )));
        }

        info!(notification_id = %id, "Re-queued failed email");
        Ok(())
    }

    /// Combined delivery report over an explicit date window.
    pub async fn get_email_delivery_report(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> NotificationResult<DeliveryReport> {
        let records = self.repository.list_between(Some(start), Some(end)).await?;
        let summary = summarize(&records);

        let mut by_day: HashMap<NaiveDate, Vec<&NotificationRecord>> = HashMap::new();
        let mut by_category: HashMap<EmailCategory, Vec<&NotificationRecord>> = HashMap::new();
        for record in &records {
            by_day.entry(record.created_at.date_naive()).or_default().push(record);
            by_category.entry(record.category).or_default().push(record);
        }

        let mut daily_breakdown: Vec<DailyDeliveryRow> = by_day
            .into_iter()
            .map(|(date, group)| {
                let funnel = Funnel::over(group.iter().map(|r| r.status));
                DailyDeliveryRow {
                    date,
                    total: funnel.total,
                    delivered: funnel.delivered,
                    failed: funnel.failed,
                    opened: funnel.opened,
                    clicked: funnel.clicked,
                    open_rate: funnel.open_rate(),
                    click_rate: funnel.click_rate(),
                }
            })
            .collect();
        daily_breakdown.sort_by_key(|row| row.date);

        let mut type_breakdown: Vec<CategoryDeliveryRow> = by_category
            .into_iter()
            .map(|(category, group)| {
                let funnel = Funnel::over(group.iter().map(|r| r.status));
                CategoryDeliveryRow {
                    category,
                    total: funnel.total,
                    delivered: funnel.delivered,
                    failed: funnel.failed,
                    opened: funnel.opened,
                    clicked: funnel.clicked,
                    open_rate: funnel.open_rate(),
                    click_rate: funnel.click_rate(),
                }
            })
            .collect();
        type_breakdown.sort_by(|a, b| b.total.cmp(&a.total));

        Ok(DeliveryReport {
            summary,
            daily_breakdown,
            type_breakdown,
        })
    }

    /// Purge delivered/failed records older than the threshold.
    ///
    /// Same unified sweep as the queue's `clear_old_emails`, with a longer
    /// default suited to analytics retention.
    pub async fn cleanup_old_email_data(
        &self,
        older_than_days: Option<u32>,
    ) -> NotificationResult<u64> {
        let days = older_than_days.unwrap_or(DEFAULT_TRACKING_RETENTION_DAYS);
        let cutoff = Utc::now() - ChronoDuration::days(days as i64);

        let deleted = self.repository.delete_terminal_before(cutoff).await?;

        info!(deleted, older_than_days = days, "Cleaned up old email data");
        Ok(deleted)
    }
}

impl<R, U> Clone for EmailTracking<R, U> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            users: Arc::clone(&self.users),
        }
    }
}

// ============================================================================
// Aggregation
// ============================================================================

/// Per-status counts with cumulative funnel rates.
///
/// Statuses are exclusive, so an opened email is no longer counted as
/// `delivered` in the raw numbers; the rates use cumulative counts
/// (every opened or clicked email was also delivered) to stay meaningful
/// percentages.
#[derive(Debug, Default, Clone, Copy)]
struct Funnel {
    total: u64,
    queued: u64,
    sending: u64,
    delivered: u64,
    failed: u64,
    opened: u64,
    clicked: u64,
}

impl Funnel {
    fn over(statuses: impl Iterator<Item = EmailStatus>) -> Self {
        let mut funnel = Funnel::default();
        for status in statuses {
            funnel.total += 1;
            match status {
                EmailStatus::Queued => funnel.queued += 1,
                EmailStatus::Sending => funnel.sending += 1,
                EmailStatus::Delivered => funnel.delivered += 1,
                EmailStatus::Failed => funnel.failed += 1,
                EmailStatus::Opened => funnel.opened += 1,
                EmailStatus::Clicked => funnel.clicked += 1,
            }
        }
        funnel
    }

    fn delivered_cumulative(&self) -> u64 {
        self.delivered + self.opened + self.clicked
    }

    fn opened_cumulative(&self) -> u64 {
        self.opened + self.clicked
    }

    fn delivery_rate(&self) -> f64 {
        percentage(self.delivered_cumulative(), self.total)
    }

    fn open_rate(&self) -> f64 {
        percentage(self.opened_cumulative(), self.delivered_cumulative())
    }

    fn click_rate(&self) -> f64 {
        percentage(self.clicked, self.opened_cumulative())
    }

    fn failure_rate(&self) -> f64 {
        percentage(self.failed, self.total)
    }
}

fn summarize(records: &[NotificationRecord]) -> EmailAnalytics {
    let funnel = Funnel::over(records.iter().map(|r| r.status));
    EmailAnalytics {
        total_emails: funnel.total,
        queued: funnel.queued,
        sending: funnel.sending,
        delivered: funnel.delivered,
        failed: funnel.failed,
        opened: funnel.opened,
        clicked: funnel.clicked,
        delivery_rate: funnel.delivery_rate(),
        open_rate: funnel.open_rate(),
        click_rate: funnel.click_rate(),
        failure_rate: funnel.failure_rate(),
    }
}

/// Percentage rounded to two decimals; 0 when the denominator is 0.
fn percentage(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    let rate = numerator as f64 * 100.0 / denominator as f64;
    (rate * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewNotification;
    use crate::repository::{InMemoryNotificationRepository, MockNotificationRepository};
    use crate::users::{MockUserDirectory, StaticUserDirectory};

    fn notification(category: EmailCategory, recipient: Uuid) -> NewNotification {
        NewNotification {
            recipient_user_id: recipient,
            category,
            subject: "Subject".to_string(),
            html_body: "<p>Body</p>".to_string(),
            text_body: "Body".to_string(),
        }
    }

    async fn seeded_repo() -> InMemoryNotificationRepository {
        let repo = InMemoryNotificationRepository::new();
        let now = Utc::now();

        // 2 delivered, 1 opened, 1 clicked, 1 failed, 1 queued.
        for status in [
            EmailStatus::Delivered,
            EmailStatus::Delivered,
            EmailStatus::Opened,
            EmailStatus::Clicked,
            EmailStatus::Failed,
        ] {
            let record = repo
                .insert(notification(EmailCategory::Digest, Uuid::new_v4()), now)
                .await
                .unwrap();
            repo.set_status(record.id, status, Some("bounce".to_string()))
                .await
                .unwrap();
        }
        repo.insert(notification(EmailCategory::Welcome, Uuid::new_v4()), now)
            .await
            .unwrap();

        repo
    }

    #[test]
    fn test_percentage_zero_denominator() {
        assert_eq!(percentage(5, 0), 0.0);
        assert_eq!(percentage(0, 0), 0.0);
    }

    #[test]
    fn test_percentage_rounds_to_two_decimals() {
        assert_eq!(percentage(1, 3), 33.33);
        assert_eq!(percentage(2, 3), 66.67);
        assert_eq!(percentage(1, 1), 100.0);
    }

    #[tokio::test]
    async fn test_analytics_on_empty_store() {
        let tracking = EmailTracking::new(
            InMemoryNotificationRepository::new(),
            StaticUserDirectory::new(),
        );

        let analytics = tracking.get_email_analytics(None, None).await.unwrap();

        assert_eq!(analytics.total_emails, 0);
        assert_eq!(analytics.delivery_rate, 0.0);
        assert_eq!(analytics.open_rate, 0.0);
        assert_eq!(analytics.click_rate, 0.0);
        assert_eq!(analytics.failure_rate, 0.0);
    }

    #[tokio::test]
    async fn test_analytics_funnel_rates() {
        let tracking =
            EmailTracking::with_arcs(Arc::new(seeded_repo().await), Arc::new(StaticUserDirectory::new()));

        let analytics = tracking.get_email_analytics(None, None).await.unwrap();

        assert_eq!(analytics.total_emails, 6);
        assert_eq!(analytics.delivered, 2);
        assert_eq!(analytics.opened, 1);
        assert_eq!(analytics.clicked, 1);
        assert_eq!(analytics.failed, 1);
        assert_eq!(analytics.queued, 1);

        // Funnel: 4 of 6 delivered, 2 of 4 opened, 1 of 2 clicked, 1 of 6 failed.
        assert_eq!(analytics.delivery_rate, 66.67);
        assert_eq!(analytics.open_rate, 50.0);
        assert_eq!(analytics.click_rate, 50.0);
        assert_eq!(analytics.failure_rate, 16.67);
    }

    #[tokio::test]
    async fn test_update_email_status_sets_and_clears_error() {
        let repo = Arc::new(InMemoryNotificationRepository::new());
        let tracking =
            EmailTracking::with_arcs(Arc::clone(&repo), Arc::new(StaticUserDirectory::new()));

        let record = repo
            .insert(notification(EmailCategory::System, Uuid::new_v4()), Utc::now())
            .await
            .unwrap();

        let failed = tracking
            .update_email_status(
                record.id,
                EmailStatus::Failed,
                Some(StatusMetadata {
                    error: Some("mailbox full".to_string()),
                }),
            )
            .await
            .unwrap();
        assert_eq!(failed.error_message.as_deref(), Some("mailbox full"));

        let delivered = tracking
            .update_email_status(record.id, EmailStatus::Delivered, None)
            .await
            .unwrap();
        assert!(delivered.error_message.is_none());

        // Both transitions left tracking events behind.
        assert_eq!(repo.events().await.len(), 2);
    }

    #[tokio::test]
    async fn test_update_email_status_not_found() {
        let tracking = EmailTracking::new(
            InMemoryNotificationRepository::new(),
            StaticUserDirectory::new(),
        );

        let result = tracking
            .update_email_status(Uuid::new_v4(), EmailStatus::Opened, None)
            .await;
        assert!(matches!(result, Err(NotificationError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_track_event_swallows_persistence_errors() {
        let mut repo = MockNotificationRepository::new();
        repo.expect_append_event()
            .returning(|_| Err(NotificationError::Persistence("disk full".to_string())));

        let mut users = MockUserDirectory::new();
        users.expect_contact_info().never();

        let tracking = EmailTracking::new(repo, users);

        // Must not panic or propagate.
        tracking
            .track_email_event(EmailEvent::new(
                None,
                EmailCategory::Marketing,
                EmailStatus::Opened,
            ))
            .await;
    }

    #[tokio::test]
    async fn test_retry_failed_email_validation() {
        let repo = Arc::new(InMemoryNotificationRepository::new());
        let tracking =
            EmailTracking::with_arcs(Arc::clone(&repo), Arc::new(StaticUserDirectory::new()));

        // Unknown id.
        let result = tracking.retry_failed_email(Uuid::new_v4()).await;
        assert!(matches!(result, Err(NotificationError::NotFound(_))));

        // Queued record is not retryable, twice in a row.
        let record = repo
            .insert(notification(EmailCategory::Reminder, Uuid::new_v4()), Utc::now())
            .await
            .unwrap();
        for _ in 0..2 {
            let result = tracking.retry_failed_email(record.id).await;
            assert!(matches!(result, Err(NotificationError::InvalidState(_))));
            let unchanged = repo.find_by_id(record.id).await.unwrap().unwrap();
            assert_eq!(unchanged.status, EmailStatus::Queued);
        }
    }

    #[tokio::test]
    async fn test_retry_failed_email_requeues() {
        let repo = Arc::new(InMemoryNotificationRepository::new());
        let tracking =
            EmailTracking::with_arcs(Arc::clone(&repo), Arc::new(StaticUserDirectory::new()));

        let record = repo
            .insert(notification(EmailCategory::Reminder, Uuid::new_v4()), Utc::now())
            .await
            .unwrap();
        repo.set_status(record.id, EmailStatus::Failed, Some("bounce".to_string()))
            .await
            .unwrap();

        tracking.retry_failed_email(record.id).await.unwrap();

        let requeued = repo.find_by_id(record.id).await.unwrap().unwrap();
        assert_eq!(requeued.status, EmailStatus::Queued);
        assert!(requeued.error_message.is_none());
    }

    #[tokio::test]
    async fn test_email_stats_grouping() {
        let repo = Arc::new(seeded_repo().await);
        let tracking =
            EmailTracking::with_arcs(Arc::clone(&repo), Arc::new(StaticUserDirectory::new()));

        let stats = tracking.get_email_stats(None, None).await.unwrap();

        let digest = stats
            .by_category
            .iter()
            .find(|c| c.category == EmailCategory::Digest)
            .unwrap();
        assert_eq!(digest.count, 5);

        let total: u64 = stats.by_status.iter().map(|s| s.count).sum();
        assert_eq!(total, 6);

        // All records were created today.
        assert_eq!(stats.by_day.len(), 1);
        assert_eq!(stats.by_day[0].count, 6);

        assert!(stats.top_recipients.len() <= 10);
    }

    #[tokio::test]
    async fn test_delivery_report_rows_are_zero_safe() {
        let repo = Arc::new(InMemoryNotificationRepository::new());
        let tracking =
            EmailTracking::with_arcs(Arc::clone(&repo), Arc::new(StaticUserDirectory::new()));

        let now = Utc::now();
        // One failed record only: every rate denominator is zero somewhere.
        let record = repo
            .insert(notification(EmailCategory::Report, Uuid::new_v4()), now)
            .await
            .unwrap();
        repo.set_status(record.id, EmailStatus::Failed, Some("bounce".to_string()))
            .await
            .unwrap();

        let report = tracking
            .get_email_delivery_report(now - ChronoDuration::hours(1), now + ChronoDuration::hours(1))
            .await
            .unwrap();

        assert_eq!(report.summary.total_emails, 1);
        assert_eq!(report.summary.failure_rate, 100.0);
        assert_eq!(report.daily_breakdown.len(), 1);
        assert_eq!(report.daily_breakdown[0].open_rate, 0.0);
        assert_eq!(report.daily_breakdown[0].click_rate, 0.0);
        assert_eq!(report.type_breakdown.len(), 1);
        assert_eq!(report.type_breakdown[0].category, EmailCategory::Report);
    }

    #[tokio::test]
    async fn test_failed_emails_joined_with_recipient() {
        let repo = Arc::new(InMemoryNotificationRepository::new());
        let directory = Arc::new(StaticUserDirectory::new());
        let tracking = EmailTracking::with_arcs(Arc::clone(&repo), Arc::clone(&directory));

        let known_user = Uuid::new_v4();
        directory.insert(known_user, "mentee@example.com", "Sam Mentee").await;

        let now = Utc::now();
        let known = repo
            .insert(notification(EmailCategory::Approval, known_user), now)
            .await
            .unwrap();
        let unknown = repo
            .insert(notification(EmailCategory::Approval, Uuid::new_v4()), now)
            .await
            .unwrap();
        repo.claim_due(now, 2).await.unwrap();
        for id in [known.id, unknown.id] {
            repo.mark_failed(id, "bounce".to_string(), now).await.unwrap();
        }

        let failed = tracking.get_failed_emails().await.unwrap();
        assert_eq!(failed.len(), 2);

        let with_contact = failed.iter().find(|f| f.id == known.id).unwrap();
        assert_eq!(
            with_contact.recipient.as_ref().unwrap().email,
            "mentee@example.com"
        );
        let without_contact = failed.iter().find(|f| f.id == unknown.id).unwrap();
        assert!(without_contact.recipient.is_none());
    }
}
