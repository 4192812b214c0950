//! Email queue engine.
//!
//! Decouples "a notification should eventually be sent" from "sending
//! happens now": callers enqueue records, a background drain loop claims
//! due records in bounded batches and hands them to the delivery backend,
//! one awaited send at a time.
//!
//! The queue is an explicitly constructed service instance; the host
//! application owns its lifecycle through `start_processing` /
//! `stop_processing`. Overlapping drains inside one process are prevented
//! by an atomic guard, and the store-level `queued -> sending` claim keeps
//! replicas from double-sending the same record.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{NotificationError, NotificationResult};
use crate::models::{
    BulkRetryReport, NewNotification, NotificationRecord, ProcessReport, QueueStats,
};
use crate::providers::{EmailContent, EmailProvider};
use crate::repository::NotificationRepository;
use crate::users::UserDirectory;

/// Default retention threshold for `clear_old_emails`, in days.
pub const DEFAULT_QUEUE_RETENTION_DAYS: u32 = 30;

/// Window inside which `retry_failed_emails` re-queues failed records.
const BULK_RETRY_WINDOW_HOURS: i64 = 24;

/// Configuration for the email queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Upper bound on delivery attempts per record.
    pub max_attempts: u32,
    /// Declared minimum wait before a failed record is eligible for retry.
    /// Retry is operator-triggered, so this is informational and logged at
    /// startup rather than enforced as an automatic backoff.
    pub retry_delay: Duration,
    /// Maximum records drained per processing cycle.
    pub batch_size: usize,
    /// Cadence of the background drain loop.
    pub processing_interval: Duration,
    /// Per-record delivery timeout; a send exceeding it fails the record
    /// without blocking the rest of the batch.
    pub send_timeout: Duration,
    /// Age after which an in-flight claim is considered abandoned and
    /// released back to the queue (crash recovery).
    pub claim_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: std::env::var("EMAIL_MAX_ATTEMPTS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .unwrap_or(3),
            retry_delay: Duration::from_secs(
                std::env::var("EMAIL_RETRY_DELAY_SECS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()
                    .unwrap_or(300),
            ),
            batch_size: std::env::var("EMAIL_BATCH_SIZE")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),
            processing_interval: Duration::from_secs(
                std::env::var("EMAIL_PROCESSING_INTERVAL_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30),
            ),
            send_timeout: Duration::from_secs(
                std::env::var("EMAIL_SEND_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30),
            ),
            claim_timeout: Duration::from_secs(
                std::env::var("EMAIL_CLAIM_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()
                    .unwrap_or(300),
            ),
        }
    }
}

/// Handle to the background drain loop.
struct Runner {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Email queue service.
pub struct EmailQueue<R, P, U> {
    repository: Arc<R>,
    provider: Arc<P>,
    users: Arc<U>,
    config: QueueConfig,
    draining: Arc<AtomicBool>,
    runner: Arc<Mutex<Option<Runner>>>,
}

impl<R, P, U> EmailQueue<R, P, U>
where
    R: NotificationRepository + 'static,
    P: EmailProvider + 'static,
    U: UserDirectory + 'static,
{
    /// Create a new queue.
    pub fn new(repository: R, provider: P, users: U, config: QueueConfig) -> Self {
        Self::with_arcs(Arc::new(repository), Arc::new(provider), Arc::new(users), config)
    }

    /// Create a queue with shared collaborators.
    pub fn with_arcs(
        repository: Arc<R>,
        provider: Arc<P>,
        users: Arc<U>,
        config: QueueConfig,
    ) -> Self {
        Self {
            repository,
            provider,
            users,
            config,
            draining: Arc::new(AtomicBool::new(false)),
            runner: Arc::new(Mutex::new(None)),
        }
    }

    /// Queue configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Persist a new queued record and return its id.
    ///
    /// `scheduled_at` defaults to now. Persistence errors propagate: the
    /// caller must not assume the email was queued on error.
    pub async fn add_email(
        &self,
        input: NewNotification,
        scheduled_at: Option<chrono::DateTime<Utc>>,
    ) -> NotificationResult<Uuid> {
        let scheduled_at = scheduled_at.unwrap_or_else(Utc::now);
        let record = self.repository.insert(input, scheduled_at).await?;

        debug!(
            notification_id = %record.id,
            category = %record.category,
            recipient = %record.recipient_user_id,
            "Queued email"
        );
        Ok(record.id)
    }

    /// Persist a batch of queued records atomically.
    ///
    /// Returns the exact ids assigned at insert time, in input order.
    /// Either the whole batch is persisted or the call fails.
    pub async fn add_bulk_emails(
        &self,
        inputs: Vec<NewNotification>,
        scheduled_at: Option<chrono::DateTime<Utc>>,
    ) -> NotificationResult<Vec<Uuid>> {
        let scheduled_at = scheduled_at.unwrap_or_else(Utc::now);
        let records = self.repository.insert_many(inputs, scheduled_at).await?;

        info!(count = records.len(), "Queued email batch");
        Ok(records.into_iter().map(|r| r.id).collect())
    }

    /// Drain one batch of due records.
    ///
    /// Re-entrant safe: when a drain is already running in this process the
    /// call returns immediately with zero counts instead of overlapping.
    pub async fn process_queue(&self) -> NotificationResult<ProcessReport> {
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Drain already in progress, skipping");
            return Ok(ProcessReport::default());
        }

        let result = self.drain().await;
        self.draining.store(false, Ordering::SeqCst);
        result
    }

    async fn drain(&self) -> NotificationResult<ProcessReport> {
        let now = Utc::now();

        // Crash recovery: claims abandoned by a dead drain go back to the
        // queue before new work is selected.
        let stuck_before = now - ChronoDuration::seconds(self.config.claim_timeout.as_secs() as i64);
        match self.repository.release_stale(stuck_before).await {
            Ok(0) => {}
            Ok(released) => warn!(count = released, "Released abandoned in-flight claims"),
            Err(e) => warn!(error = %e, "Failed to release abandoned claims"),
        }

        let batch = self.repository.claim_due(now, self.config.batch_size).await?;

        let mut report = ProcessReport {
            processed: batch.len() as u64,
            ..Default::default()
        };

        for record in &batch {
            if self.process_record(record).await {
                report.successful += 1;
            } else {
                report.failed += 1;
            }
        }

        if report.processed > 0 {
            info!(
                processed = report.processed,
                successful = report.successful,
                failed = report.failed,
                "Drained email batch"
            );
        }

        Ok(report)
    }

    /// Deliver one claimed record and write back its outcome.
    ///
    /// Never propagates: any failure is recorded on the record itself so
    /// one bad record cannot halt the batch.
    async fn process_record(&self, record: &NotificationRecord) -> bool {
        match self.deliver(record).await {
            Ok(message_id) => {
                debug!(
                    notification_id = %record.id,
                    message_id = ?message_id,
                    "Email delivered"
                );
                if let Err(e) = self.repository.mark_delivered(record.id, Utc::now()).await {
                    error!(
                        notification_id = %record.id,
                        error = %e,
                        "Delivered but failed to record outcome"
                    );
                }
                true
            }
            Err(e) => {
                let reason = e.to_string();
                warn!(
                    notification_id = %record.id,
                    attempts = record.attempts,
                    error = %reason,
                    "Email delivery failed"
                );
                if let Err(e) = self
                    .repository
                    .mark_failed(record.id, reason, Utc::now())
                    .await
                {
                    error!(
                        notification_id = %record.id,
                        error = %e,
                        "Failed to record delivery failure"
                    );
                }
                false
            }
        }
    }

    async fn deliver(&self, record: &NotificationRecord) -> NotificationResult<Option<String>> {
        let contact = self
            .users
            .contact_info(record.recipient_user_id)
            .await?
            .ok_or(NotificationError::UserNotFound(record.recipient_user_id))?;

        let email = EmailContent {
            to_email: contact.email,
            to_name: contact.display_name,
            subject: record.subject.clone(),
            html_body: record.html_body.clone(),
            text_body: record.text_body.clone(),
            category: record.category,
            recipient_user_id: record.recipient_user_id,
        };

        let outcome = tokio::time::timeout(self.config.send_timeout, self.provider.send(&email))
            .await
            .map_err(|_| NotificationError::Timeout(self.config.send_timeout))??;

        if outcome.accepted {
            Ok(outcome.message_id)
        } else {
            Err(NotificationError::Provider(
                outcome
                    .error
                    .unwrap_or_else(|| "delivery rejected by provider".to_string()),
            ))
        }
    }

    /// Start the background drain loop.
    ///
    /// Starting an already-running queue is a no-op.
    pub async fn start_processing(&self) {
        let mut runner = self.runner.lock().await;
        if runner.is_some() {
            debug!("Queue processor already running");
            return;
        }

        info!(
            provider = self.provider.name(),
            interval_secs = self.config.processing_interval.as_secs(),
            batch_size = self.config.batch_size,
            max_attempts = self.config.max_attempts,
            retry_delay_secs = self.config.retry_delay.as_secs(),
            "Starting queue processor"
        );

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let queue = self.clone();
        let period = self.config.processing_interval;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        // Runs to completion before the next shutdown check,
                        // so stopping never interrupts an in-flight record.
                        if let Err(e) = queue.process_queue().await {
                            error!(error = %e, "Queue drain failed");
                        }
                    }
                }
            }

            info!("Queue processor stopped");
        });

        *runner = Some(Runner {
            shutdown: shutdown_tx,
            handle,
        });
    }

    /// Stop the background drain loop.
    ///
    /// Cancels the recurring timer between cycles; an in-flight drain runs
    /// to completion. A no-op when the queue is not running.
    pub async fn stop_processing(&self) {
        let mut runner = self.runner.lock().await;
        if let Some(runner) = runner.take() {
            let _ = runner.shutdown.send(true);
            if let Err(e) = runner.handle.await {
                error!(error = %e, "Queue processor task failed");
            }
        }
    }

    /// Aggregate per-status counters from the store.
    pub async fn get_queue_stats(&self) -> NotificationResult<QueueStats> {
        let counts = self.repository.status_counts().await?;
        Ok(counts.into())
    }

    /// Re-queue recently failed records.
    ///
    /// Only failed records attempted within the last 24 hours and still
    /// under the attempt limit return to the queue; older records can be
    /// retried individually through tracking. Per-record requeue errors are
    /// collected, never thrown.
    pub async fn retry_failed_emails(&self) -> NotificationResult<BulkRetryReport> {
        let cutoff = Utc::now() - ChronoDuration::hours(BULK_RETRY_WINDOW_HOURS);
        let failed = self.repository.find_failed_since(cutoff).await?;

        let mut report = BulkRetryReport::default();
        for record in failed {
            if record.attempts >= self.config.max_attempts as i32 {
                debug!(
                    notification_id = %record.id,
                    attempts = record.attempts,
                    "Skipping retry, attempt limit reached"
                );
                continue;
            }

            match self.repository.requeue_failed(record.id, Utc::now()).await {
                Ok(true) => report.retried += 1,
                // The record changed state under us; nothing to do.
                Ok(false) => {}
                Err(e) => report.errors.push(format!("{}: {}", record.id, e)),
            }
        }

        info!(
            retried = report.retried,
            errors = report.errors.len(),
            "Re-queued failed emails"
        );
        Ok(report)
    }

    /// Purge delivered/failed records older than the threshold.
    ///
    /// Queued and in-flight records are never purged regardless of age.
    pub async fn clear_old_emails(&self, older_than_days: Option<u32>) -> NotificationResult<u64> {
        let days = older_than_days.unwrap_or(DEFAULT_QUEUE_RETENTION_DAYS);
        let cutoff = Utc::now() - ChronoDuration::days(days as i64);

        let deleted = self.repository.delete_terminal_before(cutoff).await?;

        info!(deleted, older_than_days = days, "Cleared old email records");
        Ok(deleted)
    }
}

impl<R, P, U> Clone for EmailQueue<R, P, U> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            provider: Arc::clone(&self.provider),
            users: Arc::clone(&self.users),
            config: self.config.clone(),
            draining: Arc::clone(&self.draining),
            runner: Arc::clone(&self.runner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EmailCategory, EmailStatus};
    use crate::providers::MockProvider;
    use crate::repository::MockNotificationRepository;
    use crate::users::StaticUserDirectory;
    use chrono::{DateTime, Utc};

    fn failed_record(attempts: i32) -> NotificationRecord {
        NotificationRecord {
            id: Uuid::new_v4(),
            recipient_user_id: Uuid::new_v4(),
            category: EmailCategory::Reminder,
            subject: "Session reminder".to_string(),
            html_body: "<p>Reminder</p>".to_string(),
            text_body: "Reminder".to_string(),
            status: EmailStatus::Failed,
            error_message: Some("bounce".to_string()),
            attempts,
            scheduled_at: Utc::now(),
            last_attempt_at: Some(Utc::now()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_queue_config_defaults() {
        let config = QueueConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.retry_delay, Duration::from_secs(300));
        assert_eq!(config.processing_interval, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_bulk_retry_skips_records_at_attempt_limit() {
        let exhausted = failed_record(3);
        let retryable = failed_record(1);
        let retryable_id = retryable.id;

        let mut repo = MockNotificationRepository::new();
        repo.expect_find_failed_since()
            .returning(move |_| Ok(vec![exhausted.clone(), retryable.clone()]));
        repo.expect_requeue_failed()
            .withf(move |id, _| *id == retryable_id)
            .times(1)
            .returning(|_, _| Ok(true));

        let queue = EmailQueue::new(
            repo,
            MockProvider::new(),
            StaticUserDirectory::new(),
            QueueConfig::default(),
        );

        let report = queue.retry_failed_emails().await.unwrap();
        assert_eq!(report.retried, 1);
        assert!(report.errors.is_empty());
    }

    #[tokio::test]
    async fn test_bulk_retry_collects_per_record_errors() {
        let record = failed_record(1);

        let mut repo = MockNotificationRepository::new();
        repo.expect_find_failed_since()
            .returning(move |_| Ok(vec![record.clone()]));
        repo.expect_requeue_failed()
            .returning(|_, _| Err(NotificationError::Persistence("connection reset".to_string())));

        let queue = EmailQueue::new(
            repo,
            MockProvider::new(),
            StaticUserDirectory::new(),
            QueueConfig::default(),
        );

        let report = queue.retry_failed_emails().await.unwrap();
        assert_eq!(report.retried, 0);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("connection reset"));
    }

    #[tokio::test]
    async fn test_bulk_retry_window_is_24_hours() {
        let mut repo = MockNotificationRepository::new();
        repo.expect_find_failed_since()
            .withf(|cutoff: &DateTime<Utc>| {
                let age = Utc::now() - *cutoff;
                age > ChronoDuration::hours(23) && age < ChronoDuration::hours(25)
            })
            .times(1)
            .returning(|_| Ok(vec![]));

        let queue = EmailQueue::new(
            repo,
            MockProvider::new(),
            StaticUserDirectory::new(),
            QueueConfig::default(),
        );

        let report = queue.retry_failed_emails().await.unwrap();
        assert_eq!(report.retried, 0);
    }

    #[tokio::test]
    async fn test_clear_old_emails_uses_default_threshold() {
        let mut repo = MockNotificationRepository::new();
        repo.expect_delete_terminal_before()
            .withf(|cutoff: &DateTime<Utc>| {
                let age = Utc::now() - *cutoff;
                age > ChronoDuration::days(29) && age < ChronoDuration::days(31)
            })
            .times(1)
            .returning(|_| Ok(4));

        let queue = EmailQueue::new(
            repo,
            MockProvider::new(),
            StaticUserDirectory::new(),
            QueueConfig::default(),
        );

        let deleted = queue.clear_old_emails(None).await.unwrap();
        assert_eq!(deleted, 4);
    }
}
