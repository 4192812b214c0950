//! Integration tests for the email pipeline.
//!
//! These tests run the queue and tracking services against the in-memory
//! repository and the mock provider to cover end-to-end behavior:
//! - queue → drain → delivery outcome round trips
//! - batch bounds and FIFO ordering
//! - failure recording and retry paths
//! - concurrent drain short-circuiting
//! - retention sweeps

use chrono::{Duration as ChronoDuration, Utc};
use domain_notifications::{
    EmailCategory, EmailQueue, EmailStatus, EmailTracking, InMemoryNotificationRepository,
    MockProvider, NewNotification, NotificationRepository, QueueConfig, StaticUserDirectory,
};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

type TestQueue = EmailQueue<InMemoryNotificationRepository, MockProvider, StaticUserDirectory>;

struct Harness {
    queue: TestQueue,
    repo: Arc<InMemoryNotificationRepository>,
    provider: Arc<MockProvider>,
    users: Arc<StaticUserDirectory>,
    user_id: Uuid,
}

async fn harness(provider: MockProvider, config: QueueConfig) -> Harness {
    let repo = Arc::new(InMemoryNotificationRepository::new());
    let provider = Arc::new(provider);
    let users = Arc::new(StaticUserDirectory::new());

    let user_id = Uuid::new_v4();
    users.insert(user_id, "mentee@example.com", "Sam Mentee").await;

    let queue = EmailQueue::with_arcs(
        Arc::clone(&repo),
        Arc::clone(&provider),
        Arc::clone(&users),
        config,
    );

    Harness {
        queue,
        repo,
        provider,
        users,
        user_id,
    }
}

fn welcome(recipient: Uuid) -> NewNotification {
    NewNotification {
        recipient_user_id: recipient,
        category: EmailCategory::Welcome,
        subject: "Welcome to Atrium".to_string(),
        html_body: "<p>Welcome!</p>".to_string(),
        text_body: "Welcome!".to_string(),
    }
}

#[tokio::test]
async fn test_add_then_process_delivers_email() {
    let h = harness(MockProvider::new(), QueueConfig::default()).await;

    let id = h.queue.add_email(welcome(h.user_id), None).await.unwrap();

    let queued = h.repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(queued.status, EmailStatus::Queued);
    assert!(queued.scheduled_at <= Utc::now());

    let report = h.queue.process_queue().await.unwrap();
    assert_eq!(report.processed, 1);
    assert_eq!(report.successful, 1);
    assert_eq!(report.failed, 0);

    let delivered = h.repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(delivered.status, EmailStatus::Delivered);
    assert!(delivered.error_message.is_none());
    assert!(h.provider.was_sent_to("mentee@example.com").await);

    let stats = h.queue.get_queue_stats().await.unwrap();
    assert_eq!(stats.successful, 1);
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.total, 1);
}

#[tokio::test]
async fn test_batch_size_bounds_each_drain() {
    let config = QueueConfig {
        batch_size: 10,
        ..QueueConfig::default()
    };
    let h = harness(MockProvider::new(), config).await;

    let inputs: Vec<NewNotification> = (0..15).map(|_| welcome(h.user_id)).collect();
    let ids = h.queue.add_bulk_emails(inputs, None).await.unwrap();
    assert_eq!(ids.len(), 15);

    let first = h.queue.process_queue().await.unwrap();
    assert_eq!(first.processed, 10);

    let second = h.queue.process_queue().await.unwrap();
    assert_eq!(second.processed, 5);

    let third = h.queue.process_queue().await.unwrap();
    assert_eq!(third.processed, 0);

    assert_eq!(h.provider.sent_count().await, 15);
}

#[tokio::test]
async fn test_oldest_scheduled_records_drain_first() {
    let config = QueueConfig {
        batch_size: 1,
        ..QueueConfig::default()
    };
    let h = harness(MockProvider::new(), config).await;

    let now = Utc::now();
    let newer = h
        .queue
        .add_email(welcome(h.user_id), Some(now - ChronoDuration::minutes(1)))
        .await
        .unwrap();
    let older = h
        .queue
        .add_email(welcome(h.user_id), Some(now - ChronoDuration::minutes(10)))
        .await
        .unwrap();

    h.queue.process_queue().await.unwrap();
    assert_eq!(
        h.repo.find_by_id(older).await.unwrap().unwrap().status,
        EmailStatus::Delivered
    );
    assert_eq!(
        h.repo.find_by_id(newer).await.unwrap().unwrap().status,
        EmailStatus::Queued
    );
}

#[tokio::test]
async fn test_future_scheduled_records_are_not_drained() {
    let h = harness(MockProvider::new(), QueueConfig::default()).await;

    h.queue
        .add_email(welcome(h.user_id), Some(Utc::now() + ChronoDuration::hours(1)))
        .await
        .unwrap();

    let report = h.queue.process_queue().await.unwrap();
    assert_eq!(report.processed, 0);
    assert_eq!(h.provider.sent_count().await, 0);
}

#[tokio::test]
async fn test_rejected_delivery_marks_failed_and_bulk_retry_requeues() {
    let h = harness(MockProvider::rejecting("bounce"), QueueConfig::default()).await;

    let id = h.queue.add_email(welcome(h.user_id), None).await.unwrap();

    let report = h.queue.process_queue().await.unwrap();
    assert_eq!(report.failed, 1);

    let failed = h.repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(failed.status, EmailStatus::Failed);
    assert!(failed.error_message.as_deref().unwrap().contains("bounce"));

    let retry = h.queue.retry_failed_emails().await.unwrap();
    assert_eq!(retry.retried, 1);
    assert!(retry.errors.is_empty());

    let requeued = h.repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(requeued.status, EmailStatus::Queued);
    assert!(requeued.error_message.is_none());
}

#[tokio::test]
async fn test_provider_error_marks_failed() {
    let h = harness(MockProvider::erroring("credentials revoked"), QueueConfig::default()).await;

    let id = h.queue.add_email(welcome(h.user_id), None).await.unwrap();
    let report = h.queue.process_queue().await.unwrap();

    assert_eq!(report.failed, 1);
    let failed = h.repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(failed.status, EmailStatus::Failed);
    assert!(
        failed
            .error_message
            .as_deref()
            .unwrap()
            .contains("credentials revoked")
    );
}

#[tokio::test]
async fn test_unresolvable_recipient_fails_only_that_record() {
    let h = harness(MockProvider::new(), QueueConfig::default()).await;

    let known = h.queue.add_email(welcome(h.user_id), None).await.unwrap();
    let unknown = h
        .queue
        .add_email(welcome(Uuid::new_v4()), None)
        .await
        .unwrap();

    let report = h.queue.process_queue().await.unwrap();
    assert_eq!(report.processed, 2);
    assert_eq!(report.successful, 1);
    assert_eq!(report.failed, 1);

    assert_eq!(
        h.repo.find_by_id(known).await.unwrap().unwrap().status,
        EmailStatus::Delivered
    );
    let missing = h.repo.find_by_id(unknown).await.unwrap().unwrap();
    assert_eq!(missing.status, EmailStatus::Failed);
    assert!(
        missing
            .error_message
            .as_deref()
            .unwrap()
            .contains("User not found")
    );
}

#[tokio::test]
async fn test_slow_delivery_times_out_without_blocking_batch() {
    let config = QueueConfig {
        send_timeout: Duration::from_millis(50),
        ..QueueConfig::default()
    };
    let h = harness(
        MockProvider::new().with_delay(Duration::from_millis(200)),
        config,
    )
    .await;

    let id = h.queue.add_email(welcome(h.user_id), None).await.unwrap();

    let report = h.queue.process_queue().await.unwrap();
    assert_eq!(report.failed, 1);

    let failed = h.repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(failed.status, EmailStatus::Failed);
    assert!(failed.error_message.as_deref().unwrap().contains("timed out"));
}

#[tokio::test]
async fn test_concurrent_drains_short_circuit() {
    let h = harness(
        MockProvider::new().with_delay(Duration::from_millis(50)),
        QueueConfig::default(),
    )
    .await;

    for _ in 0..5 {
        h.queue.add_email(welcome(h.user_id), None).await.unwrap();
    }

    let first_queue = h.queue.clone();
    let first = tokio::spawn(async move { first_queue.process_queue().await.unwrap() });

    // Give the first drain time to claim the batch.
    tokio::time::sleep(Duration::from_millis(10)).await;

    let second = h.queue.process_queue().await.unwrap();
    assert_eq!(second.processed, 0);
    assert_eq!(second.successful, 0);
    assert_eq!(second.failed, 0);

    let first = first.await.unwrap();
    assert_eq!(first.processed, 5);
    assert_eq!(first.successful, 5);
    assert_eq!(h.provider.sent_count().await, 5);
}

#[tokio::test]
async fn test_retention_sweep_keeps_queued_records() {
    let h = harness(MockProvider::new(), QueueConfig::default()).await;

    let delivered = h.queue.add_email(welcome(h.user_id), None).await.unwrap();
    h.queue.process_queue().await.unwrap();

    // Scheduled in the future, so it stays queued through the drain.
    let queued = h
        .queue
        .add_email(welcome(h.user_id), Some(Utc::now() + ChronoDuration::hours(1)))
        .await
        .unwrap();

    // Zero-day threshold: every terminal record is old enough to purge.
    let deleted = h.queue.clear_old_emails(Some(0)).await.unwrap();
    assert_eq!(deleted, 1);

    assert!(h.repo.find_by_id(delivered).await.unwrap().is_none());
    assert!(h.repo.find_by_id(queued).await.unwrap().is_some());
}

#[tokio::test]
async fn test_background_processing_lifecycle() {
    let config = QueueConfig {
        processing_interval: Duration::from_millis(50),
        ..QueueConfig::default()
    };
    let h = harness(MockProvider::new(), config).await;

    let id = h.queue.add_email(welcome(h.user_id), None).await.unwrap();

    h.queue.start_processing().await;
    // Starting twice is a no-op.
    h.queue.start_processing().await;

    tokio::time::sleep(Duration::from_millis(200)).await;
    h.queue.stop_processing().await;

    assert_eq!(
        h.repo.find_by_id(id).await.unwrap().unwrap().status,
        EmailStatus::Delivered
    );

    // Records added after the stop are not drained.
    let late = h.queue.add_email(welcome(h.user_id), None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        h.repo.find_by_id(late).await.unwrap().unwrap().status,
        EmailStatus::Queued
    );

    // Stopping again is a no-op.
    h.queue.stop_processing().await;
}

#[tokio::test]
async fn test_tracking_over_processed_queue() {
    let h = harness(MockProvider::new(), QueueConfig::default()).await;
    let tracking = EmailTracking::with_arcs(Arc::clone(&h.repo), Arc::clone(&h.users));

    for _ in 0..3 {
        h.queue.add_email(welcome(h.user_id), None).await.unwrap();
    }
    h.queue.process_queue().await.unwrap();

    let analytics = tracking.get_email_analytics(None, None).await.unwrap();
    assert_eq!(analytics.total_emails, 3);
    assert_eq!(analytics.delivered, 3);
    assert_eq!(analytics.delivery_rate, 100.0);
    assert_eq!(analytics.failure_rate, 0.0);

    let stats = tracking.get_email_stats(None, None).await.unwrap();
    assert_eq!(stats.top_recipients.len(), 1);
    assert_eq!(stats.top_recipients[0].count, 3);
}

#[tokio::test]
async fn test_single_retry_then_successful_redelivery() {
    // First drain rejects, operator retries, second drain succeeds: the
    // provider starts rejecting and is replaced mid-test by re-wiring the
    // queue around the same repository.
    let repo = Arc::new(InMemoryNotificationRepository::new());
    let users = Arc::new(StaticUserDirectory::new());
    let user_id = Uuid::new_v4();
    users.insert(user_id, "mentor@example.com", "Avery Mentor").await;

    let rejecting_queue = EmailQueue::with_arcs(
        Arc::clone(&repo),
        Arc::new(MockProvider::rejecting("mailbox full")),
        Arc::clone(&users),
        QueueConfig::default(),
    );
    let tracking = EmailTracking::with_arcs(Arc::clone(&repo), Arc::clone(&users));

    let id = rejecting_queue
        .add_email(welcome(user_id), None)
        .await
        .unwrap();
    rejecting_queue.process_queue().await.unwrap();

    let failed = tracking.get_failed_emails().await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].recipient.as_ref().unwrap().email, "mentor@example.com");

    tracking.retry_failed_email(id).await.unwrap();

    let healthy_queue = EmailQueue::with_arcs(
        Arc::clone(&repo),
        Arc::new(MockProvider::new()),
        Arc::clone(&users),
        QueueConfig::default(),
    );
    let report = healthy_queue.process_queue().await.unwrap();
    assert_eq!(report.successful, 1);

    let record = repo.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(record.status, EmailStatus::Delivered);
    assert_eq!(record.attempts, 2);
}
