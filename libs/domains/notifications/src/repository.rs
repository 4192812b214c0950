//! Notification store access.
//!
//! The `NotificationRepository` trait is the persistence boundary of the
//! pipeline. Implementations exist for PostgreSQL (`PgNotificationRepository`)
//! and in-memory storage (`InMemoryNotificationRepository`, used by tests
//! and local development).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{NotificationError, NotificationResult};
use crate::models::{
    EmailEvent, EmailStatus, NewNotification, NotificationRecord, StatusCounts,
};

/// Repository trait for notification persistence.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// Persist a new queued record and return it with its id.
    async fn insert(
        &self,
        input: NewNotification,
        scheduled_at: DateTime<Utc>,
    ) -> NotificationResult<NotificationRecord>;

    /// Persist a batch of queued records atomically.
    ///
    /// Either the whole batch is persisted or the call fails; the returned
    /// records carry the exact ids assigned at insert time, in input order.
    async fn insert_many(
        &self,
        inputs: Vec<NewNotification>,
        scheduled_at: DateTime<Utc>,
    ) -> NotificationResult<Vec<NotificationRecord>>;

    /// Fetch a record by id.
    async fn find_by_id(&self, id: Uuid) -> NotificationResult<Option<NotificationRecord>>;

    /// Claim up to `limit` due records for delivery.
    ///
    /// Selects queued records with `scheduled_at <= now`, oldest first, and
    /// conditionally transitions each to `Sending`, stamping
    /// `last_attempt_at` and incrementing `attempts`. The transition is
    /// guarded on the record still being queued, so a record is handed to
    /// at most one claimant even across processes.
    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> NotificationResult<Vec<NotificationRecord>>;

    /// Release abandoned claims back to the queue.
    ///
    /// `Sending` records whose `last_attempt_at` is before `stuck_before`
    /// return to `Queued`. Returns the number of released records.
    async fn release_stale(&self, stuck_before: DateTime<Utc>) -> NotificationResult<u64>;

    /// Record a successful delivery outcome.
    async fn mark_delivered(&self, id: Uuid, at: DateTime<Utc>) -> NotificationResult<()>;

    /// Record a failed delivery outcome with its reason.
    async fn mark_failed(
        &self,
        id: Uuid,
        error: String,
        at: DateTime<Utc>,
    ) -> NotificationResult<()>;

    /// Apply an arbitrary status transition.
    ///
    /// `error` is stored only when the new status is `Failed`; any previous
    /// error message is cleared otherwise. Fails with `NotFound` when the
    /// id does not exist.
    async fn set_status(
        &self,
        id: Uuid,
        status: EmailStatus,
        error: Option<String>,
    ) -> NotificationResult<NotificationRecord>;

    /// Conditionally return a failed record to the queue.
    ///
    /// Clears the error message and sets a fresh `scheduled_at`. Returns
    /// `false` when the record is not currently failed.
    async fn requeue_failed(
        &self,
        id: Uuid,
        scheduled_at: DateTime<Utc>,
    ) -> NotificationResult<bool>;

    /// Failed records whose last attempt was at or after `cutoff`,
    /// most recent first.
    async fn find_failed_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> NotificationResult<Vec<NotificationRecord>>;

    /// Per-status record counts.
    async fn status_counts(&self) -> NotificationResult<StatusCounts>;

    /// Records created inside the optional window, oldest first.
    async fn list_between(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> NotificationResult<Vec<NotificationRecord>>;

    /// Unified retention sweep: delete delivered/failed records created
    /// before `cutoff`. Queued, in-flight, opened, and clicked records are
    /// never deleted. Returns the number of deleted records.
    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> NotificationResult<u64>;

    /// Append a tracking event.
    async fn append_event(&self, event: EmailEvent) -> NotificationResult<()>;
}

/// In-memory implementation backed by a `HashMap`.
#[derive(Clone, Default)]
pub struct InMemoryNotificationRepository {
    records: Arc<RwLock<HashMap<Uuid, NotificationRecord>>>,
    events: Arc<RwLock<Vec<EmailEvent>>>,
}

impl InMemoryNotificationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// All tracking events appended so far.
    pub async fn events(&self) -> Vec<EmailEvent> {
        self.events.read().await.clone()
    }
}

#[async_trait]
impl NotificationRepository for InMemoryNotificationRepository {
    async fn insert(
        &self,
        input: NewNotification,
        scheduled_at: DateTime<Utc>,
    ) -> NotificationResult<NotificationRecord> {
        let record = NotificationRecord::new_queued(input, scheduled_at);
        self.records
            .write()
            .await
            .insert(record.id, record.clone());
        Ok(record)
    }

    async fn insert_many(
        &self,
        inputs: Vec<NewNotification>,
        scheduled_at: DateTime<Utc>,
    ) -> NotificationResult<Vec<NotificationRecord>> {
        let mut records = self.records.write().await;
        let mut created = Vec::with_capacity(inputs.len());
        for input in inputs {
            let record = NotificationRecord::new_queued(input, scheduled_at);
            records.insert(record.id, record.clone());
            created.push(record);
        }
        Ok(created)
    }

    async fn find_by_id(&self, id: Uuid) -> NotificationResult<Option<NotificationRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> NotificationResult<Vec<NotificationRecord>> {
        let mut records = self.records.write().await;

        let mut due: Vec<(DateTime<Utc>, Uuid)> = records
            .values()
            .filter(|r| r.status == EmailStatus::Queued && r.scheduled_at <= now)
            .map(|r| (r.scheduled_at, r.id))
            .collect();
        due.sort();
        due.truncate(limit);

        let mut claimed = Vec::with_capacity(due.len());
        for (_, id) in due {
            if let Some(record) = records.get_mut(&id) {
                record.status = EmailStatus::Sending;
                record.last_attempt_at = Some(now);
                record.attempts += 1;
                claimed.push(record.clone());
            }
        }
        Ok(claimed)
    }

    async fn release_stale(&self, stuck_before: DateTime<Utc>) -> NotificationResult<u64> {
        let mut records = self.records.write().await;
        let mut released = 0;
        for record in records.values_mut() {
            if record.status == EmailStatus::Sending
                && record.last_attempt_at.is_some_and(|at| at < stuck_before)
            {
                record.status = EmailStatus::Queued;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn mark_delivered(&self, id: Uuid, _at: DateTime<Utc>) -> NotificationResult<()> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or(NotificationError::NotFound(id))?;
        record.status = EmailStatus::Delivered;
        record.error_message = None;
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error: String,
        _at: DateTime<Utc>,
    ) -> NotificationResult<()> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or(NotificationError::NotFound(id))?;
        record.status = EmailStatus::Failed;
        record.error_message = Some(error);
        Ok(())
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: EmailStatus,
        error: Option<String>,
    ) -> NotificationResult<NotificationRecord> {
        let mut records = self.records.write().await;
        let record = records.get_mut(&id).ok_or(NotificationError::NotFound(id))?;
        record.status = status;
        record.error_message = if status == EmailStatus::Failed {
            error
        } else {
            None
        };
        Ok(record.clone())
    }

    async fn requeue_failed(
        &self,
        id: Uuid,
        scheduled_at: DateTime<Utc>,
    ) -> NotificationResult<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(&id) {
            Some(record) if record.status == EmailStatus::Failed => {
                record.status = EmailStatus::Queued;
                record.error_message = None;
                record.scheduled_at = scheduled_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_failed_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> NotificationResult<Vec<NotificationRecord>> {
        let records = self.records.read().await;
        let mut failed: Vec<NotificationRecord> = records
            .values()
            .filter(|r| {
                r.status == EmailStatus::Failed
                    && r.last_attempt_at.is_some_and(|at| at >= cutoff)
            })
            .cloned()
            .collect();
        failed.sort_by(|a, b| b.last_attempt_at.cmp(&a.last_attempt_at));
        Ok(failed)
    }

    async fn status_counts(&self) -> NotificationResult<StatusCounts> {
        let records = self.records.read().await;
        let mut counts = StatusCounts::default();
        for record in records.values() {
            match record.status {
                EmailStatus::Queued => counts.queued += 1,
                EmailStatus::Sending => counts.sending += 1,
                EmailStatus::Delivered => counts.delivered += 1,
                EmailStatus::Failed => counts.failed += 1,
                EmailStatus::Opened => counts.opened += 1,
                EmailStatus::Clicked => counts.clicked += 1,
            }
        }
        Ok(counts)
    }

    async fn list_between(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> NotificationResult<Vec<NotificationRecord>> {
        let records = self.records.read().await;
        let mut matching: Vec<NotificationRecord> = records
            .values()
            .filter(|r| {
                start.is_none_or(|s| r.created_at >= s) && end.is_none_or(|e| r.created_at <= e)
            })
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.created_at);
        Ok(matching)
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> NotificationResult<u64> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| !(r.status.is_purgeable() && r.created_at < cutoff));
        Ok((before - records.len()) as u64)
    }

    async fn append_event(&self, event: EmailEvent) -> NotificationResult<()> {
        self.events.write().await.push(event);
        Ok(())
    }
}
