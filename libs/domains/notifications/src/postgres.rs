//! PostgreSQL-backed notification repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use uuid::Uuid;

use crate::entity::{event, notification};
use crate::error::{NotificationError, NotificationResult};
use crate::models::{
    EmailEvent, EmailStatus, NewNotification, NotificationRecord, StatusCounts,
};
use crate::repository::NotificationRepository;

pub struct PgNotificationRepository {
    db: DatabaseConnection,
}

impl PgNotificationRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl NotificationRepository for PgNotificationRepository {
    async fn insert(
        &self,
        input: NewNotification,
        scheduled_at: DateTime<Utc>,
    ) -> NotificationResult<NotificationRecord> {
        let record = NotificationRecord::new_queued(input, scheduled_at);
        let active: notification::ActiveModel = record.into();

        let model = active.insert(&self.db).await?;

        tracing::debug!(notification_id = %model.id, "Created notification record");
        Ok(model.into())
    }

    async fn insert_many(
        &self,
        inputs: Vec<NewNotification>,
        scheduled_at: DateTime<Utc>,
    ) -> NotificationResult<Vec<NotificationRecord>> {
        let txn = self.db.begin().await?;

        let mut created = Vec::with_capacity(inputs.len());
        for input in inputs {
            let record = NotificationRecord::new_queued(input, scheduled_at);
            let active: notification::ActiveModel = record.into();
            let model = active.insert(&txn).await?;
            created.push(model.into());
        }

        txn.commit().await?;

        tracing::debug!(count = created.len(), "Created notification batch");
        Ok(created)
    }

    async fn find_by_id(&self, id: Uuid) -> NotificationResult<Option<NotificationRecord>> {
        let model = notification::Entity::find_by_id(id).one(&self.db).await?;
        Ok(model.map(Into::into))
    }

    async fn claim_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> NotificationResult<Vec<NotificationRecord>> {
        let candidates = notification::Entity::find()
            .filter(notification::Column::Status.eq(EmailStatus::Queued))
            .filter(notification::Column::ScheduledAt.lte(now))
            .order_by_asc(notification::Column::ScheduledAt)
            .limit(limit as u64)
            .all(&self.db)
            .await?;

        // Conditional per-record update: the status guard makes the claim a
        // store-level mutual exclusion point, so concurrent drains (even in
        // other processes) each win a disjoint subset.
        let mut claimed = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let result = notification::Entity::update_many()
                .set(notification::ActiveModel {
                    status: Set(EmailStatus::Sending),
                    last_attempt_at: Set(Some(now.into())),
                    attempts: Set(candidate.attempts + 1),
                    ..Default::default()
                })
                .filter(notification::Column::Id.eq(candidate.id))
                .filter(notification::Column::Status.eq(EmailStatus::Queued))
                .exec(&self.db)
                .await?;

            if result.rows_affected == 1 {
                let mut record: NotificationRecord = candidate.into();
                record.status = EmailStatus::Sending;
                record.last_attempt_at = Some(now);
                record.attempts += 1;
                claimed.push(record);
            }
        }

        Ok(claimed)
    }

    async fn release_stale(&self, stuck_before: DateTime<Utc>) -> NotificationResult<u64> {
        let result = notification::Entity::update_many()
            .set(notification::ActiveModel {
                status: Set(EmailStatus::Queued),
                ..Default::default()
            })
            .filter(notification::Column::Status.eq(EmailStatus::Sending))
            .filter(notification::Column::LastAttemptAt.lt(stuck_before))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected)
    }

    async fn mark_delivered(&self, id: Uuid, _at: DateTime<Utc>) -> NotificationResult<()> {
        let result = notification::Entity::update_many()
            .set(notification::ActiveModel {
                status: Set(EmailStatus::Delivered),
                error_message: Set(None),
                ..Default::default()
            })
            .filter(notification::Column::Id.eq(id))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(NotificationError::NotFound(id));
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        error: String,
        _at: DateTime<Utc>,
    ) -> NotificationResult<()> {
        let result = notification::Entity::update_many()
            .set(notification::ActiveModel {
                status: Set(EmailStatus::Failed),
                error_message: Set(Some(error)),
                ..Default::default()
            })
            .filter(notification::Column::Id.eq(id))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(NotificationError::NotFound(id));
        }
        Ok(())
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: EmailStatus,
        error: Option<String>,
    ) -> NotificationResult<NotificationRecord> {
        let model = notification::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or(NotificationError::NotFound(id))?;

        let mut active = model.into_active_model();
        active.status = Set(status);
        active.error_message = Set(if status == EmailStatus::Failed {
            error
        } else {
            None
        });

        let updated = active.update(&self.db).await?;

        tracing::debug!(notification_id = %id, status = %status, "Updated notification status");
        Ok(updated.into())
    }

    async fn requeue_failed(
        &self,
        id: Uuid,
        scheduled_at: DateTime<Utc>,
    ) -> NotificationResult<bool> {
        let result = notification::Entity::update_many()
            .set(notification::ActiveModel {
                status: Set(EmailStatus::Queued),
                error_message: Set(None),
                scheduled_at: Set(scheduled_at.into()),
                ..Default::default()
            })
            .filter(notification::Column::Id.eq(id))
            .filter(notification::Column::Status.eq(EmailStatus::Failed))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected == 1)
    }

    async fn find_failed_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> NotificationResult<Vec<NotificationRecord>> {
        let models = notification::Entity::find()
            .filter(notification::Column::Status.eq(EmailStatus::Failed))
            .filter(notification::Column::LastAttemptAt.gte(cutoff))
            .order_by_desc(notification::Column::LastAttemptAt)
            .all(&self.db)
            .await?;

        Ok(models.into_iter().map(Into::into).collect())
    }

    async fn status_counts(&self) -> NotificationResult<StatusCounts> {
        let mut counts = StatusCounts::default();
        for status in [
            EmailStatus::Queued,
            EmailStatus::Sending,
            EmailStatus::Delivered,
            EmailStatus::Failed,
            EmailStatus::Opened,
            EmailStatus::Clicked,
        ] {
            let count = notification::Entity::find()
                .filter(notification::Column::Status.eq(status))
                .count(&self.db)
                .await?;
            match status {
                EmailStatus::Queued => counts.queued = count,
                EmailStatus::Sending => counts.sending = count,
                EmailStatus::Delivered => counts.delivered = count,
                EmailStatus::Failed => counts.failed = count,
                EmailStatus::Opened => counts.opened = count,
                EmailStatus::Clicked => counts.clicked = count,
            }
        }
        Ok(counts)
    }

    async fn list_between(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> NotificationResult<Vec<NotificationRecord>> {
        let mut query = notification::Entity::find();

        if let Some(start) = start {
            query = query.filter(notification::Column::CreatedAt.gte(start));
        }
        if let Some(end) = end {
            query = query.filter(notification::Column::CreatedAt.lte(end));
        }

        let models = query
            .order_by_asc(notification::Column::CreatedAt)
            .all(&self.db)
            .await?;

        Ok(models.into_iter().map(Into::into).collect())
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> NotificationResult<u64> {
        let result = notification::Entity::delete_many()
            .filter(
                notification::Column::Status
                    .is_in([EmailStatus::Delivered, EmailStatus::Failed]),
            )
            .filter(notification::Column::CreatedAt.lt(cutoff))
            .exec(&self.db)
            .await?;

        Ok(result.rows_affected)
    }

    async fn append_event(&self, event: EmailEvent) -> NotificationResult<()> {
        let active: event::ActiveModel = event.into();
        active.insert(&self.db).await?;
        Ok(())
    }
}
