//! Sea-ORM entities for the notification tables.

/// Entity for the `email_notifications` table.
pub mod notification {
    use crate::models::{EmailCategory, EmailStatus, NotificationRecord};
    use sea_orm::ActiveValue::Set;
    use sea_orm::entity::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "email_notifications")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,
        pub recipient_user_id: Uuid,
        pub category: EmailCategory,
        pub subject: String,
        #[sea_orm(column_type = "Text")]
        pub html_body: String,
        #[sea_orm(column_type = "Text")]
        pub text_body: String,
        pub status: EmailStatus,
        pub error_message: Option<String>,
        pub attempts: i32,
        pub scheduled_at: DateTimeWithTimeZone,
        pub last_attempt_at: Option<DateTimeWithTimeZone>,
        pub created_at: DateTimeWithTimeZone,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}

    impl From<Model> for NotificationRecord {
        fn from(model: Model) -> Self {
            Self {
                id: model.id,
                recipient_user_id: model.recipient_user_id,
                category: model.category,
                subject: model.subject,
                html_body: model.html_body,
                text_body: model.text_body,
                status: model.status,
                error_message: model.error_message,
                attempts: model.attempts,
                scheduled_at: model.scheduled_at.into(),
                last_attempt_at: model.last_attempt_at.map(Into::into),
                created_at: model.created_at.into(),
            }
        }
    }

    impl From<NotificationRecord> for ActiveModel {
        fn from(record: NotificationRecord) -> Self {
            ActiveModel {
                id: Set(record.id),
                recipient_user_id: Set(record.recipient_user_id),
                category: Set(record.category),
                subject: Set(record.subject),
                html_body: Set(record.html_body),
                text_body: Set(record.text_body),
                status: Set(record.status),
                error_message: Set(record.error_message),
                attempts: Set(record.attempts),
                scheduled_at: Set(record.scheduled_at.into()),
                last_attempt_at: Set(record.last_attempt_at.map(Into::into)),
                created_at: Set(record.created_at.into()),
            }
        }
    }
}

/// Entity for the append-only `email_events` tracking table.
pub mod event {
    use crate::models::{EmailCategory, EmailEvent, EmailStatus};
    use sea_orm::ActiveValue::Set;
    use sea_orm::entity::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "email_events")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,
        pub notification_id: Option<Uuid>,
        pub category: EmailCategory,
        pub status: EmailStatus,
        pub occurred_at: DateTimeWithTimeZone,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}

    impl From<Model> for EmailEvent {
        fn from(model: Model) -> Self {
            Self {
                id: model.id,
                notification_id: model.notification_id,
                category: model.category,
                status: model.status,
                occurred_at: model.occurred_at.into(),
            }
        }
    }

    impl From<EmailEvent> for ActiveModel {
        fn from(event: EmailEvent) -> Self {
            ActiveModel {
                id: Set(event.id),
                notification_id: Set(event.notification_id),
                category: Set(event.category),
                status: Set(event.status),
                occurred_at: Set(event.occurred_at.into()),
            }
        }
    }
}
