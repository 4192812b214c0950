use sea_orm_migration::sea_query::extension::postgres::Type;
use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Create email_category enum
        manager
            .create_type(
                Type::create()
                    .as_enum(EmailCategory::Enum)
                    .values([
                        EmailCategory::Welcome,
                        EmailCategory::Approval,
                        EmailCategory::Rejection,
                        EmailCategory::Reminder,
                        EmailCategory::NewsletterWelcome,
                        EmailCategory::Digest,
                        EmailCategory::Marketing,
                        EmailCategory::Report,
                        EmailCategory::System,
                    ])
                    .to_owned(),
            )
            .await?;

        // Create email_status enum
        manager
            .create_type(
                Type::create()
                    .as_enum(EmailStatus::Enum)
                    .values([
                        EmailStatus::Queued,
                        EmailStatus::Sending,
                        EmailStatus::Delivered,
                        EmailStatus::Failed,
                        EmailStatus::Opened,
                        EmailStatus::Clicked,
                    ])
                    .to_owned(),
            )
            .await?;

        // Create email_notifications table
        manager
            .create_table(
                Table::create()
                    .table(EmailNotifications::Table)
                    .if_not_exists()
                    .col(pk_uuid(EmailNotifications::Id))
                    .col(uuid(EmailNotifications::RecipientUserId))
                    .col(
                        ColumnDef::new(EmailNotifications::Category)
                            .enumeration(
                                EmailCategory::Enum,
                                [
                                    EmailCategory::Welcome,
                                    EmailCategory::Approval,
                                    EmailCategory::Rejection,
                                    EmailCategory::Reminder,
                                    EmailCategory::NewsletterWelcome,
                                    EmailCategory::Digest,
                                    EmailCategory::Marketing,
                                    EmailCategory::Report,
                                    EmailCategory::System,
                                ],
                            )
                            .not_null(),
                    )
                    .col(string(EmailNotifications::Subject))
                    .col(text(EmailNotifications::HtmlBody))
                    .col(text(EmailNotifications::TextBody))
                    .col(
                        ColumnDef::new(EmailNotifications::Status)
                            .enumeration(
                                EmailStatus::Enum,
                                [
                                    EmailStatus::Queued,
                                    EmailStatus::Sending,
                                    EmailStatus::Delivered,
                                    EmailStatus::Failed,
                                    EmailStatus::Opened,
                                    EmailStatus::Clicked,
                                ],
                            )
                            .not_null()
                            .default("queued"),
                    )
                    .col(string_null(EmailNotifications::ErrorMessage))
                    .col(integer(EmailNotifications::Attempts).default(0))
                    .col(timestamp_with_time_zone(EmailNotifications::ScheduledAt))
                    .col(timestamp_with_time_zone_null(
                        EmailNotifications::LastAttemptAt,
                    ))
                    .col(
                        timestamp_with_time_zone(EmailNotifications::CreatedAt)
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // The drain loop selects queued records by scheduled time.
        manager
            .create_index(
                Index::create()
                    .name("idx_email_notifications_status_scheduled_at")
                    .table(EmailNotifications::Table)
                    .col(EmailNotifications::Status)
                    .col(EmailNotifications::ScheduledAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_email_notifications_recipient_user_id")
                    .table(EmailNotifications::Table)
                    .col(EmailNotifications::RecipientUserId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_email_notifications_created_at")
                    .table(EmailNotifications::Table)
                    .col(EmailNotifications::CreatedAt)
                    .to_owned(),
            )
            .await?;

        // Create email_events table
        manager
            .create_table(
                Table::create()
                    .table(EmailEvents::Table)
                    .if_not_exists()
                    .col(pk_uuid(EmailEvents::Id))
                    .col(uuid_null(EmailEvents::NotificationId))
                    .col(
                        ColumnDef::new(EmailEvents::Category)
                            .enumeration(
                                EmailCategory::Enum,
                                [
                                    EmailCategory::Welcome,
                                    EmailCategory::Approval,
                                    EmailCategory::Rejection,
                                    EmailCategory::Reminder,
                                    EmailCategory::NewsletterWelcome,
                                    EmailCategory::Digest,
                                    EmailCategory::Marketing,
                                    EmailCategory::Report,
                                    EmailCategory::System,
                                ],
                            )
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(EmailEvents::Status)
                            .enumeration(
                                EmailStatus::Enum,
                                [
                                    EmailStatus::Queued,
                                    EmailStatus::Sending,
                                    EmailStatus::Delivered,
                                    EmailStatus::Failed,
                                    EmailStatus::Opened,
                                    EmailStatus::Clicked,
                                ],
                            )
                            .not_null(),
                    )
                    .col(
                        timestamp_with_time_zone(EmailEvents::OccurredAt)
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_email_events_notification_id")
                    .table(EmailEvents::Table)
                    .col(EmailEvents::NotificationId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_email_events_occurred_at")
                    .table(EmailEvents::Table)
                    .col(EmailEvents::OccurredAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(EmailEvents::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(EmailNotifications::Table).to_owned())
            .await?;

        manager
            .drop_type(Type::drop().name(EmailStatus::Enum).to_owned())
            .await?;

        manager
            .drop_type(Type::drop().name(EmailCategory::Enum).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum EmailNotifications {
    Table,
    Id,
    RecipientUserId,
    Category,
    Subject,
    HtmlBody,
    TextBody,
    Status,
    ErrorMessage,
    Attempts,
    ScheduledAt,
    LastAttemptAt,
    CreatedAt,
}

#[derive(DeriveIden)]
enum EmailEvents {
    Table,
    Id,
    NotificationId,
    Category,
    Status,
    OccurredAt,
}

#[derive(DeriveIden)]
enum EmailCategory {
    #[sea_orm(iden = "email_category")]
    Enum,
    #[sea_orm(iden = "welcome")]
    Welcome,
    #[sea_orm(iden = "approval")]
    Approval,
    #[sea_orm(iden = "rejection")]
    Rejection,
    #[sea_orm(iden = "reminder")]
    Reminder,
    #[sea_orm(iden = "newsletter_welcome")]
    NewsletterWelcome,
    #[sea_orm(iden = "digest")]
    Digest,
    #[sea_orm(iden = "marketing")]
    Marketing,
    #[sea_orm(iden = "report")]
    Report,
    #[sea_orm(iden = "system")]
    System,
}

#[derive(DeriveIden)]
enum EmailStatus {
    #[sea_orm(iden = "email_status")]
    Enum,
    #[sea_orm(iden = "queued")]
    Queued,
    #[sea_orm(iden = "sending")]
    Sending,
    #[sea_orm(iden = "delivered")]
    Delivered,
    #[sea_orm(iden = "failed")]
    Failed,
    #[sea_orm(iden = "opened")]
    Opened,
    #[sea_orm(iden = "clicked")]
    Clicked,
}
