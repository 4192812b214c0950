//! Recipient lookup.
//!
//! The pipeline stores only a weak user reference per record; the address
//! is resolved through the `UserDirectory` collaborator at send time. The
//! platform's `users` table is owned by the accounts schema, so the
//! Postgres implementation is a read-only query, not an entity.

use async_trait::async_trait;
use sea_orm::{DatabaseConnection, DbBackend, FromQueryResult, Statement};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::NotificationResult;

/// Minimal recipient contact details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactInfo {
    pub email: String,
    pub display_name: String,
}

/// Trait for resolving a user id to contact details.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Look up contact details; `None` when the user does not exist.
    async fn contact_info(&self, user_id: Uuid) -> NotificationResult<Option<ContactInfo>>;
}

/// In-memory directory for tests and local development.
#[derive(Clone, Default)]
pub struct StaticUserDirectory {
    users: Arc<RwLock<HashMap<Uuid, ContactInfo>>>,
}

impl StaticUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user.
    pub async fn insert(&self, user_id: Uuid, email: impl Into<String>, name: impl Into<String>) {
        self.users.write().await.insert(
            user_id,
            ContactInfo {
                email: email.into(),
                display_name: name.into(),
            },
        );
    }
}

#[async_trait]
impl UserDirectory for StaticUserDirectory {
    async fn contact_info(&self, user_id: Uuid) -> NotificationResult<Option<ContactInfo>> {
        Ok(self.users.read().await.get(&user_id).cloned())
    }
}

/// Read-only directory over the platform's `users` table.
pub struct PgUserDirectory {
    db: DatabaseConnection,
}

impl PgUserDirectory {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[derive(Debug, FromQueryResult)]
struct ContactRow {
    email: String,
    name: String,
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn contact_info(&self, user_id: Uuid) -> NotificationResult<Option<ContactInfo>> {
        let row = ContactRow::find_by_statement(Statement::from_sql_and_values(
            DbBackend::Postgres,
            "SELECT email, name FROM users WHERE id = $1",
            [user_id.into()],
        ))
        .one(&self.db)
        .await?;

        Ok(row.map(|r| ContactInfo {
            email: r.email,
            display_name: r.name,
        }))
    }
}
