use std::{collections::HashMap, sync::RwLock};

use async_trait::async_trait;
use sqlx::PgPool;

use shared::models::SenderSummary;

use super::StoreError;

/// Read-only view of marketplace users.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// `Ok(None)` when the user does not exist.
    async fn resolve_user(&self, user_id: &str) -> Result<Option<SenderSummary>, StoreError>;
}

#[derive(Debug, Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn resolve_user(&self, user_id: &str) -> Result<Option<SenderSummary>, StoreError> {
        let row = sqlx::query_as::<_, (String, String)>(
            "SELECT id, display_name FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, display_name)| SenderSummary::new(id, display_name)))
    }
}

/// In-process directory.
///
/// An open directory resolves any identifier, using the identifier itself as
/// the display name; a closed one knows only inserted users.
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<String, SenderSummary>>,
    open: bool,
}

impl InMemoryUserDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn open() -> Self {
        Self {
            users: RwLock::default(),
            open: true,
        }
    }

    #[must_use]
    pub fn with_user(self, id: &str, display_name: &str) -> Self {
        self.insert(SenderSummary::new(id, display_name));
        self
    }

    pub fn insert(&self, user: SenderSummary) {
        if let Ok(mut users) = self.users.write() {
            users.insert(user.id.clone(), user);
        }
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn resolve_user(&self, user_id: &str) -> Result<Option<SenderSummary>, StoreError> {
        let users = self
            .users
            .read()
            .map_err(|_| StoreError::Unavailable("user directory poisoned".into()))?;
        Ok(users
            .get(user_id)
            .cloned()
            .or_else(|| self.open.then(|| SenderSummary::new(user_id, user_id))))
    }
}
