//! User directory
//!
//! Minimal read-side view of the users table: the orchestrator only needs a
//! verified email address and a preferred locale per user.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct UserContact {
    pub user_id: Uuid,
    pub email: Option<String>,
    pub email_verified: bool,
    pub locale: Option<String>,
}

impl UserContact {
    pub fn verified_email(&self) -> Option<&str> {
        if self.email_verified {
            self.email.as_deref()
        } else {
            None
        }
    }
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn contact(&self, user_id: Uuid) -> Result<Option<UserContact>>;
}

pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn contact(&self, user_id: Uuid) -> Result<Option<UserContact>> {
        let row = sqlx::query(
            "SELECT id, email, email_verified, locale FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| UserContact {
            user_id: row.get("id"),
            email: row.try_get("email").ok().flatten(),
            email_verified: row.try_get("email_verified").unwrap_or(false),
            locale: row.try_get("locale").ok().flatten(),
        }))
    }
}

/// In-memory double for tests.
#[derive(Default)]
pub struct MemoryUserDirectory {
    contacts: Mutex<HashMap<Uuid, UserContact>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, contact: UserContact) {
        self.contacts.lock().insert(contact.user_id, contact);
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn contact(&self, user_id: Uuid) -> Result<Option<UserContact>> {
        Ok(self.contacts.lock().get(&user_id).cloned())
    }
}
