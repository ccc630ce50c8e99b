//! Persistence for users, Telegram links and link codes.

mod memory;
mod postgres;

pub use self::memory::MemoryStore;
pub use self::postgres::PgStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::auth::{service::TelegramProfile, UserId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateEmail,
    #[error("record not found")]
    NotFound,
    #[error("link code not found")]
    LinkCodeNotFound,
    #[error("link code expired")]
    LinkCodeExpired,
    #[error("link code already used")]
    LinkCodeUsed,
    #[error("telegram account already linked")]
    TelegramAlreadyLinked,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Login material for a user with a password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserCredentials {
    pub user_id: UserId,
    pub password_hash: String,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Create a password user. Emails are expected to be normalized already.
    async fn create_user(&self, email: &str, password_hash: &str) -> Result<UserId, StoreError>;

    /// [`StoreError::NotFound`] when no password user has this email.
    async fn get_by_email(&self, email: &str) -> Result<UserCredentials, StoreError>;

    async fn update_password_hash(
        &self,
        user_id: UserId,
        password_hash: &str,
    ) -> Result<(), StoreError>;

    async fn create_link_code(
        &self,
        code_digest: &[u8],
        user_id: UserId,
        expires_at: i64,
    ) -> Result<(), StoreError>;

    /// Consume a link code and link `profile` to the code's owner as one step.
    ///
    /// [`StoreError::TelegramAlreadyLinked`] when the Telegram account or the owner is linked
    /// already; the Telegram account is checked before the code. On any error the code stays
    /// as it was. Only one caller can redeem a code.
    async fn redeem_link_code(
        &self,
        code_digest: &[u8],
        now: i64,
        profile: &TelegramProfile,
    ) -> Result<UserId, StoreError>;

    async fn find_by_telegram(&self, telegram_user_id: i64) -> Result<Option<UserId>, StoreError>;

    /// Create a user without email or password, linked to `profile`.
    async fn create_telegram_user(&self, profile: &TelegramProfile) -> Result<UserId, StoreError>;
}
