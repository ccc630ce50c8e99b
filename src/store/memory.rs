use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::{StoreError, UserCredentials, UserStore};
use crate::auth::{service::TelegramProfile, UserId};

#[derive(Debug)]
struct UserRow {
    email: Option<String>,
    password_hash: Option<String>,
}

#[derive(Debug)]
struct LinkCodeRow {
    user_id: UserId,
    expires_at: i64,
    used: bool,
}

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    users: HashMap<UserId, UserRow>,
    emails: HashMap<String, UserId>,
    // telegram user id -> (owner, profile)
    telegram: HashMap<i64, (UserId, TelegramProfile)>,
    link_codes: HashMap<Vec<u8>, LinkCodeRow>,
}

impl Tables {
    fn insert_user(&mut self, row: UserRow) -> UserId {
        self.next_id += 1;
        let id = UserId::new(self.next_id);
        if let Some(email) = &row.email {
            self.emails.insert(email.clone(), id);
        }
        self.users.insert(id, row);
        id
    }

    fn has_telegram_link(&self, user_id: UserId) -> bool {
        self.telegram.values().any(|(owner, _)| *owner == user_id)
    }
}

/// In-process store for tests and local runs. Data is lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Linked profile for a telegram account, if any.
    pub async fn telegram_profile(&self, telegram_user_id: i64) -> Option<TelegramProfile> {
        let tables = self.tables.lock().await;
        tables
            .telegram
            .get(&telegram_user_id)
            .map(|(_, profile)| profile.clone())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn create_user(&self, email: &str, password_hash: &str) -> Result<UserId, StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.emails.contains_key(email) {
            return Err(StoreError::DuplicateEmail);
        }
        Ok(tables.insert_user(UserRow {
            email: Some(email.to_string()),
            password_hash: Some(password_hash.to_string()),
        }))
    }

    async fn get_by_email(&self, email: &str) -> Result<UserCredentials, StoreError> {
        let tables = self.tables.lock().await;
        let user_id = *tables.emails.get(email).ok_or(StoreError::NotFound)?;
        let password_hash = tables
            .users
            .get(&user_id)
            .and_then(|row| row.password_hash.clone())
            .ok_or(StoreError::NotFound)?;
        Ok(UserCredentials {
            user_id,
            password_hash,
        })
    }

    async fn update_password_hash(
        &self,
        user_id: UserId,
        password_hash: &str,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let row = tables.users.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        row.password_hash = Some(password_hash.to_string());
        Ok(())
    }

    async fn create_link_code(
        &self,
        code_digest: &[u8],
        user_id: UserId,
        expires_at: i64,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.users.contains_key(&user_id) {
            return Err(StoreError::NotFound);
        }
        tables.link_codes.insert(
            code_digest.to_vec(),
            LinkCodeRow {
                user_id,
                expires_at,
                used: false,
            },
        );
        Ok(())
    }

    async fn redeem_link_code(
        &self,
        code_digest: &[u8],
        now: i64,
        profile: &TelegramProfile,
    ) -> Result<UserId, StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.telegram.contains_key(&profile.telegram_user_id) {
            return Err(StoreError::TelegramAlreadyLinked);
        }

        let row = tables
            .link_codes
            .get(code_digest)
            .ok_or(StoreError::LinkCodeNotFound)?;
        if row.used {
            return Err(StoreError::LinkCodeUsed);
        }
        if row.expires_at <= now {
            return Err(StoreError::LinkCodeExpired);
        }
        let user_id = row.user_id;
        if !tables.users.contains_key(&user_id) {
            return Err(StoreError::NotFound);
        }
        if tables.has_telegram_link(user_id) {
            return Err(StoreError::TelegramAlreadyLinked);
        }

        if let Some(row) = tables.link_codes.get_mut(code_digest) {
            row.used = true;
        }
        tables
            .telegram
            .insert(profile.telegram_user_id, (user_id, profile.clone()));
        Ok(user_id)
    }

    async fn find_by_telegram(&self, telegram_user_id: i64) -> Result<Option<UserId>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .telegram
            .get(&telegram_user_id)
            .map(|(owner, _)| *owner))
    }

    async fn create_telegram_user(&self, profile: &TelegramProfile) -> Result<UserId, StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.telegram.contains_key(&profile.telegram_user_id) {
            return Err(StoreError::TelegramAlreadyLinked);
        }
        let user_id = tables.insert_user(UserRow {
            email: None,
            password_hash: None,
        });
        tables
            .telegram
            .insert(profile.telegram_user_id, (user_id, profile.clone()));
        Ok(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(telegram_user_id: i64) -> TelegramProfile {
        TelegramProfile {
            telegram_user_id,
            chat_id: 100,
            username: Some("trader".to_string()),
            first_name: None,
            last_name: None,
        }
    }

    #[tokio::test]
    async fn users_are_unique_by_email() -> Result<(), StoreError> {
        let store = MemoryStore::new();
        let id = store.create_user("a@b.com", "hash").await?;
        assert!(matches!(
            store.create_user("a@b.com", "other").await,
            Err(StoreError::DuplicateEmail)
        ));

        let creds = store.get_by_email("a@b.com").await?;
        assert_eq!(creds.user_id, id);
        assert_eq!(creds.password_hash, "hash");

        store.update_password_hash(id, "rehashed").await?;
        assert_eq!(store.get_by_email("a@b.com").await?.password_hash, "rehashed");

        assert!(matches!(
            store.get_by_email("missing@b.com").await,
            Err(StoreError::NotFound)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn link_codes_are_single_use() -> Result<(), StoreError> {
        let store = MemoryStore::new();
        let id = store.create_user("a@b.com", "hash").await?;
        store.create_link_code(b"digest", id, 200).await?;
        store.create_link_code(b"stale", id, 50).await?;

        assert!(matches!(
            store.redeem_link_code(b"unknown", 100, &profile(7)).await,
            Err(StoreError::LinkCodeNotFound)
        ));
        assert!(matches!(
            store.redeem_link_code(b"stale", 100, &profile(7)).await,
            Err(StoreError::LinkCodeExpired)
        ));
        assert_eq!(store.redeem_link_code(b"digest", 100, &profile(7)).await?, id);
        assert_eq!(store.find_by_telegram(7).await?, Some(id));
        assert!(matches!(
            store.redeem_link_code(b"digest", 100, &profile(8)).await,
            Err(StoreError::LinkCodeUsed)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn telegram_links_are_one_to_one() -> Result<(), StoreError> {
        let store = MemoryStore::new();
        let first = store.create_user("a@b.com", "hash").await?;
        let second = store.create_user("c@d.com", "hash").await?;
        store.create_link_code(b"first-1", first, 200).await?;
        store.create_link_code(b"first-2", first, 200).await?;
        store.create_link_code(b"second", second, 200).await?;

        store.redeem_link_code(b"first-1", 100, &profile(7)).await?;
        assert_eq!(store.find_by_telegram(7).await?, Some(first));
        assert_eq!(store.find_by_telegram(8).await?, None);
        assert_eq!(
            store.telegram_profile(7).await.and_then(|p| p.username),
            Some("trader".to_string())
        );

        // Telegram side taken: reported before the code is looked at.
        assert!(matches!(
            store.redeem_link_code(b"second", 100, &profile(7)).await,
            Err(StoreError::TelegramAlreadyLinked)
        ));
        // User side taken.
        assert!(matches!(
            store.redeem_link_code(b"first-2", 100, &profile(8)).await,
            Err(StoreError::TelegramAlreadyLinked)
        ));

        // Neither failure burned its code.
        assert_eq!(store.redeem_link_code(b"second", 100, &profile(8)).await?, second);
        assert!(matches!(
            store.redeem_link_code(b"first-2", 100, &profile(9)).await,
            Err(StoreError::TelegramAlreadyLinked)
        ));

        let created = store.create_telegram_user(&profile(10)).await?;
        assert_eq!(store.find_by_telegram(10).await?, Some(created));
        assert!(matches!(
            store.create_telegram_user(&profile(10)).await,
            Err(StoreError::TelegramAlreadyLinked)
        ));
        Ok(())
    }
}
