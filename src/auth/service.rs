//! Auth use cases: password registration and login, Telegram linking and Telegram login.

use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{
    hasher::PasswordHasher,
    token::{now_unix_seconds, IssuedToken, Tokener},
    AuthError, UserId,
};
use crate::store::{StoreError, UserCredentials, UserStore};

pub const DEFAULT_LINK_CODE_TTL_SECONDS: i64 = 10 * 60;
pub const MAX_LINK_CODE_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;

// 32 symbols without 0/O and 1/I, so every random byte maps without bias.
const LINK_CODE_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const LINK_CODE_LEN: usize = 8;

/// Telegram account details sent by the bot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramProfile {
    pub telegram_user_id: i64,
    pub chat_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

impl TelegramProfile {
    /// Build a profile, trimming names and dropping blank ones.
    #[must_use]
    pub fn new(
        telegram_user_id: i64,
        chat_id: i64,
        username: &str,
        first_name: &str,
        last_name: &str,
    ) -> Self {
        Self {
            telegram_user_id,
            chat_id,
            username: non_blank(username),
            first_name: non_blank(first_name),
            last_name: non_blank(last_name),
        }
    }
}

fn non_blank(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// One-time code a signed-in user hands to the bot to link their Telegram account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkCode {
    pub code: String,
    pub expires_in: i64,
}

fn link_code_digest(code: &str) -> Vec<u8> {
    Sha256::digest(code.trim().to_ascii_uppercase().as_bytes()).to_vec()
}

fn generate_link_code() -> Result<String, AuthError> {
    let mut bytes = [0u8; LINK_CODE_LEN];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| AuthError::Internal(format!("failed to generate link code: {e}")))?;
    Ok(bytes
        .iter()
        .map(|b| char::from(LINK_CODE_ALPHABET[usize::from(*b) % LINK_CODE_ALPHABET.len()]))
        .collect())
}

pub struct AuthService {
    hasher: Arc<PasswordHasher>,
    tokener: Arc<Tokener>,
    store: Arc<dyn UserStore>,
    link_code_ttl_seconds: i64,
    // Verified against when the email is unknown so both login failures cost the same.
    dummy_hash: String,
}

impl AuthService {
    /// # Errors
    /// Returns an error if the hasher cannot produce the timing-equalizer hash.
    pub fn new(
        hasher: Arc<PasswordHasher>,
        tokener: Arc<Tokener>,
        store: Arc<dyn UserStore>,
    ) -> Result<Self, AuthError> {
        let dummy_hash = hasher.hash("bottrade-unknown-user")?;
        Ok(Self {
            hasher,
            tokener,
            store,
            link_code_ttl_seconds: DEFAULT_LINK_CODE_TTL_SECONDS,
            dummy_hash,
        })
    }

    /// Non-positive values keep the default; longer ones are capped at
    /// [`MAX_LINK_CODE_TTL_SECONDS`].
    #[must_use]
    pub fn with_link_code_ttl_seconds(mut self, seconds: i64) -> Self {
        if seconds > 0 {
            self.link_code_ttl_seconds = seconds.min(MAX_LINK_CODE_TTL_SECONDS);
        }
        self
    }

    #[must_use]
    pub fn tokener(&self) -> &Tokener {
        &self.tokener
    }

    /// Create a password user and sign them in.
    ///
    /// # Errors
    /// [`AuthError::EmailTaken`] when the email is registered already.
    pub async fn register(&self, email: &str, password: &str) -> Result<IssuedToken, AuthError> {
        let password_hash = self.hash_password(password).await?;
        let user_id = self.store.create_user(email, &password_hash).await?;
        info!(%user_id, "user registered");
        Ok(self.tokener.issue(user_id)?)
    }

    /// Sign in with email and password.
    ///
    /// # Errors
    /// [`AuthError::InvalidCredentials`] for an unknown email or a wrong password alike.
    pub async fn login(&self, email: &str, password: &str) -> Result<IssuedToken, AuthError> {
        let credentials = match self.store.get_by_email(email).await {
            Ok(credentials) => credentials,
            Err(StoreError::NotFound) => {
                // Result ignored: this only spends the time a real check would.
                let _ = self.verify_password(password, &self.dummy_hash).await;
                debug!("login for unknown email");
                return Err(AuthError::InvalidCredentials);
            }
            Err(err) => return Err(err.into()),
        };

        if !self
            .verify_password(password, &credentials.password_hash)
            .await?
        {
            debug!(user_id = %credentials.user_id, "login with wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        self.upgrade_hash(&credentials, password).await;
        Ok(self.tokener.issue(credentials.user_id)?)
    }

    /// Issue a link code for `user_id`.
    ///
    /// # Errors
    /// Returns an error if the code cannot be generated or stored.
    pub async fn create_telegram_link_code(&self, user_id: UserId) -> Result<LinkCode, AuthError> {
        let code = generate_link_code()?;
        let expires_at = now_unix_seconds().saturating_add(self.link_code_ttl_seconds);
        self.store
            .create_link_code(&link_code_digest(&code), user_id, expires_at)
            .await?;
        info!(%user_id, "telegram link code created");
        Ok(LinkCode {
            code,
            expires_in: self.link_code_ttl_seconds,
        })
    }

    /// Link the Telegram account in `profile` to the owner of `code`.
    ///
    /// # Errors
    /// [`AuthError::TelegramAlreadyLinked`] if the Telegram account or the code's owner is
    /// linked already (the code stays usable), or a link code error when the code is unknown,
    /// expired or used.
    pub async fn link_telegram(&self, code: &str, profile: &TelegramProfile) -> Result<(), AuthError> {
        let user_id = self
            .store
            .redeem_link_code(&link_code_digest(code), now_unix_seconds(), profile)
            .await?;
        info!(%user_id, telegram_user_id = profile.telegram_user_id, "telegram linked");
        Ok(())
    }

    /// Sign in the user linked to `profile`, creating a Telegram-only user on first contact.
    ///
    /// # Errors
    /// Returns an error if the store fails or the token cannot be issued.
    pub async fn telegram_auth(&self, profile: &TelegramProfile) -> Result<IssuedToken, AuthError> {
        let user_id = match self.store.find_by_telegram(profile.telegram_user_id).await? {
            Some(user_id) => user_id,
            None => match self.store.create_telegram_user(profile).await {
                Ok(user_id) => {
                    info!(%user_id, telegram_user_id = profile.telegram_user_id, "telegram user created");
                    user_id
                }
                // Lost a race with a concurrent first login; use the winner's user.
                Err(StoreError::TelegramAlreadyLinked) => self
                    .store
                    .find_by_telegram(profile.telegram_user_id)
                    .await?
                    .ok_or_else(|| AuthError::Internal("telegram link disappeared".to_string()))?,
                Err(err) => return Err(err.into()),
            },
        };

        Ok(self.tokener.issue(user_id)?)
    }

    async fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let hasher = Arc::clone(&self.hasher);
        let password = password.to_string();
        Ok(tokio::task::spawn_blocking(move || hasher.hash(&password)).await??)
    }

    async fn verify_password(&self, password: &str, encoded: &str) -> Result<bool, AuthError> {
        let hasher = Arc::clone(&self.hasher);
        let password = password.to_string();
        let encoded = encoded.to_string();
        Ok(tokio::task::spawn_blocking(move || hasher.verify(&password, &encoded)).await??)
    }

    async fn upgrade_hash(&self, credentials: &UserCredentials, password: &str) {
        match self.hasher.needs_rehash(&credentials.password_hash) {
            Ok(true) => {}
            Ok(false) => return,
            Err(err) => {
                warn!(user_id = %credentials.user_id, "cannot inspect stored hash: {err}");
                return;
            }
        }

        let result = match self.hash_password(password).await {
            Ok(hash) => self
                .store
                .update_password_hash(credentials.user_id, &hash)
                .await
                .map_err(AuthError::from),
            Err(err) => Err(err),
        };
        match result {
            Ok(()) => debug!(user_id = %credentials.user_id, "password hash upgraded"),
            Err(err) => warn!(user_id = %credentials.user_id, "password hash upgrade failed: {err}"),
        }
    }
}
