//! Signed calls from trusted bots.
//!
//! A bot proves itself with four metadata entries: its id, a unix timestamp, a single-use nonce
//! and a signature over the call. [`BotVerifier`] is the seam the authorizer calls;
//! [`HmacBotVerifier`] is the shared-secret implementation used in production.
//!
//! The signed message is
//!
//! ```text
//! <method>\n<timestamp>\n<nonce>\n<hex(sha256(body))>
//! ```
//!
//! where `body` is the protobuf encoding of the request message, and the signature is the
//! lowercase hex HMAC-SHA256 of that message under the bot's secret.
//!
//! The server hashes its own re-encoding of the decoded request, not the bytes on the wire.
//! prost drops fields it does not know, so a bot must sign exactly the fields of the
//! `bottrade.auth.v1` schema this server was built with. A request carrying fields from a
//! newer schema fails with a bad signature. Bots should sign the encoding of the message
//! they send, with defaults omitted and fields in tag order as prost writes them.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use super::token::now_unix_seconds;

type HmacSha256 = Hmac<Sha256>;

pub const METADATA_BOT_ID: &str = "x-bot-id";
pub const METADATA_TIMESTAMP: &str = "x-ts";
pub const METADATA_NONCE: &str = "x-nonce";
pub const METADATA_SIGNATURE: &str = "x-signature";

pub const DEFAULT_MAX_AGE_SECONDS: i64 = 60;
pub const DEFAULT_MAX_FUTURE_SECONDS: i64 = 30;
pub const MIN_BOT_SECRET_LEN: usize = 16;

/// Proof a bot attaches to a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotMeta {
    pub bot_id: String,
    pub timestamp: i64,
    pub nonce: String,
    pub signature: String,
}

/// Everything a verifier needs to check one bot call.
#[derive(Debug, Clone, Copy)]
pub struct BotCall<'a> {
    pub meta: &'a BotMeta,
    pub method: &'a str,
    pub body: &'a [u8],
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BotAuthError {
    #[error("unknown bot")]
    UnknownBot,
    #[error("bad bot signature")]
    BadSignature,
    #[error("bot timestamp outside the accepted window")]
    StaleTimestamp,
    #[error("replay detected")]
    Replay,
    #[error("bot verifier failure: {0}")]
    Internal(String),
}

#[async_trait]
pub trait BotVerifier: Send + Sync {
    /// Accept or reject one signed call.
    async fn verify(&self, call: BotCall<'_>) -> Result<(), BotAuthError>;
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid bot secrets: {0}")]
pub struct BotKeysError(String);

/// Shared secrets keyed by bot id.
#[derive(Debug, Clone, Default)]
pub struct BotKeys(HashMap<String, SecretString>);

impl BotKeys {
    /// Parse `id=secret,id2=secret2`. Blank entries are skipped.
    ///
    /// # Errors
    /// Returns an error for entries without `=`, empty ids, duplicate ids or short secrets.
    pub fn parse(raw: &str) -> Result<Self, BotKeysError> {
        let mut keys = HashMap::new();

        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (id, secret) = entry
                .split_once('=')
                .ok_or_else(|| BotKeysError("expected <bot-id>=<secret>".to_string()))?;
            let id = id.trim();
            let secret = secret.trim();

            if id.is_empty() {
                return Err(BotKeysError("empty bot id".to_string()));
            }
            if secret.len() < MIN_BOT_SECRET_LEN {
                return Err(BotKeysError(format!(
                    "secret for {id} must be at least {MIN_BOT_SECRET_LEN} bytes"
                )));
            }
            if keys
                .insert(id.to_string(), SecretString::from(secret.to_string()))
                .is_some()
            {
                return Err(BotKeysError(format!("duplicate bot id {id}")));
            }
        }

        Ok(Self(keys))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn get(&self, bot_id: &str) -> Option<&SecretString> {
        self.0.get(bot_id)
    }
}

/// Message covered by a bot signature.
#[must_use]
pub fn canonical_message(method: &str, timestamp: i64, nonce: &str, body: &[u8]) -> String {
    let body_digest = hex::encode(Sha256::digest(body));
    format!("{method}\n{timestamp}\n{nonce}\n{body_digest}")
}

/// Sign a call the way [`HmacBotVerifier`] expects.
///
/// # Errors
/// Returns an error if the HMAC cannot be keyed.
pub fn sign_bot_request(
    secret: &str,
    method: &str,
    timestamp: i64,
    nonce: &str,
    body: &[u8],
) -> Result<String, BotAuthError> {
    let mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| BotAuthError::Internal(e.to_string()))?
        .chain_update(canonical_message(method, timestamp, nonce, body).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// HMAC-SHA256 verifier with a timestamp window and an in-memory replay cache.
pub struct HmacBotVerifier {
    keys: BotKeys,
    max_age_seconds: i64,
    max_future_seconds: i64,
    // (bot id, nonce) -> unix second after which the entry can be dropped
    seen_nonces: Mutex<HashMap<(String, String), i64>>,
}

impl HmacBotVerifier {
    #[must_use]
    pub fn new(keys: BotKeys) -> Self {
        Self {
            keys,
            max_age_seconds: DEFAULT_MAX_AGE_SECONDS,
            max_future_seconds: DEFAULT_MAX_FUTURE_SECONDS,
            seen_nonces: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_max_age_seconds(mut self, seconds: i64) -> Self {
        self.max_age_seconds = seconds.max(0);
        self
    }

    #[must_use]
    pub fn with_max_future_seconds(mut self, seconds: i64) -> Self {
        self.max_future_seconds = seconds.max(0);
        self
    }

    /// Verify `call` as if the current time were `now`.
    ///
    /// # Errors
    /// Returns the first check that fails: bot id, timestamp window, signature, nonce.
    pub async fn verify_at(&self, call: BotCall<'_>, now: i64) -> Result<(), BotAuthError> {
        let meta = call.meta;
        let secret = self.keys.get(&meta.bot_id).ok_or(BotAuthError::UnknownBot)?;

        let age = now.saturating_sub(meta.timestamp);
        if age > self.max_age_seconds || age < -self.max_future_seconds {
            debug!(bot_id = %meta.bot_id, age, "bot timestamp outside window");
            return Err(BotAuthError::StaleTimestamp);
        }

        let signature = hex::decode(&meta.signature).map_err(|_| BotAuthError::BadSignature)?;
        HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
            .map_err(|e| BotAuthError::Internal(e.to_string()))?
            .chain_update(
                canonical_message(call.method, meta.timestamp, &meta.nonce, call.body).as_bytes(),
            )
            .verify_slice(&signature)
            .map_err(|_| BotAuthError::BadSignature)?;

        self.remember_nonce(meta, now).await
    }

    async fn remember_nonce(&self, meta: &BotMeta, now: i64) -> Result<(), BotAuthError> {
        let mut seen = self.seen_nonces.lock().await;
        seen.retain(|_, expires_at| *expires_at >= now);

        let key = (meta.bot_id.clone(), meta.nonce.clone());
        if seen.contains_key(&key) {
            return Err(BotAuthError::Replay);
        }
        seen.insert(key, meta.timestamp.saturating_add(self.max_age_seconds));
        Ok(())
    }
}

#[async_trait]
impl BotVerifier for HmacBotVerifier {
    async fn verify(&self, call: BotCall<'_>) -> Result<(), BotAuthError> {
        self.verify_at(call, now_unix_seconds()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "bot-secret-0123456789";
    const METHOD: &str = "/bottrade.auth.v1.AuthService/TelegramAuth";
    const NOW: i64 = 1_700_000_000;

    fn verifier() -> Result<HmacBotVerifier, BotKeysError> {
        Ok(HmacBotVerifier::new(BotKeys::parse(&format!(
            "tg-bot={SECRET}"
        ))?))
    }

    fn signed(timestamp: i64, nonce: &str, body: &[u8]) -> Result<BotMeta, BotAuthError> {
        Ok(BotMeta {
            bot_id: "tg-bot".to_string(),
            timestamp,
            nonce: nonce.to_string(),
            signature: sign_bot_request(SECRET, METHOD, timestamp, nonce, body)?,
        })
    }

    fn call<'a>(meta: &'a BotMeta, body: &'a [u8]) -> BotCall<'a> {
        BotCall {
            meta,
            method: METHOD,
            body,
        }
    }

    #[test]
    fn parse_keys() -> Result<(), BotKeysError> {
        let keys = BotKeys::parse(" tg-bot = 0123456789abcdef , ,other=fedcba9876543210")?;
        assert_eq!(keys.len(), 2);
        assert_eq!(
            keys.get("tg-bot").map(|s| s.expose_secret().to_string()),
            Some("0123456789abcdef".to_string())
        );
        assert!(BotKeys::parse("")?.is_empty());
        Ok(())
    }

    #[test]
    fn parse_keys_rejects_bad_entries() {
        for raw in [
            "no-separator",
            "=0123456789abcdef",
            "bot=short",
            "bot=0123456789abcdef,bot=0123456789abcdef",
        ] {
            assert!(BotKeys::parse(raw).is_err(), "{raw:?} should be rejected");
        }
    }

    #[test]
    fn canonical_message_layout() {
        let message = canonical_message("/svc/Method", 10, "n1", b"");
        assert_eq!(
            message,
            "/svc/Method\n10\nn1\ne3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[tokio::test]
    async fn accepts_valid_signature_once() -> Result<(), Box<dyn std::error::Error>> {
        let verifier = verifier()?;
        let meta = signed(NOW, "n1", b"body")?;

        assert_eq!(verifier.verify_at(call(&meta, b"body"), NOW).await, Ok(()));
        assert_eq!(
            verifier.verify_at(call(&meta, b"body"), NOW + 1).await,
            Err(BotAuthError::Replay)
        );

        let next = signed(NOW, "n2", b"body")?;
        assert_eq!(verifier.verify_at(call(&next, b"body"), NOW).await, Ok(()));
        Ok(())
    }

    #[tokio::test]
    async fn rejects_tampering() -> Result<(), Box<dyn std::error::Error>> {
        let verifier = verifier()?;
        let meta = signed(NOW, "n1", b"body")?;

        assert_eq!(
            verifier.verify_at(call(&meta, b"other body"), NOW).await,
            Err(BotAuthError::BadSignature)
        );

        let other_method = BotCall {
            meta: &meta,
            method: "/bottrade.auth.v1.AuthService/LinkTelegram",
            body: b"body",
        };
        assert_eq!(
            verifier.verify_at(other_method, NOW).await,
            Err(BotAuthError::BadSignature)
        );

        let not_hex = BotMeta {
            signature: "zz".to_string(),
            ..meta.clone()
        };
        assert_eq!(
            verifier.verify_at(call(&not_hex, b"body"), NOW).await,
            Err(BotAuthError::BadSignature)
        );

        let other_nonce = BotMeta {
            nonce: "n2".to_string(),
            ..meta
        };
        assert_eq!(
            verifier.verify_at(call(&other_nonce, b"body"), NOW).await,
            Err(BotAuthError::BadSignature)
        );
        Ok(())
    }

    #[tokio::test]
    async fn rejects_unknown_bot() -> Result<(), Box<dyn std::error::Error>> {
        let verifier = verifier()?;
        let meta = BotMeta {
            bot_id: "intruder".to_string(),
            ..signed(NOW, "n1", b"")?
        };
        assert_eq!(
            verifier.verify_at(call(&meta, b""), NOW).await,
            Err(BotAuthError::UnknownBot)
        );
        Ok(())
    }

    #[tokio::test]
    async fn enforces_timestamp_window() -> Result<(), Box<dyn std::error::Error>> {
        let verifier = verifier()?;

        let oldest = signed(NOW - 60, "old-ok", b"")?;
        assert_eq!(verifier.verify_at(call(&oldest, b""), NOW).await, Ok(()));

        let too_old = signed(NOW - 61, "old", b"")?;
        assert_eq!(
            verifier.verify_at(call(&too_old, b""), NOW).await,
            Err(BotAuthError::StaleTimestamp)
        );

        let ahead = signed(NOW + 30, "ahead-ok", b"")?;
        assert_eq!(verifier.verify_at(call(&ahead, b""), NOW).await, Ok(()));

        let too_far_ahead = signed(NOW + 31, "ahead", b"")?;
        assert_eq!(
            verifier.verify_at(call(&too_far_ahead, b""), NOW).await,
            Err(BotAuthError::StaleTimestamp)
        );
        Ok(())
    }

    #[tokio::test]
    async fn failed_signature_does_not_burn_nonce() -> Result<(), Box<dyn std::error::Error>> {
        let verifier = verifier()?;
        let forged = BotMeta {
            signature: "00".repeat(32),
            ..signed(NOW, "n1", b"")?
        };
        assert_eq!(
            verifier.verify_at(call(&forged, b""), NOW).await,
            Err(BotAuthError::BadSignature)
        );

        let genuine = signed(NOW, "n1", b"")?;
        assert_eq!(verifier.verify_at(call(&genuine, b""), NOW).await, Ok(()));
        Ok(())
    }

    #[tokio::test]
    async fn nonces_expire_with_the_window() -> Result<(), Box<dyn std::error::Error>> {
        let verifier = verifier()?;
        let first = signed(NOW, "n1", b"")?;
        assert_eq!(verifier.verify_at(call(&first, b""), NOW).await, Ok(()));

        // Still remembered at the edge of the window.
        assert_eq!(
            verifier.verify_at(call(&first, b""), NOW + 60).await,
            Err(BotAuthError::Replay)
        );

        let later = signed(NOW + 120, "n1", b"")?;
        assert_eq!(
            verifier.verify_at(call(&later, b""), NOW + 120).await,
            Ok(())
        );
        assert_eq!(verifier.seen_nonces.lock().await.len(), 1);
        Ok(())
    }
}
