//! HS256 access tokens.

use super::UserId;
use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_TTL_SECONDS: i64 = 3600;
pub const DEFAULT_ISSUER: &str = "auth-service";
pub const DEFAULT_CLOCK_SKEW_SECONDS: i64 = 30;
pub const MIN_SECRET_LEN: usize = 16;
pub const MAX_TTL_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;
pub const MAX_CLOCK_SKEW_SECONDS: i64 = 60 * 60;

const ALG: &str = "HS256";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("invalid token config: {0}")]
    InvalidConfig(String),
    #[error("invalid token")]
    InvalidToken,
    #[error("token expired")]
    ExpiredToken,
    #[error("failed to encode token: {0}")]
    Encode(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: String,
    pub user_id: i64,
    pub iss: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

#[derive(Debug, Clone)]
pub struct TokenConfig {
    secret: SecretString,
    ttl_seconds: i64,
    issuer: String,
    clock_skew_seconds: i64,
}

impl TokenConfig {
    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret,
            ttl_seconds: DEFAULT_TTL_SECONDS,
            issuer: DEFAULT_ISSUER.to_string(),
            clock_skew_seconds: DEFAULT_CLOCK_SKEW_SECONDS,
        }
    }

    #[must_use]
    pub fn with_ttl_seconds(mut self, ttl_seconds: i64) -> Self {
        self.ttl_seconds = ttl_seconds;
        self
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    #[must_use]
    pub fn with_clock_skew_seconds(mut self, clock_skew_seconds: i64) -> Self {
        self.clock_skew_seconds = clock_skew_seconds;
        self
    }
}

/// A freshly issued access token and its lifetime in seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub expires_in: i64,
}

/// Issues and verifies access tokens signed with one shared secret.
#[derive(Debug, Clone)]
pub struct Tokener {
    secret: SecretString,
    ttl_seconds: i64,
    issuer: String,
    clock_skew_seconds: i64,
}

impl Tokener {
    /// Non-positive TTL and a blank issuer fall back to the defaults.
    ///
    /// # Errors
    /// [`Error::InvalidConfig`] when the secret is shorter than 16 bytes, or the TTL or clock
    /// skew exceeds [`MAX_TTL_SECONDS`] or [`MAX_CLOCK_SKEW_SECONDS`].
    pub fn new(config: TokenConfig) -> Result<Self, Error> {
        if config.secret.expose_secret().len() < MIN_SECRET_LEN {
            return Err(Error::InvalidConfig(format!(
                "secret must be at least {MIN_SECRET_LEN} bytes"
            )));
        }
        if config.ttl_seconds > MAX_TTL_SECONDS {
            return Err(Error::InvalidConfig(format!(
                "ttl must be at most {MAX_TTL_SECONDS} seconds"
            )));
        }
        if config.clock_skew_seconds > MAX_CLOCK_SKEW_SECONDS {
            return Err(Error::InvalidConfig(format!(
                "clock skew must be at most {MAX_CLOCK_SKEW_SECONDS} seconds"
            )));
        }

        let ttl_seconds = if config.ttl_seconds <= 0 {
            DEFAULT_TTL_SECONDS
        } else {
            config.ttl_seconds
        };
        let issuer = if config.issuer.trim().is_empty() {
            DEFAULT_ISSUER.to_string()
        } else {
            config.issuer
        };

        Ok(Self {
            secret: config.secret,
            ttl_seconds,
            issuer,
            clock_skew_seconds: config.clock_skew_seconds.max(0),
        })
    }

    #[must_use]
    pub fn ttl_seconds(&self) -> i64 {
        self.ttl_seconds
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Issue a token for `user_id` valid from now.
    ///
    /// # Errors
    /// Returns an error if the claims cannot be encoded.
    pub fn issue(&self, user_id: UserId) -> Result<IssuedToken, Error> {
        self.issue_at(user_id, now_unix_seconds())
    }

    /// Issue a token as if the current time were `now`.
    ///
    /// # Errors
    /// Returns an error if the claims cannot be encoded.
    pub fn issue_at(&self, user_id: UserId, now: i64) -> Result<IssuedToken, Error> {
        let header = Header {
            alg: ALG.to_string(),
            typ: "JWT".to_string(),
        };
        let claims = Claims {
            sub: user_id.to_string(),
            user_id: user_id.get(),
            iss: self.issuer.clone(),
            iat: now,
            nbf: now.saturating_sub(self.clock_skew_seconds),
            exp: now.saturating_add(self.ttl_seconds),
        };

        let signing_input = format!("{}.{}", b64e_json(&header)?, b64e_json(&claims)?);
        let signature = self.mac()?.chain_update(signing_input.as_bytes()).finalize();
        let signature_b64 = Base64UrlUnpadded::encode_string(&signature.into_bytes());

        Ok(IssuedToken {
            token: format!("{signing_input}.{signature_b64}"),
            expires_in: self.ttl_seconds,
        })
    }

    /// Verify `token` and return the user it was issued to.
    ///
    /// # Errors
    /// [`Error::ExpiredToken`] after expiry, [`Error::InvalidToken`] for anything else.
    pub fn verify(&self, token: &str) -> Result<UserId, Error> {
        self.verify_at(token, now_unix_seconds())
    }

    /// Verify `token` as if the current time were `now`.
    ///
    /// # Errors
    /// [`Error::ExpiredToken`] after expiry, [`Error::InvalidToken`] for anything else.
    pub fn verify_at(&self, token: &str, now: i64) -> Result<UserId, Error> {
        let mut parts = token.split('.');
        let header_b64 = parts.next().ok_or(Error::InvalidToken)?;
        let claims_b64 = parts.next().ok_or(Error::InvalidToken)?;
        let signature_b64 = parts.next().ok_or(Error::InvalidToken)?;
        if parts.next().is_some() {
            return Err(Error::InvalidToken);
        }

        let header: Header = b64d_json(header_b64)?;
        if header.alg != ALG {
            return Err(Error::InvalidToken);
        }

        let signature =
            Base64UrlUnpadded::decode_vec(signature_b64).map_err(|_| Error::InvalidToken)?;
        self.mac()?
            .chain_update(format!("{header_b64}.{claims_b64}").as_bytes())
            .verify_slice(&signature)
            .map_err(|_| Error::InvalidToken)?;

        let claims: Claims = b64d_json(claims_b64)?;
        if claims.iss != self.issuer {
            return Err(Error::InvalidToken);
        }
        if claims.nbf > now.saturating_add(self.clock_skew_seconds) {
            return Err(Error::InvalidToken);
        }
        if now >= claims.exp {
            return Err(Error::ExpiredToken);
        }

        let user_id: UserId = claims.sub.parse().map_err(|_| Error::InvalidToken)?;
        if user_id.get() != claims.user_id {
            return Err(Error::InvalidToken);
        }

        Ok(user_id)
    }

    fn mac(&self) -> Result<HmacSha256, Error> {
        HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|e| Error::InvalidConfig(e.to_string()))
    }
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, Error> {
    let json = serde_json::to_vec(value).map_err(|e| Error::Encode(e.to_string()))?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, Error> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| Error::InvalidToken)?;
    serde_json::from_slice(&bytes).map_err(|_| Error::InvalidToken)
}

pub(crate) fn now_unix_seconds() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
}
