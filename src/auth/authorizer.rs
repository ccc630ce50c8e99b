//! Per-call authorization.
//!
//! Every method belongs to exactly one tier, decided by exact name lookup:
//!
//! | tier   | proof                                                   |
//! |--------|---------------------------------------------------------|
//! | public | none                                                    |
//! | bot    | `x-bot-id`, `x-ts`, `x-nonce`, `x-signature` metadata   |
//! | user   | `authorization: Bearer <token>`                         |
//!
//! Methods missing from both tables need a bearer token.

use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tonic::{metadata::MetadataMap, Request};
use tracing::debug;

use super::{
    bot::{BotCall, BotMeta, BotVerifier, METADATA_BOT_ID, METADATA_NONCE, METADATA_SIGNATURE,
        METADATA_TIMESTAMP},
    token::Tokener,
    AuthError, AuthenticatedUser,
};

pub const METADATA_AUTHORIZATION: &str = "authorization";
const BEARER_PREFIX: &str = "bearer ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Public,
    Bot,
    User,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TableError {
    #[error("method {0} is listed as both public and bot")]
    Overlap(String),
}

/// Method name to tier lookup, fixed at startup.
#[derive(Debug, Clone)]
pub struct MethodTable {
    public: HashSet<&'static str>,
    bot: HashSet<&'static str>,
}

impl MethodTable {
    /// # Errors
    /// [`TableError::Overlap`] when a method appears in both lists.
    pub fn new(public: &[&'static str], bot: &[&'static str]) -> Result<Self, TableError> {
        let public: HashSet<&'static str> = public.iter().copied().collect();
        let bot: HashSet<&'static str> = bot.iter().copied().collect();

        if let Some(method) = public.intersection(&bot).next() {
            return Err(TableError::Overlap((*method).to_string()));
        }

        Ok(Self { public, bot })
    }

    #[must_use]
    pub fn classify(&self, method: &str) -> Tier {
        if self.public.contains(method) {
            Tier::Public
        } else if self.bot.contains(method) {
            Tier::Bot
        } else {
            Tier::User
        }
    }
}

pub struct Authorizer {
    methods: MethodTable,
    tokener: Arc<Tokener>,
    bots: Arc<dyn BotVerifier>,
}

impl Authorizer {
    #[must_use]
    pub fn new(methods: MethodTable, tokener: Arc<Tokener>, bots: Arc<dyn BotVerifier>) -> Self {
        Self {
            methods,
            tokener,
            bots,
        }
    }

    #[must_use]
    pub fn methods(&self) -> &MethodTable {
        &self.methods
    }

    /// Check the proof `method` requires and hand the request back.
    ///
    /// User-tier requests come back with an [`AuthenticatedUser`] extension.
    ///
    /// # Errors
    /// Returns the first failed check mapped to an [`AuthError`].
    pub async fn authorize<T: prost::Message>(
        &self,
        method: &str,
        mut request: Request<T>,
    ) -> Result<Request<T>, AuthError> {
        match self.methods.classify(method) {
            Tier::Public => Ok(request),
            Tier::Bot => {
                let meta = bot_meta(request.metadata())?;
                let body = request.get_ref().encode_to_vec();
                self.bots
                    .verify(BotCall {
                        meta: &meta,
                        method,
                        body: &body,
                    })
                    .await
                    .map_err(|err| {
                        debug!(method, bot_id = %meta.bot_id, "bot verification failed: {err}");
                        AuthError::from(err)
                    })?;
                Ok(request)
            }
            Tier::User => {
                let user_id = {
                    let token = bearer_token(request.metadata())?;
                    self.tokener.verify(token).map_err(|err| {
                        debug!(method, "bearer verification failed: {err}");
                        AuthError::from(err)
                    })?
                };
                request.extensions_mut().insert(AuthenticatedUser(user_id));
                Ok(request)
            }
        }
    }
}

fn metadata_str<'a>(metadata: &'a MetadataMap, key: &str) -> Option<&'a str> {
    metadata
        .get(key)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Read the bot proof from call metadata.
///
/// # Errors
/// [`AuthError::Unauthenticated`] when a field is missing or the timestamp is not a plain
/// non-negative integer.
pub fn bot_meta(metadata: &MetadataMap) -> Result<BotMeta, AuthError> {
    let field = |key: &str| {
        metadata_str(metadata, key).ok_or(AuthError::Unauthenticated("missing bot metadata"))
    };

    let bot_id = field(METADATA_BOT_ID)?;
    let timestamp = field(METADATA_TIMESTAMP)?;
    let nonce = field(METADATA_NONCE)?;
    let signature = field(METADATA_SIGNATURE)?;

    if !timestamp.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AuthError::Unauthenticated("invalid bot timestamp"));
    }
    let timestamp: i64 = timestamp
        .parse()
        .map_err(|_| AuthError::Unauthenticated("invalid bot timestamp"))?;

    Ok(BotMeta {
        bot_id: bot_id.to_string(),
        timestamp,
        nonce: nonce.to_string(),
        signature: signature.to_string(),
    })
}

/// Extract the token from `authorization: Bearer <token>`.
///
/// # Errors
/// [`AuthError::Unauthenticated`] when the header is missing or malformed.
pub fn bearer_token(metadata: &MetadataMap) -> Result<&str, AuthError> {
    let value = metadata_str(metadata, METADATA_AUTHORIZATION)
        .ok_or(AuthError::Unauthenticated("missing authorization"))?;

    let scheme = value
        .get(..BEARER_PREFIX.len())
        .filter(|scheme| scheme.eq_ignore_ascii_case(BEARER_PREFIX))
        .ok_or(AuthError::Unauthenticated("invalid authorization scheme"))?;

    let token = value[scheme.len()..].trim();
    if token.is_empty() {
        return Err(AuthError::Unauthenticated("empty bearer token"));
    }
    Ok(token)
}
