//! Domain errors for the auth core and their gRPC status codes.

use thiserror::Error;
use tonic::{Code, Status};
use tracing::error;

use super::{bot::BotAuthError, hasher, token};
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("email already taken")]
    EmailTaken,
    #[error("invalid token")]
    InvalidToken,
    #[error("token expired")]
    ExpiredToken,
    #[error("{0}")]
    Unauthenticated(&'static str),
    #[error("forbidden")]
    Forbidden,
    #[error("bad bot signature")]
    BadSignature,
    #[error("stale bot timestamp")]
    StaleTimestamp,
    #[error("replay detected")]
    Replay,
    #[error("link code not found")]
    LinkCodeInvalid,
    #[error("link code expired")]
    LinkCodeExpired,
    #[error("link code already used")]
    LinkCodeUsed,
    #[error("telegram already linked")]
    TelegramAlreadyLinked,
    #[error("{0}")]
    InvalidArgument(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// gRPC code the error is reported with.
    #[must_use]
    pub fn code(&self) -> Code {
        match self {
            Self::InvalidCredentials
            | Self::InvalidToken
            | Self::ExpiredToken
            | Self::Unauthenticated(_)
            | Self::BadSignature
            | Self::StaleTimestamp
            | Self::Replay => Code::Unauthenticated,
            Self::Forbidden => Code::PermissionDenied,
            Self::EmailTaken | Self::TelegramAlreadyLinked => Code::AlreadyExists,
            Self::LinkCodeInvalid => Code::NotFound,
            Self::LinkCodeExpired | Self::LinkCodeUsed => Code::FailedPrecondition,
            Self::InvalidArgument(_) => Code::InvalidArgument,
            Self::Internal(_) => Code::Internal,
        }
    }
}

impl From<AuthError> for Status {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Internal(detail) => {
                error!("internal error: {detail}");
                Status::internal("internal error")
            }
            other => Status::new(other.code(), other.to_string()),
        }
    }
}

impl From<token::Error> for AuthError {
    fn from(err: token::Error) -> Self {
        match err {
            token::Error::InvalidToken => Self::InvalidToken,
            token::Error::ExpiredToken => Self::ExpiredToken,
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<hasher::Error> for AuthError {
    fn from(err: hasher::Error) -> Self {
        match err {
            hasher::Error::EmptyInput => Self::InvalidArgument("password is required".to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<BotAuthError> for AuthError {
    fn from(err: BotAuthError) -> Self {
        match err {
            // Unknown bots look the same as forged signatures to the caller.
            BotAuthError::UnknownBot | BotAuthError::BadSignature => Self::BadSignature,
            BotAuthError::StaleTimestamp => Self::StaleTimestamp,
            BotAuthError::Replay => Self::Replay,
            BotAuthError::Internal(detail) => Self::Internal(detail),
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateEmail => Self::EmailTaken,
            StoreError::LinkCodeNotFound => Self::LinkCodeInvalid,
            StoreError::LinkCodeExpired => Self::LinkCodeExpired,
            StoreError::LinkCodeUsed => Self::LinkCodeUsed,
            StoreError::TelegramAlreadyLinked => Self::TelegramAlreadyLinked,
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for AuthError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(err.to_string())
    }
}
