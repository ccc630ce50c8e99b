//! Authentication core: password hashing, access tokens, bot signatures, per-call
//! authorization and the auth use cases built on top of them.

pub mod authorizer;
pub mod bot;
pub mod error;
pub mod hasher;
pub mod service;
pub mod token;

use std::{fmt, num::ParseIntError, str::FromStr};

pub use self::error::AuthError;

/// Numeric user identifier as stored in the `users` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(i64);

impl UserId {
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for UserId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<i64>().map(Self)
    }
}

/// Identity attached to a call that presented a valid bearer token.
///
/// Lives in the request extensions for the duration of one call only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser(pub UserId);

impl AuthenticatedUser {
    #[must_use]
    pub const fn user_id(self) -> UserId {
        self.0
    }
}
