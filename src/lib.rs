//! # BotTrade auth service
//!
//! Authentication and authorization core behind the `bottrade.auth.v1.AuthService` gRPC API.
//!
//! ## Credentials
//!
//! Web users register with email and password. Passwords are hashed with **argon2id** and
//! stored in a self-describing `argon2id$v=19$m=..,t=..,p=..$salt$key` string, so hashes made
//! under older parameters keep verifying and are upgraded on the next successful login.
//!
//! ## Access tokens
//!
//! Successful logins return an HS256 bearer token carrying the user id, issuer and expiry.
//! Tokens are stateless; there is no refresh or revocation.
//!
//! ## Call tiers
//!
//! Every RPC is classified by exact method name:
//!
//! - **public**: `Register`, `Login`;
//! - **bot**: `LinkTelegram`, `TelegramAuth`, signed with a per-bot HMAC secret and a
//!   timestamp/nonce pair that is rejected when stale or replayed;
//! - **user**: everything else, which requires `authorization: Bearer <token>`.
//!
//! ## Telegram
//!
//! A signed-in user requests a one-time link code and gives it to the bot, which redeems it
//! to bind the Telegram account. The bot can then sign users in by Telegram id alone,
//! creating a Telegram-only account on first contact.

pub mod auth;
pub mod cli;
pub mod grpc;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }
}
