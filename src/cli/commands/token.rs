use anyhow::Context;
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

use crate::auth::token::{TokenConfig, DEFAULT_CLOCK_SKEW_SECONDS, DEFAULT_ISSUER, DEFAULT_TTL_SECONDS};

pub const ARG_SECRET_KEY: &str = "secret-key";
pub const ARG_TOKEN_TTL_SECONDS: &str = "token-ttl-seconds";
pub const ARG_TOKEN_ISSUER: &str = "token-issuer";
pub const ARG_TOKEN_CLOCK_SKEW_SECONDS: &str = "token-clock-skew-seconds";

#[derive(Debug, Clone)]
pub struct Options {
    pub secret: SecretString,
    pub ttl_seconds: i64,
    pub issuer: String,
    pub clock_skew_seconds: i64,
}

impl Options {
    /// # Errors
    /// Returns an error if the secret key is missing or blank.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let secret = matches
            .get_one::<String>(ARG_SECRET_KEY)
            .filter(|v| !v.trim().is_empty())
            .cloned()
            .context("missing required argument: --secret-key")?;

        Ok(Self {
            secret: SecretString::from(secret),
            ttl_seconds: matches
                .get_one::<i64>(ARG_TOKEN_TTL_SECONDS)
                .copied()
                .unwrap_or(DEFAULT_TTL_SECONDS),
            issuer: matches
                .get_one::<String>(ARG_TOKEN_ISSUER)
                .cloned()
                .unwrap_or_else(|| DEFAULT_ISSUER.to_string()),
            clock_skew_seconds: matches
                .get_one::<i64>(ARG_TOKEN_CLOCK_SKEW_SECONDS)
                .copied()
                .unwrap_or(DEFAULT_CLOCK_SKEW_SECONDS),
        })
    }

    #[must_use]
    pub fn config(&self) -> TokenConfig {
        TokenConfig::new(self.secret.clone())
            .with_ttl_seconds(self.ttl_seconds)
            .with_issuer(self.issuer.clone())
            .with_clock_skew_seconds(self.clock_skew_seconds)
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_SECRET_KEY)
                .long(ARG_SECRET_KEY)
                .help("HMAC secret used to sign access tokens (at least 16 bytes)")
                .env("BOTTRADE_SECRET_KEY")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_TOKEN_TTL_SECONDS)
                .long(ARG_TOKEN_TTL_SECONDS)
                .help("Access token lifetime in seconds")
                .env("BOTTRADE_TOKEN_TTL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_TOKEN_ISSUER)
                .long(ARG_TOKEN_ISSUER)
                .help("Issuer written to and required in access tokens")
                .env("BOTTRADE_TOKEN_ISSUER")
                .default_value(DEFAULT_ISSUER),
        )
        .arg(
            Arg::new(ARG_TOKEN_CLOCK_SKEW_SECONDS)
                .long(ARG_TOKEN_CLOCK_SKEW_SECONDS)
                .help("Tolerated clock skew for token issue time in seconds")
                .env("BOTTRADE_TOKEN_CLOCK_SKEW_SECONDS")
                .default_value("30")
                .value_parser(clap::value_parser!(i64)),
        )
}
