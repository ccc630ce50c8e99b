use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

use crate::auth::bot::{DEFAULT_MAX_AGE_SECONDS, DEFAULT_MAX_FUTURE_SECONDS};

pub const ARG_BOT_SECRETS: &str = "bot-secrets";
pub const ARG_BOT_MAX_AGE_SECONDS: &str = "bot-max-age-seconds";
pub const ARG_BOT_MAX_FUTURE_SECONDS: &str = "bot-max-future-seconds";

#[derive(Debug, Clone)]
pub struct Options {
    /// `id=secret` pairs separated by commas.
    pub secrets: SecretString,
    pub max_age_seconds: i64,
    pub max_future_seconds: i64,
}

impl Options {
    /// # Errors
    /// Returns an error if a value cannot be read.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        Ok(Self {
            secrets: SecretString::from(
                matches
                    .get_one::<String>(ARG_BOT_SECRETS)
                    .cloned()
                    .unwrap_or_default(),
            ),
            max_age_seconds: matches
                .get_one::<i64>(ARG_BOT_MAX_AGE_SECONDS)
                .copied()
                .unwrap_or(DEFAULT_MAX_AGE_SECONDS),
            max_future_seconds: matches
                .get_one::<i64>(ARG_BOT_MAX_FUTURE_SECONDS)
                .copied()
                .unwrap_or(DEFAULT_MAX_FUTURE_SECONDS),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_BOT_SECRETS)
                .long(ARG_BOT_SECRETS)
                .help("Bot shared secrets as id=secret,id2=secret2 (empty rejects every bot call)")
                .env("BOTTRADE_BOT_SECRETS")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_BOT_MAX_AGE_SECONDS)
                .long(ARG_BOT_MAX_AGE_SECONDS)
                .help("Oldest accepted bot timestamp, in seconds behind now")
                .env("BOTTRADE_BOT_MAX_AGE_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_BOT_MAX_FUTURE_SECONDS)
                .long(ARG_BOT_MAX_FUTURE_SECONDS)
                .help("Newest accepted bot timestamp, in seconds ahead of now")
                .env("BOTTRADE_BOT_MAX_FUTURE_SECONDS")
                .default_value("30")
                .value_parser(clap::value_parser!(i64)),
        )
}
