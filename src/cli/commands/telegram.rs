use clap::{Arg, ArgMatches, Command};

use crate::auth::service::{DEFAULT_LINK_CODE_TTL_SECONDS, MAX_LINK_CODE_TTL_SECONDS};

pub const ARG_TELEGRAM_LINK_CODE_TTL_SECONDS: &str = "telegram-link-code-ttl-seconds";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    pub link_code_ttl_seconds: i64,
}

impl Options {
    /// # Errors
    /// Returns an error if the TTL is not positive or exceeds [`MAX_LINK_CODE_TTL_SECONDS`].
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let link_code_ttl_seconds = matches
            .get_one::<i64>(ARG_TELEGRAM_LINK_CODE_TTL_SECONDS)
            .copied()
            .unwrap_or(DEFAULT_LINK_CODE_TTL_SECONDS);
        if link_code_ttl_seconds <= 0 {
            anyhow::bail!("--{ARG_TELEGRAM_LINK_CODE_TTL_SECONDS} must be positive");
        }
        if link_code_ttl_seconds > MAX_LINK_CODE_TTL_SECONDS {
            anyhow::bail!(
                "--{ARG_TELEGRAM_LINK_CODE_TTL_SECONDS} must be at most {MAX_LINK_CODE_TTL_SECONDS}"
            );
        }

        Ok(Self {
            link_code_ttl_seconds,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command.arg(
        Arg::new(ARG_TELEGRAM_LINK_CODE_TTL_SECONDS)
            .long(ARG_TELEGRAM_LINK_CODE_TTL_SECONDS)
            .help("Lifetime of Telegram link codes in seconds")
            .env("BOTTRADE_TELEGRAM_LINK_CODE_TTL_SECONDS")
            .default_value("600")
            .value_parser(clap::value_parser!(i64)),
    )
}
