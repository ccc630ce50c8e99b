use clap::{Arg, ArgMatches, Command};

use crate::auth::hasher::{
    HasherConfig, ALGORITHM, DEFAULT_ITERATIONS, DEFAULT_KEY_LEN, DEFAULT_MEMORY_KIB,
    DEFAULT_PARALLELISM, DEFAULT_SALT_LEN,
};

pub const ARG_PASSWORD_ALGORITHM: &str = "password-algorithm";
pub const ARG_PASSWORD_MEMORY_KIB: &str = "password-memory-kib";
pub const ARG_PASSWORD_ITERATIONS: &str = "password-iterations";
pub const ARG_PASSWORD_PARALLELISM: &str = "password-parallelism";
pub const ARG_PASSWORD_SALT_LENGTH: &str = "password-salt-length";
pub const ARG_PASSWORD_KEY_LENGTH: &str = "password-key-length";
pub const ARG_PASSWORD_MAX_MEMORY_KIB: &str = "password-max-memory-kib";
pub const ARG_PASSWORD_MAX_ITERATIONS: &str = "password-max-iterations";
pub const ARG_PASSWORD_MAX_PARALLELISM: &str = "password-max-parallelism";

/// Password hashing parameters. Validation happens when the hasher is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub config: HasherConfig,
}

impl Options {
    /// # Errors
    /// Returns an error if a value cannot be read.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let read_u32 = |id: &str, default: u32| matches.get_one::<u32>(id).copied().unwrap_or(default);
        let read_usize =
            |id: &str, default: usize| matches.get_one::<usize>(id).copied().unwrap_or(default);

        let config = HasherConfig {
            algorithm: matches
                .get_one::<String>(ARG_PASSWORD_ALGORITHM)
                .cloned()
                .unwrap_or_else(|| ALGORITHM.to_string()),
            memory_kib: read_u32(ARG_PASSWORD_MEMORY_KIB, DEFAULT_MEMORY_KIB),
            iterations: read_u32(ARG_PASSWORD_ITERATIONS, DEFAULT_ITERATIONS),
            parallelism: read_u32(ARG_PASSWORD_PARALLELISM, DEFAULT_PARALLELISM),
            salt_len: read_usize(ARG_PASSWORD_SALT_LENGTH, DEFAULT_SALT_LEN),
            key_len: read_usize(ARG_PASSWORD_KEY_LENGTH, DEFAULT_KEY_LEN),
            max_memory_kib: matches.get_one::<u32>(ARG_PASSWORD_MAX_MEMORY_KIB).copied(),
            max_iterations: matches.get_one::<u32>(ARG_PASSWORD_MAX_ITERATIONS).copied(),
            max_parallelism: matches.get_one::<u32>(ARG_PASSWORD_MAX_PARALLELISM).copied(),
        };

        Ok(Self { config })
    }
}

fn u32_arg(id: &'static str, env: &'static str, help: &'static str) -> Arg {
    Arg::new(id)
        .long(id)
        .help(help)
        .env(env)
        .value_parser(clap::value_parser!(u32))
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_PASSWORD_ALGORITHM)
                .long(ARG_PASSWORD_ALGORITHM)
                .help("Password hashing algorithm")
                .env("BOTTRADE_PASSWORD_ALGORITHM")
                .default_value(ALGORITHM),
        )
        .arg(
            u32_arg(
                ARG_PASSWORD_MEMORY_KIB,
                "BOTTRADE_PASSWORD_MEMORY_KIB",
                "Argon2 memory cost in KiB",
            )
            .default_value("65536"),
        )
        .arg(
            u32_arg(
                ARG_PASSWORD_ITERATIONS,
                "BOTTRADE_PASSWORD_ITERATIONS",
                "Argon2 iterations",
            )
            .default_value("3"),
        )
        .arg(
            u32_arg(
                ARG_PASSWORD_PARALLELISM,
                "BOTTRADE_PASSWORD_PARALLELISM",
                "Argon2 lanes",
            )
            .default_value("1"),
        )
        .arg(
            Arg::new(ARG_PASSWORD_SALT_LENGTH)
                .long(ARG_PASSWORD_SALT_LENGTH)
                .help("Salt length in bytes")
                .env("BOTTRADE_PASSWORD_SALT_LENGTH")
                .default_value("16")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_PASSWORD_KEY_LENGTH)
                .long(ARG_PASSWORD_KEY_LENGTH)
                .help("Derived key length in bytes")
                .env("BOTTRADE_PASSWORD_KEY_LENGTH")
                .default_value("32")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(u32_arg(
            ARG_PASSWORD_MAX_MEMORY_KIB,
            "BOTTRADE_PASSWORD_MAX_MEMORY_KIB",
            "Stored hashes above this memory cost are rehashed on login",
        ))
        .arg(u32_arg(
            ARG_PASSWORD_MAX_ITERATIONS,
            "BOTTRADE_PASSWORD_MAX_ITERATIONS",
            "Stored hashes above this iteration count are rehashed on login",
        ))
        .arg(u32_arg(
            ARG_PASSWORD_MAX_PARALLELISM,
            "BOTTRADE_PASSWORD_MAX_PARALLELISM",
            "Stored hashes above this lane count are rehashed on login",
        ))
}
