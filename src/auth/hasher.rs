//! Argon2id password hashing.
//!
//! Hashes are stored as `argon2id$v=19$m=<KiB>,t=<iterations>,p=<lanes>$<salt>$<key>` with salt
//! and key in standard base64 without padding. Every parameter needed to verify travels with the
//! hash, so stored hashes keep verifying after the configured cost changes.

use argon2::{Algorithm, Argon2, Params, Version};
use base64ct::{Base64Unpadded, Encoding};
use rand::{rngs::OsRng, RngCore};
use subtle::ConstantTimeEq;
use thiserror::Error;

pub const ALGORITHM: &str = "argon2id";
const VERSION_TAG: &str = "v=19";

pub const DEFAULT_MEMORY_KIB: u32 = 64 * 1024;
pub const DEFAULT_ITERATIONS: u32 = 3;
pub const DEFAULT_PARALLELISM: u32 = 1;
pub const DEFAULT_SALT_LEN: usize = 16;
pub const DEFAULT_KEY_LEN: usize = 32;

const MIN_MEMORY_KIB: u32 = 8 * 1024;
const MIN_ITERATIONS: u32 = 2;
const MAX_BASE_PARALLELISM: u32 = 32;
const MIN_SALT_LEN: usize = 16;
const MIN_KEY_LEN: usize = 32;
const MAX_BASE_MEMORY_KIB: u32 = 1024 * 1024;
const MAX_BASE_ITERATIONS: u32 = 50;

// Hard ceilings for configured maxima and for parameters embedded in stored hashes.
const CEILING_MEMORY_KIB: u32 = 1024 * 1024;
const CEILING_ITERATIONS: u32 = 100;
const CEILING_PARALLELISM: u32 = 64;

const MIN_STORED_SALT_LEN: usize = 8;
const MIN_STORED_KEY_LEN: usize = 16;
const MAX_ENCODED_PARALLELISM: u32 = 255;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("invalid password hasher config: {0}")]
    InvalidConfig(String),
    #[error("password is empty")]
    EmptyInput,
    #[error("invalid password hash format")]
    InvalidHashFormat,
    #[error("failed to generate salt")]
    Salt,
    #[error("argon2 failure: {0}")]
    Argon2(String),
}

/// Cost parameters for [`PasswordHasher`].
///
/// Maxima left as `None` default to the base value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HasherConfig {
    pub algorithm: String,
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
    pub salt_len: usize,
    pub key_len: usize,
    pub max_memory_kib: Option<u32>,
    pub max_iterations: Option<u32>,
    pub max_parallelism: Option<u32>,
}

impl Default for HasherConfig {
    fn default() -> Self {
        Self {
            algorithm: ALGORITHM.to_string(),
            memory_kib: DEFAULT_MEMORY_KIB,
            iterations: DEFAULT_ITERATIONS,
            parallelism: DEFAULT_PARALLELISM,
            salt_len: DEFAULT_SALT_LEN,
            key_len: DEFAULT_KEY_LEN,
            max_memory_kib: None,
            max_iterations: None,
            max_parallelism: None,
        }
    }
}

impl HasherConfig {
    #[must_use]
    pub fn with_memory_kib(mut self, memory_kib: u32) -> Self {
        self.memory_kib = memory_kib;
        self
    }

    #[must_use]
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    #[must_use]
    pub fn with_parallelism(mut self, parallelism: u32) -> Self {
        self.parallelism = parallelism;
        self
    }

    #[must_use]
    pub fn with_salt_len(mut self, salt_len: usize) -> Self {
        self.salt_len = salt_len;
        self
    }

    #[must_use]
    pub fn with_key_len(mut self, key_len: usize) -> Self {
        self.key_len = key_len;
        self
    }

    #[must_use]
    pub fn with_maxima(
        mut self,
        max_memory_kib: Option<u32>,
        max_iterations: Option<u32>,
        max_parallelism: Option<u32>,
    ) -> Self {
        self.max_memory_kib = max_memory_kib;
        self.max_iterations = max_iterations;
        self.max_parallelism = max_parallelism;
        self
    }
}

/// Parameters decoded from a stored hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CostParams {
    memory_kib: u32,
    iterations: u32,
    parallelism: u32,
}

#[derive(Debug)]
struct DecodedHash {
    params: CostParams,
    salt: Vec<u8>,
    key: Vec<u8>,
}

/// Validated, immutable argon2id hasher.
#[derive(Debug, Clone)]
pub struct PasswordHasher {
    base: CostParams,
    max: CostParams,
    salt_len: usize,
    key_len: usize,
}

fn invalid(reason: impl Into<String>) -> Error {
    Error::InvalidConfig(reason.into())
}

impl PasswordHasher {
    /// Validate `config` and build a hasher.
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] naming the first violated rule.
    pub fn new(config: HasherConfig) -> Result<Self, Error> {
        if config.algorithm != ALGORITHM {
            return Err(invalid(format!(
                "unsupported algorithm {:?}, only {ALGORITHM} is allowed",
                config.algorithm
            )));
        }

        if config.memory_kib == 0
            || config.iterations == 0
            || config.parallelism == 0
            || config.salt_len == 0
            || config.key_len == 0
        {
            return Err(invalid("memory, iterations, parallelism, salt and key length must be non-zero"));
        }

        if config.memory_kib < MIN_MEMORY_KIB {
            return Err(invalid(format!("memory must be at least {MIN_MEMORY_KIB} KiB")));
        }
        if config.iterations < MIN_ITERATIONS {
            return Err(invalid(format!("iterations must be at least {MIN_ITERATIONS}")));
        }
        if config.parallelism > MAX_BASE_PARALLELISM {
            return Err(invalid(format!("parallelism must be at most {MAX_BASE_PARALLELISM}")));
        }
        if config.salt_len < MIN_SALT_LEN {
            return Err(invalid(format!("salt length must be at least {MIN_SALT_LEN} bytes")));
        }
        if config.key_len < MIN_KEY_LEN {
            return Err(invalid(format!("key length must be at least {MIN_KEY_LEN} bytes")));
        }
        if config.memory_kib > MAX_BASE_MEMORY_KIB {
            return Err(invalid(format!("memory must be at most {MAX_BASE_MEMORY_KIB} KiB")));
        }
        if config.iterations > MAX_BASE_ITERATIONS {
            return Err(invalid(format!("iterations must be at most {MAX_BASE_ITERATIONS}")));
        }

        let max = CostParams {
            memory_kib: config.max_memory_kib.unwrap_or(config.memory_kib),
            iterations: config.max_iterations.unwrap_or(config.iterations),
            parallelism: config.max_parallelism.unwrap_or(config.parallelism),
        };

        if max.memory_kib < config.memory_kib {
            return Err(invalid("max memory must not be below memory"));
        }
        if max.iterations < config.iterations {
            return Err(invalid("max iterations must not be below iterations"));
        }
        if max.parallelism < config.parallelism {
            return Err(invalid("max parallelism must not be below parallelism"));
        }
        if max.memory_kib > CEILING_MEMORY_KIB {
            return Err(invalid(format!("max memory must be at most {CEILING_MEMORY_KIB} KiB")));
        }
        if max.iterations > CEILING_ITERATIONS {
            return Err(invalid(format!("max iterations must be at most {CEILING_ITERATIONS}")));
        }
        if max.parallelism > CEILING_PARALLELISM {
            return Err(invalid(format!("max parallelism must be at most {CEILING_PARALLELISM}")));
        }

        // Catch combinations argon2 itself refuses (memory below 8 blocks per lane).
        argon2_for(
            CostParams {
                memory_kib: config.memory_kib,
                iterations: config.iterations,
                parallelism: config.parallelism,
            },
            config.key_len,
        )
        .map_err(|e| invalid(e.to_string()))?;

        Ok(Self {
            base: CostParams {
                memory_kib: config.memory_kib,
                iterations: config.iterations,
                parallelism: config.parallelism,
            },
            max,
            salt_len: config.salt_len,
            key_len: config.key_len,
        })
    }

    /// Hash `password` with a fresh random salt.
    ///
    /// # Errors
    /// [`Error::EmptyInput`] for an empty password, or an argon2/RNG failure.
    pub fn hash(&self, password: &str) -> Result<String, Error> {
        if password.is_empty() {
            return Err(Error::EmptyInput);
        }

        let mut salt = vec![0u8; self.salt_len];
        OsRng.try_fill_bytes(&mut salt).map_err(|_| Error::Salt)?;

        let mut key = vec![0u8; self.key_len];
        argon2_for(self.base, self.key_len)?
            .hash_password_into(password.as_bytes(), &salt, &mut key)
            .map_err(|e| Error::Argon2(e.to_string()))?;

        Ok(encode(self.base, &salt, &key))
    }

    /// Check `password` against a stored hash using the parameters embedded in it.
    ///
    /// # Errors
    /// [`Error::InvalidHashFormat`] when the stored hash cannot be parsed.
    pub fn verify(&self, password: &str, encoded: &str) -> Result<bool, Error> {
        let decoded = decode(encoded)?;

        let mut computed = vec![0u8; decoded.key.len()];
        argon2_for(decoded.params, decoded.key.len())
            .map_err(|_| Error::InvalidHashFormat)?
            .hash_password_into(password.as_bytes(), &decoded.salt, &mut computed)
            .map_err(|e| Error::Argon2(e.to_string()))?;

        Ok(computed.ct_eq(&decoded.key).into())
    }

    /// Whether a stored hash was produced outside the configured cost window and should be
    /// replaced on the next successful login.
    ///
    /// # Errors
    /// [`Error::InvalidHashFormat`] when the stored hash cannot be parsed.
    pub fn needs_rehash(&self, encoded: &str) -> Result<bool, Error> {
        let decoded = decode(encoded)?;
        let params = decoded.params;

        let within = |value: u32, base: u32, max: u32| value >= base && value <= max;

        Ok(!within(params.memory_kib, self.base.memory_kib, self.max.memory_kib)
            || !within(params.iterations, self.base.iterations, self.max.iterations)
            || !within(params.parallelism, self.base.parallelism, self.max.parallelism)
            || decoded.salt.len() < self.salt_len
            || decoded.key.len() < self.key_len)
    }
}

fn argon2_for(params: CostParams, key_len: usize) -> Result<Argon2<'static>, Error> {
    let params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(key_len),
    )
    .map_err(|e| Error::Argon2(e.to_string()))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

fn encode(params: CostParams, salt: &[u8], key: &[u8]) -> String {
    format!(
        "{ALGORITHM}${VERSION_TAG}$m={},t={},p={}${}${}",
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Base64Unpadded::encode_string(salt),
        Base64Unpadded::encode_string(key),
    )
}

fn decode(encoded: &str) -> Result<DecodedHash, Error> {
    let parts: Vec<&str> = encoded.split('$').collect();
    let [algorithm, version, params, salt, key] = parts.as_slice() else {
        return Err(Error::InvalidHashFormat);
    };

    if *algorithm != ALGORITHM || *version != VERSION_TAG {
        return Err(Error::InvalidHashFormat);
    }

    let params = decode_params(params)?;

    let salt = Base64Unpadded::decode_vec(salt).map_err(|_| Error::InvalidHashFormat)?;
    let key = Base64Unpadded::decode_vec(key).map_err(|_| Error::InvalidHashFormat)?;
    if salt.len() < MIN_STORED_SALT_LEN || key.len() < MIN_STORED_KEY_LEN {
        return Err(Error::InvalidHashFormat);
    }

    Ok(DecodedHash { params, salt, key })
}

fn decode_params(raw: &str) -> Result<CostParams, Error> {
    let mut memory_kib = None;
    let mut iterations = None;
    let mut parallelism = None;

    for pair in raw.split(',') {
        let (name, value) = pair.split_once('=').ok_or(Error::InvalidHashFormat)?;
        if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidHashFormat);
        }
        let value: u32 = value.parse().map_err(|_| Error::InvalidHashFormat)?;

        let slot = match name {
            "m" => &mut memory_kib,
            "t" => &mut iterations,
            "p" => &mut parallelism,
            _ => return Err(Error::InvalidHashFormat),
        };
        if slot.replace(value).is_some() {
            return Err(Error::InvalidHashFormat);
        }
    }

    let (Some(memory_kib), Some(iterations), Some(parallelism)) =
        (memory_kib, iterations, parallelism)
    else {
        return Err(Error::InvalidHashFormat);
    };

    if memory_kib == 0
        || iterations == 0
        || parallelism == 0
        || parallelism > MAX_ENCODED_PARALLELISM
        || memory_kib > CEILING_MEMORY_KIB
        || iterations > CEILING_ITERATIONS
        || parallelism > CEILING_PARALLELISM
    {
        return Err(Error::InvalidHashFormat);
    }

    Ok(CostParams {
        memory_kib,
        iterations,
        parallelism,
    })
}
