//! Content digest primitives.
//!
//! A digest is the canonical name of a blob or manifest: `<algo>:<hex>`,
//! lowercase throughout. Only sha256 is produced by this crate; parsing
//! accepts any well-formed pair so digests coming back from a registry can
//! be compared verbatim.

use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};

use crate::error::RegistryError;

pub const SHA256: &str = "sha256";
const SHA256_HEX_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    algorithm: String,
    hex: String,
}

impl Digest {
    /// Build a digest from its two components, validating the format.
    pub fn new(algorithm: &str, hex: &str) -> Result<Self, RegistryError> {
        if algorithm.is_empty()
            || !algorithm
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
        {
            return Err(RegistryError::InvalidDigest(format!(
                "bad algorithm in {algorithm}:{hex}"
            )));
        }
        if hex.is_empty() || !hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(RegistryError::InvalidDigest(format!(
                "bad hex in {algorithm}:{hex}"
            )));
        }
        if algorithm == SHA256 && hex.len() != SHA256_HEX_LEN {
            return Err(RegistryError::InvalidDigest(format!(
                "sha256 hex must be {SHA256_HEX_LEN} characters, got {}",
                hex.len()
            )));
        }
        Ok(Digest {
            algorithm: algorithm.to_string(),
            hex: hex.to_string(),
        })
    }

    /// Sha256 of a byte slice held in memory.
    pub fn sha256(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Digest {
            algorithm: SHA256.to_string(),
            hex: hex::encode(hasher.finalize()),
        }
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// True when the sha256 of `data` equals this digest.
    pub fn verify(&self, data: &[u8]) -> bool {
        self.algorithm == SHA256 && Digest::sha256(data) == *self
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl FromStr for Digest {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algorithm, hex) = s
            .split_once(':')
            .ok_or_else(|| RegistryError::InvalidDigest(format!("missing ':' in {s}")))?;
        Digest::new(algorithm, hex)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}

/// Incremental sha256 over a stream of chunks. Tracks the byte count so
/// callers get the total size alongside the digest without a second pass.
#[derive(Default)]
pub struct DigestHasher {
    inner: Sha256,
    length: u64,
}

impl DigestHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
        self.length += chunk.len() as u64;
    }

    pub fn finalize(self) -> (Digest, u64) {
        let digest = Digest {
            algorithm: SHA256.to_string(),
            hex: hex::encode(self.inner.finalize()),
        };
        (digest, self.length)
    }
}
