//! Content hashing for change detection.
//!
//! Records are hashed over their canonical JSON form, so representation
//! differences (key order, `$text` wrappers) never register as changes.
//! SHA-256 is the default algorithm; BLAKE3 is available for large feeds.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::canonical;
use crate::error::SyncError;
use crate::record::Record;

/// A 256-bit content hash representing the identity of a piece of content.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// The length of the hash in bytes.
    pub const LEN: usize = 32;

    /// Create a ContentHash from raw bytes.
    #[inline]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes of the hash.
    #[inline]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to a hex string (lowercase).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a hex string.
    pub fn from_hex(s: &str) -> Result<Self, HashError> {
        if s.len() != 64 {
            return Err(HashError::InvalidLength {
                expected: 64,
                actual: s.len(),
            });
        }

        let mut bytes = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks_exact(2).enumerate() {
            let high = hex_digit(chunk[0]).ok_or(HashError::InvalidHexChar { pos: i * 2 })?;
            let low = hex_digit(chunk[1]).ok_or(HashError::InvalidHexChar { pos: i * 2 + 1 })?;
            bytes[i] = (high << 4) | low;
        }

        Ok(Self(bytes))
    }

    /// Check if this hash matches another (constant-time comparison).
    #[inline]
    pub fn eq_ct(&self, other: &Self) -> bool {
        constant_time_eq::constant_time_eq_n(&self.0, &other.0)
    }
}

/// Parse a single hex digit.
#[inline]
const fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({}..)", &self.to_hex()[..16])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for ContentHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Errors that can occur when working with content hashes.
#[derive(Debug, Clone, Error)]
pub enum HashError {
    /// Hex string has wrong length.
    #[error("invalid hash length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// Hex string contains invalid character at position.
    #[error("invalid hex character at position {pos}")]
    InvalidHexChar { pos: usize },
}

/// Hash algorithm for record change detection.
///
/// Snapshots record which algorithm produced them; hashes from different
/// algorithms are never compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Blake3,
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlgorithm::Sha256 => write!(f, "sha256"),
            HashAlgorithm::Blake3 => write!(f, "blake3"),
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha256" => Ok(HashAlgorithm::Sha256),
            "blake3" => Ok(HashAlgorithm::Blake3),
            other => Err(SyncError::Config(format!(
                "unknown hash algorithm '{other}' (expected sha256 or blake3)"
            ))),
        }
    }
}

/// Hash raw bytes with the given algorithm.
#[inline]
pub fn hash_bytes(algorithm: HashAlgorithm, content: &[u8]) -> ContentHash {
    match algorithm {
        HashAlgorithm::Sha256 => ContentHash(Sha256::digest(content).into()),
        HashAlgorithm::Blake3 => ContentHash(*blake3::hash(content).as_bytes()),
    }
}

/// Hash a record's canonical form with the given algorithm.
pub fn hash_record_with(record: &Record, algorithm: HashAlgorithm) -> ContentHash {
    hash_record_in_context(record, None, algorithm)
}

/// Hash a record's canonical form together with optional context material.
///
/// `None` hashes exactly like [`hash_record_with`]; the same record under
/// different context hashes differently. Canonical text never holds a raw
/// newline, so the separator keeps the two parts from bleeding into each
/// other.
pub fn hash_record_in_context(
    record: &Record,
    context: Option<&Value>,
    algorithm: HashAlgorithm,
) -> ContentHash {
    let canonical = canonical::normalize(record.as_value());
    let mut material = canonical::serialize(&canonical);
    if let Some(context) = context {
        material.push('\n');
        material.push_str(&canonical::serialize(&canonical::normalize(context)));
    }
    hash_bytes(algorithm, material.as_bytes())
}

/// Hash a record's canonical form with the default algorithm.
#[inline]
pub fn hash_record(record: &Record) -> ContentHash {
    hash_record_with(record, HashAlgorithm::default())
}
