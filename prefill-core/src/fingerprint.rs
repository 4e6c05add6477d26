//! Voter fingerprints.
//!
//! A fingerprint is the only voter identifier that ever appears in a mailer
//! URL. It is the FNV-1a hash of the low 32 bits of the state-issued voter
//! number, rendered as 8 lowercase hex digits. FNV-1a is not collision
//! resistant, so the registry checks every ingestion for collisions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PrefillError, Result};

/// FNV-1a 32-bit offset basis.
pub const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;

/// FNV-1a 32-bit prime.
pub const FNV_PRIME: u32 = 0x0100_0193;

/// Length of the state-code prefix on a voter ID (e.g. `NY`).
const STATE_PREFIX_CHARS: usize = 2;

/// FNV-1a over an arbitrary byte slice.
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, &b| {
        (hash ^ u32::from(b)).wrapping_mul(FNV_PRIME)
    })
}

/// A state-issued voter ID such as `NY000000012345`.
///
/// The numeric part is kept as its digit string, so IDs of any length parse.
/// Only the low 32 bits of the number take part in fingerprinting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VoterId {
    raw: String,
    digits_at: usize,
}

impl VoterId {
    /// The two-character state prefix.
    pub fn state(&self) -> &str {
        &self.raw[..self.digits_at]
    }

    /// The numeric part, exactly as it appeared.
    pub fn digits(&self) -> &str {
        &self.raw[self.digits_at..]
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The voter number reduced modulo 2^32.
    ///
    /// Equivalent to parsing the unbounded integer and masking with
    /// `0xffff_ffff`, because reduction mod 2^32 commutes with `* 10 + d`.
    pub fn low_bits(&self) -> u32 {
        self.digits().bytes().fold(0u32, |acc, d| {
            acc.wrapping_mul(10).wrapping_add(u32::from(d - b'0'))
        })
    }

    /// Whether the voter number does not fit in 32 bits and loses entropy
    /// when fingerprinted.
    pub fn exceeds_32_bits(&self) -> bool {
        let significant = self.digits().trim_start_matches('0');
        match significant.parse::<u64>() {
            Ok(n) => n > u64::from(u32::MAX),
            Err(_) => !significant.is_empty(),
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::from_hash(fnv1a_32(&self.low_bits().to_le_bytes()))
    }
}

impl FromStr for VoterId {
    type Err = PrefillError;

    fn from_str(s: &str) -> Result<Self> {
        let raw = s.trim();
        let digits_at = raw
            .char_indices()
            .nth(STATE_PREFIX_CHARS)
            .map(|(i, _)| i)
            .ok_or_else(|| PrefillError::InvalidInput(format!("voter ID too short: {raw:?}")))?;

        let (state, digits) = raw.split_at(digits_at);
        if !state.chars().all(|c| c.is_ascii_alphabetic())
            || digits.is_empty()
            || !digits.bytes().all(|b| b.is_ascii_digit())
        {
            return Err(PrefillError::InvalidInput(format!(
                "voter ID {raw:?} is not a state prefix followed by a non-negative integer"
            )));
        }

        Ok(Self {
            raw: raw.to_string(),
            digits_at,
        })
    }
}

impl TryFrom<String> for VoterId {
    type Error = PrefillError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<VoterId> for String {
    fn from(id: VoterId) -> Self {
        id.raw
    }
}

impl fmt::Display for VoterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// 8-hex-digit public token derived from a [`VoterId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint([u8; 4]);

impl Fingerprint {
    /// Serialize a 32-bit hash little-endian.
    pub fn from_hash(hash: u32) -> Self {
        Self(hash.to_le_bytes())
    }

    /// Validate an untrusted token.
    ///
    /// Accepts exactly 8 hex characters in either case; anything else is `None`.
    pub fn parse(token: &str) -> Option<Self> {
        if token.len() != 8 || !token.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        let bytes: [u8; 4] = hex::decode(token).ok()?.try_into().ok()?;
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for Fingerprint {
    type Err = PrefillError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s).ok_or_else(|| {
            PrefillError::InvalidInput(format!("not an 8-hex-digit fingerprint: {s:?}"))
        })
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = PrefillError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.to_string()
    }
}

/// Fingerprint a raw voter ID cell.
pub fn fingerprint(voter_id: &str) -> Result<Fingerprint> {
    Ok(voter_id.parse::<VoterId>()?.fingerprint())
}
