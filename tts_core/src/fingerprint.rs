//! Cache keys for synthesized audio.
//!
//! A [`Fingerprint`] is an xxHash3-128 digest of the effective synthesis
//! parameters. Two requests that would produce the same audio always map to
//! the same fingerprint.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_128;

use crate::synth::SynthesisRequest;

/// Longest text prefix, in chars, that contributes to a fingerprint.
pub const FINGERPRINT_TEXT_LIMIT: usize = 65_536;

/// 128-bit digest of (text, voice, rate, volume).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(u128);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid audio id '{0}': expected 32 hex digits")]
pub struct ParseFingerprintError(String);

impl Fingerprint {
    /// Fingerprint raw parameters. `text` is expected to be normalized already.
    pub fn compute(text: &str, voice_id: u32, rate: f64, volume: f64) -> Self {
        let prefix = match text.char_indices().nth(FINGERPRINT_TEXT_LIMIT) {
            Some((idx, _)) => &text[..idx],
            None => text,
        };

        // Trailing fields never contain '|', so the layout stays unambiguous
        // even when the text does.
        let mut s = String::with_capacity(prefix.len() + 32);
        s.push_str(prefix);
        s.push('|');
        s.push_str(&voice_id.to_string());
        s.push('|');
        s.push_str(&format!("{rate:.3}"));
        s.push('|');
        s.push_str(&format!("{volume:.3}"));

        Self(xxh3_128(s.as_bytes()))
    }

    pub fn of(request: &SynthesisRequest) -> Self {
        Self::compute(&request.text, request.voice_id, request.rate, request.volume)
    }

    pub fn as_u128(&self) -> u128 {
        self.0
    }
}

impl From<u128> for Fingerprint {
    fn from(value: u128) -> Self {
        Self(value)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = ParseFingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 32 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ParseFingerprintError(s.to_string()));
        }
        u128::from_str_radix(s, 16)
            .map(Self)
            .map_err(|_| ParseFingerprintError(s.to_string()))
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
