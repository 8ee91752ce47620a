// ABOUTME: Credential codec for key generation, hashing, and display hints
// ABOUTME: Draws CSPRNG entropy, base62-encodes it, and derives SHA-256 digests
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Keygate Contributors

//! # Credential Codec
//!
//! Pure functions (modulo the random source) for the three credential
//! representations: the one-time plaintext, the stored digest, and the
//! display-safe hint. The digest is the sole storage and lookup key and is
//! never reversible to the secret.

use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::constants::system_config::MIN_HINT_BODY_LEN;

/// 62-symbol encoding alphabet: digits, upper, lower
const ALPHABET: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Credential codec
#[derive(Debug, Clone, Copy, Default)]
pub struct CredentialCodec;

impl CredentialCodec {
    /// Create a new codec
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Generate a new plaintext secret: `prefix` + base62 encoding of
    /// `entropy_bytes` cryptographically secure random bytes
    #[must_use]
    pub fn generate(&self, prefix: &str, entropy_bytes: usize) -> String {
        let mut buf = vec![0u8; entropy_bytes];
        OsRng.fill_bytes(&mut buf);
        format!("{prefix}{}", encode_base62(&buf))
    }

    /// Compute the one-way SHA-256 digest of a plaintext secret, rendered as
    /// lowercase hex
    #[must_use]
    pub fn digest(&self, plaintext: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(plaintext.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Derive the display-safe hint for a plaintext secret.
    ///
    /// The body after the prefix's separator is truncated to
    /// `first4...last4`; bodies shorter than eight characters are returned
    /// unchanged because they are too short to safely truncate.
    #[must_use]
    pub fn hint(&self, plaintext: &str) -> String {
        let (prefix, body) = match plaintext.rsplit_once('_') {
            Some((prefix, body)) => (Some(prefix), body),
            None => (None, plaintext),
        };

        // Counted in chars, not bytes: the input is arbitrary caller text
        // even though generated secrets are always ASCII
        let chars: Vec<char> = body.chars().collect();
        if chars.len() < MIN_HINT_BODY_LEN {
            return plaintext.to_owned();
        }

        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        match prefix {
            Some(prefix) => format!("{prefix}_{head}...{tail}"),
            None => format!("{head}...{tail}"),
        }
    }
}

/// Encode bytes as a big-endian integer in the 62-symbol alphabet. The zero
/// value encodes to the alphabet's first symbol.
fn encode_base62(bytes: &[u8]) -> String {
    let mut digits = bytes.to_vec();
    let mut out: Vec<char> = Vec::new();

    while digits.iter().any(|&b| b != 0) {
        let mut rem: u32 = 0;
        for digit in &mut digits {
            let acc = (rem << 8) | u32::from(*digit);
            *digit = (acc / 62) as u8;
            rem = acc % 62;
        }
        out.push(char::from(ALPHABET[rem as usize]));
    }

    if out.is_empty() {
        out.push(char::from(ALPHABET[0]));
    }

    out.reverse();
    out.into_iter().collect()
}
