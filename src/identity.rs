// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Identity keypairs.
//!
//! Identities are secp256k1 keys addressed the Ethereum way:
//!
//! 1. Take the uncompressed public key (65 bytes, `0x04` prefix)
//! 2. Keccak-256 the 64 coordinate bytes (prefix dropped)
//! 3. Keep the last 20 bytes of the hash
//!
//! The private half only ever leaves this module as raw bytes headed for
//! time-lock encryption, or as a derived token signing key.

use std::fmt;

use alloy::primitives::{keccak256, Address};
use chrono::{DateTime, Utc};
use k256::ecdsa::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

/// Length of a raw secp256k1 private key.
pub const SECRET_KEY_LEN: usize = 32;

/// Errors raised while creating or loading identity keys.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("OS entropy source failed: {0}")]
    Entropy(String),

    #[error("Invalid identity secret: {0}")]
    InvalidSecret(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}

/// A secp256k1 identity private key.
///
/// `Debug` never prints key material.
#[derive(Clone)]
pub struct IdentitySecret {
    key: SigningKey,
}

impl IdentitySecret {
    /// Draw a fresh key from the OS RNG.
    ///
    /// Candidates outside the curve order are redrawn; an RNG failure is
    /// returned as [`IdentityError::Entropy`].
    pub fn generate() -> Result<Self, IdentityError> {
        let mut candidate = Zeroizing::new([0u8; SECRET_KEY_LEN]);
        loop {
            OsRng
                .try_fill_bytes(&mut candidate[..])
                .map_err(|e| IdentityError::Entropy(e.to_string()))?;

            if let Ok(key) = SigningKey::from_slice(&candidate[..]) {
                return Ok(Self { key });
            }
        }
    }

    /// Load a key from its 32 raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdentityError> {
        if bytes.len() != SECRET_KEY_LEN {
            return Err(IdentityError::InvalidSecret(format!(
                "expected {SECRET_KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        SigningKey::from_slice(bytes)
            .map(|key| Self { key })
            .map_err(|e| IdentityError::InvalidSecret(e.to_string()))
    }

    /// Load a key from a decrypted time-lock plaintext.
    ///
    /// Accepts the raw 32 bytes, and also the `0x`-prefixed hex text that
    /// earlier deployments locked.
    pub fn from_plaintext(plaintext: &[u8]) -> Result<Self, IdentityError> {
        if plaintext.len() == SECRET_KEY_LEN {
            return Self::from_bytes(plaintext);
        }

        let text = std::str::from_utf8(plaintext)
            .map_err(|_| IdentityError::InvalidSecret("unrecognised plaintext layout".to_string()))?
            .trim();
        let hex = text.strip_prefix("0x").unwrap_or(text);
        let bytes = Zeroizing::new(
            alloy::hex::decode(hex).map_err(|e| IdentityError::InvalidSecret(e.to_string()))?,
        );
        Self::from_bytes(&bytes)
    }

    /// Raw private key bytes. Callers must not persist or log them.
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.key.to_bytes().to_vec())
    }

    /// The Ethereum-style address of this key.
    pub fn address(&self) -> Address {
        address_of(self.key.verifying_key())
    }
}

impl fmt::Debug for IdentitySecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentitySecret")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

/// Public identity record created at provisioning time.
#[derive(Debug, Clone)]
pub struct Identity {
    pub address: Address,
    pub nickname: String,
    pub created_at: DateTime<Utc>,
}

impl Identity {
    pub fn new(address: Address, nickname: impl Into<String>) -> Self {
        Self {
            address,
            nickname: nickname.into(),
            created_at: Utc::now(),
        }
    }
}

/// Generate a fresh identity, returning the secret and its address.
pub fn generate_identity() -> Result<(IdentitySecret, Address), IdentityError> {
    let secret = IdentitySecret::generate()?;
    let address = secret.address();
    Ok((secret, address))
}

/// Derive the address for raw private key bytes.
pub fn address_from_secret(bytes: &[u8]) -> Result<Address, IdentityError> {
    IdentitySecret::from_bytes(bytes).map(|secret| secret.address())
}

/// Derive the address of a public key.
pub fn address_of(verifying_key: &VerifyingKey) -> Address {
    let uncompressed = verifying_key.to_encoded_point(false);
    let hash = keccak256(&uncompressed.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

/// Parse a caller-supplied address; `0x` prefix optional, any letter case.
pub fn parse_address(raw: &str) -> Result<Address, IdentityError> {
    let trimmed = raw.trim();
    let hex = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = alloy::hex::decode(hex)
        .map_err(|e| IdentityError::InvalidAddress(format!("{raw:?}: {e}")))?;
    if bytes.len() != 20 {
        return Err(IdentityError::InvalidAddress(format!(
            "{raw:?}: expected 20 bytes, got {}",
            bytes.len()
        )));
    }
    Ok(Address::from_slice(&bytes))
}
