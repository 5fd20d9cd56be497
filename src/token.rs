// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Access token minting.
//!
//! Tokens are ES256 JWTs carrying `{dat, iat, nbf, exp, iis}`. The P-256
//! signing key is derived from the unlocked identity secret, so only a
//! holder of the released secret can mint one. The secp256k1 identity key
//! itself is never handed to a second signature scheme.
//!
//! This service does not verify tokens; [`TokenSigningKey::public_key_pem`]
//! is exposed for whoever does.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hkdf::Hkdf;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use p256::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::identity::IdentitySecret;

/// Domain separation for the identity → token key derivation.
const TOKEN_KEY_SALT: &[u8] = b"promise-cards/token-signing-key";
const TOKEN_KEY_INFO: &[u8] = b"es256/v1";

/// Token errors.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Token key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Token lifetime out of range: {0:?}")]
    InvalidTtl(Duration),

    #[error("Token signing failed: {0}")]
    Signing(String),
}

/// JWT claim set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Opaque payload.
    pub dat: Value,
    /// Issued at (Unix seconds).
    pub iat: i64,
    /// Not before; always equal to `iat`.
    pub nbf: i64,
    /// Expiry; always `iat + ttl`.
    pub exp: i64,
    /// Issuer string.
    pub iis: String,
}

/// A minted token and the claims it carries.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub claims: AccessClaims,
}

/// P-256 key used to sign access tokens.
pub struct TokenSigningKey {
    key: p256::SecretKey,
}

impl TokenSigningKey {
    /// Derive the token key for an identity with HKDF-SHA256.
    ///
    /// Output blocks that are not a valid P-256 scalar are skipped by
    /// bumping a counter appended to the info string.
    pub fn derive(identity: &IdentitySecret) -> Result<Self, TokenError> {
        let ikm = identity.to_bytes();
        let hkdf = Hkdf::<Sha256>::new(Some(TOKEN_KEY_SALT), &ikm);

        for counter in 0u8..=u8::MAX {
            let mut okm = Zeroizing::new([0u8; 32]);
            hkdf.expand_multi_info(&[TOKEN_KEY_INFO, &[counter][..]], &mut okm[..])
                .map_err(|e| TokenError::KeyDerivation(e.to_string()))?;
            if let Ok(key) = p256::SecretKey::from_slice(&okm[..]) {
                return Ok(Self { key });
            }
        }

        Err(TokenError::KeyDerivation(
            "no valid P-256 scalar in derivation stream".to_string(),
        ))
    }

    /// SPKI PEM of the verifying key.
    pub fn public_key_pem(&self) -> Result<String, TokenError> {
        self.key
            .public_key()
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| TokenError::KeyDerivation(e.to_string()))
    }

    fn encoding_key(&self) -> Result<EncodingKey, TokenError> {
        let pem = self
            .key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| TokenError::Signing(e.to_string()))?;
        EncodingKey::from_ec_pem(pem.as_bytes()).map_err(|e| TokenError::Signing(e.to_string()))
    }
}

impl fmt::Debug for TokenSigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSigningKey").finish_non_exhaustive()
    }
}

/// Mint a token issued now.
pub fn create_access_token(
    ttl: Duration,
    payload: Value,
    signing_key: &TokenSigningKey,
    issuer: &str,
) -> Result<AccessToken, TokenError> {
    create_access_token_at(Utc::now(), ttl, payload, signing_key, issuer)
}

/// Mint a token issued at `now`.
pub fn create_access_token_at(
    now: DateTime<Utc>,
    ttl: Duration,
    payload: Value,
    signing_key: &TokenSigningKey,
    issuer: &str,
) -> Result<AccessToken, TokenError> {
    let ttl_secs = i64::try_from(ttl.as_secs()).map_err(|_| TokenError::InvalidTtl(ttl))?;
    let iat = now.timestamp();
    let exp = iat.checked_add(ttl_secs).ok_or(TokenError::InvalidTtl(ttl))?;

    let claims = AccessClaims {
        dat: payload,
        iat,
        nbf: iat,
        exp,
        iis: issuer.to_string(),
    };

    let token = encode(
        &Header::new(Algorithm::ES256),
        &claims,
        &signing_key.encoding_key()?,
    )
    .map_err(|e| TokenError::Signing(e.to_string()))?;

    Ok(AccessToken { token, claims })
}

/// Mints tokens with a fixed lifetime and issuer.
#[derive(Debug, Clone)]
pub struct TokenMinter {
    ttl: Duration,
    issuer: String,
}

impl TokenMinter {
    pub fn new(ttl: Duration, issuer: impl Into<String>) -> Self {
        Self {
            ttl,
            issuer: issuer.into(),
        }
    }

    /// Mint a token for `payload`, signed with the key derived from `identity`.
    pub fn mint(&self, identity: &IdentitySecret, payload: Value) -> Result<AccessToken, TokenError> {
        let key = TokenSigningKey::derive(identity)?;
        create_access_token(self.ttl, payload, &key, &self.issuer)
    }
}
