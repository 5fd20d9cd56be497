// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Provisioning and redemption of time-locked identities.
//!
//! The protocol only talks to its collaborators through the traits below,
//! so the flows can run against the real adapters in [`crate::providers`]
//! and [`crate::blockchain`] or against in-memory doubles.
//!
//! ## Error kinds
//!
//! Every failure surfaces as a [`CardError`] whose [`ErrorKind`] is one of:
//!
//! | Kind | Retryable | Raised by |
//! |------|-----------|-----------|
//! | `InvalidInput` | no | Malformed caller input |
//! | `Generation` | no | Entropy, signing or token failures |
//! | `Transport` | no | Network failures |
//! | `Protocol` | no | Non-success remote status |
//! | `Decode` | no | Malformed remote responses or plaintext |
//! | `TooEarly` | yes | Beacon round not yet released |
//! | `AddressMismatch` | no | Recovered key does not match the claim |
//! | `AuxiliaryFailure` | no | Pinning or naming failed |

mod provision;
mod redeem;
#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use alloy::primitives::Address;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::blockchain::NameServiceError;
use crate::identity::IdentityError;
use crate::providers::{BeaconError, ObjectStoreError, RecordStoreError};
use crate::token::TokenError;

pub use provision::{
    CheckpointKey, ProvisionCheckpoint, ProvisionError, ProvisionOutput, ProvisionRequest, ProvisionStage,
    ProvisioningService, MAX_LOCK_HOURS, MAX_NICKNAME_LEN,
};
pub use redeem::RedemptionService;

/// Signed access to the remote record store.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn list_records(&self, collection: &str) -> Result<Value, RecordStoreError>;

    async fn get_record(&self, collection: &str, id: &str) -> Result<Value, RecordStoreError>;

    async fn create_record(&self, collection: &str, args: &[Value]) -> Result<Value, RecordStoreError>;
}

/// A public randomness beacon usable for time-lock encryption.
#[async_trait]
pub trait TimeLockBeacon: Send + Sync {
    /// Round released at or after `at`. Monotonic in `at`.
    async fn round_at(&self, at: DateTime<Utc>) -> Result<u64, BeaconError>;

    async fn encrypt(&self, plaintext: &[u8], round: u64) -> Result<Vec<u8>, BeaconError>;

    /// Fails with [`BeaconError::TooEarly`] until the bound round is released.
    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, BeaconError>;
}

/// Content-addressed storage for avatar images.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload `image` and return its content identifier.
    async fn pin_image(&self, image: Vec<u8>, name: &str) -> Result<String, ObjectStoreError>;
}

/// Subdomain registration and avatar lookup.
#[async_trait]
pub trait NameService: Send + Sync {
    /// Register `label` under the service's parent domain, owned by `owner`.
    /// Returns the final transaction hash.
    async fn register_subdomain(
        &self,
        label: &str,
        owner: Address,
        avatar_uri: Option<&str>,
    ) -> Result<String, NameServiceError>;

    /// Avatar of `label`, only if `owner` holds the subdomain.
    async fn resolve_avatar(&self, owner: Address, label: &str) -> Result<Option<String>, NameServiceError>;
}

/// Collaborators shared by both flows.
#[derive(Clone)]
pub struct Collaborators {
    pub records: Arc<dyn RecordStore>,
    pub beacon: Arc<dyn TimeLockBeacon>,
    pub objects: Option<Arc<dyn ObjectStore>>,
    pub names: Option<Arc<dyn NameService>>,
    /// Collection holding identity records.
    pub collection: String,
}

/// Machine-distinguishable failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    Generation,
    Transport,
    Protocol,
    Decode,
    TooEarly,
    AddressMismatch,
    AuxiliaryFailure,
}

impl ErrorKind {
    /// Only an unreleased beacon round is worth retrying, and only by the caller.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::TooEarly)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Generation => "generation",
            ErrorKind::Transport => "transport",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Decode => "decode",
            ErrorKind::TooEarly => "too_early",
            ErrorKind::AddressMismatch => "address_mismatch",
            ErrorKind::AuxiliaryFailure => "auxiliary_failure",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CardError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    RecordStore(#[from] RecordStoreError),

    #[error(transparent)]
    Beacon(#[from] BeaconError),

    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),

    #[error(transparent)]
    NameService(#[from] NameServiceError),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("Recovered address {recovered} does not match claimed address {claimed}")]
    AddressMismatch { claimed: Address, recovered: Address },
}

impl CardError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CardError::InvalidInput(_) => ErrorKind::InvalidInput,
            CardError::Identity(IdentityError::Entropy(_)) => ErrorKind::Generation,
            CardError::Identity(IdentityError::InvalidSecret(_)) => ErrorKind::Decode,
            CardError::Identity(IdentityError::InvalidAddress(_)) => ErrorKind::InvalidInput,
            CardError::RecordStore(err) => match err {
                RecordStoreError::Signing(_) => ErrorKind::Generation,
                RecordStoreError::Transport(_) => ErrorKind::Transport,
                RecordStoreError::Protocol { .. } => ErrorKind::Protocol,
                RecordStoreError::Decode(_) => ErrorKind::Decode,
            },
            CardError::Beacon(err) => match err {
                BeaconError::Transport(_) => ErrorKind::Transport,
                BeaconError::Protocol { .. } => ErrorKind::Protocol,
                BeaconError::Decode(_) => ErrorKind::Decode,
                BeaconError::Malformed(_) => ErrorKind::InvalidInput,
                BeaconError::Encrypt(_) => ErrorKind::Generation,
                BeaconError::TooEarly { .. } => ErrorKind::TooEarly,
            },
            CardError::ObjectStore(_) | CardError::NameService(_) => ErrorKind::AuxiliaryFailure,
            CardError::Token(_) => ErrorKind::Generation,
            CardError::AddressMismatch { .. } => ErrorKind::AddressMismatch,
        }
    }
}

/// Decode hex that may carry a `0x` prefix.
pub(crate) fn decode_hex(field: &str, raw: &str) -> Result<Vec<u8>, CardError> {
    let trimmed = raw.trim();
    let hex = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    alloy::hex::decode(hex).map_err(|e| CardError::InvalidInput(format!("{field} is not valid hex: {e}")))
}
