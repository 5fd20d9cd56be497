// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # API Data Models
//!
//! Request and response bodies of the REST API. All types derive the serde
//! traits they need plus `ToSchema` for the OpenAPI document.
//!
//! Request fields also accept the names used by the first release of the
//! API (`nick`, `valible_after_hours`, `avatar`, `private_key_encrypted`,
//! `public_key`), so older clients keep working.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::protocol::{ProvisionCheckpoint, ProvisionOutput};

// =============================================================================
// Provisioning
// =============================================================================

/// Request to provision a new time-locked identity.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateUserRequest {
    /// Nickname; also the ENS label when naming is enabled.
    #[serde(alias = "nick")]
    pub nickname: String,
    /// Hours until the secret can be redeemed. Zero unlocks at the next round.
    #[serde(alias = "valible_after_hours")]
    pub lock_hours: i64,
    /// Avatar image, standard base64.
    #[serde(default, alias = "avatar")]
    pub avatar_base64: Option<String>,
}

/// Re-drive the auxiliary steps of a failed provisioning call.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct ResumeUserRequest {
    pub checkpoint: ProvisionCheckpoint,
    /// Needed again only if the avatar was not pinned before the failure.
    #[serde(default, alias = "avatar")]
    pub avatar_base64: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CreateUserResponse {
    /// Checksummed identity address.
    pub public_address: String,
    /// Time-locked private key, hex. The only copy of the secret.
    pub encrypted_secret_hex: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_cid: Option<String>,
}

impl From<ProvisionOutput> for CreateUserResponse {
    fn from(output: ProvisionOutput) -> Self {
        Self {
            public_address: output.address.to_checksum(None),
            encrypted_secret_hex: output.encrypted_secret_hex,
            avatar_cid: output.avatar_cid,
        }
    }
}

// =============================================================================
// Redemption
// =============================================================================

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct TokenRequest {
    #[serde(alias = "private_key_encrypted")]
    pub encrypted_secret_hex: String,
    /// Address returned at provisioning; any letter case.
    #[serde(alias = "public_key")]
    pub public_address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    /// ES256 JWT.
    pub token: String,
}

// =============================================================================
// Errors
// =============================================================================

/// Error body returned by every endpoint.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    /// One of `invalid_input`, `generation`, `transport`, `protocol`,
    /// `decode`, `too_early`, `address_mismatch`, `auxiliary_failure`.
    pub error_code: String,
    /// True only for `too_early`.
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<ProvisionCheckpoint>,
}
