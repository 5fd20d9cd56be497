// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Promise Cards - Time-Locked Identity Service
//!
//! This crate provisions secp256k1 identities whose private keys are
//! time-lock encrypted against the drand beacon and handed back to the
//! caller. Once the chosen round is released, the ciphertext can be
//! redeemed for an access token signed by a key derived from the
//! recovered secret.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `protocol` - Provisioning and redemption flows, collaborator traits
//! - `identity` - Keypair generation and address derivation
//! - `token` - Access token minting
//! - `providers` - Polybase record store, drand beacon, Pinata pinning
//! - `blockchain` - ENS subdomain registration

pub mod api;
pub mod blockchain;
pub mod config;
pub mod error;
pub mod identity;
pub mod models;
pub mod protocol;
pub mod providers;
pub mod state;
pub mod token;
