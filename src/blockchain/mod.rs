// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! EVM chain integration.
//!
//! This module provides ENS naming for provisioned identities:
//! - Subdomain registration owned by the identity address
//! - Avatar text records
//! - Ownership-checked avatar lookup

pub mod ens;

pub use ens::{namehash, EnsNameService, EnsSettings, NameServiceError};
