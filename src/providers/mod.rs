// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! HTTP integrations with external services.

pub mod drand;
pub mod pinata;
pub mod polybase;

pub use drand::{BeaconError, DrandBeacon};
pub use pinata::{ObjectStoreError, PinataClient};
pub use polybase::{PolybaseClient, RecordStoreError, RequestSigner};
