// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::protocol::{CheckpointKey, Collaborators, ProvisioningService, RedemptionService};
use crate::token::TokenMinter;

/// Shared, immutable application state.
#[derive(Clone)]
pub struct AppState {
    pub provisioning: Arc<ProvisioningService>,
    pub redemption: Arc<RedemptionService>,
    pub naming_enabled: bool,
    pub pinning_enabled: bool,
}

impl AppState {
    pub fn new(collaborators: Collaborators, minter: TokenMinter, checkpoint_key: CheckpointKey) -> Self {
        Self {
            naming_enabled: collaborators.names.is_some(),
            pinning_enabled: collaborators.objects.is_some(),
            provisioning: Arc::new(ProvisioningService::new(
                collaborators.clone(),
                checkpoint_key,
            )),
            redemption: Arc::new(RedemptionService::new(collaborators, minter)),
        }
    }
}
