// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! ENS subdomains and avatar text records.
//!
//! Registration runs as the parent-domain owner:
//!
//! 1. `setSubnodeOwner(parent, label, service)` so the service may configure it
//! 2. `setResolver(node, resolver)`
//! 3. `setText(node, "avatar", uri)` when an avatar was pinned
//! 4. `setSubnodeOwner(parent, label, owner)` hands the name to the identity
//!
//! Each transaction waits for its receipt before the next is sent, since the
//! resolver checks ownership at execution time.

use alloy::{
    network::EthereumWallet,
    primitives::{keccak256, Address, B256},
    providers::ProviderBuilder,
    signers::local::PrivateKeySigner,
    sol,
};
use async_trait::async_trait;
use tracing::info;

use crate::protocol::NameService;

/// ENS registry, same address on mainnet and the public testnets.
pub const DEFAULT_ENS_REGISTRY: &str = "0x00000000000C2E074eC69A0bFb2997BA6C7d2e1e";

/// Text record key holding the avatar URI.
pub const AVATAR_KEY: &str = "avatar";

sol! {
    #[sol(rpc)]
    interface IEnsRegistry {
        function owner(bytes32 node) external view returns (address);
        function resolver(bytes32 node) external view returns (address);
        function setSubnodeOwner(bytes32 node, bytes32 label, address owner) external returns (bytes32);
        function setResolver(bytes32 node, address resolver) external;
    }

    #[sol(rpc)]
    interface ITextResolver {
        function text(bytes32 node, string key) external view returns (string);
        function setText(bytes32 node, string key, string value) external;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NameServiceError {
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),
}

/// EIP-137 namehash.
pub fn namehash(name: &str) -> B256 {
    let mut node = B256::ZERO;
    if name.is_empty() {
        return node;
    }
    for label in name.rsplit('.') {
        let label_hash = keccak256(label.as_bytes());
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(node.as_slice());
        buf[32..].copy_from_slice(label_hash.as_slice());
        node = keccak256(buf);
    }
    node
}

/// Connection settings for [`EnsNameService`].
#[derive(Debug, Clone)]
pub struct EnsSettings {
    pub rpc_url: url::Url,
    pub main_domain: String,
    pub registry: Address,
    pub resolver: Address,
}

/// ENS-backed naming service.
pub struct EnsNameService {
    settings: EnsSettings,
    owner: PrivateKeySigner,
}

impl EnsNameService {
    pub fn new(settings: EnsSettings, owner: PrivateKeySigner) -> Self {
        Self { settings, owner }
    }

    /// Address that owns the parent domain and pays for registrations.
    pub fn owner_address(&self) -> Address {
        self.owner.address()
    }

    fn full_name(&self, label: &str) -> String {
        format!("{}.{}", label, self.settings.main_domain)
    }
}

#[async_trait]
impl NameService for EnsNameService {
    async fn register_subdomain(
        &self,
        label: &str,
        owner: Address,
        avatar_uri: Option<&str>,
    ) -> Result<String, NameServiceError> {
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(self.owner.clone()))
            .connect_http(self.settings.rpc_url.clone());

        let registry = IEnsRegistry::new(self.settings.registry, provider.clone());
        let parent = namehash(&self.settings.main_domain);
        let label_hash = keccak256(label.as_bytes());
        let node = namehash(&self.full_name(label));
        let service = self.owner.address();

        let receipt = registry
            .setSubnodeOwner(parent, label_hash, service)
            .send()
            .await
            .map_err(|e| NameServiceError::TransactionFailed(format!("setSubnodeOwner: {e}")))?
            .get_receipt()
            .await
            .map_err(|e| NameServiceError::Rpc(format!("setSubnodeOwner receipt: {e}")))?;
        ensure_success("setSubnodeOwner", receipt.status())?;

        let receipt = registry
            .setResolver(node, self.settings.resolver)
            .send()
            .await
            .map_err(|e| NameServiceError::TransactionFailed(format!("setResolver: {e}")))?
            .get_receipt()
            .await
            .map_err(|e| NameServiceError::Rpc(format!("setResolver receipt: {e}")))?;
        ensure_success("setResolver", receipt.status())?;

        if let Some(uri) = avatar_uri {
            let resolver = ITextResolver::new(self.settings.resolver, provider.clone());
            let receipt = resolver
                .setText(node, AVATAR_KEY.to_string(), uri.to_string())
                .send()
                .await
                .map_err(|e| NameServiceError::TransactionFailed(format!("setText: {e}")))?
                .get_receipt()
                .await
                .map_err(|e| NameServiceError::Rpc(format!("setText receipt: {e}")))?;
            ensure_success("setText", receipt.status())?;
        }

        let receipt = registry
            .setSubnodeOwner(parent, label_hash, owner)
            .send()
            .await
            .map_err(|e| NameServiceError::TransactionFailed(format!("setSubnodeOwner: {e}")))?
            .get_receipt()
            .await
            .map_err(|e| NameServiceError::Rpc(format!("setSubnodeOwner receipt: {e}")))?;
        ensure_success("setSubnodeOwner", receipt.status())?;

        let tx_hash = format!("{:?}", receipt.transaction_hash);
        info!(
            name = %self.full_name(label),
            owner = %owner,
            tx_hash = %tx_hash,
            "Registered subdomain"
        );
        Ok(tx_hash)
    }

    async fn resolve_avatar(
        &self,
        owner: Address,
        label: &str,
    ) -> Result<Option<String>, NameServiceError> {
        let provider = ProviderBuilder::new().connect_http(self.settings.rpc_url.clone());
        let registry = IEnsRegistry::new(self.settings.registry, provider.clone());
        let node = namehash(&self.full_name(label));

        let registered_owner = registry
            .owner(node)
            .call()
            .await
            .map_err(|e| NameServiceError::Rpc(format!("owner: {e}")))?;
        if registered_owner != owner {
            return Ok(None);
        }

        let resolver_address = registry
            .resolver(node)
            .call()
            .await
            .map_err(|e| NameServiceError::Rpc(format!("resolver: {e}")))?;
        if resolver_address == Address::ZERO {
            return Ok(None);
        }

        let resolver = ITextResolver::new(resolver_address, provider);
        let avatar = resolver
            .text(node, AVATAR_KEY.to_string())
            .call()
            .await
            .map_err(|e| NameServiceError::Rpc(format!("text: {e}")))?;

        Ok(Some(avatar).filter(|value| !value.is_empty()))
    }
}

fn ensure_success(step: &str, status: bool) -> Result<(), NameServiceError> {
    if status {
        Ok(())
    } else {
        Err(NameServiceError::TransactionFailed(format!("{step} reverted")))
    }
}
