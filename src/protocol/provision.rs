// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Identity provisioning.
//!
//! Stages run strictly in order:
//!
//! ```text
//! Start → KeyGenerated → RecordPersisted → RoundComputed → SecretLocked
//!       → [AvatarPinned] → [NameRegistered] → Done
//! ```
//!
//! The record write and the auxiliary steps cannot share a transaction. A
//! failure before `SecretLocked` reports the stage reached (and the address,
//! once a record exists). From `SecretLocked` on, the ciphertext already
//! exists, so the error carries a [`ProvisionCheckpoint`] that
//! [`ProvisioningService::resume`] can re-drive.
//!
//! Checkpoints travel through the caller, so each one is sealed with an
//! HMAC-SHA256 under a [`CheckpointKey`] held by the service. Resume only
//! accepts checkpoints this service issued, unmodified.

use alloy::primitives::Address;
use base64ct::{Base64, Encoding};
use chrono::{TimeDelta, Utc};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use tracing::{debug, info, info_span, warn, Instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{decode_hex, CardError, Collaborators, ErrorKind};
use crate::identity::{generate_identity, parse_address, Identity};

/// Longest nickname accepted; nicknames become DNS labels.
pub const MAX_NICKNAME_LEN: usize = 63;
/// Upper bound on the lock duration (100 years).
pub const MAX_LOCK_HOURS: i64 = 876_000;

const AVATAR_FILE_NAME: &str = "avatar";
const CHECKPOINT_KEY_SALT: &[u8] = b"promise-cards/checkpoint-seal";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionStage {
    Start,
    KeyGenerated,
    RecordPersisted,
    RoundComputed,
    SecretLocked,
    AvatarPinned,
    NameRegistered,
    Done,
}

#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub nickname: String,
    pub lock_hours: i64,
    pub avatar_base64: Option<String>,
}

/// Re-drivable state of a provisioning call that failed after its secret
/// was locked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ProvisionCheckpoint {
    /// Checksummed identity address.
    pub address: String,
    pub nickname: String,
    pub encrypted_secret_hex: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_cid: Option<String>,
    /// First step still to run.
    pub next_step: ProvisionStage,
    /// Hex HMAC-SHA256 over the fields above.
    #[serde(default)]
    pub seal: String,
}

/// Seals and verifies checkpoints.
#[derive(Clone)]
pub struct CheckpointKey {
    mac: Hmac<Sha256>,
}

impl CheckpointKey {
    /// Derive the sealing key from a long-lived service secret.
    pub fn derive(service_secret: &[u8]) -> Result<Self, hmac::digest::InvalidLength> {
        let (prk, _) = Hkdf::<Sha256>::extract(Some(CHECKPOINT_KEY_SALT), service_secret);
        let mac = Hmac::<Sha256>::new_from_slice(&prk)?;
        Ok(Self { mac })
    }

    pub(crate) fn seal(&self, checkpoint: &mut ProvisionCheckpoint) {
        let tag = self.tag(checkpoint).finalize().into_bytes();
        checkpoint.seal = alloy::hex::encode(tag);
    }

    fn verify(&self, checkpoint: &ProvisionCheckpoint) -> Result<(), CardError> {
        let forged = || CardError::InvalidInput("checkpoint was not issued by this service".to_string());
        let tag = alloy::hex::decode(checkpoint.seal.trim()).map_err(|_| forged())?;
        self.tag(checkpoint).verify_slice(&tag).map_err(|_| forged())
    }

    fn tag(&self, checkpoint: &ProvisionCheckpoint) -> Hmac<Sha256> {
        let mut mac = self.mac.clone();
        let next_step = format!("{:?}", checkpoint.next_step);
        // length-prefixed so no two checkpoints share an encoding
        for field in [
            Some(checkpoint.address.as_str()),
            Some(checkpoint.nickname.as_str()),
            Some(checkpoint.encrypted_secret_hex.as_str()),
            checkpoint.avatar_cid.as_deref(),
            Some(next_step.as_str()),
        ] {
            match field {
                Some(value) => {
                    mac.update(&[1]);
                    mac.update(&(value.len() as u64).to_be_bytes());
                    mac.update(value.as_bytes());
                }
                None => mac.update(&[0]),
            }
        }
        mac
    }
}

#[derive(Debug, Clone)]
pub struct ProvisionOutput {
    pub address: Address,
    pub nickname: String,
    pub encrypted_secret_hex: String,
    pub avatar_cid: Option<String>,
    /// Hash of the transaction that handed the subdomain to the identity.
    pub name_tx: Option<String>,
}

#[derive(Debug, thiserror::Error)]
#[error("Provisioning stopped after stage {reached:?}: {source}")]
pub struct ProvisionError {
    pub reached: ProvisionStage,
    /// Set once a record for the identity exists.
    pub address: Option<Address>,
    pub checkpoint: Option<ProvisionCheckpoint>,
    #[source]
    pub source: CardError,
}

impl ProvisionError {
    fn before_lock(reached: ProvisionStage, address: Option<Address>, source: CardError) -> Self {
        Self {
            reached,
            address,
            checkpoint: None,
            source,
        }
    }

    fn after_lock(address: Address, checkpoint: ProvisionCheckpoint, source: CardError) -> Self {
        let reached = if checkpoint.avatar_cid.is_some() {
            ProvisionStage::AvatarPinned
        } else {
            ProvisionStage::SecretLocked
        };
        Self {
            reached,
            address: Some(address),
            checkpoint: Some(checkpoint),
            source,
        }
    }

    /// `AuxiliaryFailure` once the secret is locked, the inner kind before.
    pub fn kind(&self) -> ErrorKind {
        if self.checkpoint.is_some() {
            ErrorKind::AuxiliaryFailure
        } else {
            self.source.kind()
        }
    }
}

pub struct ProvisioningService {
    collaborators: Collaborators,
    checkpoint_key: CheckpointKey,
}

impl ProvisioningService {
    pub fn new(collaborators: Collaborators, checkpoint_key: CheckpointKey) -> Self {
        Self {
            collaborators,
            checkpoint_key,
        }
    }

    pub async fn provision(&self, request: ProvisionRequest) -> Result<ProvisionOutput, ProvisionError> {
        let flow_id = Uuid::new_v4();
        self.run(request)
            .instrument(info_span!("provision", %flow_id))
            .await
    }

    /// Re-drive the auxiliary steps of a checkpointed call.
    ///
    /// Only sealed checkpoints issued by this service are accepted. Keys and
    /// the record store are never touched again. The avatar must be supplied
    /// again if it was not pinned before the failure.
    pub async fn resume(
        &self,
        checkpoint: ProvisionCheckpoint,
        avatar_base64: Option<&str>,
    ) -> Result<ProvisionOutput, ProvisionError> {
        let flow_id = Uuid::new_v4();
        async move {
            let invalid = |source: CardError| ProvisionError::before_lock(ProvisionStage::Start, None, source);

            self.checkpoint_key.verify(&checkpoint).map_err(invalid)?;
            let address = parse_address(&checkpoint.address).map_err(|e| invalid(e.into()))?;
            validate_nickname(&checkpoint.nickname).map_err(invalid)?;
            decode_hex("encrypted_secret_hex", &checkpoint.encrypted_secret_hex).map_err(invalid)?;
            if checkpoint.next_step < ProvisionStage::AvatarPinned {
                return Err(invalid(CardError::InvalidInput(format!(
                    "checkpoint at {:?} cannot be resumed",
                    checkpoint.next_step
                ))));
            }
            let avatar = decode_avatar(avatar_base64).map_err(invalid)?;

            info!(address = %address, next_step = ?checkpoint.next_step, "Resuming provisioning");
            self.finish(address, checkpoint, avatar).await
        }
        .instrument(info_span!("provision_resume", %flow_id))
        .await
    }

    async fn run(&self, request: ProvisionRequest) -> Result<ProvisionOutput, ProvisionError> {
        let c = &self.collaborators;
        let invalid = |source: CardError| ProvisionError::before_lock(ProvisionStage::Start, None, source);

        validate_nickname(&request.nickname).map_err(invalid)?;
        let lock = lock_duration(request.lock_hours).map_err(invalid)?;
        let avatar = decode_avatar(request.avatar_base64.as_deref()).map_err(invalid)?;

        let (secret, address) = generate_identity().map_err(|e| invalid(e.into()))?;
        let identity = Identity::new(address, &request.nickname);
        info!(
            stage = ?ProvisionStage::KeyGenerated,
            address = %identity.address,
            created_at = %identity.created_at.to_rfc3339(),
            "Identity generated"
        );

        let record_id = address.to_checksum(None);
        c.records
            .create_record(&c.collection, &[json!(record_id), json!(identity.nickname)])
            .await
            .map_err(|e| ProvisionError::before_lock(ProvisionStage::KeyGenerated, None, e.into()))?;
        info!(stage = ?ProvisionStage::RecordPersisted, collection = %c.collection, "Record persisted");

        let orphaned = |reached: ProvisionStage, source: CardError| ProvisionError::before_lock(reached, Some(address), source);

        let round = c
            .beacon
            .round_at(Utc::now() + lock)
            .await
            .map_err(|e| orphaned(ProvisionStage::RecordPersisted, e.into()))?;
        info!(stage = ?ProvisionStage::RoundComputed, round, lock_hours = request.lock_hours, "Target round computed");

        let ciphertext = c
            .beacon
            .encrypt(&secret.to_bytes(), round)
            .await
            .map_err(|e| orphaned(ProvisionStage::RoundComputed, e.into()))?;
        drop(secret);
        info!(stage = ?ProvisionStage::SecretLocked, round, bytes = ciphertext.len(), "Secret locked");

        let checkpoint = ProvisionCheckpoint {
            address: record_id,
            nickname: identity.nickname,
            encrypted_secret_hex: alloy::hex::encode(ciphertext),
            avatar_cid: None,
            next_step: ProvisionStage::AvatarPinned,
            seal: String::new(),
        };
        self.finish(address, checkpoint, avatar).await
    }

    /// Seal the checkpoint of a flow that stopped after its secret was locked.
    fn interrupted(
        &self,
        address: Address,
        mut checkpoint: ProvisionCheckpoint,
        source: CardError,
    ) -> ProvisionError {
        self.checkpoint_key.seal(&mut checkpoint);
        ProvisionError::after_lock(address, checkpoint, source)
    }

    async fn finish(
        &self,
        address: Address,
        mut checkpoint: ProvisionCheckpoint,
        avatar: Option<Vec<u8>>,
    ) -> Result<ProvisionOutput, ProvisionError> {
        let c = &self.collaborators;

        if checkpoint.next_step == ProvisionStage::AvatarPinned {
            if checkpoint.avatar_cid.is_none() {
                match (&c.objects, avatar) {
                    (Some(objects), Some(image)) => match objects.pin_image(image, AVATAR_FILE_NAME).await {
                        Ok(cid) => {
                            info!(stage = ?ProvisionStage::AvatarPinned, cid = %cid, "Avatar pinned");
                            checkpoint.avatar_cid = Some(cid);
                        }
                        Err(e) => {
                            warn!(error = %e, "Avatar pinning failed");
                            return Err(self.interrupted(address, checkpoint, e.into()));
                        }
                    },
                    (None, Some(_)) => debug!("Pinning not configured, avatar dropped"),
                    (_, None) => {}
                }
            }
            checkpoint.next_step = ProvisionStage::NameRegistered;
        }

        let mut name_tx = None;
        if checkpoint.next_step == ProvisionStage::NameRegistered {
            if let Some(names) = &c.names {
                let avatar_uri = checkpoint.avatar_cid.as_ref().map(|cid| format!("ipfs://{cid}"));
                match names
                    .register_subdomain(&checkpoint.nickname, address, avatar_uri.as_deref())
                    .await
                {
                    Ok(tx) => {
                        info!(stage = ?ProvisionStage::NameRegistered, tx_hash = %tx, "Subdomain registered");
                        name_tx = Some(tx);
                    }
                    Err(e) => {
                        warn!(error = %e, "Subdomain registration failed");
                        return Err(self.interrupted(address, checkpoint, e.into()));
                    }
                }
            }
            checkpoint.next_step = ProvisionStage::Done;
        }

        info!(stage = ?ProvisionStage::Done, address = %address, "Provisioning complete");
        Ok(ProvisionOutput {
            address,
            nickname: checkpoint.nickname,
            encrypted_secret_hex: checkpoint.encrypted_secret_hex,
            avatar_cid: checkpoint.avatar_cid,
            name_tx,
        })
    }
}

fn validate_nickname(nickname: &str) -> Result<(), CardError> {
    if nickname.is_empty() {
        return Err(CardError::InvalidInput("nickname is required".to_string()));
    }
    if nickname.len() > MAX_NICKNAME_LEN {
        return Err(CardError::InvalidInput(format!(
            "nickname exceeds {MAX_NICKNAME_LEN} bytes"
        )));
    }
    // ENS resolves normalised (lowercase) labels only
    if !nickname
        .chars()
        .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_')
    {
        return Err(CardError::InvalidInput(
            "nickname may only contain lowercase ASCII letters, digits, '-' and '_'".to_string(),
        ));
    }
    Ok(())
}

fn lock_duration(lock_hours: i64) -> Result<TimeDelta, CardError> {
    if !(0..=MAX_LOCK_HOURS).contains(&lock_hours) {
        return Err(CardError::InvalidInput(format!(
            "lock_hours must be between 0 and {MAX_LOCK_HOURS}"
        )));
    }
    TimeDelta::try_hours(lock_hours)
        .ok_or_else(|| CardError::InvalidInput("lock_hours out of range".to_string()))
}

/// Empty strings count as no avatar.
fn decode_avatar(avatar_base64: Option<&str>) -> Result<Option<Vec<u8>>, CardError> {
    match avatar_base64.map(str::trim).filter(|raw| !raw.is_empty()) {
        None => Ok(None),
        Some(raw) => Base64::decode_vec(raw)
            .map(Some)
            .map_err(|e| CardError::InvalidInput(format!("avatar is not valid base64: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use crate::protocol::testing::{Harness, USER_COLLECTION};
    use crate::protocol::TimeLockBeacon;
    use crate::providers::BeaconError;

    // "avatar" in base64
    const AVATAR_B64: &str = "YXZhdGFy";

    fn request(nickname: &str, lock_hours: i64, avatar: Option<&str>) -> ProvisionRequest {
        ProvisionRequest {
            nickname: nickname.to_string(),
            lock_hours,
            avatar_base64: avatar.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn provisions_alice_for_one_hour() {
        let h = Harness::default();
        let service = ProvisioningService::new(h.collaborators(), h.checkpoint_key());

        let out = service.provision(request("alice", 1, None)).await.unwrap();

        let rendered = out.address.to_checksum(None);
        assert_eq!(rendered.len(), 42);
        assert!(!out.encrypted_secret_hex.is_empty());
        assert!(out.avatar_cid.is_none());

        let record = h.records.record(USER_COLLECTION, &rendered).unwrap();
        assert_eq!(record["data"]["id"], rendered);
        assert_eq!(record["data"]["nickName"], "alice");

        let ciphertext = alloy::hex::decode(&out.encrypted_secret_hex).unwrap();
        let err = h.beacon.decrypt(&ciphertext).await.unwrap_err();
        assert!(matches!(err, BeaconError::TooEarly { .. }));
    }

    #[tokio::test]
    async fn ciphertext_round_trips_to_secret_after_release() {
        let h = Harness::default();
        let service = ProvisioningService::new(h.core_only(), h.checkpoint_key());
        let out = service.provision(request("bob", 2, None)).await.unwrap();

        h.beacon.advance(2 * 3600 + 6);
        let ciphertext = alloy::hex::decode(&out.encrypted_secret_hex).unwrap();
        let plaintext = h.beacon.decrypt(&ciphertext).await.unwrap();

        assert_eq!(plaintext.len(), 32);
        assert_eq!(crate::identity::address_from_secret(&plaintext).unwrap(), out.address);
    }

    #[tokio::test]
    async fn pins_avatar_and_registers_name() {
        let h = Harness::default();
        let service = ProvisioningService::new(h.collaborators(), h.checkpoint_key());

        let out = service
            .provision(request("carol", 0, Some(AVATAR_B64)))
            .await
            .unwrap();

        assert_eq!(out.avatar_cid.as_deref(), Some("bafkfake1"));
        assert!(out.name_tx.is_some());

        let pinned = h.objects.pinned.lock().unwrap();
        assert_eq!(pinned[0], ("avatar".to_string(), b"avatar".to_vec()));

        let names = h.names.names.lock().unwrap();
        let (owner, avatar) = names.get("carol").unwrap();
        assert_eq!(*owner, out.address);
        assert_eq!(avatar.as_deref(), Some("ipfs://bafkfake1"));
    }

    #[tokio::test]
    async fn optional_steps_skip_when_unconfigured() {
        let h = Harness::default();
        let service = ProvisioningService::new(h.core_only(), h.checkpoint_key());

        let out = service
            .provision(request("dave", 0, Some(AVATAR_B64)))
            .await
            .unwrap();

        assert!(out.avatar_cid.is_none());
        assert!(out.name_tx.is_none());
        assert!(h.objects.pinned.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_invalid_input_before_any_side_effect() {
        let h = Harness::default();
        let service = ProvisioningService::new(h.collaborators(), h.checkpoint_key());

        for bad in [
            request("", 1, None),
            request("has space", 1, None),
            request("Alice", 1, None),
            request("bOb", 1, None),
            request(&"a".repeat(MAX_NICKNAME_LEN + 1), 1, None),
            request("erin", -1, None),
            request("erin", MAX_LOCK_HOURS + 1, None),
            request("erin", 1, Some("not base64!")),
        ] {
            let err = service.provision(bad).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput);
            assert_eq!(err.reached, ProvisionStage::Start);
        }
        assert_eq!(h.records.len(), 0);
    }

    #[tokio::test]
    async fn record_failure_aborts_without_checkpoint() {
        let h = Harness::default();
        h.records.fail_writes.store(true, Ordering::SeqCst);
        let service = ProvisioningService::new(h.collaborators(), h.checkpoint_key());

        let err = service.provision(request("frank", 1, None)).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert_eq!(err.reached, ProvisionStage::KeyGenerated);
        assert!(err.address.is_none());
        assert!(err.checkpoint.is_none());
    }

    #[tokio::test]
    async fn lock_failure_reports_orphaned_record() {
        let h = Harness::default();
        h.beacon.fail_encrypt.store(true, Ordering::SeqCst);
        let service = ProvisioningService::new(h.collaborators(), h.checkpoint_key());

        let err = service.provision(request("grace", 1, None)).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Generation);
        assert_eq!(err.reached, ProvisionStage::RoundComputed);
        let orphan = err.address.unwrap();
        assert!(h
            .records
            .record(USER_COLLECTION, &orphan.to_checksum(None))
            .is_some());
        assert!(err.checkpoint.is_none());
    }

    #[tokio::test]
    async fn pin_failure_checkpoints_and_resume_completes() {
        let h = Harness::default();
        h.objects.fail.store(true, Ordering::SeqCst);
        let service = ProvisioningService::new(h.collaborators(), h.checkpoint_key());

        let err = service
            .provision(request("heidi", 1, Some(AVATAR_B64)))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::AuxiliaryFailure);
        assert_eq!(err.reached, ProvisionStage::SecretLocked);
        let checkpoint = err.checkpoint.unwrap();
        assert_eq!(checkpoint.next_step, ProvisionStage::AvatarPinned);
        assert!(checkpoint.avatar_cid.is_none());
        assert_eq!(checkpoint.seal.len(), 64);
        assert!(h.names.names.lock().unwrap().is_empty());

        h.objects.fail.store(false, Ordering::SeqCst);
        let records_before = h.records.len();
        let out = service
            .resume(checkpoint.clone(), Some(AVATAR_B64))
            .await
            .unwrap();

        assert_eq!(out.address.to_checksum(None), checkpoint.address);
        assert_eq!(out.encrypted_secret_hex, checkpoint.encrypted_secret_hex);
        assert_eq!(out.avatar_cid.as_deref(), Some("bafkfake1"));
        assert_eq!(h.records.len(), records_before);
        assert!(h.names.names.lock().unwrap().contains_key("heidi"));
    }

    #[tokio::test]
    async fn naming_failure_keeps_pinned_cid() {
        let h = Harness::default();
        h.names.fail.store(true, Ordering::SeqCst);
        let service = ProvisioningService::new(h.collaborators(), h.checkpoint_key());

        let err = service
            .provision(request("ivan", 1, Some(AVATAR_B64)))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::AuxiliaryFailure);
        assert_eq!(err.reached, ProvisionStage::AvatarPinned);
        let checkpoint = err.checkpoint.unwrap();
        assert_eq!(checkpoint.next_step, ProvisionStage::NameRegistered);
        assert_eq!(checkpoint.avatar_cid.as_deref(), Some("bafkfake1"));

        h.names.fail.store(false, Ordering::SeqCst);
        let out = service.resume(checkpoint, None).await.unwrap();

        assert_eq!(h.objects.pinned.lock().unwrap().len(), 1);
        let names = h.names.names.lock().unwrap();
        assert_eq!(names["ivan"].1.as_deref(), Some("ipfs://bafkfake1"));
        assert!(out.name_tx.is_some());
    }

    fn checkpoint(next_step: ProvisionStage, avatar_cid: Option<&str>) -> ProvisionCheckpoint {
        ProvisionCheckpoint {
            address: "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266".to_string(),
            nickname: "judy".to_string(),
            encrypted_secret_hex: "00".to_string(),
            avatar_cid: avatar_cid.map(str::to_string),
            next_step,
            seal: String::new(),
        }
    }

    #[tokio::test]
    async fn resume_rejects_unlocked_checkpoint() {
        let h = Harness::default();
        let service = ProvisioningService::new(h.collaborators(), h.checkpoint_key());
        let mut checkpoint = checkpoint(ProvisionStage::RecordPersisted, None);
        h.checkpoint_key().seal(&mut checkpoint);

        let err = service.resume(checkpoint, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn resume_rejects_unsealed_checkpoint() {
        let h = Harness::default();
        let service = ProvisioningService::new(h.collaborators(), h.checkpoint_key());

        let err = service
            .resume(checkpoint(ProvisionStage::AvatarPinned, None), Some(AVATAR_B64))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(h.objects.pinned.lock().unwrap().is_empty());
        assert!(h.names.names.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn resume_rejects_checkpoint_sealed_by_another_key() {
        let h = Harness::default();
        let service = ProvisioningService::new(h.collaborators(), h.checkpoint_key());
        let mut forged = checkpoint(ProvisionStage::NameRegistered, None);
        CheckpointKey::derive(b"some other service").unwrap().seal(&mut forged);

        let err = service.resume(forged, None).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(h.names.names.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn resume_rejects_edited_checkpoint() {
        let h = Harness::default();
        h.names.fail.store(true, Ordering::SeqCst);
        let service = ProvisioningService::new(h.collaborators(), h.checkpoint_key());
        let issued = service
            .provision(request("lena", 1, None))
            .await
            .unwrap_err()
            .checkpoint
            .unwrap();
        h.names.fail.store(false, Ordering::SeqCst);

        let mut renamed = issued.clone();
        renamed.nickname = "mallory".to_string();
        let mut avatar_added = issued.clone();
        avatar_added.avatar_cid = Some("bafkother".to_string());

        for edited in [renamed, avatar_added] {
            let err = service.resume(edited, None).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput);
        }
        assert!(h.names.names.lock().unwrap().is_empty());

        service.resume(issued, None).await.unwrap();
        assert!(h.names.names.lock().unwrap().contains_key("lena"));
    }

    #[tokio::test]
    async fn resume_of_finished_checkpoint_is_a_no_op() {
        let h = Harness::default();
        let service = ProvisioningService::new(h.collaborators(), h.checkpoint_key());
        let mut checkpoint = checkpoint(ProvisionStage::Done, Some("bafkexisting"));
        h.checkpoint_key().seal(&mut checkpoint);

        let out = service.resume(checkpoint, None).await.unwrap();
        assert_eq!(out.avatar_cid.as_deref(), Some("bafkexisting"));
        assert!(out.name_tx.is_none());
        assert!(h.names.names.lock().unwrap().is_empty());
    }

    #[test]
    fn checkpoint_serializes_with_snake_case_stage() {
        let checkpoint = ProvisionCheckpoint {
            address: "0xabc".to_string(),
            nickname: "kim".to_string(),
            encrypted_secret_hex: "00".to_string(),
            avatar_cid: None,
            next_step: ProvisionStage::NameRegistered,
            seal: "00".to_string(),
        };
        let value = serde_json::to_value(&checkpoint).unwrap();
        assert_eq!(value["next_step"], "name_registered");
        assert!(value.get("avatar_cid").is_none());
    }
}
