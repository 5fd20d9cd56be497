// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-memory collaborators for protocol and API tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use alloy::primitives::Address;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use super::{CheckpointKey, Collaborators, NameService, ObjectStore, RecordStore, TimeLockBeacon};
use crate::blockchain::NameServiceError;
use crate::providers::drand::ChainInfo;
use crate::providers::{BeaconError, ObjectStoreError, RecordStoreError};

pub(crate) const USER_COLLECTION: &str = "User";

/// Record store keyed by `(collection, id)`.
#[derive(Default)]
pub(crate) struct MemoryRecordStore {
    records: Mutex<HashMap<(String, String), Value>>,
    pub fail_writes: AtomicBool,
    pub reads: AtomicUsize,
}

impl MemoryRecordStore {
    pub fn record(&self, collection: &str, id: &str) -> Option<Value> {
        self.records
            .lock()
            .unwrap()
            .get(&(collection.to_string(), id.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn list_records(&self, collection: &str) -> Result<Value, RecordStoreError> {
        let records = self.records.lock().unwrap();
        let data: Vec<Value> = records
            .iter()
            .filter(|((c, _), _)| c == collection)
            .map(|(_, record)| record.clone())
            .collect();
        Ok(json!({ "data": data }))
    }

    async fn get_record(&self, collection: &str, id: &str) -> Result<Value, RecordStoreError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.record(collection, id).ok_or_else(|| RecordStoreError::Protocol {
            status: 404,
            body: format!("record {id} not found"),
        })
    }

    async fn create_record(&self, collection: &str, args: &[Value]) -> Result<Value, RecordStoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RecordStoreError::Protocol {
                status: 500,
                body: "write rejected".to_string(),
            });
        }
        let id = args
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| RecordStoreError::Protocol {
                status: 400,
                body: "missing id".to_string(),
            })?
            .to_string();
        let record = json!({
            "block": { "hash": "0x01" },
            "data": { "id": id, "nickName": args.get(1).cloned().unwrap_or(Value::Null) }
        });
        self.records
            .lock()
            .unwrap()
            .insert((collection.to_string(), id), record.clone());
        Ok(record)
    }
}

const FAKE_MAGIC: &[u8] = b"tlock:";

/// Beacon on the quicknet schedule. Ciphertexts carry their round in the
/// clear, and the release clock can be moved forward with [`FakeBeacon::advance`].
pub(crate) struct FakeBeacon {
    info: ChainInfo,
    offset_secs: AtomicI64,
    pub fail_encrypt: AtomicBool,
}

impl Default for FakeBeacon {
    fn default() -> Self {
        Self {
            info: ChainInfo {
                public_key: String::new(),
                period: 3,
                genesis_time: 1_692_803_367,
                hash: crate::providers::drand::QUICKNET_CHAIN_HASH.to_string(),
                scheme_id: None,
            },
            offset_secs: AtomicI64::new(0),
            fail_encrypt: AtomicBool::new(false),
        }
    }
}

impl FakeBeacon {
    pub fn advance(&self, secs: i64) {
        self.offset_secs.fetch_add(secs, Ordering::SeqCst);
    }

    pub fn info(&self) -> &ChainInfo {
        &self.info
    }

    fn now(&self) -> i64 {
        Utc::now().timestamp() + self.offset_secs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TimeLockBeacon for FakeBeacon {
    async fn round_at(&self, at: DateTime<Utc>) -> Result<u64, BeaconError> {
        Ok(self.info.round_at(at.timestamp()))
    }

    async fn encrypt(&self, plaintext: &[u8], round: u64) -> Result<Vec<u8>, BeaconError> {
        if self.fail_encrypt.load(Ordering::SeqCst) {
            return Err(BeaconError::Encrypt("encryption disabled".to_string()));
        }
        let mut out = FAKE_MAGIC.to_vec();
        out.extend_from_slice(&round.to_be_bytes());
        out.extend_from_slice(plaintext);
        Ok(out)
    }

    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, BeaconError> {
        let body = ciphertext
            .strip_prefix(FAKE_MAGIC)
            .filter(|rest| rest.len() >= 8)
            .ok_or_else(|| BeaconError::Malformed("not a fake tlock ciphertext".to_string()))?;
        let (round_bytes, plaintext) = body.split_at(8);
        let mut raw = [0u8; 8];
        raw.copy_from_slice(round_bytes);
        let round = u64::from_be_bytes(raw);

        if self.info.round_time(round) > self.now() {
            return Err(BeaconError::TooEarly { round });
        }
        Ok(plaintext.to_vec())
    }
}

#[derive(Default)]
pub(crate) struct FakeObjectStore {
    pub pinned: Mutex<Vec<(String, Vec<u8>)>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn pin_image(&self, image: Vec<u8>, name: &str) -> Result<String, ObjectStoreError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ObjectStoreError::Protocol {
                status: 503,
                body: "pinning unavailable".to_string(),
            });
        }
        let mut pinned = self.pinned.lock().unwrap();
        pinned.push((name.to_string(), image));
        Ok(format!("bafkfake{}", pinned.len()))
    }
}

#[derive(Default)]
pub(crate) struct FakeNameService {
    pub names: Mutex<HashMap<String, (Address, Option<String>)>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl NameService for FakeNameService {
    async fn register_subdomain(
        &self,
        label: &str,
        owner: Address,
        avatar_uri: Option<&str>,
    ) -> Result<String, NameServiceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NameServiceError::TransactionFailed("setSubnodeOwner reverted".to_string()));
        }
        self.names
            .lock()
            .unwrap()
            .insert(label.to_string(), (owner, avatar_uri.map(str::to_string)));
        Ok(format!("0x{:064x}", label.len()))
    }

    async fn resolve_avatar(&self, owner: Address, label: &str) -> Result<Option<String>, NameServiceError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NameServiceError::Rpc("connection refused".to_string()));
        }
        Ok(self
            .names
            .lock()
            .unwrap()
            .get(label)
            .filter(|(registered, _)| *registered == owner)
            .and_then(|(_, avatar)| avatar.clone()))
    }
}

/// All four doubles, kept reachable for assertions.
#[derive(Default)]
pub(crate) struct Harness {
    pub records: Arc<MemoryRecordStore>,
    pub beacon: Arc<FakeBeacon>,
    pub objects: Arc<FakeObjectStore>,
    pub names: Arc<FakeNameService>,
}

impl Harness {
    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            records: self.records.clone(),
            beacon: self.beacon.clone(),
            objects: Some(self.objects.clone()),
            names: Some(self.names.clone()),
            collection: USER_COLLECTION.to_string(),
        }
    }

    pub fn checkpoint_key(&self) -> CheckpointKey {
        CheckpointKey::derive(&[0x5e; 32]).unwrap()
    }

    /// Record store and beacon only.
    pub fn core_only(&self) -> Collaborators {
        Collaborators {
            objects: None,
            names: None,
            ..self.collaborators()
        }
    }
}
