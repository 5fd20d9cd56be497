// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Polybase record store client.
//!
//! Every request carries an `X-Polybase-Signature` header:
//!
//! ```text
//! v=0,t=<unix millis>,h=eth-personal-sign,sig=0x<r||s||v hex>
//! ```
//!
//! where the signature is a recoverable secp256k1 signature over
//! `keccak256("<unix millis>.<json body>")` made with the tenant key. Reads
//! carry no payload and sign the empty object `{}`, which only proves
//! freshness and tenant identity.
//!
//! The client never retries.

use std::time::Duration;

use alloy::primitives::{keccak256, Address, B256};
use async_trait::async_trait;
use chrono::Utc;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use reqwest::{Client, Method};
use serde_json::{json, Value};
use tracing::debug;

use crate::identity::address_of;
use crate::protocol::RecordStore;

pub const SIGNATURE_HEADER: &str = "X-Polybase-Signature";
pub const SIGNATURE_SCHEME: &str = "eth-personal-sign";
pub const DEFAULT_POLYBASE_URL: &str = "https://testnet.polybase.xyz";

/// Body signed for requests without a payload.
const EMPTY_BODY: &str = "{}";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
pub enum RecordStoreError {
    #[error("Record store request signing failed: {0}")]
    Signing(String),

    #[error("Record store transport error: {0}")]
    Transport(String),

    #[error("Record store returned {status}: {body}")]
    Protocol { status: u16, body: String },

    #[error("Record store response was invalid: {0}")]
    Decode(String),
}

/// A signed record store request, before it is rendered as a header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest {
    /// Unix milliseconds used in the signed message.
    pub timestamp: i64,
    /// `keccak256("<timestamp>.<body>")`.
    pub body_hash: B256,
    /// `r || s || v` with `v` in `{0, 1}`.
    pub signature: [u8; 65],
}

impl SignedRequest {
    /// Render as the signature header value.
    pub fn header_value(&self) -> String {
        format!(
            "v=0,t={},h={},sig=0x{}",
            self.timestamp,
            SIGNATURE_SCHEME,
            alloy::hex::encode(self.signature)
        )
    }
}

/// Signs record store requests with the tenant key.
///
/// The tenant key authenticates this service to the store; it is never an
/// end-user identity key.
#[derive(Clone)]
pub struct RequestSigner {
    key: SigningKey,
}

impl RequestSigner {
    pub fn new(key: SigningKey) -> Self {
        Self { key }
    }

    /// Address the store sees as the request author.
    pub fn address(&self) -> Address {
        address_of(self.key.verifying_key())
    }

    /// Sign `body` as of now.
    pub fn sign(&self, body: &str) -> Result<SignedRequest, RecordStoreError> {
        self.sign_at(Utc::now().timestamp_millis(), body)
    }

    /// Sign `body` with an explicit timestamp.
    pub fn sign_at(&self, timestamp: i64, body: &str) -> Result<SignedRequest, RecordStoreError> {
        let body_hash = signing_hash(timestamp, body);
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(body_hash.as_slice())
            .map_err(|e| RecordStoreError::Signing(e.to_string()))?;

        let mut bytes = [0u8; 65];
        bytes[..64].copy_from_slice(&signature.to_bytes());
        bytes[64] = recovery_id.to_byte();

        Ok(SignedRequest {
            timestamp,
            body_hash,
            signature: bytes,
        })
    }

    /// Reference verifier: true when `signed` was produced by `expected`
    /// over exactly `body`.
    pub fn verify(signed: &SignedRequest, body: &str, expected: Address) -> bool {
        let hash = signing_hash(signed.timestamp, body);
        let Ok(signature) = Signature::from_slice(&signed.signature[..64]) else {
            return false;
        };
        let Some(recovery_id) = RecoveryId::from_byte(signed.signature[64]) else {
            return false;
        };
        VerifyingKey::recover_from_prehash(hash.as_slice(), &signature, recovery_id)
            .map(|key| address_of(&key) == expected)
            .unwrap_or(false)
    }
}

fn signing_hash(timestamp: i64, body: &str) -> B256 {
    keccak256(format!("{timestamp}.{body}").as_bytes())
}

/// REST client for one Polybase namespace.
#[derive(Clone)]
pub struct PolybaseClient {
    base_url: String,
    namespace: String,
    signer: RequestSigner,
    http: Client,
}

impl PolybaseClient {
    pub fn new(
        base_url: impl Into<String>,
        namespace: impl Into<String>,
        signer: RequestSigner,
    ) -> Result<Self, RecordStoreError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| RecordStoreError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into(),
            namespace: namespace.into(),
            signer,
            http,
        })
    }

    fn records_url(&self, collection: &str) -> String {
        let path = format!("{}/{}", self.namespace, collection);
        let encoded: String = url::form_urlencoded::byte_serialize(path.as_bytes()).collect();
        format!(
            "{}/v0/collections/{}/records",
            self.base_url.trim_end_matches('/'),
            encoded
        )
    }

    async fn send(
        &self,
        method: Method,
        url: String,
        body: Option<String>,
    ) -> Result<Value, RecordStoreError> {
        let signed = self.signer.sign(body.as_deref().unwrap_or(EMPTY_BODY))?;

        debug!(%method, %url, "Polybase request");

        let mut request = self
            .http
            .request(method.clone(), &url)
            .header(SIGNATURE_HEADER, signed.header_value());
        if let Some(body) = body {
            request = request
                .header("Content-Type", "application/json")
                .body(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RecordStoreError::Transport(format!("{method} {url} failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| RecordStoreError::Transport(format!("{method} {url} body read failed: {e}")))?;

        if !status.is_success() {
            return Err(RecordStoreError::Protocol {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text)
            .map_err(|e| RecordStoreError::Decode(format!("{method} {url} invalid JSON: {e}")))
    }
}

#[async_trait]
impl RecordStore for PolybaseClient {
    async fn list_records(&self, collection: &str) -> Result<Value, RecordStoreError> {
        self.send(Method::GET, self.records_url(collection), None)
            .await
    }

    async fn get_record(&self, collection: &str, id: &str) -> Result<Value, RecordStoreError> {
        let encoded_id: String = url::form_urlencoded::byte_serialize(id.as_bytes()).collect();
        let url = format!("{}/{}", self.records_url(collection), encoded_id);
        self.send(Method::GET, url, None).await
    }

    async fn create_record(&self, collection: &str, args: &[Value]) -> Result<Value, RecordStoreError> {
        let body = serde_json::to_string(&json!({ "args": args }))
            .map_err(|e| RecordStoreError::Decode(format!("serialize body failed: {e}")))?;
        self.send(Method::POST, self.records_url(collection), Some(body))
            .await
    }
}

/// Parse a signature header back into its parts.
pub fn parse_signature_header(value: &str) -> Option<SignedRequest> {
    let mut timestamp = None;
    let mut signature = None;

    for part in value.split(',') {
        let (key, val) = part.split_once('=')?;
        match key.trim() {
            "v" if val != "0" => return None,
            "t" => timestamp = val.parse::<i64>().ok(),
            "h" if val != SIGNATURE_SCHEME => return None,
            "sig" => {
                let raw = alloy::hex::decode(val.trim_start_matches("0x")).ok()?;
                signature = <[u8; 65]>::try_from(raw.as_slice()).ok();
            }
            _ => {}
        }
    }

    let timestamp = timestamp?;
    Some(SignedRequest {
        timestamp,
        body_hash: B256::ZERO,
        signature: signature?,
    })
}
