// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Redemption of a time-locked secret for an access token.
//!
//! Redemption keeps no state: a released ciphertext can be redeemed any
//! number of times, each call minting a fresh token.

use serde_json::{Map, Value};
use tracing::{info, info_span, Instrument};

use super::{decode_hex, CardError, Collaborators};
use crate::identity::{parse_address, IdentitySecret};
use crate::providers::RecordStoreError;
use crate::token::{AccessToken, TokenMinter};

/// Record fields that may hold the nickname, in lookup order.
const NICKNAME_FIELDS: [&str; 2] = ["nickName", "nickname"];

pub struct RedemptionService {
    collaborators: Collaborators,
    minter: TokenMinter,
}

impl RedemptionService {
    pub fn new(collaborators: Collaborators, minter: TokenMinter) -> Self {
        Self {
            collaborators,
            minter,
        }
    }

    pub async fn redeem(
        &self,
        encrypted_secret_hex: &str,
        claimed_address: &str,
    ) -> Result<AccessToken, CardError> {
        self.run(encrypted_secret_hex, claimed_address)
            .instrument(info_span!("redeem", claimed = %claimed_address.trim()))
            .await
    }

    async fn run(&self, encrypted_secret_hex: &str, claimed_address: &str) -> Result<AccessToken, CardError> {
        let c = &self.collaborators;
        let claimed = parse_address(claimed_address)?;
        let ciphertext = decode_hex("encrypted_secret_hex", encrypted_secret_hex)?;

        let plaintext = zeroize::Zeroizing::new(c.beacon.decrypt(&ciphertext).await?);
        let secret = IdentitySecret::from_plaintext(&plaintext)?;

        let recovered = secret.address();
        if recovered != claimed {
            return Err(CardError::AddressMismatch { claimed, recovered });
        }

        let record_id = claimed.to_checksum(None);
        let record = c.records.get_record(&c.collection, &record_id).await?;
        let mut payload = record_payload(record)?;

        let avatar = match (&c.names, nickname_of(&payload)) {
            (Some(names), Some(nickname)) => names
                .resolve_avatar(claimed, &nickname)
                .await?
                .map(Value::String)
                .unwrap_or(Value::Null),
            _ => Value::Null,
        };
        payload.insert("avatar".to_string(), avatar);
        payload.insert("address".to_string(), Value::String(record_id));

        let token = self.minter.mint(&secret, Value::Object(payload))?;
        info!(exp = token.claims.exp, "Access token minted");
        Ok(token)
    }
}

/// The record's `data` member when present, otherwise the whole body.
fn record_payload(record: Value) -> Result<Map<String, Value>, CardError> {
    let payload = match record {
        Value::Object(mut body) => match body.remove("data") {
            Some(Value::Object(data)) => data,
            Some(other) => {
                return Err(RecordStoreError::Decode(format!("record data is not an object: {other}")).into())
            }
            None => body,
        },
        other => return Err(RecordStoreError::Decode(format!("record is not an object: {other}")).into()),
    };
    Ok(payload)
}

fn nickname_of(payload: &Map<String, Value>) -> Option<String> {
    NICKNAME_FIELDS
        .iter()
        .find_map(|field| payload.get(*field).and_then(Value::as_str))
        .filter(|nickname| !nickname.is_empty())
        .map(str::to_string)
}
