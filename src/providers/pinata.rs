// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Pinata IPFS pinning for avatar images.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::protocol::ObjectStore;

pub const DEFAULT_PINATA_URL: &str = "https://api.pinata.cloud";

const PIN_FILE_PATH: &str = "/pinning/pinFileToIPFS";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum ObjectStoreError {
    #[error("Pinning transport error: {0}")]
    Transport(String),

    #[error("Pinning service returned {status}: {body}")]
    Protocol { status: u16, body: String },

    #[error("Pinning response was invalid: {0}")]
    Decode(String),
}

#[derive(Debug, Deserialize)]
struct PinResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
}

#[derive(Clone)]
pub struct PinataClient {
    base_url: String,
    jwt: String,
    http: Client,
}

impl PinataClient {
    pub fn new(base_url: impl Into<String>, jwt: impl Into<String>) -> Result<Self, ObjectStoreError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ObjectStoreError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into(),
            jwt: jwt.into(),
            http,
        })
    }
}

#[async_trait]
impl ObjectStore for PinataClient {
    async fn pin_image(&self, image: Vec<u8>, name: &str) -> Result<String, ObjectStoreError> {
        let size = image.len();
        let form = Form::new()
            .part("file", Part::bytes(image).file_name(name.to_string()))
            .text("pinataOptions", json!({ "cidVersion": 1 }).to_string())
            .text("pinataMetadata", json!({ "name": name }).to_string());

        let url = format!("{}{}", self.base_url.trim_end_matches('/'), PIN_FILE_PATH);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.jwt)
            .multipart(form)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Transport(format!("POST {url} failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ObjectStoreError::Protocol {
                status: status.as_u16(),
                body,
            });
        }

        let pinned: PinResponse = response
            .json()
            .await
            .map_err(|e| ObjectStoreError::Decode(format!("POST {url} invalid JSON: {e}")))?;

        if pinned.ipfs_hash.trim().is_empty() {
            return Err(ObjectStoreError::Decode(
                "pin response did not include IpfsHash".to_string(),
            ));
        }

        info!(cid = %pinned.ipfs_hash, bytes = size, "Pinned image");
        Ok(pinned.ipfs_hash)
    }
}
