// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! drand time-lock beacon adapter.
//!
//! Round scheduling comes from the chain info published by a drand HTTP
//! relay, fetched once at startup. Encryption is tlock in age format, so
//! ciphertexts interoperate with drand's reference `tle` tooling.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::protocol::TimeLockBeacon;

pub const DEFAULT_DRAND_HOST: &str = "https://api.drand.sh";
/// drand "quicknet" (3 s rounds, unchained G1 signatures).
pub const QUICKNET_CHAIN_HASH: &str =
    "52db9ba70e0cc0f6eaf7803dd07447a1f5477735fd3f661792ba94600c84e971";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const SIGNATURE_CHECK: [u8; 16] = *b"drand-round-sig1";

#[derive(Debug, thiserror::Error)]
pub enum BeaconError {
    #[error("Beacon transport error: {0}")]
    Transport(String),

    #[error("Beacon returned {status}: {body}")]
    Protocol { status: u16, body: String },

    #[error("Beacon response was invalid: {0}")]
    Decode(String),

    #[error("Ciphertext is malformed: {0}")]
    Malformed(String),

    #[error("Time-lock encryption failed: {0}")]
    Encrypt(String),

    #[error("Round {round} has not been released yet")]
    TooEarly { round: u64 },
}

/// Chain parameters served at `/{chain_hash}/info`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainInfo {
    pub public_key: String,
    /// Seconds between rounds.
    pub period: u64,
    /// Unix seconds of round 1.
    pub genesis_time: i64,
    pub hash: String,
    #[serde(default, rename = "schemeID")]
    pub scheme_id: Option<String>,
}

impl ChainInfo {
    /// First round published at or after `unix_secs`.
    pub fn round_at(&self, unix_secs: i64) -> u64 {
        if unix_secs <= self.genesis_time || self.period == 0 {
            return 1;
        }
        let elapsed = (unix_secs - self.genesis_time) as u64;
        elapsed.div_ceil(self.period) + 1
    }

    /// Unix seconds at which `round` is published.
    pub fn round_time(&self, round: u64) -> i64 {
        let offset = round.saturating_sub(1).saturating_mul(self.period);
        self.genesis_time
            .saturating_add(i64::try_from(offset).unwrap_or(i64::MAX))
    }
}

#[derive(Debug, Deserialize)]
struct BeaconRound {
    round: u64,
    signature: String,
}

/// drand HTTP relay plus tlock.
pub struct DrandBeacon {
    base_url: String,
    chain_hash: String,
    chain_hash_bytes: Vec<u8>,
    public_key: Vec<u8>,
    info: ChainInfo,
    http: Client,
}

impl DrandBeacon {
    /// Fetch the chain info and build the adapter.
    pub async fn connect(base_url: &str, chain_hash: &str) -> Result<Self, BeaconError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BeaconError::Transport(format!("failed to build HTTP client: {e}")))?;

        let url = format!("{}/{}/info", base_url.trim_end_matches('/'), chain_hash);
        let info: ChainInfo = get_json(&http, &url).await?;

        let beacon = Self::from_info(base_url, chain_hash, info, http)?;
        info!(
            chain_hash = %beacon.chain_hash,
            period_secs = beacon.info.period,
            genesis_time = beacon.info.genesis_time,
            scheme = beacon.info.scheme_id.as_deref().unwrap_or("unknown"),
            "Connected to drand beacon"
        );
        Ok(beacon)
    }

    fn from_info(
        base_url: &str,
        chain_hash: &str,
        info: ChainInfo,
        http: Client,
    ) -> Result<Self, BeaconError> {
        if !info.hash.eq_ignore_ascii_case(chain_hash) {
            return Err(BeaconError::Decode(format!(
                "relay served chain {} but {} was requested",
                info.hash, chain_hash
            )));
        }
        let chain_hash_bytes = alloy::hex::decode(chain_hash)
            .map_err(|e| BeaconError::Decode(format!("invalid chain hash: {e}")))?;
        let public_key = alloy::hex::decode(&info.public_key)
            .map_err(|e| BeaconError::Decode(format!("invalid chain public key: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            chain_hash: chain_hash.to_ascii_lowercase(),
            chain_hash_bytes,
            public_key,
            info,
            http,
        })
    }

    pub fn chain_info(&self) -> &ChainInfo {
        &self.info
    }

    /// Fetch the signature for a published round.
    async fn fetch_round(&self, round: u64) -> Result<BeaconRound, BeaconError> {
        let url = format!("{}/{}/public/{}", self.base_url, self.chain_hash, round);
        match get_json::<BeaconRound>(&self.http, &url).await {
            Err(BeaconError::Protocol { status, .. })
                if status == StatusCode::NOT_FOUND.as_u16()
                    || status == StatusCode::TOO_EARLY.as_u16() =>
            {
                Err(BeaconError::TooEarly { round })
            }
            Ok(published) if published.round != round => Err(BeaconError::Decode(format!(
                "asked for round {round}, relay answered round {}",
                published.round
            ))),
            other => other,
        }
    }
}

#[async_trait]
impl TimeLockBeacon for DrandBeacon {
    async fn round_at(&self, at: DateTime<Utc>) -> Result<u64, BeaconError> {
        Ok(self.info.round_at(at.timestamp()))
    }

    async fn encrypt(&self, plaintext: &[u8], round: u64) -> Result<Vec<u8>, BeaconError> {
        let mut ciphertext = Vec::new();
        tlock_age::encrypt(
            &mut ciphertext,
            plaintext,
            &self.chain_hash_bytes,
            &self.public_key,
            round,
        )
        .map_err(|e| BeaconError::Encrypt(e.to_string()))?;
        Ok(ciphertext)
    }

    async fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, BeaconError> {
        let header = tlock_age::decrypt_header(ciphertext)
            .map_err(|e| BeaconError::Malformed(e.to_string()))?;

        if header.hash() != self.chain_hash_bytes {
            return Err(BeaconError::Malformed(format!(
                "ciphertext is bound to chain {}",
                alloy::hex::encode(header.hash())
            )));
        }

        let round = header.round();
        if self.info.round_time(round) > Utc::now().timestamp() {
            debug!(round, "Round not yet due, skipping beacon fetch");
            return Err(BeaconError::TooEarly { round });
        }

        let published = self.fetch_round(round).await?;
        let signature = alloy::hex::decode(&published.signature)
            .map_err(|e| BeaconError::Decode(format!("invalid round signature: {e}")))?;

        let chain_hash = self.chain_hash_bytes.clone();
        let public_key = self.public_key.clone();
        let ciphertext = ciphertext.to_vec();
        // Pairing work is CPU bound, and tlock asserts on integrity failures.
        let unlocked = tokio::task::spawn_blocking(move || -> Result<Vec<u8>, BeaconError> {
            verify_round_signature(&chain_hash, &public_key, round, &signature)?;
            let mut plaintext = Vec::new();
            tlock_age::decrypt(&mut plaintext, ciphertext.as_slice(), &chain_hash, &signature)
                .map_err(|e| BeaconError::Malformed(e.to_string()))?;
            Ok(plaintext)
        })
        .await;

        match unlocked {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                warn!(round, "Ciphertext failed the tlock integrity check");
                Err(BeaconError::Malformed(
                    "ciphertext failed the tlock integrity check".to_string(),
                ))
            }
            Err(e) => Err(BeaconError::Transport(format!("decryption task aborted: {e}"))),
        }
    }
}

/// Check a relay-supplied round signature against the chain public key.
///
/// A signature unlocks tlock ciphertexts for its round only if it is the
/// chain's signature over that round, so sealing a known block and opening
/// it again verifies the signature without a separate pairing check.
fn verify_round_signature(
    chain_hash: &[u8],
    public_key: &[u8],
    round: u64,
    signature: &[u8],
) -> Result<(), BeaconError> {
    let mut sealed = Vec::new();
    tlock_age::encrypt(&mut sealed, SIGNATURE_CHECK.as_slice(), chain_hash, public_key, round)
        .map_err(|e| BeaconError::Encrypt(e.to_string()))?;

    let opened = std::panic::catch_unwind(|| {
        let mut opened = Vec::new();
        tlock_age::decrypt(&mut opened, sealed.as_slice(), chain_hash, signature)
            .ok()
            .map(|_| opened)
    });

    match opened {
        Ok(Some(opened)) if opened == SIGNATURE_CHECK => Ok(()),
        _ => Err(BeaconError::Decode(format!(
            "signature for round {round} does not verify against the chain key"
        ))),
    }
}

async fn get_json<T: serde::de::DeserializeOwned>(http: &Client, url: &str) -> Result<T, BeaconError> {
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| BeaconError::Transport(format!("GET {url} failed: {e}")))?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(BeaconError::Protocol {
            status: status.as_u16(),
            body,
        });
    }

    response
        .json()
        .await
        .map_err(|e| BeaconError::Decode(format!("GET {url} invalid JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn quicknet_info() -> ChainInfo {
        ChainInfo {
            public_key: "00".to_string(),
            period: 3,
            genesis_time: 1_692_803_367,
            hash: QUICKNET_CHAIN_HASH.to_string(),
            scheme_id: Some("bls-unchained-g1-rfc9380".to_string()),
        }
    }

    #[test]
    fn round_at_genesis_and_before_is_first_round() {
        let info = quicknet_info();
        assert_eq!(info.round_at(info.genesis_time), 1);
        assert_eq!(info.round_at(0), 1);
    }

    #[test]
    fn round_at_rounds_up_to_next_publication() {
        let info = quicknet_info();
        let g = info.genesis_time;
        assert_eq!(info.round_at(g + 1), 2);
        assert_eq!(info.round_at(g + 3), 2);
        assert_eq!(info.round_at(g + 4), 3);
        assert_eq!(info.round_at(g + 3600), 1201);
    }

    #[test]
    fn round_is_never_published_before_target_time() {
        let info = quicknet_info();
        for t in (info.genesis_time..info.genesis_time + 50).step_by(1) {
            let round = info.round_at(t);
            assert!(info.round_time(round) >= t);
            // and it is the earliest such round
            if round > 1 {
                assert!(info.round_time(round - 1) < t);
            }
        }
    }

    #[test]
    fn round_at_is_monotonic() {
        let info = quicknet_info();
        let mut previous = 0;
        for t in (info.genesis_time - 10..info.genesis_time + 100).step_by(7) {
            let round = info.round_at(t);
            assert!(round >= previous);
            previous = round;
        }
    }

    #[tokio::test]
    async fn connect_reads_chain_info() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/{QUICKNET_CHAIN_HASH}/info")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "public_key": "abcd",
                "period": 3,
                "genesis_time": 1692803367,
                "hash": QUICKNET_CHAIN_HASH,
                "groupHash": "f477d5c89f21a17c863a7f937c6a6d15859414d2be09cd448d4279af331c5d3e",
                "schemeID": "bls-unchained-g1-rfc9380",
                "metadata": {"beaconID": "quicknet"}
            })))
            .mount(&server)
            .await;

        let beacon = DrandBeacon::connect(&server.uri(), QUICKNET_CHAIN_HASH)
            .await
            .unwrap();
        assert_eq!(beacon.chain_info().period, 3);
        assert_eq!(beacon.public_key, vec![0xab, 0xcd]);
    }

    #[tokio::test]
    async fn connect_rejects_mismatched_chain() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "public_key": "abcd",
                "period": 30,
                "genesis_time": 1595431050,
                "hash": "8990e7a9aaed2ffed73dbd7092123d6f289930540d7651336225dc172e51b2ce"
            })))
            .mount(&server)
            .await;

        let err = DrandBeacon::connect(&server.uri(), QUICKNET_CHAIN_HASH)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BeaconError::Decode(_)));
    }

    #[tokio::test]
    async fn unpublished_round_maps_to_too_early() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/{QUICKNET_CHAIN_HASH}/public/77")))
            .respond_with(ResponseTemplate::new(425).set_body_string("too early"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/{QUICKNET_CHAIN_HASH}/public/78")))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let beacon =
            DrandBeacon::from_info(&server.uri(), QUICKNET_CHAIN_HASH, quicknet_info(), Client::new())
                .unwrap();

        assert!(matches!(
            beacon.fetch_round(77).await,
            Err(BeaconError::TooEarly { round: 77 })
        ));
        assert!(matches!(
            beacon.fetch_round(78).await,
            Err(BeaconError::TooEarly { round: 78 })
        ));
    }

    #[tokio::test]
    async fn relay_errors_stay_protocol_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let beacon =
            DrandBeacon::from_info(&server.uri(), QUICKNET_CHAIN_HASH, quicknet_info(), Client::new())
                .unwrap();
        assert!(matches!(
            beacon.fetch_round(5).await,
            Err(BeaconError::Protocol { status: 500, .. })
        ));
    }

    /// quicknet chain key and its round-1000 signature.
    const QUICKNET_PUBLIC_KEY: &str = "83cf0f2896adee7eb8b5f01fcad3912212c437e0073e911fb90022d3e760183c8c4b450b6a0a6c3ac6a5776a2d1064510d1fec758c921cc22b0e17e63aaf4bcb5ed66304de9cf809bd274ca73bab4af5a6e9c76a4bc09e76eae8991ef5ece45a";
    const ROUND_1000_SIGNATURE: &str = "b44679b9a59af2ec876b1a6b1ad52ea9b1615fc3982b19576350f93447cb1125e342b73a8dd2bacbe47e4b6b63ed5e39";

    fn quicknet_beacon(base_url: &str) -> DrandBeacon {
        let info = ChainInfo {
            public_key: QUICKNET_PUBLIC_KEY.to_string(),
            ..quicknet_info()
        };
        DrandBeacon::from_info(base_url, QUICKNET_CHAIN_HASH, info, Client::new()).unwrap()
    }

    async fn serve_signature(server: &MockServer, round: u64, signature: &str) {
        Mock::given(method("GET"))
            .and(path(format!("/{QUICKNET_CHAIN_HASH}/public/{round}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "round": round,
                "signature": signature
            })))
            .mount(server)
            .await;
    }

    /// Swap one base64 character in the final line of the tlock stanza body,
    /// which carries the V and W halves of the IBE ciphertext.
    fn tamper_stanza_body(ciphertext: &mut [u8]) {
        let stanza = ciphertext
            .windows(9)
            .position(|w| w == b"-> tlock ")
            .unwrap();
        let mut line_start =
            stanza + ciphertext[stanza..].iter().position(|b| *b == b'\n').unwrap() + 1;
        loop {
            let len = ciphertext[line_start..]
                .iter()
                .position(|b| *b == b'\n')
                .unwrap();
            if len < 64 {
                let target = line_start + 5;
                ciphertext[target] = if ciphertext[target] == b'A' { b'B' } else { b'A' };
                return;
            }
            line_start += len + 1;
        }
    }

    #[tokio::test]
    async fn released_round_unlocks_exact_plaintext() {
        let server = MockServer::start().await;
        serve_signature(&server, 1000, ROUND_1000_SIGNATURE).await;
        let beacon = quicknet_beacon(&server.uri());

        let secret = [0x42u8; 32];
        let ciphertext = beacon.encrypt(&secret, 1000).await.unwrap();
        assert_eq!(tlock_age::decrypt_header(ciphertext.as_slice()).unwrap().round(), 1000);

        let plaintext = beacon.decrypt(&ciphertext).await.unwrap();
        assert_eq!(plaintext, secret);
    }

    #[tokio::test]
    async fn future_round_is_too_early_without_relay_call() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;
        let beacon = quicknet_beacon(&server.uri());

        let round = beacon
            .round_at(Utc::now() + chrono::TimeDelta::hours(1))
            .await
            .unwrap();
        let ciphertext = beacon.encrypt(&[7u8; 32], round).await.unwrap();

        let err = beacon.decrypt(&ciphertext).await.unwrap_err();
        assert!(matches!(err, BeaconError::TooEarly { round: r } if r == round));
    }

    #[tokio::test]
    async fn tampered_ciphertext_is_malformed() {
        let server = MockServer::start().await;
        serve_signature(&server, 1000, ROUND_1000_SIGNATURE).await;
        let beacon = quicknet_beacon(&server.uri());

        let mut ciphertext = beacon.encrypt(&[0x42u8; 32], 1000).await.unwrap();
        tamper_stanza_body(&mut ciphertext);

        let err = beacon.decrypt(&ciphertext).await.unwrap_err();
        assert!(matches!(err, BeaconError::Malformed(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn wrong_round_signature_is_rejected() {
        let server = MockServer::start().await;
        // relay answers round 1001 with the signature of round 1000
        serve_signature(&server, 1001, ROUND_1000_SIGNATURE).await;
        let beacon = quicknet_beacon(&server.uri());

        let ciphertext = beacon.encrypt(&[0x42u8; 32], 1001).await.unwrap();

        let err = beacon.decrypt(&ciphertext).await.unwrap_err();
        assert!(matches!(err, BeaconError::Decode(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn garbage_ciphertext_is_malformed() {
        let beacon = DrandBeacon::from_info(
            DEFAULT_DRAND_HOST,
            QUICKNET_CHAIN_HASH,
            quicknet_info(),
            Client::new(),
        )
        .unwrap();
        let err = beacon.decrypt(b"definitely not age").await.unwrap_err();
        assert!(matches!(err, BeaconError::Malformed(_)));
    }
}
