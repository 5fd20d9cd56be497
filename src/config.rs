// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is read once at startup into an [`AppConfig`] value that is
//! passed by reference to every constructor. Fields are populated through
//! [`CONFIG_FIELDS`], an explicit mapping from field name to environment
//! variable.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port (`8080` or `:8080`) | `8080` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//! | `TLS_CERT_PATH` / `TLS_KEY_PATH` | PEM files, HTTPS when both are set | Optional |
//! | `POLYBASE_URL` | Record store base URL | `https://testnet.polybase.xyz` |
//! | `POLYBASE_NAMESPACE` | Record store namespace | Required |
//! | `POLYBASE_KEY` | Tenant signing key (hex secp256k1) | Required |
//! | `USER_COLLECTION` | Collection holding identities | `User` |
//! | `TIMELOCK_HOST` | drand HTTP relay | `https://api.drand.sh` |
//! | `TIMELOCK_HASH` | drand chain hash | quicknet |
//! | `TOKEN_ISSUER` | `iis` claim of minted tokens | `promisecards` |
//! | `TOKEN_TTL_SECS` | Token lifetime | `600` |
//! | `PINATA_KEY` | Pinning JWT, enables avatar pinning | Optional |
//! | `PINATA_URL` | Pinning API base | `https://api.pinata.cloud` |
//! | `RPC_URL` | Ethereum RPC, enables ENS naming | Optional |
//! | `ENS_OWNER_PRIVATE_KEY` | Parent-domain owner key | Required with `RPC_URL` |
//! | `ENS_MAIN_DOMAIN` | Parent domain, e.g. `promisecard.eth` | Required with `RPC_URL` |
//! | `ENS_RESOLVER_ADDRESS` | Public resolver | Required with `RPC_URL` |
//! | `ENS_REGISTRY_ADDRESS` | ENS registry | mainnet registry |
//! | `ENVIRONMENT` | `dev` loads a `.env` file first | Optional |

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use k256::ecdsa::SigningKey;
use tracing::warn;
use url::Url;
use zeroize::Zeroizing;

use crate::blockchain::ens::DEFAULT_ENS_REGISTRY;
use crate::identity::address_of;
use crate::providers::drand::{DEFAULT_DRAND_HOST, QUICKNET_CHAIN_HASH};
use crate::providers::pinata::DEFAULT_PINATA_URL;
use crate::providers::polybase::DEFAULT_POLYBASE_URL;

/// Environment variable selecting the deployment environment.
///
/// Only read by [`AppConfig::from_env`]; `dev` loads `.env` first.
pub const ENVIRONMENT_ENV: &str = "ENVIRONMENT";

/// Default `RUST_LOG` filter.
pub const DEFAULT_LOG_FILTER: &str = "info,tower_http=debug";

/// When a field must be present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Optional,
    Always,
    /// Required once `RPC_URL` enables naming.
    WithNaming,
}

/// One row of the configuration mapping table.
#[derive(Debug, Clone, Copy)]
pub struct ConfigField {
    pub field: &'static str,
    pub env: &'static str,
    pub requirement: Requirement,
    pub default: Option<&'static str>,
}

const fn field(
    field: &'static str,
    env: &'static str,
    requirement: Requirement,
    default: Option<&'static str>,
) -> ConfigField {
    ConfigField {
        field,
        env,
        requirement,
        default,
    }
}

pub const CONFIG_FIELDS: &[ConfigField] = &[
    field("host", "HOST", Requirement::Optional, Some("0.0.0.0")),
    field("port", "PORT", Requirement::Optional, Some("8080")),
    field("log_format", "LOG_FORMAT", Requirement::Optional, Some("pretty")),
    field("tls_cert_path", "TLS_CERT_PATH", Requirement::Optional, None),
    field("tls_key_path", "TLS_KEY_PATH", Requirement::Optional, None),
    field("polybase_url", "POLYBASE_URL", Requirement::Optional, Some(DEFAULT_POLYBASE_URL)),
    field("polybase_namespace", "POLYBASE_NAMESPACE", Requirement::Always, None),
    field("polybase_key", "POLYBASE_KEY", Requirement::Always, None),
    field("user_collection", "USER_COLLECTION", Requirement::Optional, Some("User")),
    field("timelock_host", "TIMELOCK_HOST", Requirement::Optional, Some(DEFAULT_DRAND_HOST)),
    field("timelock_hash", "TIMELOCK_HASH", Requirement::Optional, Some(QUICKNET_CHAIN_HASH)),
    field("token_issuer", "TOKEN_ISSUER", Requirement::Optional, Some("promisecards")),
    field("token_ttl_secs", "TOKEN_TTL_SECS", Requirement::Optional, Some("600")),
    field("pinata_key", "PINATA_KEY", Requirement::Optional, None),
    field("pinata_url", "PINATA_URL", Requirement::Optional, Some(DEFAULT_PINATA_URL)),
    field("rpc_url", "RPC_URL", Requirement::Optional, None),
    field("ens_owner_key", "ENS_OWNER_PRIVATE_KEY", Requirement::WithNaming, None),
    field("ens_main_domain", "ENS_MAIN_DOMAIN", Requirement::WithNaming, None),
    field("ens_resolver", "ENS_RESOLVER_ADDRESS", Requirement::WithNaming, None),
    field("ens_registry", "ENS_REGISTRY_ADDRESS", Requirement::Optional, Some(DEFAULT_ENS_REGISTRY)),
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("Configuration field {0} has no mapping")]
    Unmapped(&'static str),

    #[error("Failed to load .env: {0}")]
    DotEnv(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(format!("expected json or pretty, got {other:?}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

pub struct PinningConfig {
    pub url: String,
    pub jwt: Zeroizing<String>,
}

pub struct NamingConfig {
    pub rpc_url: Url,
    pub owner: PrivateKeySigner,
    pub main_domain: String,
    pub resolver: Address,
    pub registry: Address,
}

pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub log_format: LogFormat,
    pub tls: Option<TlsPaths>,
    pub polybase_url: String,
    pub polybase_namespace: String,
    pub tenant_key: SigningKey,
    pub user_collection: String,
    pub timelock_host: String,
    pub timelock_hash: String,
    pub token_issuer: String,
    pub token_ttl: Duration,
    pub pinning: Option<PinningConfig>,
    pub naming: Option<NamingConfig>,
}

impl AppConfig {
    /// Read the process environment, loading `.env` first in dev.
    pub fn from_env() -> Result<Self, ConfigError> {
        if std::env::var(ENVIRONMENT_ENV).is_ok_and(|env| env == "dev") {
            accept_dotenv(dotenvy::dotenv().map(|_| ()))?;
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut values = Values::collect(lookup);
        Self::from_values(&mut values)
    }

    fn from_values(values: &mut Values) -> Result<Self, ConfigError> {
        values.check_required()?;

        let host = values.required("host")?;
        let port = values.parse_with("port", |raw| {
            raw.trim_start_matches(':').parse::<u16>().map_err(|e| e.to_string())
        })?;
        let log_format = values.parse_with("log_format", |raw| raw.parse::<LogFormat>())?;

        let tls = match (values.optional("tls_cert_path")?, values.optional("tls_key_path")?) {
            (Some(cert), Some(key)) => Some(TlsPaths {
                cert: PathBuf::from(cert),
                key: PathBuf::from(key),
            }),
            (None, None) => None,
            _ => {
                return Err(ConfigError::Invalid {
                    key: "TLS_CERT_PATH",
                    reason: "TLS_CERT_PATH and TLS_KEY_PATH must be set together".to_string(),
                })
            }
        };

        let polybase_url = values.parse_with("polybase_url", parse_http_url)?.to_string();
        let polybase_namespace = values.required("polybase_namespace")?;
        let tenant_key = values.parse_with("polybase_key", |raw| {
            let bytes = Zeroizing::new(decode_hex(raw)?);
            SigningKey::from_slice(&bytes).map_err(|e| e.to_string())
        })?;
        let user_collection = values.required("user_collection")?;

        let timelock_host = values.parse_with("timelock_host", parse_http_url)?.to_string();
        let timelock_hash = values.parse_with("timelock_hash", |raw| {
            let bytes = decode_hex(raw)?;
            if bytes.len() == 32 {
                Ok(alloy::hex::encode(bytes))
            } else {
                Err(format!("expected 32 bytes, got {}", bytes.len()))
            }
        })?;

        let token_issuer = values.required("token_issuer")?;
        let token_ttl = values.parse_with("token_ttl_secs", |raw| match raw.parse::<u64>() {
            Ok(0) => Err("must be positive".to_string()),
            Ok(secs) => Ok(Duration::from_secs(secs)),
            Err(e) => Err(e.to_string()),
        })?;

        let pinata_url = values.parse_with("pinata_url", parse_http_url)?.to_string();
        let pinning = values.optional("pinata_key")?.map(|jwt| PinningConfig {
            url: pinata_url,
            jwt: Zeroizing::new(jwt),
        });

        let rpc_url = values.optional("rpc_url")?;
        let owner_key = values.optional("ens_owner_key")?;
        let main_domain = values.optional("ens_main_domain")?;
        let resolver = values.optional("ens_resolver")?;
        let registry = values.parse_with("ens_registry", parse_address)?;

        let naming = match rpc_url {
            None => None,
            Some(rpc_url) => {
                let owner_key = owner_key.ok_or(ConfigError::Missing("ENS_OWNER_PRIVATE_KEY"))?;
                let main_domain = main_domain.ok_or(ConfigError::Missing("ENS_MAIN_DOMAIN"))?;
                let resolver = resolver.ok_or(ConfigError::Missing("ENS_RESOLVER_ADDRESS"))?;
                Some(NamingConfig {
                    rpc_url: parse_http_url(&rpc_url).map_err(|reason| ConfigError::Invalid {
                        key: "RPC_URL",
                        reason,
                    })?,
                    owner: parse_signer(&owner_key).map_err(|reason| ConfigError::Invalid {
                        key: "ENS_OWNER_PRIVATE_KEY",
                        reason,
                    })?,
                    main_domain: main_domain.trim_end_matches('.').to_ascii_lowercase(),
                    resolver: parse_address(&resolver).map_err(|reason| ConfigError::Invalid {
                        key: "ENS_RESOLVER_ADDRESS",
                        reason,
                    })?,
                    registry,
                })
            }
        };

        Ok(Self {
            host,
            port,
            log_format,
            tls,
            polybase_url,
            polybase_namespace,
            tenant_key,
            user_collection,
            timelock_host,
            timelock_hash,
            token_issuer,
            token_ttl,
            pinning,
            naming,
        })
    }

    /// Address the record store sees as the tenant.
    pub fn tenant_address(&self) -> Address {
        address_of(self.tenant_key.verifying_key())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether the tenant key doubles as the ENS owner key.
    pub fn reuses_tenant_key(&self) -> bool {
        self.naming
            .as_ref()
            .is_some_and(|naming| naming.owner.address() == self.tenant_address())
    }

    /// Log a warning when one key serves both the tenant and ENS roles.
    pub fn warn_on_key_reuse(&self) {
        if self.reuses_tenant_key() {
            warn!(
                address = %self.tenant_address(),
                "POLYBASE_KEY and ENS_OWNER_PRIVATE_KEY are the same key; use distinct keys per role"
            );
        }
    }
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("bind", &self.bind_address())
            .field("log_format", &self.log_format)
            .field("tls", &self.tls)
            .field("polybase_url", &self.polybase_url)
            .field("polybase_namespace", &self.polybase_namespace)
            .field("tenant", &self.tenant_address())
            .field("user_collection", &self.user_collection)
            .field("timelock_host", &self.timelock_host)
            .field("timelock_hash", &self.timelock_hash)
            .field("token_issuer", &self.token_issuer)
            .field("token_ttl", &self.token_ttl)
            .field("pinning", &self.pinning.as_ref().map(|p| p.url.as_str()))
            .field(
                "naming",
                &self.naming.as_ref().map(|n| n.main_domain.as_str()),
            )
            .finish()
    }
}

/// Raw values keyed by field name. Each field can be taken once.
struct Values {
    entries: HashMap<&'static str, (&'static ConfigField, Option<String>)>,
}

impl Values {
    fn collect<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let entries = CONFIG_FIELDS
            .iter()
            .map(|entry| {
                let value = lookup(entry.env)
                    .map(|raw| raw.trim().to_string())
                    .filter(|raw| !raw.is_empty())
                    .or_else(|| entry.default.map(str::to_string));
                (entry.field, (entry, value))
            })
            .collect();
        Self { entries }
    }

    fn check_required(&self) -> Result<(), ConfigError> {
        let naming = self
            .entries
            .get("rpc_url")
            .is_some_and(|(_, value)| value.is_some());

        for entry in CONFIG_FIELDS {
            let needed = match entry.requirement {
                Requirement::Optional => false,
                Requirement::Always => true,
                Requirement::WithNaming => naming,
            };
            let present = self
                .entries
                .get(entry.field)
                .is_some_and(|(_, value)| value.is_some());
            if needed && !present {
                return Err(ConfigError::Missing(entry.env));
            }
        }
        Ok(())
    }

    fn take(&mut self, field: &'static str) -> Result<(&'static ConfigField, Option<String>), ConfigError> {
        self.entries.remove(field).ok_or(ConfigError::Unmapped(field))
    }

    fn optional(&mut self, field: &'static str) -> Result<Option<String>, ConfigError> {
        self.take(field).map(|(_, value)| value)
    }

    fn required(&mut self, field: &'static str) -> Result<String, ConfigError> {
        let (entry, value) = self.take(field)?;
        value.ok_or(ConfigError::Missing(entry.env))
    }

    fn parse_with<T, P>(&mut self, field: &'static str, parse: P) -> Result<T, ConfigError>
    where
        P: FnOnce(&str) -> Result<T, String>,
    {
        let (entry, value) = self.take(field)?;
        let raw = value.ok_or(ConfigError::Missing(entry.env))?;
        parse(&raw).map_err(|reason| ConfigError::Invalid {
            key: entry.env,
            reason,
        })
    }
}

/// A missing `.env` is fine in dev; variables may come from the shell.
fn accept_dotenv(loaded: Result<(), dotenvy::Error>) -> Result<(), ConfigError> {
    match loaded {
        Err(err) if !err.not_found() => Err(ConfigError::DotEnv(err.to_string())),
        _ => Ok(()),
    }
}

fn decode_hex(raw: &str) -> Result<Vec<u8>, String> {
    alloy::hex::decode(raw.strip_prefix("0x").unwrap_or(raw)).map_err(|e| e.to_string())
}

fn parse_http_url(raw: &str) -> Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| e.to_string())?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(format!("unsupported scheme {other:?}")),
    }
}

fn parse_address(raw: &str) -> Result<Address, String> {
    crate::identity::parse_address(raw).map_err(|e| e.to_string())
}

fn parse_signer(raw: &str) -> Result<PrivateKeySigner, String> {
    let bytes = Zeroizing::new(decode_hex(raw)?);
    PrivateKeySigner::from_slice(&bytes).map_err(|e| e.to_string())
}
