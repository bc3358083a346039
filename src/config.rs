// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Pipeline configuration is loaded from the environment at startup. The
//! candidate endpoint lists are deliberately configuration, not code
//! constants, so the failover order can change without a rebuild.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `STORAGE_PUBLISHERS` | Comma-separated publisher endpoints for blob writes | Required |
//! | `STORAGE_AGGREGATORS` | Comma-separated aggregator endpoints for blob reads | Required |
//! | `STORAGE_RELAY_URL` | Trusted relay used after all publishers fail | Optional |
//! | `STORAGE_ATTEMPT_TIMEOUT_SECS` | Per-candidate timeout for one attempt | `15` |
//! | `STORAGE_EPOCHS` | Default retention epochs for uploads | `5` |
//! | `ATTESTATION_URL` | TEE verifier endpoint | Required |
//! | `LEDGER_RPC_URL` | JSON-RPC endpoint for digest lookups | Required |
//! | `SEAL_SERVICE_URL` | Threshold encryption service | Optional |
//! | `CONTRACT_PACKAGE_ID` | On-chain package the mint calls target | Required |
//! | `PROVER_PUBLIC_KEY` | Compressed SEC1 hex key for signature checks | Optional |
//! | `PROVER_CODE_HASH` | Expected code identity of the verifier | Optional |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::env;
use std::time::Duration;

const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 15;
const DEFAULT_STORAGE_EPOCHS: u64 = 5;

/// Errors raised while loading configuration from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration missing: {0}")]
    MissingConfig(String),

    #[error("configuration invalid: {0}")]
    InvalidConfig(String),
}

/// Pipeline configuration, normally loaded via [`PipelineConfig::from_env`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Ordered publisher endpoints tried for blob writes.
    pub publisher_endpoints: Vec<String>,
    /// Ordered aggregator endpoints tried for blob reads.
    pub aggregator_endpoints: Vec<String>,
    /// Trusted relay that uploads server-side, used only after every
    /// publisher failed.
    pub relay_endpoint: Option<String>,
    /// Bound on a single endpoint attempt.
    pub attempt_timeout: Duration,
    /// Default retention epochs for uploads.
    pub default_epochs: u64,
    /// TEE verifier endpoint.
    pub attestation_endpoint: String,
    /// Ledger JSON-RPC endpoint for digest existence lookups.
    pub ledger_rpc_url: String,
    /// Threshold encryption service endpoint; `None` forces the local
    /// fallback for sealed runs.
    pub seal_service_url: Option<String>,
    /// On-chain package id the verification/mint calls target.
    pub contract_package_id: String,
    /// Compressed SEC1 hex public key of the prover. When present,
    /// attestation signatures are verified against it.
    pub prover_public_key_hex: Option<String>,
    /// Expected verifier code hash. When present, a mismatching
    /// `codeHashHex` fails the attestation stage.
    pub expected_code_hash_hex: Option<String>,
}

impl PipelineConfig {
    /// Load configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let publisher_endpoints = parse_endpoint_list(&env_required("STORAGE_PUBLISHERS")?)?;
        let aggregator_endpoints = parse_endpoint_list(&env_required("STORAGE_AGGREGATORS")?)?;

        let attempt_timeout = Duration::from_secs(parse_u64(
            "STORAGE_ATTEMPT_TIMEOUT_SECS",
            DEFAULT_ATTEMPT_TIMEOUT_SECS,
        )?);
        let default_epochs = parse_u64("STORAGE_EPOCHS", DEFAULT_STORAGE_EPOCHS)?;

        Ok(Self {
            publisher_endpoints,
            aggregator_endpoints,
            relay_endpoint: env_optional("STORAGE_RELAY_URL"),
            attempt_timeout,
            default_epochs,
            attestation_endpoint: env_required("ATTESTATION_URL")?,
            ledger_rpc_url: env_required("LEDGER_RPC_URL")?,
            seal_service_url: env_optional("SEAL_SERVICE_URL"),
            contract_package_id: env_required("CONTRACT_PACKAGE_ID")?,
            prover_public_key_hex: env_optional("PROVER_PUBLIC_KEY"),
            expected_code_hash_hex: env_optional("PROVER_CODE_HASH"),
        })
    }
}

fn env_required(name: &str) -> Result<String, ConfigError> {
    env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingConfig(name.to_string()))
}

fn env_optional(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match env_optional(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidConfig(format!("{name} must be an integer: {raw}"))),
    }
}

/// Split a comma-separated endpoint list, validating each entry as a URL and
/// trimming trailing slashes so path joining stays uniform.
pub fn parse_endpoint_list(raw: &str) -> Result<Vec<String>, ConfigError> {
    let endpoints: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            url::Url::parse(entry)
                .map_err(|e| ConfigError::InvalidConfig(format!("bad endpoint {entry}: {e}")))?;
            Ok(entry.trim_end_matches('/').to_string())
        })
        .collect::<Result<_, ConfigError>>()?;

    if endpoints.is_empty() {
        return Err(ConfigError::InvalidConfig(
            "endpoint list is empty".to_string(),
        ));
    }

    Ok(endpoints)
}
