// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! TEE attestation: verifier invocation and response validation.
//!
//! The verifier independently re-fetches both blobs, digests them, digests
//! its own code identity, and signs a canonical message over all of it. This
//! client trusts none of that at face value: hash fields must be exactly 64
//! hex characters, the signature must be a well-formed 64-byte ECDSA
//! signature, the run's verification-request digest must exist on the ledger
//! (a live lookup, not a cached assumption), and when a prover public key is
//! configured the signature is verified against the canonical message. A
//! reachable-but-malformed response is never coerced into a success.
//!
//! ## Canonical message layout
//!
//! Each variable-length field is preceded by its 8-byte little-endian byte
//! length; the three digests carry the same prefix (always 32):
//!
//! ```text
//! len(media_id) || media_id
//! len(manifest_id) || manifest_id
//! len(prover_id) || prover_id
//! 32u64 || content_hash
//! 32u64 || manifest_hash
//! 32u64 || code_hash
//! verified_flag (1 byte)
//! ```
//!
//! The signature is ECDSA/secp256k1 over the SHA-256 of that concatenation.

use std::sync::Arc;

use async_trait::async_trait;
use k256::ecdsa::signature::Verifier;
use k256::ecdsa::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::ConfigError;
use crate::error::PipelineError;
use crate::ledger::LedgerClient;
use crate::models::{AttestationRecord, BlobId, TransactionDigest};

/// Hex length of a 32-byte digest field.
const HASH_HEX_LEN: usize = 64;
/// Hex length of a 64-byte r||s ECDSA signature.
const SIGNATURE_HEX_LEN: usize = 128;

/// Errors from the verifier transport.
#[derive(Debug, thiserror::Error)]
pub enum VerifierError {
    #[error("verifier request failed: {0}")]
    Request(String),

    #[error("verifier answered HTTP {0}")]
    Status(u16),

    #[error("verifier response was not valid JSON: {0}")]
    InvalidResponse(String),
}

/// Raw verifier response, prior to any validation.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifierResponse {
    pub content_hash_hex: String,
    pub manifest_hash_hex: String,
    pub code_hash_hex: String,
    pub signature_hex: String,
    pub prover_tee_id: String,
}

/// The external verifier endpoint.
#[async_trait]
pub trait VerifierApi: Send + Sync {
    async fn attest(
        &self,
        media_blob_id: &BlobId,
        manifest_blob_id: &BlobId,
    ) -> Result<VerifierResponse, VerifierError>;
}

// =============================================================================
// HTTP Verifier
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AttestRequest<'a> {
    media_blob_id: &'a str,
    manifest_blob_id: &'a str,
}

/// Production verifier client.
#[derive(Debug, Clone)]
pub struct HttpVerifier {
    endpoint: String,
    http: reqwest::Client,
}

impl HttpVerifier {
    pub fn new(endpoint: String, timeout: std::time::Duration) -> Result<Self, VerifierError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VerifierError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { endpoint, http })
    }
}

#[async_trait]
impl VerifierApi for HttpVerifier {
    async fn attest(
        &self,
        media_blob_id: &BlobId,
        manifest_blob_id: &BlobId,
    ) -> Result<VerifierResponse, VerifierError> {
        let request = AttestRequest {
            media_blob_id: &media_blob_id.0,
            manifest_blob_id: &manifest_blob_id.0,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| VerifierError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(VerifierError::Status(response.status().as_u16()));
        }

        response
            .json()
            .await
            .map_err(|e| VerifierError::InvalidResponse(e.to_string()))
    }
}

// =============================================================================
// Canonical Message
// =============================================================================

/// Build the canonical attestation message the verifier signs.
pub fn canonical_attestation_message(
    media_id: &str,
    manifest_id: &str,
    prover_id: &str,
    content_hash: &[u8; 32],
    manifest_hash: &[u8; 32],
    code_hash: &[u8; 32],
    verified: bool,
) -> Vec<u8> {
    let mut message = Vec::new();
    push_length_prefixed(&mut message, media_id.as_bytes());
    push_length_prefixed(&mut message, manifest_id.as_bytes());
    push_length_prefixed(&mut message, prover_id.as_bytes());
    push_length_prefixed(&mut message, content_hash);
    push_length_prefixed(&mut message, manifest_hash);
    push_length_prefixed(&mut message, code_hash);
    message.push(u8::from(verified));
    message
}

fn push_length_prefixed(message: &mut Vec<u8>, field: &[u8]) {
    message.extend_from_slice(&(field.len() as u64).to_le_bytes());
    message.extend_from_slice(field);
}

// =============================================================================
// Attestation Client
// =============================================================================

/// Invokes the verifier and validates its response before the pipeline may
/// proceed.
pub struct AttestationClient {
    verifier: Arc<dyn VerifierApi>,
    ledger: Arc<LedgerClient>,
    prover_public_key: Option<VerifyingKey>,
    expected_code_hash: Option<String>,
}

impl AttestationClient {
    /// Build a client.
    ///
    /// `prover_public_key_hex` is a compressed SEC1 secp256k1 key; when
    /// present, attestation signatures are verified against it.
    /// `expected_code_hash` pins the verifier's code identity; when absent
    /// the code hash is accepted as reported, with a warning. Deriving a
    /// stand-in code hash locally is deliberately not supported.
    pub fn new(
        verifier: Arc<dyn VerifierApi>,
        ledger: Arc<LedgerClient>,
        prover_public_key_hex: Option<&str>,
        expected_code_hash: Option<String>,
    ) -> Result<Self, ConfigError> {
        let prover_public_key = prover_public_key_hex
            .map(|raw| {
                let bytes = hex::decode(raw).map_err(|e| {
                    ConfigError::InvalidConfig(format!("PROVER_PUBLIC_KEY is not hex: {e}"))
                })?;
                VerifyingKey::from_sec1_bytes(&bytes).map_err(|e| {
                    ConfigError::InvalidConfig(format!("PROVER_PUBLIC_KEY is not a valid key: {e}"))
                })
            })
            .transpose()?;

        Ok(Self {
            verifier,
            ledger,
            prover_public_key,
            expected_code_hash,
        })
    }

    /// Request and validate an attestation for the stored blob pair.
    ///
    /// `verification_digest` is the run's verification-request transaction;
    /// its on-ledger existence is confirmed before the attestation is
    /// accepted.
    pub async fn attest(
        &self,
        media_blob_id: &BlobId,
        manifest_blob_id: &BlobId,
        verification_digest: &TransactionDigest,
    ) -> Result<AttestationRecord, PipelineError> {
        let response = self
            .verifier
            .attest(media_blob_id, manifest_blob_id)
            .await
            .map_err(|e| match e {
                VerifierError::InvalidResponse(msg) => PipelineError::InvalidAttestationFormat(msg),
                other => PipelineError::AttestationUnreachable(other.to_string()),
            })?;

        let content_hash = require_hash_hex("contentHashHex", &response.content_hash_hex)?;
        let manifest_hash = require_hash_hex("manifestHashHex", &response.manifest_hash_hex)?;
        let code_hash = require_hash_hex("codeHashHex", &response.code_hash_hex)?;
        let signature = require_signature_hex(&response.signature_hex)?;

        match &self.expected_code_hash {
            Some(expected) => {
                if !expected.eq_ignore_ascii_case(&response.code_hash_hex) {
                    return Err(PipelineError::InvalidAttestationFormat(format!(
                        "codeHashHex does not match the pinned verifier code identity: {}",
                        response.code_hash_hex
                    )));
                }
            }
            None => {
                warn!("no expected code hash configured; accepting reported verifier code identity unchecked");
            }
        }

        let exists = self
            .ledger
            .digest_exists(verification_digest)
            .await
            .map_err(|e| {
                PipelineError::AttestationUnreachable(format!("ledger digest lookup failed: {e}"))
            })?;
        if !exists {
            return Err(PipelineError::DigestNotFound(verification_digest.clone()));
        }

        if let Some(key) = &self.prover_public_key {
            let message = canonical_attestation_message(
                &media_blob_id.0,
                &manifest_blob_id.0,
                &response.prover_tee_id,
                &content_hash,
                &manifest_hash,
                &code_hash,
                true,
            );
            key.verify(&message, &signature).map_err(|_| {
                PipelineError::InvalidAttestationFormat(
                    "signature does not verify against the canonical message".to_string(),
                )
            })?;
        }

        info!(
            media_blob_id = %media_blob_id,
            prover_id = %response.prover_tee_id,
            "attestation accepted"
        );

        Ok(AttestationRecord {
            content_hash_hex: response.content_hash_hex,
            manifest_hash_hex: response.manifest_hash_hex,
            code_hash_hex: response.code_hash_hex,
            signature_hex: response.signature_hex,
            prover_id: response.prover_tee_id,
        })
    }
}

fn require_hash_hex(field: &str, value: &str) -> Result<[u8; 32], PipelineError> {
    if value.len() != HASH_HEX_LEN {
        return Err(PipelineError::InvalidAttestationFormat(format!(
            "{field} length {} (expected {HASH_HEX_LEN} hex chars)",
            value.len()
        )));
    }
    let bytes = hex::decode(value).map_err(|_| {
        PipelineError::InvalidAttestationFormat(format!("{field} is not valid hex"))
    })?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Parse the signature field as a fixed-width 64-byte `r || s` pair.
///
/// The verifier emits raw `r || s`, never DER, and the verify path consumes
/// the same fixed-width form, so anything other than exactly 128 hex chars
/// is rejected up front.
fn require_signature_hex(value: &str) -> Result<Signature, PipelineError> {
    if value.is_empty() {
        return Err(PipelineError::InvalidAttestationFormat(
            "signatureHex is empty".to_string(),
        ));
    }
    if value.len() != SIGNATURE_HEX_LEN {
        return Err(PipelineError::InvalidAttestationFormat(format!(
            "signatureHex length {} (expected {SIGNATURE_HEX_LEN} hex chars)",
            value.len()
        )));
    }
    let bytes = hex::decode(value).map_err(|_| {
        PipelineError::InvalidAttestationFormat("signatureHex is not valid hex".to_string())
    })?;
    Signature::from_slice(&bytes).map_err(|_| {
        PipelineError::InvalidAttestationFormat("signatureHex is not a valid signature".to_string())
    })
}
