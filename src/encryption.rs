// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Optional threshold-access encryption of pipeline payloads.
//!
//! The primary path delegates to the external key-server network: decryption
//! then requires a threshold of independent key holders to cooperate,
//! enforced by that network, not here. When the service is unreachable the
//! gateway falls back to a locally generated AES-256-GCM key — a single
//! point of trust — and records that degraded mode in the payload's
//! [`AccessPolicy`]. The fallback is never presented as threshold
//! protection.
//!
//! Both the ciphertext and the reversing key/handle are retained in the
//! payload so the workflow can verify a decrypt round-trip before minting.

use std::sync::Arc;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use async_trait::async_trait;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::PipelineError;
use crate::models::{AccessPolicy, SealedPayload};

/// AES-256 key length for the fallback path.
const LOCAL_KEY_LEN: usize = 32;
/// Standard 96-bit GCM nonce.
const LOCAL_NONCE_LEN: usize = 12;

/// Errors from the external threshold service.
#[derive(Debug, thiserror::Error)]
pub enum ThresholdServiceError {
    #[error("threshold service request failed: {0}")]
    Request(String),

    #[error("threshold service answered HTTP {0}")]
    Status(u16),

    #[error("threshold service response was invalid: {0}")]
    InvalidResponse(String),
}

/// Ciphertext and handle returned by the threshold service.
#[derive(Debug, Clone)]
pub struct ThresholdCiphertext {
    pub ciphertext: Vec<u8>,
    pub handle: String,
}

/// External key-server network client.
#[async_trait]
pub trait ThresholdClient: Send + Sync {
    /// Seal `data` under `id` so that `threshold` key holders are needed to
    /// reverse it.
    async fn encrypt(
        &self,
        data: &[u8],
        threshold: u8,
        id: &str,
        package_id: &str,
    ) -> Result<ThresholdCiphertext, ThresholdServiceError>;

    /// Recover the plaintext for a previously issued handle.
    async fn decrypt(
        &self,
        handle: &str,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, ThresholdServiceError>;
}

// =============================================================================
// HTTP Threshold Client
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EncryptRequest<'a> {
    data: String,
    threshold: u8,
    id: &'a str,
    package_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EncryptResponse {
    ciphertext: String,
    handle: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DecryptRequest<'a> {
    handle: &'a str,
    ciphertext: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DecryptResponse {
    plaintext: String,
}

/// Production client for the threshold encryption service.
#[derive(Debug, Clone)]
pub struct HttpThresholdClient {
    endpoint: String,
    http: reqwest::Client,
}

impl HttpThresholdClient {
    pub fn new(endpoint: String, timeout: std::time::Duration) -> Result<Self, ThresholdServiceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ThresholdServiceError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { endpoint, http })
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T, ThresholdServiceError> {
        let url = format!("{}{path}", self.endpoint);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ThresholdServiceError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ThresholdServiceError::Status(response.status().as_u16()));
        }

        response
            .json()
            .await
            .map_err(|e| ThresholdServiceError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl ThresholdClient for HttpThresholdClient {
    async fn encrypt(
        &self,
        data: &[u8],
        threshold: u8,
        id: &str,
        package_id: &str,
    ) -> Result<ThresholdCiphertext, ThresholdServiceError> {
        let request = EncryptRequest {
            data: hex::encode(data),
            threshold,
            id,
            package_id,
        };
        let response: EncryptResponse = self.post_json("/v1/encrypt", &request).await?;
        let ciphertext = hex::decode(&response.ciphertext)
            .map_err(|e| ThresholdServiceError::InvalidResponse(format!("bad ciphertext hex: {e}")))?;
        Ok(ThresholdCiphertext {
            ciphertext,
            handle: response.handle,
        })
    }

    async fn decrypt(
        &self,
        handle: &str,
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, ThresholdServiceError> {
        let request = DecryptRequest {
            handle,
            ciphertext: hex::encode(ciphertext),
        };
        let response: DecryptResponse = self.post_json("/v1/decrypt", &request).await?;
        hex::decode(&response.plaintext)
            .map_err(|e| ThresholdServiceError::InvalidResponse(format!("bad plaintext hex: {e}")))
    }
}

// =============================================================================
// Encryption Gateway
// =============================================================================

/// Seals payloads via the threshold service, degrading to a local key when
/// the service is unreachable.
pub struct EncryptionGateway {
    service: Option<Arc<dyn ThresholdClient>>,
    package_id: String,
}

impl EncryptionGateway {
    pub fn new(service: Option<Arc<dyn ThresholdClient>>, package_id: String) -> Self {
        Self {
            service,
            package_id,
        }
    }

    /// Seal `bytes` under `seal_id`.
    ///
    /// Tries the threshold service first; on any service failure the local
    /// fallback runs and the degraded mode is recorded on the payload.
    /// `EncryptionFailed` is raised only when both paths fail.
    pub async fn encrypt(
        &self,
        bytes: &[u8],
        threshold: u8,
        seal_id: &str,
    ) -> Result<SealedPayload, PipelineError> {
        if let Some(service) = &self.service {
            match service
                .encrypt(bytes, threshold, seal_id, &self.package_id)
                .await
            {
                Ok(sealed) => {
                    return Ok(SealedPayload {
                        ciphertext: sealed.ciphertext,
                        seal_id: seal_id.to_string(),
                        threshold,
                        access_policy: AccessPolicy::Threshold {
                            handle: sealed.handle,
                        },
                    });
                }
                Err(e) => {
                    warn!(seal_id = %seal_id, error = %e, "threshold service failed, using local fallback");
                }
            }
        } else {
            warn!(seal_id = %seal_id, "no threshold service configured, using local fallback");
        }

        self.encrypt_local(bytes, threshold, seal_id)
    }

    /// Reverse a sealed payload.
    pub async fn decrypt(&self, sealed: &SealedPayload) -> Result<Vec<u8>, PipelineError> {
        match &sealed.access_policy {
            AccessPolicy::Threshold { handle } => {
                let service = self.service.as_ref().ok_or_else(|| {
                    PipelineError::EncryptionFailed(
                        "threshold-sealed payload but no service configured".to_string(),
                    )
                })?;
                service
                    .decrypt(handle, &sealed.ciphertext)
                    .await
                    .map_err(|e| PipelineError::EncryptionFailed(e.to_string()))
            }
            AccessPolicy::LocalFallback { key_hex, nonce_hex } => {
                decrypt_local(&sealed.ciphertext, key_hex, nonce_hex)
            }
        }
    }

    /// Verify the payload actually decrypts back to `expected`.
    ///
    /// The workflow runs this before any minting; a payload that cannot be
    /// reversed must fail the run instead of producing an unrecoverable
    /// certificate.
    pub async fn validate_round_trip(
        &self,
        sealed: &SealedPayload,
        expected: &[u8],
    ) -> Result<(), PipelineError> {
        let plaintext = self.decrypt(sealed).await.map_err(|e| {
            PipelineError::SealValidationFailed(format!("decrypt failed: {e}"))
        })?;

        if plaintext != expected {
            return Err(PipelineError::SealValidationFailed(
                "decrypted bytes do not match the original payload".to_string(),
            ));
        }
        Ok(())
    }

    fn encrypt_local(
        &self,
        bytes: &[u8],
        threshold: u8,
        seal_id: &str,
    ) -> Result<SealedPayload, PipelineError> {
        let mut key = [0u8; LOCAL_KEY_LEN];
        let mut nonce = [0u8; LOCAL_NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut key);
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce), bytes)
            .map_err(|e| PipelineError::EncryptionFailed(format!("local seal failed: {e}")))?;

        Ok(SealedPayload {
            ciphertext,
            seal_id: seal_id.to_string(),
            threshold,
            access_policy: AccessPolicy::LocalFallback {
                key_hex: hex::encode(key),
                nonce_hex: hex::encode(nonce),
            },
        })
    }
}

fn decrypt_local(
    ciphertext: &[u8],
    key_hex: &str,
    nonce_hex: &str,
) -> Result<Vec<u8>, PipelineError> {
    let key = hex::decode(key_hex)
        .map_err(|e| PipelineError::EncryptionFailed(format!("bad fallback key hex: {e}")))?;
    let nonce = hex::decode(nonce_hex)
        .map_err(|e| PipelineError::EncryptionFailed(format!("bad fallback nonce hex: {e}")))?;

    if key.len() != LOCAL_KEY_LEN || nonce.len() != LOCAL_NONCE_LEN {
        return Err(PipelineError::EncryptionFailed(
            "fallback key material has wrong length".to_string(),
        ));
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
    cipher
        .decrypt(Nonce::from_slice(&nonce), ciphertext)
        .map_err(|e| PipelineError::EncryptionFailed(format!("local decrypt failed: {e}")))
}
