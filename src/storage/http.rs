// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! HTTP transport for the storage network.
//!
//! One [`BlobTransport`] call is one attempt against one endpoint; the
//! failover policy lives in [`super::StorageGateway`]. The wire format is
//! the network's public blob API:
//!
//! - `PUT {endpoint}/v1/blobs?epochs=N` with a raw binary body, answering
//!   either `{"newlyCreated":{"blobObject":{"blobId":...}}}` or
//!   `{"alreadyCertified":{"blobId":...}}`
//! - `GET {endpoint}/v1/blobs/{blobId}` answering the raw bytes
//!
//! The relay variant posts to `{relay}/v1/store?epochs=N`; the relay performs
//! the same publisher upload server-side and answers `{"blobId":...}`.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::models::BlobId;

/// Errors from a single transport attempt.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("endpoint answered HTTP {status}")]
    Status { status: u16 },

    #[error("endpoint response was invalid: {0}")]
    InvalidResponse(String),

    #[error("attempt timed out")]
    Timeout,
}

/// Result of a successful blob write.
///
/// `already_certified` writes are success: content addressing makes the
/// upload idempotent and the network asserts the bytes are already held.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    pub blob_id: BlobId,
    pub already_certified: bool,
}

/// One storage endpoint attempt. Implemented over HTTP in production and by
/// scripted fakes in tests.
#[async_trait]
pub trait BlobTransport: Send + Sync {
    /// Store `bytes` for `epochs` retention epochs via one publisher.
    async fn put_blob(
        &self,
        endpoint: &str,
        bytes: &[u8],
        epochs: u64,
    ) -> Result<PutOutcome, TransportError>;

    /// Fetch a blob's bytes via one aggregator.
    async fn get_blob(&self, endpoint: &str, blob_id: &BlobId) -> Result<Vec<u8>, TransportError>;

    /// Ask the trusted relay to perform the upload server-side.
    async fn relay_put(
        &self,
        relay: &str,
        bytes: &[u8],
        epochs: u64,
    ) -> Result<PutOutcome, TransportError>;
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PutResponse {
    newly_created: Option<NewlyCreated>,
    already_certified: Option<AlreadyCertified>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewlyCreated {
    blob_object: BlobObject,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlobObject {
    blob_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlreadyCertified {
    blob_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelayResponse {
    blob_id: String,
}

impl PutResponse {
    fn into_outcome(self) -> Result<PutOutcome, TransportError> {
        if let Some(created) = self.newly_created {
            return Ok(PutOutcome {
                blob_id: BlobId(created.blob_object.blob_id),
                already_certified: false,
            });
        }
        if let Some(certified) = self.already_certified {
            return Ok(PutOutcome {
                blob_id: BlobId(certified.blob_id),
                already_certified: true,
            });
        }
        Err(TransportError::InvalidResponse(
            "neither newlyCreated nor alreadyCertified present".to_string(),
        ))
    }
}

// =============================================================================
// HTTP Implementation
// =============================================================================

/// Production transport speaking the storage network's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpBlobTransport {
    http: Client,
}

impl HttpBlobTransport {
    /// Build a transport with the given overall request timeout.
    ///
    /// The gateway additionally bounds every attempt, so this is a backstop
    /// against connections that stall mid-body.
    pub fn new(timeout: std::time::Duration) -> Result<Self, TransportError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl BlobTransport for HttpBlobTransport {
    async fn put_blob(
        &self,
        endpoint: &str,
        bytes: &[u8],
        epochs: u64,
    ) -> Result<PutOutcome, TransportError> {
        let url = format!("{endpoint}/v1/blobs?epochs={epochs}");
        let response = self
            .http
            .put(&url)
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if !response.status().is_success() {
            return Err(TransportError::Status {
                status: response.status().as_u16(),
            });
        }

        let parsed: PutResponse = response
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        parsed.into_outcome()
    }

    async fn get_blob(&self, endpoint: &str, blob_id: &BlobId) -> Result<Vec<u8>, TransportError> {
        let url = format!("{endpoint}/v1/blobs/{blob_id}");
        let response = self.http.get(&url).send().await.map_err(map_reqwest_error)?;

        if !response.status().is_success() {
            return Err(TransportError::Status {
                status: response.status().as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn relay_put(
        &self,
        relay: &str,
        bytes: &[u8],
        epochs: u64,
    ) -> Result<PutOutcome, TransportError> {
        let url = format!("{relay}/v1/store?epochs={epochs}");
        let response = self
            .http
            .post(&url)
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if !response.status().is_success() {
            return Err(TransportError::Status {
                status: response.status().as_u16(),
            });
        }

        let parsed: RelayResponse = response
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        Ok(PutOutcome {
            blob_id: BlobId(parsed.blob_id),
            already_certified: false,
        })
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Request(e.to_string())
    }
}
