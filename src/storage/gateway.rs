// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Failover across candidate storage endpoints.
//!
//! Candidates are tried **sequentially**, in list order, so failover is
//! deterministic and auditable and one operation never fans out across the
//! network. Each attempt is bounded by `attempt_timeout`; a single
//! unreachable endpoint cannot stall the whole operation. The first success
//! short-circuits. Only after every publisher has failed does `put` fall
//! back to the trusted relay, if one is configured.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::http::{BlobTransport, PutOutcome, TransportError};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::models::BlobId;

/// Blob put/get with sequential endpoint failover.
pub struct StorageGateway {
    transport: Arc<dyn BlobTransport>,
    publishers: Vec<String>,
    aggregators: Vec<String>,
    relay: Option<String>,
    attempt_timeout: Duration,
}

impl StorageGateway {
    /// Build a gateway over an explicit endpoint configuration.
    pub fn new(
        transport: Arc<dyn BlobTransport>,
        publishers: Vec<String>,
        aggregators: Vec<String>,
        relay: Option<String>,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            publishers,
            aggregators,
            relay,
            attempt_timeout,
        }
    }

    /// Build a gateway from loaded configuration.
    pub fn from_config(config: &PipelineConfig, transport: Arc<dyn BlobTransport>) -> Self {
        Self::new(
            transport,
            config.publisher_endpoints.clone(),
            config.aggregator_endpoints.clone(),
            config.relay_endpoint.clone(),
            config.attempt_timeout,
        )
    }

    /// Store `bytes` with the given retention and return its content address.
    ///
    /// Re-uploading identical bytes is safe: the network either returns the
    /// same id or asserts the blob is already certified, both of which are
    /// success here.
    pub async fn put(&self, bytes: &[u8], epochs: u64) -> Result<BlobId, PipelineError> {
        let mut last_error = None;

        for endpoint in &self.publishers {
            match self.attempt_put(endpoint, bytes, epochs).await {
                Ok(outcome) => {
                    info!(
                        endpoint = %endpoint,
                        blob_id = %outcome.blob_id,
                        already_certified = outcome.already_certified,
                        "blob stored"
                    );
                    return Ok(outcome.blob_id);
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, error = %e, "publisher attempt failed");
                    last_error = Some(e);
                }
            }
        }

        if let Some(relay) = &self.relay {
            debug!(relay = %relay, "all publishers exhausted, trying relay");
            match self.attempt_relay(relay, bytes, epochs).await {
                Ok(outcome) => {
                    info!(relay = %relay, blob_id = %outcome.blob_id, "blob stored via relay");
                    return Ok(outcome.blob_id);
                }
                Err(e) => {
                    warn!(relay = %relay, error = %e, "relay attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(PipelineError::StorageUnavailable(describe_exhaustion(
            self.publishers.len(),
            self.relay.is_some(),
            last_error,
        )))
    }

    /// Public read URL for a blob, via the first configured aggregator.
    /// Used in minted metadata so wallets can resolve the artifact.
    pub fn read_url(&self, blob_id: &BlobId) -> Option<String> {
        self.aggregators
            .first()
            .map(|endpoint| format!("{endpoint}/v1/blobs/{blob_id}"))
    }

    /// Fetch a blob's bytes by content address.
    pub async fn get(&self, blob_id: &BlobId) -> Result<Vec<u8>, PipelineError> {
        let mut last_error = None;

        for endpoint in &self.aggregators {
            match self.attempt_get(endpoint, blob_id).await {
                Ok(bytes) => {
                    debug!(endpoint = %endpoint, blob_id = %blob_id, len = bytes.len(), "blob fetched");
                    return Ok(bytes);
                }
                Err(e) => {
                    warn!(endpoint = %endpoint, blob_id = %blob_id, error = %e, "aggregator attempt failed");
                    last_error = Some(e);
                }
            }
        }

        Err(PipelineError::StorageUnavailable(describe_exhaustion(
            self.aggregators.len(),
            false,
            last_error,
        )))
    }

    async fn attempt_put(
        &self,
        endpoint: &str,
        bytes: &[u8],
        epochs: u64,
    ) -> Result<PutOutcome, TransportError> {
        tokio::time::timeout(
            self.attempt_timeout,
            self.transport.put_blob(endpoint, bytes, epochs),
        )
        .await
        .map_err(|_| TransportError::Timeout)?
    }

    async fn attempt_get(
        &self,
        endpoint: &str,
        blob_id: &BlobId,
    ) -> Result<Vec<u8>, TransportError> {
        tokio::time::timeout(
            self.attempt_timeout,
            self.transport.get_blob(endpoint, blob_id),
        )
        .await
        .map_err(|_| TransportError::Timeout)?
    }

    async fn attempt_relay(
        &self,
        relay: &str,
        bytes: &[u8],
        epochs: u64,
    ) -> Result<PutOutcome, TransportError> {
        tokio::time::timeout(
            self.attempt_timeout,
            self.transport.relay_put(relay, bytes, epochs),
        )
        .await
        .map_err(|_| TransportError::Timeout)?
    }
}

fn describe_exhaustion(
    candidates: usize,
    relay_tried: bool,
    last_error: Option<TransportError>,
) -> String {
    let last = last_error
        .map(|e| e.to_string())
        .unwrap_or_else(|| "no candidates configured".to_string());
    if relay_tried {
        format!("{candidates} candidate endpoints and the relay failed, last error: {last}")
    } else {
        format!("{candidates} candidate endpoints failed, last error: {last}")
    }
}
