// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Ledger transaction submission and digest lookups.
//!
//! All signing happens through an externally supplied [`WalletSigner`]
//! capability; this module never holds private key material. Submission is
//! **not** idempotent — resubmitting a verification request or mint creates
//! a duplicate on-chain record — so the workflow gates retries on whether a
//! confirmed digest was already produced.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::error::PipelineError;
use crate::models::{OwnerAddress, TransactionDigest};

/// Errors from the external signer.
#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    #[error("signing rejected: {0}")]
    Rejected(String),
}

/// Errors from the ledger read path.
#[derive(Debug, thiserror::Error)]
pub enum LedgerQueryError {
    #[error("ledger RPC request failed: {0}")]
    Request(String),

    #[error("ledger RPC answered HTTP {0}")]
    Status(u16),

    #[error("ledger RPC response was invalid: {0}")]
    InvalidResponse(String),
}

/// Contract calls the pipeline submits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerTransaction {
    /// `request_verification(media_id_bytes, manifest_id_bytes)`
    RequestVerification {
        media_id_bytes: Vec<u8>,
        manifest_id_bytes: Vec<u8>,
    },
    /// `mint_provenance_nft(owner, name, url, metadata_json)`
    MintProvenanceNft {
        owner: OwnerAddress,
        name: String,
        url: String,
        metadata_json: String,
    },
    /// `mint_certificate_nft(owner, name, url, metadata_json)`
    MintCertificateNft {
        owner: OwnerAddress,
        name: String,
        url: String,
        metadata_json: String,
    },
}

impl LedgerTransaction {
    /// Contract entry point this transaction targets.
    pub fn call_name(&self) -> &'static str {
        match self {
            LedgerTransaction::RequestVerification { .. } => "request_verification",
            LedgerTransaction::MintProvenanceNft { .. } => "mint_provenance_nft",
            LedgerTransaction::MintCertificateNft { .. } => "mint_certificate_nft",
        }
    }
}

/// Outcome of a signed execution, as reported by the wallet.
#[derive(Debug, Clone)]
pub struct SignedExecution {
    /// Digest reported directly by the wallet, when present.
    pub digest: Option<String>,
    /// Raw effects blob; consulted as a secondary digest source.
    pub effects: Value,
}

/// External wallet capability: signs and executes a transaction.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    async fn sign_and_execute(
        &self,
        package_id: &str,
        tx: &LedgerTransaction,
    ) -> Result<SignedExecution, SignerError>;

    /// Address transactions are executed as, and certificates minted to.
    fn address(&self) -> OwnerAddress;
}

/// Ledger read path used to confirm a digest exists on-chain.
#[async_trait]
pub trait LedgerQuery: Send + Sync {
    async fn transaction_exists(
        &self,
        digest: &TransactionDigest,
    ) -> Result<bool, LedgerQueryError>;
}

// =============================================================================
// JSON-RPC Query Implementation
// =============================================================================

/// Digest lookups over the ledger's JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct HttpLedgerQuery {
    rpc_url: String,
    http: reqwest::Client,
}

impl HttpLedgerQuery {
    pub fn new(rpc_url: String, timeout: std::time::Duration) -> Result<Self, LedgerQueryError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerQueryError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { rpc_url, http })
    }
}

#[async_trait]
impl LedgerQuery for HttpLedgerQuery {
    async fn transaction_exists(
        &self,
        digest: &TransactionDigest,
    ) -> Result<bool, LedgerQueryError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "ledger_getTransaction",
            "params": [digest.0],
        });

        let response = self
            .http
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LedgerQueryError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(LedgerQueryError::Status(response.status().as_u16()));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|e| LedgerQueryError::InvalidResponse(e.to_string()))?;

        // A missing transaction comes back as a null result or a "not found"
        // error object, not as a transport failure.
        if payload.get("error").is_some() {
            return Ok(false);
        }
        Ok(payload.get("result").map(|r| !r.is_null()).unwrap_or(false))
    }
}

// =============================================================================
// Ledger Client
// =============================================================================

/// Submits contract calls through the external signer.
pub struct LedgerClient {
    signer: Arc<dyn WalletSigner>,
    query: Arc<dyn LedgerQuery>,
    package_id: String,
}

impl LedgerClient {
    pub fn new(
        signer: Arc<dyn WalletSigner>,
        query: Arc<dyn LedgerQuery>,
        package_id: String,
    ) -> Self {
        Self {
            signer,
            query,
            package_id,
        }
    }

    /// Address of the external signer.
    pub fn owner(&self) -> OwnerAddress {
        self.signer.address()
    }

    /// Sign and execute a transaction, returning its confirmed digest.
    ///
    /// A rejection from the signer is `TransactionRejected`. An execution
    /// that yields no extractable digest is `TransactionNoDigest` — distinct,
    /// because the transaction may still have landed and must not be blindly
    /// resubmitted.
    pub async fn submit(
        &self,
        tx: &LedgerTransaction,
    ) -> Result<TransactionDigest, PipelineError> {
        let execution = self
            .signer
            .sign_and_execute(&self.package_id, tx)
            .await
            .map_err(|e| PipelineError::TransactionRejected(e.to_string()))?;

        let digest = extract_digest(&execution).ok_or(PipelineError::TransactionNoDigest)?;

        info!(call = tx.call_name(), digest = %digest, "transaction confirmed");
        Ok(digest)
    }

    /// Live lookup: does this digest exist on the ledger?
    pub async fn digest_exists(
        &self,
        digest: &TransactionDigest,
    ) -> Result<bool, LedgerQueryError> {
        self.query.transaction_exists(digest).await
    }
}

/// Pull a digest out of a signed execution.
///
/// The wallet's top-level digest wins; some wallets only report it inside
/// the effects blob.
fn extract_digest(execution: &SignedExecution) -> Option<TransactionDigest> {
    if let Some(digest) = &execution.digest {
        if !digest.is_empty() {
            return Some(TransactionDigest(digest.clone()));
        }
    }

    execution
        .effects
        .get("transactionDigest")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(|s| TransactionDigest(s.to_string()))
}
