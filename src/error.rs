// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Crate-wide error taxonomy.
//!
//! Component modules define local error enums for their own plumbing
//! (transport failures, signer failures); everything that reaches a workflow
//! stage is converted into [`PipelineError`] so stage records carry a single,
//! stable vocabulary of failure kinds.

use crate::models::TransactionDigest;

/// Errors surfaced on failed pipeline stages.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Every candidate storage endpoint and the relay fallback failed.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Both the threshold service and the local fallback failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// The attestation response was reachable but malformed.
    #[error("invalid attestation format: {0}")]
    InvalidAttestationFormat(String),

    /// The verification-request digest was not found on the ledger.
    #[error("transaction digest not found on ledger: {0}")]
    DigestNotFound(TransactionDigest),

    /// The attestation verifier could not be reached.
    #[error("attestation verifier unreachable: {0}")]
    AttestationUnreachable(String),

    /// The signer refused or failed to sign the transaction.
    #[error("transaction rejected by signer: {0}")]
    TransactionRejected(String),

    /// The signed transaction executed but returned no extractable digest.
    #[error("transaction returned no digest")]
    TransactionNoDigest,

    /// A mint call failed. Non-fatal to artifacts produced by earlier
    /// stages, which remain retrievable.
    #[error("minting failed: {0}")]
    MintingFailed(String),

    /// A sealed payload could not be decrypted back to the original bytes.
    #[error("sealed payload failed decrypt validation: {0}")]
    SealValidationFailed(String),

    /// A stage precondition was not met and could not be synthesized.
    #[error("missing prerequisite artifact: {0}")]
    MissingArtifact(&'static str),
}

impl PipelineError {
    /// Short machine-readable code attached to stage records and logs.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::StorageUnavailable(_) => "storage_unavailable",
            PipelineError::EncryptionFailed(_) => "encryption_failed",
            PipelineError::InvalidAttestationFormat(_) => "invalid_attestation_format",
            PipelineError::DigestNotFound(_) => "digest_not_found",
            PipelineError::AttestationUnreachable(_) => "attestation_unreachable",
            PipelineError::TransactionRejected(_) => "transaction_rejected",
            PipelineError::TransactionNoDigest => "transaction_no_digest",
            PipelineError::MintingFailed(_) => "minting_failed",
            PipelineError::SealValidationFailed(_) => "seal_validation_failed",
            PipelineError::MissingArtifact(_) => "missing_artifact",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(
            PipelineError::StorageUnavailable("x".into()).code(),
            "storage_unavailable"
        );
        assert_eq!(
            PipelineError::TransactionNoDigest.code(),
            "transaction_no_digest"
        );
        assert_eq!(
            PipelineError::DigestNotFound(TransactionDigest("d".into())).code(),
            "digest_not_found"
        );
    }

    #[test]
    fn display_includes_context() {
        let err = PipelineError::InvalidAttestationFormat("contentHashHex length 30".into());
        assert!(err.to_string().contains("contentHashHex length 30"));
    }
}
