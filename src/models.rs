// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Pipeline Data Models
//!
//! Value types shared across the pipeline components. All types derive
//! `Serialize` and `Deserialize` so accumulated run state can be exported
//! for inspection.
//!
//! ## Identifier Newtypes
//!
//! [`BlobId`], [`TransactionDigest`] and [`OwnerAddress`] wrap the string
//! identifiers handed out by external services. They provide type safety and
//! clear semantics: a blob id is never passed where a transaction digest is
//! expected.
//!
//! ## Model Categories
//!
//! - **Sealed payloads**: ciphertext plus the access policy that secured it
//! - **Attestations**: the verifier's signed hash statement
//! - **Certificates**: the terminal artifact assembled from a completed run

use serde::{Deserialize, Serialize};

// =============================================================================
// Identifier Newtypes
// =============================================================================

/// Content address assigned by the storage network.
///
/// Derived from the blob's bytes by the network, so two uploads of identical
/// bytes resolve to the same id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlobId(pub String);

/// Unique identifier of a ledger transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TransactionDigest(pub String);

/// On-chain address that owns minted certificates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct OwnerAddress(pub String);

macro_rules! string_newtype {
    ($ty:ident) => {
        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $ty {
            fn from(value: String) -> Self {
                $ty(value)
            }
        }

        impl From<&str> for $ty {
            fn from(value: &str) -> Self {
                $ty(value.to_string())
            }
        }

        impl From<$ty> for String {
            fn from(value: $ty) -> Self {
                value.0
            }
        }
    };
}

string_newtype!(BlobId);
string_newtype!(TransactionDigest);
string_newtype!(OwnerAddress);

// =============================================================================
// Sealed Payload Models
// =============================================================================

/// How a sealed payload was secured, together with the material needed to
/// reverse it.
///
/// The degraded local mode is recorded explicitly; the pipeline never claims
/// threshold protection for a payload the fallback path sealed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AccessPolicy {
    /// Sealed by the threshold key-server network. Decryption requires the
    /// configured number of independent key holders; `handle` is the opaque
    /// token the service returns for later decryption.
    Threshold { handle: String },
    /// Sealed with a locally generated AES-256-GCM key (single point of
    /// trust). Key and nonce are retained so the payload stays recoverable.
    LocalFallback { key_hex: String, nonce_hex: String },
}

impl AccessPolicy {
    /// Whether this payload was secured by the degraded fallback path.
    pub fn is_degraded(&self) -> bool {
        matches!(self, AccessPolicy::LocalFallback { .. })
    }
}

/// An encrypted payload produced by the encryption gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SealedPayload {
    /// The encrypted bytes uploaded to storage in place of the plaintext.
    #[serde(with = "serde_hex_bytes")]
    pub ciphertext: Vec<u8>,
    /// Caller-supplied identity the payload was sealed under.
    pub seal_id: String,
    /// Number of key holders required for threshold decryption.
    pub threshold: u8,
    /// The scheme that actually secured the payload.
    pub access_policy: AccessPolicy,
}

/// Serialize ciphertext as hex so exported run state stays printable.
mod serde_hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Attestation Models
// =============================================================================

/// The verifier's signed statement about a media/manifest pair.
///
/// Produced once per run and immutable after validation. All hash fields are
/// 64 lowercase hex characters (32 bytes); the client rejects anything else
/// before this record is constructed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttestationRecord {
    /// SHA-256 of the media blob bytes, as re-fetched by the verifier.
    pub content_hash_hex: String,
    /// SHA-256 of the manifest blob bytes.
    pub manifest_hash_hex: String,
    /// Digest identifying the verifying code itself.
    pub code_hash_hex: String,
    /// ECDSA signature over the canonical attestation message.
    pub signature_hex: String,
    /// Identity of the enclave that produced the attestation.
    pub prover_id: String,
}

// =============================================================================
// Certificate Models
// =============================================================================

/// Seal summary embedded in a certificate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SealInfo {
    /// Identity the media payload was sealed under.
    pub seal_id: String,
    /// Configured key-holder threshold.
    pub threshold: u8,
    /// True when the local fallback secured the payload.
    pub degraded: bool,
}

/// The terminal artifact of a completed run.
///
/// Assembled only after storage, verification request, attestation and
/// rendering have all completed. Mint digests are filled in by the minting
/// stage; a failed mint leaves them `None` without invalidating the rest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Certificate {
    /// Address the badge and certificate NFTs are minted to.
    pub owner: OwnerAddress,
    /// Stored media blob (ciphertext when the run was sealed).
    pub media_blob_id: BlobId,
    /// Stored manifest blob.
    pub manifest_blob_id: BlobId,
    /// Digest of the on-chain verification request.
    pub verification_digest: TransactionDigest,
    /// Content hash from the accepted attestation.
    pub attestation_hash: String,
    /// Seal summary, present when the run requested encryption.
    pub seal: Option<SealInfo>,
    /// Rendered badge artifact.
    pub badge_blob_id: BlobId,
    /// Rendered certificate artifact.
    pub certificate_blob_id: BlobId,
    /// Digest of the badge mint, once confirmed.
    pub badge_mint_digest: Option<TransactionDigest>,
    /// Digest of the certificate mint, once confirmed.
    pub certificate_mint_digest: Option<TransactionDigest>,
    /// Issuance timestamp embedded in the rendered artifacts.
    pub issued_at: chrono::DateTime<chrono::Utc>,
}
