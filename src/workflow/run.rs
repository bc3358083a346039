// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Workflow run records: stages, statuses and accumulated artifacts.
//!
//! A [`WorkflowRun`] has a single writer (the orchestrator) and read-only
//! consumers, so no locking is involved. It holds only references to
//! external state — blob ids and transaction digests — never the
//! authoritative copies, which belong to the storage network and the
//! ledger. Runs are not persisted across sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::models::{AttestationRecord, BlobId, Certificate, SealedPayload, TransactionDigest};

// =============================================================================
// Stage Records
// =============================================================================

/// Identity of one pipeline stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    /// Optional threshold encryption of the media payload.
    Seal,
    /// Upload media and manifest blobs to the storage network.
    Upload,
    /// On-chain verification-request record.
    RequestVerification,
    /// Off-chain TEE attestation and validation.
    Attestation,
    /// Deterministic badge/certificate rendering and upload.
    Certificate,
    /// Badge and certificate NFT mints.
    Minting,
}

impl StageId {
    /// Human-readable stage title for observers.
    pub fn title(self) -> &'static str {
        match self {
            StageId::Seal => "Encrypting media",
            StageId::Upload => "Uploading to storage network",
            StageId::RequestVerification => "Recording verification request",
            StageId::Attestation => "Requesting attestation",
            StageId::Certificate => "Rendering certificate artifacts",
            StageId::Minting => "Minting badge and certificate",
        }
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StageId::Seal => "seal",
            StageId::Upload => "upload",
            StageId::RequestVerification => "request_verification",
            StageId::Attestation => "attestation",
            StageId::Certificate => "certificate",
            StageId::Minting => "minting",
        };
        write!(f, "{name}")
    }
}

/// Lifecycle of one stage. Transitions only move forward:
/// `Pending → Processing → {Completed, Failed}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// One unit of the pipeline, with its own outcome.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Stage {
    pub id: StageId,
    pub title: String,
    pub status: StageStatus,
    /// Failure message, set when `status` is `Failed`.
    pub error: Option<String>,
    /// Machine-readable failure code, set alongside `error`.
    pub error_code: Option<String>,
    /// Artifact keys this stage produced on completion.
    pub produced_artifacts: Vec<String>,
}

impl Stage {
    fn new(id: StageId) -> Self {
        Self {
            id,
            title: id.title().to_string(),
            status: StageStatus::Pending,
            error: None,
            error_code: None,
            produced_artifacts: Vec::new(),
        }
    }
}

// =============================================================================
// Ledger Call Gating
// =============================================================================

/// Retry gate for one non-idempotent ledger call.
///
/// Storage operations are content-addressed and safe to repeat; ledger calls
/// are not. A `Confirmed` call is never resubmitted. An `Unconfirmed` call
/// (signed, executed, but no extractable digest) is also never resubmitted —
/// the transaction may have landed and a duplicate on-chain record is worse
/// than a stuck stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LedgerCallState {
    #[default]
    NotSubmitted,
    Unconfirmed,
    Confirmed {
        digest: TransactionDigest,
    },
}

impl LedgerCallState {
    pub fn digest(&self) -> Option<&TransactionDigest> {
        match self {
            LedgerCallState::Confirmed { digest } => Some(digest),
            _ => None,
        }
    }

    /// Whether a fresh submission is safe.
    pub fn may_submit(&self) -> bool {
        matches!(self, LedgerCallState::NotSubmitted)
    }
}

// =============================================================================
// Run Artifacts
// =============================================================================

/// Everything the run has accumulated so far.
///
/// Artifacts attached to completed stages survive `retry()` untouched;
/// later stages read them instead of redoing finished work.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunArtifacts {
    /// SHA-256 of the plaintext media, computed at submission.
    pub media_sha256_hex: Option<String>,
    /// SHA-256 of the manifest, computed at submission.
    pub manifest_sha256_hex: Option<String>,
    /// Sealed media payload, present when encryption was requested.
    pub sealed: Option<SealedPayload>,
    /// Stored media blob (ciphertext when sealed).
    pub media_blob_id: Option<BlobId>,
    /// Stored manifest blob.
    pub manifest_blob_id: Option<BlobId>,
    /// Verification-request submission state.
    pub verification_call: LedgerCallState,
    /// Accepted attestation.
    pub attestation: Option<AttestationRecord>,
    /// Issuance timestamp fixed when the certificate stage first renders.
    pub issued_at: Option<DateTime<Utc>>,
    /// Rendered badge blob.
    pub badge_blob_id: Option<BlobId>,
    /// Rendered certificate blob.
    pub certificate_blob_id: Option<BlobId>,
    /// Badge mint submission state.
    pub badge_mint_call: LedgerCallState,
    /// Certificate mint submission state.
    pub certificate_mint_call: LedgerCallState,
    /// Terminal certificate record.
    pub certificate: Option<Certificate>,
}

impl RunArtifacts {
    /// Confirmed verification-request digest, when present.
    pub fn verification_digest(&self) -> Option<&TransactionDigest> {
        self.verification_call.digest()
    }
}

// =============================================================================
// Workflow Run
// =============================================================================

/// Overall run status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Failed,
    Completed,
}

/// One pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: Uuid,
    pub stages: Vec<Stage>,
    /// Index of the stage currently executing or next to execute.
    pub cursor: usize,
    pub status: RunStatus,
    pub artifacts: RunArtifacts,
    pub started_at: DateTime<Utc>,
}

impl WorkflowRun {
    /// Create a run with the fixed stage list; the seal stage is present
    /// only when encryption was requested.
    pub fn new(encrypt: bool) -> Self {
        let mut ids = Vec::with_capacity(6);
        if encrypt {
            ids.push(StageId::Seal);
        }
        ids.extend([
            StageId::Upload,
            StageId::RequestVerification,
            StageId::Attestation,
            StageId::Certificate,
            StageId::Minting,
        ]);

        Self {
            id: Uuid::new_v4(),
            stages: ids.into_iter().map(Stage::new).collect(),
            cursor: 0,
            status: RunStatus::Running,
            artifacts: RunArtifacts::default(),
            started_at: Utc::now(),
        }
    }

    /// Move the stage at `index` from `Pending` to `Processing`.
    pub(crate) fn begin_stage(&mut self, index: usize) {
        let stage = &mut self.stages[index];
        debug_assert_eq!(stage.status, StageStatus::Pending);
        stage.status = StageStatus::Processing;
    }

    /// Move the stage at `index` from `Processing` to `Completed`.
    pub(crate) fn complete_stage(&mut self, index: usize, produced: Vec<&'static str>) {
        let stage = &mut self.stages[index];
        debug_assert_eq!(stage.status, StageStatus::Processing);
        stage.status = StageStatus::Completed;
        stage.produced_artifacts = produced.into_iter().map(str::to_string).collect();
    }

    /// Move the stage at `index` from `Processing` to `Failed` and halt the
    /// run.
    pub(crate) fn fail_stage(&mut self, index: usize, error: &PipelineError) {
        let stage = &mut self.stages[index];
        debug_assert_eq!(stage.status, StageStatus::Processing);
        stage.status = StageStatus::Failed;
        stage.error = Some(error.to_string());
        stage.error_code = Some(error.code().to_string());
        self.status = RunStatus::Failed;
    }

    /// Index of the first failed stage, if any.
    pub fn first_failed(&self) -> Option<usize> {
        self.stages
            .iter()
            .position(|stage| stage.status == StageStatus::Failed)
    }

    /// Reset the stage at `index` and every later stage to `Pending`,
    /// keeping everything before `index` untouched.
    pub(crate) fn reset_from(&mut self, index: usize) {
        for stage in &mut self.stages[index..] {
            stage.status = StageStatus::Pending;
            stage.error = None;
            stage.error_code = None;
            stage.produced_artifacts.clear();
        }
        self.cursor = index;
        self.status = RunStatus::Running;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_stage_is_present_only_when_requested() {
        let sealed = WorkflowRun::new(true);
        assert_eq!(sealed.stages[0].id, StageId::Seal);
        assert_eq!(sealed.stages.len(), 6);

        let plain = WorkflowRun::new(false);
        assert_eq!(plain.stages[0].id, StageId::Upload);
        assert_eq!(plain.stages.len(), 5);
    }

    #[test]
    fn stage_transitions_record_outcomes() {
        let mut run = WorkflowRun::new(false);
        run.begin_stage(0);
        assert_eq!(run.stages[0].status, StageStatus::Processing);

        run.complete_stage(0, vec!["media_blob_id"]);
        assert_eq!(run.stages[0].status, StageStatus::Completed);
        assert_eq!(run.stages[0].produced_artifacts, vec!["media_blob_id"]);

        run.begin_stage(1);
        run.fail_stage(1, &PipelineError::TransactionNoDigest);
        assert_eq!(run.stages[1].status, StageStatus::Failed);
        assert_eq!(run.stages[1].error_code.as_deref(), Some("transaction_no_digest"));
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.first_failed(), Some(1));
    }

    #[test]
    fn reset_from_keeps_earlier_stages_and_clears_later_ones() {
        let mut run = WorkflowRun::new(false);
        run.begin_stage(0);
        run.complete_stage(0, vec!["media_blob_id"]);
        run.begin_stage(1);
        run.fail_stage(1, &PipelineError::TransactionNoDigest);

        run.reset_from(1);
        assert_eq!(run.stages[0].status, StageStatus::Completed);
        assert_eq!(run.stages[0].produced_artifacts, vec!["media_blob_id"]);
        for stage in &run.stages[1..] {
            assert_eq!(stage.status, StageStatus::Pending);
            assert!(stage.error.is_none());
        }
        assert_eq!(run.cursor, 1);
        assert_eq!(run.status, RunStatus::Running);
    }

    #[test]
    fn run_record_round_trips_through_json() {
        let mut run = WorkflowRun::new(false);
        run.begin_stage(0);
        run.complete_stage(0, vec!["media_blob_id", "manifest_blob_id"]);
        run.artifacts.verification_call = LedgerCallState::Confirmed {
            digest: TransactionDigest("d-1".into()),
        };

        let json = serde_json::to_string(&run).unwrap();
        let back: WorkflowRun = serde_json::from_str(&json).unwrap();

        assert_eq!(back.id, run.id);
        assert_eq!(back.stages, run.stages);
        assert_eq!(
            back.stages[0].produced_artifacts,
            vec!["media_blob_id", "manifest_blob_id"]
        );
        assert_eq!(
            back.artifacts.verification_digest(),
            Some(&TransactionDigest("d-1".into()))
        );
    }

    #[test]
    fn ledger_call_state_gates_resubmission() {
        assert!(LedgerCallState::NotSubmitted.may_submit());
        assert!(!LedgerCallState::Unconfirmed.may_submit());

        let confirmed = LedgerCallState::Confirmed {
            digest: TransactionDigest("d".into()),
        };
        assert!(!confirmed.may_submit());
        assert_eq!(confirmed.digest(), Some(&TransactionDigest("d".into())));
    }
}
