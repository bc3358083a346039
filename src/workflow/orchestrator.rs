// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! The stage orchestrator: a resumable saga over injected collaborators.
//!
//! Stages execute strictly in order; a stage begins only once the previous
//! one completed. Any stage error marks that stage failed, halts the run and
//! leaves `retry()` as the only way back in — failures are never retried
//! automatically. Completed stages keep their artifacts across a retry; a
//! prerequisite artifact that went missing anyway is synthesized by an
//! idempotent `ensure_*` helper instead of failing the run outright.
//!
//! Abort is cooperative: a cancelled token stops the orchestrator from
//! advancing to further stages, but a request already in flight is not
//! force-cancelled and may still complete.

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::run::{LedgerCallState, RunStatus, Stage, StageId, WorkflowRun};
use crate::attestation::{AttestationClient, HttpVerifier};
use crate::certificate::{CertificateRenderer, RenderInput};
use crate::config::{ConfigError, PipelineConfig};
use crate::encryption::{EncryptionGateway, HttpThresholdClient, ThresholdClient};
use crate::error::PipelineError;
use crate::ledger::{HttpLedgerQuery, LedgerClient, LedgerTransaction, WalletSigner};
use crate::models::{Certificate, SealInfo, TransactionDigest};
use crate::storage::{HttpBlobTransport, StorageGateway};

/// Per-run options supplied by the caller.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Seal the media payload before upload.
    pub encrypt: bool,
    /// Key-holder threshold for sealed runs.
    pub threshold: u8,
    /// Retention epochs for uploaded blobs.
    pub epochs: u64,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            encrypt: false,
            threshold: 2,
            epochs: 5,
        }
    }
}

impl PipelineOptions {
    /// Defaults with the retention period drawn from loaded configuration.
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            epochs: config.default_epochs,
            ..Self::default()
        }
    }
}

/// Receives stage and run transitions as they happen.
pub trait StageObserver: Send + Sync {
    fn on_stage_update(&self, run_id: Uuid, stage: &Stage);
    fn on_run_update(&self, run_id: Uuid, status: RunStatus);
}

/// Observer that discards all updates.
pub struct NullObserver;

impl StageObserver for NullObserver {
    fn on_stage_update(&self, _run_id: Uuid, _stage: &Stage) {}
    fn on_run_update(&self, _run_id: Uuid, _status: RunStatus) {}
}

/// The collaborator bundle one orchestrator works against.
///
/// Passed in explicitly — there are no singletons — so hosts and tests
/// compose their own.
pub struct PipelineContext {
    pub storage: Arc<StorageGateway>,
    pub encryption: Arc<EncryptionGateway>,
    pub attestation: Arc<AttestationClient>,
    pub ledger: Arc<LedgerClient>,
    pub renderer: CertificateRenderer,
}

impl PipelineContext {
    /// Wire the production collaborators from loaded configuration and an
    /// external signer.
    pub fn from_config(
        config: &PipelineConfig,
        signer: Arc<dyn WalletSigner>,
    ) -> Result<Self, ConfigError> {
        // Transport timeout is a backstop; the gateway bounds each attempt.
        let transport_timeout = config.attempt_timeout + Duration::from_secs(5);
        let transport = HttpBlobTransport::new(transport_timeout)
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
        let storage = Arc::new(StorageGateway::from_config(config, Arc::new(transport)));

        let threshold_client: Option<Arc<dyn ThresholdClient>> = match &config.seal_service_url {
            Some(endpoint) => Some(Arc::new(
                HttpThresholdClient::new(endpoint.clone(), config.attempt_timeout)
                    .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?,
            )),
            None => None,
        };
        let encryption = Arc::new(EncryptionGateway::new(
            threshold_client,
            config.contract_package_id.clone(),
        ));

        let query = HttpLedgerQuery::new(config.ledger_rpc_url.clone(), config.attempt_timeout)
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
        let ledger = Arc::new(LedgerClient::new(
            signer,
            Arc::new(query),
            config.contract_package_id.clone(),
        ));

        let verifier =
            HttpVerifier::new(config.attestation_endpoint.clone(), config.attempt_timeout)
                .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
        let attestation = Arc::new(AttestationClient::new(
            Arc::new(verifier),
            ledger.clone(),
            config.prover_public_key_hex.as_deref(),
            config.expected_code_hash_hex.clone(),
        )?);

        Ok(Self {
            storage,
            encryption,
            attestation,
            ledger,
            renderer: CertificateRenderer::new(),
        })
    }
}

/// Drives one [`WorkflowRun`] to completion or failure.
pub struct StageOrchestrator {
    ctx: PipelineContext,
    observer: Arc<dyn StageObserver>,
    cancel: CancellationToken,
    media: Vec<u8>,
    manifest: Vec<u8>,
    options: PipelineOptions,
    run: WorkflowRun,
}

impl StageOrchestrator {
    /// Create an orchestrator for one submission. Content digests are
    /// computed immediately; everything else waits for [`Self::start`].
    pub fn new(
        ctx: PipelineContext,
        observer: Arc<dyn StageObserver>,
        media: Vec<u8>,
        manifest: Vec<u8>,
        options: PipelineOptions,
    ) -> Self {
        let mut run = WorkflowRun::new(options.encrypt);
        run.artifacts.media_sha256_hex = Some(hex::encode(Sha256::digest(&media)));
        run.artifacts.manifest_sha256_hex = Some(hex::encode(Sha256::digest(&manifest)));

        Self {
            ctx,
            observer,
            cancel: CancellationToken::new(),
            media,
            manifest,
            options,
            run,
        }
    }

    /// The run record, for inspection at any point.
    pub fn run(&self) -> &WorkflowRun {
        &self.run
    }

    /// Stop the pipeline from advancing to further stages. In-flight
    /// requests are not force-cancelled.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    /// Handle for aborting from outside the running pipeline.
    ///
    /// `start()` and `retry()` hold the orchestrator exclusively for the
    /// whole run, so a caller that wants to abort mid-run clones this token
    /// beforehand and cancels it from wherever the abort originates.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute the pipeline from the beginning.
    pub async fn start(&mut self) -> RunStatus {
        info!(run_id = %self.run.id, encrypt = self.options.encrypt, "pipeline starting");
        self.observer.on_run_update(self.run.id, RunStatus::Running);
        self.execute().await
    }

    /// Resume from the first failed stage.
    ///
    /// That stage and all later ones reset to pending; stages before it keep
    /// their completed status and their artifacts — nothing already uploaded,
    /// signed or attested is redone.
    pub async fn retry(&mut self) -> RunStatus {
        let Some(first_failed) = self.run.first_failed() else {
            return self.run.status;
        };

        info!(run_id = %self.run.id, stage = %self.run.stages[first_failed].id, "retrying from failed stage");
        self.run.reset_from(first_failed);
        for stage in self.run.stages[first_failed..].to_vec() {
            self.observer.on_stage_update(self.run.id, &stage);
        }
        self.observer.on_run_update(self.run.id, RunStatus::Running);
        self.execute().await
    }

    async fn execute(&mut self) -> RunStatus {
        while self.run.cursor < self.run.stages.len() {
            if self.cancel.is_cancelled() {
                warn!(run_id = %self.run.id, "pipeline aborted by user");
                self.run.status = RunStatus::Failed;
                self.observer.on_run_update(self.run.id, RunStatus::Failed);
                return RunStatus::Failed;
            }

            let index = self.run.cursor;
            let stage_id = self.run.stages[index].id;

            self.run.begin_stage(index);
            self.notify_stage(index);

            match self.execute_stage(stage_id).await {
                Ok(produced) => {
                    info!(run_id = %self.run.id, stage = %stage_id, "stage completed");
                    self.run.complete_stage(index, produced);
                    self.notify_stage(index);
                    self.run.cursor += 1;
                }
                Err(e) => {
                    warn!(run_id = %self.run.id, stage = %stage_id, error = %e, "stage failed");
                    self.run.fail_stage(index, &e);
                    self.notify_stage(index);
                    self.observer.on_run_update(self.run.id, RunStatus::Failed);
                    return RunStatus::Failed;
                }
            }
        }

        self.run.status = RunStatus::Completed;
        info!(run_id = %self.run.id, "pipeline completed");
        self.observer.on_run_update(self.run.id, RunStatus::Completed);
        RunStatus::Completed
    }

    fn notify_stage(&self, index: usize) {
        self.observer
            .on_stage_update(self.run.id, &self.run.stages[index]);
    }

    async fn execute_stage(
        &mut self,
        stage_id: StageId,
    ) -> Result<Vec<&'static str>, PipelineError> {
        match stage_id {
            StageId::Seal => self.stage_seal().await,
            StageId::Upload => self.stage_upload().await,
            StageId::RequestVerification => self.stage_request_verification().await,
            StageId::Attestation => self.stage_attestation().await,
            StageId::Certificate => self.stage_certificate().await,
            StageId::Minting => self.stage_minting().await,
        }
    }

    // =========================================================================
    // Stages
    // =========================================================================

    async fn stage_seal(&mut self) -> Result<Vec<&'static str>, PipelineError> {
        let seal_id = self.run.id.to_string();
        let sealed = self
            .ctx
            .encryption
            .encrypt(&self.media, self.options.threshold, &seal_id)
            .await?;

        // A payload that cannot be reversed must never reach minting.
        self.ctx
            .encryption
            .validate_round_trip(&sealed, &self.media)
            .await?;

        self.run.artifacts.sealed = Some(sealed);
        Ok(vec!["sealed_payload"])
    }

    async fn stage_upload(&mut self) -> Result<Vec<&'static str>, PipelineError> {
        self.ensure_media_blob().await?;
        self.ensure_manifest_blob().await?;
        Ok(vec!["media_blob_id", "manifest_blob_id"])
    }

    async fn stage_request_verification(&mut self) -> Result<Vec<&'static str>, PipelineError> {
        let media_blob = self.ensure_media_blob().await?;
        let manifest_blob = self.ensure_manifest_blob().await?;

        let tx = LedgerTransaction::RequestVerification {
            media_id_bytes: media_blob.0.clone().into_bytes(),
            manifest_id_bytes: manifest_blob.0.clone().into_bytes(),
        };

        let digest = self
            .submit_gated(tx, |artifacts| &mut artifacts.verification_call)
            .await?;
        info!(run_id = %self.run.id, digest = %digest, "verification request recorded");
        Ok(vec!["verification_digest"])
    }

    async fn stage_attestation(&mut self) -> Result<Vec<&'static str>, PipelineError> {
        let media_blob = self.ensure_media_blob().await?;
        let manifest_blob = self.ensure_manifest_blob().await?;
        let verification_digest = self
            .run
            .artifacts
            .verification_digest()
            .cloned()
            .ok_or(PipelineError::MissingArtifact("verification_digest"))?;

        let record = self
            .ctx
            .attestation
            .attest(&media_blob, &manifest_blob, &verification_digest)
            .await?;

        self.run.artifacts.attestation = Some(record);
        Ok(vec!["attestation"])
    }

    async fn stage_certificate(&mut self) -> Result<Vec<&'static str>, PipelineError> {
        let media_blob = self.ensure_media_blob().await?;
        let manifest_blob = self.ensure_manifest_blob().await?;
        let attestation = self
            .run
            .artifacts
            .attestation
            .clone()
            .ok_or(PipelineError::MissingArtifact("attestation"))?;
        let verification_digest = self
            .run
            .artifacts
            .verification_digest()
            .cloned()
            .ok_or(PipelineError::MissingArtifact("verification_digest"))?;

        // Fixed on first render so a retried mint sees identical bytes.
        let issued_at = *self.run.artifacts.issued_at.get_or_insert_with(chrono::Utc::now);

        let owner = self.ctx.ledger.owner();
        let input = RenderInput {
            owner: &owner,
            media_blob_id: &media_blob,
            manifest_blob_id: &manifest_blob,
            attestation_hash: &attestation.content_hash_hex,
            issued_at,
        };

        let badge_bytes = self.ctx.renderer.render_badge(&input);
        let certificate_bytes = self.ctx.renderer.render_certificate(&input);

        let badge_blob_id = self.ctx.storage.put(&badge_bytes, self.options.epochs).await?;
        let certificate_blob_id = self
            .ctx
            .storage
            .put(&certificate_bytes, self.options.epochs)
            .await?;

        let seal = self.run.artifacts.sealed.as_ref().map(|sealed| SealInfo {
            seal_id: sealed.seal_id.clone(),
            threshold: sealed.threshold,
            degraded: sealed.access_policy.is_degraded(),
        });

        self.run.artifacts.badge_blob_id = Some(badge_blob_id.clone());
        self.run.artifacts.certificate_blob_id = Some(certificate_blob_id.clone());
        self.run.artifacts.certificate = Some(Certificate {
            owner,
            media_blob_id: media_blob,
            manifest_blob_id: manifest_blob,
            verification_digest,
            attestation_hash: attestation.content_hash_hex,
            seal,
            badge_blob_id,
            certificate_blob_id,
            badge_mint_digest: None,
            certificate_mint_digest: None,
            issued_at,
        });

        Ok(vec!["badge_blob_id", "certificate_blob_id", "certificate"])
    }

    async fn stage_minting(&mut self) -> Result<Vec<&'static str>, PipelineError> {
        let certificate = self
            .run
            .artifacts
            .certificate
            .clone()
            .ok_or(PipelineError::MissingArtifact("certificate"))?;
        let badge_blob = self.ensure_badge_blob().await?;
        let certificate_blob = certificate.certificate_blob_id.clone();

        let attestation = self
            .run
            .artifacts
            .attestation
            .clone()
            .ok_or(PipelineError::MissingArtifact("attestation"))?;
        let metadata = self.mint_metadata(&certificate, &attestation);

        let badge_digest = self
            .mint_gated(
                LedgerTransaction::MintProvenanceNft {
                    owner: certificate.owner.clone(),
                    name: "Provenance Badge".to_string(),
                    url: self
                        .ctx
                        .storage
                        .read_url(&badge_blob)
                        .unwrap_or_else(|| badge_blob.0.clone()),
                    metadata_json: metadata.clone(),
                },
                |artifacts| &mut artifacts.badge_mint_call,
            )
            .await?;

        let certificate_digest = self
            .mint_gated(
                LedgerTransaction::MintCertificateNft {
                    owner: certificate.owner.clone(),
                    name: "Certificate of Authenticity".to_string(),
                    url: self
                        .ctx
                        .storage
                        .read_url(&certificate_blob)
                        .unwrap_or_else(|| certificate_blob.0.clone()),
                    metadata_json: metadata,
                },
                |artifacts| &mut artifacts.certificate_mint_call,
            )
            .await?;

        if let Some(certificate) = self.run.artifacts.certificate.as_mut() {
            certificate.badge_mint_digest = Some(badge_digest);
            certificate.certificate_mint_digest = Some(certificate_digest);
        }

        Ok(vec!["badge_mint_digest", "certificate_mint_digest"])
    }

    // =========================================================================
    // Ensure Helpers
    // =========================================================================

    /// Media blob id, re-uploading the payload if the artifact is missing.
    ///
    /// Content addressing makes the re-upload idempotent: identical bytes
    /// resolve to the same id.
    async fn ensure_media_blob(&mut self) -> Result<crate::models::BlobId, PipelineError> {
        if let Some(blob_id) = &self.run.artifacts.media_blob_id {
            return Ok(blob_id.clone());
        }

        let bytes: &[u8] = match &self.run.artifacts.sealed {
            Some(sealed) => &sealed.ciphertext,
            None => &self.media,
        };
        let bytes = bytes.to_vec();
        let blob_id = self.ctx.storage.put(&bytes, self.options.epochs).await?;
        self.run.artifacts.media_blob_id = Some(blob_id.clone());
        Ok(blob_id)
    }

    /// Manifest blob id, re-uploading if missing. The manifest is always
    /// stored in the clear so the verifier can re-fetch it.
    async fn ensure_manifest_blob(&mut self) -> Result<crate::models::BlobId, PipelineError> {
        if let Some(blob_id) = &self.run.artifacts.manifest_blob_id {
            return Ok(blob_id.clone());
        }

        let manifest = self.manifest.clone();
        let blob_id = self.ctx.storage.put(&manifest, self.options.epochs).await?;
        self.run.artifacts.manifest_blob_id = Some(blob_id.clone());
        Ok(blob_id)
    }

    /// Badge blob id, re-rendering and re-uploading if missing. The stored
    /// issuance timestamp keeps the re-render byte-identical.
    async fn ensure_badge_blob(&mut self) -> Result<crate::models::BlobId, PipelineError> {
        if let Some(blob_id) = &self.run.artifacts.badge_blob_id {
            return Ok(blob_id.clone());
        }

        let media_blob = self.ensure_media_blob().await?;
        let manifest_blob = self.ensure_manifest_blob().await?;
        let attestation = self
            .run
            .artifacts
            .attestation
            .clone()
            .ok_or(PipelineError::MissingArtifact("attestation"))?;
        let issued_at = self
            .run
            .artifacts
            .issued_at
            .ok_or(PipelineError::MissingArtifact("issued_at"))?;

        let owner = self.ctx.ledger.owner();
        let bytes = self.ctx.renderer.render_badge(&RenderInput {
            owner: &owner,
            media_blob_id: &media_blob,
            manifest_blob_id: &manifest_blob,
            attestation_hash: &attestation.content_hash_hex,
            issued_at,
        });

        let blob_id = self.ctx.storage.put(&bytes, self.options.epochs).await?;
        self.run.artifacts.badge_blob_id = Some(blob_id.clone());
        Ok(blob_id)
    }

    // =========================================================================
    // Ledger Gating
    // =========================================================================

    /// Submit a ledger transaction through its retry gate.
    ///
    /// `Confirmed` short-circuits with the stored digest. `Unconfirmed`
    /// refuses to resubmit: the prior attempt may have landed and duplicate
    /// on-chain records are not recoverable.
    async fn submit_gated(
        &mut self,
        tx: LedgerTransaction,
        gate: impl Fn(&mut super::run::RunArtifacts) -> &mut LedgerCallState,
    ) -> Result<TransactionDigest, PipelineError> {
        if let Some(digest) = gate(&mut self.run.artifacts).digest() {
            info!(run_id = %self.run.id, digest = %digest, call = tx.call_name(), "ledger call already confirmed, skipping resubmission");
            return Ok(digest.clone());
        }
        if !gate(&mut self.run.artifacts).may_submit() {
            return Err(PipelineError::TransactionNoDigest);
        }

        match self.ctx.ledger.submit(&tx).await {
            Ok(digest) => {
                *gate(&mut self.run.artifacts) = LedgerCallState::Confirmed {
                    digest: digest.clone(),
                };
                Ok(digest)
            }
            Err(PipelineError::TransactionNoDigest) => {
                // Executed but unextractable: poison the gate.
                *gate(&mut self.run.artifacts) = LedgerCallState::Unconfirmed;
                Err(PipelineError::TransactionNoDigest)
            }
            Err(e) => Err(e),
        }
    }

    /// Like [`Self::submit_gated`], but failures surface as `MintingFailed`:
    /// blobs and attestation already produced stay valid and retrievable.
    async fn mint_gated(
        &mut self,
        tx: LedgerTransaction,
        gate: impl Fn(&mut super::run::RunArtifacts) -> &mut LedgerCallState,
    ) -> Result<TransactionDigest, PipelineError> {
        self.submit_gated(tx, gate)
            .await
            .map_err(|e| PipelineError::MintingFailed(e.to_string()))
    }

    fn mint_metadata(
        &self,
        certificate: &Certificate,
        attestation: &crate::models::AttestationRecord,
    ) -> String {
        serde_json::json!({
            "mediaBlobId": certificate.media_blob_id.0,
            "manifestBlobId": certificate.manifest_blob_id.0,
            "verificationDigest": certificate.verification_digest.0,
            "contentHash": attestation.content_hash_hex,
            "manifestHash": attestation.manifest_hash_hex,
            "codeHash": attestation.code_hash_hex,
            "proverId": attestation.prover_id,
            "sealId": certificate.seal.as_ref().map(|s| s.seal_id.clone()),
            "degradedSeal": certificate.seal.as_ref().map(|s| s.degraded),
            "issuedAt": certificate.issued_at.to_rfc3339(),
        })
        .to_string()
    }

    #[cfg(test)]
    pub(crate) fn artifacts_mut(&mut self) -> &mut super::run::RunArtifacts {
        &mut self.run.artifacts
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::attestation::{VerifierApi, VerifierError, VerifierResponse};
    use crate::encryption::EncryptionGateway;
    use crate::ledger::{
        LedgerQuery, LedgerQueryError, SignedExecution, SignerError,
    };
    use crate::models::{BlobId, OwnerAddress};
    use crate::storage::{BlobTransport, PutOutcome, TransportError};
    use crate::workflow::run::StageStatus;

    // =========================================================================
    // Fakes
    // =========================================================================

    /// Content-addressed in-memory storage: blob id is the SHA-256 of the
    /// bytes, mirroring the network's deterministic addressing.
    #[derive(Default)]
    struct MemoryTransport {
        blobs: Mutex<HashMap<String, Vec<u8>>>,
        put_count: Mutex<usize>,
    }

    impl MemoryTransport {
        fn put_count(&self) -> usize {
            *self.put_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl BlobTransport for MemoryTransport {
        async fn put_blob(
            &self,
            _endpoint: &str,
            bytes: &[u8],
            _epochs: u64,
        ) -> Result<PutOutcome, TransportError> {
            *self.put_count.lock().unwrap() += 1;
            let blob_id = hex::encode(Sha256::digest(bytes));
            let already = self
                .blobs
                .lock()
                .unwrap()
                .insert(blob_id.clone(), bytes.to_vec())
                .is_some();
            Ok(PutOutcome {
                blob_id: BlobId(blob_id),
                already_certified: already,
            })
        }

        async fn get_blob(
            &self,
            _endpoint: &str,
            blob_id: &BlobId,
        ) -> Result<Vec<u8>, TransportError> {
            self.blobs
                .lock()
                .unwrap()
                .get(&blob_id.0)
                .cloned()
                .ok_or(TransportError::Status { status: 404 })
        }

        async fn relay_put(
            &self,
            _relay: &str,
            _bytes: &[u8],
            _epochs: u64,
        ) -> Result<PutOutcome, TransportError> {
            Err(TransportError::Status { status: 502 })
        }
    }

    /// Signer that confirms every call with a sequential digest, with
    /// per-call-name failure scripting.
    #[derive(Default)]
    struct ScriptedSigner {
        fail_calls: Mutex<HashMap<&'static str, SignerFailure>>,
        submissions: Mutex<Vec<&'static str>>,
    }

    #[derive(Clone, Copy)]
    enum SignerFailure {
        Reject,
        NoDigest,
    }

    impl ScriptedSigner {
        fn submissions_of(&self, call: &'static str) -> usize {
            self.submissions
                .lock()
                .unwrap()
                .iter()
                .filter(|c| **c == call)
                .count()
        }
    }

    #[async_trait]
    impl WalletSigner for ScriptedSigner {
        async fn sign_and_execute(
            &self,
            _package_id: &str,
            tx: &LedgerTransaction,
        ) -> Result<SignedExecution, SignerError> {
            let call = tx.call_name();
            self.submissions.lock().unwrap().push(call);

            match self.fail_calls.lock().unwrap().get(call) {
                Some(SignerFailure::Reject) => Err(SignerError::Rejected("scripted".into())),
                Some(SignerFailure::NoDigest) => Ok(SignedExecution {
                    digest: None,
                    effects: serde_json::json!({}),
                }),
                None => {
                    let count = self.submissions.lock().unwrap().len();
                    Ok(SignedExecution {
                        digest: Some(format!("digest-{call}-{count}")),
                        effects: serde_json::json!({}),
                    })
                }
            }
        }

        fn address(&self) -> OwnerAddress {
            OwnerAddress("0xowner".into())
        }
    }

    struct AlwaysExists;

    #[async_trait]
    impl LedgerQuery for AlwaysExists {
        async fn transaction_exists(
            &self,
            _digest: &TransactionDigest,
        ) -> Result<bool, LedgerQueryError> {
            Ok(true)
        }
    }

    /// Verifier with an optional number of leading failures.
    struct ScriptedVerifier {
        response: VerifierResponse,
        failures_remaining: Mutex<usize>,
    }

    impl ScriptedVerifier {
        fn ok() -> Self {
            Self::failing_first(0)
        }

        fn failing_first(failures: usize) -> Self {
            Self {
                response: VerifierResponse {
                    content_hash_hex: "11".repeat(32),
                    manifest_hash_hex: "22".repeat(32),
                    code_hash_hex: "33".repeat(32),
                    signature_hex: "44".repeat(64),
                    prover_tee_id: "enclave-1".into(),
                },
                failures_remaining: Mutex::new(failures),
            }
        }

        fn short_signature() -> Self {
            let mut verifier = Self::ok();
            verifier.response.signature_hex = "ab".repeat(15); // 30 hex chars
            verifier
        }
    }

    #[async_trait]
    impl VerifierApi for ScriptedVerifier {
        async fn attest(
            &self,
            _media: &BlobId,
            _manifest: &BlobId,
        ) -> Result<VerifierResponse, VerifierError> {
            let mut failures = self.failures_remaining.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(VerifierError::Request("connection refused".into()));
            }
            Ok(self.response.clone())
        }
    }

    /// Observer recording every (stage, status) transition in order.
    #[derive(Default)]
    struct RecordingObserver {
        stage_updates: Mutex<Vec<(StageId, StageStatus)>>,
    }

    impl RecordingObserver {
        fn updates(&self) -> Vec<(StageId, StageStatus)> {
            self.stage_updates.lock().unwrap().clone()
        }
    }

    impl StageObserver for RecordingObserver {
        fn on_stage_update(&self, _run_id: Uuid, stage: &Stage) {
            self.stage_updates
                .lock()
                .unwrap()
                .push((stage.id, stage.status));
        }

        fn on_run_update(&self, _run_id: Uuid, _status: RunStatus) {}
    }

    struct Harness {
        transport: Arc<MemoryTransport>,
        signer: Arc<ScriptedSigner>,
        observer: Arc<RecordingObserver>,
    }

    /// Cancels a captured token the moment the verifier is invoked, standing
    /// in for a user abort while the attestation request is in flight.
    struct AbortingVerifier {
        inner: ScriptedVerifier,
        token: Arc<Mutex<Option<CancellationToken>>>,
    }

    #[async_trait]
    impl VerifierApi for AbortingVerifier {
        async fn attest(
            &self,
            media: &BlobId,
            manifest: &BlobId,
        ) -> Result<VerifierResponse, VerifierError> {
            if let Some(token) = self.token.lock().unwrap().as_ref() {
                token.cancel();
            }
            self.inner.attest(media, manifest).await
        }
    }

    fn build<V: VerifierApi + 'static>(
        verifier: V,
        signer: ScriptedSigner,
        options: PipelineOptions,
    ) -> (StageOrchestrator, Harness) {
        let transport = Arc::new(MemoryTransport::default());
        let signer = Arc::new(signer);
        let observer = Arc::new(RecordingObserver::default());

        let storage = Arc::new(StorageGateway::new(
            transport.clone(),
            vec!["pub".into()],
            vec!["agg".into()],
            None,
            Duration::from_secs(5),
        ));
        let ledger = Arc::new(LedgerClient::new(
            signer.clone(),
            Arc::new(AlwaysExists),
            "pkg".into(),
        ));
        let attestation = Arc::new(
            AttestationClient::new(Arc::new(verifier), ledger.clone(), None, None).unwrap(),
        );
        let ctx = PipelineContext {
            storage,
            encryption: Arc::new(EncryptionGateway::new(None, "pkg".into())),
            attestation,
            ledger,
            renderer: CertificateRenderer::new(),
        };

        let orchestrator = StageOrchestrator::new(
            ctx,
            observer.clone(),
            b"media payload bytes".to_vec(),
            b"manifest".to_vec(),
            options,
        );

        (
            orchestrator,
            Harness {
                transport,
                signer,
                observer,
            },
        )
    }

    fn stage_status(orchestrator: &StageOrchestrator, id: StageId) -> StageStatus {
        orchestrator
            .run()
            .stages
            .iter()
            .find(|stage| stage.id == id)
            .unwrap()
            .status
    }

    // =========================================================================
    // Tests
    // =========================================================================

    #[tokio::test]
    async fn unencrypted_run_completes_all_stages() {
        let (mut orchestrator, harness) = build(
            ScriptedVerifier::ok(),
            ScriptedSigner::default(),
            PipelineOptions::default(),
        );

        let status = orchestrator.start().await;
        assert_eq!(status, RunStatus::Completed);

        let run = orchestrator.run();
        assert!(run
            .stages
            .iter()
            .all(|stage| stage.status == StageStatus::Completed));

        let certificate = run.artifacts.certificate.as_ref().unwrap();
        assert!(certificate.badge_mint_digest.is_some());
        assert!(certificate.certificate_mint_digest.is_some());
        assert_eq!(certificate.owner, OwnerAddress("0xowner".into()));

        // Three submissions: verification request and two mints.
        assert_eq!(harness.signer.submissions_of("request_verification"), 1);
        assert_eq!(harness.signer.submissions_of("mint_provenance_nft"), 1);
        assert_eq!(harness.signer.submissions_of("mint_certificate_nft"), 1);
    }

    #[tokio::test]
    async fn stage_statuses_only_move_forward() {
        let (mut orchestrator, harness) = build(
            ScriptedVerifier::ok(),
            ScriptedSigner::default(),
            PipelineOptions::default(),
        );
        orchestrator.start().await;

        // Per stage: Processing then Completed, never a step back.
        let mut seen: HashMap<StageId, StageStatus> = HashMap::new();
        for (id, status) in harness.observer.updates() {
            match seen.get(&id) {
                None => assert_eq!(status, StageStatus::Processing),
                Some(StageStatus::Processing) => assert_eq!(status, StageStatus::Completed),
                Some(previous) => panic!("stage {id} moved on from terminal {previous:?}"),
            }
            seen.insert(id, status);
        }
    }

    #[tokio::test]
    async fn encrypted_run_uploads_ciphertext_and_records_policy() {
        let (mut orchestrator, harness) = build(
            ScriptedVerifier::ok(),
            ScriptedSigner::default(),
            PipelineOptions {
                encrypt: true,
                ..PipelineOptions::default()
            },
        );

        let status = orchestrator.start().await;
        assert_eq!(status, RunStatus::Completed);

        let artifacts = &orchestrator.run().artifacts;
        let sealed = artifacts.sealed.as_ref().unwrap();
        // No threshold service in the harness: the degraded mode is recorded.
        assert!(sealed.access_policy.is_degraded());

        // The stored media blob is the ciphertext, not the plaintext.
        let media_blob = artifacts.media_blob_id.as_ref().unwrap();
        let stored = harness
            .transport
            .blobs
            .lock()
            .unwrap()
            .get(&media_blob.0)
            .cloned()
            .unwrap();
        assert_ne!(stored, b"media payload bytes");
        assert_eq!(stored, sealed.ciphertext);
    }

    #[tokio::test]
    async fn identical_bytes_yield_identical_blob_ids() {
        let (mut first, _) = build(
            ScriptedVerifier::ok(),
            ScriptedSigner::default(),
            PipelineOptions::default(),
        );
        let (mut second, _) = build(
            ScriptedVerifier::ok(),
            ScriptedSigner::default(),
            PipelineOptions::default(),
        );

        first.start().await;
        second.start().await;

        assert_eq!(
            first.run().artifacts.media_blob_id,
            second.run().artifacts.media_blob_id
        );
    }

    #[tokio::test]
    async fn malformed_attestation_halts_before_later_stages() {
        let (mut orchestrator, harness) = build(
            ScriptedVerifier::short_signature(),
            ScriptedSigner::default(),
            PipelineOptions::default(),
        );

        let status = orchestrator.start().await;
        assert_eq!(status, RunStatus::Failed);

        assert_eq!(
            stage_status(&orchestrator, StageId::Attestation),
            StageStatus::Failed
        );
        assert_eq!(
            stage_status(&orchestrator, StageId::Certificate),
            StageStatus::Pending
        );
        assert_eq!(
            stage_status(&orchestrator, StageId::Minting),
            StageStatus::Pending
        );

        let failed = &orchestrator.run().stages[orchestrator.run().first_failed().unwrap()];
        assert_eq!(
            failed.error_code.as_deref(),
            Some("invalid_attestation_format")
        );

        // No mint was ever attempted.
        assert_eq!(harness.signer.submissions_of("mint_provenance_nft"), 0);
    }

    #[tokio::test]
    async fn retry_resumes_from_failed_stage_without_redoing_work() {
        let (mut orchestrator, harness) = build(
            ScriptedVerifier::failing_first(1),
            ScriptedSigner::default(),
            PipelineOptions::default(),
        );

        let status = orchestrator.start().await;
        assert_eq!(status, RunStatus::Failed);
        assert_eq!(
            stage_status(&orchestrator, StageId::Attestation),
            StageStatus::Failed
        );

        let media_blob_before = orchestrator.run().artifacts.media_blob_id.clone().unwrap();
        let digest_before = orchestrator
            .run()
            .artifacts
            .verification_digest()
            .cloned()
            .unwrap();
        let puts_before = harness.transport.put_count();

        let status = orchestrator.retry().await;
        assert_eq!(status, RunStatus::Completed);

        // Artifacts before the failed stage are bit-identical.
        assert_eq!(
            orchestrator.run().artifacts.media_blob_id.as_ref(),
            Some(&media_blob_before)
        );
        assert_eq!(
            orchestrator.run().artifacts.verification_digest(),
            Some(&digest_before)
        );

        // No re-upload of media/manifest; only the two render artifacts.
        assert_eq!(harness.transport.put_count(), puts_before + 2);
        // The confirmed verification request was not resubmitted.
        assert_eq!(harness.signer.submissions_of("request_verification"), 1);
    }

    #[tokio::test]
    async fn retry_synthesizes_missing_prerequisite_artifacts() {
        let (mut orchestrator, harness) = build(
            ScriptedVerifier::failing_first(1),
            ScriptedSigner::default(),
            PipelineOptions::default(),
        );

        orchestrator.start().await;

        // Simulate a crash that lost the captured blob id.
        orchestrator.artifacts_mut().media_blob_id = None;
        let puts_before = harness.transport.put_count();

        let status = orchestrator.retry().await;
        assert_eq!(status, RunStatus::Completed);

        // The ensure helper re-uploaded the media payload (idempotent put)
        // rather than failing the run.
        assert!(harness.transport.put_count() > puts_before + 2);
        assert!(orchestrator.run().artifacts.media_blob_id.is_some());
    }

    #[tokio::test]
    async fn mint_failure_keeps_artifact_blobs_retrievable() {
        let signer = ScriptedSigner::default();
        signer
            .fail_calls
            .lock()
            .unwrap()
            .insert("mint_provenance_nft", SignerFailure::Reject);

        let (mut orchestrator, harness) =
            build(ScriptedVerifier::ok(), signer, PipelineOptions::default());

        let status = orchestrator.start().await;
        assert_eq!(status, RunStatus::Failed);
        assert_eq!(
            stage_status(&orchestrator, StageId::Minting),
            StageStatus::Failed
        );
        let failed = &orchestrator.run().stages[orchestrator.run().first_failed().unwrap()];
        assert_eq!(failed.error_code.as_deref(), Some("minting_failed"));

        // Blobs uploaded before the mint stay retrievable.
        let storage = StorageGateway::new(
            harness.transport.clone(),
            vec!["pub".into()],
            vec!["agg".into()],
            None,
            Duration::from_secs(5),
        );
        let badge_blob = orchestrator.run().artifacts.badge_blob_id.clone().unwrap();
        let certificate_blob = orchestrator
            .run()
            .artifacts
            .certificate_blob_id
            .clone()
            .unwrap();
        assert!(storage.get(&badge_blob).await.is_ok());
        assert!(storage.get(&certificate_blob).await.is_ok());
    }

    #[tokio::test]
    async fn unconfirmed_ledger_call_is_never_resubmitted() {
        let signer = ScriptedSigner::default();
        signer
            .fail_calls
            .lock()
            .unwrap()
            .insert("mint_provenance_nft", SignerFailure::NoDigest);

        let (mut orchestrator, harness) =
            build(ScriptedVerifier::ok(), signer, PipelineOptions::default());

        let status = orchestrator.start().await;
        assert_eq!(status, RunStatus::Failed);
        assert_eq!(harness.signer.submissions_of("mint_provenance_nft"), 1);

        // Even with the signer healthy again, the poisoned gate blocks a
        // duplicate submission.
        harness.signer.fail_calls.lock().unwrap().clear();
        let status = orchestrator.retry().await;
        assert_eq!(status, RunStatus::Failed);
        assert_eq!(harness.signer.submissions_of("mint_provenance_nft"), 1);
    }

    #[tokio::test]
    async fn rejected_ledger_call_may_be_retried() {
        let signer = ScriptedSigner::default();
        signer
            .fail_calls
            .lock()
            .unwrap()
            .insert("request_verification", SignerFailure::Reject);

        let (mut orchestrator, harness) =
            build(ScriptedVerifier::ok(), signer, PipelineOptions::default());

        let status = orchestrator.start().await;
        assert_eq!(status, RunStatus::Failed);

        harness.signer.fail_calls.lock().unwrap().clear();
        let status = orchestrator.retry().await;
        assert_eq!(status, RunStatus::Completed);
        // Rejection confirmed no digest was produced, so resubmission is safe.
        assert_eq!(harness.signer.submissions_of("request_verification"), 2);
    }

    #[tokio::test]
    async fn abort_stops_before_any_stage_runs() {
        let (mut orchestrator, harness) = build(
            ScriptedVerifier::ok(),
            ScriptedSigner::default(),
            PipelineOptions::default(),
        );

        orchestrator.abort();
        let status = orchestrator.start().await;
        assert_eq!(status, RunStatus::Failed);

        assert!(orchestrator
            .run()
            .stages
            .iter()
            .all(|stage| stage.status == StageStatus::Pending));
        assert_eq!(harness.transport.put_count(), 0);
    }

    #[tokio::test]
    async fn abort_mid_run_stops_before_the_next_stage() {
        let token_slot = Arc::new(Mutex::new(None));
        let verifier = AbortingVerifier {
            inner: ScriptedVerifier::ok(),
            token: token_slot.clone(),
        };
        let (mut orchestrator, harness) =
            build(verifier, ScriptedSigner::default(), PipelineOptions::default());
        *token_slot.lock().unwrap() = Some(orchestrator.cancel_token());

        let status = orchestrator.start().await;
        assert_eq!(status, RunStatus::Failed);

        // The in-flight attestation still completed; nothing after it ran.
        assert_eq!(
            stage_status(&orchestrator, StageId::Attestation),
            StageStatus::Completed
        );
        assert_eq!(
            stage_status(&orchestrator, StageId::Certificate),
            StageStatus::Pending
        );
        assert_eq!(
            stage_status(&orchestrator, StageId::Minting),
            StageStatus::Pending
        );
        assert_eq!(harness.signer.submissions_of("mint_provenance_nft"), 0);
    }

    #[tokio::test]
    async fn retry_on_a_healthy_run_is_a_no_op() {
        let (mut orchestrator, _) = build(
            ScriptedVerifier::ok(),
            ScriptedSigner::default(),
            PipelineOptions::default(),
        );

        let status = orchestrator.start().await;
        assert_eq!(status, RunStatus::Completed);
        assert_eq!(orchestrator.retry().await, RunStatus::Completed);
    }
}
