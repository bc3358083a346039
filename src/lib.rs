// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Provenance Pipeline - Media Authenticity Certification Library
//!
//! This crate carries a media file and its manifest through sealing,
//! decentralized blob storage, TEE attestation, and on-chain certificate
//! minting, as a resumable staged workflow.
//!
//! ## Modules
//!
//! - `workflow` - Stage orchestrator and run records
//! - `storage` - Blob storage gateway with sequential endpoint failover
//! - `encryption` - Threshold encryption with local fallback
//! - `attestation` - TEE verifier client and response validation
//! - `ledger` - Contract calls through an external signer
//! - `certificate` - Deterministic badge/certificate rendering

pub mod attestation;
pub mod certificate;
pub mod config;
pub mod encryption;
pub mod error;
pub mod ledger;
pub mod models;
pub mod storage;
pub mod telemetry;
pub mod workflow;

pub use config::PipelineConfig;
pub use error::PipelineError;
pub use workflow::{
    PipelineContext, PipelineOptions, RunStatus, StageObserver, StageOrchestrator, WorkflowRun,
};
