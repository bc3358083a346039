// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! The resumable authenticity pipeline.
//!
//! [`StageOrchestrator`] drives a [`WorkflowRun`] through its fixed stage
//! list, one stage at a time, reporting every transition through a
//! [`StageObserver`]. A failed stage halts the run; `retry()` resumes from
//! the failure without redoing completed work.

mod orchestrator;
mod run;

pub use orchestrator::{
    NullObserver, PipelineContext, PipelineOptions, StageObserver, StageOrchestrator,
};
pub use run::{
    LedgerCallState, RunArtifacts, RunStatus, Stage, StageId, StageStatus, WorkflowRun,
};
