// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! External build pipeline capability.
//!
//! The submission side is a Git-style push that the remote cluster reacts
//! to; after [`PipelineBackend::push_change`] returns, the engine's
//! reconciler only ever polls status, reads the produced artifact, and (on
//! failure) undoes the pushed change.

use async_trait::async_trait;
use kiln_core::{ChangeRef, PipelineStatus};
use thiserror::Error;

/// Errors from pipeline backend calls.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// Network-level failure talking to the cluster.
    #[error("pipeline transport error: {0}")]
    Transport(String),
    /// The cluster API answered with a status code.
    #[error("pipeline api returned status {0}")]
    ApiStatus(u16),
    /// The referenced run does not exist (deleted, or the identifier is
    /// stale). Polling again cannot help.
    #[error("pipeline run not found: {0}")]
    RunNotFound(String),
}

/// Submission acknowledgement: the external job plus the locally-visible
/// side effects (branch, change request) created to trigger it.
#[derive(Debug, Clone)]
pub struct ExternalJobRef {
    pub external_id: String,
    pub change_ref: Option<ChangeRef>,
}

/// One status observation of a remote run.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub status: PipelineStatus,
    /// Remote failure detail, when the run reported one.
    pub reason: Option<String>,
}

impl StatusReport {
    pub fn running() -> Self {
        Self { status: PipelineStatus::Running, reason: None }
    }

    pub fn succeeded() -> Self {
        Self { status: PipelineStatus::Succeeded, reason: None }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self { status: PipelineStatus::Failed, reason: Some(reason.into()) }
    }
}

/// Capability: delegate a build to the external pipeline system.
#[async_trait]
pub trait PipelineBackend: Send + Sync + 'static {
    /// Push the change that triggers a remote build. Returns the external
    /// job reference the reconciler will poll.
    async fn push_change(
        &self,
        repo_ref: &str,
        change: &serde_json::Value,
    ) -> Result<ExternalJobRef, PipelineError>;

    /// Fetch the current status of a run.
    async fn fetch_status(&self, external_id: &str) -> Result<StatusReport, PipelineError>;

    /// Fetch the content-addressable reference of the artifact a succeeded
    /// run produced.
    async fn fetch_artifact(&self, external_id: &str) -> Result<String, PipelineError>;

    /// Best-effort notification that we stopped waiting. Must not be relied
    /// on to stop the remote job.
    async fn cancel(&self, external_id: &str) -> Result<(), PipelineError>;

    /// Close the change request opened for this build.
    async fn close_change(&self, change: &ChangeRef) -> Result<(), PipelineError>;

    /// Revert the pushed branch to its state before this build.
    async fn revert_branch(&self, change: &ChangeRef) -> Result<(), PipelineError>;
}
