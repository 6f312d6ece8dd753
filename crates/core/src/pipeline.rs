// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tracked lifecycle of work delegated to an external build pipeline.

use serde::{Deserialize, Serialize};

/// Status of a delegated pipeline run.
///
/// `Pending` is the initial state right after submission is acknowledged;
/// `Succeeded`, `Failed` and `TimedOut` are terminal. `TimedOut` is set
/// locally when the polling deadline elapses — the remote job may still be
/// running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

crate::simple_display! {
    PipelineStatus {
        Pending => "pending",
        Running => "running",
        Succeeded => "succeeded",
        Failed => "failed",
        TimedOut => "timed_out",
    }
}

impl PipelineStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PipelineStatus::Succeeded | PipelineStatus::Failed | PipelineStatus::TimedOut
        )
    }
}

/// Locally-visible artifacts created when a change was pushed for the
/// pipeline to build: the branch that was pushed and the change request
/// opened on top of it. Rollback closes/reverts these on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRef {
    pub repo: String,
    pub branch: String,
    /// Identifier of the opened change/merge request, if one was created.
    pub change_id: Option<String>,
}

/// One delegated external build job, owned by exactly one build request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Identifier returned by the external system at submission.
    pub external_id: String,
    pub status: PipelineStatus,
    pub started_at_ms: u64,
    pub last_polled_at_ms: Option<u64>,
    /// Content-addressable reference of the produced artifact; populated
    /// only on `Succeeded`.
    pub result_artifact: Option<String>,
    /// Side effects to undo if the run does not succeed.
    pub change_ref: Option<ChangeRef>,
    /// Remote failure detail, when the external system reported one.
    pub failure_reason: Option<String>,
}

impl PipelineRun {
    pub fn new(external_id: impl Into<String>, change_ref: Option<ChangeRef>, now_ms: u64) -> Self {
        Self {
            external_id: external_id.into(),
            status: PipelineStatus::Pending,
            started_at_ms: now_ms,
            last_polled_at_ms: None,
            result_artifact: None,
            change_ref,
            failure_reason: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
