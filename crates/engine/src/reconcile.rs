// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pipeline reconciliation: drive a delegated build to a terminal outcome.
//!
//! After a change has been pushed for the remote cluster to build, the
//! reconciler polls the run to completion, extracts the produced artifact,
//! and on failure undoes the locally-visible side effects of the push.
//! Deadline expiry terminates *waiting*, not the remote job: the run is
//! marked timed out locally and the cluster gets a best-effort cancel.

use crate::classify;
use crate::config::ReconcileConfig;
use crate::retry::{retry, RetryError};
use kiln_adapters::{ExternalJobRef, PipelineBackend, PipelineError};
use kiln_core::{Clock, PipelineRun, PipelineStatus};
use thiserror::Error;
use tokio::time::Instant;

/// Errors from reconciliation
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("pipeline submission failed: {0}")]
    Submit(#[source] RetryError<PipelineError>),
    #[error("pipeline status poll failed: {0}")]
    Poll(#[source] RetryError<PipelineError>),
    #[error("pipeline artifact fetch failed: {0}")]
    Artifact(#[source] RetryError<PipelineError>),
}

/// Tracks one delegated run per owning build request.
pub struct Reconciler<P, C: Clock> {
    backend: P,
    config: ReconcileConfig,
    clock: C,
}

impl<P: PipelineBackend, C: Clock> Reconciler<P, C> {
    pub fn new(backend: P, config: ReconcileConfig, clock: C) -> Self {
        Self { backend, config, clock }
    }

    /// Push a change through the submission collaborator and start tracking
    /// the resulting run.
    pub async fn submit_change(
        &self,
        repo_ref: &str,
        change: &serde_json::Value,
    ) -> Result<PipelineRun, ReconcileError> {
        let job = retry(&self.config.retry, classify::pipeline_class, || {
            self.backend.push_change(repo_ref, change)
        })
        .await
        .map_err(ReconcileError::Submit)?;
        tracing::info!(external_id = %job.external_id, repo = repo_ref,
            "change pushed, tracking pipeline run");
        Ok(self.submit(job))
    }

    /// Record an already-acknowledged submission; initial status `Pending`.
    pub fn submit(&self, job: ExternalJobRef) -> PipelineRun {
        PipelineRun::new(job.external_id, job.change_ref, self.clock.epoch_ms())
    }

    /// Query external status once and fold it into the run.
    ///
    /// Transport failures are retried within the configured budget; a
    /// missing run is fatal. On success the produced artifact's
    /// content-addressable reference is fetched as well.
    pub async fn poll(&self, run: &mut PipelineRun) -> Result<(), ReconcileError> {
        let external_id = run.external_id.clone();
        let report = retry(&self.config.retry, classify::pipeline_class, || {
            self.backend.fetch_status(&external_id)
        })
        .await
        .map_err(ReconcileError::Poll)?;

        run.last_polled_at_ms = Some(self.clock.epoch_ms());
        // A report without conditions yet must not regress an observed run.
        if !(report.status == PipelineStatus::Pending && run.status == PipelineStatus::Running) {
            run.status = report.status;
        }
        tracing::debug!(external_id = %run.external_id, status = %run.status, "pipeline polled");

        match run.status {
            PipelineStatus::Succeeded => {
                let artifact = retry(&self.config.retry, classify::pipeline_class, || {
                    self.backend.fetch_artifact(&external_id)
                })
                .await
                .map_err(ReconcileError::Artifact)?;
                run.result_artifact = Some(artifact);
            }
            PipelineStatus::Failed => {
                run.failure_reason = report.reason;
            }
            _ => {}
        }
        Ok(())
    }

    /// Poll until the run is terminal or the deadline elapses.
    ///
    /// On deadline the run is marked [`PipelineStatus::TimedOut`] and the
    /// backend gets one best-effort cancel; its failure is logged and does
    /// not affect local state.
    pub async fn await_completion(&self, run: &mut PipelineRun) -> Result<(), ReconcileError> {
        let deadline = Instant::now() + self.config.deadline;
        loop {
            if run.is_terminal() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                run.status = PipelineStatus::TimedOut;
                tracing::warn!(external_id = %run.external_id,
                    deadline_secs = self.config.deadline.as_secs(),
                    "deadline elapsed waiting for pipeline run");
                if let Err(err) = self.backend.cancel(&run.external_id).await {
                    tracing::warn!(external_id = %run.external_id, error = %err,
                        "best-effort pipeline cancel failed");
                }
                return Ok(());
            }
            tokio::time::sleep(self.config.poll_interval).await;
            self.poll(run).await?;
        }
    }

    /// Undo the locally-visible side effects of a failed or timed-out run:
    /// close the opened change request, revert the pushed branch.
    ///
    /// Rollback failures are logged, never re-raised — the owning request
    /// is failed regardless, and a stuck request is worse than a stray
    /// remote artifact.
    pub async fn rollback(&self, run: &PipelineRun) {
        let Some(change) = &run.change_ref else {
            tracing::debug!(external_id = %run.external_id, "no change to roll back");
            return;
        };
        tracing::info!(external_id = %run.external_id, branch = %change.branch,
            "rolling back pushed change");
        if let Err(err) = retry(&self.config.retry, classify::pipeline_class, || {
            self.backend.close_change(change)
        })
        .await
        {
            tracing::warn!(error = %err, "failed to close change request during rollback");
        }
        if let Err(err) = retry(&self.config.retry, classify::pipeline_class, || {
            self.backend.revert_branch(change)
        })
        .await
        {
            tracing::warn!(error = %err, "failed to revert branch during rollback");
        }
    }
}

#[cfg(test)]
#[path = "reconcile_tests.rs"]
mod tests;
