// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The build-request runtime: claim, execute, terminate, notify.
//!
//! One `Runtime` per worker. All cross-worker coordination goes through the
//! store's conditional updates and the port lock files — never an
//! in-process mutex, since workers may be separate OS processes.

use crate::config::RuntimeConfig;
use crate::ports::{LeaseError, PortLockManager};
use crate::reconcile::{ReconcileError, Reconciler};
use crate::retry::RetryError;
use crate::workflow;
use kiln_adapters::{
    CatalogError, CatalogTool, NotifySink, PipelineBackend, RegistryClient, RegistryError,
    TerminalNotice,
};
use kiln_core::{BuildRequest, Clock, RequestId, WorkerId};
use kiln_storage::{RequestStore, StoreError};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors from the request runtime
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("port lease: {0}")]
    Lease(#[source] RetryError<LeaseError>),
    #[error("catalog mutation: {0}")]
    Catalog(#[source] RetryError<CatalogError>),
    #[error("registry operation: {0}")]
    Registry(#[source] RetryError<RegistryError>),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error("pipeline run failed: {reason}")]
    PipelineFailed { reason: String },
    #[error("timed out waiting for the pipeline run")]
    PipelineTimeout,
    #[error("pipeline run {external_id} succeeded without an artifact")]
    ArtifactMissing { external_id: String },
    #[error("request payload missing field `{0}`")]
    MissingField(&'static str),
}

impl RuntimeError {
    /// Human-readable, non-sensitive summary for the request record.
    ///
    /// Stays at one level of detail: enough for an operator to know which
    /// step gave up and why, never raw tool output.
    pub fn summary(&self) -> String {
        match self {
            RuntimeError::Store(err) => format!("internal state error: {err}"),
            RuntimeError::Lease(RetryError::Exhausted { attempts, .. }) => {
                format!("no free catalog port after {attempts} attempts")
            }
            RuntimeError::Lease(err) => format!("catalog port lease failed: {err}"),
            RuntimeError::Catalog(RetryError::Exhausted { attempts, source }) => {
                format!("catalog mutation failed after {attempts} attempts: {source}")
            }
            RuntimeError::Catalog(RetryError::Fatal(source)) => {
                format!("catalog mutation failed: {source}")
            }
            RuntimeError::Registry(RetryError::Exhausted { attempts, source }) => {
                format!("registry operation failed after {attempts} attempts: {source}")
            }
            RuntimeError::Registry(RetryError::Fatal(source)) => {
                format!("registry operation failed: {source}")
            }
            RuntimeError::Reconcile(err) => err.to_string(),
            RuntimeError::PipelineFailed { reason } => format!("pipeline run failed: {reason}"),
            RuntimeError::PipelineTimeout => {
                "timed out waiting for the pipeline run".to_string()
            }
            RuntimeError::ArtifactMissing { external_id } => {
                format!("pipeline run {external_id} succeeded without an artifact")
            }
            RuntimeError::MissingField(field) => {
                format!("request payload missing field `{field}`")
            }
        }
    }
}

/// External capabilities a runtime executes against.
pub struct RuntimeDeps<Cat, Reg, N> {
    pub catalog: Cat,
    pub registry: Reg,
    pub notifier: N,
}

/// One worker's view of the orchestration core.
pub struct Runtime<S, Cat, Reg, P, N, C: Clock> {
    pub(crate) store: Arc<S>,
    pub(crate) catalog: Cat,
    pub(crate) registry: Reg,
    pub(crate) reconciler: Reconciler<P, C>,
    pub(crate) notifier: N,
    pub(crate) ports: PortLockManager<C>,
    pub(crate) config: RuntimeConfig,
    pub(crate) worker: WorkerId,
    pub(crate) clock: C,
}

impl<S, Cat, Reg, P, N, C> Runtime<S, Cat, Reg, P, N, C>
where
    S: RequestStore,
    Cat: CatalogTool,
    Reg: RegistryClient,
    P: PipelineBackend,
    N: NotifySink,
    C: Clock,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<S>,
        deps: RuntimeDeps<Cat, Reg, N>,
        ports: PortLockManager<C>,
        reconciler: Reconciler<P, C>,
        config: RuntimeConfig,
        worker: WorkerId,
        clock: C,
    ) -> Self {
        Self {
            store,
            catalog: deps.catalog,
            registry: deps.registry,
            reconciler,
            notifier: deps.notifier,
            ports,
            config,
            worker,
            clock,
        }
    }

    /// Process at most one request: reclaim stale work first, then claim
    /// fresh queued work, superseding duplicates on the way. Returns the
    /// processed request id, or `None` when the queue held nothing for us.
    ///
    /// Workflow failures terminate the request as `Failed` and are not
    /// returned as errors; only store-level failures propagate.
    pub async fn run_once(&self) -> Result<Option<RequestId>, RuntimeError> {
        let now_ms = self.clock.epoch_ms();
        self.store.heartbeat(&self.worker, now_ms, self.config.worker_ttl.as_millis() as u64);

        // Crash recovery: requests whose owner stopped heartbeating restart
        // from the top of the step they were in.
        for id in self.store.stale_in_progress(now_ms) {
            if self.store.reclaim(id, &self.worker, now_ms)? {
                self.execute(id).await?;
                return Ok(Some(id));
            }
        }

        while let Some(id) = self.store.next_queued() {
            let req = self.store.get(id)?;
            // Dedup before claiming: an identical in-flight request means
            // this one only waits for that outcome.
            if let Some(primary) = self.store.find_inflight_duplicate(&req.dedup_key, id) {
                if self.store.supersede(id, primary, self.clock.epoch_ms())? {
                    tracing::info!(request_id = %id, primary = %primary,
                        "duplicate request superseded");
                }
                continue;
            }
            if self.store.claim(id, &self.worker, self.clock.epoch_ms())? {
                self.execute(id).await?;
                return Ok(Some(id));
            }
            // Lost the claim race; another worker owns it now.
        }
        Ok(None)
    }

    /// Process queued work until the queue is empty; returns how many
    /// requests this worker executed.
    pub async fn drain(&self) -> Result<u32, RuntimeError> {
        let mut processed = 0;
        while self.run_once().await?.is_some() {
            processed += 1;
        }
        Ok(processed)
    }

    /// Worker loop: pull and execute requests until cancelled, sleeping
    /// between scans while the queue is empty.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), RuntimeError> {
        tracing::info!(worker = %self.worker, "worker loop started");
        loop {
            if shutdown.is_cancelled() {
                tracing::info!(worker = %self.worker, "worker loop stopping");
                return Ok(());
            }
            if self.run_once().await?.is_none() {
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    _ = tokio::time::sleep(self.config.idle_interval) => {}
                }
            }
        }
    }

    /// Execute a claimed request through its workflow and record the
    /// terminal outcome, fanning it out to any superseded duplicates.
    async fn execute(&self, id: RequestId) -> Result<(), RuntimeError> {
        let req = self.store.get(id)?;
        tracing::info!(request_id = %id, kind = %req.kind, worker = %self.worker,
            "executing build request");

        match workflow::execute(self, &req).await {
            Ok(artifact) => {
                self.store.complete(id, &artifact, self.clock.epoch_ms())?;
            }
            Err(err) => {
                tracing::error!(request_id = %id, error = %err, "build request failed");
                self.store.fail(id, &err.summary(), self.clock.epoch_ms())?;
            }
        }

        let resolved = self.store.resolve_superseded(id, self.clock.epoch_ms())?;
        self.send_notice(id).await;
        for dup in resolved {
            self.send_notice(dup).await;
        }
        Ok(())
    }

    pub(crate) fn progress(&self, req: &BuildRequest, reason: &str) -> Result<(), RuntimeError> {
        tracing::info!(request_id = %req.id, reason, "progress");
        let now_ms = self.clock.epoch_ms();
        // Long steps must not let the heartbeat lapse mid-build, or another
        // worker would reclaim a request that is still being worked on.
        self.store.heartbeat(&self.worker, now_ms, self.config.worker_ttl.as_millis() as u64);
        self.store.record_progress(req.id, reason, now_ms)?;
        Ok(())
    }

    /// Fire-and-forget terminal notification; failure is logged only.
    async fn send_notice(&self, id: RequestId) {
        let req = match self.store.get(id) {
            Ok(req) => req,
            Err(err) => {
                tracing::warn!(request_id = %id, error = %err,
                    "cannot load request for terminal notice");
                return;
            }
        };
        let notice = TerminalNotice {
            request_id: req.id,
            batch_id: req.batch_id,
            state: req.state,
            artifact_reference: req.artifact_reference.clone(),
            error_message: req.error_message.clone(),
        };
        if let Err(err) = self.notifier.notify(&notice).await {
            tracing::warn!(request_id = %id, error = %err, "terminal notice delivery failed");
        }
    }
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
