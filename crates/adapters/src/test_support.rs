// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scripted fake adapters for tests.
//!
//! Each fake is a handle around shared state: clone one half into the
//! runtime under test and keep the other to script outcomes and assert on
//! recorded calls.

use crate::catalog::{CatalogError, CatalogOperation, CatalogTool};
use crate::notify::{NotifyError, NotifySink, TerminalNotice};
use crate::pipeline::{ExternalJobRef, PipelineBackend, PipelineError, StatusReport};
use crate::registry::{RegistryClient, RegistryError};
use async_trait::async_trait;
use kiln_core::ChangeRef;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Scripted [`CatalogTool`].
///
/// Pops queued results per call; when the queue is empty, succeeds with a
/// deterministic hash derived from the operation verb.
#[derive(Clone, Default)]
pub struct FakeCatalogTool {
    results: Arc<Mutex<VecDeque<Result<String, CatalogError>>>>,
    calls: Arc<Mutex<Vec<(String, String)>>>,
}

impl FakeCatalogTool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome of the next `mutate` call.
    pub fn push_result(&self, result: Result<String, CatalogError>) {
        self.results.lock().push_back(result);
    }

    /// Queue `n` retryable failures, then let defaults succeed.
    pub fn fail_times(&self, n: usize, error: CatalogError) {
        for _ in 0..n {
            self.push_result(Err(error.clone()));
        }
    }

    /// `(catalog_ref, verb)` pairs in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl CatalogTool for FakeCatalogTool {
    async fn mutate(
        &self,
        catalog_ref: &str,
        operation: &CatalogOperation,
    ) -> Result<String, CatalogError> {
        self.calls.lock().push((catalog_ref.to_string(), operation.verb.clone()));
        match self.results.lock().pop_front() {
            Some(result) => result,
            None => Ok(format!("sha256:{}-{}", operation.verb, catalog_ref.len())),
        }
    }
}

/// Scripted [`RegistryClient`].
#[derive(Clone, Default)]
pub struct FakeRegistry {
    push_results: Arc<Mutex<VecDeque<Result<String, RegistryError>>>>,
    pull_results: Arc<Mutex<VecDeque<Result<String, RegistryError>>>>,
    pushes: Arc<Mutex<Vec<(String, String)>>>,
    pulls: Arc<Mutex<Vec<String>>>,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_push_result(&self, result: Result<String, RegistryError>) {
        self.push_results.lock().push_back(result);
    }

    pub fn push_pull_result(&self, result: Result<String, RegistryError>) {
        self.pull_results.lock().push_back(result);
    }

    /// `(image, destination)` pairs in call order.
    pub fn pushes(&self) -> Vec<(String, String)> {
        self.pushes.lock().clone()
    }

    pub fn pulls(&self) -> Vec<String> {
        self.pulls.lock().clone()
    }
}

#[async_trait]
impl RegistryClient for FakeRegistry {
    async fn push(&self, image: &str, destination: &str) -> Result<String, RegistryError> {
        self.pushes.lock().push((image.to_string(), destination.to_string()));
        match self.push_results.lock().pop_front() {
            Some(result) => result,
            None => Ok(format!("sha256:{:016x}", destination.len() as u64 * 7919)),
        }
    }

    async fn pull(&self, image: &str) -> Result<String, RegistryError> {
        self.pulls.lock().push(image.to_string());
        match self.pull_results.lock().pop_front() {
            Some(result) => result,
            None => Ok(format!("containers-storage:{image}")),
        }
    }
}

/// Scripted [`PipelineBackend`].
///
/// `fetch_status` pops the scripted sequence; once drained it keeps
/// answering with `idle_status` (default: running), which makes
/// "remote job never finishes" scenarios a one-liner.
#[derive(Clone)]
pub struct FakePipelineBackend {
    statuses: Arc<Mutex<VecDeque<Result<StatusReport, PipelineError>>>>,
    idle_status: Arc<Mutex<StatusReport>>,
    artifact: Arc<Mutex<Result<String, PipelineError>>>,
    change_ref: Arc<Mutex<Option<ChangeRef>>>,
    cancels: Arc<Mutex<Vec<String>>>,
    closed_changes: Arc<Mutex<Vec<ChangeRef>>>,
    reverted_branches: Arc<Mutex<Vec<ChangeRef>>>,
    rollback_error: Arc<Mutex<Option<PipelineError>>>,
    status_polls: Arc<Mutex<u32>>,
}

impl Default for FakePipelineBackend {
    fn default() -> Self {
        Self {
            statuses: Arc::default(),
            idle_status: Arc::new(Mutex::new(StatusReport::running())),
            artifact: Arc::new(Mutex::new(Ok("registry.test/index@sha256:feed".to_string()))),
            change_ref: Arc::new(Mutex::new(Some(ChangeRef {
                repo: "git.test/catalogs/index".to_string(),
                branch: "kiln-build".to_string(),
                change_id: Some("1".to_string()),
            }))),
            cancels: Arc::default(),
            closed_changes: Arc::default(),
            reverted_branches: Arc::default(),
            rollback_error: Arc::default(),
            status_polls: Arc::new(Mutex::new(0)),
        }
    }
}

impl FakePipelineBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_status(&self, report: Result<StatusReport, PipelineError>) {
        self.statuses.lock().push_back(report);
    }

    /// Status answered once the scripted sequence is drained.
    pub fn set_idle_status(&self, report: StatusReport) {
        *self.idle_status.lock() = report;
    }

    pub fn set_artifact(&self, artifact: Result<String, PipelineError>) {
        *self.artifact.lock() = artifact;
    }

    pub fn set_change_ref(&self, change_ref: Option<ChangeRef>) {
        *self.change_ref.lock() = change_ref;
    }

    /// Make `close_change` and `revert_branch` fail with this error.
    pub fn set_rollback_error(&self, error: PipelineError) {
        *self.rollback_error.lock() = Some(error);
    }

    pub fn cancels(&self) -> Vec<String> {
        self.cancels.lock().clone()
    }

    pub fn closed_changes(&self) -> Vec<ChangeRef> {
        self.closed_changes.lock().clone()
    }

    pub fn reverted_branches(&self) -> Vec<ChangeRef> {
        self.reverted_branches.lock().clone()
    }

    /// Total `fetch_status` calls observed.
    pub fn status_polls(&self) -> u32 {
        *self.status_polls.lock()
    }
}

#[async_trait]
impl PipelineBackend for FakePipelineBackend {
    async fn push_change(
        &self,
        repo_ref: &str,
        _change: &serde_json::Value,
    ) -> Result<ExternalJobRef, PipelineError> {
        Ok(ExternalJobRef {
            external_id: format!("plr-{}", repo_ref.len()),
            change_ref: self.change_ref.lock().clone(),
        })
    }

    async fn fetch_status(&self, _external_id: &str) -> Result<StatusReport, PipelineError> {
        *self.status_polls.lock() += 1;
        match self.statuses.lock().pop_front() {
            Some(report) => report,
            None => Ok(self.idle_status.lock().clone()),
        }
    }

    async fn fetch_artifact(&self, _external_id: &str) -> Result<String, PipelineError> {
        self.artifact.lock().clone()
    }

    async fn cancel(&self, external_id: &str) -> Result<(), PipelineError> {
        self.cancels.lock().push(external_id.to_string());
        Ok(())
    }

    async fn close_change(&self, change: &ChangeRef) -> Result<(), PipelineError> {
        if let Some(err) = self.rollback_error.lock().clone() {
            return Err(err);
        }
        self.closed_changes.lock().push(change.clone());
        Ok(())
    }

    async fn revert_branch(&self, change: &ChangeRef) -> Result<(), PipelineError> {
        if let Some(err) = self.rollback_error.lock().clone() {
            return Err(err);
        }
        self.reverted_branches.lock().push(change.clone());
        Ok(())
    }
}

/// [`NotifySink`] that collects notices for assertions.
#[derive(Clone, Default)]
pub struct CollectingNotifySink {
    notices: Arc<Mutex<Vec<TerminalNotice>>>,
    fail: Arc<Mutex<bool>>,
}

impl CollectingNotifySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every delivery fail (the runtime must still terminate requests).
    pub fn fail_deliveries(&self) {
        *self.fail.lock() = true;
    }

    pub fn notices(&self) -> Vec<TerminalNotice> {
        self.notices.lock().clone()
    }
}

#[async_trait]
impl NotifySink for CollectingNotifySink {
    async fn notify(&self, notice: &TerminalNotice) -> Result<(), NotifyError> {
        if *self.fail.lock() {
            return Err(NotifyError::SendFailed("scripted failure".to_string()));
        }
        self.notices.lock().push(notice.clone());
        Ok(())
    }
}
