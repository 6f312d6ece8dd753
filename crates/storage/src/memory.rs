// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory request store.
//!
//! Reference implementation of [`RequestStore`] for single-process
//! deployments and tests. One mutex guards the whole map, so every
//! conditional method is a single atomic check-and-set — the same contract
//! a relational row with a state/owner column gives separate processes.

use crate::store::{RequestFilter, RequestStore, StoreError};
use kiln_core::{
    BatchId, BuildRequest, DedupKey, RequestId, RequestKind, RequestState, WorkerId,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

#[derive(Default)]
struct Inner {
    next_id: u64,
    requests: BTreeMap<RequestId, BuildRequest>,
    /// worker -> heartbeat expiry (epoch ms)
    heartbeats: HashMap<WorkerId, u64>,
}

impl Inner {
    fn worker_alive(&self, worker: &WorkerId, now_ms: u64) -> bool {
        self.heartbeats.get(worker).is_some_and(|expires| now_ms < *expires)
    }
}

/// Shared in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RequestStore for MemoryStore {
    fn insert(
        &self,
        kind: RequestKind,
        payload: serde_json::Value,
        batch_id: Option<BatchId>,
        now_ms: u64,
    ) -> BuildRequest {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = RequestId(inner.next_id);
        let req = BuildRequest::new(id, kind, payload, batch_id, now_ms);
        tracing::debug!(request_id = %id, kind = %kind, "request queued");
        inner.requests.insert(id, req.clone());
        req
    }

    fn get(&self, id: RequestId) -> Result<BuildRequest, StoreError> {
        self.inner.lock().requests.get(&id).cloned().ok_or(StoreError::NotFound(id))
    }

    fn list(&self, filter: &RequestFilter) -> Vec<BuildRequest> {
        self.inner.lock().requests.values().filter(|r| filter.matches(r)).cloned().collect()
    }

    fn next_queued(&self) -> Option<RequestId> {
        let inner = self.inner.lock();
        inner
            .requests
            .values()
            .find(|r| {
                r.state == RequestState::Queued
                    && r.owner.is_none()
                    && r.superseded_by.is_none()
            })
            .map(|r| r.id)
    }

    fn claim(&self, id: RequestId, worker: &WorkerId, now_ms: u64) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        let req = inner.requests.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if req.state != RequestState::Queued || req.owner.is_some() || req.superseded_by.is_some()
        {
            return Ok(false);
        }
        req.transition(RequestState::InProgress, "claimed by worker", now_ms)?;
        req.owner = Some(worker.clone());
        tracing::debug!(request_id = %id, worker = %worker, "request claimed");
        Ok(true)
    }

    fn reclaim(&self, id: RequestId, worker: &WorkerId, now_ms: u64) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        let owner_live = match inner.requests.get(&id) {
            None => return Err(StoreError::NotFound(id)),
            Some(req) => match (&req.state, &req.owner) {
                (RequestState::InProgress, Some(owner)) => inner.worker_alive(owner, now_ms),
                _ => return Ok(false),
            },
        };
        if owner_live {
            return Ok(false);
        }
        if let Some(req) = inner.requests.get_mut(&id) {
            req.owner = Some(worker.clone());
            req.updated_at_ms = now_ms;
            tracing::info!(request_id = %id, worker = %worker, "stale request reclaimed");
        }
        Ok(true)
    }

    fn record_progress(&self, id: RequestId, reason: &str, now_ms: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let req = inner.requests.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        req.record_progress(reason, now_ms);
        Ok(())
    }

    fn complete(&self, id: RequestId, artifact: &str, now_ms: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let req = inner.requests.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        req.complete(artifact, now_ms)?;
        tracing::info!(request_id = %id, artifact, "request complete");
        Ok(())
    }

    fn fail(&self, id: RequestId, message: &str, now_ms: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let req = inner.requests.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        req.fail(message, now_ms)?;
        tracing::warn!(request_id = %id, error = message, "request failed");
        Ok(())
    }

    fn find_inflight_duplicate(&self, key: &DedupKey, id: RequestId) -> Option<RequestId> {
        let inner = self.inner.lock();
        inner
            .requests
            .values()
            .find(|r| {
                r.id < id
                    && r.dedup_key == *key
                    && matches!(r.state, RequestState::Queued | RequestState::InProgress)
            })
            .map(|r| r.id)
    }

    fn supersede(
        &self,
        id: RequestId,
        primary: RequestId,
        now_ms: u64,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock();
        let req = inner.requests.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        if req.state != RequestState::Queued || req.owner.is_some() {
            return Ok(false);
        }
        req.superseded_by = Some(primary);
        req.updated_at_ms = now_ms;
        tracing::debug!(request_id = %id, primary = %primary, "duplicate parked behind primary");
        Ok(true)
    }

    fn resolve_superseded(
        &self,
        primary: RequestId,
        now_ms: u64,
    ) -> Result<Vec<RequestId>, StoreError> {
        let mut inner = self.inner.lock();
        let (state, artifact, error) = {
            let req = inner.requests.get(&primary).ok_or(StoreError::NotFound(primary))?;
            if !req.is_terminal() {
                return Ok(Vec::new());
            }
            (req.state, req.artifact_reference.clone(), req.error_message.clone())
        };

        let parked: Vec<RequestId> = inner
            .requests
            .values()
            .filter(|r| r.superseded_by == Some(primary) && !r.is_terminal())
            .map(|r| r.id)
            .collect();

        for id in &parked {
            let Some(req) = inner.requests.get_mut(id) else { continue };
            match state {
                RequestState::Complete => {
                    if let Some(artifact) = &artifact {
                        req.complete(artifact, now_ms)?;
                    }
                }
                RequestState::Failed => {
                    req.fail(error.as_deref().unwrap_or("duplicate request failed"), now_ms)?;
                }
                _ => {}
            }
            tracing::info!(request_id = %id, primary = %primary, state = %state,
                "superseded request resolved from primary outcome");
        }
        Ok(parked)
    }

    fn heartbeat(&self, worker: &WorkerId, now_ms: u64, ttl_ms: u64) {
        let mut inner = self.inner.lock();
        inner.heartbeats.insert(worker.clone(), now_ms.saturating_add(ttl_ms));
    }

    fn worker_alive(&self, worker: &WorkerId, now_ms: u64) -> bool {
        self.inner.lock().worker_alive(worker, now_ms)
    }

    fn stale_in_progress(&self, now_ms: u64) -> Vec<RequestId> {
        let inner = self.inner.lock();
        inner
            .requests
            .values()
            .filter(|r| {
                r.state == RequestState::InProgress
                    && match &r.owner {
                        Some(owner) => !inner.worker_alive(owner, now_ms),
                        None => true,
                    }
            })
            .map(|r| r.id)
            .collect()
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
