// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Submission and status surface for the API layer.
//!
//! Thin by design: payload validation happens above, and the only thing the
//! core extracts from a payload at submission time is its dedup key (derived
//! inside the store insert) and the batch id.

use kiln_core::{batch_state, BatchId, BuildRequest, Clock, RequestId, RequestKind, RequestState};
use kiln_storage::{RequestFilter, RequestStore, StoreError};
use std::sync::Arc;

/// Read/write projection of the request table for the API layer.
pub struct Service<S, C: Clock> {
    store: Arc<S>,
    clock: C,
}

impl<S: RequestStore, C: Clock> Service<S, C> {
    pub fn new(store: Arc<S>, clock: C) -> Self {
        Self { store, clock }
    }

    /// Enqueue a validated payload; returns the allocated request id.
    ///
    /// The dedup window opens here: a request identical to one still queued
    /// or in progress is parked behind it immediately, so only the primary
    /// ever executes and this one inherits its outcome.
    pub fn enqueue(
        &self,
        kind: RequestKind,
        payload: serde_json::Value,
        batch_id: Option<BatchId>,
    ) -> RequestId {
        let now_ms = self.clock.epoch_ms();
        let req = self.store.insert(kind, payload, batch_id, now_ms);
        tracing::info!(request_id = %req.id, kind = %kind, batch = ?batch_id, "request enqueued");
        if let Some(primary) = self.store.find_inflight_duplicate(&req.dedup_key, req.id) {
            match self.store.supersede(req.id, primary, now_ms) {
                Ok(true) => {
                    tracing::info!(request_id = %req.id, %primary,
                        "identical request in flight, parked behind it");
                }
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(request_id = %req.id, error = %err,
                        "failed to park duplicate request");
                }
            }
        }
        req.id
    }

    /// Read-only projection of one request.
    pub fn get(&self, id: RequestId) -> Result<BuildRequest, StoreError> {
        self.store.get(id)
    }

    pub fn list(&self, filter: &RequestFilter) -> Vec<BuildRequest> {
        self.store.list(filter)
    }

    /// Derived aggregate state of a batch; `None` for an unknown batch.
    pub fn batch_state(&self, batch_id: BatchId) -> Option<RequestState> {
        let members =
            self.store.list(&RequestFilter { batch_id: Some(batch_id), ..Default::default() });
        if members.is_empty() {
            return None;
        }
        let states: Vec<RequestState> = members.iter().map(|r| r.state).collect();
        Some(batch_state(states.iter()))
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
