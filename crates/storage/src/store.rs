// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The request store contract.

use kiln_core::{
    BatchId, BuildRequest, DedupKey, RequestId, RequestKind, RequestState, TransitionError,
    WorkerId,
};
use thiserror::Error;

/// Errors from request store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request {0} not found")]
    NotFound(RequestId),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

/// Filter for [`RequestStore::list`].
#[derive(Debug, Clone, Default)]
pub struct RequestFilter {
    pub state: Option<RequestState>,
    pub batch_id: Option<BatchId>,
    pub kind: Option<RequestKind>,
}

impl RequestFilter {
    pub fn matches(&self, req: &BuildRequest) -> bool {
        self.state.is_none_or(|s| req.state == s)
            && self.batch_id.is_none_or(|b| req.batch_id == Some(b))
            && self.kind.is_none_or(|k| req.kind == k)
    }
}

/// Durable, shared request state.
///
/// One record per build request plus a heartbeat record per worker. All
/// conditional methods are atomic with respect to concurrent callers: a
/// relational implementation maps them onto conditional UPDATEs guarded by
/// the state/owner columns, and [`crate::MemoryStore`] holds one lock across
/// each check-and-set.
pub trait RequestStore: Send + Sync + 'static {
    /// Insert a new request in `Queued`, allocating the next monotonic id.
    fn insert(
        &self,
        kind: RequestKind,
        payload: serde_json::Value,
        batch_id: Option<BatchId>,
        now_ms: u64,
    ) -> BuildRequest;

    fn get(&self, id: RequestId) -> Result<BuildRequest, StoreError>;

    /// Requests matching the filter, in id (submission) order.
    fn list(&self, filter: &RequestFilter) -> Vec<BuildRequest>;

    /// Oldest `Queued` request that is neither superseded nor owned.
    fn next_queued(&self) -> Option<RequestId>;

    /// Conditional claim: `Queued`, un-owned, un-superseded ->
    /// `InProgress` owned by `worker`. Returns false (with no state change)
    /// when the condition does not hold — e.g. another worker won the race.
    fn claim(&self, id: RequestId, worker: &WorkerId, now_ms: u64) -> Result<bool, StoreError>;

    /// Conditional ownership takeover of an `InProgress` request whose
    /// owner's heartbeat has expired. Returns false when the owner is still
    /// live or the request is no longer `InProgress`.
    fn reclaim(&self, id: RequestId, worker: &WorkerId, now_ms: u64) -> Result<bool, StoreError>;

    /// Append an intermediate progress reason to an `InProgress` request.
    fn record_progress(&self, id: RequestId, reason: &str, now_ms: u64) -> Result<(), StoreError>;

    /// Terminal transition to `Complete` with the produced artifact.
    fn complete(&self, id: RequestId, artifact: &str, now_ms: u64) -> Result<(), StoreError>;

    /// Terminal transition to `Failed` with a redacted summary.
    fn fail(&self, id: RequestId, message: &str, now_ms: u64) -> Result<(), StoreError>;

    /// Oldest request with the same dedup key as `id` that is still
    /// `Queued` or `InProgress`. Returns `None` when `id` is itself the
    /// oldest in-flight holder of its key.
    fn find_inflight_duplicate(&self, key: &DedupKey, id: RequestId) -> Option<RequestId>;

    /// Conditionally park `id` behind `primary`: only while `id` is still
    /// `Queued` and un-owned. Returns false if the condition no longer
    /// holds.
    fn supersede(&self, id: RequestId, primary: RequestId, now_ms: u64)
        -> Result<bool, StoreError>;

    /// Copy `primary`'s terminal outcome onto every request parked behind
    /// it. Returns the ids that were resolved. No-op (empty) while
    /// `primary` is not terminal.
    fn resolve_superseded(
        &self,
        primary: RequestId,
        now_ms: u64,
    ) -> Result<Vec<RequestId>, StoreError>;

    /// Record that `worker` is alive until `now_ms + ttl_ms`.
    fn heartbeat(&self, worker: &WorkerId, now_ms: u64, ttl_ms: u64);

    /// True while the worker's heartbeat has not expired.
    fn worker_alive(&self, worker: &WorkerId, now_ms: u64) -> bool;

    /// `InProgress` requests whose owner is no longer live — eligible for
    /// [`RequestStore::reclaim`].
    fn stale_in_progress(&self, now_ms: u64) -> Vec<RequestId>;
}
