// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Build request identifier and lifecycle state machine.
//!
//! All state transitions go through [`BuildRequest::transition`], which
//! validates the edge before mutating. Call sites never assign
//! [`RequestState`] directly, so an illegal transition is a
//! [`TransitionError`] instead of a silent overwrite.

use crate::batch::BatchId;
use crate::worker::WorkerId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use smol_str::SmolStr;
use thiserror::Error;

/// Unique, monotonic identifier for a build request.
///
/// Allocated by the request store at insert time; ordering doubles as
/// submission order, which the dedup logic relies on to pick the primary.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RequestId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// The kind of index operation a request performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestKind {
    /// Add bundles to an existing index
    Add,
    /// Remove operators from an existing index
    Remove,
    /// Merge one index's catalog into another
    Merge,
    /// Regenerate a bundle image
    Regenerate,
    /// Create a new index with no operators
    CreateEmpty,
    /// Apply a file-based-catalog fragment to an index
    FbcOperation,
}

crate::simple_display! {
    RequestKind {
        Add => "add",
        Remove => "remove",
        Merge => "merge",
        Regenerate => "regenerate",
        CreateEmpty => "create-empty",
        FbcOperation => "fbc-operation",
    }
}

/// Lifecycle state of a build request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Queued,
    InProgress,
    Complete,
    Failed,
}

crate::simple_display! {
    RequestState {
        Queued => "queued",
        InProgress => "in_progress",
        Complete => "complete",
        Failed => "failed",
    }
}

impl RequestState {
    /// Check if this state is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestState::Complete | RequestState::Failed)
    }

    /// Whether `self -> to` is a legal edge.
    ///
    /// `Queued -> Complete/Failed` exists only for superseded duplicates,
    /// whose outcome is derived from the primary request without ever being
    /// claimed. Re-claiming after a worker crash keeps the request
    /// `InProgress` and swaps the owner, so there is no edge back to
    /// `Queued`.
    pub fn can_transition(self, to: RequestState) -> bool {
        use RequestState::*;
        matches!(
            (self, to),
            (Queued, InProgress) | (Queued, Complete) | (Queued, Failed)
                | (InProgress, Complete)
                | (InProgress, Failed)
        )
    }
}

/// Fingerprint of a request's normalized input payload.
///
/// Two requests with equal keys ask for the same build; the runtime executes
/// only the oldest in-flight one and derives the others' outcomes from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DedupKey(SmolStr);

impl DedupKey {
    /// Derive the key from a request kind and its payload.
    ///
    /// The payload is canonicalized (object keys sorted recursively, array
    /// order preserved) before hashing, so key order in the submitted JSON
    /// does not change the fingerprint.
    pub fn derive(kind: RequestKind, payload: &serde_json::Value) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(kind.to_string().as_bytes());
        hasher.update(b"\n");
        hasher.update(canonicalize(payload).to_string().as_bytes());
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(64);
        for byte in digest {
            use std::fmt::Write;
            let _ = write!(hex, "{byte:02x}");
        }
        Self(SmolStr::new(hex))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DedupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rebuild a JSON value with object keys sorted recursively.
fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut sorted: Vec<(&String, &serde_json::Value)> = map.iter().collect();
            sorted.sort_by_key(|(k, _)| k.as_str());
            serde_json::Value::Object(
                sorted.into_iter().map(|(k, v)| (k.clone(), canonicalize(v))).collect(),
            )
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(canonicalize).collect())
        }
        other => other.clone(),
    }
}

/// One entry in a request's state history.
///
/// Terminal and intermediate progress updates both land here; the `state`
/// field repeats the request state at the time of the entry so the history
/// reads as a timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEntry {
    pub state: RequestState,
    pub reason: String,
    pub at_ms: u64,
}

/// Rejected state change.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("request {id}: illegal transition {from} -> {to}")]
    Illegal { id: RequestId, from: RequestState, to: RequestState },
    #[error("request {id}: cannot complete without an artifact reference")]
    MissingArtifact { id: RequestId },
}

/// A unit of build work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRequest {
    pub id: RequestId,
    pub kind: RequestKind,
    pub state: RequestState,
    /// Groups co-submitted requests; aggregate state is derived, never stored.
    pub batch_id: Option<BatchId>,
    pub dedup_key: DedupKey,
    /// Opaque validated payload from the API layer.
    pub payload: serde_json::Value,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    pub error_message: Option<String>,
    pub artifact_reference: Option<String>,
    /// Worker that claimed the request; cleared only by reclaim.
    pub owner: Option<WorkerId>,
    /// Set when an older in-flight request with the same dedup key exists;
    /// this request's outcome is copied from that one.
    pub superseded_by: Option<RequestId>,
    #[serde(default)]
    pub state_history: Vec<StateEntry>,
}

impl BuildRequest {
    /// Create a freshly queued request.
    pub fn new(
        id: RequestId,
        kind: RequestKind,
        payload: serde_json::Value,
        batch_id: Option<BatchId>,
        now_ms: u64,
    ) -> Self {
        let dedup_key = DedupKey::derive(kind, &payload);
        Self {
            id,
            kind,
            state: RequestState::Queued,
            batch_id,
            dedup_key,
            payload,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
            error_message: None,
            artifact_reference: None,
            owner: None,
            superseded_by: None,
            state_history: vec![StateEntry {
                state: RequestState::Queued,
                reason: "request queued".to_string(),
                at_ms: now_ms,
            }],
        }
    }

    /// Check if the request is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Validated state change; appends a history entry on success.
    pub fn transition(
        &mut self,
        to: RequestState,
        reason: &str,
        now_ms: u64,
    ) -> Result<(), TransitionError> {
        if !self.state.can_transition(to) {
            return Err(TransitionError::Illegal { id: self.id, from: self.state, to });
        }
        self.state = to;
        self.updated_at_ms = now_ms;
        self.state_history.push(StateEntry {
            state: to,
            reason: reason.to_string(),
            at_ms: now_ms,
        });
        Ok(())
    }

    /// Record an intermediate progress reason without changing state.
    ///
    /// Only meaningful while `InProgress`; ignored otherwise so idempotent
    /// re-runs of a workflow step cannot corrupt a terminal request.
    pub fn record_progress(&mut self, reason: &str, now_ms: u64) {
        if self.state != RequestState::InProgress {
            return;
        }
        self.updated_at_ms = now_ms;
        self.state_history.push(StateEntry {
            state: self.state,
            reason: reason.to_string(),
            at_ms: now_ms,
        });
    }

    /// Transition to `Complete` with the produced artifact.
    pub fn complete(&mut self, artifact: &str, now_ms: u64) -> Result<(), TransitionError> {
        if artifact.is_empty() {
            return Err(TransitionError::MissingArtifact { id: self.id });
        }
        self.transition(RequestState::Complete, "build complete", now_ms)?;
        self.artifact_reference = Some(artifact.to_string());
        self.owner = None;
        Ok(())
    }

    /// Transition to `Failed` with a human-readable, non-sensitive summary.
    pub fn fail(&mut self, message: &str, now_ms: u64) -> Result<(), TransitionError> {
        self.transition(RequestState::Failed, message, now_ms)?;
        self.error_message = Some(message.to_string());
        self.owner = None;
        Ok(())
    }
}

crate::builder! {
    pub struct BuildRequestBuilder => BuildRequest {
        set {
            id: RequestId = RequestId(1),
            kind: RequestKind = RequestKind::Add,
            state: RequestState = RequestState::Queued,
            payload: serde_json::Value = serde_json::json!({"from_index": "registry.test/index:v1"}),
            created_at_ms: u64 = 1_000_000,
            updated_at_ms: u64 = 1_000_000,
            state_history: Vec<StateEntry> = Vec::new(),
        }
        option {
            batch_id: BatchId = None,
            error_message: String = None,
            artifact_reference: String = None,
            owner: WorkerId = None,
            superseded_by: RequestId = None,
        }
        computed {
            dedup_key: DedupKey = DedupKey::derive(
                RequestKind::Add,
                &serde_json::json!({"from_index": "registry.test/index:v1"}),
            ),
        }
    }
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;
