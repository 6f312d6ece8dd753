// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

fn add_payload(index: &str) -> serde_json::Value {
    json!({"from_index": index, "bundles": ["registry.test/bundle:v1"]})
}

#[test]
fn insert_allocates_monotonic_ids() {
    let store = MemoryStore::new();
    let a = store.insert(RequestKind::Add, add_payload("r/i:v1"), None, 1_000);
    let b = store.insert(RequestKind::Add, add_payload("r/i:v2"), None, 1_000);
    assert_eq!(a.id, RequestId(1));
    assert_eq!(b.id, RequestId(2));
    assert_eq!(a.state, RequestState::Queued);
}

#[test]
fn claim_is_won_by_exactly_one_worker() {
    let store = MemoryStore::new();
    let req = store.insert(RequestKind::Add, add_payload("r/i:v1"), None, 1_000);

    let w1 = WorkerId::new("worker-1");
    let w2 = WorkerId::new("worker-2");
    let first = store.claim(req.id, &w1, 2_000).unwrap();
    let second = store.claim(req.id, &w2, 2_001).unwrap();

    assert!(first);
    assert!(!second);
    let claimed = store.get(req.id).unwrap();
    assert_eq!(claimed.state, RequestState::InProgress);
    assert_eq!(claimed.owner, Some(w1));
}

#[test]
fn claim_skips_superseded_requests() {
    let store = MemoryStore::new();
    let primary = store.insert(RequestKind::Add, add_payload("r/i:v1"), None, 1_000);
    let dup = store.insert(RequestKind::Add, add_payload("r/i:v1"), None, 1_001);
    assert!(store.supersede(dup.id, primary.id, 1_002).unwrap());

    let w = WorkerId::new("worker-1");
    assert!(!store.claim(dup.id, &w, 2_000).unwrap());
    assert_eq!(store.next_queued(), Some(primary.id));
}

#[test]
fn next_queued_returns_oldest_eligible() {
    let store = MemoryStore::new();
    let a = store.insert(RequestKind::Add, add_payload("r/i:v1"), None, 1_000);
    let b = store.insert(RequestKind::Remove, add_payload("r/i:v2"), None, 1_001);

    assert_eq!(store.next_queued(), Some(a.id));
    store.claim(a.id, &WorkerId::new("w"), 2_000).unwrap();
    assert_eq!(store.next_queued(), Some(b.id));
    store.claim(b.id, &WorkerId::new("w"), 2_000).unwrap();
    assert_eq!(store.next_queued(), None);
}

#[test]
fn find_inflight_duplicate_prefers_oldest() {
    let store = MemoryStore::new();
    let a = store.insert(RequestKind::Add, add_payload("r/i:v1"), None, 1_000);
    let b = store.insert(RequestKind::Add, add_payload("r/i:v1"), None, 1_001);

    // The older request has no duplicate; the younger one resolves to it.
    assert_eq!(store.find_inflight_duplicate(&a.dedup_key, a.id), None);
    assert_eq!(store.find_inflight_duplicate(&b.dedup_key, b.id), Some(a.id));
}

#[test]
fn duplicate_of_terminal_request_is_not_inflight() {
    let store = MemoryStore::new();
    let a = store.insert(RequestKind::Add, add_payload("r/i:v1"), None, 1_000);
    store.claim(a.id, &WorkerId::new("w"), 1_500).unwrap();
    store.complete(a.id, "r/i@sha256:abc", 2_000).unwrap();

    let b = store.insert(RequestKind::Add, add_payload("r/i:v1"), None, 3_000);
    assert_eq!(store.find_inflight_duplicate(&b.dedup_key, b.id), None);
}

#[test]
fn resolve_superseded_copies_complete_outcome() {
    let store = MemoryStore::new();
    let primary = store.insert(RequestKind::Add, add_payload("r/i:v1"), None, 1_000);
    let dup = store.insert(RequestKind::Add, add_payload("r/i:v1"), None, 1_001);
    store.supersede(dup.id, primary.id, 1_002).unwrap();

    // Nothing to resolve while the primary is still running.
    store.claim(primary.id, &WorkerId::new("w"), 1_500).unwrap();
    assert!(store.resolve_superseded(primary.id, 1_600).unwrap().is_empty());

    store.complete(primary.id, "r/i@sha256:abc", 2_000).unwrap();
    let resolved = store.resolve_superseded(primary.id, 2_001).unwrap();
    assert_eq!(resolved, vec![dup.id]);

    let dup = store.get(dup.id).unwrap();
    assert_eq!(dup.state, RequestState::Complete);
    assert_eq!(dup.artifact_reference.as_deref(), Some("r/i@sha256:abc"));
}

#[test]
fn resolve_superseded_copies_failure_message() {
    let store = MemoryStore::new();
    let primary = store.insert(RequestKind::Add, add_payload("r/i:v1"), None, 1_000);
    let dup = store.insert(RequestKind::Add, add_payload("r/i:v1"), None, 1_001);
    store.supersede(dup.id, primary.id, 1_002).unwrap();

    store.claim(primary.id, &WorkerId::new("w"), 1_500).unwrap();
    store.fail(primary.id, "registry push failed after 5 attempts", 2_000).unwrap();
    store.resolve_superseded(primary.id, 2_001).unwrap();

    let dup = store.get(dup.id).unwrap();
    assert_eq!(dup.state, RequestState::Failed);
    assert_eq!(dup.error_message.as_deref(), Some("registry push failed after 5 attempts"));
}

#[test]
fn reclaim_requires_dead_owner() {
    let store = MemoryStore::new();
    let req = store.insert(RequestKind::Add, add_payload("r/i:v1"), None, 1_000);
    let w1 = WorkerId::new("worker-1");
    let w2 = WorkerId::new("worker-2");

    store.heartbeat(&w1, 1_000, 10_000);
    store.claim(req.id, &w1, 1_500).unwrap();

    // Owner still live: no takeover.
    assert!(!store.reclaim(req.id, &w2, 5_000).unwrap());
    assert!(store.stale_in_progress(5_000).is_empty());

    // Heartbeat expired: eligible and reclaimable.
    assert_eq!(store.stale_in_progress(11_000), vec![req.id]);
    assert!(store.reclaim(req.id, &w2, 11_000).unwrap());
    let req = store.get(req.id).unwrap();
    assert_eq!(req.owner, Some(w2));
    assert_eq!(req.state, RequestState::InProgress);
}

#[test]
fn reclaim_rejects_non_in_progress() {
    let store = MemoryStore::new();
    let req = store.insert(RequestKind::Add, add_payload("r/i:v1"), None, 1_000);
    assert!(!store.reclaim(req.id, &WorkerId::new("w"), 2_000).unwrap());
}

#[test]
fn heartbeat_expiry_boundary() {
    let store = MemoryStore::new();
    let w = WorkerId::new("worker-1");
    store.heartbeat(&w, 1_000, 5_000);
    assert!(store.worker_alive(&w, 5_999));
    assert!(!store.worker_alive(&w, 6_000));
    assert!(!store.worker_alive(&WorkerId::new("unknown"), 0));
}

#[test]
fn list_filters_by_state_batch_and_kind() {
    let store = MemoryStore::new();
    let batch = BatchId(9);
    let a = store.insert(RequestKind::Add, add_payload("r/i:v1"), Some(batch), 1_000);
    let b = store.insert(RequestKind::Remove, add_payload("r/i:v2"), Some(batch), 1_000);
    store.insert(RequestKind::Add, add_payload("r/i:v3"), None, 1_000);

    let in_batch = store.list(&RequestFilter { batch_id: Some(batch), ..Default::default() });
    assert_eq!(in_batch.iter().map(|r| r.id).collect::<Vec<_>>(), vec![a.id, b.id]);

    store.claim(a.id, &WorkerId::new("w"), 2_000).unwrap();
    let queued = store.list(&RequestFilter {
        state: Some(RequestState::Queued),
        ..Default::default()
    });
    assert_eq!(queued.len(), 2);

    let removes =
        store.list(&RequestFilter { kind: Some(RequestKind::Remove), ..Default::default() });
    assert_eq!(removes.len(), 1);
    assert_eq!(removes[0].id, b.id);
}

#[test]
fn unknown_request_is_not_found() {
    let store = MemoryStore::new();
    let err = store.get(RequestId(99)).unwrap_err();
    assert!(matches!(err, StoreError::NotFound(RequestId(99))));
}
