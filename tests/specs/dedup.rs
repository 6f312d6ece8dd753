// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Duplicate-submission specs.
//!
//! Two requests with the same dedup key submitted inside the claim window
//! must produce exactly one execution, with both reaching identical
//! terminal outcomes.

use crate::prelude::*;
use kiln_adapters::CatalogError;
use kiln_core::{RequestKind, RequestState};

#[tokio::test]
async fn identical_requests_share_one_execution_and_outcome() {
    let stack = Stack::new(56111, 4);
    let svc = stack.service();
    let a = stack.enqueue(RequestKind::Add, add_payload("registry.test/index:v4.15"));
    let b = stack.enqueue(RequestKind::Add, add_payload("registry.test/index:v4.15"));

    stack.worker("worker-1").drain().await.unwrap();

    let a = svc.get(a).unwrap();
    let b = svc.get(b).unwrap();
    assert_eq!(a.state, RequestState::Complete);
    assert_eq!(b.state, RequestState::Complete);
    assert_eq!(a.artifact_reference, b.artifact_reference);
    assert!(a.artifact_reference.is_some());

    // One catalog mutation, one registry push, two notices.
    assert_eq!(stack.catalog.calls().len(), 1);
    assert_eq!(stack.registry.pushes().len(), 1);
    assert_eq!(stack.sink.notices().len(), 2);
}

#[tokio::test]
async fn duplicates_inherit_the_primary_failure() {
    let stack = Stack::new(56121, 4);
    let svc = stack.service();
    stack.catalog.push_result(Err(CatalogError::Malformed("bad bundle list".to_string())));

    let a = stack.enqueue(RequestKind::Add, add_payload("registry.test/index:v4.15"));
    let b = stack.enqueue(RequestKind::Add, add_payload("registry.test/index:v4.15"));

    stack.worker("worker-1").drain().await.unwrap();

    let a = svc.get(a).unwrap();
    let b = svc.get(b).unwrap();
    assert_eq!(a.state, RequestState::Failed);
    assert_eq!(b.state, RequestState::Failed);
    assert_eq!(a.error_message, b.error_message);
    assert_eq!(stack.catalog.calls().len(), 1);
}

#[tokio::test]
async fn dedup_window_closes_at_terminal_state() {
    let stack = Stack::new(56131, 4);
    let svc = stack.service();
    let a = stack.enqueue(RequestKind::Add, add_payload("registry.test/index:v4.15"));
    stack.worker("worker-1").drain().await.unwrap();
    assert_eq!(svc.get(a).unwrap().state, RequestState::Complete);

    // Same payload again after the first terminated: a fresh, independent
    // execution.
    let c = stack.enqueue(RequestKind::Add, add_payload("registry.test/index:v4.15"));
    stack.worker("worker-1").drain().await.unwrap();

    assert_eq!(svc.get(c).unwrap().state, RequestState::Complete);
    assert_eq!(stack.catalog.calls().len(), 2);
}
