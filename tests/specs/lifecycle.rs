// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Full request lifecycle specs: enqueue through terminal notification.

use crate::prelude::*;
use kiln_core::{BatchId, RequestKind, RequestState};
use kiln_storage::RequestFilter;

#[tokio::test]
async fn request_travels_queued_in_progress_complete() {
    let stack = Stack::new(56011, 4);
    let svc = stack.service();
    let id = stack.enqueue(RequestKind::Add, add_payload("registry.test/index:v4.15"));

    assert_eq!(svc.get(id).unwrap().state, RequestState::Queued);

    let worker = stack.worker("worker-1");
    assert_eq!(worker.run_once().await.unwrap(), Some(id));

    let req = svc.get(id).unwrap();
    assert_eq!(req.state, RequestState::Complete);
    assert!(req.artifact_reference.is_some());
    assert!(req.error_message.is_none());

    // The status surface never shows a stuck request: terminal state plus a
    // full transition history.
    let states: Vec<RequestState> = req.state_history.iter().map(|e| e.state).collect();
    assert_eq!(states[0], RequestState::Queued);
    assert_eq!(*states.last().unwrap(), RequestState::Complete);

    let notices = stack.sink.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].request_id, id);
}

#[tokio::test]
async fn batch_state_follows_member_outcomes() {
    let stack = Stack::new(56021, 4);
    let svc = stack.service();
    let batch = BatchId(1);

    let a = stack.enqueue_in_batch(
        RequestKind::Add,
        add_payload("registry.test/index:v4.15"),
        batch,
    );
    let b = stack.enqueue_in_batch(
        RequestKind::Remove,
        serde_json::json!({"from_index": "registry.test/index:v4.16", "operators": ["etcd"]}),
        batch,
    );
    assert_eq!(svc.batch_state(batch), Some(RequestState::InProgress));

    let worker = stack.worker("worker-1");
    worker.drain().await.unwrap();

    assert_eq!(svc.get(a).unwrap().state, RequestState::Complete);
    assert_eq!(svc.get(b).unwrap().state, RequestState::Complete);
    assert_eq!(svc.batch_state(batch), Some(RequestState::Complete));
}

#[tokio::test]
async fn failed_member_fails_the_batch_once_terminal() {
    let stack = Stack::new(56031, 4);
    let svc = stack.service();
    let batch = BatchId(2);

    stack.enqueue_in_batch(RequestKind::Add, add_payload("registry.test/index:v4.15"), batch);
    // Second member is missing its operator list and will fail fast.
    stack.enqueue_in_batch(
        RequestKind::Remove,
        serde_json::json!({"from_index": "registry.test/index:v4.16"}),
        batch,
    );

    stack.worker("worker-1").drain().await.unwrap();
    assert_eq!(svc.batch_state(batch), Some(RequestState::Failed));

    let failed = svc.list(&RequestFilter {
        state: Some(RequestState::Failed),
        batch_id: Some(batch),
        ..Default::default()
    });
    assert_eq!(failed.len(), 1);
    assert!(failed[0].error_message.as_deref().unwrap().contains("operators"));
}

#[tokio::test(start_paused = true)]
async fn worker_loop_runs_until_cancelled() {
    let stack = Stack::new(56051, 4);
    let worker = stack.worker("worker-1");
    let shutdown = tokio_util::sync::CancellationToken::new();

    let handle = tokio::spawn({
        let token = shutdown.clone();
        async move { worker.run(token).await }
    });

    let svc = stack.service();
    let id = stack.enqueue(RequestKind::Add, add_payload("registry.test/index:v4.15"));
    while !svc.get(id).unwrap().state.is_terminal() {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    assert_eq!(svc.get(id).unwrap().state, RequestState::Complete);

    shutdown.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn two_workers_split_a_queue_without_double_processing() {
    let stack = Stack::new(56041, 4);
    for i in 0..6 {
        stack.enqueue(RequestKind::Add, add_payload(&format!("registry.test/index:v{i}")));
    }

    let w1 = stack.worker("worker-1");
    let w2 = stack.worker("worker-2");
    let (n1, n2) = tokio::join!(w1.drain(), w2.drain());
    assert_eq!(n1.unwrap() + n2.unwrap(), 6);

    // Every request executed exactly once.
    assert_eq!(stack.catalog.calls().len(), 6);
    assert_eq!(stack.sink.notices().len(), 6);
}
