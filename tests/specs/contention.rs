// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Port-pool contention specs.

use crate::prelude::*;
use kiln_core::{RequestKind, RequestState};
use kiln_engine::{LeaseError, PortLockManager, PortPoolConfig, RetryPolicy};
use std::time::Duration;

#[test]
fn pool_of_one_serializes_two_holders() {
    let stack = Stack::new(56211, 1);
    let config = PortPoolConfig::default()
        .first_port(56211)
        .last_port(56211)
        .lock_dir(stack.lock_dir.path())
        .ttl(Duration::from_secs(60));
    let m1 = PortLockManager::new(config.clone(), stack.clock.clone());
    let m2 = PortLockManager::new(config, stack.clock.clone());

    let lease = m1.acquire().expect("first acquire");
    assert!(matches!(m2.acquire(), Err(LeaseError::PoolExhausted { .. })));

    m1.release(&lease).expect("release");
    let second = m2.acquire().expect("second acquire after release");
    assert_eq!(second.resource_id, 56211);
}

#[tokio::test(start_paused = true)]
async fn workers_ride_out_pool_pressure_with_backoff() {
    // Pool of one port, two workers, two catalog builds: the loser of the
    // port race backs off and completes once the winner releases.
    let stack = Stack::new(56221, 1);
    stack.enqueue(RequestKind::Add, add_payload("registry.test/index:v4.15"));
    stack.enqueue(RequestKind::Add, add_payload("registry.test/index:v4.16"));

    let w1 = stack.worker("worker-1");
    let w2 = stack.worker("worker-2");
    let (n1, n2) = tokio::join!(w1.drain(), w2.drain());
    assert_eq!(n1.unwrap() + n2.unwrap(), 2);

    let svc = stack.service();
    for req in svc.list(&Default::default()) {
        assert_eq!(req.state, RequestState::Complete, "request {} stuck", req.id);
    }
    assert_eq!(stack.catalog.calls().len(), 2);

    // Nothing left locked.
    assert_eq!(std::fs::read_dir(stack.lock_dir.path()).unwrap().count(), 0);
}

#[tokio::test(start_paused = true)]
async fn exhausted_lease_budget_fails_only_that_request() {
    // One port, held outside the worker pool for the whole test: the
    // request exhausts its lease budget and fails with a clear message.
    let stack = Stack::new(56231, 1);
    let config = PortPoolConfig::default()
        .first_port(56231)
        .last_port(56231)
        .lock_dir(stack.lock_dir.path())
        .ttl(Duration::from_secs(60));
    let holder = PortLockManager::new(config, stack.clock.clone());
    let _held = holder.acquire().expect("hold the only port");

    let id = stack.enqueue(RequestKind::Add, add_payload("registry.test/index:v4.15"));
    stack.worker("worker-1").drain().await.unwrap();

    let req = stack.service().get(id).unwrap();
    assert_eq!(req.state, RequestState::Failed);
    assert!(
        req.error_message.as_deref().unwrap().starts_with("no free catalog port"),
        "unexpected message: {:?}",
        req.error_message
    );
}

#[test]
fn lease_budget_policy_is_tunable_per_deployment() {
    // The backoff budget for pool pressure is plain config, not a constant.
    let policy = RetryPolicy::default()
        .max_attempts(10)
        .base_delay(Duration::from_millis(100))
        .max_jitter(Duration::from_millis(50));
    assert_eq!(policy.max_attempts, 10);
    assert!(policy.delay_for(1) >= Duration::from_millis(100));
}
