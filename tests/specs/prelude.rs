// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixture for the scenario specs.

use kiln_adapters::test_support::{
    CollectingNotifySink, FakeCatalogTool, FakePipelineBackend, FakeRegistry,
};
use kiln_core::{BatchId, FakeClock, RequestId, RequestKind, WorkerId};
use kiln_engine::{
    PortPoolConfig, ReconcileConfig, Reconciler, RetryPolicy, Runtime, RuntimeConfig, RuntimeDeps,
    Service,
};
use kiln_engine::PortLockManager;
use kiln_storage::MemoryStore;
use std::sync::Arc;
use std::time::Duration;

pub type SpecRuntime = Runtime<
    MemoryStore,
    FakeCatalogTool,
    FakeRegistry,
    FakePipelineBackend,
    CollectingNotifySink,
    FakeClock,
>;

/// Whole-stack fixture with scripted collaborators.
pub struct Stack {
    pub store: Arc<MemoryStore>,
    pub catalog: FakeCatalogTool,
    pub registry: FakeRegistry,
    pub backend: FakePipelineBackend,
    pub sink: CollectingNotifySink,
    pub clock: FakeClock,
    pub lock_dir: tempfile::TempDir,
    first_port: u16,
    pool_size: u16,
}

impl Stack {
    /// Each spec passes its own port range; specs run in parallel and must
    /// not contend on real TCP binds.
    pub fn new(first_port: u16, pool_size: u16) -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            catalog: FakeCatalogTool::new(),
            registry: FakeRegistry::new(),
            backend: FakePipelineBackend::new(),
            sink: CollectingNotifySink::new(),
            clock: FakeClock::new(),
            lock_dir: tempfile::tempdir().expect("tempdir"),
            first_port,
            pool_size,
        }
    }

    pub fn service(&self) -> Service<MemoryStore, FakeClock> {
        Service::new(Arc::clone(&self.store), self.clock.clone())
    }

    pub fn worker(&self, name: &str) -> SpecRuntime {
        let ports = PortLockManager::new(
            PortPoolConfig::default()
                .first_port(self.first_port)
                .last_port(self.first_port + self.pool_size - 1)
                .lock_dir(self.lock_dir.path())
                .ttl(Duration::from_secs(60)),
            self.clock.clone(),
        );
        let reconciler = Reconciler::new(
            self.backend.clone(),
            ReconcileConfig::default()
                .poll_interval(Duration::from_secs(5))
                .deadline(Duration::from_secs(30))
                .retry(no_jitter()),
            self.clock.clone(),
        );
        Runtime::new(
            Arc::clone(&self.store),
            RuntimeDeps {
                catalog: self.catalog.clone(),
                registry: self.registry.clone(),
                notifier: self.sink.clone(),
            },
            ports,
            reconciler,
            RuntimeConfig::default()
                .lease_acquire(no_jitter().base_delay(Duration::from_millis(250)))
                .io_retry(no_jitter()),
            WorkerId::new(name),
            self.clock.clone(),
        )
    }

    pub fn enqueue(&self, kind: RequestKind, payload: serde_json::Value) -> RequestId {
        self.service().enqueue(kind, payload, None)
    }

    pub fn enqueue_in_batch(
        &self,
        kind: RequestKind,
        payload: serde_json::Value,
        batch: BatchId,
    ) -> RequestId {
        self.service().enqueue(kind, payload, Some(batch))
    }
}

fn no_jitter() -> RetryPolicy {
    RetryPolicy::default().max_jitter(Duration::ZERO)
}

pub fn add_payload(index: &str) -> serde_json::Value {
    serde_json::json!({"from_index": index, "bundles": ["registry.test/bundle:v1"]})
}
