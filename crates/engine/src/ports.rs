// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Port lock manager: exclusive leases on a bounded pool of host ports.
//!
//! Workers on one host coordinate through lock files in a shared directory;
//! there is no central lock service. `create_new` file creation is the
//! atomic claim — two workers racing for the same port never both observe
//! success. Crash recovery is TTL-only: a worker that died holding a lock
//! leaves a file behind, and the reaper clears it once the TTL elapses.

use crate::classify;
use crate::config::PortPoolConfig;
use crate::retry::{retry, RetryError, RetryPolicy};
use kiln_core::{Clock, LeaseRecord, LeaseState, OwnerToken, ResourceLease};
use std::fs;
use std::io::{ErrorKind, Write};
use std::net::TcpListener;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from lease operations
#[derive(Debug, Error)]
pub enum LeaseError {
    /// Every port in the pool is held by a live lease. Transient: callers
    /// retry with backoff rather than failing the request.
    #[error("no free port in pool after trying {attempts} candidates")]
    PoolExhausted { attempts: usize },
    #[error("lease io: {0}")]
    Io(#[from] std::io::Error),
    #[error("lease record encode: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Hands out exclusive port leases from a configured pool.
pub struct PortLockManager<C: Clock> {
    config: PortPoolConfig,
    clock: C,
}

impl<C: Clock> PortLockManager<C> {
    pub fn new(config: PortPoolConfig, clock: C) -> Self {
        Self { config, clock }
    }

    fn lock_path(&self, port: u16) -> PathBuf {
        self.config.lock_dir.join(format!("kiln_{}_{}.lock", self.config.purpose, port))
    }

    /// Acquire a lease on any free port in the pool.
    ///
    /// Reaps expired locks first, then scans the pool from a rotated start
    /// so concurrent workers spread over the range instead of herding on
    /// the first port. Fails with [`LeaseError::PoolExhausted`] only after
    /// every port has been tried.
    pub fn acquire(&self) -> Result<ResourceLease, LeaseError> {
        self.reap_expired()?;

        let ports: Vec<u16> = self.config.ports().collect();
        let offset = scan_offset(ports.len());
        let mut attempts = 0;
        for index in 0..ports.len() {
            let port = ports[(offset + index) % ports.len()];
            attempts += 1;
            // The serving subprocess would fail the bind anyway; checking
            // here keeps ports held open by unrelated processes out of the
            // pool without consuming a lock file.
            if !port_bindable(port) {
                tracing::debug!(port, "port in use outside the pool, skipping");
                continue;
            }
            if let Some(lease) = self.try_claim(port)? {
                tracing::info!(port, token = %lease.token, "port lease acquired");
                return Ok(lease);
            }
        }
        tracing::warn!(attempts, purpose = %self.config.purpose, "port pool exhausted");
        Err(LeaseError::PoolExhausted { attempts })
    }

    /// Acquire, riding out transient pool exhaustion with backoff.
    pub async fn acquire_with_backoff(
        &self,
        policy: &RetryPolicy,
    ) -> Result<ResourceLease, RetryError<LeaseError>> {
        retry(policy, classify::lease_class, || async { self.acquire() }).await
    }

    /// One atomic claim attempt; `None` means another worker holds the port.
    fn try_claim(&self, port: u16) -> Result<Option<ResourceLease>, LeaseError> {
        let lease = ResourceLease {
            resource_id: port,
            token: OwnerToken::generate(),
            acquired_at_ms: self.clock.epoch_ms(),
            ttl: self.config.ttl,
        };
        match fs::OpenOptions::new().write(true).create_new(true).open(self.lock_path(port)) {
            Ok(mut file) => {
                let record = serde_json::to_vec(&lease.record())?;
                file.write_all(&record)?;
                Ok(Some(lease))
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Idempotent release: clears the lock only while it still carries this
    /// lease's token. A lock already released, or expired and re-acquired
    /// by another worker, is left alone.
    pub fn release(&self, lease: &ResourceLease) -> Result<(), LeaseError> {
        let path = self.lock_path(lease.resource_id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_slice::<LeaseRecord>(&bytes) {
            Ok(record) if record.token == lease.token => {
                fs::remove_file(&path)?;
                tracing::debug!(port = lease.resource_id, "port lease released");
            }
            Ok(_) => {
                tracing::debug!(port = lease.resource_id,
                    "lock no longer carries our token, not releasing");
            }
            // Unreadable lock files are the reaper's problem.
            Err(_) => {}
        }
        Ok(())
    }

    /// Clear locks whose TTL has elapsed. Never touches a live lease, even
    /// if the owning worker looks stalled: a port still in genuine use
    /// must not be double-bound.
    pub fn reap_expired(&self) -> Result<(), LeaseError> {
        let now_ms = self.clock.epoch_ms();
        for port in self.config.ports() {
            let path = self.lock_path(port);
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            match serde_json::from_slice::<LeaseRecord>(&bytes) {
                Ok(record) => match record.state(now_ms) {
                    LeaseState::Expired { token } => {
                        tracing::info!(port, %token, "reaping expired port lock");
                        remove_if_present(&path)?;
                    }
                    LeaseState::Live { .. } | LeaseState::Free => {}
                },
                // A torn write from a crashed worker. Only reapable once the
                // file has sat there a full TTL window.
                Err(_) => {
                    if file_older_than(&path, self.config.ttl) {
                        tracing::warn!(port, "reaping unreadable port lock");
                        remove_if_present(&path)?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn remove_if_present(path: &std::path::Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

fn file_older_than(path: &std::path::Path, ttl: std::time::Duration) -> bool {
    let Ok(meta) = fs::metadata(path) else { return false };
    let Ok(modified) = meta.modified() else { return false };
    modified.elapsed().map(|age| age >= ttl).unwrap_or(false)
}

fn port_bindable(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// Rotated scan start, decorrelating concurrent workers.
fn scan_offset(len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    let seed = std::time::SystemTime::now()
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as usize;
    seed % len
}

#[cfg(test)]
#[path = "ports_tests.rs"]
mod tests;
