// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resource leases: exclusive, time-bounded claims on numbered resources.
//!
//! A lease's liveness is a total tagged union over three cases —
//! [`LeaseState::Free`], [`LeaseState::Live`], [`LeaseState::Expired`] — so
//! reaping logic is a match, not a chain of null checks.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::time::Duration;

/// Opaque token identifying the holder of a lease.
///
/// Format: `own-{nanoid}`, 23 characters total (fits SmolStr inline).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerToken(SmolStr);

impl OwnerToken {
    pub const PREFIX: &'static str = "own-";

    /// Generate a new random token.
    pub fn generate() -> Self {
        Self(SmolStr::new(format!("{}{}", Self::PREFIX, nanoid::nanoid!(19))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OwnerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OwnerToken {
    fn from(s: &str) -> Self {
        Self(SmolStr::new(s))
    }
}

impl PartialEq<str> for OwnerToken {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

/// Durable payload of a lease, as written to the lock store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseRecord {
    pub token: OwnerToken,
    pub acquired_at_ms: u64,
    pub ttl_ms: u64,
}

impl LeaseRecord {
    pub fn new(token: OwnerToken, acquired_at_ms: u64, ttl: Duration) -> Self {
        Self { token, acquired_at_ms, ttl_ms: ttl.as_millis() as u64 }
    }

    /// Epoch ms at which the lease stops being live.
    pub fn expires_at_ms(&self) -> u64 {
        self.acquired_at_ms.saturating_add(self.ttl_ms)
    }

    /// Classify this record at the given instant.
    pub fn state(&self, now_ms: u64) -> LeaseState {
        if now_ms < self.expires_at_ms() {
            LeaseState::Live { token: self.token.clone(), expires_at_ms: self.expires_at_ms() }
        } else {
            LeaseState::Expired { token: self.token.clone() }
        }
    }
}

/// Liveness of one numbered resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseState {
    /// No lease recorded.
    Free,
    /// Held; must not be reaped before `expires_at_ms`.
    Live { token: OwnerToken, expires_at_ms: u64 },
    /// TTL elapsed; safe to reclaim.
    Expired { token: OwnerToken },
}

impl LeaseState {
    /// Classify an optional record: absence is `Free`.
    pub fn of(record: Option<&LeaseRecord>, now_ms: u64) -> Self {
        match record {
            None => LeaseState::Free,
            Some(rec) => rec.state(now_ms),
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, LeaseState::Live { .. })
    }
}

/// An exclusive claim on one numbered resource (a port), held by a worker
/// for the duration of a local catalog operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLease {
    pub resource_id: u16,
    pub token: OwnerToken,
    pub acquired_at_ms: u64,
    pub ttl: Duration,
}

impl ResourceLease {
    /// The record this lease persists as.
    pub fn record(&self) -> LeaseRecord {
        LeaseRecord::new(self.token.clone(), self.acquired_at_ms, self.ttl)
    }
}

#[cfg(test)]
#[path = "lease_tests.rs"]
mod tests;
