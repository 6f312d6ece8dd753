// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Batches: sets of co-submitted requests with a derived aggregate state.

use crate::request::RequestState;
use serde::{Deserialize, Serialize};

/// Identifier shared by co-submitted requests.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct BatchId(pub u64);

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for BatchId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Derive a batch's aggregate state from its member states.
///
/// `Complete` only when every member is complete; `Failed` once every member
/// is terminal and at least one failed; `InProgress` while any member is
/// still live. Derivation only — no member's execution ever gates on
/// another's state. An empty batch is vacuously `Complete`.
pub fn batch_state<'a>(members: impl IntoIterator<Item = &'a RequestState>) -> RequestState {
    let mut any_failed = false;
    for state in members {
        if !state.is_terminal() {
            return RequestState::InProgress;
        }
        if *state == RequestState::Failed {
            any_failed = true;
        }
    }
    if any_failed {
        RequestState::Failed
    } else {
        RequestState::Complete
    }
}

#[cfg(test)]
#[path = "batch_tests.rs"]
mod tests;
