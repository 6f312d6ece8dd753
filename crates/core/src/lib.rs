// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! kiln-core: domain types for the kiln index build orchestrator

pub mod macros;

pub mod batch;
pub mod clock;
pub mod lease;
pub mod pipeline;
pub mod request;
pub mod worker;

pub use batch::{batch_state, BatchId};
pub use clock::{Clock, FakeClock, SystemClock};
pub use lease::{LeaseRecord, LeaseState, OwnerToken, ResourceLease};
pub use pipeline::{ChangeRef, PipelineRun, PipelineStatus};
#[cfg(any(test, feature = "test-support"))]
pub use request::BuildRequestBuilder;
pub use request::{
    BuildRequest, DedupKey, RequestId, RequestKind, RequestState, StateEntry, TransitionError,
};
pub use worker::WorkerId;
