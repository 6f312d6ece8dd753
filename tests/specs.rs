// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace-level scenario specs.
//!
//! Each module drives the full stack — service, store, runtime, fake
//! adapters — through one end-to-end scenario from the orchestration
//! contract.

#[path = "specs/prelude.rs"]
mod prelude;

#[path = "specs/contention.rs"]
mod contention;
#[path = "specs/dedup.rs"]
mod dedup;
#[path = "specs/lifecycle.rs"]
mod lifecycle;
