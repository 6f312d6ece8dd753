// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Container registry capability.

use async_trait::async_trait;
use thiserror::Error;

/// Errors from registry operations.
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    /// Transport-layer response status from the registry.
    #[error("registry returned status {0}")]
    Status(u16),
    #[error("registry connection reset")]
    ConnectionReset,
    #[error("image not found: {0}")]
    NotFound(String),
    #[error("malformed image reference: {0}")]
    Malformed(String),
}

/// Capability: push and pull images.
#[async_trait]
pub trait RegistryClient: Send + Sync + 'static {
    /// Push `image` to `destination`; returns the manifest digest.
    async fn push(&self, image: &str, destination: &str) -> Result<String, RegistryError>;

    /// Pull `image` to local storage; returns the local reference.
    async fn pull(&self, image: &str) -> Result<String, RegistryError>;
}
