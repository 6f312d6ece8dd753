// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Catalog mutation capability.

use async_trait::async_trait;
use thiserror::Error;

/// Errors from catalog tool invocations.
///
/// Variants carry enough shape for the engine's retry classifier to sort
/// retryable from fatal; the raw tool output stays out of error messages.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    /// The serving/tool endpoint answered with an HTTP-like status.
    #[error("catalog tool returned status {0}")]
    Status(u16),
    /// Connection dropped mid-operation.
    #[error("catalog tool connection reset")]
    ConnectionReset,
    /// The requested bundle/operator does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The operation input is invalid; retrying cannot help.
    #[error("malformed catalog operation: {0}")]
    Malformed(String),
}

/// One declarative mutation against a catalog.
///
/// The verb and argument schema belong to the tool; the core only threads
/// them through and keys idempotency on the returned content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogOperation {
    pub verb: String,
    pub args: serde_json::Value,
}

impl CatalogOperation {
    pub fn new(verb: impl Into<String>, args: serde_json::Value) -> Self {
        Self { verb: verb.into(), args }
    }
}

/// Capability: mutate a catalog, returning the content hash of the result.
///
/// Implementations must be idempotent per (catalog_ref, operation): re-running
/// an already-applied mutation returns the same content hash.
#[async_trait]
pub trait CatalogTool: Send + Sync + 'static {
    async fn mutate(
        &self,
        catalog_ref: &str,
        operation: &CatalogOperation,
    ) -> Result<String, CatalogError>;
}
