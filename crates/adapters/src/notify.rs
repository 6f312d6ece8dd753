// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Terminal-state notification fanout.

use async_trait::async_trait;
use kiln_core::{BatchId, RequestId, RequestState};
use serde::Serialize;
use thiserror::Error;

/// Errors from notify operations
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Payload emitted on every terminal request transition.
#[derive(Debug, Clone, Serialize)]
pub struct TerminalNotice {
    pub request_id: RequestId,
    pub batch_id: Option<BatchId>,
    pub state: RequestState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Adapter for delivering terminal notices.
///
/// Delivery is fire-and-forget: the runtime logs failures and never fails a
/// request over them.
#[async_trait]
pub trait NotifySink: Send + Sync + 'static {
    async fn notify(&self, notice: &TerminalNotice) -> Result<(), NotifyError>;
}

/// Notification sink that writes notices to the log stream.
///
/// The default in deployments without a message bus; the structured payload
/// makes the log line scrapeable.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifySink;

#[async_trait]
impl NotifySink for LogNotifySink {
    async fn notify(&self, notice: &TerminalNotice) -> Result<(), NotifyError> {
        let payload = serde_json::to_string(notice)
            .map_err(|e| NotifyError::SendFailed(e.to_string()))?;
        tracing::info!(request_id = %notice.request_id, state = %notice.state, %payload,
            "terminal notice");
        Ok(())
    }
}

#[cfg(test)]
#[path = "notify_tests.rs"]
mod tests;
