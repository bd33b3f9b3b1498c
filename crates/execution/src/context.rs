//! Per-batch invocation context.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Per-batch invocation context.
#[derive(Debug, Clone, Default)]
pub struct InvocationContext {
    /// Fired by the endpoint when the caller abandons the batch.
    pub cancel: CancellationToken,

    /// Correlation id carried into log records.
    pub request_id: Option<String>,
}

impl InvocationContext {
    /// Context observing an existing cancellation token.
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            request_id: None,
        }
    }

    /// Attach a correlation id.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Whether the batch was abandoned.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Context shared between the endpoint and a blocking invocation task.
pub type SharedInvocationContext = Arc<InvocationContext>;
