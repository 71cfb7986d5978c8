//! Handler-facing error types.

use thiserror::Error;

/// Errors a handler can raise deliberately.
///
/// Handlers return `anyhow::Result`; the dispatcher downcasts to this type
/// to tell an intentional early exit apart from a genuine failure.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Intentional mid-flow exit. Published as a successful completion.
    #[error("Handler interrupted{}", .reason.as_ref().map(|r| format!(": {r}")).unwrap_or_default())]
    Interrupted { reason: Option<String> },

    /// Handler-declared failure.
    #[error("Handler failed: {0}")]
    Failed(String),
}

impl HandlerError {
    /// Interrupt the handler with a reason that becomes the status reason.
    pub fn interrupt(reason: impl Into<String>) -> Self {
        Self::Interrupted {
            reason: Some(reason.into()),
        }
    }

    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Interrupted { .. })
    }
}

/// Result type returned by handlers and steps.
pub type Result<T> = anyhow::Result<T>;
