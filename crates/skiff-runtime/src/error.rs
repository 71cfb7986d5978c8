//! Runtime error types.

use skiff_types::TriggerKind;
use thiserror::Error;

/// Result type alias using the runtime error type.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Error type for runtime operations.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// No handler is registered for the trigger.
    #[error("No {kind} handler found for '{name}'")]
    HandlerNotFound { kind: TriggerKind, name: String },

    /// The payload lacks data the runtime needs.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Query, transact or transport failure.
    #[error("Datalog error: {0}")]
    Datalog(#[from] skiff_datalog::DatalogError),

    /// A status could not be published.
    #[error("Status publish failed: {0}")]
    Status(String),

    /// Remote log delivery failed.
    #[error("Log flush failed: {0}")]
    Log(String),

    /// Invalid runtime configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Collaborator failure (project loader, storage).
    #[error("{0}")]
    Collaborator(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RuntimeError {
    pub fn collaborator(msg: impl Into<String>) -> Self {
        Self::Collaborator(msg.into())
    }
}
