//! Execution status reported back to the platform.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    Queued,
    Running,
    Completed,
    Retryable,
    Failed,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Retryable => "retryable",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A status published for an execution or returned by a handler or step.
///
/// `abort` is local control flow only: it stops step processing early and is
/// never sent over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub state: State,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip)]
    pub abort: bool,
}

impl Status {
    pub fn new(state: State) -> Self {
        Self {
            state,
            reason: None,
            abort: false,
        }
    }

    pub fn completed() -> Self {
        Self::new(State::Completed)
    }

    pub fn failed() -> Self {
        Self::new(State::Failed)
    }

    pub fn running() -> Self {
        Self::new(State::Running)
    }

    /// Attach a human-readable reason.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Mark the status as aborting further step processing.
    pub fn abort(mut self) -> Self {
        self.abort = true;
        self
    }

    pub fn is_failed(&self) -> bool {
        self.state == State::Failed
    }
}
