//! Prioritized teardown callbacks run when an execution closes.
//!
//! Callbacks run sequentially in ascending priority order (ties keep
//! registration order). A failing or panicking callback is logged and
//! skipped; it never prevents later callbacks from running.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;

/// Priority assigned when the caller does not choose one.
pub const DEFAULT_PRIORITY: i64 = 100;

/// Future produced by a completion callback.
pub type CompletionFuture = BoxFuture<'static, anyhow::Result<()>>;

/// A teardown action registered against an execution.
pub struct CompletionCallback {
    name: Option<String>,
    priority: i64,
    callback: Box<dyn FnOnce() -> CompletionFuture + Send>,
}

impl CompletionCallback {
    /// Wrap an async closure with the default priority.
    pub fn new<F, Fut>(callback: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            name: None,
            priority: DEFAULT_PRIORITY,
            callback: Box::new(move || callback().boxed()),
        }
    }

    /// Label used in log lines when the callback fails.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Lower values run earlier.
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn priority(&self) -> i64 {
        self.priority
    }
}

impl fmt::Debug for CompletionCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionCallback")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// Outcome counts of one [`CompletionRegistry::close`] run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloseReport {
    pub completed: usize,
    pub failed: usize,
}

/// Shared, cloneable queue of completion callbacks for one execution.
#[derive(Clone, Default)]
pub struct CompletionRegistry {
    callbacks: Arc<Mutex<Vec<CompletionCallback>>>,
}

impl CompletionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback.
    pub fn register(&self, callback: CompletionCallback) {
        tracing::trace!(
            callback = callback.name().unwrap_or("anonymous"),
            priority = callback.priority,
            "Registered completion callback"
        );
        self.callbacks.lock().push(callback);
    }

    /// Number of callbacks waiting to run.
    pub fn len(&self) -> usize {
        self.callbacks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.lock().is_empty()
    }

    /// Run every registered callback exactly once.
    ///
    /// The lowest-priority pending callback is taken on each turn, so a
    /// callback registered while closing still runs in priority order
    /// relative to the ones not yet run. Never fails; failures are logged
    /// and counted in the report.
    pub async fn close(&self) -> CloseReport {
        let mut report = CloseReport::default();
        while let Some(callback) = self.take_next() {
            if run_callback(callback).await {
                report.completed += 1;
            } else {
                report.failed += 1;
            }
        }
        report
    }

    /// Remove the pending callback with the lowest priority, earliest
    /// registered on ties.
    fn take_next(&self) -> Option<CompletionCallback> {
        let mut callbacks = self.callbacks.lock();
        let index = callbacks
            .iter()
            .enumerate()
            .min_by_key(|(_, cb)| cb.priority)
            .map(|(index, _)| index)?;
        Some(callbacks.remove(index))
    }
}

impl fmt::Debug for CompletionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionRegistry")
            .field("pending", &self.len())
            .finish()
    }
}

async fn run_callback(callback: CompletionCallback) -> bool {
    let CompletionCallback {
        name,
        priority,
        callback,
    } = callback;
    let name = name.unwrap_or_else(|| "anonymous".to_string());

    let future = match std::panic::catch_unwind(AssertUnwindSafe(callback)) {
        Ok(future) => future,
        Err(panic) => {
            tracing::error!(
                callback = %name,
                priority,
                panic = %panic_message(panic.as_ref()),
                "Completion callback panicked"
            );
            return false;
        }
    };

    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::warn!(callback = %name, priority, error = %e, "Completion callback failed");
            false
        }
        Err(panic) => {
            tracing::error!(
                callback = %name,
                priority,
                panic = %panic_message(panic.as_ref()),
                "Completion callback panicked"
            );
            false
        }
    }
}

/// Best-effort text of a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
