//! Per-execution log buffer.
//!
//! Handler log lines are emitted as `tracing` events immediately and queued
//! for the platform's log sink. The queue is shipped in batches when the
//! execution closes; the flush callback runs at [`LOG_FLUSH_PRIORITY`] so it
//! observes every line written by earlier teardown callbacks.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use skiff_datalog::edn::encode;
use skiff_datalog::transport::send_text;
use skiff_datalog::{HttpClient, Record, RetryPolicy, Value, retry};
use skiff_types::{CompletionCallback, CompletionRegistry};

use crate::error::{Result, RuntimeError};

/// Entries per request to the log sink.
pub const LOG_BATCH_SIZE: usize = 10;

/// Completion priority of the log flush: after everything else.
pub const LOG_FLUSH_PRIORITY: i64 = i64::MAX;

/// Log line severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub text: String,
}

impl From<&LogEntry> for Value {
    fn from(entry: &LogEntry) -> Self {
        Record::new()
            .field("timestamp", entry.timestamp)
            .field("level", Value::keyword(entry.severity.as_str()))
            .field("text", entry.text.as_str())
            .into()
    }
}

/// Remote destination for shipped log lines.
#[derive(Debug, Clone)]
pub struct LogSink {
    pub url: String,
    pub token: Option<String>,
}

/// Cloneable handle to one execution's log buffer.
#[derive(Clone)]
pub struct ExecutionLog {
    inner: Arc<LogInner>,
}

struct LogInner {
    target: Option<(HttpClient, LogSink)>,
    policy: RetryPolicy,
    pending: Mutex<Vec<LogEntry>>,
    shipped: AtomicUsize,
}

impl fmt::Debug for ExecutionLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionLog")
            .field("sink", &self.inner.target.as_ref().map(|(_, sink)| &sink.url))
            .field("pending", &self.inner.pending.lock().len())
            .finish()
    }
}

impl Default for ExecutionLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionLog {
    /// A buffer without a remote sink; flushing only discards.
    pub fn new() -> Self {
        Self::build(None, RetryPolicy::default())
    }

    pub fn with_sink(http: HttpClient, sink: LogSink, policy: RetryPolicy) -> Self {
        Self::build(Some((http, sink)), policy)
    }

    fn build(target: Option<(HttpClient, LogSink)>, policy: RetryPolicy) -> Self {
        Self {
            inner: Arc::new(LogInner {
                target,
                policy,
                pending: Mutex::new(Vec::new()),
                shipped: AtomicUsize::new(0),
            }),
        }
    }

    pub fn log(&self, severity: Severity, text: impl Into<String>) {
        let text = text.into();
        match severity {
            Severity::Debug => tracing::debug!(target: "skiff::execution", "{text}"),
            Severity::Info => tracing::info!(target: "skiff::execution", "{text}"),
            Severity::Warning => tracing::warn!(target: "skiff::execution", "{text}"),
            Severity::Error => tracing::error!(target: "skiff::execution", "{text}"),
        }
        self.inner.pending.lock().push(LogEntry {
            timestamp: Utc::now(),
            severity,
            text,
        });
    }

    pub fn debug(&self, text: impl Into<String>) {
        self.log(Severity::Debug, text);
    }

    pub fn info(&self, text: impl Into<String>) {
        self.log(Severity::Info, text);
    }

    pub fn warn(&self, text: impl Into<String>) {
        self.log(Severity::Warning, text);
    }

    pub fn error(&self, text: impl Into<String>) {
        self.log(Severity::Error, text);
    }

    /// Entries not yet flushed.
    pub fn pending(&self) -> Vec<LogEntry> {
        self.inner.pending.lock().clone()
    }

    /// Entries flushed so far.
    pub fn shipped(&self) -> usize {
        self.inner.shipped.load(Ordering::SeqCst)
    }

    /// Ship all pending entries in batches of [`LOG_BATCH_SIZE`].
    ///
    /// Each batch counts as shipped once its request succeeds. On failure the
    /// unsent entries go back to the front of the queue.
    pub async fn flush(&self) -> Result<usize> {
        let entries = std::mem::take(&mut *self.inner.pending.lock());
        if entries.is_empty() {
            return Ok(0);
        }

        let Some((http, sink)) = &self.inner.target else {
            self.inner.shipped.fetch_add(entries.len(), Ordering::SeqCst);
            return Ok(entries.len());
        };

        let mut sent = 0;
        for batch in entries.chunks(LOG_BATCH_SIZE) {
            if let Err(e) = self.ship_batch(http, sink, batch).await {
                let mut pending = self.inner.pending.lock();
                let newer = std::mem::take(&mut *pending);
                pending.extend_from_slice(&entries[sent..]);
                pending.extend(newer);
                return Err(e);
            }
            sent += batch.len();
            self.inner.shipped.fetch_add(batch.len(), Ordering::SeqCst);
        }
        Ok(sent)
    }

    async fn ship_batch(&self, http: &HttpClient, sink: &LogSink, batch: &[LogEntry]) -> Result<()> {
        let body = encode(
            &Record::new()
                .field("logs", Value::Vector(batch.iter().map(Value::from).collect()))
                .into(),
        )?;
        let body = &body;
        retry(&self.inner.policy, "log flush", || async move {
            let mut request = http
                .post(&sink.url)?
                .header(CONTENT_TYPE, "application/edn")
                .body(body.clone());
            if let Some(token) = &sink.token {
                request = request.header(AUTHORIZATION, format!("Bearer {token}"));
            }
            send_text(request).await
        })
        .await
        .map_err(|e| RuntimeError::Log(e.to_string()))?;
        Ok(())
    }

    /// Flush when `completion` closes, after every other callback.
    pub fn register_flush(&self, completion: &CompletionRegistry) {
        let log = self.clone();
        completion.register(
            CompletionCallback::new(move || async move {
                let count = log.flush().await?;
                tracing::debug!(count, "Flushed execution log");
                Ok(())
            })
            .named("log flush")
            .with_priority(LOG_FLUSH_PRIORITY),
        );
    }
}
