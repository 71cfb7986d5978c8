//! Fact ingestion and retraction.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use skiff_types::{CompletionCallback, CompletionRegistry};

use crate::edn::{Record, Value, encode};
use crate::entity::fact_count;
use crate::error::{DatalogError, Result};
use crate::retry::{RetryPolicy, retry};
use crate::transport::{HttpClient, MessagePublisher, send_text};

/// Where transactions are delivered.
#[derive(Clone)]
pub enum TransactTarget {
    /// Publish a JSON envelope to a message-bus topic.
    Topic(Arc<dyn MessagePublisher>),
    /// POST an EDN document to the execution's transaction endpoint.
    Http { url: String, token: String },
}

impl std::fmt::Debug for TransactTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Topic(_) => f.write_str("Topic"),
            Self::Http { url, .. } => f.debug_struct("Http").field("url", url).finish(),
        }
    }
}

/// Transaction options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactOptions {
    /// Tag the batch with the correlation id as ordering key.
    pub ordering: bool,
}

impl Default for TransactOptions {
    fn default() -> Self {
        Self { ordering: true }
    }
}

impl TransactOptions {
    pub fn unordered() -> Self {
        Self { ordering: false }
    }
}

/// Usage totals across all transactions of one client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransactStats {
    pub entities: u64,
    pub facts: u64,
}

#[derive(Serialize)]
struct Team<'a> {
    id: &'a str,
}

#[derive(Serialize)]
struct IngestionMessage<'a> {
    api_version: &'static str,
    correlation_id: &'a str,
    team: Team<'a>,
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    entities: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    query: Option<&'a str>,
}

pub(crate) struct Transactor {
    target: Option<TransactTarget>,
    http: HttpClient,
    policy: RetryPolicy,
    correlation_id: String,
    workspace_id: String,
    completion: Option<CompletionRegistry>,
    stats: Arc<Mutex<TransactStats>>,
    stats_registered: AtomicBool,
}

impl Transactor {
    pub(crate) fn new(
        target: Option<TransactTarget>,
        http: HttpClient,
        policy: RetryPolicy,
        correlation_id: String,
        workspace_id: String,
        completion: Option<CompletionRegistry>,
    ) -> Self {
        Self {
            target,
            http,
            policy,
            correlation_id,
            workspace_id,
            completion,
            stats: Arc::new(Mutex::new(TransactStats::default())),
            stats_registered: AtomicBool::new(false),
        }
    }

    pub(crate) fn stats(&self) -> TransactStats {
        *self.stats.lock()
    }

    pub(crate) async fn transact(&self, records: Vec<Record>, options: TransactOptions) -> Result<()> {
        let invalid: Vec<String> = records
            .iter()
            .filter(|r| !r.undefined_keys().is_empty())
            .map(|r| r.undefined_keys().join(", "))
            .collect();
        if !invalid.is_empty() {
            tracing::debug!(attributes = ?invalid, "Entities with undefined attributes");
            return Err(DatalogError::Validation(
                "Entities with undefined attributes detected".to_string(),
            ));
        }
        if records.is_empty() {
            return Ok(());
        }
        let target = self.target()?;

        self.register_stats();
        {
            let mut stats = self.stats.lock();
            stats.entities += records.len() as u64;
            stats.facts += records.iter().map(|r| fact_count(r) as u64).sum::<u64>();
        }

        let entities = encode(&Value::Vector(records.into_iter().map(Value::Record).collect()))?;
        let ordering_key = options.ordering.then_some(self.correlation_id.as_str());

        match target {
            TransactTarget::Topic(publisher) => {
                let message = IngestionMessage {
                    api_version: "1",
                    correlation_id: &self.correlation_id,
                    team: Team {
                        id: &self.workspace_id,
                    },
                    kind: "facts_ingestion",
                    entities: Some(&entities),
                    query: None,
                };
                self.publish(publisher.as_ref(), &message, ordering_key).await
            }
            TransactTarget::Http { url, token } => {
                let document = Record::new().field(
                    "transactions",
                    vec![
                        Record::new()
                            .field("data", Value::raw(entities))
                            .maybe("ordering-key", ordering_key),
                    ],
                );
                self.post(url, token, encode(&document.into())?).await
            }
        }
    }

    pub(crate) async fn retract(&self, query: &str, options: TransactOptions) -> Result<()> {
        let target = self.target()?;
        let ordering_key = options.ordering.then_some(self.correlation_id.as_str());
        match target {
            TransactTarget::Topic(publisher) => {
                let message = IngestionMessage {
                    api_version: "1",
                    correlation_id: &self.correlation_id,
                    team: Team {
                        id: &self.workspace_id,
                    },
                    kind: "facts_retraction",
                    entities: None,
                    query: Some(query),
                };
                self.publish(publisher.as_ref(), &message, ordering_key).await
            }
            TransactTarget::Http { url, token } => {
                let document = Record::new().field(
                    "retractions",
                    vec![
                        Record::new()
                            .field("query", query)
                            .maybe("ordering-key", ordering_key),
                    ],
                );
                self.post(url, token, encode(&document.into())?).await
            }
        }
    }

    fn target(&self) -> Result<&TransactTarget> {
        self.target.as_ref().ok_or_else(|| {
            DatalogError::Config("no transaction target configured".to_string())
        })
    }

    fn register_stats(&self) {
        if self.stats_registered.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(completion) = &self.completion else {
            return;
        };
        let stats = self.stats.clone();
        completion.register(
            CompletionCallback::new(move || async move {
                let stats = *stats.lock();
                tracing::debug!(
                    entities = stats.entities,
                    facts = stats.facts,
                    "Transaction stats"
                );
                Ok(())
            })
            .named("transaction stats"),
        );
    }

    async fn publish(
        &self,
        publisher: &dyn MessagePublisher,
        message: &IngestionMessage<'_>,
        ordering_key: Option<&str>,
    ) -> Result<()> {
        let data = serde_json::to_vec(message)?;
        let start = std::time::Instant::now();
        let id = publisher.publish(&data, ordering_key).await?;
        tracing::debug!(
            message_id = %id,
            kind = message.kind,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Sent transaction message"
        );
        Ok(())
    }

    async fn post(&self, url: &str, token: &str, body: String) -> Result<()> {
        let (http, body) = (&self.http, &body);
        retry(&self.policy, "datalog transact", || async move {
            let request = http
                .post(url)?
                .header(AUTHORIZATION, format!("Bearer {token}"))
                .header(CONTENT_TYPE, "application/edn")
                .body(body.clone());
            send_text(request).await
        })
        .await?;
        Ok(())
    }
}
