//! Query/transact client.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde_json::Value as Json;
use skiff_types::{CompletionRegistry, IncomingPayload, SkillDescriptor};
use uuid::Uuid;

use crate::cache::ResponseCache;
use crate::edn::{self, Record, Value};
use crate::error::{DatalogError, Result};
use crate::map::{normalize_tuples, to_seq};
use crate::query::{Params, QueryMode, QueryOptions, prepare_batch_body, prepare_query_body};
use crate::retry::{RetryPolicy, retry};
use crate::transact::{TransactOptions, TransactStats, TransactTarget, Transactor};
use crate::transport::{DEFAULT_TIMEOUT, HttpClient, send_text};

/// Production query endpoint.
pub const PRODUCTION_ENDPOINT: &str = "https://api.atomist.com/datalog";

/// Staging query endpoint.
pub const STAGING_ENDPOINT: &str = "https://api-staging.atomist.services/datalog";

/// Query option defaults applied to every query of one client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryDefaults {
    pub tx: Option<i64>,
    pub configuration_name: Option<String>,
}

impl QueryDefaults {
    /// Defaults for an execution: subscriptions and sync requests that carry
    /// an `after-basis-t` query from that basis, as the triggering
    /// configuration.
    pub fn from_payload(payload: &IncomingPayload) -> Self {
        let Some(trigger) = payload.query_trigger() else {
            return Self::default();
        };
        let Some(after) = trigger.after_basis_t else {
            return Self::default();
        };
        let configuration_name = trigger
            .configuration
            .as_ref()
            .map(|c| c.name.clone())
            .or_else(|| {
                payload
                    .skill()
                    .and_then(SkillDescriptor::active_configuration)
                    .map(|c| c.name.clone())
            });
        Self {
            tx: Some(after),
            configuration_name,
        }
    }

    fn apply(&self, options: &mut QueryOptions) {
        if options.tx.is_none() {
            options.tx = self.tx;
        }
        if options.configuration_name.is_none() {
            options.configuration_name.clone_from(&self.configuration_name);
        }
    }
}

/// Result of one query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    /// Response text, untouched.
    Raw(String),
    /// One normalized object per result tuple.
    Rows(Vec<Json>),
    /// First decoded result as a sequence, unmapped.
    Object(Vec<Json>),
}

impl QueryResult {
    /// Normalized rows; empty for raw and object results.
    pub fn rows(&self) -> &[Json] {
        match self {
            Self::Rows(rows) => rows,
            _ => &[],
        }
    }

    pub fn into_rows(self) -> Vec<Json> {
        match self {
            Self::Rows(rows) => rows,
            _ => Vec::new(),
        }
    }

    pub fn as_raw(&self) -> Option<&str> {
        match self {
            Self::Raw(text) => Some(text),
            _ => None,
        }
    }

    /// Render as JSON: rows as an array, raw text as a string.
    pub fn to_json(&self) -> Json {
        match self {
            Self::Raw(text) => Json::String(text.clone()),
            Self::Rows(rows) => Json::Array(rows.clone()),
            Self::Object(items) => Json::Array(items.clone()),
        }
    }
}

/// One member of a batched query.
#[derive(Debug, Clone)]
pub struct NamedQuery {
    pub name: String,
    pub template: String,
    pub params: Params,
    pub options: QueryOptions,
}

impl NamedQuery {
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
            params: Params::new(),
            options: QueryOptions::new(),
        }
    }

    pub fn params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }
}

/// Client for one workspace's fact store.
///
/// Cheap to clone; clones share the response cache and transaction
/// statistics.
///
/// ```no_run
/// use skiff_datalog::{DatalogClient, Params, QueryOptions};
///
/// # async fn example() -> skiff_datalog::Result<()> {
/// let client = DatalogClient::builder()
///     .workspace_id("T29E48P34")
///     .api_key("key")
///     .build()?;
///
/// let rows = client
///     .query(
///         "[:find (pull ?c [*]) :in $ $before-db % :where [?c :git.commit/sha ?sha]]",
///         &Params::new().with("sha", "abc"),
///         QueryOptions::new(),
///     )
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct DatalogClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http: HttpClient,
    url: String,
    api_key: String,
    workspace_id: String,
    correlation_id: String,
    skill: SkillDescriptor,
    defaults: QueryDefaults,
    policy: RetryPolicy,
    cache: ResponseCache,
    transactor: Transactor,
}

impl std::fmt::Debug for DatalogClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatalogClient")
            .field("url", &self.inner.url)
            .field("workspace_id", &self.inner.workspace_id)
            .field("correlation_id", &self.inner.correlation_id)
            .finish_non_exhaustive()
    }
}

impl DatalogClient {
    pub fn builder() -> DatalogClientBuilder {
        DatalogClientBuilder::new()
    }

    /// Query endpoint.
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn workspace_id(&self) -> &str {
        &self.inner.workspace_id
    }

    pub fn correlation_id(&self) -> &str {
        &self.inner.correlation_id
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.inner.cache
    }

    /// Totals of all transactions sent so far.
    pub fn transaction_stats(&self) -> TransactStats {
        self.inner.transactor.stats()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Run a templated query.
    pub async fn query(
        &self,
        template: &str,
        params: &Params,
        options: QueryOptions,
    ) -> Result<QueryResult> {
        let options = self.with_defaults(options);
        let body = prepare_query_body(template, params, &options, &self.inner.skill, None)?;
        let text = self.execute(&body).await?;
        if options.mode == QueryMode::Raw {
            return Ok(QueryResult::Raw(text));
        }
        shape(edn::parse(&text)?, &options)
    }

    /// Run a query and deserialize each normalized row.
    pub async fn query_as<T: DeserializeOwned>(
        &self,
        template: &str,
        params: &Params,
        options: QueryOptions,
    ) -> Result<Vec<T>> {
        let options = options.mode(QueryMode::Map);
        self.query(template, params, options)
            .await?
            .into_rows()
            .into_iter()
            .map(|row| serde_json::from_value(row).map_err(DatalogError::from))
            .collect()
    }

    /// Run several named queries in one request.
    pub async fn query_batch(&self, queries: Vec<NamedQuery>) -> Result<HashMap<String, QueryResult>> {
        if queries.is_empty() {
            return Ok(HashMap::new());
        }
        let mut prepared = Vec::with_capacity(queries.len());
        let mut bodies = Vec::with_capacity(queries.len());
        for query in queries {
            let options = self.with_defaults(query.options);
            bodies.push(prepare_query_body(
                &query.template,
                &query.params,
                &options,
                &self.inner.skill,
                Some(&query.name),
            )?);
            prepared.push((query.name, options));
        }

        let text = self.execute(&prepare_batch_body(&bodies)).await?;
        let response = edn::parse(&text)?;

        let mut results = HashMap::with_capacity(prepared.len());
        for (name, options) in prepared {
            let value = batch_member(&response, &name).ok_or_else(|| {
                DatalogError::Decode(format!("batch response has no result for '{name}'"))
            })?;
            let result = match options.mode {
                QueryMode::Raw => QueryResult::Raw(edn::encode(value)?),
                _ => shape(value.clone(), &options)?,
            };
            results.insert(name, result);
        }
        Ok(results)
    }

    fn with_defaults(&self, mut options: QueryOptions) -> QueryOptions {
        self.inner.defaults.apply(&mut options);
        options
    }

    async fn execute(&self, body: &str) -> Result<String> {
        if let Some(cached) = self.inner.cache.get(body) {
            tracing::debug!(url = %self.inner.url, "Query answered from cache");
            return Ok(cached);
        }

        tracing::debug!(url = %self.inner.url, body, "Sending query");
        let start = std::time::Instant::now();
        let inner = &self.inner;
        let text = retry(&inner.policy, "datalog query", || async move {
            let request = inner
                .http
                .post(&inner.url)?
                .header(AUTHORIZATION, format!("bearer {}", inner.api_key))
                .header(CONTENT_TYPE, "application/edn")
                .body(body.to_string());
            send_text(request).await
        })
        .await?;
        tracing::debug!(
            url = %self.inner.url,
            elapsed_ms = start.elapsed().as_millis() as u64,
            bytes = text.len(),
            "Query completed"
        );

        self.inner.cache.put(body, text.clone());
        Ok(text)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transactions
    // ─────────────────────────────────────────────────────────────────────────

    /// Transact a batch of entities.
    ///
    /// Records with undefined attributes are rejected before anything is
    /// sent.
    pub async fn transact<I, E>(&self, entities: I, options: TransactOptions) -> Result<()>
    where
        I: IntoIterator<Item = E>,
        E: Into<Record>,
    {
        let records = entities.into_iter().map(Into::into).collect();
        self.inner.transactor.transact(records, options).await
    }

    /// Retract the entities matched by `query`.
    pub async fn retract(&self, query: &str, options: TransactOptions) -> Result<()> {
        self.inner.transactor.retract(query, options).await
    }
}

/// Locate one named result in a batch response: either a map keyed by
/// name, or a sequence of `{:name .. :result ..}` entries.
fn batch_member<'a>(response: &'a Value, name: &str) -> Option<&'a Value> {
    if let Some(value) = response.get(name) {
        return Some(value);
    }
    response
        .get("results")
        .unwrap_or(response)
        .as_seq()?
        .iter()
        .find(|entry| entry.get("name").and_then(Value::key_text).as_deref() == Some(name))
        .and_then(|entry| entry.get("result"))
}

fn shape(value: Value, options: &QueryOptions) -> Result<QueryResult> {
    let decoded = value.to_json();
    if options.mode == QueryMode::Object {
        let first = to_seq(&decoded).into_iter().next().unwrap_or(Json::Null);
        return Ok(QueryResult::Object(to_seq(&first)));
    }
    let tuples = if options.tx.is_some() {
        nested_result(decoded)
    } else {
        decoded
    };
    Ok(QueryResult::Rows(normalize_tuples(&tuples)))
}

/// Results of a transaction-range query nest under `result`.
fn nested_result(decoded: Json) -> Json {
    match decoded {
        Json::Object(mut map) => map.remove("result").unwrap_or(Json::Null),
        Json::Array(items) => items
            .into_iter()
            .next()
            .map(nested_result)
            .unwrap_or(Json::Null),
        other => other,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for [`DatalogClient`].
#[derive(Debug)]
pub struct DatalogClientBuilder {
    endpoint: Option<String>,
    url: Option<String>,
    api_key: Option<String>,
    workspace_id: Option<String>,
    correlation_id: Option<String>,
    skill: Option<SkillDescriptor>,
    defaults: QueryDefaults,
    policy: RetryPolicy,
    timeout: Duration,
    http: Option<HttpClient>,
    transact_target: Option<TransactTarget>,
    completion: Option<CompletionRegistry>,
}

impl Default for DatalogClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DatalogClientBuilder {
    pub fn new() -> Self {
        Self {
            endpoint: None,
            url: None,
            api_key: None,
            workspace_id: None,
            correlation_id: None,
            skill: None,
            defaults: QueryDefaults::default(),
            policy: RetryPolicy::default(),
            timeout: DEFAULT_TIMEOUT,
            http: None,
            transact_target: None,
            completion: None,
        }
    }

    /// Service base; the query URL becomes `{endpoint}/team/{workspace}`.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Full query URL, overriding the endpoint.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn workspace_id(mut self, workspace_id: impl Into<String>) -> Self {
        self.workspace_id = Some(workspace_id.into());
        self
    }

    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn skill(mut self, skill: SkillDescriptor) -> Self {
        self.skill = Some(skill);
        self
    }

    pub fn defaults(mut self, defaults: QueryDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Request timeout; ignored when a shared [`HttpClient`] is supplied.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Reuse process-scoped connection pools.
    pub fn http_client(mut self, http: HttpClient) -> Self {
        self.http = Some(http);
        self
    }

    pub fn transact_target(mut self, target: TransactTarget) -> Self {
        self.transact_target = Some(target);
        self
    }

    /// Registry receiving the client's teardown callbacks.
    pub fn completion(mut self, registry: CompletionRegistry) -> Self {
        self.completion = Some(registry);
        self
    }

    /// Seed workspace, correlation id, skill, credentials and query
    /// defaults from an incoming payload.
    pub fn for_payload(mut self, payload: &IncomingPayload) -> Self {
        if let Some(workspace_id) = payload.workspace_id() {
            self.workspace_id = Some(workspace_id.to_string());
        }
        if let Some(correlation_id) = payload.correlation_id() {
            self.correlation_id = Some(correlation_id.to_string());
        }
        if let Some(skill) = payload.skill() {
            self.skill = Some(skill.clone());
        }
        if let Some(api_key) = payload.api_key() {
            self.api_key = Some(api_key.to_string());
        }
        if let Some(query_url) = payload.header().and_then(|h| h.urls.as_ref()).and_then(|u| u.query.clone()) {
            self.url = Some(query_url);
        }
        self.defaults = QueryDefaults::from_payload(payload);
        self
    }

    pub fn build(self) -> Result<DatalogClient> {
        let workspace_id = self
            .workspace_id
            .filter(|w| !w.is_empty())
            .ok_or_else(|| DatalogError::Config("workspace_id is required".to_string()))?;
        let api_key = self
            .api_key
            .ok_or_else(|| DatalogError::Config("api_key is required".to_string()))?;
        let url = match self.url {
            Some(url) => url,
            None => {
                let endpoint = self.endpoint.as_deref().unwrap_or(PRODUCTION_ENDPOINT);
                format!("{}/team/{}", endpoint.trim_end_matches('/'), workspace_id)
            }
        };
        url::Url::parse(&url)?;

        let http = match self.http {
            Some(http) => http,
            None => HttpClient::new(self.timeout)?,
        };
        let correlation_id = self
            .correlation_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let transactor = Transactor::new(
            self.transact_target,
            http.clone(),
            self.policy.clone(),
            correlation_id.clone(),
            workspace_id.clone(),
            self.completion,
        );

        Ok(DatalogClient {
            inner: Arc::new(ClientInner {
                http,
                url,
                api_key,
                workspace_id,
                correlation_id,
                skill: self.skill.unwrap_or_default(),
                defaults: self.defaults,
                policy: self.policy,
                cache: ResponseCache::new(),
                transactor,
            }),
        })
    }
}
