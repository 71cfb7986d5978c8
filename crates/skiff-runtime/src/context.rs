//! Per-execution context and the factory that builds it.
//!
//! A context is created once per incoming payload. It owns the execution's
//! completion registry; the datalog client, the execution log and handler
//! code register teardown callbacks against it, and [`ExecutionContext::close`]
//! drains them. Building a context performs no network I/O.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value as Json};
use skiff_config::SkiffConfig;
use skiff_datalog::map::normalize_tuples;
use skiff_datalog::{
    DatalogClient, HttpClient, MessagePublisher, PRODUCTION_ENDPOINT, RetryPolicy,
    STAGING_ENDPOINT, TopicRegistry, TopicSettings, TransactTarget,
};
use skiff_types::{
    CloseReport, CompletionCallback, CompletionRegistry, IncomingPayload, SkillDescriptor,
    TriggerKind,
};

use crate::collaborators::{ProjectLoader, StorageProvider};
use crate::configuration::{Configuration, extract_configurations};
use crate::error::{Result, RuntimeError};
use crate::log::{ExecutionLog, LogSink};
use crate::status::{HttpStatusPublisher, LogStatusPublisher, StatusPublisher, TopicStatusPublisher};

// ─────────────────────────────────────────────────────────────────────────────
// Execution context
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a handler needs for one invocation.
pub struct ExecutionContext {
    payload: Arc<IncomingPayload>,
    kind: TriggerKind,
    name: String,
    workspace_id: String,
    correlation_id: String,
    execution_id: String,
    skill: SkillDescriptor,
    configurations: Vec<Configuration>,
    data: Json,
    http: HttpClient,
    datalog: DatalogClient,
    status: Arc<dyn StatusPublisher>,
    log: ExecutionLog,
    completion: CompletionRegistry,
    project: Option<Arc<dyn ProjectLoader>>,
    storage: Option<Arc<dyn StorageProvider>>,
}

impl ExecutionContext {
    pub fn payload(&self) -> &IncomingPayload {
        &self.payload
    }

    pub fn kind(&self) -> TriggerKind {
        self.kind
    }

    /// Logical trigger name (subscription, command, webhook parameter...).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn skill(&self) -> &SkillDescriptor {
        &self.skill
    }

    pub fn configurations(&self) -> &[Configuration] {
        &self.configurations
    }

    /// The configuration instance this execution runs under.
    pub fn configuration(&self) -> Option<&Configuration> {
        self.configurations.first()
    }

    /// Trigger data: normalized rows for subscriptions and sync requests,
    /// event data, the parsed webhook body, or command parameters.
    pub fn data(&self) -> &Json {
        &self.data
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    pub fn datalog(&self) -> &DatalogClient {
        &self.datalog
    }

    pub fn status(&self) -> &dyn StatusPublisher {
        self.status.as_ref()
    }

    pub fn log(&self) -> &ExecutionLog {
        &self.log
    }

    pub fn completion(&self) -> &CompletionRegistry {
        &self.completion
    }

    pub fn project_loader(&self) -> Result<&dyn ProjectLoader> {
        self.project
            .as_deref()
            .ok_or_else(|| RuntimeError::collaborator("no project loader configured"))
    }

    pub fn storage(&self) -> Result<&dyn StorageProvider> {
        self.storage
            .as_deref()
            .ok_or_else(|| RuntimeError::collaborator("no storage provider configured"))
    }

    /// Register a teardown callback.
    pub fn on_complete(&self, callback: CompletionCallback) {
        self.completion.register(callback);
    }

    /// Run every completion callback. Consumes the context.
    pub async fn close(self) -> CloseReport {
        let report = self.completion.close().await;
        tracing::debug!(
            execution_id = %self.execution_id,
            completed = report.completed,
            failed = report.failed,
            "Closed execution context"
        );
        report
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("workspace_id", &self.workspace_id)
            .field("correlation_id", &self.correlation_id)
            .field("execution_id", &self.execution_id)
            .field("skill", &self.skill.qualified_name())
            .finish_non_exhaustive()
    }
}

/// Handler-facing view of a payload's trigger data.
///
/// Subscription and sync request results are normalized, webhook bodies are
/// parsed as JSON when possible and command parameters become an object.
pub fn trigger_data(payload: &IncomingPayload) -> Json {
    match payload {
        IncomingPayload::Subscription(p) => Json::Array(normalize_tuples(&p.subscription.result)),
        IncomingPayload::SyncRequest(p) => Json::Array(normalize_tuples(&p.sync_request.result)),
        IncomingPayload::Event(p) => p.data.clone(),
        IncomingPayload::Webhook(p) => p
            .webhook
            .json()
            .unwrap_or_else(|_| Json::String(p.webhook.body.clone())),
        IncomingPayload::Command(p) => Json::Object(
            p.all_parameters()
                .into_iter()
                .map(|arg| (arg.name, Json::String(arg.value)))
                .collect::<Map<_, _>>(),
        ),
        IncomingPayload::Unrecognized => Json::Null,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Factory
// ─────────────────────────────────────────────────────────────────────────────

/// Builds execution contexts from payloads.
#[async_trait]
pub trait ContextFactory: Send + Sync {
    /// `Ok(None)` for payloads this runtime does not handle.
    async fn create(
        &self,
        payload: Arc<IncomingPayload>,
        execution_id: &str,
    ) -> Result<Option<ExecutionContext>>;
}

/// Process-scoped handles shared by every execution.
#[derive(Clone)]
pub struct SharedResources {
    pub http: HttpClient,
    pub topics: Option<Arc<TopicRegistry>>,
    /// Explicit response topic; derived per skill when unset.
    pub response_topic: Option<String>,
    pub endpoint: String,
    pub policy: RetryPolicy,
    pub project: Option<Arc<dyn ProjectLoader>>,
    pub storage: Option<Arc<dyn StorageProvider>>,
}

impl SharedResources {
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            topics: None,
            response_topic: None,
            endpoint: PRODUCTION_ENDPOINT.to_string(),
            policy: RetryPolicy::default(),
            project: None,
            storage: None,
        }
    }

    /// Build pools, retry policy and topic publishers from configuration.
    pub fn from_config(config: &SkiffConfig) -> Result<Self> {
        let datalog = config.datalog();
        let retry = config.retry();
        let http = HttpClient::new(datalog.timeout())?;
        let policy = RetryPolicy {
            attempts: retry.attempts.max(1),
            factor: retry.factor,
            min_delay: retry.min_delay(),
            max_delay: retry.max_delay(),
            jitter: retry.jitter,
        };

        let endpoint = match (datalog.endpoint, datalog.staging) {
            (Some(endpoint), _) => endpoint,
            (None, true) => STAGING_ENDPOINT.to_string(),
            (None, false) => PRODUCTION_ENDPOINT.to_string(),
        };

        let mut resources = Self::new(http.clone())
            .with_endpoint(endpoint)
            .with_retry_policy(policy.clone());

        if let Some(topic) = &config.topic {
            let mut settings = TopicSettings {
                project_id: topic.project_id.clone(),
                token: topic.token.clone(),
                ..TopicSettings::default()
            };
            if let Some(base_url) = &topic.base_url {
                settings.base_url = base_url.clone();
            }
            resources.topics = Some(Arc::new(TopicRegistry::new(http, settings, policy)));
            resources.response_topic = topic.name.clone();
        }
        Ok(resources)
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_topics(mut self, registry: Arc<TopicRegistry>, response_topic: Option<String>) -> Self {
        self.topics = Some(registry);
        self.response_topic = response_topic;
        self
    }

    pub fn with_project_loader(mut self, loader: Arc<dyn ProjectLoader>) -> Self {
        self.project = Some(loader);
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn StorageProvider>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Response topic for a skill: the configured name, else
    /// `{workspace}-{skill id}-response`.
    pub fn response_topic_for(&self, workspace_id: &str, skill: &SkillDescriptor) -> Option<String> {
        self.topics.as_ref()?;
        self.response_topic
            .clone()
            .or_else(|| (!skill.id.is_empty()).then(|| format!("{workspace_id}-{}-response", skill.id)))
    }
}

impl fmt::Debug for SharedResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedResources")
            .field("endpoint", &self.endpoint)
            .field("response_topic", &self.response_topic)
            .field("topics", &self.topics.is_some())
            .finish_non_exhaustive()
    }
}

/// Factory wiring shared resources into each execution.
#[derive(Debug, Clone)]
pub struct DefaultContextFactory {
    resources: SharedResources,
}

impl DefaultContextFactory {
    pub fn new(resources: SharedResources) -> Self {
        Self { resources }
    }

    pub fn resources(&self) -> &SharedResources {
        &self.resources
    }
}

#[async_trait]
impl ContextFactory for DefaultContextFactory {
    async fn create(
        &self,
        payload: Arc<IncomingPayload>,
        execution_id: &str,
    ) -> Result<Option<ExecutionContext>> {
        let (Some(kind), Some(name), Some(header)) = (payload.kind(), payload.name(), payload.header())
        else {
            return Ok(None);
        };
        if header.workspace_id.is_empty() {
            return Err(RuntimeError::InvalidPayload("missing workspace id".to_string()));
        }

        let resources = &self.resources;
        let workspace_id = header.workspace_id.clone();
        let correlation_id = payload
            .correlation_id()
            .unwrap_or(execution_id)
            .to_string();
        let skill = header.skill.clone();
        let urls = header.urls.clone().unwrap_or_default();
        let completion = CompletionRegistry::new();

        let topic: Option<Arc<dyn MessagePublisher>> = match (
            &resources.topics,
            resources.response_topic_for(&workspace_id, &skill),
        ) {
            (Some(registry), Some(topic)) => Some(registry.topic(&topic)),
            _ => None,
        };

        let transact_target = match (&urls.transactions, &header.token, &topic) {
            (Some(url), Some(token), _) => Some(TransactTarget::Http {
                url: url.clone(),
                token: token.clone(),
            }),
            (_, _, Some(topic)) => Some(TransactTarget::Topic(topic.clone())),
            _ => None,
        };

        let mut builder = DatalogClient::builder()
            .endpoint(resources.endpoint.as_str())
            .api_key(payload.api_key().unwrap_or_default())
            .for_payload(&payload)
            .correlation_id(correlation_id.as_str())
            .retry_policy(resources.policy.clone())
            .http_client(resources.http.clone())
            .completion(completion.clone());
        if let Some(target) = transact_target {
            builder = builder.transact_target(target);
        }
        let datalog = builder.build()?;

        let status: Arc<dyn StatusPublisher> = match (&urls.execution, &header.token, topic) {
            (Some(url), Some(token), _) => Arc::new(HttpStatusPublisher::new(
                resources.http.clone(),
                url.as_str(),
                token.as_str(),
                resources.policy.clone(),
            )),
            (_, _, Some(topic)) => Arc::new(TopicStatusPublisher::new(
                topic,
                correlation_id.as_str(),
                workspace_id.as_str(),
                kind,
                name,
                skill.clone(),
            )),
            _ => Arc::new(LogStatusPublisher),
        };

        let log = match &urls.logs {
            Some(url) => ExecutionLog::with_sink(
                resources.http.clone(),
                LogSink {
                    url: url.clone(),
                    token: header.token.clone(),
                },
                resources.policy.clone(),
            ),
            None => ExecutionLog::new(),
        };
        log.register_flush(&completion);

        tracing::debug!(
            %kind,
            name,
            workspace_id = %workspace_id,
            correlation_id = %correlation_id,
            execution_id,
            "Created execution context"
        );

        Ok(Some(ExecutionContext {
            configurations: extract_configurations(&skill, &workspace_id),
            data: trigger_data(&payload),
            kind,
            name: name.to_string(),
            workspace_id,
            correlation_id,
            execution_id: execution_id.to_string(),
            skill,
            http: resources.http.clone(),
            datalog,
            status,
            log,
            completion,
            project: resources.project.clone(),
            storage: resources.storage.clone(),
            payload,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn factory() -> DefaultContextFactory {
        DefaultContextFactory::new(SharedResources::new(
            HttpClient::new(Duration::from_secs(5)).unwrap(),
        ))
    }

    fn payload(value: Json) -> Arc<IncomingPayload> {
        Arc::new(IncomingPayload::from_value(value).unwrap())
    }

    fn subscription() -> Json {
        json!({
            "type": "subscription",
            "correlation_id": "corr-1",
            "workspace_id": "T29E48P34",
            "skill": {
                "id": "s1",
                "namespace": "atomist",
                "name": "go-sample-skill",
                "version": "0.1.0",
                "configuration": {
                    "name": "default",
                    "parameters": [{ "name": "branch", "value": "main" }]
                }
            },
            "secrets": [{ "uri": "atomist://api-key", "value": "key" }],
            "subscription": {
                "name": "on_push",
                "result": [[{ "schema/entity-type": "git/commit", "git.commit/sha": "abc" }]]
            }
        })
    }

    #[tokio::test]
    async fn test_create_subscription_context() {
        let ctx = factory()
            .create(payload(subscription()), "exec-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ctx.kind(), TriggerKind::Subscription);
        assert_eq!(ctx.name(), "on_push");
        assert_eq!(ctx.workspace_id(), "T29E48P34");
        assert_eq!(ctx.correlation_id(), "corr-1");
        assert_eq!(ctx.execution_id(), "exec-1");
        assert_eq!(ctx.datalog().url(), "https://api.atomist.com/datalog/team/T29E48P34");
        assert_eq!(ctx.data()[0]["commit"]["sha"], "abc");
        assert_eq!(ctx.configuration().unwrap().parameter("branch"), Some(&json!("main")));
        // Log flush only.
        assert_eq!(ctx.completion().len(), 1);
        assert!(ctx.project_loader().is_err());
    }

    #[tokio::test]
    async fn test_unrecognized_payload_yields_none() {
        let created = factory()
            .create(payload(json!({ "type": "carrier_pigeon" })), "exec-1")
            .await
            .unwrap();
        assert!(created.is_none());
    }

    #[tokio::test]
    async fn test_missing_workspace_is_invalid() {
        let mut value = subscription();
        value["workspace_id"] = json!("");
        let err = factory().create(payload(value), "exec-1").await.unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidPayload(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_command_data_and_correlation_fallback() {
        let value = json!({
            "type": "command",
            "workspace_id": "T1",
            "skill": { "namespace": "ns", "name": "n" },
            "command": "deploy",
            "parameters": [{ "name": "env", "value": "prod" }],
            "token": "jwt"
        });
        let ctx = factory().create(payload(value), "exec-9").await.unwrap().unwrap();
        assert_eq!(ctx.correlation_id(), "exec-9");
        assert_eq!(ctx.data(), &json!({ "env": "prod" }));
    }

    #[tokio::test]
    async fn test_close_runs_registered_callbacks() {
        let ctx = factory()
            .create(payload(subscription()), "exec-1")
            .await
            .unwrap()
            .unwrap();
        ctx.on_complete(CompletionCallback::new(|| async { Ok(()) }).named("cleanup"));
        ctx.log().info("hello");
        let log = ctx.log().clone();

        let report = ctx.close().await;
        assert_eq!(report.completed, 2);
        assert_eq!(log.shipped(), 1);
    }

    #[test]
    fn test_response_topic_derivation() {
        let http = HttpClient::new(Duration::from_secs(5)).unwrap();
        let skill = SkillDescriptor::new("ns", "n").with_id("s1");

        let plain = SharedResources::new(http.clone());
        assert_eq!(plain.response_topic_for("T1", &skill), None);

        let registry = Arc::new(TopicRegistry::new(
            http.clone(),
            TopicSettings::default(),
            RetryPolicy::none(),
        ));
        let derived = SharedResources::new(http).with_topics(registry, None);
        assert_eq!(
            derived.response_topic_for("T1", &skill).as_deref(),
            Some("T1-s1-response")
        );
    }

    #[test]
    fn test_resources_from_config() {
        let config = SkiffConfig::from_toml(
            "[datalog]\nstaging = true\n[retry]\nattempts = 2\n[topic]\nname = \"T1-s1-response\"\n",
        )
        .unwrap();
        let resources = SharedResources::from_config(&config).unwrap();
        assert_eq!(resources.endpoint, STAGING_ENDPOINT);
        assert_eq!(resources.policy.attempts, 2);
        assert_eq!(resources.response_topic.as_deref(), Some("T1-s1-response"));
        assert!(resources.topics.is_some());
    }
}
