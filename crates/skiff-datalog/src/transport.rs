//! Shared HTTP pools and message-bus topic publishers.
//!
//! Both are process-scoped: construct once, clone the handles into every
//! execution.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use parking_lot::Mutex;
use reqwest::Method;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{DatalogError, Result};
use crate::retry::{RetryPolicy, retry};

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default message-bus REST base URL.
pub const DEFAULT_PUBLISH_BASE_URL: &str = "https://pubsub.googleapis.com/v1";

// ─────────────────────────────────────────────────────────────────────────────
// HTTP pools
// ─────────────────────────────────────────────────────────────────────────────

/// Two keep-alive connection pools, one per URL scheme.
#[derive(Debug, Clone)]
pub struct HttpClient {
    http: reqwest::Client,
    https: reqwest::Client,
    timeout: Duration,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let user_agent = format!("skiff/{}", env!("CARGO_PKG_VERSION"));
        let http = reqwest::Client::builder()
            .user_agent(&user_agent)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .map_err(|e| DatalogError::Config(format!("failed to build http pool: {e}")))?;
        let https = reqwest::Client::builder()
            .user_agent(&user_agent)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .https_only(true)
            .build()
            .map_err(|e| DatalogError::Config(format!("failed to build https pool: {e}")))?;
        Ok(Self {
            http,
            https,
            timeout,
        })
    }

    /// Pool serving `url`'s scheme.
    pub fn client_for(&self, url: &Url) -> &reqwest::Client {
        if url.scheme() == "https" {
            &self.https
        } else {
            &self.http
        }
    }

    /// Start a request with the configured timeout.
    pub fn request(&self, method: Method, url: &str) -> Result<reqwest::RequestBuilder> {
        let url = Url::parse(url)?;
        Ok(self
            .client_for(&url)
            .request(method, url)
            .timeout(self.timeout))
    }

    pub fn get(&self, url: &str) -> Result<reqwest::RequestBuilder> {
        self.request(Method::GET, url)
    }

    pub fn post(&self, url: &str) -> Result<reqwest::RequestBuilder> {
        self.request(Method::POST, url)
    }

    pub fn patch(&self, url: &str) -> Result<reqwest::RequestBuilder> {
        self.request(Method::PATCH, url)
    }
}

/// Send a prepared request and return the body of a successful response.
///
/// Non-success responses become [`DatalogError::Http`] with a truncated body.
pub async fn send_text(request: reqwest::RequestBuilder) -> Result<String> {
    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(DatalogError::Http {
            status: status.as_u16(),
            body: truncate(&body, 512),
        });
    }
    Ok(body)
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Topic publishing
// ─────────────────────────────────────────────────────────────────────────────

/// Publishes messages to one message-bus topic.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publish `data`, returning the message id assigned by the bus.
    async fn publish(&self, data: &[u8], ordering_key: Option<&str>) -> Result<String>;
}

#[derive(Serialize)]
struct PublishRequest<'a> {
    messages: [PublishMessage<'a>; 1],
}

#[derive(Serialize)]
struct PublishMessage<'a> {
    data: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    ordering_key: Option<&'a str>,
}

#[derive(Deserialize)]
struct PublishResponse {
    #[serde(default, rename = "messageIds")]
    message_ids: Vec<String>,
}

/// REST publisher for one topic.
#[derive(Debug)]
pub struct TopicPublisher {
    http: HttpClient,
    topic: String,
    url: String,
    token: Option<String>,
    policy: RetryPolicy,
}

impl TopicPublisher {
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl MessagePublisher for TopicPublisher {
    async fn publish(&self, data: &[u8], ordering_key: Option<&str>) -> Result<String> {
        let body = serde_json::to_string(&PublishRequest {
            messages: [PublishMessage {
                data: BASE64.encode(data),
                ordering_key,
            }],
        })?;

        let body = &body;
        retry(&self.policy, "topic publish", || async move {
            let mut request = self
                .http
                .post(&self.url)?
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone());
            if let Some(token) = &self.token {
                request = request.header(AUTHORIZATION, format!("Bearer {token}"));
            }
            let text = send_text(request).await?;
            let response: PublishResponse = serde_json::from_str(&text)
                .map_err(|e| DatalogError::Decode(format!("publish response: {e}")))?;
            match response.message_ids.into_iter().next() {
                Some(id) => Ok(id),
                None => Err(DatalogError::Publish(format!(
                    "topic {} returned no message ids",
                    self.topic
                ))),
            }
        })
        .await
    }
}

/// Where and how topics are published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSettings {
    pub base_url: String,
    pub project_id: String,
    pub token: Option<String>,
}

impl Default for TopicSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_PUBLISH_BASE_URL.to_string(),
            project_id: "atomist-skill-production".to_string(),
            token: None,
        }
    }
}

/// Process-scoped cache of topic publishers, one per topic name.
#[derive(Debug)]
pub struct TopicRegistry {
    http: HttpClient,
    settings: TopicSettings,
    policy: RetryPolicy,
    publishers: Mutex<HashMap<String, Arc<TopicPublisher>>>,
}

impl TopicRegistry {
    pub fn new(http: HttpClient, settings: TopicSettings, policy: RetryPolicy) -> Self {
        Self {
            http,
            settings,
            policy,
            publishers: Mutex::new(HashMap::new()),
        }
    }

    /// Publisher for `topic`, created on first use.
    pub fn topic(&self, topic: &str) -> Arc<TopicPublisher> {
        self.publishers
            .lock()
            .entry(topic.to_string())
            .or_insert_with(|| {
                tracing::debug!(topic, "Creating topic publisher");
                Arc::new(TopicPublisher {
                    http: self.http.clone(),
                    topic: topic.to_string(),
                    url: format!(
                        "{}/projects/{}/topics/{}:publish",
                        self.settings.base_url.trim_end_matches('/'),
                        self.settings.project_id,
                        topic
                    ),
                    token: self.settings.token.clone(),
                    policy: self.policy.clone(),
                })
            })
            .clone()
    }

    /// Number of cached publishers.
    pub fn len(&self) -> usize {
        self.publishers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.publishers.lock().is_empty()
    }
}
