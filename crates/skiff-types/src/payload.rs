//! Incoming trigger payloads.
//!
//! Every invocation starts from one [`IncomingPayload`]. The payload is a
//! tagged union keyed by its `type` field; each variant shares a
//! [`PayloadHeader`] (correlation id, workspace id, skill, secrets) and adds
//! its own trigger data.
//!
//! Payloads that wrap their trigger data in a `context` envelope
//! (`{"type": "subscription", "context": {"subscription": {...}}}`) are
//! accepted as well; [`IncomingPayload::from_value`] lifts the envelope
//! before deserializing.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::skill::{API_KEY_SECRET, Secret, SkillDescriptor, hide_string};

/// Endpoints handed to the execution by the platform.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionUrls {
    /// Status endpoint (PATCH).
    #[serde(default)]
    pub execution: Option<String>,
    /// Remote log sink.
    #[serde(default)]
    pub logs: Option<String>,
    /// Transaction endpoint.
    #[serde(default)]
    pub transactions: Option<String>,
    /// Query endpoint.
    #[serde(default)]
    pub query: Option<String>,
}

/// Fields shared by every payload variant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PayloadHeader {
    #[serde(default, alias = "correlation-id")]
    pub correlation_id: String,
    #[serde(default, alias = "execution-id", skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    #[serde(alias = "workspace-id", alias = "team_id")]
    pub workspace_id: String,
    pub skill: SkillDescriptor,
    #[serde(default)]
    pub secrets: Vec<Secret>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub urls: Option<ExecutionUrls>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// A `name=value` command argument.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandArg {
    pub name: String,
    pub value: String,
}

/// Chat or web command invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandIncoming {
    #[serde(flatten)]
    pub header: PayloadHeader,
    pub command: String,
    #[serde(default)]
    pub parameters: Vec<CommandArg>,
    #[serde(default, alias = "raw-message")]
    pub raw_message: Option<String>,
    #[serde(default)]
    pub source: Option<serde_json::Value>,
}

impl CommandIncoming {
    /// Declared parameters followed by `--name=value` flags parsed from the
    /// raw message.
    pub fn all_parameters(&self) -> Vec<CommandArg> {
        let mut params = self.parameters.clone();
        if let Some(raw) = &self.raw_message {
            params.extend(parse_raw_parameters(raw));
        }
        params
    }
}

fn parse_raw_parameters(raw: &str) -> Vec<CommandArg> {
    raw.split_whitespace()
        .filter_map(|token| token.strip_prefix("--"))
        .filter_map(|flag| {
            let (name, value) = flag.split_once('=')?;
            Some(CommandArg {
                name: name.to_string(),
                value: value.trim_matches('"').to_string(),
            })
        })
        .collect()
}

/// GraphQL-style event subscription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventIncoming {
    #[serde(flatten)]
    pub header: PayloadHeader,
    #[serde(alias = "operationName", alias = "operation-name")]
    pub operation_name: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Raw inbound HTTP webhook.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookTrigger {
    #[serde(alias = "parameter-name")]
    pub parameter_name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
}

impl WebhookTrigger {
    /// Parse the webhook body as JSON.
    pub fn json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_str(&self.body)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookIncoming {
    #[serde(flatten)]
    pub header: PayloadHeader,
    pub webhook: WebhookTrigger,
}

/// Reference to the configuration instance a subscription fired for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigurationRef {
    pub name: String,
}

/// Query-result trigger data shared by subscriptions and sync requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionTrigger {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<ConfigurationRef>,
    /// Raw result tuples, one array of row maps per tuple.
    #[serde(default)]
    pub result: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx: Option<i64>,
    #[serde(default, alias = "after-basis-t", skip_serializing_if = "Option::is_none")]
    pub after_basis_t: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionIncoming {
    #[serde(flatten)]
    pub header: PayloadHeader,
    pub subscription: SubscriptionTrigger,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncRequestIncoming {
    #[serde(flatten)]
    pub header: PayloadHeader,
    #[serde(alias = "sync-request")]
    pub sync_request: SubscriptionTrigger,
}

/// The trigger that started an execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IncomingPayload {
    Command(CommandIncoming),
    Event(EventIncoming),
    Webhook(WebhookIncoming),
    Subscription(SubscriptionIncoming),
    #[serde(alias = "sync-request")]
    SyncRequest(SyncRequestIncoming),
    /// Any payload whose `type` this runtime does not handle.
    #[serde(other)]
    Unrecognized,
}

/// Trigger kind, used for handler routing and log labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Command,
    Event,
    Webhook,
    Subscription,
    SyncRequest,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Event => "event",
            Self::Webhook => "webhook",
            Self::Subscription => "subscription",
            Self::SyncRequest => "sync_request",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl IncomingPayload {
    /// Parse a JSON payload document.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    /// Deserialize a payload, lifting a `context` envelope if present.
    pub fn from_value(mut value: serde_json::Value) -> serde_json::Result<Self> {
        if let Some(obj) = value.as_object_mut()
            && let Some(serde_json::Value::Object(mut context)) = obj.remove("context")
        {
            let kind = obj
                .get("type")
                .and_then(|t| t.as_str())
                .map(|t| t.trim_start_matches(':').to_string());
            if let Some(kind) = kind {
                obj.insert("type".to_string(), serde_json::Value::String(kind.clone()));
                let inner = context
                    .remove(&kind)
                    .or_else(|| context.remove(&kind.replace('_', "-")));
                if let Some(inner) = inner {
                    obj.insert(kind, inner);
                }
            }
        }
        serde_json::from_value(value)
    }

    /// Shared header, `None` for unrecognized payloads.
    pub fn header(&self) -> Option<&PayloadHeader> {
        match self {
            Self::Command(p) => Some(&p.header),
            Self::Event(p) => Some(&p.header),
            Self::Webhook(p) => Some(&p.header),
            Self::Subscription(p) => Some(&p.header),
            Self::SyncRequest(p) => Some(&p.header),
            Self::Unrecognized => None,
        }
    }

    pub fn kind(&self) -> Option<TriggerKind> {
        match self {
            Self::Command(_) => Some(TriggerKind::Command),
            Self::Event(_) => Some(TriggerKind::Event),
            Self::Webhook(_) => Some(TriggerKind::Webhook),
            Self::Subscription(_) => Some(TriggerKind::Subscription),
            Self::SyncRequest(_) => Some(TriggerKind::SyncRequest),
            Self::Unrecognized => None,
        }
    }

    /// Logical trigger name used to resolve the handler.
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Command(p) => Some(&p.command),
            Self::Event(p) => Some(&p.operation_name),
            Self::Webhook(p) => Some(&p.webhook.parameter_name),
            Self::Subscription(p) => Some(&p.subscription.name),
            Self::SyncRequest(p) => Some(&p.sync_request.name),
            Self::Unrecognized => None,
        }
    }

    pub fn workspace_id(&self) -> Option<&str> {
        self.header().map(|h| h.workspace_id.as_str())
    }

    /// Correlation id, falling back to the execution id for payloads that
    /// only carry the latter.
    pub fn correlation_id(&self) -> Option<&str> {
        let header = self.header()?;
        if !header.correlation_id.is_empty() {
            Some(header.correlation_id.as_str())
        } else {
            header.execution_id.as_deref()
        }
    }

    pub fn skill(&self) -> Option<&SkillDescriptor> {
        self.header().map(|h| &h.skill)
    }

    /// Credential for the query service: the API key secret, else the
    /// execution token.
    pub fn api_key(&self) -> Option<&str> {
        let header = self.header()?;
        header
            .secrets
            .iter()
            .find(|s| s.uri == API_KEY_SECRET)
            .map(|s| s.value.as_str())
            .or(header.token.as_deref())
    }

    /// Query-result trigger data for subscriptions and sync requests.
    pub fn query_trigger(&self) -> Option<&SubscriptionTrigger> {
        match self {
            Self::Subscription(p) => Some(&p.subscription),
            Self::SyncRequest(p) => Some(&p.sync_request),
            _ => None,
        }
    }

    /// JSON rendering of the payload with sensitive values masked, for logs.
    pub fn redacted(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        redact(&mut value);
        value
    }
}

const SENSITIVE_KEYS: &[&str] = &[
    "token",
    "password",
    "jwt",
    "url",
    "secret",
    "authorization",
    "key",
    "cert",
    "pass",
    "user",
    "address",
    "email",
    "value",
];

/// Mask string values stored under sensitive-looking keys, recursively.
pub fn redact(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                let lower = key.to_lowercase();
                let sensitive = SENSITIVE_KEYS.iter().any(|k| lower.contains(k));
                match child {
                    serde_json::Value::String(s) if sensitive => *s = hide_string(s),
                    _ => redact(child),
                }
            }
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(redact),
        _ => {}
    }
}
