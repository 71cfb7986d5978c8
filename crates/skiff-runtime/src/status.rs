//! Status publication.
//!
//! Three transports: an HTTP PATCH to the execution's status URL, a JSON
//! message on the skill's response topic, and a log-only fallback for local
//! runs.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use skiff_datalog::edn::encode;
use skiff_datalog::transport::send_text;
use skiff_datalog::{HttpClient, MessagePublisher, Record, RetryPolicy, Value, retry};
use skiff_types::{HandlerError, SkillDescriptor, State, Status, TriggerKind};

use crate::error::{Result, RuntimeError};

/// Publishes execution statuses.
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    async fn publish(&self, status: &Status) -> Result<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP
// ─────────────────────────────────────────────────────────────────────────────

/// PATCHes `{:status {:state :x :reason "..."}}` to the execution URL.
pub struct HttpStatusPublisher {
    http: HttpClient,
    url: String,
    token: String,
    policy: RetryPolicy,
}

impl HttpStatusPublisher {
    pub fn new(http: HttpClient, url: impl Into<String>, token: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            http,
            url: url.into(),
            token: token.into(),
            policy,
        }
    }
}

/// EDN status document.
pub fn status_document(status: &Status) -> Result<String> {
    let document = Record::new().field(
        "status",
        Record::new()
            .field("state", Value::keyword(status.state.as_str()))
            .maybe("reason", status.reason.as_deref()),
    );
    Ok(encode(&document.into())?)
}

#[async_trait]
impl StatusPublisher for HttpStatusPublisher {
    async fn publish(&self, status: &Status) -> Result<()> {
        let body = status_document(status)?;
        let body = &body;
        retry(&self.policy, "status publish", || async move {
            let request = self
                .http
                .patch(&self.url)?
                .header(AUTHORIZATION, format!("Bearer {}", self.token))
                .header(CONTENT_TYPE, "application/edn")
                .body(body.clone());
            send_text(request).await
        })
        .await
        .map_err(|e| RuntimeError::Status(e.to_string()))?;
        tracing::debug!(state = %status.state, url = %self.url, "Published status");
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Topic
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct Team<'a> {
    id: &'a str,
}

#[derive(Serialize)]
struct StatusBody<'a> {
    state: State,
    code: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
}

#[derive(Serialize)]
struct SkillRef<'a> {
    id: &'a str,
    namespace: &'a str,
    name: &'a str,
    version: &'a str,
}

#[derive(Serialize)]
struct StatusMessage<'a> {
    api_version: &'static str,
    correlation_id: &'a str,
    team: Team<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    event: Option<&'a str>,
    status: StatusBody<'a>,
    skill: SkillRef<'a>,
}

/// Publishes JSON status messages on the skill's response topic.
pub struct TopicStatusPublisher {
    publisher: Arc<dyn MessagePublisher>,
    correlation_id: String,
    workspace_id: String,
    kind: TriggerKind,
    name: String,
    skill: SkillDescriptor,
}

impl TopicStatusPublisher {
    pub fn new(
        publisher: Arc<dyn MessagePublisher>,
        correlation_id: impl Into<String>,
        workspace_id: impl Into<String>,
        kind: TriggerKind,
        name: impl Into<String>,
        skill: SkillDescriptor,
    ) -> Self {
        Self {
            publisher,
            correlation_id: correlation_id.into(),
            workspace_id: workspace_id.into(),
            kind,
            name: name.into(),
            skill,
        }
    }

    fn message(&self, status: &Status) -> Result<Vec<u8>> {
        let is_command = self.kind == TriggerKind::Command;
        let message = StatusMessage {
            api_version: "1",
            correlation_id: &self.correlation_id,
            team: Team {
                id: &self.workspace_id,
            },
            command: is_command.then_some(self.name.as_str()),
            event: (!is_command).then_some(self.name.as_str()),
            status: StatusBody {
                state: status.state,
                code: u8::from(status.is_failed()),
                reason: status.reason.as_deref(),
            },
            skill: SkillRef {
                id: &self.skill.id,
                namespace: &self.skill.namespace,
                name: &self.skill.name,
                version: &self.skill.version,
            },
        };
        Ok(serde_json::to_vec(&message)?)
    }
}

#[async_trait]
impl StatusPublisher for TopicStatusPublisher {
    async fn publish(&self, status: &Status) -> Result<()> {
        let data = self.message(status)?;
        let id = self
            .publisher
            .publish(&data, Some(&self.correlation_id))
            .await
            .map_err(|e| RuntimeError::Status(e.to_string()))?;
        tracing::debug!(state = %status.state, message_id = %id, "Published status message");
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Log only
// ─────────────────────────────────────────────────────────────────────────────

/// Logs statuses without sending them anywhere.
#[derive(Debug, Default)]
pub struct LogStatusPublisher;

#[async_trait]
impl StatusPublisher for LogStatusPublisher {
    async fn publish(&self, status: &Status) -> Result<()> {
        tracing::info!(
            state = %status.state,
            reason = status.reason.as_deref().unwrap_or_default(),
            "Execution status"
        );
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Preparation
// ─────────────────────────────────────────────────────────────────────────────

/// Final status for a handler outcome.
///
/// Errors map to a generic failure that names only the skill; interrupts
/// count as completions. Missing reasons get a default naming the skill and
/// trigger.
pub fn prepare_status(
    outcome: std::result::Result<Status, &anyhow::Error>,
    skill: &SkillDescriptor,
    trigger: &str,
) -> Status {
    match outcome {
        Ok(status) => {
            let verb = if status.is_failed() {
                "Unsuccessfully"
            } else {
                "Successfully"
            };
            let reason = status.reason.unwrap_or_else(|| {
                format!("{verb} invoked {}@{trigger}", skill.qualified_name())
            });
            Status::new(status.state).with_reason(reason)
        }
        Err(e) => match e.downcast_ref::<HandlerError>() {
            Some(HandlerError::Interrupted { reason }) => prepare_status(
                Ok(match reason {
                    Some(reason) => Status::completed().with_reason(reason.clone()),
                    None => Status::completed(),
                }),
                skill,
                trigger,
            ),
            _ => Status::failed().with_reason(format!("Error invoking {}", skill.qualified_name())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn skill() -> SkillDescriptor {
        SkillDescriptor::new("atomist", "go-sample-skill")
            .with_id("s-1")
            .with_version("1.0.0")
    }

    #[test]
    fn test_prepare_status_defaults() {
        let status = prepare_status(Ok(Status::completed()), &skill(), "on_push");
        assert_eq!(status.state, State::Completed);
        assert_eq!(
            status.reason.as_deref(),
            Some("Successfully invoked atomist/go-sample-skill@on_push")
        );

        let status = prepare_status(Ok(Status::failed()), &skill(), "on_push");
        assert_eq!(
            status.reason.as_deref(),
            Some("Unsuccessfully invoked atomist/go-sample-skill@on_push")
        );

        let status = prepare_status(Ok(Status::completed().with_reason("3 commits")), &skill(), "on_push");
        assert_eq!(status.reason.as_deref(), Some("3 commits"));
    }

    #[test]
    fn test_prepare_status_hides_error_details() {
        let err = anyhow::anyhow!("connection refused to 10.0.0.1 with password hunter2");
        let status = prepare_status(Err(&err), &skill(), "on_push");
        assert_eq!(status.state, State::Failed);
        assert_eq!(status.reason.as_deref(), Some("Error invoking atomist/go-sample-skill"));
    }

    #[test]
    fn test_prepare_status_interrupt_is_success() {
        let err: anyhow::Error = HandlerError::interrupt("nothing to do").into();
        let status = prepare_status(Err(&err), &skill(), "on_push");
        assert_eq!(status.state, State::Completed);
        assert_eq!(status.reason.as_deref(), Some("nothing to do"));
    }

    #[test]
    fn test_status_document() {
        assert_eq!(
            status_document(&Status::running()).unwrap(),
            "{:status {:state :running}}"
        );
        assert_eq!(
            status_document(&Status::failed().with_reason("no \"luck\"")).unwrap(),
            r#"{:status {:state :failed :reason "no \"luck\""}}"#
        );
    }

    #[tokio::test]
    async fn test_http_publisher_patches_status() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/executions/e-1"))
            .and(header("authorization", "Bearer tok"))
            .and(header("content-type", "application/edn"))
            .and(body_string("{:status {:state :completed :reason \"done\"}}"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let publisher = HttpStatusPublisher::new(
            HttpClient::new(Duration::from_secs(5)).unwrap(),
            format!("{}/executions/e-1", server.uri()),
            "tok",
            RetryPolicy::none(),
        );
        publisher
            .publish(&Status::completed().with_reason("done"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_http_publisher_surfaces_failures() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let publisher = HttpStatusPublisher::new(
            HttpClient::new(Duration::from_secs(5)).unwrap(),
            server.uri(),
            "tok",
            RetryPolicy::none(),
        );
        let err = publisher.publish(&Status::running()).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Status(_)), "got {err:?}");
    }

    struct Captured(parking_lot::Mutex<Vec<(Vec<u8>, Option<String>)>>);

    #[async_trait]
    impl MessagePublisher for Captured {
        async fn publish(&self, data: &[u8], ordering_key: Option<&str>) -> skiff_datalog::Result<String> {
            self.0
                .lock()
                .push((data.to_vec(), ordering_key.map(str::to_string)));
            Ok("m-1".to_string())
        }
    }

    #[tokio::test]
    async fn test_topic_publisher_message() {
        let captured = Arc::new(Captured(parking_lot::Mutex::new(Vec::new())));
        let publisher = TopicStatusPublisher::new(
            captured.clone(),
            "corr-1",
            "T1",
            TriggerKind::Subscription,
            "on_push",
            skill(),
        );
        publisher
            .publish(&Status::failed().with_reason("nope"))
            .await
            .unwrap();

        let messages = captured.0.lock();
        assert_eq!(messages.len(), 1);
        let (data, key) = &messages[0];
        assert_eq!(key.as_deref(), Some("corr-1"));
        let message: serde_json::Value = serde_json::from_slice(data).unwrap();
        assert_eq!(
            message,
            serde_json::json!({
                "api_version": "1",
                "correlation_id": "corr-1",
                "team": { "id": "T1" },
                "event": "on_push",
                "status": { "state": "failed", "code": 1, "reason": "nope" },
                "skill": { "id": "s-1", "namespace": "atomist", "name": "go-sample-skill", "version": "1.0.0" }
            })
        );
    }
}
