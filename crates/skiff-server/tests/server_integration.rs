//! Integration tests for payload intake over real HTTP.

mod common;

use anyhow::Result;
use base64::Engine as _;
use futures::FutureExt;
use serde_json::json;
use skiff_runtime::{HandlerRouter, handler_fn};
use skiff_server::DispatchResponse;
use skiff_types::Status;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::TestServer;

fn on_push(status_server: &MockServer) -> serde_json::Value {
    json!({
        "type": "subscription",
        "execution_id": "exec-1",
        "workspace_id": "T1",
        "skill": { "id": "s1", "namespace": "atomist", "name": "go-sample-skill" },
        "subscription": {
            "name": "on_push",
            "result": [[{ "schema/entity-type": "git/push", "git.push/branch": "main" }]]
        },
        "urls": {
            "execution": format!("{}/executions/exec-1", status_server.uri()),
            "logs": format!("{}/executions/exec-1/logs", status_server.uri())
        },
        "token": "exec-token"
    })
}

async fn status_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;
    server
}

fn router() -> HandlerRouter {
    HandlerRouter::new().with_subscription(
        "on_push",
        handler_fn(|ctx| {
            async move {
                let branch = ctx.data()[0]["push"]["branch"]
                    .as_str()
                    .unwrap_or_default()
                    .to_string();
                Ok(Some(Status::completed().with_reason(format!("Pushed to {branch}"))))
            }
            .boxed()
        }),
    )
}

#[tokio::test]
async fn test_dispatched_payload_answers_created() -> Result<()> {
    let mocks = status_server().await;
    let server = TestServer::start(router()).await?;

    let response = server.post_payload(&on_push(&mocks)).await?;
    assert_eq!(response.status(), 201);
    let body: DispatchResponse = response.json().await?;
    assert_eq!(body.state.as_deref(), Some("completed"));
    assert_eq!(body.reason.as_deref(), Some("Pushed to main"));

    let requests = mocks.received_requests().await.unwrap_or_default();
    assert!(requests.iter().any(|r| r.method.as_str() == "PATCH"));
    Ok(())
}

#[tokio::test]
async fn test_push_envelope_is_unwrapped() -> Result<()> {
    let mocks = status_server().await;
    let server = TestServer::start(router()).await?;

    let data = base64::engine::general_purpose::STANDARD.encode(on_push(&mocks).to_string());
    let envelope = json!({
        "message": { "data": data, "messageId": "42" },
        "subscription": "projects/p/subscriptions/skill"
    });
    let response = server.post_payload(&envelope).await?;
    assert_eq!(response.status(), 201);
    Ok(())
}

#[tokio::test]
async fn test_unrecognized_payload_is_acknowledged() -> Result<()> {
    let server = TestServer::start(router()).await?;

    let response = server
        .post_payload(&json!({ "type": "heartbeat", "workspace_id": "T1" }))
        .await?;
    assert_eq!(response.status(), 202);
    Ok(())
}

#[tokio::test]
async fn test_context_failure_is_acknowledged() -> Result<()> {
    let server = TestServer::start(router()).await?;

    // An empty workspace id fails before any handler runs.
    let response = server
        .post_payload(&json!({
            "type": "event",
            "workspace_id": "",
            "skill": { "namespace": "ns", "name": "n" },
            "operation_name": "onPush"
        }))
        .await?;
    assert_eq!(response.status(), 202);
    Ok(())
}

#[tokio::test]
async fn test_malformed_body_is_rejected() -> Result<()> {
    let server = TestServer::start(router()).await?;

    let response = server
        .client
        .post(format!("{}/", server.base_url()))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await?;
    assert_eq!(response.status(), 400);
    let body: skiff_server::ErrorResponse = response.json().await?;
    assert_eq!(body.code, "serialization_error");
    Ok(())
}
