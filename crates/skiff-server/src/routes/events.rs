//! Payload intake.
//!
//! `POST /` accepts a payload document, either raw or wrapped in a push
//! subscription envelope (`{"message": {"data": "<base64 json>"}}`), and
//! dispatches it. A dispatched invocation answers 201. Pipeline failures and
//! payloads nothing handles answer 202 so the bus does not redeliver them.

use axum::{Json, body::Bytes, extract::State, http::StatusCode};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use skiff_types::{IncomingPayload, Status};

use crate::error::{Result, ServerError};
use crate::state::AppState;

/// Acknowledgement body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResponse {
    /// Final execution state, absent when nothing was dispatched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Final status reason or why nothing was dispatched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl DispatchResponse {
    fn dispatched(status: &Status) -> Self {
        Self {
            state: Some(status.state.to_string()),
            reason: status.reason.clone(),
        }
    }

    fn acknowledged(reason: impl Into<String>) -> Self {
        Self {
            state: None,
            reason: Some(reason.into()),
        }
    }
}

/// Decode the request body, unwrapping a push envelope if present.
pub fn decode_payload(body: &[u8]) -> Result<IncomingPayload> {
    let value: serde_json::Value = serde_json::from_slice(body)?;

    let data = value
        .get("message")
        .and_then(|m| m.get("data"))
        .and_then(|d| d.as_str())
        .map(str::to_owned);
    let value = match data {
        Some(data) => {
            let bytes = STANDARD
                .decode(data)
                .map_err(|e| ServerError::BadRequest(format!("Invalid message data: {e}")))?;
            serde_json::from_slice(&bytes)?
        }
        None => value,
    };

    Ok(IncomingPayload::from_value(value)?)
}

/// Dispatch one payload.
pub async fn events_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<DispatchResponse>)> {
    let payload = decode_payload(&body)?;
    tracing::debug!(payload = %payload.redacted(), "Received payload");

    // Run on its own task so a panic outside the handler guard still gets acknowledged.
    let dispatcher = state.dispatcher.clone();
    let outcome = tokio::spawn(async move { dispatcher.dispatch(payload).await }).await;

    let response = match outcome {
        Ok(Ok(Some(status))) => (StatusCode::CREATED, Json(DispatchResponse::dispatched(&status))),
        Ok(Ok(None)) => (
            StatusCode::ACCEPTED,
            Json(DispatchResponse::acknowledged("Unrecognized payload")),
        ),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Dispatch failed");
            (
                StatusCode::ACCEPTED,
                Json(DispatchResponse::acknowledged("Dispatch failed")),
            )
        }
        Err(e) => {
            tracing::error!(error = %e, "Dispatch task aborted");
            (
                StatusCode::ACCEPTED,
                Json(DispatchResponse::acknowledged("Dispatch failed")),
            )
        }
    };
    Ok(response)
}
