//! Event dispatch: context, handler, status, close.
//!
//! [`process_event`] drives one invocation through
//! `Received -> Dispatched -> Succeeded | Failed -> Closed`. Once a context
//! exists, its completion registry is drained exactly once whatever the
//! handler or the status publisher does.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use skiff_types::{CompletionCallback, HandlerError, IncomingPayload, Status, panic_message};
use uuid::Uuid;

use crate::context::ContextFactory;
use crate::error::{Result, RuntimeError};
use crate::handler::HandlerLookup;
use crate::log::LOG_FLUSH_PRIORITY;
use crate::status::prepare_status;

/// Completion priority of the dispatch-complete log line: just before the
/// log flush.
pub const CLOSING_PRIORITY: i64 = LOG_FLUSH_PRIORITY - 1;

/// Process one payload.
///
/// Returns `Ok(None)` for payloads no context can be built for, the
/// published status otherwise. `Err` means the pipeline itself failed
/// before a context existed.
pub async fn process_event(
    payload: Arc<IncomingPayload>,
    lookup: &dyn HandlerLookup,
    factory: &dyn ContextFactory,
) -> Result<Option<Status>> {
    let execution_id = payload
        .header()
        .and_then(|h| h.execution_id.clone())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let ctx = match factory.create(payload, &execution_id).await {
        Ok(Some(ctx)) => ctx,
        Ok(None) => {
            tracing::warn!(%execution_id, "Unrecognized payload, nothing to dispatch");
            return Ok(None);
        }
        Err(e) => {
            tracing::error!(%execution_id, error = %e, "Failed to create execution context");
            return Err(e);
        }
    };

    let kind = ctx.kind();
    let name = ctx.name().to_string();

    let log = ctx.log().clone();
    let label = name.clone();
    ctx.on_complete(
        CompletionCallback::new(move || async move {
            log.debug(format!("Closing event handler '{label}'"));
            Ok(())
        })
        .named("dispatch complete")
        .with_priority(CLOSING_PRIORITY),
    );

    ctx.log().info(format!(
        "Invoking {kind} handler '{name}' of {}",
        ctx.skill().qualified_name()
    ));
    if let Err(e) = ctx.status().publish(&Status::running()).await {
        tracing::warn!(error = %e, "Failed to publish running status");
    }

    let outcome: anyhow::Result<Status> = match lookup.lookup(kind, &name).await {
        None => Err(RuntimeError::HandlerNotFound {
            kind,
            name: name.clone(),
        }
        .into()),
        Some(handler) => match AssertUnwindSafe(handler.handle(&ctx)).catch_unwind().await {
            Ok(Ok(status)) => Ok(status.unwrap_or_else(Status::completed)),
            Ok(Err(e)) => Err(e),
            Err(panic) => Err(anyhow::anyhow!(
                "handler panicked: {}",
                panic_message(panic.as_ref())
            )),
        },
    };

    if let Err(e) = &outcome {
        match e.downcast_ref::<HandlerError>() {
            Some(interrupt) if interrupt.is_interrupt() => {
                ctx.log().info(format!("Handler '{name}' exited early: {e}"));
            }
            _ => {
                tracing::error!(%kind, %name, error = %format!("{e:#}"), "Handler failed");
                ctx.log().error(format!("Error occurred: {e:#}"));
            }
        }
    }

    let status = prepare_status(outcome.as_ref().cloned(), ctx.skill(), &name);
    if let Err(e) = ctx.status().publish(&status).await {
        tracing::warn!(error = %e, state = %status.state, "Failed to publish final status");
    }

    let report = ctx.close().await;
    tracing::info!(
        %kind,
        %name,
        %execution_id,
        state = %status.state,
        callbacks = report.completed,
        failed_callbacks = report.failed,
        "Dispatched event"
    );
    Ok(Some(status))
}

/// Cloneable pairing of a handler lookup and a context factory.
#[derive(Clone)]
pub struct Dispatcher {
    lookup: Arc<dyn HandlerLookup>,
    factory: Arc<dyn ContextFactory>,
}

impl Dispatcher {
    pub fn new(lookup: Arc<dyn HandlerLookup>, factory: Arc<dyn ContextFactory>) -> Self {
        Self { lookup, factory }
    }

    pub async fn dispatch(&self, payload: IncomingPayload) -> Result<Option<Status>> {
        process_event(Arc::new(payload), self.lookup.as_ref(), self.factory.as_ref()).await
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}
