//! Handler trait and routing.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use skiff_types::{Status, TriggerKind};

use crate::context::ExecutionContext;

/// Result type returned by handlers. `None` means "completed, nothing to
/// report".
pub type HandlerResult = anyhow::Result<Option<Status>>;

/// User code invoked for one trigger occurrence.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: &ExecutionContext) -> HandlerResult;
}

/// Resolves handlers by trigger kind and name.
#[async_trait]
pub trait HandlerLookup: Send + Sync {
    async fn lookup(&self, kind: TriggerKind, name: &str) -> Option<Arc<dyn Handler>>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Closures
// ─────────────────────────────────────────────────────────────────────────────

struct FnHandler<F>(F);

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: for<'a> Fn(&'a ExecutionContext) -> BoxFuture<'a, HandlerResult> + Send + Sync,
{
    async fn handle(&self, ctx: &ExecutionContext) -> HandlerResult {
        (self.0)(ctx).await
    }
}

/// Wrap a closure returning a boxed future as a [`Handler`].
///
/// ```ignore
/// let handler = handler_fn(|ctx| async move {
///     ctx.log().info(format!("{} commits", ctx.data().as_array().map_or(0, Vec::len)));
///     Ok(None)
/// }.boxed());
/// ```
pub fn handler_fn<F>(f: F) -> Arc<dyn Handler>
where
    F: for<'a> Fn(&'a ExecutionContext) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

// ─────────────────────────────────────────────────────────────────────────────
// Chains
// ─────────────────────────────────────────────────────────────────────────────

struct Chain {
    handlers: Vec<Arc<dyn Handler>>,
}

#[async_trait]
impl Handler for Chain {
    async fn handle(&self, ctx: &ExecutionContext) -> HandlerResult {
        for handler in &self.handlers {
            if let Some(status) = handler.handle(ctx).await? {
                return Ok(Some(status));
            }
        }
        Ok(None)
    }
}

/// Run `handlers` in order until one returns a status.
pub fn chain(handlers: Vec<Arc<dyn Handler>>) -> Arc<dyn Handler> {
    Arc::new(Chain { handlers })
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Static handler table keyed by trigger kind and name.
#[derive(Default, Clone)]
pub struct HandlerRouter {
    handlers: HashMap<(TriggerKind, String), Arc<dyn Handler>>,
}

impl HandlerRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: TriggerKind, name: impl Into<String>, handler: Arc<dyn Handler>) {
        let name = name.into();
        tracing::debug!(%kind, %name, "Registered handler");
        self.handlers.insert((kind, name), handler);
    }

    pub fn with(mut self, kind: TriggerKind, name: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.register(kind, name, handler);
        self
    }

    pub fn with_subscription(self, name: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.with(TriggerKind::Subscription, name, handler)
    }

    pub fn with_sync_request(self, name: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.with(TriggerKind::SyncRequest, name, handler)
    }

    pub fn with_webhook(self, name: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.with(TriggerKind::Webhook, name, handler)
    }

    pub fn with_command(self, name: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.with(TriggerKind::Command, name, handler)
    }

    pub fn with_event(self, name: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        self.with(TriggerKind::Event, name, handler)
    }

    pub fn get(&self, kind: TriggerKind, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(&(kind, name.to_string())).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered routes, sorted.
    pub fn routes(&self) -> Vec<(TriggerKind, &str)> {
        let mut routes: Vec<_> = self
            .handlers
            .keys()
            .map(|(kind, name)| (*kind, name.as_str()))
            .collect();
        routes.sort_by(|a, b| a.1.cmp(b.1).then_with(|| a.0.as_str().cmp(b.0.as_str())));
        routes
    }
}

#[async_trait]
impl HandlerLookup for HandlerRouter {
    async fn lookup(&self, kind: TriggerKind, name: &str) -> Option<Arc<dyn Handler>> {
        self.get(kind, name)
    }
}
