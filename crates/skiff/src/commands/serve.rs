//! Serve command - runs the payload intake server.
//!
//! The CLI has no skill code of its own, so every trigger is answered by an
//! echo handler that writes the trigger data to the execution log. Skills
//! embed `skiff-server` with their own [`HandlerRouter`](skiff_runtime::HandlerRouter).

use std::sync::Arc;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use clap::Args;
use futures::FutureExt;
use skiff_runtime::{
    DefaultContextFactory, Dispatcher, Handler, HandlerLookup, SharedResources, handler_fn,
};
use skiff_server::{Server, ServerConfig};
use skiff_types::{Status, TriggerKind};

use super::Context;

/// Arguments for the serve command.
///
/// CLI arguments override config file values.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Port to listen on (overrides config)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Address to bind to (overrides config)
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Maximum request body size in bytes
    #[arg(long)]
    pub max_body_size: Option<usize>,
}

/// Answers every trigger by logging its data.
struct EchoLookup;

#[async_trait]
impl HandlerLookup for EchoLookup {
    async fn lookup(&self, kind: TriggerKind, name: &str) -> Option<Arc<dyn Handler>> {
        tracing::debug!(%kind, name, "Echoing trigger");
        Some(handler_fn(|ctx| {
            async move {
                ctx.log()
                    .info(format!("{} '{}' data: {}", ctx.kind(), ctx.name(), ctx.data()));
                Ok(Some(
                    Status::completed().with_reason(format!("Echoed {} '{}'", ctx.kind(), ctx.name())),
                ))
            }
            .boxed()
        }))
    }
}

/// Run the serve command.
pub async fn run(args: ServeArgs, ctx: &Context) -> Result<()> {
    let config = &ctx.loaded.config;

    let mut server_config = config.server();
    if let Some(port) = args.port {
        server_config.port = port;
    }
    if let Some(bind) = args.bind {
        server_config.bind = bind;
    }
    let mut server_config = ServerConfig::try_from(&server_config)?;
    if let Some(size) = args.max_body_size {
        server_config = server_config.with_max_body_size(size);
    }

    let resources =
        SharedResources::from_config(config).context("Failed to build shared resources")?;
    tracing::info!(endpoint = %resources.endpoint, "Using query endpoint");

    let dispatcher = Dispatcher::new(
        Arc::new(EchoLookup),
        Arc::new(DefaultContextFactory::new(resources)),
    );

    let server = Server::new(dispatcher, server_config);
    if !ctx.json_output {
        println!("Listening on http://{}", server.bind_address());
    }
    server.run().await?;
    Ok(())
}
