//! Execution pipeline for skiff skills.
//!
//! An incoming payload becomes an [`ExecutionContext`] through a
//! [`ContextFactory`]; [`process_event`] resolves the handler, publishes the
//! running and final statuses and always closes the context, which drains
//! its completion registry (client statistics, handler cleanup, and finally
//! the execution log flush).
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use futures::FutureExt;
//! use skiff_runtime::{
//!     DefaultContextFactory, Dispatcher, HandlerRouter, SharedResources, handler_fn,
//! };
//! use skiff_types::{IncomingPayload, Status};
//!
//! # async fn example(payload: IncomingPayload) -> skiff_runtime::Result<()> {
//! let router = HandlerRouter::new().with_subscription(
//!     "on_push",
//!     handler_fn(|ctx| {
//!         async move {
//!             ctx.log().info("Received push");
//!             Ok(Some(Status::completed().with_reason("Push processed")))
//!         }
//!         .boxed()
//!     }),
//! );
//! let resources = SharedResources::from_config(&Default::default())?;
//! let dispatcher = Dispatcher::new(
//!     Arc::new(router),
//!     Arc::new(DefaultContextFactory::new(resources)),
//! );
//! dispatcher.dispatch(payload).await?;
//! # Ok(())
//! # }
//! ```

pub mod collaborators;
pub mod configuration;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod log;
pub mod status;
pub mod steps;

pub use collaborators::{CloneOptions, Project, ProjectLoader, RepositoryId, StorageProvider};
pub use configuration::{Configuration, ResourceProvider, extract_configurations};
pub use context::{
    ContextFactory, DefaultContextFactory, ExecutionContext, SharedResources, trigger_data,
};
pub use dispatch::{CLOSING_PRIORITY, Dispatcher, process_event};
pub use error::{Result, RuntimeError};
pub use handler::{Handler, HandlerLookup, HandlerResult, HandlerRouter, chain, handler_fn};
pub use log::{ExecutionLog, LOG_BATCH_SIZE, LOG_FLUSH_PRIORITY, LogEntry, LogSink, Severity};
pub use status::{
    HttpStatusPublisher, LogStatusPublisher, StatusPublisher, TopicStatusPublisher,
    prepare_status, status_document,
};
pub use steps::{Step, StepListener, run_steps};
