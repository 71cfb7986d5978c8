//! Shared types for the skiff skill runtime.
//!
//! Payloads, skill descriptors, statuses and the completion registry live
//! here so the datalog client and the runtime can share them without a
//! dependency cycle.

pub mod completion;
pub mod error;
pub mod payload;
pub mod skill;
pub mod status;

pub use completion::{
    CloseReport, CompletionCallback, CompletionFuture, CompletionRegistry, DEFAULT_PRIORITY,
    panic_message,
};
pub use error::HandlerError;
pub use payload::{
    CommandArg, CommandIncoming, ConfigurationRef, EventIncoming, ExecutionUrls, IncomingPayload,
    PayloadHeader, SubscriptionIncoming, SubscriptionTrigger, SyncRequestIncoming, TriggerKind,
    WebhookIncoming, WebhookTrigger,
};
pub use skill::{
    API_KEY_SECRET, ConfigurationParameter, ResourceProviderSelection, Secret,
    SelectedResourceProvider, SkillConfiguration, SkillConfigurations, SkillDescriptor,
    hide_string,
};
pub use status::{State, Status};
