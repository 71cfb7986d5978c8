//! HTTP routes.

pub mod events;
pub mod health;

pub use events::{DispatchResponse, events_handler};
pub use health::{HealthResponse, health_routes};
