//! Collaborator notifications for the spray-process core.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`SprayEvent`]: the closed set of notifications front ends consume.
//! - [`EventLogger`]: background task that logs every event.

pub mod bus;
pub mod logger;

pub use bus::{Envelope, EventBus, SprayEvent};
pub use logger::EventLogger;
