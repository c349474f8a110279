//! State management with actor pattern
//!
//! StateManager owns the Workflow and processes messages via channels, so
//! graph mutations and their cascades are serialized and checkpointed.

mod manager;
mod messages;

pub use manager::StateManager;
pub use messages::{StateCommand, StateError, StateResponse};
