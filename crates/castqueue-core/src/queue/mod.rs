//! The task queue's public API and state machine (component C6).

pub mod dispatch;
pub mod state_machine;

pub use dispatch::{Queue, QueueError};
