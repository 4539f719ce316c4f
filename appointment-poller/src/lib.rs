//! Appointment poller: watches a remote scheduling service for a slot
//! earlier than the held appointment and rebooks it.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod notifier;
pub mod portal;
pub mod reference;
pub mod scheduler;

pub use engine::{CycleOutcome, Engine, Running};
pub use error::{PollerError, PollerResult};
