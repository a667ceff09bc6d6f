//! Runtime plumbing for the smart home simulator
//!
//! Provides the event model, the bounded event bus with its worker pool,
//! and the periodic task helper used by every background service.

pub mod bus;
pub mod error;
pub mod event;
pub mod listener;
pub mod periodic;

pub use bus::{EventBus, EventBusConfig, EventBusStats};
pub use error::ListenerError;
pub use event::{Event, EventKind};
pub use listener::{AlertListener, EventListener, FnListener, LoggingListener};
pub use periodic::PeriodicTask;
