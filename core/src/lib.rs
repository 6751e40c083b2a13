//! # Statebus Core
//!
//! Core traits and types for the Statebus command/event runtime.
//!
//! This crate defines the vocabulary shared by the runtime and by code that
//! plugs handlers into it. It contains no dispatch logic.
//!
//! ## Core Concepts
//!
//! - **Command**: an intent to change state, routed by its concrete type
//! - **Event**: a fact that occurred, produced by command handlers
//! - **State**: an immutable snapshot; every applied event yields a new one
//! - **Command handler**: `(state snapshot, command) → events`, in one of five kinds
//! - **Event handler**: `(current state, event) → next state`
//! - **Loggers / observers**: notified after each handler invocation
//!
//! ## Data Flow
//!
//! ```text
//! caller ──► command bus ──► command handler ──► events (in order)
//!                                                   │
//!                     ┌─────────────────────────────┘
//!                     ▼
//!                 event bus ──► event handler ──► new state
//!                                                   │
//!                     event logger ◄────────────────┤
//!                     state observers ◄─────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use statebus_core::{CommandHandler, EventHandler, Command, Event};
//!
//! #[derive(Debug, Clone, Default)]
//! struct Count(i64);
//!
//! #[derive(Debug)]
//! struct Increment(i64);
//! impl Command for Increment {}
//!
//! #[derive(Debug)]
//! struct CountIncremented(i64);
//! impl Event for CountIncremented {}
//!
//! let commands = CommandHandler::<Count, Increment>::single(|_, cmd| {
//!     Ok(Some(CountIncremented(cmd.0)))
//! });
//! let events = EventHandler::new(|state: &Count, event: &CountIncremented| {
//!     Ok(Count(state.0 + event.0))
//! });
//! # let _ = (commands, events);
//! ```

pub mod error;
pub mod handler;
pub mod logging;
pub mod message;
pub mod observer;

pub use error::BusError;
pub use handler::{CommandHandler, EventHandler, HandlerError, HandlerKind, HandlerResult};
pub use logging::{CombinedLogger, CommandLogger, Disposable, EventLogger};
pub use message::{Command, Event, Events, Message, MessageKind, MessageType};
pub use observer::{StateChanged, StateObserver};

// Re-export for building `Events` batches in multi-event handlers
pub use smallvec::{SmallVec, smallvec};
