//! # Statebus Runtime
//!
//! Runtime implementation for the Statebus architecture.
//!
//! This crate provides the [`Facade`] that routes commands to handlers, applies
//! the resulting events to a single immutable state, and notifies observers
//! and loggers of every outcome.
//!
//! ## Core Components
//!
//! - **Facade**: Composition root and lifecycle owner; the one call-in surface
//! - **Command Bus**: Resolves a command's handler, runs it against a state
//!   snapshot and forwards the produced events one by one
//! - **Event Bus**: Applies each event to the latest state inside the commit
//!   critical section
//! - **State Manager**: Holds the current state and the observer list
//! - **Command Handler Executor**: Bounded worker pool for async handler bodies
//! - **Logger Collection**: Fans notifications out to every registered logger
//!
//! ## Example
//!
//! ```
//! use statebus_core::{Command, CommandHandler, Event, EventHandler, StateChanged};
//! use statebus_runtime::{Facade, FacadeConfig};
//! use std::sync::Arc;
//!
//! #[derive(Debug, Clone, Default, PartialEq)]
//! struct Cart {
//!     items: Vec<String>,
//! }
//!
//! #[derive(Debug)]
//! struct AddItem(String);
//! impl Command for AddItem {}
//!
//! #[derive(Debug)]
//! struct ItemAdded(String);
//! impl Event for ItemAdded {}
//!
//! # tokio_test::block_on(async {
//! let facade = Facade::new(FacadeConfig::new(Cart::default()))?;
//!
//! facade.map_command_handler(CommandHandler::<Cart, AddItem>::single(|_, cmd| {
//!     Ok(Some(ItemAdded(cmd.0.clone())))
//! }))?;
//! facade.map_event_handler(EventHandler::new(|cart: &Cart, event: &ItemAdded| {
//!     let mut next = cart.clone();
//!     next.items.push(event.0.clone());
//!     Ok(next)
//! }))?;
//! facade.subscribe(Arc::new(|change: &StateChanged<'_, Cart>| {
//!     println!("cart now holds {} items", change.state.items.len());
//! }))?;
//!
//! facade.handle_command(AddItem("apple".into())).await?;
//! assert_eq!(facade.get_current_state()?.items, vec!["apple".to_string()]);
//!
//! facade.dispose()?;
//! # Ok::<(), statebus_core::BusError>(())
//! # }).unwrap();
//! ```

/// Exact-type handler registry shared by both buses
pub mod registry;

/// State container and commit critical section
pub mod state;

/// Bounded worker pool for async command handler bodies
pub mod executor;

/// Logger fan-out
pub mod logging;

/// Event routing and state commits
pub mod event_bus;

/// Command routing and event forwarding
pub mod command_bus;

/// Composition root
pub mod facade;

/// Prometheus metrics for observability
pub mod metrics;

pub use command_bus::CommandBus;
pub use event_bus::EventBus;
pub use executor::{CommandHandlerExecutor, ExecutorError};
pub use facade::{Facade, FacadeConfig};
pub use logging::LoggerCollection;
pub use registry::HandlerRegistry;
pub use state::{StateManager, StateTransition, StateUpdate};
