//! Logger surface for command and event handling outcomes.
//!
//! Loggers are fire-and-forget sinks: the buses call them after each handler
//! invocation and never inspect a return value. They are the only place where
//! handler failures become visible, since failures are contained at the bus
//! boundary.
//!
//! A type implementing both [`CommandLogger`] and [`EventLogger`] is a
//! [`CombinedLogger`] automatically. Both channels share one [`Disposable`]
//! hook, so a combined logger has a single place to release resources.

use crate::error::BusError;
use crate::message::{Command, Event};

/// Cleanup hook run when the owning facade is disposed.
///
/// Loggers without resources can use the empty default:
///
/// ```
/// use statebus_core::logging::Disposable;
///
/// struct Stdout;
/// impl Disposable for Stdout {}
/// ```
pub trait Disposable {
    /// Called once when the owning facade is disposed.
    fn on_dispose(&self) {}
}

/// Receives the outcome of every command dispatch.
pub trait CommandLogger: Disposable + Send + Sync {
    /// Called after a command handler returned successfully, with the events it
    /// produced (possibly none), before they are applied.
    fn on_command_handler_result(&self, command: &dyn Command, events: &[Box<dyn Event>]);

    /// Called when a command could not be routed or its handler failed.
    fn on_command_handler_error(&self, error: &BusError, command: &dyn Command);
}

/// Receives the outcome of every event application.
pub trait EventLogger<S>: Disposable + Send + Sync {
    /// Called after `new_state` has been committed for `event`.
    fn on_event_handler_result(&self, event: &dyn Event, new_state: &S);

    /// Called when an event could not be routed or its handler failed.
    ///
    /// `state` is the state the handler was invoked with, which remains the
    /// current state.
    fn on_event_handler_error(&self, error: &BusError, event: &dyn Event, state: &S);
}

/// A logger for both channels.
pub trait CombinedLogger<S>: CommandLogger + EventLogger<S> {}

impl<S, T> CombinedLogger<S> for T where T: CommandLogger + EventLogger<S> {}
