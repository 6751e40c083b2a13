//! Fan-out logger collection.
//!
//! Holds every registered command, event and combined logger in one list and
//! forwards each notification to the loggers subscribed to that channel, in
//! registration order across all three kinds. Combined loggers are stored once
//! and receive both channels, so disposal reaches each logger exactly once.

use std::sync::{Arc, PoisonError, RwLock};

use statebus_core::error::BusError;
use statebus_core::logging::{CombinedLogger, CommandLogger, Disposable, EventLogger};
use statebus_core::message::{Command, Event};

/// A registered logger, tagged with the channels it listens on.
enum Registered<S> {
    Command(Arc<dyn CommandLogger>),
    Event(Arc<dyn EventLogger<S>>),
    Combined(Arc<dyn CombinedLogger<S>>),
}

impl<S> Clone for Registered<S> {
    fn clone(&self) -> Self {
        match self {
            Self::Command(logger) => Self::Command(Arc::clone(logger)),
            Self::Event(logger) => Self::Event(Arc::clone(logger)),
            Self::Combined(logger) => Self::Combined(Arc::clone(logger)),
        }
    }
}

impl<S> Registered<S> {
    fn dispose(&self) {
        match self {
            Self::Command(logger) => logger.on_dispose(),
            Self::Event(logger) => logger.on_dispose(),
            Self::Combined(logger) => logger.on_dispose(),
        }
    }
}

/// Collection of loggers notified by the buses.
pub struct LoggerCollection<S> {
    loggers: RwLock<Vec<Registered<S>>>,
}

impl<S> Default for LoggerCollection<S> {
    fn default() -> Self {
        Self {
            loggers: RwLock::new(Vec::new()),
        }
    }
}

impl<S> LoggerCollection<S> {
    /// Create an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a command logger.
    pub fn add_command_logger(&self, logger: Arc<dyn CommandLogger>) {
        self.push(Registered::Command(logger));
    }

    /// Add an event logger.
    pub fn add_event_logger(&self, logger: Arc<dyn EventLogger<S>>) {
        self.push(Registered::Event(logger));
    }

    /// Add a logger for both channels.
    pub fn add_logger(&self, logger: Arc<dyn CombinedLogger<S>>) {
        self.push(Registered::Combined(logger));
    }

    /// Remove a command logger by identity.
    pub fn remove_command_logger(&self, logger: &Arc<dyn CommandLogger>) -> bool {
        self.remove_first(|entry| matches!(entry, Registered::Command(l) if Arc::ptr_eq(l, logger)))
    }

    /// Remove an event logger by identity.
    pub fn remove_event_logger(&self, logger: &Arc<dyn EventLogger<S>>) -> bool {
        self.remove_first(|entry| matches!(entry, Registered::Event(l) if Arc::ptr_eq(l, logger)))
    }

    /// Remove a combined logger by identity.
    pub fn remove_logger(&self, logger: &Arc<dyn CombinedLogger<S>>) -> bool {
        self.remove_first(|entry| matches!(entry, Registered::Combined(l) if Arc::ptr_eq(l, logger)))
    }

    /// Total number of registered loggers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.loggers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no logger is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every logger's dispose hook once and drop all loggers.
    pub fn dispose(&self) {
        let loggers = std::mem::take(
            &mut *self
                .loggers
                .write()
                .unwrap_or_else(PoisonError::into_inner),
        );
        tracing::debug!(count = loggers.len(), "Disposing loggers");

        for logger in &loggers {
            logger.dispose();
        }
    }

    fn push(&self, entry: Registered<S>) {
        self.loggers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    fn remove_first(&self, matches: impl Fn(&Registered<S>) -> bool) -> bool {
        let mut loggers = self
            .loggers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match loggers.iter().position(matches) {
            Some(index) => {
                loggers.remove(index);
                true
            },
            None => false,
        }
    }

    // Loggers may register or remove loggers from their callback, so the list
    // is cloned out before anyone is called.
    fn snapshot(&self) -> Vec<Registered<S>> {
        self.loggers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<S> Disposable for LoggerCollection<S> {
    fn on_dispose(&self) {
        self.dispose();
    }
}

impl<S> CommandLogger for LoggerCollection<S>
where
    S: Send + Sync,
{
    fn on_command_handler_result(&self, command: &dyn Command, events: &[Box<dyn Event>]) {
        for entry in &self.snapshot() {
            match entry {
                Registered::Command(logger) => logger.on_command_handler_result(command, events),
                Registered::Combined(logger) => logger.on_command_handler_result(command, events),
                Registered::Event(_) => {},
            }
        }
    }

    fn on_command_handler_error(&self, error: &BusError, command: &dyn Command) {
        for entry in &self.snapshot() {
            match entry {
                Registered::Command(logger) => logger.on_command_handler_error(error, command),
                Registered::Combined(logger) => logger.on_command_handler_error(error, command),
                Registered::Event(_) => {},
            }
        }
    }
}

impl<S> EventLogger<S> for LoggerCollection<S>
where
    S: Send + Sync,
{
    fn on_event_handler_result(&self, event: &dyn Event, new_state: &S) {
        for entry in &self.snapshot() {
            match entry {
                Registered::Event(logger) => logger.on_event_handler_result(event, new_state),
                Registered::Combined(logger) => logger.on_event_handler_result(event, new_state),
                Registered::Command(_) => {},
            }
        }
    }

    fn on_event_handler_error(&self, error: &BusError, event: &dyn Event, state: &S) {
        for entry in &self.snapshot() {
            match entry {
                Registered::Event(logger) => logger.on_event_handler_error(error, event, state),
                Registered::Combined(logger) => logger.on_event_handler_error(error, event, state),
                Registered::Command(_) => {},
            }
        }
    }
}
