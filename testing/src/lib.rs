//! # Statebus Testing
//!
//! Testing utilities and helpers for the Statebus architecture.
//!
//! This crate provides:
//! - Recording loggers and observers that capture every notification
//! - A fluent Given-When-Then harness for facades
//! - Tracing setup for test output
//!
//! ## Example
//!
//! ```
//! use statebus_core::{Command, CommandHandler, Event, EventHandler};
//! use statebus_testing::FacadeTest;
//!
//! #[derive(Debug, Clone, Default, PartialEq)]
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
//! FacadeTest::new(Count::default())
//!     .with_command_handler(CommandHandler::<Count, Increment>::single(|_, cmd| {
//!         Ok(Some(CountIncremented(cmd.0)))
//!     }))
//!     .with_event_handler(EventHandler::new(|s: &Count, e: &CountIncremented| Ok(Count(s.0 + e.0))))
//!     .given_event(CountIncremented(1))
//!     .when_command(Increment(2))
//!     .then_state(|state| assert_eq!(*state, Count(3)))
//!     .run_blocking();
//! ```

mod facade_test;

pub use facade_test::{FacadeTest, assertions};

/// Recording implementations of the logger and observer traits.
pub mod mocks {
    use std::sync::{Arc, Mutex, PoisonError};

    use statebus_core::error::BusError;
    use statebus_core::logging::{CommandLogger, Disposable, EventLogger};
    use statebus_core::message::{Command, Event, MessageType};
    use statebus_core::observer::{StateChanged, StateObserver};

    /// One notification captured by a [`RecordingLogger`].
    #[derive(Debug, Clone, PartialEq)]
    pub enum LogEntry<S> {
        /// A command handler returned
        CommandResult {
            /// The command's type
            command: MessageType,
            /// Types of the produced events, in order
            events: Vec<MessageType>,
        },
        /// A command could not be routed or its handler failed
        CommandError {
            /// The command's type
            command: MessageType,
            /// Rendered error
            error: String,
            /// Whether the handler body itself failed
            handler_failure: bool,
        },
        /// An event was applied
        EventResult {
            /// The event's type
            event: MessageType,
            /// The committed state
            state: S,
        },
        /// An event could not be routed or its handler failed
        EventError {
            /// The event's type
            event: MessageType,
            /// Rendered error
            error: String,
            /// Whether the handler body itself failed
            handler_failure: bool,
            /// The state the handler saw, still current
            state: S,
        },
        /// The owning facade was disposed
        Disposed,
    }

    impl<S> LogEntry<S> {
        /// Whether this entry is on an error channel.
        #[must_use]
        pub const fn is_error(&self) -> bool {
            matches!(self, Self::CommandError { .. } | Self::EventError { .. })
        }
    }

    /// Logger that records every notification in arrival order.
    ///
    /// Register it with `add_logger` to capture both channels.
    ///
    /// # Example
    ///
    /// ```
    /// use std::sync::Arc;
    /// use statebus_core::CombinedLogger;
    /// use statebus_runtime::Facade;
    /// use statebus_testing::mocks::RecordingLogger;
    ///
    /// let facade = Facade::with_initial_state(0_u32);
    /// let logger = Arc::new(RecordingLogger::<u32>::new());
    /// facade.add_logger(Arc::clone(&logger) as Arc<dyn CombinedLogger<u32>>).unwrap();
    /// assert!(logger.entries().is_empty());
    /// ```
    #[derive(Debug)]
    pub struct RecordingLogger<S> {
        entries: Mutex<Vec<LogEntry<S>>>,
    }

    impl<S> Default for RecordingLogger<S> {
        fn default() -> Self {
            Self {
                entries: Mutex::new(Vec::new()),
            }
        }
    }

    impl<S: Clone> RecordingLogger<S> {
        /// Create an empty recorder
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Everything recorded so far
        #[must_use]
        pub fn entries(&self) -> Vec<LogEntry<S>> {
            self.lock().clone()
        }

        /// Only the error-channel entries
        #[must_use]
        pub fn errors(&self) -> Vec<LogEntry<S>> {
            self.lock().iter().filter(|e| e.is_error()).cloned().collect()
        }

        /// States committed by successful event applications, in order
        #[must_use]
        pub fn committed_states(&self) -> Vec<S> {
            self.lock()
                .iter()
                .filter_map(|entry| match entry {
                    LogEntry::EventResult { state, .. } => Some(state.clone()),
                    _ => None,
                })
                .collect()
        }

        /// Event types produced by successful command handlers, in order
        #[must_use]
        pub fn produced_events(&self) -> Vec<MessageType> {
            self.lock()
                .iter()
                .filter_map(|entry| match entry {
                    LogEntry::CommandResult { events, .. } => Some(events.clone()),
                    _ => None,
                })
                .flatten()
                .collect()
        }

        /// How many times the dispose hook ran
        #[must_use]
        pub fn dispose_count(&self) -> usize {
            self.lock()
                .iter()
                .filter(|e| matches!(e, LogEntry::Disposed))
                .count()
        }

        /// Forget everything recorded so far
        pub fn clear(&self) {
            self.lock().clear();
        }

        fn push(&self, entry: LogEntry<S>) {
            self.lock().push(entry);
        }

        fn lock(&self) -> std::sync::MutexGuard<'_, Vec<LogEntry<S>>> {
            self.entries.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    impl<S> CommandLogger for RecordingLogger<S>
    where
        S: Clone + Send + Sync,
    {
        fn on_command_handler_result(&self, command: &dyn Command, events: &[Box<dyn Event>]) {
            self.push(LogEntry::CommandResult {
                command: command.message_type(),
                events: events.iter().map(|e| (**e).message_type()).collect(),
            });
        }

        fn on_command_handler_error(&self, error: &BusError, command: &dyn Command) {
            self.push(LogEntry::CommandError {
                command: command.message_type(),
                error: error.to_string(),
                handler_failure: error.is_handler_failure(),
            });
        }
    }

    impl<S> EventLogger<S> for RecordingLogger<S>
    where
        S: Clone + Send + Sync,
    {
        fn on_event_handler_result(&self, event: &dyn Event, new_state: &S) {
            self.push(LogEntry::EventResult {
                event: event.message_type(),
                state: new_state.clone(),
            });
        }

        fn on_event_handler_error(&self, error: &BusError, event: &dyn Event, state: &S) {
            self.push(LogEntry::EventError {
                event: event.message_type(),
                error: error.to_string(),
                handler_failure: error.is_handler_failure(),
                state: state.clone(),
            });
        }
    }

    impl<S: Clone> Disposable for RecordingLogger<S> {
        fn on_dispose(&self) {
            self.push(LogEntry::Disposed);
        }
    }

    /// One transition captured by a [`RecordingObserver`].
    #[derive(Debug, Clone, PartialEq)]
    pub struct ObservedChange<S> {
        /// State before the commit
        pub previous: S,
        /// State after the commit
        pub state: S,
        /// Type of the event that caused it
        pub event: MessageType,
    }

    /// Observer that records every transition it is notified of.
    #[derive(Debug)]
    pub struct RecordingObserver<S> {
        changes: Mutex<Vec<ObservedChange<S>>>,
    }

    impl<S> Default for RecordingObserver<S> {
        fn default() -> Self {
            Self {
                changes: Mutex::new(Vec::new()),
            }
        }
    }

    impl<S: Clone> RecordingObserver<S> {
        /// Create an empty recorder
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Create a recorder already wrapped for `subscribe`
        #[must_use]
        pub fn shared() -> Arc<Self> {
            Arc::new(Self::new())
        }

        /// Every transition, in notification order
        #[must_use]
        pub fn changes(&self) -> Vec<ObservedChange<S>> {
            self.changes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// The new state of every transition, in notification order
        #[must_use]
        pub fn states(&self) -> Vec<S> {
            self.changes().into_iter().map(|c| c.state).collect()
        }
    }

    impl<S> StateObserver<S> for RecordingObserver<S>
    where
        S: Clone + Send + Sync,
    {
        fn on_state_changed(&self, change: &StateChanged<'_, S>) {
            self.changes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(ObservedChange {
                    previous: S::clone(change.previous),
                    state: S::clone(change.state),
                    event: change.event.message_type(),
                });
        }
    }
}

/// Tracing setup for tests.
pub mod tracing_support {
    use tracing_subscriber::EnvFilter;

    /// Install a test-friendly `fmt` subscriber honoring `RUST_LOG`.
    ///
    /// Safe to call from every test; only the first call installs anything.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }
}

// Re-export commonly used items
pub use mocks::{LogEntry, ObservedChange, RecordingLogger, RecordingObserver};
pub use tracing_support::init_test_tracing;
