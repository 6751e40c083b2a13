//! Ergonomic testing utilities for facades
//!
//! This module provides a fluent API for testing command and event handlers
//! with readable Given-When-Then syntax.

#![allow(clippy::module_name_repetitions)] // FacadeTest is the natural name

use std::sync::Arc;

use statebus_core::error::Result;
use statebus_core::handler::{CommandHandler, EventHandler};
use statebus_core::logging::CombinedLogger;
use statebus_core::message::{Command, Event, MessageType};
use statebus_runtime::Facade;

use crate::mocks::{LogEntry, RecordingLogger};

type Setup<S> = Box<dyn FnOnce(&Facade<S>) -> Result<()>>;

type StateAssertion<S> = Box<dyn FnOnce(&S)>;

type EventAssertion = Box<dyn FnOnce(&[MessageType])>;

type LogAssertion<S> = Box<dyn FnOnce(&[LogEntry<S>])>;

type OutcomeAssertion = Box<dyn FnOnce(&Result<()>)>;

enum Stimulus {
    Command(Box<dyn Command>),
    Event(Box<dyn Event>),
}

/// Fluent API for testing handlers with Given-When-Then syntax
///
/// `given_*` events are applied directly before the `when_*` message. Log
/// and event assertions only see what the `when_*` message caused.
///
/// # Example
///
/// ```ignore
/// FacadeTest::new(Account::default())
///     .with_command_handler(withdraw_handler())
///     .with_event_handler(withdrawn_handler())
///     .given_event(Deposited(100))
///     .when_command(Withdraw(30))
///     .then_state(|account| assert_eq!(account.balance, 70))
///     .then_events(|events| assert_eq!(events.len(), 1))
///     .run()
///     .await;
/// ```
pub struct FacadeTest<S> {
    initial_state: S,
    setup: Vec<Setup<S>>,
    given: Vec<Box<dyn Event>>,
    when: Option<Stimulus>,
    state_assertions: Vec<StateAssertion<S>>,
    event_assertions: Vec<EventAssertion>,
    log_assertions: Vec<LogAssertion<S>>,
    outcome_assertions: Vec<OutcomeAssertion>,
}

impl<S> FacadeTest<S>
where
    S: Clone + Send + Sync + 'static,
{
    /// Create a new facade test starting from `initial_state`
    #[must_use]
    pub fn new(initial_state: S) -> Self {
        Self {
            initial_state,
            setup: Vec::new(),
            given: Vec::new(),
            when: None,
            state_assertions: Vec::new(),
            event_assertions: Vec::new(),
            log_assertions: Vec::new(),
            outcome_assertions: Vec::new(),
        }
    }

    /// Map a command handler on the facade under test
    #[must_use]
    pub fn with_command_handler<C: Command>(mut self, handler: CommandHandler<S, C>) -> Self {
        self.setup
            .push(Box::new(move |facade: &Facade<S>| facade.map_command_handler(handler)));
        self
    }

    /// Map an event handler on the facade under test
    #[must_use]
    pub fn with_event_handler<E: Event>(mut self, handler: EventHandler<S, E>) -> Self {
        self.setup
            .push(Box::new(move |facade: &Facade<S>| facade.map_event_handler(handler)));
        self
    }

    /// Apply an event before the message under test (Given)
    #[must_use]
    pub fn given_event<E: Event>(mut self, event: E) -> Self {
        self.given.push(Box::new(event));
        self
    }

    /// Dispatch a command (When)
    #[must_use]
    pub fn when_command<C: Command>(mut self, command: C) -> Self {
        self.when = Some(Stimulus::Command(Box::new(command)));
        self
    }

    /// Apply an event directly (When)
    #[must_use]
    pub fn when_event<E: Event>(mut self, event: E) -> Self {
        self.when = Some(Stimulus::Event(Box::new(event)));
        self
    }

    /// Add an assertion about the resulting state (Then)
    #[must_use]
    pub fn then_state<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&S) + 'static,
    {
        self.state_assertions.push(Box::new(assertion));
        self
    }

    /// Add an assertion about the event types the command produced (Then)
    #[must_use]
    pub fn then_events<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&[MessageType]) + 'static,
    {
        self.event_assertions.push(Box::new(assertion));
        self
    }

    /// Add an assertion about the logger notifications (Then)
    #[must_use]
    pub fn then_log<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&[LogEntry<S>]) + 'static,
    {
        self.log_assertions.push(Box::new(assertion));
        self
    }

    /// Add an assertion about what the dispatch call returned (Then)
    #[must_use]
    pub fn then_outcome<F>(mut self, assertion: F) -> Self
    where
        F: FnOnce(&Result<()>) + 'static,
    {
        self.outcome_assertions.push(Box::new(assertion));
        self
    }

    /// Run the test and execute all assertions
    ///
    /// # Panics
    ///
    /// Panics if no message was set with `when_command` / `when_event`, if a
    /// handler mapping or given event is rejected, or if any assertion fails.
    #[allow(clippy::panic)] // Test code can panic
    #[allow(clippy::expect_used)] // Test code can use expect
    pub async fn run(self) {
        let facade = Facade::with_initial_state(self.initial_state);
        for setup in self.setup {
            setup(&facade).expect("handler mapping should be accepted");
        }
        for event in self.given {
            facade
                .dispatch_event(event)
                .expect("given events should be routable");
        }

        let logger = Arc::new(RecordingLogger::<S>::new());
        facade
            .add_logger(Arc::clone(&logger) as Arc<dyn CombinedLogger<S>>)
            .expect("facade should be live");

        let outcome = match self
            .when
            .expect("Message must be set with when_command() or when_event()")
        {
            Stimulus::Command(command) => facade.dispatch_command(command).await,
            Stimulus::Event(event) => facade.dispatch_event(event),
        };

        let state = facade
            .get_current_state()
            .expect("facade should be live");
        for assertion in self.state_assertions {
            assertion(&state);
        }

        let events = logger.produced_events();
        for assertion in self.event_assertions {
            assertion(&events);
        }

        let entries = logger.entries();
        for assertion in self.log_assertions {
            assertion(&entries);
        }

        for assertion in self.outcome_assertions {
            assertion(&outcome);
        }
    }

    /// Run the test on a fresh current-thread Tokio runtime
    ///
    /// # Panics
    ///
    /// Panics if the runtime cannot be built, or for any reason
    /// [`run`](Self::run) panics.
    #[allow(clippy::expect_used)] // Test code can use expect
    pub fn run_blocking(self) {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("test runtime should build")
            .block_on(self.run());
    }
}

/// Helper assertions for recorded notifications
pub mod assertions {
    use statebus_core::message::MessageType;

    use crate::mocks::LogEntry;

    /// Assert that nothing was reported on an error channel
    ///
    /// # Panics
    ///
    /// Panics if any entry is an error.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_no_errors<S: std::fmt::Debug>(entries: &[LogEntry<S>]) {
        let errors: Vec<_> = entries.iter().filter(|e| e.is_error()).collect();
        assert!(errors.is_empty(), "Expected no errors, but found {errors:?}");
    }

    /// Assert the number of error-channel entries
    ///
    /// # Panics
    ///
    /// Panics if the number of errors doesn't match expected.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_error_count<S>(entries: &[LogEntry<S>], expected: usize) {
        let found = entries.iter().filter(|e| e.is_error()).count();
        assert_eq!(
            found, expected,
            "Expected {expected} errors, but found {found}"
        );
    }

    /// Assert that exactly the `expected` event types were produced, in order
    ///
    /// # Panics
    ///
    /// Panics if the produced types differ.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_event_types(events: &[MessageType], expected: &[MessageType]) {
        assert_eq!(
            events, expected,
            "Expected events {expected:?}, but found {events:?}"
        );
    }

    /// Assert that no event was produced
    ///
    /// # Panics
    ///
    /// Panics if `events` is not empty.
    #[allow(clippy::panic)] // Test assertion
    pub fn assert_no_events(events: &[MessageType]) {
        assert!(
            events.is_empty(),
            "Expected no events, but found {}: {events:?}",
            events.len()
        );
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use statebus_core::error::BusError;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Account {
        balance: i64,
    }

    #[derive(Debug)]
    struct Withdraw(i64);
    impl Command for Withdraw {}

    #[derive(Debug)]
    struct Close;
    impl Command for Close {}

    #[derive(Debug)]
    struct Deposited(i64);
    impl Event for Deposited {}

    #[derive(Debug)]
    struct Withdrawn(i64);
    impl Event for Withdrawn {}

    fn account() -> FacadeTest<Account> {
        FacadeTest::new(Account::default())
            .with_command_handler(CommandHandler::<Account, Withdraw>::single(|account, cmd| {
                anyhow::ensure!(account.balance >= cmd.0, "insufficient funds");
                Ok(Some(Withdrawn(cmd.0)))
            }))
            .with_event_handler(EventHandler::new(|a: &Account, e: &Deposited| {
                Ok(Account {
                    balance: a.balance + e.0,
                })
            }))
            .with_event_handler(EventHandler::new(|a: &Account, e: &Withdrawn| {
                Ok(Account {
                    balance: a.balance - e.0,
                })
            }))
    }

    #[tokio::test]
    async fn test_given_when_then() {
        account()
            .given_event(Deposited(100))
            .when_command(Withdraw(30))
            .then_state(|account| assert_eq!(account.balance, 70))
            .then_events(|events| {
                assertions::assert_event_types(events, &[MessageType::of::<Withdrawn>()]);
            })
            .then_log(|entries| assertions::assert_no_errors(entries))
            .then_outcome(|outcome| assert!(outcome.is_ok()))
            .run()
            .await;
    }

    #[tokio::test]
    async fn test_rejected_command() {
        account()
            .given_event(Deposited(10))
            .when_command(Withdraw(30))
            .then_state(|account| assert_eq!(account.balance, 10))
            .then_events(|events| assertions::assert_no_events(events))
            .then_log(|entries| assertions::assert_error_count(entries, 1))
            .run()
            .await;
    }

    #[tokio::test]
    async fn test_unroutable_outcome() {
        account()
            .when_command(Close)
            .then_outcome(|outcome| {
                assert!(matches!(outcome, Err(BusError::UnroutableMessage { .. })));
            })
            .run()
            .await;
    }

    #[test]
    fn test_when_event_blocking() {
        account()
            .when_event(Deposited(5))
            .then_state(|account| assert_eq!(account.balance, 5))
            .then_log(|entries| assert_eq!(entries.len(), 1))
            .run_blocking();
    }
}
