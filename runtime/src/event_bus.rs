//! Event bus: applies events to the current state.
//!
//! Each event is routed to the single handler mapped for its concrete type and
//! applied to the latest committed state inside the state manager's commit
//! critical section. Logger and observer notifications are queued in commit
//! order before the section is left, and delivered after it:
//!
//! ```text
//! enter section ─► read current ─► handler(current, event)
//!                                    │
//!                  ┌─────── Ok ──────┴──── Err / panic ─┐
//!                  ▼                                    ▼
//!               commit                          state unchanged
//!                  │                                    │
//!                  └────► queue notification ◄──────────┘
//!                                │
//!                          leave section
//!                                │
//!                  deliver queued notifications:
//!            event logger (result or error), state observers
//! ```
//!
//! One caller at a time delivers. A dispatch made while notifications are
//! being delivered, including one made from an observer or logger callback,
//! only queues its own and returns; the delivering caller picks them up next.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use statebus_core::error::{BusError, Result};
use statebus_core::handler::EventHandler;
use statebus_core::logging::EventLogger;
use statebus_core::message::{Event, MessageKind, MessageType};

use crate::executor::catch_panic;
use crate::logging::LoggerCollection;
use crate::metrics::EventMetrics;
use crate::registry::HandlerRegistry;
use crate::state::{StateManager, StateTransition};

/// Outcome of one event application, waiting to be reported.
enum Notification<S> {
    Applied {
        event: Arc<dyn Event>,
        transition: StateTransition<S>,
    },
    Failed {
        event: Arc<dyn Event>,
        error: BusError,
        state: Arc<S>,
    },
}

struct Outbox<S> {
    queue: VecDeque<Notification<S>>,
    delivering: bool,
}

/// Routes events to their handler and commits the resulting state.
pub struct EventBus<S> {
    handlers: HandlerRegistry<EventHandler<S, dyn Event>>,
    state: Arc<StateManager<S>>,
    loggers: Arc<LoggerCollection<S>>,
    outbox: Mutex<Outbox<S>>,
}

impl<S> EventBus<S>
where
    S: Send + Sync + 'static,
{
    /// Create an event bus over `state`, reporting to `loggers`.
    #[must_use]
    pub fn new(state: Arc<StateManager<S>>, loggers: Arc<LoggerCollection<S>>) -> Self {
        Self {
            handlers: HandlerRegistry::new(MessageKind::Event),
            state,
            loggers,
            outbox: Mutex::new(Outbox {
                queue: VecDeque::new(),
                delivering: false,
            }),
        }
    }

    /// Map the handler for events of type `E`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::DuplicateHandler`] if `E` already has a handler.
    pub fn map_event_handler<E: Event>(&self, handler: EventHandler<S, E>) -> Result<()> {
        self.handlers
            .register(MessageType::of::<E>(), handler.erase())
    }

    /// Remove the handler for events of type `E`.
    pub fn unmap_event_handler<E: Event>(&self) -> bool {
        self.handlers.unregister(&MessageType::of::<E>())
    }

    /// Whether a handler is mapped for `message_type`.
    #[must_use]
    pub fn is_mapped(&self, message_type: &MessageType) -> bool {
        self.handlers.contains(message_type)
    }

    /// Drop every handler mapping.
    pub fn clear(&self) {
        self.handlers.clear();
    }

    /// Apply `event` to the current state.
    ///
    /// A failing or panicking handler is reported to the event loggers and
    /// leaves the state unchanged; it is not an error for the caller.
    ///
    /// Event handlers run inside the commit critical section and block other
    /// event applications on the same state while they run, so they should be
    /// short and must not block on I/O.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::UnroutableMessage`] if no handler is mapped for the
    /// event's concrete type.
    #[tracing::instrument(skip_all, name = "handle_event", fields(event = %(*event).message_type()))]
    pub fn handle_event(&self, event: Box<dyn Event>) -> Result<()> {
        let event: Arc<dyn Event> = Arc::from(event);
        let message_type = (*event).message_type();
        EventMetrics::record_dispatch();

        let handler = match self.handlers.resolve(&message_type) {
            Ok(handler) => handler,
            Err(error) => {
                tracing::warn!(%error, "Dropping unroutable event");
                EventMetrics::record_unroutable();
                self.loggers
                    .on_event_handler_error(&error, &*event, &self.state.current());
                return Err(error);
            },
        };

        {
            let mut update = self.state.begin_update();
            let current = update.current();

            let start = Instant::now();
            let result = catch_panic(|| handler.apply(&current, &*event));
            EventMetrics::record_execution(start.elapsed());

            let notification = match result {
                Ok(next) => {
                    tracing::debug!("Event applied");
                    Notification::Applied {
                        transition: update.commit(next),
                        event,
                    }
                },
                Err(source) => {
                    let error = BusError::HandlerExecution {
                        kind: MessageKind::Event,
                        message_type,
                        source,
                    };
                    tracing::warn!(%error, "Event handler failed, state unchanged");
                    EventMetrics::record_failure();
                    Notification::Failed {
                        event,
                        error,
                        state: current,
                    }
                },
            };

            // Queued before the section is left, so queue order is commit order.
            self.outbox().queue.push_back(notification);
        }

        self.deliver_pending();
        Ok(())
    }

    fn outbox(&self) -> MutexGuard<'_, Outbox<S>> {
        self.outbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn deliver_pending(&self) {
        {
            let mut outbox = self.outbox();
            if outbox.delivering {
                tracing::trace!(pending = outbox.queue.len(), "Notifications queued behind delivery");
                return;
            }
            outbox.delivering = true;
        }

        let _release = ReleaseOnPanic(self);
        loop {
            let next = {
                let mut outbox = self.outbox();
                match outbox.queue.pop_front() {
                    Some(notification) => notification,
                    None => {
                        outbox.delivering = false;
                        return;
                    },
                }
            };
            self.deliver(next);
        }
    }

    fn deliver(&self, notification: Notification<S>) {
        match notification {
            Notification::Applied { event, transition } => {
                self.loggers
                    .on_event_handler_result(&*event, &transition.state);
                self.state.notify(&transition, &*event);
            },
            Notification::Failed {
                event,
                error,
                state,
            } => {
                self.loggers
                    .on_event_handler_error(&error, &*event, &state);
            },
        }
    }
}

/// Hands delivery back if a logger or observer panics mid-delivery.
struct ReleaseOnPanic<'a, S>(&'a EventBus<S>);

impl<S> Drop for ReleaseOnPanic<'_, S> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0
                .outbox
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .delivering = false;
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;
    use statebus_core::logging::{CommandLogger, Disposable};
    use statebus_core::message::Command;
    use statebus_core::observer::StateChanged;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    struct Balance(i64);

    #[derive(Debug)]
    struct Deposited(i64);
    impl Event for Deposited {}

    #[derive(Debug)]
    struct Withdrawn(i64);
    impl Event for Withdrawn {}

    #[derive(Debug)]
    struct Audited;
    impl Event for Audited {}

    #[derive(Default)]
    struct Trace(Mutex<Vec<String>>);

    impl Trace {
        fn lines(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Disposable for Trace {}

    impl CommandLogger for Trace {
        fn on_command_handler_result(&self, _: &dyn Command, _: &[Box<dyn Event>]) {}
        fn on_command_handler_error(&self, _: &BusError, _: &dyn Command) {}
    }

    impl EventLogger<Balance> for Trace {
        fn on_event_handler_result(&self, _: &dyn Event, new_state: &Balance) {
            self.0.lock().unwrap().push(format!("result:{}", new_state.0));
        }

        fn on_event_handler_error(&self, error: &BusError, _: &dyn Event, state: &Balance) {
            let label = if error.is_handler_failure() { "failed" } else { "unroutable" };
            self.0.lock().unwrap().push(format!("{label}:{}", state.0));
        }
    }

    fn bus(initial: i64) -> (EventBus<Balance>, Arc<StateManager<Balance>>, Arc<Trace>) {
        let state = Arc::new(StateManager::new(Balance(initial)));
        let loggers = Arc::new(LoggerCollection::new());
        let trace = Arc::new(Trace::default());
        loggers.add_logger(Arc::clone(&trace) as Arc<dyn statebus_core::CombinedLogger<Balance>>);

        let bus = EventBus::new(Arc::clone(&state), loggers);
        bus.map_event_handler(EventHandler::new(|s: &Balance, e: &Deposited| {
            Ok(Balance(s.0 + e.0))
        }))
        .unwrap();
        bus.map_event_handler(EventHandler::new(|s: &Balance, e: &Withdrawn| {
            anyhow::ensure!(s.0 >= e.0, "insufficient funds");
            Ok(Balance(s.0 - e.0))
        }))
        .unwrap();

        (bus, state, trace)
    }

    #[test]
    fn test_applies_against_latest_state() {
        let (bus, state, trace) = bus(10);

        bus.handle_event(Box::new(Deposited(5))).unwrap();
        bus.handle_event(Box::new(Withdrawn(3))).unwrap();

        assert_eq!(*state.current(), Balance(12));
        assert_eq!(trace.lines(), vec!["result:15", "result:12"]);
    }

    #[test]
    fn test_failed_handler_leaves_state_unchanged() {
        let (bus, state, trace) = bus(1);

        bus.handle_event(Box::new(Withdrawn(5))).unwrap();

        assert_eq!(*state.current(), Balance(1));
        assert_eq!(trace.lines(), vec!["failed:1"]);
    }

    #[test]
    fn test_panicking_handler_leaves_state_unchanged() {
        let (bus, state, trace) = bus(6);
        bus.map_event_handler(EventHandler::new(|_: &Balance, _: &Audited| -> anyhow::Result<Balance> {
            panic!("audit exploded")
        }))
        .unwrap();

        bus.handle_event(Box::new(Audited)).unwrap();
        bus.handle_event(Box::new(Deposited(1))).unwrap();

        assert_eq!(*state.current(), Balance(7));
        assert_eq!(trace.lines(), vec!["failed:6", "result:7"]);
    }

    #[test]
    fn test_unroutable_event() {
        let (bus, state, trace) = bus(4);

        let error = bus.handle_event(Box::new(Audited)).unwrap_err();

        assert!(matches!(error, BusError::UnroutableMessage { kind: MessageKind::Event, .. }));
        assert_eq!(*state.current(), Balance(4));
        assert_eq!(trace.lines(), vec!["unroutable:4"]);
    }

    #[test]
    fn test_logger_notified_before_observers() {
        let (bus, state, trace) = bus(0);
        let seen = Arc::clone(&trace);
        state.subscribe(Arc::new(move |change: &StateChanged<'_, Balance>| {
            seen.0
                .lock()
                .unwrap()
                .push(format!("observer:{}->{}", change.previous.0, change.state.0));
        }));

        bus.handle_event(Box::new(Deposited(2))).unwrap();

        assert_eq!(trace.lines(), vec!["result:2", "observer:0->2"]);
    }

    #[test]
    fn test_unmap_makes_event_unroutable() {
        let (bus, _, _) = bus(0);
        assert!(bus.unmap_event_handler::<Deposited>());
        assert!(!bus.is_mapped(&MessageType::of::<Deposited>()));
        assert!(bus.handle_event(Box::new(Deposited(1))).is_err());
    }
}
