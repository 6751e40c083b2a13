//! Command and event handler types.
//!
//! A command handler is one of five kinds, modelled as the [`CommandHandler`]
//! enum. The command bus matches on the variant at execution time:
//!
//! | Variant       | Produces                 | Runs on            |
//! |---------------|--------------------------|--------------------|
//! | `Void`        | nothing                  | dispatching task   |
//! | `Single`      | zero or one event        | dispatching task   |
//! | `Multi`       | ordered events           | dispatching task   |
//! | `AsyncSingle` | zero or one event        | handler executor   |
//! | `AsyncMulti`  | ordered events           | handler executor   |
//!
//! Async variants return a deferred computation ([`BoxFuture`]) that the bus
//! submits to the executor and joins before forwarding any events.
//!
//! An event handler is a reducer: `(state, event) -> next state`.
//!
//! # Example
//!
//! ```
//! use statebus_core::handler::{CommandHandler, EventHandler};
//! use statebus_core::message::{Command, Event};
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
//! let on_increment = CommandHandler::<Count, Increment>::single(|_state, cmd| {
//!     Ok(Some(CountIncremented(cmd.0)))
//! });
//! let on_incremented = EventHandler::new(|state: &Count, event: &CountIncremented| {
//!     Ok(Count(state.0 + event.0))
//! });
//! # let _ = (on_increment, on_incremented);
//! ```

use std::fmt;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use smallvec::SmallVec;

use crate::message::{Command, Event, Events, MessageType};

/// Error type returned by handler bodies.
pub type HandlerError = anyhow::Error;

/// Result type returned by handler bodies.
pub type HandlerResult<T> = Result<T, HandlerError>;

type VoidFn<S, C> = dyn Fn(&S, &C) -> HandlerResult<()> + Send + Sync;
type SingleFn<S, C> = dyn Fn(&S, &C) -> HandlerResult<Option<Box<dyn Event>>> + Send + Sync;
type MultiFn<S, C> = dyn Fn(&S, &C) -> HandlerResult<Events> + Send + Sync;
type AsyncSingleFn<S, C> =
    dyn Fn(Arc<S>, &C) -> BoxFuture<'static, HandlerResult<Option<Box<dyn Event>>>> + Send + Sync;
type AsyncMultiFn<S, C> =
    dyn Fn(Arc<S>, &C) -> BoxFuture<'static, HandlerResult<Events>> + Send + Sync;

/// The kind of a command handler, without its body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    /// Produces no event
    Void,
    /// Produces zero or one event synchronously
    Single,
    /// Produces an ordered collection of events synchronously
    Multi,
    /// Produces zero or one event from a deferred computation
    AsyncSingle,
    /// Produces an ordered collection of events from a deferred computation
    AsyncMulti,
}

impl HandlerKind {
    /// Whether handlers of this kind run on the command handler executor.
    #[must_use]
    pub const fn is_async(self) -> bool {
        matches!(self, Self::AsyncSingle | Self::AsyncMulti)
    }

    /// Stable label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Single => "single",
            Self::Multi => "multi",
            Self::AsyncSingle => "async_single",
            Self::AsyncMulti => "async_multi",
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command handler for commands of type `C` against state `S`.
///
/// The runtime stores handlers type-erased as `CommandHandler<S, dyn Command>`;
/// see [`CommandHandler::erase`].
pub enum CommandHandler<S, C: ?Sized> {
    /// Produces no event
    Void(Arc<VoidFn<S, C>>),
    /// Produces zero or one event
    Single(Arc<SingleFn<S, C>>),
    /// Produces an ordered sequence of events (possibly empty)
    Multi(Arc<MultiFn<S, C>>),
    /// Returns a deferred computation producing zero or one event
    AsyncSingle(Arc<AsyncSingleFn<S, C>>),
    /// Returns a deferred computation producing an ordered sequence of events
    AsyncMulti(Arc<AsyncMultiFn<S, C>>),
}

impl<S, C: ?Sized> Clone for CommandHandler<S, C> {
    fn clone(&self) -> Self {
        match self {
            Self::Void(f) => Self::Void(Arc::clone(f)),
            Self::Single(f) => Self::Single(Arc::clone(f)),
            Self::Multi(f) => Self::Multi(Arc::clone(f)),
            Self::AsyncSingle(f) => Self::AsyncSingle(Arc::clone(f)),
            Self::AsyncMulti(f) => Self::AsyncMulti(Arc::clone(f)),
        }
    }
}

impl<S, C: ?Sized> fmt::Debug for CommandHandler<S, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommandHandler::{}", self.kind())
    }
}

impl<S, C: ?Sized> CommandHandler<S, C> {
    /// The kind of this handler.
    #[must_use]
    pub const fn kind(&self) -> HandlerKind {
        match self {
            Self::Void(_) => HandlerKind::Void,
            Self::Single(_) => HandlerKind::Single,
            Self::Multi(_) => HandlerKind::Multi,
            Self::AsyncSingle(_) => HandlerKind::AsyncSingle,
            Self::AsyncMulti(_) => HandlerKind::AsyncMulti,
        }
    }
}

impl<S, C> CommandHandler<S, C>
where
    S: Send + Sync + 'static,
    C: Command,
{
    /// Handler that produces no event.
    pub fn void<F>(f: F) -> Self
    where
        F: Fn(&S, &C) -> HandlerResult<()> + Send + Sync + 'static,
    {
        Self::Void(Arc::new(f))
    }

    /// Handler that produces zero or one event.
    pub fn single<F, E>(f: F) -> Self
    where
        F: Fn(&S, &C) -> HandlerResult<Option<E>> + Send + Sync + 'static,
        E: Event,
    {
        Self::Single(Arc::new(move |state: &S, command: &C| {
            Ok(f(state, command)?.map(|event| Box::new(event) as Box<dyn Event>))
        }))
    }

    /// Handler that produces an ordered sequence of events.
    pub fn multi<F, E>(f: F) -> Self
    where
        F: Fn(&S, &C) -> HandlerResult<Vec<E>> + Send + Sync + 'static,
        E: Event,
    {
        Self::Multi(Arc::new(move |state: &S, command: &C| {
            Ok(box_events(f(state, command)?))
        }))
    }

    /// Handler whose events are already boxed, for handlers emitting
    /// several event types from one command.
    pub fn multi_boxed<F>(f: F) -> Self
    where
        F: Fn(&S, &C) -> HandlerResult<Events> + Send + Sync + 'static,
    {
        Self::Multi(Arc::new(f))
    }

    /// Handler returning a deferred computation that produces zero or one event.
    ///
    /// The closure runs on the dispatching task and should only capture what
    /// the computation needs; the returned future runs on the executor.
    pub fn async_single<F, Fut, E>(f: F) -> Self
    where
        F: Fn(Arc<S>, &C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<Option<E>>> + Send + 'static,
        E: Event,
    {
        Self::AsyncSingle(Arc::new(move |state: Arc<S>, command: &C| {
            f(state, command)
                .map(|result| result.map(|event| event.map(|e| Box::new(e) as Box<dyn Event>)))
                .boxed()
        }))
    }

    /// Handler returning a deferred computation that produces ordered events.
    pub fn async_multi<F, Fut, E>(f: F) -> Self
    where
        F: Fn(Arc<S>, &C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<Vec<E>>> + Send + 'static,
        E: Event,
    {
        Self::AsyncMulti(Arc::new(move |state: Arc<S>, command: &C| {
            f(state, command).map(|result| result.map(box_events)).boxed()
        }))
    }

    /// Erase the concrete command type so handlers for different commands can
    /// share one registry.
    ///
    /// The erased handler downcasts the incoming command back to `C`. The
    /// registry only routes `C` values to it, so a failed downcast is reported
    /// as a handler error rather than a panic.
    #[must_use]
    pub fn erase(self) -> CommandHandler<S, dyn Command> {
        match self {
            Self::Void(f) => {
                CommandHandler::Void(Arc::new(move |state: &S, command: &(dyn Command + 'static)| {
                    f(state, downcast::<C>(command)?)
                }))
            },
            Self::Single(f) => {
                CommandHandler::Single(Arc::new(move |state: &S, command: &(dyn Command + 'static)| {
                    f(state, downcast::<C>(command)?)
                }))
            },
            Self::Multi(f) => {
                CommandHandler::Multi(Arc::new(move |state: &S, command: &(dyn Command + 'static)| {
                    f(state, downcast::<C>(command)?)
                }))
            },
            Self::AsyncSingle(f) => CommandHandler::AsyncSingle(Arc::new(
                move |state: Arc<S>, command: &(dyn Command + 'static)| match downcast::<C>(command) {
                    Ok(command) => f(state, command),
                    Err(error) => futures::future::ready(Err(error)).boxed(),
                },
            )),
            Self::AsyncMulti(f) => CommandHandler::AsyncMulti(Arc::new(
                move |state: Arc<S>, command: &(dyn Command + 'static)| match downcast::<C>(command) {
                    Ok(command) => f(state, command),
                    Err(error) => futures::future::ready(Err(error)).boxed(),
                },
            )),
        }
    }
}

type ReduceFn<S, E> = dyn Fn(&S, &E) -> HandlerResult<S> + Send + Sync;

/// An event handler: computes the next state from the current state and an
/// event of type `E`.
///
/// The returned state fully replaces the current one; there are no partial
/// updates.
pub struct EventHandler<S, E: ?Sized> {
    reduce: Arc<ReduceFn<S, E>>,
}

impl<S, E: ?Sized> Clone for EventHandler<S, E> {
    fn clone(&self) -> Self {
        Self {
            reduce: Arc::clone(&self.reduce),
        }
    }
}

impl<S, E: ?Sized> fmt::Debug for EventHandler<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventHandler")
    }
}

impl<S, E: ?Sized> EventHandler<S, E> {
    /// Apply the handler.
    ///
    /// # Errors
    ///
    /// Returns whatever error the handler body returns.
    pub fn apply(&self, state: &S, event: &E) -> HandlerResult<S> {
        (self.reduce)(state, event)
    }
}

impl<S, E> EventHandler<S, E>
where
    S: 'static,
    E: Event,
{
    /// Wrap a reducer function.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&S, &E) -> HandlerResult<S> + Send + Sync + 'static,
    {
        Self {
            reduce: Arc::new(f),
        }
    }

    /// Erase the concrete event type. See [`CommandHandler::erase`].
    #[must_use]
    pub fn erase(self) -> EventHandler<S, dyn Event> {
        let reduce = self.reduce;
        EventHandler {
            reduce: Arc::new(move |state: &S, event: &(dyn Event + 'static)| {
                reduce(state, downcast::<E>(event)?)
            }),
        }
    }
}

fn box_events<E: Event>(events: Vec<E>) -> Events {
    events
        .into_iter()
        .map(|event| Box::new(event) as Box<dyn Event>)
        .collect::<SmallVec<_>>()
}

fn downcast<M: 'static>(message: &(impl crate::message::Message + ?Sized)) -> HandlerResult<&M> {
    message.as_any().downcast_ref::<M>().ok_or_else(|| {
        anyhow::anyhow!(
            "handler for {} received a {}",
            MessageType::of::<M>(),
            message.message_type()
        )
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Count(i64);

    #[derive(Debug)]
    struct Increment(i64);
    impl Command for Increment {}

    #[derive(Debug)]
    struct Reset;
    impl Command for Reset {}

    #[derive(Debug, PartialEq)]
    struct CountIncremented(i64);
    impl Event for CountIncremented {}

    fn single_event(events: &Events) -> &CountIncremented {
        assert_eq!(events.len(), 1);
        events[0]
            .as_ref()
            .as_any()
            .downcast_ref::<CountIncremented>()
            .unwrap()
    }

    #[test]
    fn test_kinds() {
        let void = CommandHandler::<Count, Increment>::void(|_, _| Ok(()));
        let single =
            CommandHandler::<Count, Increment>::single(|_, c| Ok(Some(CountIncremented(c.0))));
        let multi =
            CommandHandler::<Count, Increment>::multi(|_, c| Ok(vec![CountIncremented(c.0)]));
        let async_single = CommandHandler::<Count, Increment>::async_single(|_, c| {
            let n = c.0;
            async move { Ok(Some(CountIncremented(n))) }
        });
        let async_multi = CommandHandler::<Count, Increment>::async_multi(|_, c| {
            let n = c.0;
            async move { Ok(vec![CountIncremented(n)]) }
        });

        assert_eq!(void.kind(), HandlerKind::Void);
        assert_eq!(single.kind(), HandlerKind::Single);
        assert_eq!(multi.kind(), HandlerKind::Multi);
        assert_eq!(async_single.kind(), HandlerKind::AsyncSingle);
        assert_eq!(async_multi.kind(), HandlerKind::AsyncMulti);
        assert!(async_multi.erase().kind().is_async());
        assert!(!single.erase().kind().is_async());
    }

    #[test]
    fn test_erased_single_downcasts() {
        let handler =
            CommandHandler::<Count, Increment>::single(|s, c| Ok(Some(CountIncremented(s.0 + c.0))))
                .erase();
        let CommandHandler::Single(f) = handler else {
            panic!("expected single handler");
        };

        let event = f(&Count(2), &Increment(3)).unwrap().unwrap();
        let event = event.as_any().downcast_ref::<CountIncremented>().unwrap();
        assert_eq!(event, &CountIncremented(5));
    }

    #[test]
    fn test_erased_handler_rejects_foreign_command() {
        let handler = CommandHandler::<Count, Increment>::void(|_, _| Ok(())).erase();
        let CommandHandler::Void(f) = handler else {
            panic!("expected void handler");
        };

        let error = f(&Count::default(), &Reset).unwrap_err();
        assert!(error.to_string().contains("Reset"));
    }

    #[test]
    fn test_multi_preserves_order() {
        let handler = CommandHandler::<Count, Increment>::multi(|_, c| {
            Ok((1..=c.0).map(CountIncremented).collect())
        })
        .erase();
        let CommandHandler::Multi(f) = handler else {
            panic!("expected multi handler");
        };

        let events = f(&Count::default(), &Increment(3)).unwrap();
        let values: Vec<i64> = events
            .iter()
            .map(|e| {
                e.as_ref()
                    .as_any()
                    .downcast_ref::<CountIncremented>()
                    .unwrap()
                    .0
            })
            .collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn test_async_single_defers_work() {
        let handler = CommandHandler::<Count, Increment>::async_single(|state, c| {
            let n = state.0 + c.0;
            async move { Ok(Some(CountIncremented(n))) }
        })
        .erase();
        let CommandHandler::AsyncSingle(f) = handler else {
            panic!("expected async single handler");
        };

        let deferred = f(Arc::new(Count(10)), &Increment(1));
        let events: Events = tokio_test::block_on(deferred)
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(single_event(&events), &CountIncremented(11));
    }

    #[test]
    fn test_event_handler_reduces() {
        let handler = EventHandler::new(|s: &Count, e: &CountIncremented| Ok(Count(s.0 + e.0)));
        assert_eq!(handler.apply(&Count(1), &CountIncremented(4)).unwrap(), Count(5));

        let erased = handler.erase();
        let next = erased.apply(&Count(1), &CountIncremented(2)).unwrap();
        assert_eq!(next, Count(3));
    }

    #[test]
    fn test_handler_errors_propagate() {
        let handler = EventHandler::new(|_: &Count, _: &CountIncremented| {
            Err(anyhow::anyhow!("rejected"))
        })
        .erase();
        let error = handler.apply(&Count(0), &CountIncremented(1)).unwrap_err();
        assert_eq!(error.to_string(), "rejected");
    }
}
