//! Command bus: runs command handlers and forwards their events.
//!
//! A command is routed to the handler mapped for its concrete type. The
//! handler sees a snapshot of the state taken once at dispatch time. The
//! events it produces are then handed to the [`EventBus`] one at a time, in
//! order, and each is applied to whatever state is current when it is
//! applied. A multi-event command therefore behaves exactly like its events
//! dispatched individually and sequentially.
//!
//! Async handler kinds return a deferred computation that runs on the
//! [`CommandHandlerExecutor`]; dispatch waits for it before forwarding events.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use futures::future::BoxFuture;
use statebus_core::error::{BusError, Result};
use statebus_core::handler::{CommandHandler, HandlerKind, HandlerResult};
use statebus_core::logging::CommandLogger;
use statebus_core::message::{Command, Events, MessageKind, MessageType};

use crate::event_bus::EventBus;
use crate::executor::{CommandHandlerExecutor, ExecutorError, catch_panic};
use crate::logging::LoggerCollection;
use crate::metrics::CommandMetrics;
use crate::registry::HandlerRegistry;
use crate::state::StateManager;

/// Routes commands to their handler and forwards produced events.
pub struct CommandBus<S> {
    handlers: HandlerRegistry<CommandHandler<S, dyn Command>>,
    event_bus: Arc<EventBus<S>>,
    state: Arc<StateManager<S>>,
    loggers: Arc<LoggerCollection<S>>,
    executor: RwLock<Option<CommandHandlerExecutor>>,
}

impl<S> CommandBus<S>
where
    S: Send + Sync + 'static,
{
    /// Create a command bus forwarding events to `event_bus`.
    #[must_use]
    pub fn new(
        event_bus: Arc<EventBus<S>>,
        state: Arc<StateManager<S>>,
        loggers: Arc<LoggerCollection<S>>,
    ) -> Self {
        Self {
            handlers: HandlerRegistry::new(MessageKind::Command),
            event_bus,
            state,
            loggers,
            executor: RwLock::new(None),
        }
    }

    /// Map the handler for commands of type `C`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::DuplicateHandler`] if `C` already has a handler.
    pub fn map_command_handler<C: Command>(&self, handler: CommandHandler<S, C>) -> Result<()> {
        self.handlers
            .register(MessageType::of::<C>(), handler.erase())
    }

    /// Remove the handler for commands of type `C`.
    pub fn unmap_command_handler<C: Command>(&self) -> bool {
        self.handlers.unregister(&MessageType::of::<C>())
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

    /// Drop every handler mapping and the executor.
    pub fn dispose(&self) {
        self.handlers.clear();
        self.executor
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Replace the executor used for async handler bodies.
    pub fn set_command_handler_executor(&self, executor: CommandHandlerExecutor) {
        tracing::debug!(capacity = executor.capacity(), "Replaced command handler executor");
        *self
            .executor
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(executor);
    }

    /// The executor for async handler bodies, created on first use with a
    /// capacity of one if none was set.
    pub fn command_handler_executor(&self) -> CommandHandlerExecutor {
        if let Some(executor) = self
            .executor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            return executor.clone();
        }

        self.executor
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_or_insert_with(|| {
                tracing::debug!("Creating default single-worker command handler executor");
                CommandHandlerExecutor::single()
            })
            .clone()
    }

    /// Handle `command` and apply the events it produces.
    ///
    /// Handler failures are reported to the command loggers and produce no
    /// events; they are not an error for the caller.
    ///
    /// # Errors
    ///
    /// - [`BusError::UnroutableMessage`]: no handler mapped for the command's type
    /// - [`BusError::UnsupportedCommandHandler`]: the handler's kind cannot run here
    #[tracing::instrument(skip_all, name = "handle_command", fields(command = %command.message_type()))]
    pub async fn handle_command(&self, command: &(dyn Command + 'static)) -> Result<()> {
        let message_type = command.message_type();
        CommandMetrics::record_dispatch();

        let handler = match self.handlers.resolve(&message_type) {
            Ok(handler) => handler,
            Err(error) => {
                tracing::warn!(%error, "Dropping unroutable command");
                CommandMetrics::record_unroutable();
                self.loggers.on_command_handler_error(&error, command);
                return Err(error);
            },
        };

        let kind = handler.kind();
        let snapshot = self.state.current();
        tracing::debug!(%kind, "Executing command handler");

        let start = Instant::now();
        let produced = self.execute(handler, &snapshot, command, message_type).await;
        CommandMetrics::record_execution(kind, start.elapsed());

        let events = match produced {
            Ok(events) => events,
            Err(error @ BusError::HandlerExecution { .. }) => {
                tracing::warn!(%error, "Command handler failed, no events forwarded");
                CommandMetrics::record_failure(kind);
                self.loggers.on_command_handler_error(&error, command);
                return Ok(());
            },
            Err(error) => {
                tracing::warn!(%error, "Command handler could not be executed");
                CommandMetrics::record_failure(kind);
                self.loggers.on_command_handler_error(&error, command);
                return Err(error);
            },
        };

        self.loggers.on_command_handler_result(command, &events);
        CommandMetrics::record_events(events.len());
        tracing::trace!("Forwarding {} events", events.len());

        for event in events {
            // Unroutable events are already reported to the event loggers;
            // the remaining events still apply.
            if let Err(error) = self.event_bus.handle_event(event) {
                tracing::debug!(%error, "Skipped event produced by command");
            }
        }

        Ok(())
    }

    async fn execute(
        &self,
        handler: CommandHandler<S, dyn Command>,
        snapshot: &Arc<S>,
        command: &(dyn Command + 'static),
        message_type: MessageType,
    ) -> Result<Events> {
        let failed = move |source: anyhow::Error| BusError::HandlerExecution {
            kind: MessageKind::Command,
            message_type,
            source,
        };

        match handler {
            CommandHandler::Void(f) => catch_panic(|| f(&**snapshot, command))
                .map(|()| Events::new())
                .map_err(failed),
            CommandHandler::Single(f) => catch_panic(|| f(&**snapshot, command))
                .map(|event| event.into_iter().collect())
                .map_err(failed),
            CommandHandler::Multi(f) => catch_panic(|| f(&**snapshot, command)).map_err(failed),
            CommandHandler::AsyncSingle(f) => {
                let deferred = catch_panic(|| Ok(f(Arc::clone(snapshot), command))).map_err(failed)?;
                self.submit(deferred, HandlerKind::AsyncSingle, message_type)
                    .await
                    .map(|event| event.into_iter().collect())
            },
            CommandHandler::AsyncMulti(f) => {
                let deferred = catch_panic(|| Ok(f(Arc::clone(snapshot), command))).map_err(failed)?;
                self.submit(deferred, HandlerKind::AsyncMulti, message_type)
                    .await
            },
        }
    }

    async fn submit<T>(
        &self,
        deferred: BoxFuture<'static, HandlerResult<T>>,
        kind: HandlerKind,
        message_type: MessageType,
    ) -> Result<T>
    where
        T: Send + 'static,
    {
        let executor = self.command_handler_executor();

        executor.execute(deferred).await.map_err(|error| match error {
            ExecutorError::NoRuntime => BusError::UnsupportedCommandHandler {
                message_type,
                handler_kind: kind,
                reason: error.to_string(),
            },
            ExecutorError::Join(join) => BusError::HandlerExecution {
                kind: MessageKind::Command,
                message_type,
                source: anyhow::Error::new(join),
            },
            ExecutorError::Handler(source) => BusError::HandlerExecution {
                kind: MessageKind::Command,
                message_type,
                source,
            },
        })
    }
}
