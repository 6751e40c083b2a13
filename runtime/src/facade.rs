//! The facade: single entry point and lifecycle owner.
//!
//! A [`Facade`] wires a [`StateManager`], an [`EventBus`], a [`CommandBus`]
//! and a [`LoggerCollection`] together and exposes them through one surface.
//! After [`Facade::dispose`] every operation returns [`BusError::Disposed`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use statebus_core::error::{BusError, Result};
use statebus_core::handler::{CommandHandler, EventHandler};
use statebus_core::logging::{CombinedLogger, CommandLogger, EventLogger};
use statebus_core::message::{Command, Event, MessageType};
use statebus_core::observer::StateObserver;

use crate::command_bus::CommandBus;
use crate::event_bus::EventBus;
use crate::executor::CommandHandlerExecutor;
use crate::logging::LoggerCollection;
use crate::state::StateManager;

/// Configuration for a [`Facade`].
///
/// # Example
///
/// ```
/// use statebus_runtime::{Facade, FacadeConfig};
///
/// #[derive(Debug, Default)]
/// struct Inventory {
///     items: u32,
/// }
///
/// let facade = Facade::new(FacadeConfig::new(Inventory::default()).with_worker_capacity(4))?;
/// assert_eq!(facade.get_current_state()?.items, 0);
/// # Ok::<(), statebus_core::BusError>(())
/// ```
pub struct FacadeConfig<S> {
    /// State before any event is applied
    pub initial_state: S,
    /// Number of async handler bodies that may run concurrently
    pub worker_capacity: usize,
    /// Executor to use instead of one built from `worker_capacity`
    pub executor: Option<CommandHandlerExecutor>,
    command_loggers: Vec<Arc<dyn CommandLogger>>,
    event_loggers: Vec<Arc<dyn EventLogger<S>>>,
    loggers: Vec<Arc<dyn CombinedLogger<S>>>,
}

impl<S> FacadeConfig<S> {
    /// Configuration with default settings: one async worker, no loggers.
    #[must_use]
    pub fn new(initial_state: S) -> Self {
        Self {
            initial_state,
            worker_capacity: 1,
            executor: None,
            command_loggers: Vec::new(),
            event_loggers: Vec::new(),
            loggers: Vec::new(),
        }
    }

    /// Set the async worker capacity
    #[must_use]
    pub fn with_worker_capacity(mut self, capacity: usize) -> Self {
        self.worker_capacity = capacity;
        self
    }

    /// Use a specific executor; `worker_capacity` is then ignored
    #[must_use]
    pub fn with_executor(mut self, executor: CommandHandlerExecutor) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Pre-register a command logger
    #[must_use]
    pub fn with_command_logger(mut self, logger: Arc<dyn CommandLogger>) -> Self {
        self.command_loggers.push(logger);
        self
    }

    /// Pre-register an event logger
    #[must_use]
    pub fn with_event_logger(mut self, logger: Arc<dyn EventLogger<S>>) -> Self {
        self.event_loggers.push(logger);
        self
    }

    /// Pre-register a logger for both channels
    #[must_use]
    pub fn with_logger(mut self, logger: Arc<dyn CombinedLogger<S>>) -> Self {
        self.loggers.push(logger);
        self
    }
}

impl<S: Default> Default for FacadeConfig<S> {
    fn default() -> Self {
        Self::new(S::default())
    }
}

/// Composition root for a command bus, an event bus and their state.
///
/// # Example
///
/// ```
/// use statebus_core::{CommandHandler, EventHandler, Command, Event};
/// use statebus_runtime::Facade;
///
/// #[derive(Debug, Clone, Default, PartialEq)]
/// struct Count(i64);
///
/// #[derive(Debug)]
/// struct Increment(i64);
/// impl Command for Increment {}
///
/// #[derive(Debug)]
/// struct CountIncremented(i64);
/// impl Event for CountIncremented {}
///
/// # tokio_test::block_on(async {
/// let facade = Facade::with_initial_state(Count::default());
/// facade.map_command_handler(CommandHandler::<Count, Increment>::single(|_, cmd| {
///     Ok(Some(CountIncremented(cmd.0)))
/// }))?;
/// facade.map_event_handler(EventHandler::new(|state: &Count, event: &CountIncremented| {
///     Ok(Count(state.0 + event.0))
/// }))?;
///
/// facade.handle_command(Increment(5)).await?;
/// assert_eq!(*facade.get_current_state()?, Count(5));
/// # Ok::<(), statebus_core::BusError>(())
/// # }).unwrap();
/// ```
pub struct Facade<S> {
    command_bus: CommandBus<S>,
    event_bus: Arc<EventBus<S>>,
    state: Arc<StateManager<S>>,
    loggers: Arc<LoggerCollection<S>>,
    disposed: AtomicBool,
}

impl<S> Facade<S>
where
    S: Send + Sync + 'static,
{
    /// Build a facade from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::InvalidConfig`] if `worker_capacity` is zero and
    /// no executor was supplied.
    pub fn new(mut config: FacadeConfig<S>) -> Result<Self> {
        let executor = match config.executor.take() {
            Some(executor) => executor,
            None => CommandHandlerExecutor::new(config.worker_capacity)?,
        };

        Ok(Self::assemble(config, Some(executor)))
    }

    /// Facade with default settings around `initial_state`.
    ///
    /// The single-worker executor is created on first async dispatch.
    #[must_use]
    pub fn with_initial_state(initial_state: S) -> Self {
        Self::assemble(FacadeConfig::new(initial_state), None)
    }

    fn assemble(config: FacadeConfig<S>, executor: Option<CommandHandlerExecutor>) -> Self {
        let FacadeConfig {
            initial_state,
            command_loggers,
            event_loggers,
            loggers: combined_loggers,
            ..
        } = config;

        let state = Arc::new(StateManager::new(initial_state));
        let loggers = Arc::new(LoggerCollection::new());
        for logger in command_loggers {
            loggers.add_command_logger(logger);
        }
        for logger in event_loggers {
            loggers.add_event_logger(logger);
        }
        for logger in combined_loggers {
            loggers.add_logger(logger);
        }

        let event_bus = Arc::new(EventBus::new(Arc::clone(&state), Arc::clone(&loggers)));
        let command_bus = CommandBus::new(
            Arc::clone(&event_bus),
            Arc::clone(&state),
            Arc::clone(&loggers),
        );
        if let Some(executor) = executor {
            command_bus.set_command_handler_executor(executor);
        }

        tracing::debug!(loggers = loggers.len(), "Facade created");

        Self {
            command_bus,
            event_bus,
            state,
            loggers,
            disposed: AtomicBool::new(false),
        }
    }

    /// Dispatch a command and apply the events it produces.
    ///
    /// # Errors
    ///
    /// - [`BusError::Disposed`]: the facade was disposed
    /// - [`BusError::UnroutableMessage`]: no handler for `C`
    /// - [`BusError::UnsupportedCommandHandler`]: the handler cannot run here
    pub async fn handle_command<C: Command>(&self, command: C) -> Result<()> {
        self.ensure_live()?;
        self.command_bus.handle_command(&command).await
    }

    /// Dispatch a boxed command, routed by the concrete type inside the box.
    ///
    /// # Errors
    ///
    /// See [`handle_command`](Self::handle_command).
    pub async fn dispatch_command(&self, command: Box<dyn Command>) -> Result<()> {
        self.ensure_live()?;
        self.command_bus.handle_command(&*command).await
    }

    /// Apply an event directly, bypassing the command bus.
    ///
    /// # Errors
    ///
    /// - [`BusError::Disposed`]: the facade was disposed
    /// - [`BusError::UnroutableMessage`]: no handler for `E`
    pub fn handle_event<E: Event>(&self, event: E) -> Result<()> {
        self.ensure_live()?;
        self.event_bus.handle_event(Box::new(event))
    }

    /// Apply a boxed event, routed by the concrete type inside the box.
    ///
    /// # Errors
    ///
    /// See [`handle_event`](Self::handle_event).
    pub fn dispatch_event(&self, event: Box<dyn Event>) -> Result<()> {
        self.ensure_live()?;
        self.event_bus.handle_event(event)
    }

    /// Map the handler for commands of type `C`.
    ///
    /// # Errors
    ///
    /// [`BusError::DuplicateHandler`] if `C` is already mapped, or
    /// [`BusError::Disposed`].
    pub fn map_command_handler<C: Command>(&self, handler: CommandHandler<S, C>) -> Result<()> {
        self.ensure_live()?;
        self.command_bus.map_command_handler(handler)
    }

    /// Map the handler for events of type `E`.
    ///
    /// # Errors
    ///
    /// [`BusError::DuplicateHandler`] if `E` is already mapped, or
    /// [`BusError::Disposed`].
    pub fn map_event_handler<E: Event>(&self, handler: EventHandler<S, E>) -> Result<()> {
        self.ensure_live()?;
        self.event_bus.map_event_handler(handler)
    }

    /// Remove the handler for `C`, returning whether one was mapped.
    ///
    /// # Errors
    ///
    /// [`BusError::Disposed`]
    pub fn unmap_command_handler<C: Command>(&self) -> Result<bool> {
        self.ensure_live()?;
        Ok(self.command_bus.unmap_command_handler::<C>())
    }

    /// Remove the handler for `E`, returning whether one was mapped.
    ///
    /// # Errors
    ///
    /// [`BusError::Disposed`]
    pub fn unmap_event_handler<E: Event>(&self) -> Result<bool> {
        self.ensure_live()?;
        Ok(self.event_bus.unmap_event_handler::<E>())
    }

    /// Whether a handler is mapped for commands of type `C`.
    #[must_use]
    pub fn is_command_mapped<C: Command>(&self) -> bool {
        self.command_bus.is_mapped(&MessageType::of::<C>())
    }

    /// Whether a handler is mapped for events of type `E`.
    #[must_use]
    pub fn is_event_mapped<E: Event>(&self) -> bool {
        self.event_bus.is_mapped(&MessageType::of::<E>())
    }

    /// Replace the executor running async handler bodies.
    ///
    /// # Errors
    ///
    /// [`BusError::Disposed`]
    pub fn set_command_handler_executor(&self, executor: CommandHandlerExecutor) -> Result<()> {
        self.ensure_live()?;
        self.command_bus.set_command_handler_executor(executor);
        Ok(())
    }

    /// Add a command logger.
    ///
    /// # Errors
    ///
    /// [`BusError::Disposed`]
    pub fn add_command_logger(&self, logger: Arc<dyn CommandLogger>) -> Result<()> {
        self.ensure_live()?;
        self.loggers.add_command_logger(logger);
        Ok(())
    }

    /// Add an event logger.
    ///
    /// # Errors
    ///
    /// [`BusError::Disposed`]
    pub fn add_event_logger(&self, logger: Arc<dyn EventLogger<S>>) -> Result<()> {
        self.ensure_live()?;
        self.loggers.add_event_logger(logger);
        Ok(())
    }

    /// Add a logger receiving both command and event notifications.
    ///
    /// # Errors
    ///
    /// [`BusError::Disposed`]
    pub fn add_logger(&self, logger: Arc<dyn CombinedLogger<S>>) -> Result<()> {
        self.ensure_live()?;
        self.loggers.add_logger(logger);
        Ok(())
    }

    /// Remove a command logger previously added with the same `Arc`.
    ///
    /// # Errors
    ///
    /// [`BusError::Disposed`]
    pub fn remove_command_logger(&self, logger: &Arc<dyn CommandLogger>) -> Result<bool> {
        self.ensure_live()?;
        Ok(self.loggers.remove_command_logger(logger))
    }

    /// Remove an event logger previously added with the same `Arc`.
    ///
    /// # Errors
    ///
    /// [`BusError::Disposed`]
    pub fn remove_event_logger(&self, logger: &Arc<dyn EventLogger<S>>) -> Result<bool> {
        self.ensure_live()?;
        Ok(self.loggers.remove_event_logger(logger))
    }

    /// Remove a combined logger previously added with the same `Arc`.
    ///
    /// # Errors
    ///
    /// [`BusError::Disposed`]
    pub fn remove_logger(&self, logger: &Arc<dyn CombinedLogger<S>>) -> Result<bool> {
        self.ensure_live()?;
        Ok(self.loggers.remove_logger(logger))
    }

    /// The latest committed state.
    ///
    /// # Errors
    ///
    /// [`BusError::Disposed`]
    pub fn get_current_state(&self) -> Result<Arc<S>> {
        self.ensure_live()?;
        Ok(self.state.current())
    }

    /// Register `observer` for every committed state change.
    ///
    /// Observers are called after each commit, in commit order and then in
    /// subscription order. They may dispatch commands or events on this
    /// facade; notifications for those are delivered once the current
    /// callback returns.
    ///
    /// # Errors
    ///
    /// [`BusError::Disposed`]
    pub fn subscribe(&self, observer: Arc<dyn StateObserver<S>>) -> Result<()> {
        self.ensure_live()?;
        self.state.subscribe(observer);
        Ok(())
    }

    /// Remove the first registration of `observer`.
    ///
    /// # Errors
    ///
    /// [`BusError::Disposed`]
    pub fn unsubscribe(&self, observer: &Arc<dyn StateObserver<S>>) -> Result<bool> {
        self.ensure_live()?;
        Ok(self.state.unsubscribe(observer))
    }

    /// Number of registered observers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.state.subscriber_count()
    }

    /// Whether [`dispose`](Self::dispose) has been called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Release every collaborator.
    ///
    /// Runs each logger's dispose hook once, drops all observers, handler
    /// mappings and the executor. Messages already being handled finish
    /// normally.
    ///
    /// # Errors
    ///
    /// [`BusError::Disposed`] if the facade was already disposed.
    pub fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Err(BusError::Disposed);
        }

        tracing::info!("Disposing facade");
        self.loggers.dispose();
        self.state.dispose();
        self.command_bus.dispose();
        self.event_bus.clear();
        Ok(())
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            tracing::debug!("Rejected call on disposed facade");
            return Err(BusError::Disposed);
        }
        Ok(())
    }
}

impl<S> std::fmt::Debug for Facade<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Facade")
            .field("disposed", &self.disposed.load(Ordering::Acquire))
            .field("subscribers", &self.state.subscriber_count())
            .field("loggers", &self.loggers.len())
            .finish_non_exhaustive()
    }
}
