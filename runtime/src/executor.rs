//! Bounded worker pool for async command handler bodies.
//!
//! The command bus obtains a deferred computation from an async handler,
//! submits it here and joins on the result. At most `capacity` bodies run at
//! the same time; the default capacity of 1 means async handler bodies never
//! overlap.

use std::any::Any;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures::future::BoxFuture;
use statebus_core::handler::HandlerResult;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;

/// Reasons a deferred computation could not be run to completion.
#[derive(Error, Debug)]
pub enum ExecutorError {
    /// No runtime handle was configured and none is current
    #[error("no Tokio runtime available to run the handler body")]
    NoRuntime,

    /// The body panicked or its task was aborted
    #[error("handler body did not complete: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// The body ran and returned an error
    #[error(transparent)]
    Handler(anyhow::Error),
}

/// Worker pool running async command handler bodies.
///
/// Cloning shares the same permits.
///
/// # Example
///
/// ```
/// use statebus_runtime::executor::CommandHandlerExecutor;
///
/// # tokio_test::block_on(async {
/// let executor = CommandHandlerExecutor::new(4)?;
/// let value = executor.execute(Box::pin(async { Ok(21 * 2) })).await?;
/// assert_eq!(value, 42);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # }).unwrap();
/// ```
#[derive(Clone)]
pub struct CommandHandlerExecutor {
    permits: Arc<Semaphore>,
    capacity: NonZeroUsize,
    handle: Option<Handle>,
}

impl CommandHandlerExecutor {
    /// Create an executor running at most `capacity` bodies concurrently on
    /// the caller's Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`statebus_core::BusError::InvalidConfig`] if `capacity` is zero.
    pub fn new(capacity: usize) -> statebus_core::error::Result<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or_else(|| {
            statebus_core::BusError::InvalidConfig(
                "command handler executor capacity must be at least 1".to_string(),
            )
        })?;

        Ok(Self::with_capacity(capacity))
    }

    /// Create an executor running at most `capacity` bodies concurrently.
    #[must_use]
    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity.get())),
            capacity,
            handle: None,
        }
    }

    /// The default executor: one body at a time.
    #[must_use]
    pub fn single() -> Self {
        Self::with_capacity(NonZeroUsize::MIN)
    }

    /// Run bodies on the runtime behind `handle` instead of the caller's.
    #[must_use]
    pub fn with_handle(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Maximum number of concurrently running bodies.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity.get()
    }

    /// Number of bodies that could start right now.
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Whether bodies can be spawned from the current context.
    #[must_use]
    pub fn can_execute(&self) -> bool {
        self.handle.is_some() || Handle::try_current().is_ok()
    }

    /// Submit `task` and wait for its result.
    ///
    /// Waits for a free permit first, then runs the task as its own Tokio task
    /// and joins on it. The permit is released when the task finishes, even
    /// if it panics.
    ///
    /// # Errors
    ///
    /// - [`ExecutorError::NoRuntime`]: no runtime to spawn on
    /// - [`ExecutorError::Join`]: the task panicked or was cancelled
    /// - [`ExecutorError::Handler`]: the task returned an error
    pub async fn execute<T>(&self, task: BoxFuture<'static, HandlerResult<T>>) -> Result<T, ExecutorError>
    where
        T: Send + 'static,
    {
        let handle = match &self.handle {
            Some(handle) => handle.clone(),
            None => Handle::try_current().map_err(|_| ExecutorError::NoRuntime)?,
        };

        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| ExecutorError::Handler(anyhow::Error::new(e)))?;
        tracing::trace!(
            available = self.permits.available_permits(),
            "Acquired executor permit"
        );

        let join = handle.spawn(async move {
            let _permit = permit;
            task.await
        });

        join.await?.map_err(ExecutorError::Handler)
    }
}

/// Run a synchronous handler body on the current thread, turning a panic
/// into an error like a panicking async body.
pub(crate) fn catch_panic<T>(body: impl FnOnce() -> HandlerResult<T>) -> HandlerResult<T> {
    panic::catch_unwind(AssertUnwindSafe(body))
        .unwrap_or_else(|payload| Err(panic_error(&*payload)))
}

fn panic_error(payload: &(dyn Any + Send)) -> anyhow::Error {
    let message = payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    anyhow::anyhow!("handler panicked: {message}")
}

impl Default for CommandHandlerExecutor {
    fn default() -> Self {
        Self::single()
    }
}

impl std::fmt::Debug for CommandHandlerExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHandlerExecutor")
            .field("capacity", &self.capacity)
            .field("available_permits", &self.permits.available_permits())
            .field("dedicated_runtime", &self.handle.is_some())
            .finish()
    }
}
