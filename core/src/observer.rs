//! State change notifications.

use std::sync::Arc;

use crate::message::Event;

/// A committed state transition.
///
/// Delivered to every [`StateObserver`] after the event logger has been
/// notified. Transitions arrive in commit order; observers of one transition
/// are called in subscription order.
#[derive(Debug)]
pub struct StateChanged<'a, S> {
    /// The state before the event was applied
    pub previous: &'a Arc<S>,
    /// The newly committed state
    pub state: &'a Arc<S>,
    /// The event that produced the transition
    pub event: &'a dyn Event,
}

impl<S> Clone for StateChanged<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for StateChanged<'_, S> {}

/// Callback invoked for each committed state transition.
///
/// Implemented for any `Fn(&StateChanged<'_, S>)` closure. Observers are
/// compared by `Arc` identity when unsubscribing.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use statebus_core::observer::{StateChanged, StateObserver};
///
/// let observer: Arc<dyn StateObserver<u32>> = Arc::new(|change: &StateChanged<'_, u32>| {
///     println!("{} -> {}", change.previous, change.state);
/// });
/// # let _ = observer;
/// ```
pub trait StateObserver<S>: Send + Sync {
    /// Handle a committed transition.
    fn on_state_changed(&self, change: &StateChanged<'_, S>);
}

impl<S, F> StateObserver<S> for F
where
    F: Fn(&StateChanged<'_, S>) + Send + Sync,
{
    fn on_state_changed(&self, change: &StateChanged<'_, S>) {
        self(change);
    }
}
