//! State container.
//!
//! Holds the current immutable state and the observer list. Reads are cheap
//! `Arc` clones. Every mutation goes through [`StateManager::begin_update`],
//! which enters the single commit critical section: read, compute and commit
//! happen while it is held, so two updates can never both read the same state
//! and both commit.
//!
//! Observers are notified with [`StateManager::notify`] after the section is
//! left, so they are free to start new updates from their callback.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use statebus_core::message::Event;
use statebus_core::observer::{StateChanged, StateObserver};

/// A committed transition: the previous and the new state.
#[derive(Debug)]
pub struct StateTransition<S> {
    /// State before the commit
    pub previous: Arc<S>,
    /// State after the commit
    pub state: Arc<S>,
}

impl<S> Clone for StateTransition<S> {
    fn clone(&self) -> Self {
        Self {
            previous: Arc::clone(&self.previous),
            state: Arc::clone(&self.state),
        }
    }
}

/// Owner of the current state and its observers.
pub struct StateManager<S> {
    current: RwLock<Arc<S>>,
    commit_lock: Mutex<()>,
    observers: RwLock<Vec<Arc<dyn StateObserver<S>>>>,
}

impl<S> StateManager<S> {
    /// Create a manager holding `initial_state`.
    #[must_use]
    pub fn new(initial_state: S) -> Self {
        Self {
            current: RwLock::new(Arc::new(initial_state)),
            commit_lock: Mutex::new(()),
            observers: RwLock::new(Vec::new()),
        }
    }

    /// The latest committed state.
    #[must_use]
    pub fn current(&self) -> Arc<S> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Enter the commit critical section.
    ///
    /// Blocks until no other update is in progress. The section ends when the
    /// returned guard is dropped. Keep the work done inside it short and never
    /// hold the guard across an `.await`.
    pub fn begin_update(&self) -> StateUpdate<'_, S> {
        let guard = self
            .commit_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        tracing::trace!("Acquired state commit lock");

        StateUpdate {
            manager: self,
            _guard: guard,
        }
    }

    /// Add an observer. The same observer may be added more than once.
    pub fn subscribe(&self, observer: Arc<dyn StateObserver<S>>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    /// Remove the first registration of `observer` (by identity).
    ///
    /// Returns whether an observer was removed.
    pub fn unsubscribe(&self, observer: &Arc<dyn StateObserver<S>>) -> bool {
        let mut observers = self
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        match observers.iter().position(|o| Arc::ptr_eq(o, observer)) {
            Some(index) => {
                observers.remove(index);
                true
            },
            None => false,
        }
    }

    /// Number of registered observers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Drop all observers. State keeps changing, but nobody is notified.
    pub fn dispose(&self) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Notify every observer of `transition`, in subscription order.
    ///
    /// Must not be called from inside an update.
    pub fn notify(&self, transition: &StateTransition<S>, event: &dyn Event) {
        let change = StateChanged {
            previous: &transition.previous,
            state: &transition.state,
            event,
        };

        for observer in self.snapshot_observers() {
            observer.on_state_changed(&change);
        }
    }

    fn snapshot_observers(&self) -> Vec<Arc<dyn StateObserver<S>>> {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Exclusive access to the state for one read-modify-write cycle.
pub struct StateUpdate<'a, S> {
    manager: &'a StateManager<S>,
    _guard: MutexGuard<'a, ()>,
}

impl<S> StateUpdate<'_, S> {
    /// The state as of entering the section (or of the last commit in it).
    #[must_use]
    pub fn current(&self) -> Arc<S> {
        self.manager.current()
    }

    /// Replace the current state with `next`.
    pub fn commit(&mut self, next: S) -> StateTransition<S> {
        let state = Arc::new(next);
        let previous = {
            let mut current = self
                .manager
                .current
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *current, Arc::clone(&state))
        };
        tracing::trace!("Committed new state");

        StateTransition { previous, state }
    }

}
