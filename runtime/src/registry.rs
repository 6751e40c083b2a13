//! Message dispatch table shared by the command and event buses.
//!
//! Maps the exact [`MessageType`] of a message to one handler. Lookups never
//! fall back to another type. Writes happen during setup; dispatch only reads,
//! and clones the handler out so no lock is held while it runs.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use statebus_core::error::{BusError, Result};
use statebus_core::message::{MessageKind, MessageType};

/// Exact-type handler registry.
pub struct HandlerRegistry<H> {
    kind: MessageKind,
    handlers: RwLock<HashMap<MessageType, H>>,
}

impl<H: Clone> HandlerRegistry<H> {
    /// Create an empty registry for messages of `kind`.
    #[must_use]
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Map `handler` to `message_type`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::DuplicateHandler`] if the type is already mapped. The
    /// existing handler is kept.
    pub fn register(&self, message_type: MessageType, handler: H) -> Result<()> {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        if handlers.contains_key(&message_type) {
            tracing::warn!(kind = %self.kind, %message_type, "Rejected duplicate handler mapping");
            return Err(BusError::DuplicateHandler {
                kind: self.kind,
                message_type,
            });
        }

        tracing::debug!(kind = %self.kind, %message_type, "Mapped handler");
        handlers.insert(message_type, handler);
        Ok(())
    }

    /// Remove the mapping for `message_type`, returning whether one existed.
    pub fn unregister(&self, message_type: &MessageType) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(message_type)
            .is_some()
    }

    /// Resolve the handler for `message_type`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::UnroutableMessage`] if nothing is mapped.
    pub fn resolve(&self, message_type: &MessageType) -> Result<H> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(message_type)
            .cloned()
            .ok_or_else(|| BusError::UnroutableMessage {
                kind: self.kind,
                message_type: *message_type,
            })
    }

    /// Whether `message_type` has a handler.
    #[must_use]
    pub fn contains(&self, message_type: &MessageType) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(message_type)
    }

    /// Number of mapped message types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no message type is mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every mapping.
    pub fn clear(&self) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// The kind of messages this registry routes.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        self.kind
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]

    use super::*;

    #[derive(Debug)]
    struct Open;

    #[derive(Debug)]
    struct Close;

    #[test]
    fn test_register_and_resolve() {
        let registry = HandlerRegistry::new(MessageKind::Command);
        registry.register(MessageType::of::<Open>(), "open").unwrap();

        assert_eq!(registry.resolve(&MessageType::of::<Open>()).unwrap(), "open");
        assert!(registry.contains(&MessageType::of::<Open>()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_keeps_first() {
        let registry = HandlerRegistry::new(MessageKind::Event);
        registry.register(MessageType::of::<Open>(), 1).unwrap();

        let error = registry.register(MessageType::of::<Open>(), 2).unwrap_err();
        assert!(matches!(
            error,
            BusError::DuplicateHandler { kind: MessageKind::Event, .. }
        ));
        assert_eq!(registry.resolve(&MessageType::of::<Open>()).unwrap(), 1);
    }

    #[test]
    fn test_unmapped_type_is_unroutable() {
        let registry = HandlerRegistry::new(MessageKind::Command);
        registry.register(MessageType::of::<Open>(), ()).unwrap();

        match registry.resolve(&MessageType::of::<Close>()) {
            Err(BusError::UnroutableMessage { kind, message_type }) => {
                assert_eq!(kind, MessageKind::Command);
                assert_eq!(message_type, MessageType::of::<Close>());
            },
            other => panic!("expected unroutable, got {other:?}"),
        }
    }

    #[test]
    fn test_unregister_and_clear() {
        let registry = HandlerRegistry::new(MessageKind::Command);
        registry.register(MessageType::of::<Open>(), ()).unwrap();
        registry.register(MessageType::of::<Close>(), ()).unwrap();

        assert!(registry.unregister(&MessageType::of::<Open>()));
        assert!(!registry.unregister(&MessageType::of::<Open>()));
        assert_eq!(registry.len(), 1);

        registry.clear();
        assert!(registry.is_empty());
    }
}
