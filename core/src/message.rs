//! Message traits and runtime type tags.
//!
//! Commands and events are routed by the *concrete* type of the value behind a
//! trait object. [`MessageType`] is the tag used as the registry key: two
//! messages share a tag only if they are the exact same Rust type, so a handler
//! mapped for one type is never selected for another.
//!
//! # Example
//!
//! ```
//! use statebus_core::message::{Command, Event, Message, MessageType};
//!
//! #[derive(Debug)]
//! struct Increment(u32);
//! impl Command for Increment {}
//!
//! #[derive(Debug)]
//! struct CountIncremented(u32);
//! impl Event for CountIncremented {}
//!
//! let command: Box<dyn Command> = Box::new(Increment(3));
//! assert_eq!((*command).message_type(), MessageType::of::<Increment>());
//! ```

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};

use smallvec::SmallVec;

/// Base behavior shared by commands and events.
///
/// Blanket-implemented for every `'static + Send + Sync + Debug` type, so user
/// types only opt into [`Command`] or [`Event`].
///
/// Call these methods on a `&dyn Command` / `&dyn Event`, not on a
/// `Box<dyn ...>`: a box is itself a `Message` and would report its own type.
pub trait Message: Any + Send + Sync + fmt::Debug {
    /// Borrow the message as [`Any`] for downcasting to its concrete type.
    fn as_any(&self) -> &dyn Any;

    /// The routing tag of the concrete message type.
    fn message_type(&self) -> MessageType;
}

impl<T> Message for T
where
    T: Any + Send + Sync + fmt::Debug,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn message_type(&self) -> MessageType {
        MessageType::of::<T>()
    }
}

/// An intent to change state. Produces zero or more [`Event`]s when handled.
pub trait Command: Message {}

/// A fact that has occurred. Applied to state by exactly one event handler.
pub trait Event: Message {}

/// The ordered batch of events produced by one command.
///
/// Most commands produce zero or one event, which fit inline.
pub type Events = SmallVec<[Box<dyn Event>; 2]>;

/// Which bus a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Routed by the command bus
    Command,
    /// Routed by the event bus
    Event,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command => write!(f, "command"),
            Self::Event => write!(f, "event"),
        }
    }
}

/// Stable tag for a concrete message type.
///
/// Equality and hashing use the [`TypeId`] only; the name is carried for
/// diagnostics.
#[derive(Clone, Copy)]
pub struct MessageType {
    id: TypeId,
    name: &'static str,
}

impl MessageType {
    /// Tag for the message type `M`.
    #[must_use]
    pub fn of<M: ?Sized + Any>() -> Self {
        Self {
            id: TypeId::of::<M>(),
            name: std::any::type_name::<M>(),
        }
    }

    /// The underlying type id.
    #[must_use]
    pub const fn id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified type name, e.g. `my_app::commands::Increment`.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Type name without its module path.
    #[must_use]
    pub fn short_name(&self) -> &'static str {
        self.name.rsplit("::").next().unwrap_or(self.name)
    }
}

impl PartialEq for MessageType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MessageType {}

impl Hash for MessageType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MessageType").field(&self.name).finish()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Ping;
    impl Command for Ping {}

    #[derive(Debug)]
    struct Pong;
    impl Event for Pong {}

    #[derive(Debug)]
    struct Wrapper(#[allow(dead_code)] Ping);
    impl Command for Wrapper {}

    #[test]
    fn test_message_type_of_concrete_value() {
        let boxed: Box<dyn Command> = Box::new(Ping);
        assert_eq!((*boxed).message_type(), MessageType::of::<Ping>());
        assert_ne!((*boxed).message_type(), MessageType::of::<Wrapper>());
    }

    #[test]
    fn test_boxed_event_reports_inner_type() {
        let boxed: Box<dyn Event> = Box::new(Pong);
        let event: &dyn Event = boxed.as_ref();
        assert_eq!(event.message_type(), MessageType::of::<Pong>());
        assert!(event.as_any().downcast_ref::<Pong>().is_some());
    }

    #[test]
    fn test_short_name_strips_module_path() {
        let tag = MessageType::of::<Ping>();
        assert_eq!(tag.short_name(), "Ping");
        assert!(tag.name().ends_with("::Ping"));
    }

    #[test]
    fn test_message_kind_display() {
        assert_eq!(MessageKind::Command.to_string(), "command");
        assert_eq!(MessageKind::Event.to_string(), "event");
    }
}
