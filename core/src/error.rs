//! Error taxonomy for the command and event buses.

use thiserror::Error;

use crate::handler::{HandlerError, HandlerKind};
use crate::message::{MessageKind, MessageType};

/// Errors raised or reported by the buses and the facade.
///
/// Setup errors (`DuplicateHandler`, `InvalidConfig`, `Disposed`) are returned
/// to the caller. `HandlerExecution` is only ever reported to loggers.
#[derive(Error, Debug)]
pub enum BusError {
    /// A handler is already mapped for this message type
    ///
    /// The existing mapping stays active.
    #[error("a {kind} handler is already mapped for {message_type}")]
    DuplicateHandler {
        /// Which registry rejected the mapping
        kind: MessageKind,
        /// The message type that was mapped twice
        message_type: MessageType,
    },

    /// No handler is mapped for the concrete type of a dispatched message
    #[error("no {kind} handler mapped for {message_type}")]
    UnroutableMessage {
        /// Which bus received the message
        kind: MessageKind,
        /// The concrete message type
        message_type: MessageType,
    },

    /// The handler's kind cannot be executed in the current context
    #[error("cannot execute {handler_kind} handler for {message_type}: {reason}")]
    UnsupportedCommandHandler {
        /// The command type
        message_type: MessageType,
        /// The handler's kind
        handler_kind: HandlerKind,
        /// Why execution is not possible
        reason: String,
    },

    /// A handler body returned an error or panicked
    ///
    /// Contained at the bus boundary and reported to the logger channel;
    /// never retried.
    #[error("{kind} handler for {message_type} failed: {source}")]
    HandlerExecution {
        /// Which bus ran the handler
        kind: MessageKind,
        /// The message type being handled
        message_type: MessageType,
        /// The underlying failure
        #[source]
        source: HandlerError,
    },

    /// The facade has been disposed
    #[error("facade has been disposed")]
    Disposed,

    /// Facade configuration was rejected at construction
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BusError {
    /// Whether this error was produced by a handler body.
    #[must_use]
    pub const fn is_handler_failure(&self) -> bool {
        matches!(self, Self::HandlerExecution { .. })
    }

    /// The message type the error relates to, if any.
    #[must_use]
    pub const fn message_type(&self) -> Option<MessageType> {
        match self {
            Self::DuplicateHandler { message_type, .. }
            | Self::UnroutableMessage { message_type, .. }
            | Self::UnsupportedCommandHandler { message_type, .. }
            | Self::HandlerExecution { message_type, .. } => Some(*message_type),
            Self::Disposed | Self::InvalidConfig(_) => None,
        }
    }
}

/// Result alias used across the runtime.
pub type Result<T> = std::result::Result<T, BusError>;
