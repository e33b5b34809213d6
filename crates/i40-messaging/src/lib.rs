//! Client-side messaging layer for I4.0 inter-agent negotiation
//!
//! This crate contains:
//! - Message envelope, builder and the semantically typed payload tree
//! - Canonical JSON codec
//! - Callback registry, conversation tracker and bounded inbox
//! - Transport abstraction with MQTT and in-process loopback implementations
//! - `MessagingClient`, which wires all of the above to one transport

pub mod builder;
pub mod callbacks;
pub mod client;
pub mod codec;
pub mod conversation;
pub mod error;
pub mod inbox;
pub mod message;
pub mod message_types;
pub mod payload;
pub mod topics;
pub mod transport;

// Re-export commonly used types
pub use builder::MessageBuilder;
pub use callbacks::{Callback, CallbackId, CallbackRegistry, CallbackResult, DispatchReport, Selector};
pub use client::{ClientOptions, MessagingClient};
pub use codec::MessageCodec;
pub use conversation::{ConversationSummary, ConversationTracker};
pub use error::{
    CallbackError, DecodeError, EncodeError, FrameField, MessagingError, TransportError,
    ValidationError,
};
pub use inbox::{Inbox, InboxEntry};
pub use message::{Identification, Message, MessageFrame, Participant, Role};
pub use message_types::MessageSubtype;
pub use payload::{
    ElementCollection, ElementList, Key, LangString, PayloadElement, Property, Reference,
    ReferenceKind,
};
pub use transport::{LoopbackBroker, LoopbackTransport, MqttSettings, MqttTransport, Transport};
