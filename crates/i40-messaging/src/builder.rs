//! Fluent construction of validated messages

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{FrameField, ValidationError};
use crate::message::{Message, MessageFrame, Participant};
use crate::message_types::{with_subtype, MessageSubtype};
use crate::payload::PayloadElement;

/// Builds one [`Message`]. `build` consumes the builder.
///
/// A fresh conversation id and message id are assigned up front and can be
/// overridden.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    sender: Participant,
    receiver: Participant,
    message_type: String,
    conversation_id: String,
    message_id: Option<String>,
    reply_to: Option<String>,
    reply_by: Option<DateTime<Utc>>,
    elements: Vec<PayloadElement>,
}

impl Default for MessageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBuilder {
    pub fn new() -> Self {
        Self {
            sender: Participant::default(),
            receiver: Participant::default(),
            message_type: String::new(),
            conversation_id: Uuid::new_v4().to_string(),
            message_id: Some(Uuid::new_v4().to_string()),
            reply_to: None,
            reply_by: None,
            elements: Vec::new(),
        }
    }

    /// Sender id with an optional role name
    pub fn from(mut self, sender_id: impl Into<String>, role: Option<&str>) -> Self {
        self.sender = Participant::new(sender_id, role);
        self
    }

    /// Receiver id with an optional role name
    pub fn to(mut self, receiver_id: impl Into<String>, role: Option<&str>) -> Self {
        self.receiver = Participant::new(receiver_id, role);
        self
    }

    pub fn sender(mut self, sender: Participant) -> Self {
        self.sender = sender;
        self
    }

    pub fn receiver(mut self, receiver: Participant) -> Self {
        self.receiver = receiver;
        self
    }

    pub fn message_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = message_type.into();
        self
    }

    /// Primary type combined with a subtype, e.g. `callForProposal/ProcessChain`
    pub fn message_type_with_subtype(mut self, primary: &str, subtype: MessageSubtype) -> Self {
        self.message_type = with_subtype(primary, subtype);
        self
    }

    pub fn conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = conversation_id.into();
        self
    }

    pub fn message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    /// Mark the message as an answer to an earlier message id
    pub fn replying_to(mut self, message_id: impl Into<String>) -> Self {
        self.reply_to = Some(message_id.into());
        self
    }

    /// Deadline for answers
    pub fn reply_by(mut self, deadline: DateTime<Utc>) -> Self {
        self.reply_by = Some(deadline);
        self
    }

    pub fn element(mut self, element: impl Into<PayloadElement>) -> Self {
        self.elements.push(element.into());
        self
    }

    pub fn elements<I>(mut self, elements: I) -> Self
    where
        I: IntoIterator<Item = PayloadElement>,
    {
        self.elements.extend(elements);
        self
    }

    /// Validate required fields and produce the message.
    ///
    /// Fields are checked in the order sender, receiver, type, conversation id;
    /// the first empty one is reported.
    pub fn build(self) -> Result<Message, ValidationError> {
        let frame = MessageFrame {
            sender: self.sender,
            receiver: self.receiver,
            message_type: self.message_type,
            conversation_id: self.conversation_id,
            message_id: self.message_id,
            reply_to: self.reply_to,
            reply_by: self.reply_by,
        };
        validate_frame(&frame)?;
        Ok(Message::new(frame, self.elements))
    }
}

/// Check the four required frame fields in their fixed order
pub fn validate_frame(frame: &MessageFrame) -> Result<(), ValidationError> {
    let checks = [
        (FrameField::SenderId, frame.sender.id()),
        (FrameField::ReceiverId, frame.receiver.id()),
        (FrameField::Type, frame.message_type.as_str()),
        (FrameField::ConversationId, frame.conversation_id.as_str()),
    ];
    match checks.iter().find(|(_, value)| value.is_empty()) {
        Some((field, _)) => Err(ValidationError { field: *field }),
        None => Ok(()),
    }
}
