//! Error types for the messaging layer

use std::fmt;

use thiserror::Error;

/// Required frame fields, in the order the builder checks them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameField {
    SenderId,
    ReceiverId,
    Type,
    ConversationId,
}

impl FrameField {
    /// Wire path of the field inside the `frame` object
    pub fn wire_path(self) -> &'static str {
        match self {
            FrameField::SenderId => "frame.sender.identification.id",
            FrameField::ReceiverId => "frame.receiver.identification.id",
            FrameField::Type => "frame.type",
            FrameField::ConversationId => "frame.conversationId",
        }
    }
}

impl fmt::Display for FrameField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FrameField::SenderId => "sender id",
            FrameField::ReceiverId => "receiver id",
            FrameField::Type => "message type",
            FrameField::ConversationId => "conversation id",
        };
        write!(f, "{}", s)
    }
}

/// A message could not be built because a required frame field is empty
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Validation error: {field} is required")]
pub struct ValidationError {
    pub field: FrameField,
}

/// Inbound bytes could not be turned into a message
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Expected a JSON object at {0}")]
    NotAnObject(String),

    #[error("Missing required field {0}")]
    MissingField(String),

    #[error("Invalid frame: {0}")]
    Frame(serde_json::Error),

    #[error("Unknown modelType `{model_type}` at {path}")]
    UnknownModelType { model_type: String, path: String },

    #[error("Invalid element at {path}: {reason}")]
    InvalidElement { path: String, reason: String },
}

/// A message could not be serialized
#[derive(Debug, Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(#[from] serde_json::Error);

/// A user callback failed during dispatch
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallbackError {
    #[error("Callback {selector} failed: {message}")]
    Failed { selector: String, message: String },

    #[error("Callback {selector} panicked: {message}")]
    Panicked { selector: String, message: String },
}

/// Errors surfaced by a transport implementation
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Transport is not connected")]
    NotConnected,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Timed out waiting for {0}")]
    Timeout(String),

    #[error("MQTT error: {0}")]
    Mqtt(String),
}

impl From<rumqttc::ClientError> for TransportError {
    fn from(err: rumqttc::ClientError) -> Self {
        TransportError::Mqtt(err.to_string())
    }
}

/// Umbrella error for client operations
#[derive(Debug, Error)]
pub enum MessagingError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_names_field() {
        let err = ValidationError {
            field: FrameField::ReceiverId,
        };
        assert_eq!(err.to_string(), "Validation error: receiver id is required");
        assert_eq!(err.field.wire_path(), "frame.receiver.identification.id");
    }

    #[test]
    fn test_unknown_model_type_message() {
        let err = DecodeError::UnknownModelType {
            model_type: "Blob".to_string(),
            path: "interactionElements[0]".to_string(),
        };
        assert!(err.to_string().contains("`Blob`"));
        assert!(err.to_string().contains("interactionElements[0]"));
    }
}
