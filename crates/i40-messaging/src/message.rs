//! Message envelope: frame metadata plus payload tree

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::payload::{find_element, PayloadElement};

/// Identity of an agent
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identification {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_type: Option<String>,
}

/// Role an agent plays in an exchange
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    #[serde(default)]
    pub name: String,
}

/// Sender or receiver of a frame
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub identification: Identification,
    #[serde(default)]
    pub role: Role,
}

impl Participant {
    /// Participant with an id and an optional role name
    pub fn new(id: impl Into<String>, role: Option<&str>) -> Self {
        Self {
            identification: Identification {
                id: id.into(),
                id_type: None,
            },
            role: Role {
                name: role.unwrap_or_default().to_string(),
            },
        }
    }

    pub fn id(&self) -> &str {
        &self.identification.id
    }
}

/// Envelope metadata of a message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageFrame {
    pub sender: Participant,
    pub receiver: Participant,
    /// Protocol message type token, e.g. `callForProposal`
    #[serde(rename = "type")]
    pub message_type: String,
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Offset-less timestamps from peers are read as UTC
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_reply_by"
    )]
    pub reply_by: Option<DateTime<Utc>>,
}

fn deserialize_reply_by<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if let Ok(at) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(Some(at.with_timezone(&Utc)));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Some(naive.and_utc()))
        .map_err(|e| serde::de::Error::custom(format!("invalid replyBy `{}`: {}", raw, e)))
}

/// A complete protocol message.
///
/// `created_at` and `received_at` are process-local and never go on the wire.
/// Equality compares wire-visible content only.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub frame: MessageFrame,
    pub interaction_elements: Vec<PayloadElement>,
    #[serde(skip)]
    created_at: DateTime<Utc>,
    #[serde(skip)]
    received_at: Option<DateTime<Utc>>,
}

impl Message {
    pub(crate) fn new(frame: MessageFrame, interaction_elements: Vec<PayloadElement>) -> Self {
        Self {
            frame,
            interaction_elements,
            created_at: Utc::now(),
            received_at: None,
        }
    }

    pub(crate) fn received(frame: MessageFrame, interaction_elements: Vec<PayloadElement>) -> Self {
        let now = Utc::now();
        Self {
            frame,
            interaction_elements,
            created_at: now,
            received_at: Some(now),
        }
    }

    pub fn sender_id(&self) -> &str {
        self.frame.sender.id()
    }

    pub fn receiver_id(&self) -> &str {
        self.frame.receiver.id()
    }

    pub fn message_type(&self) -> &str {
        &self.frame.message_type
    }

    pub fn conversation_id(&self) -> &str {
        &self.frame.conversation_id
    }

    pub fn message_id(&self) -> Option<&str> {
        self.frame.message_id.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Set by the codec when the message was decoded from the wire
    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        self.received_at
    }

    /// First top-level element with the given `idShort`
    pub fn element(&self, id_short: &str) -> Option<&PayloadElement> {
        find_element(&self.interaction_elements, id_short)
    }
}

impl PartialEq for Message {
    fn eq(&self, other: &Self) -> bool {
        self.frame == other.frame && self.interaction_elements == other.interaction_elements
    }
}

impl Eq for Message {}
