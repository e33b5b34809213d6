//! Protocol message type tokens
//!
//! Types are open strings on the wire; routing only compares them for exact
//! equality. The constants below are the tokens the protocol currently knows.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

// Negotiation
pub const CALL_FOR_PROPOSAL: &str = "callForProposal";
pub const PROPOSAL: &str = "proposal";
pub const ACCEPT_PROPOSAL: &str = "acceptProposal";
pub const DENY_PROPOSAL: &str = "denyProposal";

// Informational
pub const INFORM: &str = "inform";
pub const INFORM_CONFIRM: &str = "informConfirm";
pub const FAILURE: &str = "failure";
pub const CONSENT: &str = "consent";

// Requirement oriented
pub const REQUIREMENT: &str = "requirement";
pub const REQUIREMENT_INFORM: &str = "requirementInform";
pub const REQUIREMENT_REPEAT: &str = "requirementRepeat";
pub const REQUIREMENT_PREVIOUSLY: &str = "requirementPreviously";
pub const REQUIREMENT_TERMINATE: &str = "requirementTerminate";

// Lifecycle
pub const LIFECYCLE_KILL_AGENT: &str = "Lifecycle_killAgent";
pub const LIFECYCLE_RESTART_AGENT: &str = "Lifecycle_restartAgent";
pub const LIFECYCLE_SPAWN_AGENT: &str = "Lifecycle_spawnAgent";
pub const LIFECYCLE_UPDATE_AGENT: &str = "Lifecycle_updateAgent";

// Order / production plan
pub const RECIPE: &str = "recipe";
pub const ORDER_DELETE_ACTION: &str = "Order_deleteAction";
pub const ORDER_TERMINATE_ACTION: &str = "Order_terminateAction";
pub const ORDER_DONE_ACTION: &str = "Order_doneAction";
pub const ORDER_EXECUTE_ACTION: &str = "Order_executeAction";
pub const ORDER_PRODUCT_CREATION: &str = "Order_productCreation";

/// Separator between a primary type and its subtype in a composed token
pub const SUBTYPE_SEPARATOR: char = '/';

/// Further describes the intent of a primary message type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageSubtype {
    ProcessChain,
    ManufacturingSequence,
    TransportRequest,
}

impl MessageSubtype {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageSubtype::ProcessChain => "ProcessChain",
            MessageSubtype::ManufacturingSequence => "ManufacturingSequence",
            MessageSubtype::TransportRequest => "TransportRequest",
        }
    }
}

impl fmt::Display for MessageSubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unrecognised subtype token
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown message subtype: {0}")]
pub struct UnknownSubtype(pub String);

impl FromStr for MessageSubtype {
    type Err = UnknownSubtype;

    /// Case-insensitive, surrounding whitespace ignored
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        [
            MessageSubtype::ProcessChain,
            MessageSubtype::ManufacturingSequence,
            MessageSubtype::TransportRequest,
        ]
        .into_iter()
        .find(|st| st.as_str().eq_ignore_ascii_case(trimmed))
        .ok_or_else(|| UnknownSubtype(s.to_string()))
    }
}

/// Compose `primary/Subtype`
pub fn with_subtype(primary: &str, subtype: MessageSubtype) -> String {
    format!("{}{}{}", primary, SUBTYPE_SEPARATOR, subtype)
}

/// Split a type token into its primary type and a recognised subtype.
/// Tokens without a known subtype come back whole.
pub fn split_subtype(token: &str) -> (&str, Option<MessageSubtype>) {
    match token.split_once(SUBTYPE_SEPARATOR) {
        Some((primary, raw)) => match raw.parse() {
            Ok(subtype) => (primary, Some(subtype)),
            Err(_) => (token, None),
        },
        None => (token, None),
    }
}
