//! Negotiation behaviour of a holon
//!
//! A holon with an offer price answers matching calls for proposals. A holon
//! that sent a call for proposal accepts the first proposal per conversation
//! and denies later ones. Accept and deny close the conversation on both
//! sides. Replies to one holon go to that holon's inbox topic, broadcasts to
//! the shared topic.

use std::collections::HashSet;

use chrono::{Duration as ChronoDuration, Utc};
use i40_messaging::message_types::{
    ACCEPT_PROPOSAL, CALL_FOR_PROPOSAL, DENY_PROPOSAL, PROPOSAL,
};
use i40_messaging::topics::agent_inbox;
use i40_messaging::{ElementCollection, Message, MessageBuilder, Property, Reference, ValidationError};
use tracing::{debug, info};

/// Receiver id of calls addressed to every holon
pub const BROADCAST: &str = "broadcast";

const CAPABILITY: &str = "Capability";
const CAPABILITY_NAME: &str = "Name";
const QUANTITY: &str = "Quantity";
const PRICE: &str = "Price";

/// What the agent loop should do after a message was handled
#[derive(Debug)]
pub enum Action {
    Publish(Message),
    Complete(String),
}

/// Topic for an outgoing message; `None` means the client's default topic
pub fn topic_for(namespace: &str, message: &Message) -> Option<String> {
    match message.receiver_id() {
        BROADCAST => None,
        receiver => Some(agent_inbox(namespace, receiver)),
    }
}

pub struct Negotiator {
    agent_id: String,
    role: String,
    capability: String,
    offer_price: Option<f64>,
    awarded: HashSet<String>,
}

impl Negotiator {
    pub fn new(
        agent_id: impl Into<String>,
        role: impl Into<String>,
        capability: impl Into<String>,
        offer_price: Option<f64>,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            role: role.into(),
            capability: capability.into(),
            offer_price,
            awarded: HashSet::new(),
        }
    }

    /// Forget awards of conversations the tracker no longer holds.
    /// Returns how many were dropped.
    pub fn prune<F>(&mut self, still_tracked: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        let before = self.awarded.len();
        self.awarded.retain(|id| still_tracked(id));
        before - self.awarded.len()
    }

    fn reply_to(&self, request: &Message, message_type: &str) -> MessageBuilder {
        let mut builder = MessageBuilder::new()
            .from(&self.agent_id, Some(self.role.as_str()))
            .to(request.sender_id(), None)
            .message_type(message_type)
            .conversation_id(request.conversation_id());
        if let Some(id) = request.message_id() {
            builder = builder.replying_to(id);
        }
        builder
    }

    pub fn call_for_proposal(
        &self,
        receiver: &str,
        conversation_id: &str,
        quantity: u32,
    ) -> Result<Message, ValidationError> {
        MessageBuilder::new()
            .from(&self.agent_id, Some(self.role.as_str()))
            .to(receiver, None)
            .message_type(CALL_FOR_PROPOSAL)
            .conversation_id(conversation_id)
            .reply_by(Utc::now() + ChronoDuration::seconds(30))
            .element(
                ElementCollection::new(CAPABILITY)
                    .with_semantic_id(Reference::global(format!(
                        "urn:i40:capability:{}",
                        self.capability.to_lowercase()
                    )))
                    .with_element(Property::new(CAPABILITY_NAME, &self.capability)),
            )
            .element(Property::new(QUANTITY, quantity.to_string()).with_value_type("xs:int"))
            .build()
    }

    /// Decide the reaction to one received message
    pub fn handle(&mut self, message: &Message) -> Result<Vec<Action>, ValidationError> {
        if message.sender_id() == self.agent_id {
            return Ok(Vec::new());
        }
        let addressed = message.receiver_id() == self.agent_id;

        match message.message_type() {
            CALL_FOR_PROPOSAL if addressed || message.receiver_id() == BROADCAST => {
                self.propose(message)
            }
            PROPOSAL if addressed => self.award(message),
            ACCEPT_PROPOSAL | DENY_PROPOSAL if addressed => {
                info!(
                    "{} from {} closes conversation {}",
                    message.message_type(),
                    message.sender_id(),
                    message.conversation_id()
                );
                Ok(vec![Action::Complete(message.conversation_id().to_string())])
            }
            other => {
                debug!("Ignoring {} from {}", other, message.sender_id());
                Ok(Vec::new())
            }
        }
    }

    fn propose(&self, request: &Message) -> Result<Vec<Action>, ValidationError> {
        let Some(price) = self.offer_price else {
            debug!("No offer price configured, ignoring call for proposal");
            return Ok(Vec::new());
        };

        let requested = request
            .element(CAPABILITY)
            .and_then(|c| c.property_value(CAPABILITY_NAME));
        if let Some(requested) = requested {
            if !requested.eq_ignore_ascii_case(&self.capability) {
                debug!("Call for {} does not match {}", requested, self.capability);
                return Ok(Vec::new());
            }
        }

        info!(
            "Proposing {} for {} to {}",
            price,
            self.capability,
            request.sender_id()
        );
        let proposal = self
            .reply_to(request, PROPOSAL)
            .element(Property::new(PRICE, price.to_string()).with_value_type("xs:double"))
            .element(Property::new(CAPABILITY_NAME, &self.capability))
            .build()?;
        Ok(vec![Action::Publish(proposal)])
    }

    fn award(&mut self, proposal: &Message) -> Result<Vec<Action>, ValidationError> {
        let conversation_id = proposal.conversation_id().to_string();
        if self.awarded.insert(conversation_id.clone()) {
            info!(
                "Accepting proposal from {} in {}",
                proposal.sender_id(),
                conversation_id
            );
            let accept = self.reply_to(proposal, ACCEPT_PROPOSAL).build()?;
            Ok(vec![Action::Publish(accept), Action::Complete(conversation_id)])
        } else {
            let deny = self.reply_to(proposal, DENY_PROPOSAL).build()?;
            Ok(vec![Action::Publish(deny)])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn published(actions: &[Action]) -> Vec<&Message> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Publish(m) => Some(m),
                Action::Complete(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_resource_answers_matching_call() {
        let product = Negotiator::new("P24", "Product", "Drilling", None);
        let mut resource = Negotiator::new("RH2", "Resource", "drilling", Some(12.5));

        let cfp = product.call_for_proposal(BROADCAST, "c1", 2).unwrap();
        let actions = resource.handle(&cfp).unwrap();
        let replies = published(&actions);

        assert_eq!(replies.len(), 1);
        let proposal = replies[0];
        assert_eq!(proposal.message_type(), PROPOSAL);
        assert_eq!(proposal.receiver_id(), "P24");
        assert_eq!(proposal.conversation_id(), "c1");
        assert_eq!(proposal.frame.reply_to.as_deref(), cfp.message_id());
        assert_eq!(
            proposal.element(PRICE).and_then(|p| p.as_property()).and_then(|p| p.value.as_deref()),
            Some("12.5")
        );
    }

    #[test]
    fn test_resource_ignores_without_price_or_capability() {
        let product = Negotiator::new("P24", "Product", "Milling", None);
        let cfp = product.call_for_proposal(BROADCAST, "c1", 1).unwrap();

        let mut no_price = Negotiator::new("RH2", "Resource", "Milling", None);
        assert!(no_price.handle(&cfp).unwrap().is_empty());

        let mut other = Negotiator::new("RH3", "Resource", "Drilling", Some(3.0));
        assert!(other.handle(&cfp).unwrap().is_empty());
    }

    #[test]
    fn test_product_accepts_first_and_denies_rest() {
        let mut product = Negotiator::new("P24", "Product", "Drilling", None);
        let cfp = product.call_for_proposal(BROADCAST, "c1", 1).unwrap();
        let mut rh2 = Negotiator::new("RH2", "Resource", "Drilling", Some(5.0));
        let mut rh3 = Negotiator::new("RH3", "Resource", "Drilling", Some(4.0));

        let first = rh2.handle(&cfp).unwrap();
        let second = rh3.handle(&cfp).unwrap();

        let actions = product.handle(published(&first)[0]).unwrap();
        assert_eq!(published(&actions)[0].message_type(), ACCEPT_PROPOSAL);
        assert_eq!(published(&actions)[0].receiver_id(), "RH2");
        assert!(matches!(&actions[1], Action::Complete(id) if id == "c1"));

        let actions = product.handle(published(&second)[0]).unwrap();
        assert_eq!(actions.len(), 1);
        assert_eq!(published(&actions)[0].message_type(), DENY_PROPOSAL);

        let repeated = published(&product.handle(published(&first)[0]).unwrap())[0].clone();
        assert_eq!(repeated.message_type(), DENY_PROPOSAL);
    }

    #[test]
    fn test_prune_drops_untracked_awards() {
        let mut product = Negotiator::new("P24", "Product", "Drilling", None);
        let mut resource = Negotiator::new("RH2", "Resource", "Drilling", Some(2.0));
        for id in ["c1", "c2"] {
            let cfp = product.call_for_proposal("RH2", id, 1).unwrap();
            let proposal = published(&resource.handle(&cfp).unwrap())[0].clone();
            product.handle(&proposal).unwrap();
        }

        assert_eq!(product.prune(|id| id == "c2"), 1);
        assert_eq!(product.prune(|id| id == "c2"), 0);
        assert!(product.awarded.contains("c2"));
        assert!(!product.awarded.contains("c1"));
    }

    #[test]
    fn test_directed_replies_use_the_receiver_inbox() {
        let product = Negotiator::new("P24", "Product", "Drilling", None);
        let mut resource = Negotiator::new("RH2", "Resource", "Drilling", Some(2.0));

        let broadcast = product.call_for_proposal(BROADCAST, "c1", 1).unwrap();
        assert_eq!(topic_for("factory", &broadcast), None);

        let proposal = published(&resource.handle(&broadcast).unwrap())[0].clone();
        assert_eq!(
            topic_for("factory", &proposal).as_deref(),
            Some("factory/agents/P24/inbox")
        );
    }

    #[test]
    fn test_decision_completes_and_own_messages_are_ignored() {
        let mut product = Negotiator::new("P24", "Product", "Drilling", None);
        let mut resource = Negotiator::new("RH2", "Resource", "Drilling", Some(1.0));

        let cfp = product.call_for_proposal("RH2", "c9", 1).unwrap();
        assert!(product.handle(&cfp).unwrap().is_empty());

        let proposal = published(&resource.handle(&cfp).unwrap())[0].clone();
        let decision = published(&product.handle(&proposal).unwrap())[0].clone();

        let actions = resource.handle(&decision).unwrap();
        assert_eq!(actions.len(), 1);
        assert!(matches!(&actions[0], Action::Complete(id) if id == "c9"));
    }
}
