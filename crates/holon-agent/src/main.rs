//! Holon Agent - Negotiation participant on an I4.0 message bus
//!
//! Responsibilities:
//! - Connect to MQTT and listen on the negotiation topic and own inbox
//! - Log every message, connection changes and record conversations
//! - Optionally open a negotiation with a call for proposal
//! - Answer calls for proposals when an offer price is configured
//! - Close conversations on accept/deny
//! - Sweep expired conversations and their award records periodically

mod config;
mod negotiation;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use config::AgentConfig;
use i40_messaging::inbox::DEFAULT_INBOX_CAPACITY;
use i40_messaging::{ClientOptions, Message, MessagingClient, MqttTransport};
use negotiation::{topic_for, Action, Negotiator};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AgentConfig::parse();

    info!("Holon Agent starting...");
    info!("  Agent ID: {} ({})", config.agent_id, config.agent_role);
    info!("  MQTT: {}:{}", config.mqtt_host, config.mqtt_port);
    info!("  Topic: {}", config.topic);
    info!("  Inbox: {}", config.inbox_topic());
    info!("  Capability: {}", config.capability);
    if let Some(price) = config.offer_price {
        info!("  Offer price: {}", price);
    }

    let transport = Arc::new(MqttTransport::new(config.mqtt_settings()));
    let client = MessagingClient::with_options(
        transport,
        ClientOptions {
            default_topic: config.topic.clone(),
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
            conversation_timeout: Duration::from_secs(config.conversation_timeout_secs),
        },
    );

    // Callbacks run on the transport task; hand messages over to the main loop
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    client.on_message(move |message| {
        info!(
            "{} {} -> {} conversation={}",
            message.message_type(),
            message.sender_id(),
            message.receiver_id(),
            message.conversation_id()
        );
        tx.send(message.clone())?;
        Ok(())
    });

    let mut connection = client.connection_state();
    client.connect().await?;
    client.subscribe(&config.inbox_topic()).await?;

    let mut negotiator = Negotiator::new(
        &config.agent_id,
        &config.agent_role,
        &config.capability,
        config.offer_price,
    );

    if let Some(receiver) = &config.call_for_proposal_to {
        let conversation_id = client.create_conversation(None);
        let cfp = negotiator.call_for_proposal(receiver, &conversation_id, config.quantity)?;
        let topic = topic_for(&config.namespace, &cfp);
        client.publish(cfp, topic.as_deref()).await?;
        info!("Sent call for proposal to {} in {}", receiver, conversation_id);
    }

    info!("Holon Agent running");

    let mut sweep = tokio::time::interval(Duration::from_secs(config.cleanup_interval_secs.max(1)));

    loop {
        tokio::select! {
            Some(message) = rx.recv() => {
                match negotiator.handle(&message) {
                    Ok(actions) => run_actions(&client, &config.namespace, actions).await,
                    Err(e) => error!("Failed to build reply: {}", e),
                }
            }
            Ok(()) = connection.changed() => {
                if *connection.borrow_and_update() {
                    info!("Connected to broker");
                } else {
                    warn!("Connection to broker lost");
                }
            }
            _ = sweep.tick() => sweep_conversations(&client, &mut negotiator),
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    client.disconnect().await?;
    Ok(())
}

async fn run_actions(client: &MessagingClient, namespace: &str, actions: Vec<Action>) {
    for action in actions {
        match action {
            Action::Publish(message) => {
                let topic = topic_for(namespace, &message);
                if let Err(e) = client.publish(message, topic.as_deref()).await {
                    error!("Failed to publish: {}", e);
                }
            }
            Action::Complete(conversation_id) => client.complete_conversation(&conversation_id),
        }
    }
}

fn sweep_conversations(client: &MessagingClient, negotiator: &mut Negotiator) {
    let removed = client.cleanup_expired_conversations();
    if removed > 0 {
        info!(
            "Removed {} conversations, {} still active",
            removed,
            client.active_conversations()
        );
    }
    let conversations = client.conversations();
    let forgotten = negotiator.prune(|id| conversations.exists(id));
    if forgotten > 0 {
        info!("Forgot {} settled awards", forgotten);
    }
}
