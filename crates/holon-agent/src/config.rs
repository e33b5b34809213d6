//! Holon agent configuration

use std::time::Duration;

use clap::Parser;
use i40_messaging::topics::agent_inbox;
use i40_messaging::MqttSettings;

#[derive(Debug, Parser)]
#[command(name = "holon-agent")]
#[command(about = "Holon Agent - Take part in I4.0 negotiations over MQTT")]
pub struct AgentConfig {
    /// MQTT broker host
    #[arg(long, env = "I40_MQTT_HOST", default_value = "localhost")]
    pub mqtt_host: String,

    /// MQTT broker port
    #[arg(long, env = "I40_MQTT_PORT", default_value = "1883")]
    pub mqtt_port: u16,

    /// MQTT client ID prefix
    #[arg(long, env = "I40_MQTT_CLIENT_ID_PREFIX", default_value = "i40")]
    pub mqtt_client_id_prefix: String,

    /// MQTT keep alive interval in seconds
    #[arg(long, env = "I40_MQTT_KEEP_ALIVE_SECS", default_value = "60")]
    pub mqtt_keep_alive_secs: u64,

    /// Seconds to wait for the broker to accept the connection
    #[arg(long, env = "I40_MQTT_CONNECT_TIMEOUT_SECS", default_value = "10")]
    pub mqtt_connect_timeout_secs: u64,

    /// MQTT username
    #[arg(long, env = "I40_MQTT_USERNAME")]
    pub mqtt_username: Option<String>,

    /// MQTT password
    #[arg(long, env = "I40_MQTT_PASSWORD", hide_env_values = true)]
    pub mqtt_password: Option<String>,

    /// Topic carrying negotiation messages
    #[arg(long, env = "I40_TOPIC", default_value = "i40/messages")]
    pub topic: String,

    /// Namespace of per-agent inbox topics (`<namespace>/agents/<id>/inbox`)
    #[arg(long, env = "I40_NAMESPACE", default_value = "i40")]
    pub namespace: String,

    /// Agent ID (unique identifier for this agent)
    #[arg(long, env = "I40_AGENT_ID", default_value = "holon")]
    pub agent_id: String,

    /// Role name put in the sender frame
    #[arg(long, env = "I40_AGENT_ROLE", default_value = "Resource")]
    pub agent_role: String,

    /// Capability this agent offers or asks for
    #[arg(long, env = "I40_CAPABILITY", default_value = "Drilling")]
    pub capability: String,

    /// Price quoted in proposals; without it calls for proposals are ignored
    #[arg(long, env = "I40_OFFER_PRICE")]
    pub offer_price: Option<f64>,

    /// Send a call for proposal to this receiver at start-up
    #[arg(long, env = "I40_CFP_RECEIVER")]
    pub call_for_proposal_to: Option<String>,

    /// Quantity requested in the start-up call for proposal
    #[arg(long, env = "I40_QUANTITY", default_value = "1")]
    pub quantity: u32,

    /// Seconds between sweeps of expired conversations
    #[arg(long, env = "I40_CLEANUP_INTERVAL_SECS", default_value = "60")]
    pub cleanup_interval_secs: u64,

    /// Conversation inactivity timeout in seconds
    #[arg(long, env = "I40_CONVERSATION_TIMEOUT_SECS", default_value = "1800")]
    pub conversation_timeout_secs: u64,
}

impl AgentConfig {
    /// Topic carrying messages addressed to this agent
    pub fn inbox_topic(&self) -> String {
        agent_inbox(&self.namespace, &self.agent_id)
    }

    pub fn mqtt_settings(&self) -> MqttSettings {
        let mut settings = MqttSettings::new(
            &self.mqtt_host,
            self.mqtt_port,
            format!("{}-{}", self.mqtt_client_id_prefix, self.agent_id),
        );
        settings.keep_alive = Duration::from_secs(self.mqtt_keep_alive_secs);
        settings.connect_timeout = Duration::from_secs(self.mqtt_connect_timeout_secs);
        if let Some(username) = &self.mqtt_username {
            settings = settings.with_credentials(username, self.mqtt_password.clone().unwrap_or_default());
        }
        settings
    }
}
