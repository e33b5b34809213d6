//! Topic naming and MQTT-style filter matching

/// Topic a client subscribes to on connect unless configured otherwise
pub const DEFAULT_TOPIC: &str = "i40/messages";

/// Messages addressed to one agent
pub fn agent_inbox(namespace: &str, agent_id: &str) -> String {
    format!("{}/agents/{}/inbox", namespace, agent_id)
}

/// Whether `topic` matches the subscription `filter`.
///
/// `+` matches exactly one level, a trailing `#` matches any remainder
/// (including none).
pub fn matches_filter(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_formatting() {
        assert_eq!(agent_inbox("factory", "RH2"), "factory/agents/RH2/inbox");
        assert!(matches_filter("factory/agents/+/inbox", &agent_inbox("factory", "RH2")));
    }

    #[test]
    fn test_filter_matching() {
        assert!(matches_filter("i40/messages", "i40/messages"));
        assert!(!matches_filter("i40/messages", "i40/messages/x"));
        assert!(!matches_filter("i40/messages/x", "i40/messages"));
        assert!(matches_filter("factory/agents/+/inbox", "factory/agents/RH2/inbox"));
        assert!(!matches_filter("factory/agents/+/inbox", "factory/agents/inbox"));
        assert!(matches_filter("factory/#", "factory/agents/RH2/inbox"));
        assert!(matches_filter("factory/#", "factory"));
        assert!(matches_filter("#", "anything/at/all"));
        assert!(!matches_filter("factory/#/x", "factory/a/x"));
    }
}
