//! Multicast ID to MQTT topic translation
//!
//! Multicast IDs already use `/` as level separator and `+` as single level
//! wildcard, so only the multi-level wildcard differs: `*` becomes `#`.

use interlink::subscription::multicast::MULTI_LEVEL_WILDCARD;

const MQTT_MULTI_LEVEL_WILDCARD: &str = "#";

/// Wildcard subscription covering every topic below `own_topic`
pub fn own_subscription_topic(own_topic: &str) -> String {
    format!("{}/{}", own_topic.trim_end_matches('/'), MQTT_MULTI_LEVEL_WILDCARD)
}

/// Topic a multicast ID is published on
pub fn multicast_topic(prefix: &str, multicast_id: &str) -> String {
    let translated = match multicast_id.strip_suffix(MULTI_LEVEL_WILDCARD) {
        Some(head) if head.is_empty() || head.ends_with('/') => {
            format!("{}{}", head, MQTT_MULTI_LEVEL_WILDCARD)
        }
        _ => multicast_id.to_string(),
    };
    format!("{}{}", prefix, translated)
}
