//! Device and gateway topic namespace
//!
//! The wire contract between devices and the platform is a fixed topic
//! namespace with two address classes:
//!
//! - **Device API** (`v1/devices/me/...`): one physical device per
//!   connection. Request/response pairs are correlated purely by a token
//!   appended as the final topic segment; the requester subscribes to the
//!   matching `<prefix>+` wildcard before publishing its request.
//! - **Gateway API** (`v1/gateway/...`): one connection multiplexing many
//!   logical devices. Gateway topics never carry a correlation or device-id
//!   path segment; device identity travels in the payload.
//!
//! All topic strings are build-time constants. Only the correlation token
//! suffix is computed, and tokens are opaque strings compared by exact byte
//! equality.

/// Base topic for the direct device API
pub const BASE_DEVICE_API_TOPIC: &str = "v1/devices/me";

/// Telemetry upload (device publishes, fire and forget)
pub const DEVICE_TELEMETRY_TOPIC: &str = "v1/devices/me/telemetry";

/// Attribute updates: device publishes to update its client-side
/// attributes, and subscribes here to receive pushed shared attributes
pub const DEVICE_ATTRIBUTES_TOPIC: &str = "v1/devices/me/attributes";

/// Prefix for device attribute requests; the device appends its own token
pub const DEVICE_ATTRIBUTES_REQUEST_TOPIC_PREFIX: &str = "v1/devices/me/attributes/request/";

/// Prefix for attribute responses; the server appends the matching token
pub const DEVICE_ATTRIBUTES_RESPONSE_TOPIC_PREFIX: &str = "v1/devices/me/attributes/response/";

/// Subscription catching every attribute response
pub const DEVICE_ATTRIBUTES_RESPONSES_TOPIC: &str = "v1/devices/me/attributes/response/+";

/// Prefix for server-pushed RPC requests (server assigns the token)
pub const DEVICE_RPC_REQUESTS_TOPIC: &str = "v1/devices/me/rpc/request/";

/// Subscription catching every server-side RPC request
pub const DEVICE_RPC_REQUESTS_SUB_TOPIC: &str = "v1/devices/me/rpc/request/+";

/// Prefix the device publishes RPC responses to, suffixed with the token
/// carried by the corresponding request
pub const DEVICE_RPC_RESPONSE_TOPIC: &str = "v1/devices/me/rpc/response/";

/// Subscription catching every device-side RPC response
pub const DEVICE_RPC_RESPONSE_SUB_TOPIC: &str = "v1/devices/me/rpc/response/+";

/// Base topic for the gateway (multiplexing) API
pub const BASE_GATEWAY_API_TOPIC: &str = "v1/gateway";

/// Logical device connect announcement
pub const GATEWAY_CONNECT_TOPIC: &str = "v1/gateway/connect";

/// Logical device disconnect announcement
pub const GATEWAY_DISCONNECT_TOPIC: &str = "v1/gateway/disconnect";

/// Aggregated attribute updates for multiplexed devices
pub const GATEWAY_ATTRIBUTES_TOPIC: &str = "v1/gateway/attributes";

/// Aggregated telemetry for multiplexed devices
pub const GATEWAY_TELEMETRY_TOPIC: &str = "v1/gateway/telemetry";

/// RPC exchange for multiplexed devices
pub const GATEWAY_RPC_TOPIC: &str = "v1/gateway/rpc";

/// Attribute requests for multiplexed devices (token travels in payload)
pub const GATEWAY_ATTRIBUTES_REQUEST_TOPIC: &str = "v1/gateway/attributes/request";

/// Attribute responses for multiplexed devices
pub const GATEWAY_ATTRIBUTES_RESPONSE_TOPIC: &str = "v1/gateway/attributes/response";

/// Build the attribute request topic for a device-chosen token
pub fn device_attributes_request_topic(token: &str) -> String {
    format!("{}{}", DEVICE_ATTRIBUTES_REQUEST_TOPIC_PREFIX, token)
}

/// Build the attribute response topic carrying the matching token
pub fn device_attributes_response_topic(token: &str) -> String {
    format!("{}{}", DEVICE_ATTRIBUTES_RESPONSE_TOPIC_PREFIX, token)
}

/// Build the topic a server-side RPC request is pushed on
pub fn device_rpc_request_topic(token: &str) -> String {
    format!("{}{}", DEVICE_RPC_REQUESTS_TOPIC, token)
}

/// Build the topic a device publishes its RPC response to
pub fn device_rpc_response_topic(token: &str) -> String {
    format!("{}{}", DEVICE_RPC_RESPONSE_TOPIC, token)
}

/// Extract the correlation token trailing a request/response prefix.
///
/// Returns `None` if the topic does not start with the prefix or the
/// remainder is empty or spans more than one level. Tokens are opaque;
/// no numeric parsing happens here.
pub fn token_from<'a>(topic: &'a str, prefix: &str) -> Option<&'a str> {
    let token = topic.strip_prefix(prefix)?;
    if token.is_empty() || token.contains('/') {
        return None;
    }
    Some(token)
}

/// Match an MQTT topic against a subscription filter.
///
/// `+` matches exactly one level, `#` matches any number of trailing
/// levels (including zero). Everything else compares byte-for-byte.
pub fn matches_filter(filter: &str, topic: &str) -> bool {
    let mut filter_parts = filter.split('/');
    let mut topic_parts = topic.split('/');

    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Inbound publish classification for the device API
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceTopic {
    /// `v1/devices/me/telemetry`
    Telemetry,
    /// `v1/devices/me/attributes`
    AttributesUpdate,
    /// `v1/devices/me/attributes/request/<token>`
    AttributesRequest { token: String },
    /// `v1/devices/me/rpc/response/<token>`
    RpcResponse { token: String },
}

/// Inbound publish classification for the gateway API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayTopic {
    Connect,
    Disconnect,
    Attributes,
    Telemetry,
    Rpc,
    AttributesRequest,
}

impl DeviceTopic {
    /// Recognize a device API publish topic
    pub fn recognize(topic: &str) -> Option<Self> {
        match topic {
            DEVICE_TELEMETRY_TOPIC => Some(DeviceTopic::Telemetry),
            DEVICE_ATTRIBUTES_TOPIC => Some(DeviceTopic::AttributesUpdate),
            _ => {
                if let Some(token) = token_from(topic, DEVICE_ATTRIBUTES_REQUEST_TOPIC_PREFIX) {
                    Some(DeviceTopic::AttributesRequest {
                        token: token.to_string(),
                    })
                } else {
                    token_from(topic, DEVICE_RPC_RESPONSE_TOPIC).map(|token| {
                        DeviceTopic::RpcResponse {
                            token: token.to_string(),
                        }
                    })
                }
            }
        }
    }
}

impl GatewayTopic {
    /// Recognize a gateway API publish topic
    pub fn recognize(topic: &str) -> Option<Self> {
        match topic {
            GATEWAY_CONNECT_TOPIC => Some(GatewayTopic::Connect),
            GATEWAY_DISCONNECT_TOPIC => Some(GatewayTopic::Disconnect),
            GATEWAY_ATTRIBUTES_TOPIC => Some(GatewayTopic::Attributes),
            GATEWAY_TELEMETRY_TOPIC => Some(GatewayTopic::Telemetry),
            GATEWAY_RPC_TOPIC => Some(GatewayTopic::Rpc),
            GATEWAY_ATTRIBUTES_REQUEST_TOPIC => Some(GatewayTopic::AttributesRequest),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_derivation() {
        // Each sub topic is its prefix plus exactly one single-level wildcard
        assert_eq!(
            DEVICE_ATTRIBUTES_RESPONSES_TOPIC,
            format!("{}+", DEVICE_ATTRIBUTES_RESPONSE_TOPIC_PREFIX)
        );
        assert_eq!(
            DEVICE_RPC_REQUESTS_SUB_TOPIC,
            format!("{}+", DEVICE_RPC_REQUESTS_TOPIC)
        );
        assert_eq!(
            DEVICE_RPC_RESPONSE_SUB_TOPIC,
            format!("{}+", DEVICE_RPC_RESPONSE_TOPIC)
        );
    }

    #[test]
    fn test_wildcard_catches_tokened_topics() {
        assert!(matches_filter(
            DEVICE_ATTRIBUTES_RESPONSES_TOPIC,
            &device_attributes_response_topic("17")
        ));
        assert!(matches_filter(
            DEVICE_RPC_REQUESTS_SUB_TOPIC,
            &device_rpc_request_topic("42")
        ));
        assert!(matches_filter(
            DEVICE_RPC_RESPONSE_SUB_TOPIC,
            &device_rpc_response_topic("42")
        ));
    }

    #[test]
    fn test_wildcard_isolation() {
        // No other namespace topic may fall under a response wildcard
        let all = [
            DEVICE_TELEMETRY_TOPIC,
            DEVICE_ATTRIBUTES_TOPIC,
            GATEWAY_CONNECT_TOPIC,
            GATEWAY_DISCONNECT_TOPIC,
            GATEWAY_ATTRIBUTES_TOPIC,
            GATEWAY_TELEMETRY_TOPIC,
            GATEWAY_RPC_TOPIC,
            GATEWAY_ATTRIBUTES_REQUEST_TOPIC,
            GATEWAY_ATTRIBUTES_RESPONSE_TOPIC,
        ];
        for topic in all {
            assert!(
                !matches_filter(DEVICE_ATTRIBUTES_RESPONSES_TOPIC, topic),
                "{topic} must not match the attribute response wildcard"
            );
            assert!(
                !matches_filter(DEVICE_RPC_REQUESTS_SUB_TOPIC, topic),
                "{topic} must not match the rpc request wildcard"
            );
        }

        // RPC wildcards do not cross-match each other's family
        assert!(!matches_filter(
            DEVICE_RPC_REQUESTS_SUB_TOPIC,
            &device_rpc_response_topic("42")
        ));
        assert!(!matches_filter(
            DEVICE_RPC_RESPONSE_SUB_TOPIC,
            &device_rpc_request_topic("42")
        ));
    }

    #[test]
    fn test_single_level_wildcard_is_one_level() {
        // `+` catches one token segment, never deeper paths
        assert!(!matches_filter(
            DEVICE_ATTRIBUTES_RESPONSES_TOPIC,
            "v1/devices/me/attributes/response/17/extra"
        ));
        assert!(!matches_filter(
            DEVICE_ATTRIBUTES_RESPONSES_TOPIC,
            "v1/devices/me/attributes/response"
        ));
    }

    #[test]
    fn test_multi_level_wildcard() {
        assert!(matches_filter("v1/devices/me/#", DEVICE_TELEMETRY_TOPIC));
        assert!(matches_filter(
            "v1/devices/me/#",
            &device_rpc_request_topic("9")
        ));
        assert!(!matches_filter("v1/devices/me/#", GATEWAY_TELEMETRY_TOPIC));
    }

    #[test]
    fn test_token_extraction() {
        assert_eq!(
            token_from(
                "v1/devices/me/rpc/response/42",
                DEVICE_RPC_RESPONSE_TOPIC
            ),
            Some("42")
        );
        // Tokens are opaque, non-numeric ones pass through untouched
        assert_eq!(
            token_from(
                "v1/devices/me/attributes/request/abc-7",
                DEVICE_ATTRIBUTES_REQUEST_TOPIC_PREFIX
            ),
            Some("abc-7")
        );
        // Missing or multi-level remainders are rejected
        assert_eq!(
            token_from("v1/devices/me/rpc/response/", DEVICE_RPC_RESPONSE_TOPIC),
            None
        );
        assert_eq!(
            token_from(
                "v1/devices/me/rpc/response/42/x",
                DEVICE_RPC_RESPONSE_TOPIC
            ),
            None
        );
        assert_eq!(
            token_from(DEVICE_TELEMETRY_TOPIC, DEVICE_RPC_RESPONSE_TOPIC),
            None
        );
    }

    #[test]
    fn test_recognize_device_topics() {
        assert_eq!(
            DeviceTopic::recognize(DEVICE_TELEMETRY_TOPIC),
            Some(DeviceTopic::Telemetry)
        );
        assert_eq!(
            DeviceTopic::recognize(DEVICE_ATTRIBUTES_TOPIC),
            Some(DeviceTopic::AttributesUpdate)
        );
        assert_eq!(
            DeviceTopic::recognize("v1/devices/me/attributes/request/5"),
            Some(DeviceTopic::AttributesRequest {
                token: "5".to_string()
            })
        );
        assert_eq!(
            DeviceTopic::recognize("v1/devices/me/rpc/response/42"),
            Some(DeviceTopic::RpcResponse {
                token: "42".to_string()
            })
        );
        assert_eq!(DeviceTopic::recognize("v1/devices/me/unknown"), None);
        assert_eq!(DeviceTopic::recognize(GATEWAY_TELEMETRY_TOPIC), None);
    }

    #[test]
    fn test_recognize_gateway_topics() {
        assert_eq!(
            GatewayTopic::recognize(GATEWAY_CONNECT_TOPIC),
            Some(GatewayTopic::Connect)
        );
        assert_eq!(
            GatewayTopic::recognize(GATEWAY_ATTRIBUTES_RESPONSE_TOPIC),
            None,
            "the response topic is server-published, never an inbound publish"
        );
        // Gateway topics carry no token suffix
        assert_eq!(GatewayTopic::recognize("v1/gateway/rpc/42"), None);
    }
}
