//! Payload format adaptors
//!
//! An adaptor translates between the device-facing wire payload format and
//! the internal message representation handed to collaborators. Adaptors
//! are resolved once at transport startup through an explicit name
//! registry, a closed enumeration rather than an open runtime lookup.

use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::topics::{self, DeviceTopic, GatewayTopic};

/// A decoded inbound publish, addressed by the topic namespace
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceMessage {
    /// Telemetry upload from a directly connected device
    Telemetry { values: Value },
    /// Client-side attribute update
    AttributesUpdate { values: Value },
    /// Attribute read request; the device picked the token and is expected
    /// to already hold the matching response subscription
    AttributesRequest {
        token: String,
        client_keys: Vec<String>,
        shared_keys: Vec<String>,
    },
    /// Device reply to a server-pushed RPC request, same token
    RpcResponse { token: String, payload: Value },
    /// Gateway announces a logical device
    GatewayConnect { device: String },
    /// Gateway retires a logical device
    GatewayDisconnect { device: String },
    /// Aggregated telemetry, keyed by logical device in the payload
    GatewayTelemetry { payload: Value },
    /// Aggregated attribute updates
    GatewayAttributes { payload: Value },
    /// Gateway-side RPC exchange
    GatewayRpc { payload: Value },
    /// Gateway attribute request (token travels inside the payload)
    GatewayAttributesRequest { payload: Value },
}

/// A server-originated message to be published back to the device
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Reply to an attribute request, carrying the requester's token
    AttributesResponse { token: String, values: Value },
    /// Pushed shared-attribute update
    AttributesNotification { values: Value },
    /// Server-assigned-token RPC request pushed to the device
    RpcRequest {
        token: String,
        method: String,
        params: Value,
    },
    /// Gateway attribute response (addressing happens in the payload)
    GatewayAttributesResponse { payload: Value },
}

/// Translates wire payloads to and from the internal representation.
///
/// One instance is resolved at startup and shared read-only across all
/// connections, so implementations must be stateless or internally
/// synchronized.
pub trait TransportAdaptor: std::fmt::Debug + Send + Sync {
    /// Decode an inbound publish into a typed message
    fn decode_publish(&self, topic: &str, payload: &[u8]) -> Result<DeviceMessage>;

    /// Encode an outbound message into its topic and payload bytes
    fn encode_server(&self, msg: &ServerMessage) -> Result<(String, Bytes)>;
}

/// JSON payload adaptor, the platform default
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonAdaptor;

impl JsonAdaptor {
    fn parse(&self, topic: &str, payload: &[u8]) -> Result<Value> {
        serde_json::from_slice(payload).map_err(|e| Error::PayloadDecode {
            topic: topic.to_string(),
            reason: e.to_string(),
        })
    }

    /// Attribute requests list keys as comma-separated strings:
    /// `{"clientKeys":"a,b","sharedKeys":"c"}`
    fn keys(value: &Value, field: &str) -> Vec<String> {
        value
            .get(field)
            .and_then(Value::as_str)
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn device_field(topic: &str, value: &Value) -> Result<String> {
        value
            .get("device")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::PayloadDecode {
                topic: topic.to_string(),
                reason: "missing \"device\" field".to_string(),
            })
    }
}

impl TransportAdaptor for JsonAdaptor {
    fn decode_publish(&self, topic: &str, payload: &[u8]) -> Result<DeviceMessage> {
        if let Some(device_topic) = DeviceTopic::recognize(topic) {
            let value = self.parse(topic, payload)?;
            return Ok(match device_topic {
                DeviceTopic::Telemetry => DeviceMessage::Telemetry { values: value },
                DeviceTopic::AttributesUpdate => DeviceMessage::AttributesUpdate { values: value },
                DeviceTopic::AttributesRequest { token } => DeviceMessage::AttributesRequest {
                    token,
                    client_keys: Self::keys(&value, "clientKeys"),
                    shared_keys: Self::keys(&value, "sharedKeys"),
                },
                DeviceTopic::RpcResponse { token } => DeviceMessage::RpcResponse {
                    token,
                    payload: value,
                },
            });
        }

        if let Some(gateway_topic) = GatewayTopic::recognize(topic) {
            let value = self.parse(topic, payload)?;
            return Ok(match gateway_topic {
                GatewayTopic::Connect => DeviceMessage::GatewayConnect {
                    device: Self::device_field(topic, &value)?,
                },
                GatewayTopic::Disconnect => DeviceMessage::GatewayDisconnect {
                    device: Self::device_field(topic, &value)?,
                },
                GatewayTopic::Attributes => DeviceMessage::GatewayAttributes { payload: value },
                GatewayTopic::Telemetry => DeviceMessage::GatewayTelemetry { payload: value },
                GatewayTopic::Rpc => DeviceMessage::GatewayRpc { payload: value },
                GatewayTopic::AttributesRequest => {
                    DeviceMessage::GatewayAttributesRequest { payload: value }
                }
            });
        }

        Err(Error::UnrecognizedTopic(topic.to_string()))
    }

    fn encode_server(&self, msg: &ServerMessage) -> Result<(String, Bytes)> {
        let (topic, body) = match msg {
            ServerMessage::AttributesResponse { token, values } => (
                topics::device_attributes_response_topic(token),
                values.clone(),
            ),
            ServerMessage::AttributesNotification { values } => {
                (topics::DEVICE_ATTRIBUTES_TOPIC.to_string(), values.clone())
            }
            ServerMessage::RpcRequest {
                token,
                method,
                params,
            } => (
                topics::device_rpc_request_topic(token),
                serde_json::json!({ "method": method, "params": params }),
            ),
            ServerMessage::GatewayAttributesResponse { payload } => (
                topics::GATEWAY_ATTRIBUTES_RESPONSE_TOPIC.to_string(),
                payload.clone(),
            ),
        };

        let bytes = serde_json::to_vec(&body).map_err(|e| Error::PayloadEncode(e.to_string()))?;
        Ok((topic, Bytes::from(bytes)))
    }
}

/// Explicit adaptor registry, validated eagerly at transport startup
pub struct AdaptorRegistry {
    adaptors: HashMap<String, Arc<dyn TransportAdaptor>>,
}

impl AdaptorRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self {
            adaptors: HashMap::new(),
        }
    }

    /// Registry pre-populated with the built-in adaptors
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("json", Arc::new(JsonAdaptor));
        registry
    }

    /// Register an adaptor under a configuration name
    pub fn register(&mut self, name: impl Into<String>, adaptor: Arc<dyn TransportAdaptor>) {
        self.adaptors.insert(name.into(), adaptor);
    }

    /// Resolve by configured name; unknown names are configuration errors
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn TransportAdaptor>> {
        self.adaptors
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownAdaptor(name.to_string()))
    }

    /// Registered adaptor names
    pub fn names(&self) -> Vec<&str> {
        self.adaptors.keys().map(String::as_str).collect()
    }
}

impl Default for AdaptorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
