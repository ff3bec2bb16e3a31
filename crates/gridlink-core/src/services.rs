//! Collaborator service interfaces
//!
//! The transport depends on these services but does not implement them.
//! Every implementation must be safe for concurrent invocation from many
//! connections at once; the transport holds no lock around any call.

use async_trait::async_trait;

use crate::adaptor::DeviceMessage;

/// Credentials presented by a connecting device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCredentials {
    /// MQTT username/password login (password may be absent)
    Basic {
        client_id: String,
        username: Option<String>,
        password: Option<String>,
    },
    /// Strong authentication via the TLS client certificate
    X509 { certificate_der: Vec<u8> },
}

/// Resolved identity of an authorized device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub device_id: String,
    pub device_name: String,
}

/// Authentication verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Authorized(DeviceIdentity),
    Denied(String),
}

/// Validates device credentials
#[async_trait]
pub trait DeviceAuthService: Send + Sync {
    async fn authenticate(&self, credentials: &DeviceCredentials) -> AuthOutcome;
}

/// A decoded protocol event delivered to the platform
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Device session established
    Connected { device: DeviceIdentity },
    /// Decoded inbound message from an established session
    Message {
        device: DeviceIdentity,
        message: DeviceMessage,
    },
    /// Device session torn down (peer disconnect, violation, shutdown)
    Disconnected { device: DeviceIdentity },
}

/// Accepts decoded protocol events; delivery is asynchronous and returns
/// nothing to the caller
#[async_trait]
pub trait SessionEventSink: Send + Sync {
    async fn accept(&self, event: SessionEvent);
}

/// Read-only relation graph lookups
#[async_trait]
pub trait RelationService: Send + Sync {
    /// Entities directly related to the given device
    async fn related_entities(&self, device_id: &str) -> Vec<String>;
}

/// Per-host request-rate quota enforcement
#[async_trait]
pub trait QuotaService: Send + Sync {
    /// Whether the host has exhausted its request quota
    async fn is_quota_exceeded(&self, host: &str) -> bool;
}

/// The full collaborator bundle handed to every session handler.
///
/// Every field is required; "disabled" behavior is expressed with an
/// explicit no-op implementation, never a missing reference.
#[derive(Clone)]
pub struct Collaborators {
    pub event_sink: std::sync::Arc<dyn SessionEventSink>,
    pub auth: std::sync::Arc<dyn DeviceAuthService>,
    pub relations: std::sync::Arc<dyn RelationService>,
    pub quota: std::sync::Arc<dyn QuotaService>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
