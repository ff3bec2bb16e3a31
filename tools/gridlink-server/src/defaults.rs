//! Default collaborator implementations
//!
//! Explicit no-op services standing in for the platform: every
//! collaborator slot is filled, never left empty. Production deployments
//! replace these with real implementations.

use async_trait::async_trait;
use tracing::info;

use gridlink_core::{
    AuthOutcome, DeviceAuthService, DeviceCredentials, DeviceIdentity, QuotaService,
    RelationService, SessionEvent, SessionEventSink,
};

/// Logs every decoded protocol event instead of forwarding it anywhere
pub struct LoggingEventSink;

#[async_trait]
impl SessionEventSink for LoggingEventSink {
    async fn accept(&self, event: SessionEvent) {
        match &event {
            SessionEvent::Connected { device } => {
                info!(device = %device.device_name, "Device connected");
            }
            SessionEvent::Message { device, message } => {
                info!(device = %device.device_name, "Device message: {message:?}");
            }
            SessionEvent::Disconnected { device } => {
                info!(device = %device.device_name, "Device disconnected");
            }
        }
    }
}

/// Authorizes every device, deriving the identity from its credentials
pub struct AcceptAllAuth;

#[async_trait]
impl DeviceAuthService for AcceptAllAuth {
    async fn authenticate(&self, credentials: &DeviceCredentials) -> AuthOutcome {
        let identity = match credentials {
            DeviceCredentials::Basic {
                client_id,
                username,
                ..
            } => DeviceIdentity {
                device_id: client_id.clone(),
                device_name: username.clone().unwrap_or_else(|| client_id.clone()),
            },
            DeviceCredentials::X509 { .. } => DeviceIdentity {
                device_id: "x509-client".to_string(),
                device_name: "x509-client".to_string(),
            },
        };
        AuthOutcome::Authorized(identity)
    }
}

/// Empty relation graph
pub struct NoRelations;

#[async_trait]
impl RelationService for NoRelations {
    async fn related_entities(&self, _device_id: &str) -> Vec<String> {
        Vec::new()
    }
}

/// Never rejects a host
pub struct UnlimitedQuota;

#[async_trait]
impl QuotaService for UnlimitedQuota {
    async fn is_quota_exceeded(&self, _host: &str) -> bool {
        false
    }
}
