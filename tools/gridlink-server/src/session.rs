//! Device session handler
//!
//! The terminal pipeline stage for the standalone server. Authenticates on
//! CONNECT (quota first, then credentials), routes publishes through the
//! payload adaptor to the event sink, acknowledges subscriptions within the
//! device/gateway namespace, and answers PINGREQ. Session resources are
//! released through the connection-close hook.

use async_trait::async_trait;
use mqttbytes::v4::{ConnAck, ConnectReturnCode, Packet, PubAck, SubAck, SubscribeReasonCode, UnsubAck};
use mqttbytes::QoS;
use std::sync::Arc;
use tracing::{debug, warn};

use gridlink_core::{
    topics, AuthOutcome, DeviceCredentials, DeviceIdentity, SessionEvent,
};
use gridlink_transport::{
    ConnectionContext, Result, SessionHandler, SessionHandlerFactory, TransportError,
};

/// Subscription filters a device session may hold
const ALLOWED_FILTERS: &[&str] = &[
    topics::DEVICE_ATTRIBUTES_TOPIC,
    topics::DEVICE_ATTRIBUTES_RESPONSES_TOPIC,
    topics::DEVICE_RPC_REQUESTS_SUB_TOPIC,
    topics::GATEWAY_ATTRIBUTES_TOPIC,
    topics::GATEWAY_ATTRIBUTES_RESPONSE_TOPIC,
    topics::GATEWAY_RPC_TOPIC,
];

pub struct DeviceSession {
    ctx: ConnectionContext,
    device: Option<DeviceIdentity>,
    subscriptions: Vec<String>,
}

impl DeviceSession {
    fn new(ctx: ConnectionContext) -> Self {
        Self {
            ctx,
            device: None,
            subscriptions: Vec::new(),
        }
    }

    async fn handle_connect(&mut self, connect: mqttbytes::v4::Connect) -> Result<()> {
        let host = self.ctx.peer_addr.ip().to_string();
        if self.ctx.collaborators.quota.is_quota_exceeded(&host).await {
            warn!(host = %host, "Connection rejected by quota service");
            self.send_connack(ConnectReturnCode::ServiceUnavailable).await?;
            return Err(gridlink_core::Error::QuotaExceeded(host).into());
        }

        // Strong authentication uses the TLS peer certificate when the
        // security stage surfaced one; otherwise the MQTT login
        let credentials = match self
            .ctx
            .peer_identity
            .as_ref()
            .and_then(|identity| identity.leaf())
        {
            Some(leaf) => DeviceCredentials::X509 {
                certificate_der: leaf.to_vec(),
            },
            None => DeviceCredentials::Basic {
                client_id: connect.client_id.clone(),
                username: connect.login.as_ref().map(|l| l.username.clone()),
                password: connect.login.as_ref().map(|l| l.password.clone()),
            },
        };

        match self.ctx.collaborators.auth.authenticate(&credentials).await {
            AuthOutcome::Authorized(identity) => {
                self.send_connack(ConnectReturnCode::Success).await?;
                self.ctx
                    .collaborators
                    .event_sink
                    .accept(SessionEvent::Connected {
                        device: identity.clone(),
                    })
                    .await;
                self.device = Some(identity);
                Ok(())
            }
            AuthOutcome::Denied(reason) => {
                warn!(client_id = %connect.client_id, "Authentication denied: {reason}");
                self.send_connack(ConnectReturnCode::NotAuthorized).await?;
                Err(gridlink_core::Error::AuthDenied(reason).into())
            }
        }
    }

    async fn send_connack(&self, code: ConnectReturnCode) -> Result<()> {
        self.ctx
            .outbound
            .send(Packet::ConnAck(ConnAck {
                session_present: false,
                code,
            }))
            .await
    }

    async fn handle_publish(&mut self, publish: mqttbytes::v4::Publish) -> Result<()> {
        let device = match &self.device {
            Some(device) => device.clone(),
            None => {
                warn!("PUBLISH before CONNECT");
                return Err(TransportError::ConnectionClosed);
            }
        };

        if publish.qos == QoS::AtLeastOnce {
            self.ctx
                .outbound
                .send(Packet::PubAck(PubAck { pkid: publish.pkid }))
                .await?;
        }

        let message = self
            .ctx
            .adaptor
            .decode_publish(&publish.topic, &publish.payload)?;
        self.ctx
            .collaborators
            .event_sink
            .accept(SessionEvent::Message { device, message })
            .await;
        Ok(())
    }

    async fn handle_subscribe(&mut self, subscribe: mqttbytes::v4::Subscribe) -> Result<()> {
        let mut return_codes = Vec::with_capacity(subscribe.filters.len());
        for filter in &subscribe.filters {
            if ALLOWED_FILTERS.contains(&filter.path.as_str()) {
                debug!(filter = %filter.path, "Subscription accepted");
                self.subscriptions.push(filter.path.clone());
                return_codes.push(SubscribeReasonCode::Success(filter.qos));
            } else {
                warn!(filter = %filter.path, "Subscription outside the namespace");
                return_codes.push(SubscribeReasonCode::Failure);
            }
        }
        self.ctx
            .outbound
            .send(Packet::SubAck(SubAck {
                pkid: subscribe.pkid,
                return_codes,
            }))
            .await
    }
}

#[async_trait]
impl SessionHandler for DeviceSession {
    async fn handle_packet(&mut self, packet: Packet) -> Result<()> {
        match packet {
            Packet::Connect(connect) => self.handle_connect(connect).await,
            Packet::Publish(publish) => self.handle_publish(publish).await,
            Packet::Subscribe(subscribe) => self.handle_subscribe(subscribe).await,
            Packet::Unsubscribe(unsubscribe) => {
                self.subscriptions
                    .retain(|filter| !unsubscribe.topics.contains(filter));
                self.ctx
                    .outbound
                    .send(Packet::UnsubAck(UnsubAck {
                        pkid: unsubscribe.pkid,
                    }))
                    .await
            }
            Packet::PingReq => self.ctx.outbound.send(Packet::PingResp).await,
            Packet::Disconnect => Ok(()),
            other => {
                debug!("Ignoring packet: {other:?}");
                Ok(())
            }
        }
    }

    fn on_connection_closed(&mut self) {
        self.subscriptions.clear();
        if let Some(device) = self.device.take() {
            let sink = Arc::clone(&self.ctx.collaborators.event_sink);
            // Fires from the processing pool; during pool teardown the
            // runtime may already be gone, in which case there is no one
            // left to deliver to
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    sink.accept(SessionEvent::Disconnected { device }).await;
                });
            }
        }
    }
}

/// One [`DeviceSession`] per accepted connection
pub struct DeviceSessionFactory;

impl SessionHandlerFactory for DeviceSessionFactory {
    fn create(&self, ctx: ConnectionContext) -> Box<dyn SessionHandler> {
        Box::new(DeviceSession::new(ctx))
    }
}
