//! Gridlink Core
//!
//! Shared contracts for the Gridlink MQTT transport:
//! - The device and gateway topic namespace ([`topics`])
//! - Payload format adaptors and their registry ([`adaptor`])
//! - Collaborator service interfaces the transport depends on but does not
//!   implement ([`services`])
//!
//! The transport itself (socket lifecycle, pipeline assembly) lives in
//! `gridlink-transport`; this crate is dependency-light so collaborator
//! implementations can link against it without pulling in tokio.

pub mod adaptor;
pub mod error;
pub mod services;
pub mod topics;

pub use adaptor::{AdaptorRegistry, DeviceMessage, JsonAdaptor, ServerMessage, TransportAdaptor};
pub use error::{Error, Result};
pub use services::{
    AuthOutcome, Collaborators, DeviceCredentials, DeviceIdentity, DeviceAuthService,
    QuotaService, RelationService, SessionEvent, SessionEventSink,
};

/// Default MQTT listener port
pub const DEFAULT_MQTT_PORT: u16 = 1883;
