//! Gridlink MQTT Transport
//!
//! Connection admission and pipeline assembly for the device-connectivity
//! platform:
//! - Listening-socket lifecycle with ordered startup and shutdown
//!   ([`service::TransportService`])
//! - Per-connection processing pipeline: optional TLS termination, MQTT
//!   framing bounded by a payload ceiling, and the protocol session handler
//!   hookup ([`pipeline`])
//! - Two dedicated worker pools: a small accepting pool that only admits
//!   connections, and a processing pool that owns every pipeline for its
//!   whole lifetime
//!
//! Packet semantics, authentication, persistence and quota accounting are
//! collaborator concerns injected through `gridlink-core`.

pub mod codec;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod service;
pub mod tls;

pub use codec::{FrameDecoder, FrameEncoder};
pub use config::{MemoryDiagnostics, SecurityConfig, TransportConfig};
pub use error::{Result, TransportError};
pub use pipeline::{
    ConnectionContext, OutboundSender, PipelineBuilder, PipelinePlan, SessionHandler,
    SessionHandlerFactory, StageKind,
};
pub use service::{Phase, TransportService};
pub use tls::PeerIdentity;
