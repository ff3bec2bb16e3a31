//! Error types for Gridlink core contracts

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core contract error types
#[derive(Error, Debug)]
pub enum Error {
    /// No adaptor registered under the requested name
    #[error("unknown adaptor: {0}")]
    UnknownAdaptor(String),

    /// Inbound payload could not be decoded by the adaptor
    #[error("payload decode error on {topic}: {reason}")]
    PayloadDecode { topic: String, reason: String },

    /// Outbound message could not be encoded by the adaptor
    #[error("payload encode error: {0}")]
    PayloadEncode(String),

    /// Publish arrived on a topic outside the device/gateway namespace
    #[error("unrecognized topic: {0}")]
    UnrecognizedTopic(String),

    /// Device was denied by the authentication collaborator
    #[error("authentication denied: {0}")]
    AuthDenied(String),

    /// Host was rejected by the quota collaborator
    #[error("quota exceeded for host: {0}")]
    QuotaExceeded(String),
}
