//! Transport error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("bind failed on {addr}: {reason}")]
    BindFailed { addr: String, reason: String },

    #[error("tls error: {0}")]
    Tls(String),

    #[error("frame exceeds maximum payload size: {size} > {limit}")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("malformed frame: {0:?}")]
    MalformedFrame(mqttbytes::Error),

    #[error("encode error: {0:?}")]
    Encode(mqttbytes::Error),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("transport already started")]
    AlreadyStarted,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("core error: {0}")]
    Core(#[from] gridlink_core::Error),
}
