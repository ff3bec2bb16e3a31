//! MQTT framing stages
//!
//! The decoder is stateful and owned by a single connection; the encoder is
//! stateless and shared across every connection. Wire-level packet layout
//! is delegated to `mqttbytes`.

use bytes::{Bytes, BytesMut};
use mqttbytes::v4::{self, Packet};

use crate::error::{Result, TransportError};

/// Initial capacity of the per-connection read buffer
const READ_BUFFER_CAPACITY: usize = 4096;

/// Inbound frame decoder bounded by the configured payload ceiling.
///
/// The ceiling applies to a frame's remaining length (variable header plus
/// payload). A frame at exactly the ceiling is accepted; anything larger is
/// a protocol violation reported before the full frame has even arrived,
/// and the connection owning this decoder must be closed.
pub struct FrameDecoder {
    buffer: BytesMut,
    max_payload_size: usize,
}

impl FrameDecoder {
    pub fn new(max_payload_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
            max_payload_size,
        }
    }

    /// Accumulation buffer for the socket read side
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Decode the next complete frame, if one has fully arrived.
    ///
    /// `Ok(None)` means more bytes are needed. Every error is fatal for the
    /// connection: either the frame exceeds the ceiling or it is malformed.
    pub fn decode(&mut self) -> Result<Option<Packet>> {
        match v4::read(&mut self.buffer, self.max_payload_size) {
            Ok(packet) => Ok(Some(packet)),
            Err(mqttbytes::Error::InsufficientBytes(_)) => Ok(None),
            Err(mqttbytes::Error::PayloadSizeLimitExceeded(size)) => {
                Err(TransportError::PayloadTooLarge {
                    size,
                    limit: self.max_payload_size,
                })
            }
            Err(e) => Err(TransportError::MalformedFrame(e)),
        }
    }
}

/// Outbound frame encoder, stateless and shared across connections
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameEncoder;

impl FrameEncoder {
    pub fn encode(&self, packet: &Packet) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        let written = match packet {
            Packet::Connect(p) => p.write(&mut buf),
            Packet::ConnAck(p) => p.write(&mut buf),
            Packet::Publish(p) => p.write(&mut buf),
            Packet::PubAck(p) => p.write(&mut buf),
            Packet::PubRec(p) => p.write(&mut buf),
            Packet::PubRel(p) => p.write(&mut buf),
            Packet::PubComp(p) => p.write(&mut buf),
            Packet::Subscribe(p) => p.write(&mut buf),
            Packet::SubAck(p) => p.write(&mut buf),
            Packet::Unsubscribe(p) => p.write(&mut buf),
            Packet::UnsubAck(p) => p.write(&mut buf),
            Packet::PingReq => v4::PingReq.write(&mut buf),
            Packet::PingResp => v4::PingResp.write(&mut buf),
            Packet::Disconnect => v4::Disconnect.write(&mut buf),
        };
        written.map_err(TransportError::Encode)?;
        Ok(buf.freeze())
    }
}
