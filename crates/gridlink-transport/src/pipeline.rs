//! Per-connection pipeline assembly
//!
//! Every accepted connection gets an ordered, immutable chain of stages:
//! optional TLS termination, the bounded frame decoder, the shared frame
//! encoder, and the protocol session handler. The builder only wires the
//! stages together; no business logic runs during assembly. Whatever ends
//! a connection (peer disconnect, protocol violation, server shutdown),
//! the session handler's close hook fires exactly once.

use async_trait::async_trait;
use bytes::Bytes;
use mqttbytes::v4::Packet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, warn};

use gridlink_core::{Collaborators, TransportAdaptor};

use crate::codec::{FrameDecoder, FrameEncoder};
use crate::error::{Result, TransportError};
use crate::tls::{self, PeerIdentity};

/// Outbound packet queue depth per connection
const OUTBOUND_QUEUE_DEPTH: usize = 100;

/// One unit in the ordered per-connection processing chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    /// TLS termination (present iff security is configured)
    Tls,
    /// Inbound frame decoder bounded by the payload ceiling
    FrameDecoder,
    /// Outbound frame encoder, shared across connections
    FrameEncoder,
    /// Stateful protocol session handler, one per connection
    SessionHandler,
}

/// The ordered stage list a connection will be assembled from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelinePlan {
    stages: Vec<StageKind>,
}

impl PipelinePlan {
    /// Derive the stage order from whether TLS is configured
    pub fn new(secured: bool) -> Self {
        let mut stages = Vec::with_capacity(4);
        if secured {
            stages.push(StageKind::Tls);
        }
        stages.push(StageKind::FrameDecoder);
        stages.push(StageKind::FrameEncoder);
        stages.push(StageKind::SessionHandler);
        Self { stages }
    }

    pub fn stages(&self) -> &[StageKind] {
        &self.stages
    }

    /// The stage inbound bytes hit first
    pub fn first(&self) -> StageKind {
        self.stages[0]
    }
}

/// Handle for queueing server-to-device packets on one connection
#[derive(Clone)]
pub struct OutboundSender {
    tx: mpsc::Sender<Packet>,
}

impl OutboundSender {
    pub async fn send(&self, packet: Packet) -> Result<()> {
        self.tx
            .send(packet)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

}

/// Everything a session handler learns about its connection at assembly
/// time
#[derive(Clone)]
pub struct ConnectionContext {
    /// Remote socket address
    pub peer_addr: SocketAddr,
    /// Certificate identity when the security stage is present and the
    /// peer presented a chain
    pub peer_identity: Option<PeerIdentity>,
    /// The shared payload adaptor resolved at startup
    pub adaptor: Arc<dyn TransportAdaptor>,
    /// Injected collaborator services
    pub collaborators: Collaborators,
    /// Queue for packets published back to this device
    pub outbound: OutboundSender,
}

/// Terminal pipeline stage: owns all per-connection session state from
/// installation until the connection closes
#[async_trait]
pub trait SessionHandler: Send {
    /// Handle one decoded frame. Frames arrive strictly in wire order; an
    /// error closes the connection.
    async fn handle_packet(&mut self, packet: Packet) -> Result<()>;

    /// Invoked exactly once when the underlying connection closes for any
    /// reason, to release session resources
    fn on_connection_closed(&mut self);
}

/// Creates the one session handler instance per accepted connection
pub trait SessionHandlerFactory: Send + Sync {
    fn create(&self, ctx: ConnectionContext) -> Box<dyn SessionHandler>;
}

/// Wraps the session handler with the exactly-once close notification
pub(crate) struct SessionStage {
    handler: Box<dyn SessionHandler>,
    closed: bool,
}

impl SessionStage {
    fn new(handler: Box<dyn SessionHandler>) -> Self {
        Self {
            handler,
            closed: false,
        }
    }

    async fn handle(&mut self, packet: Packet) -> Result<()> {
        self.handler.handle_packet(packet).await
    }

    fn notify_closed(&mut self) {
        if !self.closed {
            self.closed = true;
            self.handler.on_connection_closed();
        }
    }
}

impl Drop for SessionStage {
    // Backstop so the close hook also fires if the connection task is
    // dropped mid-flight during pool shutdown
    fn drop(&mut self) {
        self.notify_closed();
    }
}

/// Per-connection factory: assembles the ordered stage chain around an
/// accepted socket
pub struct PipelineBuilder {
    plan: PipelinePlan,
    tls: Option<TlsAcceptor>,
    max_payload_size: usize,
    encoder: Arc<FrameEncoder>,
    adaptor: Arc<dyn TransportAdaptor>,
    collaborators: Collaborators,
    factory: Arc<dyn SessionHandlerFactory>,
    shutdown: watch::Receiver<bool>,
}

impl PipelineBuilder {
    pub fn new(
        tls: Option<TlsAcceptor>,
        max_payload_size: usize,
        adaptor: Arc<dyn TransportAdaptor>,
        collaborators: Collaborators,
        factory: Arc<dyn SessionHandlerFactory>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            plan: PipelinePlan::new(tls.is_some()),
            tls,
            max_payload_size,
            encoder: Arc::new(FrameEncoder),
            adaptor,
            collaborators,
            factory,
            shutdown,
        }
    }

    pub fn plan(&self) -> &PipelinePlan {
        &self.plan
    }

    /// Assemble the pipeline for one accepted socket.
    ///
    /// When TLS is configured the handshake completes here, so every later
    /// stage only ever observes plaintext. The session handler is created
    /// last and registered as the connection-close observer.
    pub async fn assemble(
        &self,
        socket: TcpStream,
        peer_addr: SocketAddr,
    ) -> Result<ConnectionPipeline> {
        let (stream, peer_identity) = match &self.tls {
            Some(acceptor) => {
                let tls_stream = acceptor
                    .accept(socket)
                    .await
                    .map_err(|e| TransportError::Tls(format!("handshake with {peer_addr}: {e}")))?;
                let identity = tls::peer_identity(&tls_stream);
                (PipelineStream::Secured(Box::new(tls_stream)), identity)
            }
            None => (PipelineStream::Plain(socket), None),
        };

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);

        let handler = self.factory.create(ConnectionContext {
            peer_addr,
            peer_identity,
            adaptor: Arc::clone(&self.adaptor),
            collaborators: self.collaborators.clone(),
            outbound: OutboundSender { tx: outbound_tx },
        });

        Ok(ConnectionPipeline {
            stream,
            decoder: FrameDecoder::new(self.max_payload_size),
            encoder: Arc::clone(&self.encoder),
            session: SessionStage::new(handler),
            outbound_rx,
            peer_addr,
            shutdown: self.shutdown.clone(),
        })
    }
}

enum PipelineStream {
    Plain(TcpStream),
    Secured(Box<tokio_rustls::server::TlsStream<TcpStream>>),
}

/// A fully assembled connection: immutable stage chain plus the event loop
/// driving it
pub struct ConnectionPipeline {
    stream: PipelineStream,
    decoder: FrameDecoder,
    encoder: Arc<FrameEncoder>,
    session: SessionStage,
    outbound_rx: mpsc::Receiver<Packet>,
    peer_addr: SocketAddr,
    shutdown: watch::Receiver<bool>,
}

impl ConnectionPipeline {
    /// Drive the pipeline until the connection ends, then fire the close
    /// notification
    pub async fn run(self) {
        let ConnectionPipeline {
            stream,
            decoder,
            encoder,
            mut session,
            outbound_rx,
            peer_addr,
            shutdown,
        } = self;

        let result = match stream {
            PipelineStream::Plain(s) => {
                drive(s, decoder, encoder, &mut session, outbound_rx, peer_addr, shutdown).await
            }
            PipelineStream::Secured(s) => {
                drive(*s, decoder, encoder, &mut session, outbound_rx, peer_addr, shutdown).await
            }
        };

        if let Err(e) = result {
            warn!(peer = %peer_addr, "Connection ended with error: {e}");
        }
        session.notify_closed();
    }
}

/// The per-connection event loop. Inbound frames pass through the decoder
/// and the session handler strictly in arrival order; outbound packets are
/// encoded and written as they are queued.
async fn drive<S>(
    mut stream: S,
    mut decoder: FrameDecoder,
    encoder: Arc<FrameEncoder>,
    session: &mut SessionStage,
    mut outbound_rx: mpsc::Receiver<Packet>,
    peer_addr: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!(peer = %peer_addr, "Connection closing for server shutdown");
                return Ok(());
            }

            Some(packet) = outbound_rx.recv() => {
                let frame: Bytes = encoder.encode(&packet)?;
                stream.write_all(&frame).await?;
            }

            read = stream.read_buf(decoder.buffer_mut()) => {
                match read {
                    Ok(0) => {
                        debug!(peer = %peer_addr, "Peer disconnected");
                        return Ok(());
                    }
                    Ok(_) => {
                        // Drain every complete frame in arrival order
                        loop {
                            match decoder.decode() {
                                Ok(Some(packet)) => {
                                    let disconnect = matches!(packet, Packet::Disconnect);
                                    if let Err(e) = session.handle(packet).await {
                                        flush_outbound(&mut stream, &encoder, &mut outbound_rx).await;
                                        return Err(e);
                                    }
                                    if disconnect {
                                        debug!(peer = %peer_addr, "Peer sent DISCONNECT");
                                        return Ok(());
                                    }
                                }
                                Ok(None) => break,
                                Err(e) => return Err(e),
                            }
                        }
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }
}

/// Write out replies the handler already queued (e.g. a CONNACK carrying a
/// refusal code) before the connection is torn down. Best effort.
async fn flush_outbound<S>(
    stream: &mut S,
    encoder: &FrameEncoder,
    outbound_rx: &mut mpsc::Receiver<Packet>,
) where
    S: AsyncWrite + Unpin + Send,
{
    while let Ok(packet) = outbound_rx.try_recv() {
        let Ok(frame) = encoder.encode(&packet) else {
            return;
        };
        if stream.write_all(&frame).await.is_err() {
            return;
        }
    }
    let _ = stream.flush().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridlink_core::{
        AuthOutcome, DeviceAuthService, DeviceCredentials, JsonAdaptor, QuotaService,
        RelationService, SessionEvent, SessionEventSink,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoopSink;

    #[async_trait]
    impl SessionEventSink for NoopSink {
        async fn accept(&self, _event: SessionEvent) {}
    }

    struct AcceptAll;

    #[async_trait]
    impl DeviceAuthService for AcceptAll {
        async fn authenticate(&self, _credentials: &DeviceCredentials) -> AuthOutcome {
            AuthOutcome::Authorized(gridlink_core::DeviceIdentity {
                device_id: "test".to_string(),
                device_name: "test".to_string(),
            })
        }
    }

    struct NoRelations;

    #[async_trait]
    impl RelationService for NoRelations {
        async fn related_entities(&self, _device_id: &str) -> Vec<String> {
            Vec::new()
        }
    }

    struct Unlimited;

    #[async_trait]
    impl QuotaService for Unlimited {
        async fn is_quota_exceeded(&self, _host: &str) -> bool {
            false
        }
    }

    fn collaborators() -> Collaborators {
        Collaborators {
            event_sink: Arc::new(NoopSink),
            auth: Arc::new(AcceptAll),
            relations: Arc::new(NoRelations),
            quota: Arc::new(Unlimited),
        }
    }

    struct CountingHandler {
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SessionHandler for CountingHandler {
        async fn handle_packet(&mut self, _packet: Packet) -> Result<()> {
            Ok(())
        }

        fn on_connection_closed(&mut self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_plan_without_tls_starts_at_the_decoder() {
        let plan = PipelinePlan::new(false);
        assert_eq!(plan.first(), StageKind::FrameDecoder);
        assert_eq!(
            plan.stages(),
            &[
                StageKind::FrameDecoder,
                StageKind::FrameEncoder,
                StageKind::SessionHandler
            ]
        );
    }

    #[test]
    fn test_plan_with_tls_puts_security_first() {
        let plan = PipelinePlan::new(true);
        assert_eq!(plan.first(), StageKind::Tls);
        assert_eq!(
            plan.stages(),
            &[
                StageKind::Tls,
                StageKind::FrameDecoder,
                StageKind::FrameEncoder,
                StageKind::SessionHandler
            ]
        );
    }

    #[test]
    fn test_builder_plan_follows_tls_presence() {
        let (_tx, rx) = watch::channel(false);
        let builder = PipelineBuilder::new(
            None,
            65536,
            Arc::new(JsonAdaptor),
            collaborators(),
            Arc::new(CountingFactory {
                closes: Arc::new(AtomicUsize::new(0)),
            }),
            rx,
        );
        assert_eq!(builder.plan().first(), StageKind::FrameDecoder);
    }

    struct CountingFactory {
        closes: Arc<AtomicUsize>,
    }

    impl SessionHandlerFactory for CountingFactory {
        fn create(&self, _ctx: ConnectionContext) -> Box<dyn SessionHandler> {
            Box::new(CountingHandler {
                closes: Arc::clone(&self.closes),
            })
        }
    }

    #[tokio::test]
    async fn test_close_notification_fires_exactly_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut stage = SessionStage::new(Box::new(CountingHandler {
            closes: Arc::clone(&closes),
        }));

        stage.notify_closed();
        stage.notify_closed();
        drop(stage);

        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_drop_backstop_fires_the_close_hook() {
        let closes = Arc::new(AtomicUsize::new(0));
        let stage = SessionStage::new(Box::new(CountingHandler {
            closes: Arc::clone(&closes),
        }));

        drop(stage);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
