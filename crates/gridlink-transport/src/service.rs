//! Transport lifecycle manager
//!
//! Owns the listening socket and the two worker pools: a small accepting
//! pool that only admits connections, and a processing pool that runs
//! every connection's pipeline for its whole lifetime. The lifecycle is
//! one-way (`Uninitialized → Running → Stopped`); no restart-in-place.
//!
//! `start` and `stop` block the calling thread and must not be invoked
//! from inside an async runtime.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::runtime::{Builder as RuntimeBuilder, Handle, Runtime};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use gridlink_core::AdaptorRegistry;

use crate::config::{MemoryDiagnostics, TransportConfig};
use crate::error::{Result, TransportError};
use crate::pipeline::{PipelineBuilder, SessionHandlerFactory};
use crate::tls;

/// How long `stop` waits for the listener-close acknowledgement
const LISTENER_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Transport lifecycle phase, transitions are one-way
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Configuration loaded, nothing bound
    Uninitialized,
    /// Listening socket bound, both pools active
    Running,
    /// Listening socket closed, both pools drained
    Stopped,
}

/// The MQTT transport service: binds the listener, admits connections and
/// hands each one to the pipeline builder on the processing pool
pub struct TransportService {
    config: TransportConfig,
    registry: AdaptorRegistry,
    collaborators: gridlink_core::Collaborators,
    factory: Arc<dyn SessionHandlerFactory>,
    phase: Phase,
    diagnostics: Option<MemoryDiagnostics>,
    accept_pool: Option<Runtime>,
    worker_pool: Option<Runtime>,
    shutdown_tx: Option<watch::Sender<bool>>,
    listener_closed_rx: Option<std::sync::mpsc::Receiver<()>>,
    local_addr: Option<SocketAddr>,
}

impl TransportService {
    pub fn new(
        config: TransportConfig,
        registry: AdaptorRegistry,
        collaborators: gridlink_core::Collaborators,
        factory: Arc<dyn SessionHandlerFactory>,
    ) -> Self {
        Self {
            config,
            registry,
            collaborators,
            factory,
            phase: Phase::Uninitialized,
            diagnostics: None,
            accept_pool: None,
            worker_pool: None,
            shutdown_tx: None,
            listener_closed_rx: None,
            local_addr: None,
        }
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Bound listener address, available while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Memory-diagnostics level applied at startup
    pub fn diagnostics(&self) -> Option<MemoryDiagnostics> {
        self.diagnostics
    }

    /// Validate configuration, resolve the adaptor, create both pools and
    /// bind the listener.
    ///
    /// Any failure aborts startup with nothing left running: validation
    /// and adaptor resolution happen before any socket is bound, and a
    /// bind failure tears the freshly created pools back down.
    pub fn start(&mut self) -> Result<()> {
        if self.phase != Phase::Uninitialized {
            return Err(TransportError::AlreadyStarted);
        }

        let diagnostics = self.config.validate()?;
        info!(level = ?diagnostics, "Setting memory diagnostics level");
        self.diagnostics = Some(diagnostics);

        info!("Starting MQTT transport...");
        info!(adaptor = %self.config.adaptor, "Resolving transport adaptor");
        let adaptor = match self.registry.resolve(&self.config.adaptor) {
            Ok(adaptor) => adaptor,
            Err(e) => {
                error!(
                    adaptor = %self.config.adaptor,
                    registered = ?self.registry.names(),
                    "No adaptor registered under the configured name"
                );
                return Err(e.into());
            }
        };

        let acceptor = match &self.config.security {
            crate::config::SecurityConfig::Plain => None,
            crate::config::SecurityConfig::Secured {
                cert_path,
                key_path,
            } => Some(tls::build_acceptor(cert_path, key_path)?),
        };

        info!(
            accept_threads = self.config.accept_pool_threads,
            worker_threads = self.config.worker_pool_threads,
            "Starting MQTT transport server"
        );
        let accept_pool = build_pool("gridlink-accept", self.config.accept_pool_threads)?;
        let worker_pool = match build_pool("gridlink-worker", self.config.worker_pool_threads) {
            Ok(pool) => pool,
            Err(e) => {
                accept_pool.shutdown_background();
                return Err(e);
            }
        };

        // Bind synchronously so startup fails here, not in a spawned task
        let addr = self.config.bind_addr();
        let listener = match bind_listener(&addr) {
            Ok(listener) => listener,
            Err(e) => {
                worker_pool.shutdown_background();
                accept_pool.shutdown_background();
                return Err(e);
            }
        };
        self.local_addr = listener.local_addr().ok();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (closed_tx, closed_rx) = std::sync::mpsc::channel();

        let builder = Arc::new(PipelineBuilder::new(
            acceptor,
            self.config.max_payload_size,
            adaptor,
            self.collaborators.clone(),
            Arc::clone(&self.factory),
            shutdown_rx.clone(),
        ));

        accept_pool.spawn(accept_loop(
            listener,
            builder,
            worker_pool.handle().clone(),
            shutdown_rx,
            closed_tx,
        ));

        self.accept_pool = Some(accept_pool);
        self.worker_pool = Some(worker_pool);
        self.shutdown_tx = Some(shutdown_tx);
        self.listener_closed_rx = Some(closed_rx);
        self.phase = Phase::Running;

        info!(addr = %addr, "MQTT transport started");
        Ok(())
    }

    /// Ordered shutdown: close the listening socket first so no new
    /// connections are admitted, then drain the processing pool, then the
    /// accepting pool. A no-op unless the service is running.
    pub fn stop(&mut self) {
        if self.phase != Phase::Running {
            return;
        }
        self.phase = Phase::Stopped;

        info!("Stopping MQTT transport");

        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(true);
        }

        // Wait for the accept loop to confirm the listener is closed
        // before either pool starts draining. Best effort: a missed
        // acknowledgement is logged and shutdown continues.
        if let Some(closed_rx) = self.listener_closed_rx.take() {
            if closed_rx.recv_timeout(LISTENER_CLOSE_TIMEOUT).is_err() {
                warn!("Timed out waiting for the listener to close");
            }
        }

        let drain = Duration::from_secs(self.config.drain_timeout_secs);
        if let Some(worker_pool) = self.worker_pool.take() {
            worker_pool.shutdown_timeout(drain);
        }
        if let Some(accept_pool) = self.accept_pool.take() {
            accept_pool.shutdown_timeout(drain);
        }
        self.local_addr = None;

        info!("MQTT transport stopped");
    }
}

impl Drop for TransportService {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Build one fixed-size worker pool
fn build_pool(name: &str, threads: usize) -> Result<Runtime> {
    RuntimeBuilder::new_multi_thread()
        .worker_threads(threads)
        .thread_name(name)
        .enable_all()
        .build()
        .map_err(|e| TransportError::Config(format!("failed to build {name} pool: {e}")))
}

/// Bind the listening socket; the std listener is handed to the accept
/// loop and registered with its pool there
fn bind_listener(addr: &str) -> Result<std::net::TcpListener> {
    let listener = std::net::TcpListener::bind(addr).map_err(|e| TransportError::BindFailed {
        addr: addr.to_string(),
        reason: e.to_string(),
    })?;
    listener
        .set_nonblocking(true)
        .map_err(|e| TransportError::BindFailed {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;
    Ok(listener)
}

/// Connection admission: accept and immediately hand off to the
/// processing pool; nothing else runs on the accepting pool
async fn accept_loop(
    listener: std::net::TcpListener,
    builder: Arc<PipelineBuilder>,
    workers: Handle,
    mut shutdown: watch::Receiver<bool>,
    closed_tx: std::sync::mpsc::Sender<()>,
) {
    let listener = match TcpListener::from_std(listener) {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to register listener: {e}");
            let _ = closed_tx.send(());
            return;
        }
    };

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,

            accepted = listener.accept() => match accepted {
                Ok((socket, peer_addr)) => {
                    debug!(peer = %peer_addr, "Connection accepted");
                    let builder = Arc::clone(&builder);
                    workers.spawn(async move {
                        match builder.assemble(socket, peer_addr).await {
                            Ok(pipeline) => pipeline.run().await,
                            Err(e) => {
                                warn!(peer = %peer_addr, "Pipeline assembly failed: {e}");
                            }
                        }
                    });
                }
                Err(e) => error!("Accept error: {e}"),
            }
        }
    }

    // Close the listening socket before the pools begin draining
    drop(listener);
    info!("Listener closed");
    let _ = closed_tx.send(());
}
