//! Gridlink MQTT Transport Server
//!
//! A standalone server binary wiring the transport to default
//! collaborators: accept-all authentication, unlimited quota and a
//! logging event sink. Intended for local development and smoke tests;
//! production deployments inject their own collaborators.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use gridlink_core::{AdaptorRegistry, Collaborators};
use gridlink_transport::{TransportConfig, TransportService};

mod defaults;
mod session;

#[derive(Parser)]
#[command(name = "gridlink-server")]
#[command(about = "Gridlink MQTT transport server")]
#[command(version)]
struct Cli {
    /// Config file path (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address override, e.g. 0.0.0.0:1883
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config file {}", path.display()))?;
            toml::from_str::<TransportConfig>(&raw)
                .with_context(|| format!("parsing config file {}", path.display()))?
        }
        None => TransportConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.bind_address = listen.ip().to_string();
        config.bind_port = listen.port();
    }

    let collaborators = Collaborators {
        event_sink: Arc::new(defaults::LoggingEventSink),
        auth: Arc::new(defaults::AcceptAllAuth),
        relations: Arc::new(defaults::NoRelations),
        quota: Arc::new(defaults::UnlimitedQuota),
    };

    let mut service = TransportService::new(
        config,
        AdaptorRegistry::with_defaults(),
        collaborators,
        Arc::new(session::DeviceSessionFactory),
    );
    service.start().context("starting MQTT transport")?;

    tracing::info!("Transport ready, accepting connections...");

    // The service owns its worker pools; block this thread until Ctrl-C
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(tokio::signal::ctrl_c())
        .context("waiting for shutdown signal")?;

    tracing::info!("Shutdown signal received");
    service.stop();

    Ok(())
}
