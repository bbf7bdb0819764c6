//! Sentra daemon.
//!
//! Device identity, firmware builds and OTA orchestration behind one
//! HTTP API, with a transport bridge feeding device traffic in.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use sentra_core::config::{load_config, Config};
use sentra_core::tracing_init::init_tracing;
use sentra_crypto::{CertificateAuthority, SecretStore};

use sentra_daemon::firmware::FirmwareService;
use sentra_daemon::identity::{CertificateService, KeyService};
use sentra_daemon::ota::OtaService;
use sentra_daemon::server::{create_router, AppState};
use sentra_daemon::storage::Database;
use sentra_daemon::transport::{
    spawn_liveness_task, Ingestor, LocalBus, TransportBridge,
};

#[derive(Parser, Debug)]
#[command(name = "sentra-daemon")]
#[command(
    version,
    about = "Sentra daemon - device identity, firmware builds and OTA orchestration"
)]
struct Args {
    /// Path to config file (JSON).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on. Overrides the config file.
    #[arg(long)]
    addr: Option<SocketAddr>,

    /// Path to SQLite database file. Overrides the config file.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Master secret for encrypting stored key material.
    #[arg(long, env = "SENTRA_MASTER_SECRET")]
    master_secret: Option<String>,

    /// Reject stored secrets that fail to decrypt instead of passing them
    /// through as legacy plaintext.
    #[arg(long)]
    strict_secrets: bool,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

fn apply_cli_overrides(config: &mut Config, args: &Args) {
    if let Some(addr) = args.addr {
        config.daemon.listen_addr = addr.to_string();
    }
    if let Some(path) = &args.db_path {
        config.daemon.database_path = Some(path.clone());
    }
    if let Some(secret) = &args.master_secret {
        config.identity.master_secret = secret.clone();
    }
    if args.strict_secrets {
        config.identity.legacy_plaintext_fallback = false;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing("sentra_daemon=info", args.log_json);

    let mut config = load_config(args.config.as_deref()).context("Failed to load config")?;
    apply_cli_overrides(&mut config, &args);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.daemon.listen_addr,
        "Starting sentra-daemon"
    );

    let db_path = config
        .daemon
        .database_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("data/sentra.db"));
    let db = Database::open(&db_path).await?;

    let ca = Arc::new(
        CertificateAuthority::load_or_create(&config.identity.cert_dir, "Sentra")
            .context("Failed to initialise certificate authority")?,
    );
    let secrets = Arc::new(SecretStore::new(
        &config.identity.master_secret,
        config.identity.legacy_plaintext_fallback,
    ));

    let keys = KeyService::new(
        db.clone(),
        Arc::clone(&secrets),
        config.firmware.firmware_dir.clone(),
    );
    let certs = CertificateService::new(db.clone(), Arc::clone(&ca), Arc::clone(&secrets));
    let firmware = FirmwareService::new(
        db.clone(),
        keys.clone(),
        certs.clone(),
        config.firmware.firmware_dir.clone(),
        config.firmware.compiler.clone(),
        config.firmware.broker_host.clone(),
    );

    // Transport: bounded hand-off queue with one sequential consumer.
    let (inbound, bridge) = TransportBridge::new(
        config.transport.queue_capacity,
        Duration::from_secs(config.transport.handler_timeout_secs),
    );
    let bus = Arc::new(LocalBus::new(inbound));
    let ota = OtaService::new(
        db.clone(),
        bus.clone(),
        config.daemon.external_base_url.clone(),
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let ingestor = Arc::new(Ingestor::new(db.clone(), ota.clone()));
    let bridge_task = bridge.spawn(ingestor, shutdown_rx.clone());
    let liveness_task = spawn_liveness_task(
        db.clone(),
        Duration::from_secs(config.transport.sweep_interval_secs),
        config.transport.offline_after_secs,
        shutdown_rx,
    );

    let app = create_router(AppState {
        db,
        certs,
        keys,
        firmware,
        ota,
    });

    let listener = tokio::net::TcpListener::bind(&config.daemon.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.daemon.listen_addr))?;
    info!(addr = %config.daemon.listen_addr, "sentra-daemon listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("Server error")?;

    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(bridge_task, liveness_task);
    info!("sentra-daemon stopped");
    Ok(())
}
