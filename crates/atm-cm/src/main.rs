//! ATM Connection Manager daemon
//!
//! Runs a connection manager with the null protocol adapter and a loopback
//! signaling manager on interface 0. Useful for exercising the actor, timers
//! and metrics without hardware.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Spawn the manager actor and attach the loopback interface
//! 4. Wait for shutdown signal, then drain circuits

#![warn(clippy::pedantic)]

use anyhow::Context;
use atm_cm::adapter::NullAdapter;
use atm_cm::config::Config;
use atm_cm::observability::init_metrics_recorder;
use atm_cm::signaling::LoopbackSignaling;
use atm_cm::ConnectionManagerHandle;
use atm_common::InterfaceId;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long shutdown waits for circuits to drain before cancelling.
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

const LOOPBACK_INTERFACE: InterfaceId = InterfaceId(0);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "atm=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting ATM Connection Manager");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        cm_id = %config.cm_id,
        callq_max = config.callq_max,
        rcvq_max = config.rcvq_max,
        tick_ms = config.tick.as_millis(),
        mailbox_size = config.mailbox_size,
        metrics_bind_address = %config.metrics_bind_address,
        "Configuration loaded successfully"
    );

    let metrics_addr: SocketAddr = config
        .metrics_bind_address
        .parse()
        .with_context(|| format!("invalid metrics bind address {}", config.metrics_bind_address))?;
    init_metrics_recorder(metrics_addr)
        .map_err(|e| anyhow::anyhow!("failed to install Prometheus recorder: {e}"))?;
    info!(addr = %metrics_addr, "Prometheus metrics recorder initialized");

    let (handle, task) = ConnectionManagerHandle::spawn(&config, Box::new(NullAdapter::default()));
    handle
        .attach_interface(
            LOOPBACK_INTERFACE,
            Box::new(LoopbackSignaling::new(LOOPBACK_INTERFACE)),
        )
        .await
        .context("failed to attach loopback interface")?;
    info!(nif = %LOOPBACK_INTERFACE, "Loopback interface attached");

    info!("ATM Connection Manager running - press Ctrl+C to shutdown");
    shutdown_signal().await;
    info!("Shutdown signal received, draining circuits...");

    match handle.status().await {
        Ok(status) => match serde_json::to_string(&status) {
            Ok(json) => info!(status = %json, "Manager status at shutdown"),
            Err(e) => warn!(error = %e, "Failed to serialize manager status"),
        },
        Err(e) => warn!(error = %e, "Failed to fetch manager status"),
    }

    if let Err(e) = handle.shutdown().await {
        warn!(error = %e, "Manager shutdown request failed");
    }

    if tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, task).await.is_err() {
        warn!(
            timeout_secs = SHUTDOWN_DRAIN_TIMEOUT.as_secs(),
            "Circuits did not drain in time, cancelling"
        );
        handle.cancel();
    }

    info!("ATM Connection Manager shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
