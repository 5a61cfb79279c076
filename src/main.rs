//! ts3-mute-bridge: mirrors the TeamSpeak 3 microphone state into Home Assistant
//!
//! The daemon polls the local TeamSpeak client over its ClientQuery
//! interface and keeps an `input_boolean` entity in Home Assistant on while
//! the mic is live (neither input nor output muted) and off otherwise.
//!
//! - Session per cycle: connect, authenticate, whoami, read mute flags
//! - Per-operation deadlines, flat 1s retry interval, no backoff
//! - Final `turn_off` on SIGINT/SIGTERM

mod config;
mod error;
mod events;
mod hass;
mod lifecycle;
mod monitor;
mod telnet;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::events::MonitorEvent;
use crate::hass::HassClient;
use crate::lifecycle::{push_final_state, ShutdownSignal};
use crate::monitor::MonitorLoop;
use crate::telnet::TcpDialer;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "ts3-mute-bridge starting"
    );

    // Load configuration, generating a template on first run
    let config_path = Config::path();
    if !config_path.exists() {
        warn!(path = %config_path.display(), "configuration file not found, creating default");
        Config::write_default(&config_path)
            .context("failed to create default configuration")?;
        anyhow::bail!(
            "default configuration written to {}; edit it and restart",
            config_path.display()
        );
    }
    let config = Config::load(&config_path).context("failed to load configuration")?;
    info!(endpoint = %config.endpoint, entity = %config.ha_entity_id, "configuration loaded");

    let bridge = Arc::new(
        HassClient::new(&config.ha_base_url, config.ha_token.clone(), config.ha_entity_id.clone())
            .context("failed to create Home Assistant client")?,
    );

    // Create shutdown signal handler
    let shutdown = ShutdownSignal::new();
    let cancel = CancellationToken::new();

    // Monitoring loop -> observers (tray shell, logs)
    let (event_tx, mut event_rx) = broadcast::channel::<MonitorEvent>(64);

    let mut monitor = MonitorLoop::start(
        config.monitor_settings(),
        TcpDialer,
        Arc::clone(&bridge),
        event_tx,
    )
    .await
    .context("failed to read initial Home Assistant state")?;

    let monitor_task = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            monitor.run(cancel).await;
            monitor
        }
    });

    let observer_task = tokio::spawn(async move {
        loop {
            match event_rx.recv().await {
                Ok(MonitorEvent::Stopped) | Err(broadcast::error::RecvError::Closed) => break,
                Ok(event) => info!(%event, "monitor event"),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "monitor event receiver lagged");
                }
            }
        }
    });

    info!("bridge initialized, monitoring");

    // Wait for shutdown signal
    shutdown.wait().await;
    info!("shutdown signal received");

    // Cleanup
    info!("shutting down...");
    cancel.cancel();

    match monitor_task.await {
        Ok(monitor) => info!(
            phase = %monitor.phase(),
            mic_active = monitor.last_known(),
            "monitoring task finished"
        ),
        Err(e) => error!(?e, "monitoring task panicked"),
    }
    let _ = observer_task.await;

    push_final_state(bridge.as_ref()).await;

    info!("ts3-mute-bridge stopped");

    Ok(())
}
