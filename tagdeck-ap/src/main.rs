//! tagdeck control core - Main entry point
//!
//! Wires the player actor, tag store, settings, upload pipeline, websocket
//! hub and message-bus client together and serves the HTTP API.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tagdeck_ap::api::{self, AppContext};
use tagdeck_ap::bridge::bus_client::{BusClient, LoopbackTransport};
use tagdeck_ap::bridge::remote::RemoteInterpreter;
use tagdeck_ap::bridge::ws::ClientHub;
use tagdeck_ap::config::{Args, Config};
use tagdeck_ap::peripherals::{HostPeripherals, Peripherals};
use tagdeck_ap::playback::engine::SimulatedEngine;
use tagdeck_ap::playback::playlist::PlaylistBuilder;
use tagdeck_ap::playback::Player;
use tagdeck_ap::settings::SettingsStore;
use tagdeck_ap::tags::TagStore;
use tagdeck_ap::upload::UploadPipeline;
use tagdeck_ap::SharedState;
use tagdeck_common::db::init_database;

/// Interval of the player's progress tick
const PLAYER_TICK: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse();
    let config = Config::load(&args).context("Failed to load configuration")?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting tagdeck-ap on port {}", config.port);
    info!("Storage root: {}", config.storage_root.display());

    tokio::fs::create_dir_all(&config.storage_root)
        .await
        .with_context(|| format!("Failed to create {}", config.storage_root.display()))?;
    let db = init_database(&config.database_path)
        .await
        .context("Failed to open database")?;

    let host = Arc::new(HostPeripherals::default());
    let peripherals = Peripherals::host(host);
    let shared = Arc::new(SharedState::new());

    // Settings
    let settings = SettingsStore::new(db.clone(), peripherals.network.clone());
    settings
        .seed_bus(&config.bus)
        .await
        .context("Failed to seed message-bus settings")?;
    let player_settings = settings
        .player_settings()
        .await
        .context("Failed to load player settings")?;

    // Player
    let tags = TagStore::new(db.clone(), config.backup_path());
    let (player, handle) = Player::new(
        Box::new(SimulatedEngine::new(&config.storage_root)),
        PlaylistBuilder::new(&config.storage_root),
        tags.clone(),
        peripherals.clone(),
        shared.clone(),
        player_settings,
        PLAYER_TICK,
    );
    let player_task = player.spawn();

    // Websocket hub
    let hub = Arc::new(ClientHub::new(
        handle.clone(),
        settings.clone(),
        peripherals.network.clone(),
    ));
    tokio::spawn(hub.clone().run_notices(shared.subscribe()));
    let interpreter = Arc::new(RemoteInterpreter::new(
        settings.clone(),
        tags.clone(),
        handle.clone(),
        shared.clone(),
        peripherals.indicator.clone(),
    ));

    // Message bus
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let bus_config = settings
        .bus_config(&config.bus)
        .await
        .context("Failed to load message-bus settings")?;
    let mut bus = None;
    if bus_config.enabled {
        let (transport, broker, events) = LoopbackTransport::new();
        warn!("No network broker transport configured, message bus runs in-process");
        let client = BusClient::new(
            transport,
            events,
            &bus_config,
            handle.clone(),
            peripherals.clone(),
            &shared,
        );
        bus = Some((tokio::spawn(client.run(shutdown_rx)), broker));
    } else {
        info!("Message bus disabled");
    }

    let ctx = AppContext {
        config: Arc::new(config.clone()),
        shared: shared.clone(),
        player: handle,
        tags,
        settings,
        uploads: UploadPipeline::new(config.upload.clone(), peripherals.subsystems.clone()),
        hub,
        interpreter,
    };

    api::run(ctx, shutdown_signal())
        .await
        .context("HTTP server failed")?;

    // Publish offline state before the runtime goes away
    let _ = shutdown_tx.send(true);
    if let Some((task, _broker)) = bus {
        let _ = task.await;
    }
    player_task.abort();

    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
