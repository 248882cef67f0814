//! soundboard-daemon: per-application volume control with media keys
//!
//! This daemon runs in the background and provides:
//! - A low-level keyboard hook that turns media-key chords into intents
//! - A session worker owning the audio session registry and selection
//! - A loopback bus pushing state to display clients (the overlay)
//!
//! Volume keys adjust the selected application's level; the navigation
//! chord switches them to moving the selection instead.

mod audio;
mod config;
mod events;
mod hotkey;
mod icons;
mod ipc;
mod lifecycle;
mod state;

use std::sync::mpsc;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, SettingsWatcher};
use crate::events::{BusEvent, Command, Publisher, StateSnapshot};
use crate::hotkey::{HotkeyListener, SharedBindings};
use crate::icons::IconResolver;
use crate::ipc::Server;
use crate::lifecycle::ShutdownSignal;
use crate::state::{spawn_worker, SelectionStore, StateMachine, WorkerOptions};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "soundboard-daemon starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.listen_addr, ?config.data_dir, "configuration loaded");

    let settings = SettingsWatcher::open(config.settings_path.clone());
    let bindings = SharedBindings::new(settings.current().key_bindings.clone());

    // Create shutdown signal handler
    let shutdown = ShutdownSignal::new();

    // Hook thread -> session worker
    let (command_tx, command_rx) = mpsc::channel::<Command>();
    // Session worker -> bus clients
    let (event_tx, _) = broadcast::channel::<BusEvent>(64);
    let (snapshot_tx, snapshot_rx) = watch::channel(StateSnapshot::default());

    // Bind first so a second instance fails before grabbing the keys
    let server = Server::bind(config.listen_addr, event_tx.clone(), snapshot_rx).await?;

    // Start the hotkey listener (runs on dedicated thread)
    let hotkey_listener = HotkeyListener::new(command_tx.clone(), bindings.clone());
    if let Err(e) = hotkey_listener.start() {
        error!(%e, "failed to start hotkey listener");
        return Err(e).context("keyboard hook is required");
    }
    info!("hotkey listener started");

    let publisher = Publisher::new(event_tx, snapshot_tx);
    let selection_store = SelectionStore::new(config.selection_path.clone());
    let volume_delta = settings.current().volume_delta;
    let worker = spawn_worker(
        move || {
            let registry = audio::Registry::new(audio::create_backend(), IconResolver::platform());
            StateMachine::new(registry, publisher, volume_delta).with_store(selection_store)
        },
        command_rx,
        WorkerOptions {
            poll_interval: config.poll_interval,
            settings: Some(settings),
            bindings,
        },
    )
    .context("failed to spawn session worker")?;

    info!("daemon initialized, entering main loop");

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "bus server error");
            }
        }

        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup: no new intents, drain the queue, then close clients
    info!("shutting down...");

    hotkey_listener.stop();
    if command_tx.send(Command::Shutdown).is_err() {
        warn!("session worker already stopped");
    }
    drop(command_tx);
    match tokio::task::spawn_blocking(move || worker.join()).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => error!("session worker panicked"),
        Err(e) => error!(?e, "failed to join session worker"),
    }

    server.shutdown().await;

    info!("soundboard-daemon stopped");

    Ok(())
}
