//! Session worker thread
//!
//! The mixer backend is bound to the thread that created it, so the
//! registry and state machine live on one dedicated OS thread. Intents
//! arrive over a FIFO queue and are handled strictly in order; between
//! them the worker refreshes the registry and reloads settings on a
//! fixed deadline, so a burst of key presses cannot starve either.

use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::machine::StateMachine;
use crate::audio::AudioError;
use crate::config::SettingsWatcher;
use crate::events::Command;
use crate::hotkey::SharedBindings;

/// Periodic duties of the worker besides intent handling
pub struct WorkerOptions {
    pub poll_interval: Duration,
    pub settings: Option<SettingsWatcher>,
    pub bindings: SharedBindings,
}

/// Spawn the session worker
///
/// `build` runs on the worker thread itself, so the backend it creates
/// never crosses threads. The thread exits after `Command::Shutdown` (or
/// when every sender is gone) once earlier commands have been handled.
pub fn spawn_worker<F>(
    build: F,
    commands: Receiver<Command>,
    options: WorkerOptions,
) -> std::io::Result<JoinHandle<()>>
where
    F: FnOnce() -> StateMachine + Send + 'static,
{
    thread::Builder::new()
        .name("session-worker".into())
        .spawn(move || {
            let machine = build();
            Worker::new(machine, options).run(commands);
        })
}

struct Worker {
    machine: StateMachine,
    options: WorkerOptions,
    /// Set while the mixer is unreachable so the failure is logged once
    unavailable: bool,
}

impl Worker {
    fn new(machine: StateMachine, options: WorkerOptions) -> Self {
        Self {
            machine,
            options,
            unavailable: false,
        }
    }

    fn run(mut self, commands: Receiver<Command>) {
        if let Some(settings) = &self.options.settings {
            self.machine
                .set_volume_delta(settings.current().volume_delta);
        }

        self.refresh();
        self.machine.restore_selection();
        self.machine.publish_current();
        info!(
            sessions = self.machine.registry().len(),
            "session worker started"
        );

        let mut next_tick = Instant::now() + self.options.poll_interval;
        loop {
            let timeout = next_tick.saturating_duration_since(Instant::now());
            match commands.recv_timeout(timeout) {
                Ok(Command::Intent(intent)) => {
                    debug!(%intent, "handling intent");
                    self.machine.handle_intent(intent);
                }
                Ok(Command::Shutdown) => {
                    info!("session worker shutting down");
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    info!("command queue closed, session worker exiting");
                    break;
                }
            }

            if Instant::now() >= next_tick {
                self.tick();
                next_tick = Instant::now() + self.options.poll_interval;
            }
        }
    }

    fn tick(&mut self) {
        self.refresh();
        self.reload_settings();
    }

    fn refresh(&mut self) {
        match self.machine.refresh() {
            Ok(_) => {
                if self.unavailable {
                    info!("audio mixer available again");
                    self.unavailable = false;
                }
            }
            Err(AudioError::Unavailable(reason)) => {
                if !self.unavailable {
                    warn!(%reason, "audio mixer unavailable, keeping last known sessions");
                    self.unavailable = true;
                }
            }
            Err(e) => warn!(error = %e, "session refresh failed"),
        }
    }

    fn reload_settings(&mut self) {
        let Some(watcher) = self.options.settings.as_mut() else {
            return;
        };
        if let Some(settings) = watcher.poll() {
            self.machine.set_volume_delta(settings.volume_delta);
            self.options.bindings.replace(settings.key_bindings);
        }
    }
}
