//! Selection state machine
//!
//! Two modes, Adjust and Navigate, toggled by `ToggleNavigation`. In
//! Adjust the volume keys change the selected session's level; in
//! Navigate they move the selection through the registry, wrapping at
//! both ends.
//!
//! The machine owns the registry. Every handled intent publishes exactly
//! one attention request and one state snapshot.

use tracing::{debug, info, warn};

use super::persist::SelectionStore;
use crate::audio::{AudioError, RefreshOutcome, Registry};
use crate::events::{Intent, Publisher, SessionView, StateSnapshot};

/// What the volume keys do
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    /// Volume keys change the selected session's level
    #[default]
    Adjust,
    /// Volume keys move the selection
    Navigate,
}

impl Mode {
    pub fn toggled(self) -> Self {
        match self {
            Mode::Adjust => Mode::Navigate,
            Mode::Navigate => Mode::Adjust,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Adjust => write!(f, "Adjust"),
            Mode::Navigate => write!(f, "Navigate"),
        }
    }
}

/// Targeted session and active mode
///
/// `selected` is a process id, checked against the registry on every
/// use; it never keeps a vanished session alive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectionState {
    pub selected: Option<u32>,
    pub mode: Mode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Next,
    Previous,
}

/// The state machine that maps intents to volume and selection changes
pub struct StateMachine {
    registry: Registry,
    selection: SelectionState,
    volume_delta: u8,
    publisher: Publisher,
    store: Option<SelectionStore>,
}

impl StateMachine {
    /// Create a new state machine in Adjust mode with nothing selected
    pub fn new(registry: Registry, publisher: Publisher, volume_delta: u8) -> Self {
        Self {
            registry,
            selection: SelectionState::default(),
            volume_delta: volume_delta.clamp(1, 20),
            publisher,
            store: None,
        }
    }

    /// Persist the selection by name so it survives restarts
    pub fn with_store(mut self, store: SelectionStore) -> Self {
        self.store = Some(store);
        self
    }

    #[cfg(test)]
    pub fn mode(&self) -> Mode {
        self.selection.mode
    }

    #[cfg(test)]
    pub fn selection(&self) -> SelectionState {
        self.selection
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[cfg(test)]
    pub fn volume_delta(&self) -> u8 {
        self.volume_delta
    }

    pub fn set_volume_delta(&mut self, delta: u8) {
        let delta = delta.clamp(1, 20);
        if delta != self.volume_delta {
            info!(from = self.volume_delta, to = delta, "volume step changed");
            self.volume_delta = delta;
        }
    }

    /// Apply one intent, then publish attention + state
    pub fn handle_intent(&mut self, intent: Intent) {
        let mode = self.selection.mode;
        let result = match intent {
            Intent::ToggleNavigation => {
                self.selection.mode = mode.toggled();
                info!(from = %mode, to = %self.selection.mode, "mode toggled");
                Ok(())
            }
            Intent::VolumeUp | Intent::VolumeDown => {
                let up = intent == Intent::VolumeUp;
                match mode {
                    Mode::Adjust => self.step_volume(if up { 1 } else { -1 }),
                    Mode::Navigate => {
                        self.navigate(if up { Direction::Previous } else { Direction::Next });
                        Ok(())
                    }
                }
            }
            Intent::ToggleMute => self.toggle_mute(),
        };

        match result {
            Ok(()) => {}
            Err(AudioError::SessionNotFound(pid)) => {
                debug!(pid, %intent, "session vanished before intent ran, refreshing");
                if let Err(e) = self.reconcile() {
                    warn!(error = %e, "refresh after stale session failed");
                }
            }
            Err(e) => warn!(%intent, error = %e, "intent failed"),
        }

        self.publisher.attention();
        self.publish_state();
    }

    /// Reconcile with the OS mixer; publishes one snapshot if anything
    /// changed. On error the last-known state is kept.
    pub fn refresh(&mut self) -> Result<RefreshOutcome, AudioError> {
        let outcome = self.reconcile()?;
        if outcome.changed() {
            self.publish_state();
        }
        Ok(outcome)
    }

    /// Re-select the session saved by a previous run, if it is present
    pub fn restore_selection(&mut self) {
        let Some(store) = &self.store else {
            return;
        };
        let name = match store.load() {
            Ok(Some(name)) => name,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "ignoring saved selection");
                return;
            }
        };

        if let Some(pid) = self.registry.find_by_name(&name) {
            info!(pid, %name, "restored previous selection");
            self.selection.selected = Some(pid);
        } else {
            debug!(%name, "previously selected session is not running");
        }
    }

    /// Publish the current state without any change (startup)
    pub fn publish_current(&self) {
        self.publish_state();
    }

    /// Build an immutable snapshot of registry + selection
    pub fn snapshot(&self) -> StateSnapshot {
        let selected_index = self
            .selection
            .selected
            .and_then(|pid| self.registry.position(pid));

        let sessions = self
            .registry
            .sessions()
            .iter()
            .enumerate()
            .map(|(i, s)| SessionView {
                name: s.display_name.clone(),
                icon: s.icon.clone(),
                volume: s.volume,
                is_selected: Some(i) == selected_index,
                is_muted: s.muted,
            })
            .collect();

        StateSnapshot {
            sessions,
            selected_index,
            navigation_mode: self.selection.mode == Mode::Navigate,
        }
    }

    fn publish_state(&self) {
        self.publisher.state_changed(self.snapshot());
    }

    fn reconcile(&mut self) -> Result<RefreshOutcome, AudioError> {
        let outcome = self.registry.refresh()?;

        if let Some(pid) = self.selection.selected {
            if !self.registry.contains(pid) {
                let next = self.registry.first();
                info!(removed = pid, next = ?next, "selected session ended, reselecting");
                self.select(next);
            }
        }

        Ok(outcome)
    }

    /// Current selection, auto-selecting the first session if none
    fn ensure_selection(&mut self) -> Option<u32> {
        match self.selection.selected {
            Some(pid) if self.registry.contains(pid) => Some(pid),
            _ => {
                let first = self.registry.first();
                self.select(first);
                first
            }
        }
    }

    fn step_volume(&mut self, sign: i32) -> Result<(), AudioError> {
        let Some(pid) = self.ensure_selection() else {
            debug!("no audio sessions, ignoring volume key");
            return Ok(());
        };
        let Some(session) = self.registry.get(pid) else {
            return Err(AudioError::SessionNotFound(pid));
        };
        let (current, muted) = (session.volume, session.muted);

        if muted {
            self.registry.set_muted(pid, false)?;
        }
        let target = i32::from(current) + sign * i32::from(self.volume_delta);
        let volume = self.registry.set_volume(pid, target)?;
        debug!(pid, from = current, to = volume, "volume adjusted");
        Ok(())
    }

    fn toggle_mute(&mut self) -> Result<(), AudioError> {
        let Some(pid) = self.ensure_selection() else {
            debug!("no audio sessions, ignoring mute key");
            return Ok(());
        };
        let muted = self.registry.toggle_mute(pid)?;
        info!(pid, muted, "mute toggled");
        Ok(())
    }

    fn navigate(&mut self, direction: Direction) {
        let len = self.registry.len();
        if len == 0 {
            debug!("no audio sessions, nothing to navigate");
            return;
        }

        let current = self
            .selection
            .selected
            .and_then(|pid| self.registry.position(pid));
        let next = match (current, direction) {
            (None, Direction::Next) => 0,
            (None, Direction::Previous) => len - 1,
            (Some(i), Direction::Next) => (i + 1) % len,
            (Some(i), Direction::Previous) => (i + len - 1) % len,
        };

        let pid = self.registry.sessions()[next].process_id;
        self.select(Some(pid));
    }

    fn select(&mut self, pid: Option<u32>) {
        if self.selection.selected == pid {
            return;
        }
        self.selection.selected = pid;

        let Some(pid) = pid else {
            debug!("selection cleared");
            return;
        };
        let Some(session) = self.registry.get(pid) else {
            return;
        };
        debug!(pid, name = %session.display_name, "session selected");

        if let Some(store) = &self.store {
            if let Err(e) = store.save(&session.display_name) {
                warn!(error = %e, "failed to save selection");
            }
        }
    }
}
