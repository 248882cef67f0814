//! Events flowing between daemon components
//!
//! Two directions matter here:
//! - [`Command`]: hook thread -> session worker (single-consumer queue)
//! - [`BusEvent`]: session worker -> synchronization bus (fan-out)
//!
//! Everything handed to the bus is an owned value; the live session
//! collection never leaves the worker.

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

/// Abstract, device-independent action produced by a matched key chord
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    VolumeUp,
    VolumeDown,
    ToggleMute,
    ToggleNavigation,
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Intent::VolumeUp => write!(f, "VOLUME_UP"),
            Intent::VolumeDown => write!(f, "VOLUME_DOWN"),
            Intent::ToggleMute => write!(f, "TOGGLE_MUTE"),
            Intent::ToggleNavigation => write!(f, "TOGGLE_NAVIGATION"),
        }
    }
}

/// Work items for the session worker queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// A key chord matched; apply the intent
    Intent(Intent),
    /// Stop after everything queued before this has been handled
    Shutdown,
}

impl From<Intent> for Command {
    fn from(intent: Intent) -> Self {
        Command::Intent(intent)
    }
}

/// One row of the display list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub name: String,
    pub icon: String,
    pub volume: u8,
    pub is_selected: bool,
    pub is_muted: bool,
}

/// Immutable copy of registry + selection, rebuilt for every publish
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    /// Sessions in discovery order
    pub sessions: Vec<SessionView>,
    /// Position of the selected session in `sessions`, if any
    pub selected_index: Option<usize>,
    /// True while volume keys move the selection instead of the level
    pub navigation_mode: bool,
}

#[cfg(test)]
impl StateSnapshot {
    /// The session at `selected_index`, if any
    pub fn selected(&self) -> Option<&SessionView> {
        self.selected_index.and_then(|i| self.sessions.get(i))
    }
}

/// Events fanned out to every connected display client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusEvent {
    /// Registry or selection changed; carries the full current state
    StateChanged(StateSnapshot),
    /// A key was handled; the display should surface itself
    AttentionRequested,
}

impl std::fmt::Display for BusEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BusEvent::StateChanged(snapshot) => {
                write!(f, "STATE_CHANGED ({} sessions)", snapshot.sessions.len())
            }
            BusEvent::AttentionRequested => write!(f, "ATTENTION_REQUESTED"),
        }
    }
}

/// Sending half of the bus, owned by the session worker
///
/// Both sends are non-blocking; a bus with no clients simply drops events.
pub struct Publisher {
    event_tx: broadcast::Sender<BusEvent>,
    snapshot_tx: watch::Sender<StateSnapshot>,
}

impl Publisher {
    pub fn new(
        event_tx: broadcast::Sender<BusEvent>,
        snapshot_tx: watch::Sender<StateSnapshot>,
    ) -> Self {
        Self {
            event_tx,
            snapshot_tx,
        }
    }

    /// Publish a new snapshot
    ///
    /// The `watch` slot is updated before the broadcast so that a client
    /// answering a push with `get_state` never sees an older value.
    pub fn state_changed(&self, snapshot: StateSnapshot) {
        self.snapshot_tx.send_replace(snapshot.clone());
        let _ = self.event_tx.send(BusEvent::StateChanged(snapshot));
    }

    /// Ask displays to become visible
    pub fn attention(&self) {
        let _ = self.event_tx.send(BusEvent::AttentionRequested);
    }
}
