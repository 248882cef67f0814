//! Hotkey module for global media-key interception
//!
//! Uses a Windows low-level keyboard hook to catch configured chords
//! before the OS volume handler sees them, and turns each match into
//! an [`Intent`](crate::events::Intent) for the session worker.

mod keys;
mod listener;

#[cfg(test)]
pub use keys::{vk, Chord};
pub use keys::{KeyBindings, SharedBindings};
pub use listener::HotkeyListener;
