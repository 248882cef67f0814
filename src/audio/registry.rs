//! Ordered, id-keyed collection of live audio sessions
//!
//! Entries are kept in discovery order. Refreshes append new sessions at
//! the tail and update existing ones in place, so navigation order never
//! changes because of a volume change.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use super::backend::{AudioBackend, AudioError};
use super::session::{AudioSession, SessionInfo};
use crate::icons::IconResolver;

/// What a refresh changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshOutcome {
    pub added: Vec<u32>,
    pub removed: Vec<u32>,
    /// Sessions whose volume, mute flag or name changed out-of-band
    pub updated: Vec<u32>,
}

impl RefreshOutcome {
    pub fn changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty() || !self.updated.is_empty()
    }
}

/// Live session collection, exclusively owned by the session worker
pub struct Registry {
    backend: Box<dyn AudioBackend>,
    icons: IconResolver,
    sessions: Vec<AudioSession>,
    index: HashMap<u32, usize>,
}

impl Registry {
    pub fn new(backend: Box<dyn AudioBackend>, icons: IconResolver) -> Self {
        Self {
            backend,
            icons,
            sessions: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Sessions in discovery order
    pub fn sessions(&self) -> &[AudioSession] {
        &self.sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn contains(&self, process_id: u32) -> bool {
        self.index.contains_key(&process_id)
    }

    pub fn get(&self, process_id: u32) -> Option<&AudioSession> {
        self.index.get(&process_id).map(|&i| &self.sessions[i])
    }

    /// Position of a session in discovery order
    pub fn position(&self, process_id: u32) -> Option<usize> {
        self.index.get(&process_id).copied()
    }

    pub fn first(&self) -> Option<u32> {
        self.sessions.first().map(|s| s.process_id)
    }

    pub fn find_by_name(&self, display_name: &str) -> Option<u32> {
        self.sessions
            .iter()
            .find(|s| s.display_name == display_name)
            .map(|s| s.process_id)
    }

    /// Reconcile against the OS mixer
    ///
    /// On failure the last-known collection is left untouched.
    pub fn refresh(&mut self) -> Result<RefreshOutcome, AudioError> {
        let reported = self.backend.sessions()?;

        let mut live: HashMap<u32, &SessionInfo> = HashMap::with_capacity(reported.len());
        for info in &reported {
            live.entry(info.process_id).or_insert(info);
        }

        let mut outcome = RefreshOutcome::default();

        self.sessions.retain(|session| {
            let keep = live.contains_key(&session.process_id);
            if !keep {
                outcome.removed.push(session.process_id);
            }
            keep
        });

        for session in &mut self.sessions {
            let info = live[&session.process_id];
            let volume = info.volume.min(100);
            if session.volume != volume
                || session.muted != info.muted
                || session.display_name != info.display_name
            {
                session.volume = volume;
                session.muted = info.muted;
                session.display_name.clone_from(&info.display_name);
                outcome.updated.push(session.process_id);
            }
        }

        let mut known: HashSet<u32> = self.sessions.iter().map(|s| s.process_id).collect();
        for info in &reported {
            if known.insert(info.process_id) {
                let icon = self.icons.resolve(info.exe_path.as_deref());
                self.sessions.push(AudioSession::from_info(info, icon));
                outcome.added.push(info.process_id);
            }
        }

        self.rebuild_index();

        for pid in &outcome.added {
            info!(pid, name = %self.sessions[self.index[pid]].display_name, "audio session added");
        }
        for pid in &outcome.removed {
            info!(pid, "audio session removed");
        }
        if !outcome.updated.is_empty() {
            debug!(updated = ?outcome.updated, "audio sessions changed out-of-band");
        }

        Ok(outcome)
    }

    /// Set a session's level, clamped to 0..=100. Returns the applied level.
    pub fn set_volume(&mut self, process_id: u32, value: i32) -> Result<u8, AudioError> {
        let i = self.slot(process_id)?;
        let volume = value.clamp(0, 100) as u8;
        self.backend.set_volume(process_id, volume)?;
        self.sessions[i].volume = volume;
        Ok(volume)
    }

    /// Set a session's mute flag; the stored level is left as is
    pub fn set_muted(&mut self, process_id: u32, muted: bool) -> Result<(), AudioError> {
        let i = self.slot(process_id)?;
        self.backend.set_muted(process_id, muted)?;
        self.sessions[i].muted = muted;
        Ok(())
    }

    /// Flip a session's mute flag. Returns the new flag.
    pub fn toggle_mute(&mut self, process_id: u32) -> Result<bool, AudioError> {
        let muted = !self.sessions[self.slot(process_id)?].muted;
        self.set_muted(process_id, muted)?;
        Ok(muted)
    }

    fn slot(&self, process_id: u32) -> Result<usize, AudioError> {
        self.position(process_id)
            .ok_or(AudioError::SessionNotFound(process_id))
    }

    fn rebuild_index(&mut self) {
        self.index = self
            .sessions
            .iter()
            .enumerate()
            .map(|(i, s)| (s.process_id, i))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::FakeBackend;
    use crate::icons::FALLBACK_ICON;

    fn pids(registry: &Registry) -> Vec<u32> {
        registry.sessions().iter().map(|s| s.process_id).collect()
    }

    #[test]
    fn test_refresh_discovery_order() {
        let backend = FakeBackend::with_sessions(&[(10, "Spotify", 30), (20, "Game", 80)]);
        let mut registry = backend.registry();

        let outcome = registry.refresh().unwrap();
        assert_eq!(outcome.added, vec![10, 20]);
        assert_eq!(pids(&registry), vec![10, 20]);
        assert_eq!(registry.get(10).unwrap().icon, FALLBACK_ICON);
    }

    #[test]
    fn test_refresh_appends_new_and_removes_gone() {
        let backend = FakeBackend::with_sessions(&[(1, "A", 10), (2, "B", 20), (3, "C", 30)]);
        let mut registry = backend.registry();
        registry.refresh().unwrap();

        backend.remove(2);
        // Reported ahead of existing entries, still lands at the tail
        backend.insert_front(4, "D", 40);

        let outcome = registry.refresh().unwrap();
        assert_eq!(outcome.removed, vec![2]);
        assert_eq!(outcome.added, vec![4]);
        assert_eq!(pids(&registry), vec![1, 3, 4]);
        assert_eq!(registry.position(4), Some(2));
        assert!(!registry.contains(2));
    }

    #[test]
    fn test_out_of_band_change_keeps_order() {
        let backend = FakeBackend::with_sessions(&[(1, "A", 10), (2, "B", 20)]);
        let mut registry = backend.registry();
        registry.refresh().unwrap();

        backend.set_external(1, 95, true);
        let outcome = registry.refresh().unwrap();

        assert_eq!(outcome.updated, vec![1]);
        assert!(outcome.added.is_empty() && outcome.removed.is_empty());
        assert_eq!(pids(&registry), vec![1, 2]);
        let a = registry.get(1).unwrap();
        assert_eq!((a.volume, a.muted), (95, true));
    }

    #[test]
    fn test_unchanged_refresh_reports_nothing() {
        let backend = FakeBackend::with_sessions(&[(1, "A", 10)]);
        let mut registry = backend.registry();
        registry.refresh().unwrap();
        assert!(!registry.refresh().unwrap().changed());
    }

    #[test]
    fn test_unavailable_keeps_last_known_state() {
        let backend = FakeBackend::with_sessions(&[(1, "A", 10), (2, "B", 20)]);
        let mut registry = backend.registry();
        registry.refresh().unwrap();

        backend.set_unavailable(true);
        assert!(matches!(registry.refresh(), Err(AudioError::Unavailable(_))));
        assert_eq!(pids(&registry), vec![1, 2]);
    }

    #[test]
    fn test_set_volume_clamps() {
        let backend = FakeBackend::with_sessions(&[(1, "A", 50)]);
        let mut registry = backend.registry();
        registry.refresh().unwrap();

        assert_eq!(registry.set_volume(1, 105).unwrap(), 100);
        assert_eq!(backend.volume_of(1), Some(100));
        assert_eq!(registry.set_volume(1, -5).unwrap(), 0);
        assert_eq!(backend.volume_of(1), Some(0));
        assert_eq!(registry.get(1).unwrap().volume, 0);
    }

    #[test]
    fn test_stale_id_is_session_not_found() {
        let backend = FakeBackend::with_sessions(&[(1, "A", 50)]);
        let mut registry = backend.registry();
        registry.refresh().unwrap();

        assert_eq!(registry.set_volume(9, 10), Err(AudioError::SessionNotFound(9)));

        // Process exited after the last refresh: the OS call fails
        backend.remove(1);
        assert_eq!(registry.set_volume(1, 10), Err(AudioError::SessionNotFound(1)));
        assert_eq!(registry.get(1).unwrap().volume, 50);
    }

    #[test]
    fn test_mute_is_independent_of_volume() {
        let backend = FakeBackend::with_sessions(&[(1, "A", 42)]);
        let mut registry = backend.registry();
        registry.refresh().unwrap();

        assert!(registry.toggle_mute(1).unwrap());
        let a = registry.get(1).unwrap();
        assert_eq!((a.volume, a.muted), (42, true));
        assert_eq!(backend.muted(1), Some(true));

        assert!(!registry.toggle_mute(1).unwrap());
        let a = registry.get(1).unwrap();
        assert_eq!((a.volume, a.muted), (42, false));
    }
}
