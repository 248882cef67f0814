//! In-memory mixer for tests

use std::sync::{Arc, Mutex};

use super::backend::{AudioBackend, AudioError};
use super::registry::Registry;
use super::session::SessionInfo;
use crate::icons::{IconResolver, NoIcons};

#[derive(Debug, Default)]
struct FakeMixer {
    sessions: Vec<SessionInfo>,
    unavailable: bool,
}

/// Cloneable handle to a fake mixer; clones share state, so a test can
/// keep one handle while the registry owns another
#[derive(Debug, Clone, Default)]
pub struct FakeBackend {
    mixer: Arc<Mutex<FakeMixer>>,
}

impl FakeBackend {
    pub fn with_sessions(sessions: &[(u32, &str, u8)]) -> Self {
        let backend = Self::default();
        for &(pid, name, volume) in sessions {
            backend.add(pid, name, volume);
        }
        backend
    }

    pub fn registry(&self) -> Registry {
        Registry::new(Box::new(self.clone()), IconResolver::new(Box::new(NoIcons)))
    }

    pub fn add(&self, pid: u32, name: &str, volume: u8) {
        self.mixer
            .lock()
            .unwrap()
            .sessions
            .push(SessionInfo::new(pid, name, volume, false));
    }

    pub fn insert_front(&self, pid: u32, name: &str, volume: u8) {
        self.mixer
            .lock()
            .unwrap()
            .sessions
            .insert(0, SessionInfo::new(pid, name, volume, false));
    }

    pub fn remove(&self, pid: u32) {
        self.mixer
            .lock()
            .unwrap()
            .sessions
            .retain(|s| s.process_id != pid);
    }

    /// Simulate another application changing a session
    pub fn set_external(&self, pid: u32, volume: u8, muted: bool) {
        let mut mixer = self.mixer.lock().unwrap();
        if let Some(s) = mixer.sessions.iter_mut().find(|s| s.process_id == pid) {
            s.volume = volume;
            s.muted = muted;
        }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.mixer.lock().unwrap().unavailable = unavailable;
    }

    pub fn volume_of(&self, pid: u32) -> Option<u8> {
        self.find(pid).map(|s| s.volume)
    }

    pub fn muted(&self, pid: u32) -> Option<bool> {
        self.find(pid).map(|s| s.muted)
    }

    fn find(&self, pid: u32) -> Option<SessionInfo> {
        self.mixer
            .lock()
            .unwrap()
            .sessions
            .iter()
            .find(|s| s.process_id == pid)
            .cloned()
    }

    fn update(&self, pid: u32, apply: impl FnOnce(&mut SessionInfo)) -> Result<(), AudioError> {
        let mut mixer = self.mixer.lock().unwrap();
        if mixer.unavailable {
            return Err(AudioError::Unavailable("fake mixer offline".into()));
        }
        let session = mixer
            .sessions
            .iter_mut()
            .find(|s| s.process_id == pid)
            .ok_or(AudioError::SessionNotFound(pid))?;
        apply(session);
        Ok(())
    }
}

impl AudioBackend for FakeBackend {
    fn sessions(&mut self) -> Result<Vec<SessionInfo>, AudioError> {
        let mixer = self.mixer.lock().unwrap();
        if mixer.unavailable {
            return Err(AudioError::Unavailable("fake mixer offline".into()));
        }
        Ok(mixer.sessions.clone())
    }

    fn set_volume(&mut self, process_id: u32, volume: u8) -> Result<(), AudioError> {
        self.update(process_id, |s| s.volume = volume)
    }

    fn set_muted(&mut self, process_id: u32, muted: bool) -> Result<(), AudioError> {
        self.update(process_id, |s| s.muted = muted)
    }
}
