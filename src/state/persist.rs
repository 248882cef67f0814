//! Remembers the selected session across restarts
//!
//! Process ids do not survive a restart, so the selection is stored by
//! display name and matched against the first registry refresh.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("selection file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("selection file is corrupt: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredSelection {
    name: String,
}

/// JSON file holding the last selected session name
#[derive(Debug, Clone)]
pub struct SelectionStore {
    path: PathBuf,
}

impl SelectionStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Stored name, or `None` when nothing was saved yet
    pub fn load(&self) -> Result<Option<String>, PersistError> {
        let json = match std::fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let stored: StoredSelection = serde_json::from_str(&json)?;
        Ok(Some(stored.name))
    }

    pub fn save(&self, name: &str) -> Result<(), PersistError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_vec(&StoredSelection {
            name: name.to_string(),
        })?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }
}
