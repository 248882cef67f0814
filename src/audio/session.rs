use std::path::PathBuf;
#[cfg(any(windows, test))]
use std::path::Path;

/// What the OS mixer reports for one audio-producing process
///
/// A process with several streams is reported once; the backend groups
/// its streams and fans writes out to all of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub process_id: u32,
    pub display_name: String,
    /// 0..=100
    pub volume: u8,
    pub muted: bool,
    pub exe_path: Option<PathBuf>,
}

impl SessionInfo {
    pub fn new(process_id: u32, display_name: impl Into<String>, volume: u8, muted: bool) -> Self {
        Self {
            process_id,
            display_name: display_name.into(),
            volume: volume.min(100),
            muted,
            exe_path: None,
        }
    }
}

/// One live session held by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSession {
    pub process_id: u32,
    pub display_name: String,
    pub volume: u8,
    pub muted: bool,
    /// Opaque icon reference from the icon resolver
    pub icon: String,
}

impl AudioSession {
    pub fn from_info(info: &SessionInfo, icon: String) -> Self {
        Self {
            process_id: info.process_id,
            display_name: info.display_name.clone(),
            volume: info.volume.min(100),
            muted: info.muted,
            icon,
        }
    }
}

/// Human-readable name for a process
///
/// Prefers the name from the executable's version resource (for example
/// "Google Chrome" over `chrome`), then the file stem, then the pid.
#[cfg(any(windows, test))]
pub fn app_display_name(
    process_id: u32,
    exe_path: Option<&Path>,
    version_name: Option<String>,
) -> String {
    version_name
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .or_else(|| {
            exe_path
                .and_then(Path::file_stem)
                .map(|stem| stem.to_string_lossy().into_owned())
                .filter(|stem| !stem.is_empty())
        })
        .unwrap_or_else(|| format!("Process {process_id}"))
}
