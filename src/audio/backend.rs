use std::fmt::Display;

use tracing::debug;

use super::session::SessionInfo;

/// Errors reported by the OS audio subsystem
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AudioError {
    /// The process vanished between intent dispatch and execution
    #[error("no audio session for process {0}")]
    SessionNotFound(u32),

    /// The mixer could not be queried; the caller keeps its last-known state
    #[error("audio subsystem unavailable: {0}")]
    Unavailable(String),
}

/// Per-process session control exposed by the OS mixer
///
/// Implementations may hold thread-affine OS handles, so a backend is
/// created and used on the session worker thread only.
pub trait AudioBackend {
    /// Enumerate the currently active per-process sessions
    fn sessions(&mut self) -> Result<Vec<SessionInfo>, AudioError>;

    /// Set a session's output level (0..=100)
    fn set_volume(&mut self, process_id: u32, volume: u8) -> Result<(), AudioError>;

    /// Set a session's mute flag without touching its level
    fn set_muted(&mut self, process_id: u32, muted: bool) -> Result<(), AudioError>;
}

/// Create the backend for the current platform
pub fn create_backend() -> Box<dyn AudioBackend> {
    #[cfg(windows)]
    return Box::new(super::windows::WindowsAudioBackend::new());

    #[cfg(not(windows))]
    return Box::new(UnsupportedBackend);
}

#[cfg(not(windows))]
struct UnsupportedBackend;

#[cfg(not(windows))]
impl AudioBackend for UnsupportedBackend {
    fn sessions(&mut self) -> Result<Vec<SessionInfo>, AudioError> {
        Err(AudioError::Unavailable(
            "no per-application mixer on this platform".into(),
        ))
    }

    fn set_volume(&mut self, process_id: u32, _volume: u8) -> Result<(), AudioError> {
        Err(AudioError::SessionNotFound(process_id))
    }

    fn set_muted(&mut self, process_id: u32, _muted: bool) -> Result<(), AudioError> {
        Err(AudioError::SessionNotFound(process_id))
    }
}

/// Apply one write to every stream of a process. A rejected stream does not
/// stop the rest; the write fails afterwards if any stream rejected it.
#[cfg(any(windows, test))]
pub(crate) fn write_all<C, E: Display>(
    process_id: u32,
    controls: &[C],
    apply: impl Fn(&C) -> Result<(), E>,
) -> Result<(), AudioError> {
    let mut rejected = 0;
    for control in controls {
        if let Err(e) = apply(control) {
            debug!(process_id, error = %e, "session control rejected write");
            rejected += 1;
        }
    }
    if rejected > 0 {
        return Err(AudioError::SessionNotFound(process_id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_write_all_reaches_every_stream() {
        let written = RefCell::new(Vec::new());
        let result = write_all(7, &[1, 2, 3], |stream| {
            written.borrow_mut().push(*stream);
            if *stream == 1 {
                Err("stream 1 released")
            } else {
                Ok(())
            }
        });

        assert_eq!(result, Err(AudioError::SessionNotFound(7)));
        assert_eq!(written.into_inner(), vec![1, 2, 3]);
    }

    #[test]
    fn test_write_all_succeeds_when_every_stream_accepts() {
        let result = write_all(7, &[1, 2], |_| Ok::<(), &str>(()));
        assert_eq!(result, Ok(()));
    }
}
