//! WASAPI session mixer backend
//!
//! Sessions on the default render endpoint are grouped by process id.
//! Each group keeps its `ISimpleAudioVolume` controls until the next
//! enumeration so writes reach every stream the process owns.

use std::collections::HashMap;
use std::ffi::c_void;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use windows::core::{Interface, GUID, HSTRING, PCWSTR, PWSTR};
use windows::Win32::Foundation::{CloseHandle, MAX_PATH, RPC_E_CHANGED_MODE};
use windows::Win32::Media::Audio::{
    eConsole, eRender, AudioSessionStateExpired, IAudioSessionControl2, IAudioSessionManager2,
    IMMDeviceEnumerator, ISimpleAudioVolume, MMDeviceEnumerator,
};
use windows::Win32::Storage::FileSystem::{
    GetFileVersionInfoSizeW, GetFileVersionInfoW, VerQueryValueW,
};
use windows::Win32::System::Com::{
    CoCreateInstance, CoInitializeEx, CoUninitialize, CLSCTX_ALL, COINIT_MULTITHREADED,
};
use windows::Win32::System::Threading::{
    OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32, PROCESS_QUERY_LIMITED_INFORMATION,
};

use super::backend::{write_all, AudioBackend, AudioError};
use super::session::{app_display_name, SessionInfo};

/// Event context attached to our own writes
static EVENT_CONTEXT: GUID = GUID::from_u128(0x5f1c2b8e_7a44_4c0b_9d2e_51a6c3f08e17);

struct Stream {
    process_id: u32,
    level: f32,
    muted: bool,
    control: ISimpleAudioVolume,
}

pub struct WindowsAudioBackend {
    com_ready: bool,
    /// True when this backend's CoInitializeEx call must be balanced
    owns_com: bool,
    controls: HashMap<u32, Vec<ISimpleAudioVolume>>,
    names: HashMap<u32, (String, Option<PathBuf>)>,
}

impl WindowsAudioBackend {
    pub fn new() -> Self {
        Self {
            com_ready: false,
            owns_com: false,
            controls: HashMap::new(),
            names: HashMap::new(),
        }
    }

    /// COM is initialized lazily on the worker thread, so a failure here
    /// is retried on the next refresh tick
    fn ensure_com(&mut self) -> Result<(), AudioError> {
        if self.com_ready {
            return Ok(());
        }
        let hr = unsafe { CoInitializeEx(None, COINIT_MULTITHREADED) };
        if hr.is_err() && hr != RPC_E_CHANGED_MODE {
            return Err(AudioError::Unavailable(format!("COM initialization failed: {hr:?}")));
        }
        self.com_ready = true;
        self.owns_com = hr.is_ok();
        info!("COM initialized for audio session access");
        Ok(())
    }

    fn process_name(&mut self, process_id: u32) -> (String, Option<PathBuf>) {
        self.names
            .entry(process_id)
            .or_insert_with(|| {
                let path = unsafe { image_path(process_id) };
                let version = path.as_deref().and_then(|p| unsafe { version_name(p) });
                (app_display_name(process_id, path.as_deref(), version), path)
            })
            .clone()
    }

    fn write(
        &self,
        process_id: u32,
        apply: impl Fn(&ISimpleAudioVolume) -> windows::core::Result<()>,
    ) -> Result<(), AudioError> {
        let controls = self
            .controls
            .get(&process_id)
            .ok_or(AudioError::SessionNotFound(process_id))?;
        write_all(process_id, controls, apply)
    }
}

impl Default for WindowsAudioBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WindowsAudioBackend {
    fn drop(&mut self) {
        // Interfaces must be released before COM goes away
        self.controls.clear();
        if self.owns_com {
            unsafe { CoUninitialize() };
        }
    }
}

impl AudioBackend for WindowsAudioBackend {
    fn sessions(&mut self) -> Result<Vec<SessionInfo>, AudioError> {
        self.ensure_com()?;

        let streams = unsafe { enumerate_streams() }
            .map_err(|e| AudioError::Unavailable(e.to_string()))?;

        let mut order: Vec<u32> = Vec::new();
        let mut levels: HashMap<u32, (f32, usize, bool)> = HashMap::new();
        let mut controls: HashMap<u32, Vec<ISimpleAudioVolume>> = HashMap::new();

        for stream in streams {
            let entry = levels.entry(stream.process_id).or_insert_with(|| {
                order.push(stream.process_id);
                (0.0, 0, false)
            });
            entry.0 += stream.level;
            entry.1 += 1;
            entry.2 |= stream.muted;
            controls
                .entry(stream.process_id)
                .or_default()
                .push(stream.control);
        }

        self.names.retain(|pid, _| levels.contains_key(pid));
        self.controls = controls;

        let sessions = order
            .into_iter()
            .map(|pid| {
                let (sum, count, muted) = levels[&pid];
                let volume = ((sum / count as f32) * 100.0).round().clamp(0.0, 100.0) as u8;
                let (name, exe_path) = self.process_name(pid);
                SessionInfo {
                    process_id: pid,
                    display_name: name,
                    volume,
                    muted,
                    exe_path,
                }
            })
            .collect();

        Ok(sessions)
    }

    fn set_volume(&mut self, process_id: u32, volume: u8) -> Result<(), AudioError> {
        let level = f32::from(volume.min(100)) / 100.0;
        self.write(process_id, |control| unsafe {
            control.SetMasterVolume(level, &EVENT_CONTEXT as *const GUID)
        })
    }

    fn set_muted(&mut self, process_id: u32, muted: bool) -> Result<(), AudioError> {
        self.write(process_id, |control| unsafe {
            control.SetMute(muted, &EVENT_CONTEXT as *const GUID)
        })
    }
}

unsafe fn enumerate_streams() -> windows::core::Result<Vec<Stream>> {
    let enumerator: IMMDeviceEnumerator = CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)?;
    let device = enumerator.GetDefaultAudioEndpoint(eRender, eConsole)?;
    let manager: IAudioSessionManager2 = device.Activate(CLSCTX_ALL, None)?;
    let sessions = manager.GetSessionEnumerator()?;
    let count = sessions.GetCount()?;

    let mut streams = Vec::with_capacity(count.max(0) as usize);
    for i in 0..count {
        let Ok(control) = sessions.GetSession(i) else {
            continue;
        };
        match control.GetState() {
            Ok(state) if state != AudioSessionStateExpired => {}
            _ => continue,
        }
        let Ok(control2) = control.cast::<IAudioSessionControl2>() else {
            continue;
        };
        // Process 0 is the system sounds session
        let process_id = control2.GetProcessId().unwrap_or(0);
        if process_id == 0 {
            continue;
        }
        let Ok(volume) = control.cast::<ISimpleAudioVolume>() else {
            continue;
        };

        streams.push(Stream {
            process_id,
            level: volume.GetMasterVolume().unwrap_or(0.0),
            muted: volume.GetMute().map(|m| m.as_bool()).unwrap_or(false),
            control: volume,
        });
    }

    Ok(streams)
}

unsafe fn image_path(process_id: u32) -> Option<PathBuf> {
    let handle = match OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, process_id) {
        Ok(handle) => handle,
        Err(e) => {
            debug!(process_id, error = %e, "cannot open process");
            return None;
        }
    };

    let mut buffer = [0u16; MAX_PATH as usize];
    let mut size = buffer.len() as u32;
    let queried = QueryFullProcessImageNameW(
        handle,
        PROCESS_NAME_WIN32,
        PWSTR(buffer.as_mut_ptr()),
        &mut size,
    );
    if let Err(e) = CloseHandle(handle) {
        warn!(process_id, error = %e, "failed to close process handle");
    }

    queried
        .ok()
        .map(|_| PathBuf::from(String::from_utf16_lossy(&buffer[..size as usize])))
}

/// `ProductName`, then `FileDescription`, from the version resource
unsafe fn version_name(path: &Path) -> Option<String> {
    let file = HSTRING::from(path.as_os_str());
    let size = GetFileVersionInfoSizeW(PCWSTR(file.as_ptr()), None);
    if size == 0 {
        return None;
    }

    let mut block = vec![0u8; size as usize];
    if let Err(e) = GetFileVersionInfoW(
        PCWSTR(file.as_ptr()),
        Default::default(),
        size,
        block.as_mut_ptr().cast(),
    ) {
        debug!(path = %path.display(), error = %e, "no version resource");
        return None;
    }

    let translation = query_value(&block, "\\VarFileInfo\\Translation", true)?;
    if translation.len() < 2 {
        return None;
    }
    let (language, codepage) = (translation[0], translation[1]);

    ["ProductName", "FileDescription"].into_iter().find_map(|key| {
        let sub_block = format!("\\StringFileInfo\\{language:04X}{codepage:04X}\\{key}");
        let value = query_value(&block, &sub_block, false)?;
        let text = String::from_utf16_lossy(value);
        let text = text.trim_end_matches('\0').trim();
        (!text.is_empty()).then(|| text.to_string())
    })
}

/// Raw 16-bit units of one version-resource value. `byte_len` is set for
/// binary values, whose reported length is in bytes rather than characters.
fn query_value<'a>(block: &'a [u8], sub_block: &str, byte_len: bool) -> Option<&'a [u16]> {
    let sub_block = HSTRING::from(sub_block);
    let mut value: *mut c_void = std::ptr::null_mut();
    let mut len = 0u32;
    let found = unsafe {
        VerQueryValueW(
            block.as_ptr().cast(),
            PCWSTR(sub_block.as_ptr()),
            &mut value,
            &mut len,
        )
    };
    if !found.as_bool() || value.is_null() || len == 0 {
        return None;
    }
    let units = if byte_len { len as usize / 2 } else { len as usize };
    // The value points into `block`
    Some(unsafe { std::slice::from_raw_parts(value as *const u16, units) })
}
