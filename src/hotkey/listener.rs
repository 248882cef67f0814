//! Global key interception using a Windows low-level keyboard hook
//!
//! The hook runs on a dedicated thread with its own message loop. The
//! callback only classifies the event against the binding table and
//! enqueues the matched intent; all audio and network work happens on
//! other threads so the OS never evicts the hook for being slow.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use super::keys::{Modifiers, SharedBindings};
use crate::events::Command;

/// What the hook callback needs to classify and hand off an event
pub(crate) struct HookContext {
    command_tx: mpsc::Sender<Command>,
    bindings: SharedBindings,
}

impl HookContext {
    /// Handle one key-down event. Returns true when the event must be
    /// suppressed (it matched a chord and its intent was queued).
    pub(crate) fn dispatch(&self, key: u32, modifiers: Modifiers) -> bool {
        let Some(intent) = self.bindings.classify(key, modifiers) else {
            return false;
        };

        debug!(key, ?modifiers, %intent, "key chord matched");
        if self.command_tx.send(Command::Intent(intent)).is_err() {
            // Worker is gone; let the OS have the key back
            warn!(%intent, "session worker unavailable, passing key through");
            return false;
        }
        true
    }
}

/// Global keyboard hook that turns matched chords into intents
pub struct HotkeyListener {
    command_tx: mpsc::Sender<Command>,
    bindings: SharedBindings,
    running: Arc<AtomicBool>,
    thread_id: Arc<AtomicU32>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl HotkeyListener {
    /// Create a new hotkey listener
    pub fn new(command_tx: mpsc::Sender<Command>, bindings: SharedBindings) -> Self {
        Self {
            command_tx,
            bindings,
            running: Arc::new(AtomicBool::new(false)),
            thread_id: Arc::new(AtomicU32::new(0)),
            thread: Mutex::new(None),
        }
    }

    /// Install the hook
    ///
    /// Spawns the `hotkey-listener` thread and waits until the hook is
    /// either installed or has failed. Failure is fatal for the daemon:
    /// the hook is its only input path.
    pub fn start(&self) -> Result<(), HotkeyError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(HotkeyError::AlreadyRunning);
        }

        let context = HookContext {
            command_tx: self.command_tx.clone(),
            bindings: self.bindings.clone(),
        };
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<u32, HotkeyError>>(1);
        let running = Arc::clone(&self.running);

        let handle = thread::Builder::new()
            .name("hotkey-listener".to_string())
            .spawn(move || {
                info!("hotkey listener thread started");

                if let Err(e) = platform::run_hook(context, ready_tx) {
                    error!(%e, "hotkey listener error");
                }

                running.store(false, Ordering::SeqCst);
                info!("hotkey listener thread stopped");
            })
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                HotkeyError::ThreadSpawn(e.to_string())
            })?;

        let installed = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(HotkeyError::HookInstall("listener thread exited".into())));

        match installed {
            Ok(thread_id) => {
                self.thread_id.store(thread_id, Ordering::SeqCst);
                if let Ok(mut slot) = self.thread.lock() {
                    *slot = Some(handle);
                }
                Ok(())
            }
            Err(e) => {
                let _ = handle.join();
                self.running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Uninstall the hook and wait for the listener thread to exit
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        platform::post_quit(self.thread_id.load(Ordering::SeqCst));

        let handle = self.thread.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("hotkey listener thread panicked");
            }
        }
    }

    /// Check if the listener is currently running
    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for HotkeyListener {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Errors that can occur in the hotkey listener
#[derive(Debug, thiserror::Error)]
pub enum HotkeyError {
    #[error("hotkey listener is already running")]
    AlreadyRunning,

    #[error("failed to install keyboard hook: {0}")]
    HookInstall(String),

    #[error("failed to spawn listener thread: {0}")]
    ThreadSpawn(String),
}

#[cfg(windows)]
mod platform {
    use std::cell::RefCell;
    use std::sync::mpsc::SyncSender;

    use tracing::{info, warn};
    use windows::Win32::Foundation::{LPARAM, LRESULT, WPARAM};
    use windows::Win32::System::LibraryLoader::GetModuleHandleW;
    use windows::Win32::System::Threading::GetCurrentThreadId;
    use windows::Win32::UI::Input::KeyboardAndMouse::{
        GetAsyncKeyState, VIRTUAL_KEY, VK_CONTROL, VK_LWIN, VK_MENU, VK_RWIN, VK_SHIFT,
    };
    use windows::Win32::UI::WindowsAndMessaging::{
        CallNextHookEx, DispatchMessageW, GetMessageW, PeekMessageW, PostThreadMessageW,
        SetWindowsHookExW, TranslateMessage, UnhookWindowsHookEx, HC_ACTION, KBDLLHOOKSTRUCT,
        LLKHF_INJECTED, MSG, PM_NOREMOVE, WH_KEYBOARD_LL, WM_KEYDOWN, WM_QUIT, WM_SYSKEYDOWN,
        WM_USER,
    };

    use super::{HookContext, HotkeyError};
    use crate::hotkey::keys::Modifiers;

    thread_local! {
        static CONTEXT: RefCell<Option<HookContext>> = const { RefCell::new(None) };
    }

    fn is_down(key: VIRTUAL_KEY) -> bool {
        // High bit set means the key is currently held
        unsafe { GetAsyncKeyState(key.0 as i32) < 0 }
    }

    fn current_modifiers() -> Modifiers {
        Modifiers {
            control: is_down(VK_CONTROL),
            alt: is_down(VK_MENU),
            shift: is_down(VK_SHIFT),
            win: is_down(VK_LWIN) || is_down(VK_RWIN),
        }
    }

    unsafe extern "system" fn keyboard_proc(code: i32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
        if code == HC_ACTION as i32 {
            let message = wparam.0 as u32;
            if message == WM_KEYDOWN || message == WM_SYSKEYDOWN {
                let info = &*(lparam.0 as *const KBDLLHOOKSTRUCT);
                if info.flags.0 & LLKHF_INJECTED.0 == 0 {
                    let modifiers = current_modifiers();
                    let suppress = CONTEXT.with(|ctx| {
                        ctx.borrow()
                            .as_ref()
                            .map(|ctx| ctx.dispatch(info.vkCode, modifiers))
                            .unwrap_or(false)
                    });
                    if suppress {
                        return LRESULT(1);
                    }
                }
            }
        }
        CallNextHookEx(None, code, wparam, lparam)
    }

    pub fn run_hook(
        context: HookContext,
        ready: SyncSender<Result<u32, HotkeyError>>,
    ) -> Result<(), HotkeyError> {
        CONTEXT.with(|ctx| *ctx.borrow_mut() = Some(context));

        let installed = unsafe {
            GetModuleHandleW(None).and_then(|module| {
                SetWindowsHookExW(WH_KEYBOARD_LL, Some(keyboard_proc), Some(module.into()), 0)
            })
        };
        let hook = match installed {
            Ok(hook) => hook,
            Err(e) => {
                CONTEXT.with(|ctx| ctx.borrow_mut().take());
                let _ = ready.send(Err(HotkeyError::HookInstall(e.to_string())));
                return Ok(());
            }
        };

        let thread_id = unsafe { GetCurrentThreadId() };
        let mut msg = MSG::default();
        unsafe {
            // Make sure the thread has a message queue before anyone posts WM_QUIT
            let _ = PeekMessageW(&mut msg, None, WM_USER, WM_USER, PM_NOREMOVE);
        }
        info!(thread_id, "low-level keyboard hook installed");
        let _ = ready.send(Ok(thread_id));

        unsafe {
            while GetMessageW(&mut msg, None, 0, 0).0 > 0 {
                let _ = TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }

            if let Err(e) = UnhookWindowsHookEx(hook) {
                warn!(error = %e, "failed to remove keyboard hook");
            }
        }
        CONTEXT.with(|ctx| ctx.borrow_mut().take());
        info!("low-level keyboard hook removed");

        Ok(())
    }

    pub fn post_quit(thread_id: u32) {
        if thread_id == 0 {
            return;
        }
        let posted = unsafe { PostThreadMessageW(thread_id, WM_QUIT, WPARAM(0), LPARAM(0)) };
        if let Err(e) = posted {
            warn!(thread_id, error = %e, "failed to stop hotkey listener");
        }
    }
}

#[cfg(not(windows))]
mod platform {
    use std::sync::mpsc::SyncSender;

    use super::{HookContext, HotkeyError};

    pub fn run_hook(
        _context: HookContext,
        ready: SyncSender<Result<u32, HotkeyError>>,
    ) -> Result<(), HotkeyError> {
        let _ = ready.send(Err(HotkeyError::HookInstall(
            "global key hooks are only supported on Windows".into(),
        )));
        Ok(())
    }

    pub fn post_quit(_thread_id: u32) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Intent;
    use crate::hotkey::keys::{vk, KeyBindings};

    fn context() -> (HookContext, mpsc::Receiver<Command>) {
        let (tx, rx) = mpsc::channel();
        let context = HookContext {
            command_tx: tx,
            bindings: SharedBindings::new(KeyBindings::default()),
        };
        (context, rx)
    }

    #[test]
    fn test_listener_creation() {
        let (tx, _rx) = mpsc::channel();
        let listener = HotkeyListener::new(tx, SharedBindings::default());
        assert!(!listener.is_running());
    }

    #[test]
    fn test_match_suppresses_and_emits_one_intent() {
        let (context, rx) = context();
        assert!(context.dispatch(vk::VOLUME_UP, Modifiers::NONE));
        assert_eq!(rx.try_recv(), Ok(Command::Intent(Intent::VolumeUp)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_no_match_passes_through() {
        let (context, rx) = context();
        assert!(!context.dispatch(0x41, Modifiers::NONE));
        assert!(!context.dispatch(vk::VOLUME_UP, Modifiers::CONTROL));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_auto_repeat_counts_each_event() {
        let (context, rx) = context();
        for _ in 0..3 {
            assert!(context.dispatch(vk::VOLUME_DOWN, Modifiers::NONE));
        }
        assert_eq!(rx.try_iter().count(), 3);
    }

    #[test]
    fn test_closed_queue_passes_through() {
        let (context, rx) = context();
        drop(rx);
        assert!(!context.dispatch(vk::VOLUME_UP, Modifiers::NONE));
    }

    #[test]
    fn test_rebind_applies_on_next_event() {
        let (context, rx) = context();
        context.bindings.replace(KeyBindings {
            navigation: "Shift+VolumeMute".parse().unwrap(),
            ..Default::default()
        });
        assert!(!context.dispatch(vk::VOLUME_MUTE, Modifiers::NONE));
        let shift = Modifiers {
            shift: true,
            ..Modifiers::NONE
        };
        assert!(context.dispatch(vk::VOLUME_MUTE, shift));
        assert_eq!(rx.try_recv(), Ok(Command::Intent(Intent::ToggleNavigation)));
    }

    #[cfg(not(windows))]
    #[test]
    fn test_start_fails_without_platform_hook() {
        let (tx, _rx) = mpsc::channel();
        let listener = HotkeyListener::new(tx, SharedBindings::default());
        assert!(matches!(listener.start(), Err(HotkeyError::HookInstall(_))));
        assert!(!listener.is_running());
    }
}
