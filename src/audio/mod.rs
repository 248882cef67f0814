//! Audio session registry and OS mixer access
//!
//! The registry is platform-independent and talks to the mixer only
//! through the `AudioBackend` trait; the WASAPI implementation lives in
//! `windows.rs`.

mod backend;
mod registry;
mod session;
#[cfg(test)]
pub mod testing;
#[cfg(windows)]
mod windows;

pub use backend::{create_backend, AudioError};
pub use registry::{RefreshOutcome, Registry};
