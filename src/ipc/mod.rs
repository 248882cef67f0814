//! Synchronization bus for display clients
//!
//! JSON text frames over a loopback WebSocket (`ws://127.0.0.1:8765`). Clients receive every state
//! change and attention request, and may ask for the current state.

mod protocol;
mod server;

pub use server::Server;
