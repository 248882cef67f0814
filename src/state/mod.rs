//! Selection state and the worker that owns it
//!
//! - `machine`: Adjust/Navigate modes, intent handling, snapshots
//! - `worker`: dedicated thread draining the intent queue
//! - `persist`: last selection by name, restored at startup

mod machine;
mod persist;
mod worker;

pub use machine::StateMachine;
pub use persist::SelectionStore;
pub use worker::{spawn_worker, WorkerOptions};
