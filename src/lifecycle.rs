//! Engine lifecycle supervision.
//!
//! - `state`: the `LifecycleState` machine.
//! - `lifecycle_manager`: start/stop of the engine's dedicated thread and
//!   runtime, with retry on quick exits and bounded shutdown.

pub mod lifecycle_manager;
pub mod state;

pub use lifecycle_manager::LifecycleManager;
pub use state::LifecycleState;
