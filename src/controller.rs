//! Composition root.
//!
//! - `supervisor`: wires storage, broadcast, capture and lifecycle together
//!   and exposes the query and capture-control API.
//! - `system_proxy`: the OS proxy toggle collaborator.

pub mod supervisor;
pub mod system_proxy;

pub use supervisor::{CaptureStatus, CaptureToggle, Supervisor, SupervisorOptions};
pub use system_proxy::{DisabledSystemProxy, SystemProxy};
