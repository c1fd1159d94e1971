//! Capture pipeline between the interception engine and the host runtime.
//!
//! - `types`: the engine-side `Flow` model.
//! - `scheduler`: fire-and-forget handoff of work onto the host runtime,
//!   plus an ordered lane for writes.
//! - `capture_adapter`: `FlowHooks` implementation that normalizes flows into
//!   exchanges and schedules their persistence and broadcast.

pub mod capture_adapter;
pub mod scheduler;
pub mod types;

pub use capture_adapter::CaptureAdapter;
pub use scheduler::{HostScheduler, SerialLane};
pub use types::{Flow, FlowCookie, FlowRequest, FlowResponse};
