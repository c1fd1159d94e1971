//! Interception engine seam.
//!
//! - `types`: the `InterceptionEngine` and `FlowHooks` traits plus the ready/shutdown signals.
//! - `forward_proxy`: a plain-HTTP forward proxy implementing the engine trait.

pub mod forward_proxy;
pub mod types;

pub use forward_proxy::ForwardProxyEngine;
pub use types::{FlowHooks, InterceptionEngine, ReadySignal, ShutdownSignal};
