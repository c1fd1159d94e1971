//! Live fan-out of captured exchanges.
//!
//! - `subscriber`: the `Subscriber` trait and an in-process channel implementation.
//! - `broadcast_hub`: the subscriber set and best-effort publishing.

pub mod broadcast_hub;
pub mod subscriber;

pub use broadcast_hub::BroadcastHub;
pub use subscriber::{ChannelSubscriber, Subscriber};
