pub mod broadcast;
pub mod configuration;
pub mod controller;
pub mod data_capture;
pub mod engine;
pub mod error_handling;
pub mod lifecycle;
pub mod storage;

pub use controller::{CaptureStatus, CaptureToggle, Supervisor, SupervisorOptions};
pub use error_handling::types::*;
