pub mod types;

pub use types::{BroadcastError, ConfigError, ControllerError, EngineError, StorageError};
