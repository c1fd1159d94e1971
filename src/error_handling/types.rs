use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    MissingValue(String),
    InvalidValue(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingValue(e) => write!(f, "Missing configuration value: {}", e),
            ConfigError::InvalidValue(e) => write!(f, "Invalid configuration value: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug)]
pub enum StorageError {
    ConnectionFailed(String),
    WriteFailed(String),
    ReadFailed(String),
    InvalidConfiguration(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ConnectionFailed(e) => write!(f, "Storage connection failed: {}", e),
            StorageError::WriteFailed(e) => write!(f, "Storage write failed: {}", e),
            StorageError::ReadFailed(e) => write!(f, "Storage read failed: {}", e),
            StorageError::InvalidConfiguration(e) => {
                write!(f, "Invalid storage configuration: {}", e)
            }
        }
    }
}

impl std::error::Error for StorageError {}

impl From<ConfigError> for StorageError {
    fn from(err: ConfigError) -> Self {
        StorageError::InvalidConfiguration(err.to_string())
    }
}

#[derive(Debug)]
pub enum BroadcastError {
    Closed,
    SendFailed(String),
    Encode(String),
}

impl fmt::Display for BroadcastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BroadcastError::Closed => write!(f, "Subscriber channel closed"),
            BroadcastError::SendFailed(e) => write!(f, "Subscriber send failed: {}", e),
            BroadcastError::Encode(e) => write!(f, "Event encoding failed: {}", e),
        }
    }
}

impl std::error::Error for BroadcastError {}

#[derive(Debug)]
pub enum EngineError {
    BindFailed(std::io::Error),
    Io(std::io::Error),
    Protocol(String),
    Runtime(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::BindFailed(e) => write!(f, "Engine bind failed: {}", e),
            EngineError::Io(e) => write!(f, "Engine IO error: {}", e),
            EngineError::Protocol(e) => write!(f, "Engine protocol error: {}", e),
            EngineError::Runtime(e) => write!(f, "Engine runtime error: {}", e),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err)
    }
}

#[derive(Debug)]
pub enum ControllerError {
    ConfigurationError(ConfigError),
    StorageError(StorageError),
    InitializationFailed(String),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            ControllerError::StorageError(e) => write!(f, "Storage error: {}", e),
            ControllerError::InitializationFailed(e) => write!(f, "Initialization failed: {}", e),
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<StorageError> for ControllerError {
    fn from(err: StorageError) -> Self {
        ControllerError::StorageError(err)
    }
}

impl From<ConfigError> for ControllerError {
    fn from(err: ConfigError) -> Self {
        ControllerError::ConfigurationError(err)
    }
}
