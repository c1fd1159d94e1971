use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use regex::Regex;

use crate::error_handling::types::ConfigError;

/// SQL backend selected at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DbType {
    Sqlite,
    Mysql,
}

/// Connection settings for the networked backend.
#[derive(Debug, Clone, PartialEq)]
pub struct MysqlConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl Default for MysqlConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: "root".to_string(),
            database: "proxy_insight".to_string(),
        }
    }
}

impl MysqlConfig {
    /// Checks the database name before it is spliced into `CREATE DATABASE`,
    /// which cannot take a bound parameter.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ident = Regex::new(r"^[A-Za-z0-9_$]+$")
            .map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
        if !ident.is_match(&self.database) {
            return Err(ConfigError::InvalidValue(format!(
                "mysql database name `{}` must match [A-Za-z0-9_$]+",
                self.database
            )));
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::MissingValue("mysql host".to_string()));
        }
        Ok(())
    }

    /// URL of the server without a database selected.
    pub fn server_url(&self) -> String {
        format!(
            "mysql://{}:{}@{}:{}",
            utf8_percent_encode(&self.user, NON_ALPHANUMERIC),
            utf8_percent_encode(&self.password, NON_ALPHANUMERIC),
            self.host,
            self.port
        )
    }

    pub fn database_url(&self) -> String {
        format!("{}/{}", self.server_url(), self.database)
    }
}

/// Storage backend configuration, fixed for the process lifetime.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageConfig {
    Sqlite { path: PathBuf },
    Mysql(MysqlConfig),
}

/// Listen address handed to the interception engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    pub host: String,
    pub port: u16,
}

impl ProxyEndpoint {
    pub fn new<H: Into<String>>(host: H, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl Default for ProxyEndpoint {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Timing and retry bounds used by the lifecycle manager.
///
/// - `ready_timeout`: how long `start` waits for the engine to report it is listening
/// - `min_viable_runtime`: an engine exiting sooner than this is treated as a bind failure
/// - `retry_backoff`: pause between attempts, interruptible by `stop`
/// - `max_attempts`: total attempts including the first one
/// - `shutdown_timeout`: how long `stop` waits for the run-loop to unwind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecyclePolicy {
    pub ready_timeout: Duration,
    pub min_viable_runtime: Duration,
    pub retry_backoff: Duration,
    pub max_attempts: u32,
    pub shutdown_timeout: Duration,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(5),
            min_viable_runtime: Duration::from_secs(1),
            retry_backoff: Duration::from_secs(1),
            max_attempts: 3,
            shutdown_timeout: Duration::from_secs(2),
        }
    }
}
