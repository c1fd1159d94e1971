use super::types::*;
use crate::error_handling::types::ConfigError;
use clap::Args;
use std::path::PathBuf;

/// Application configuration structure that defines all runtime parameters.
///
/// Every value comes from a command-line flag or its environment variable; the
/// resulting value is converted into the per-component settings handed to the
/// storage layer, the lifecycle manager and the supervisor at construction.
///
/// # Fields Overview
///
/// - `proxy_host` / `proxy_port`: where the interception engine listens
/// - `db_type`: which SQL backend stores captured exchanges
/// - `sqlite_path`: database file for the embedded backend
/// - `mysql_*`: connection settings for the networked backend
/// - `system_proxy`: whether capture toggles also flip the OS proxy setting
#[derive(Args, Debug, Clone)]
pub struct Config {
    /// Address the interception engine binds to.
    ///
    /// # Command Line
    /// Use `--proxy-host <ADDRESS>` or the `PROXY_HOST` environment variable
    #[arg(long, env = "PROXY_HOST", default_value = "0.0.0.0")]
    pub proxy_host: String,

    /// Port the interception engine binds to.
    ///
    /// # Command Line
    /// Use `--proxy-port <PORT>` or the `PROXY_PORT` environment variable
    #[arg(long, env = "PROXY_PORT", default_value_t = 8080)]
    pub proxy_port: u16,

    /// Storage backend, either `sqlite` or `mysql`.
    #[arg(long, env = "DB_TYPE", value_enum, default_value = "sqlite")]
    pub db_type: DbType,

    /// Database file used when `db_type` is `sqlite`.
    #[arg(long, env = "SQLITE_PATH", default_value = "proxy_traffic.db")]
    pub sqlite_path: PathBuf,

    #[arg(long, env = "MYSQL_HOST", default_value = "127.0.0.1")]
    pub mysql_host: String,

    #[arg(long, env = "MYSQL_PORT", default_value_t = 3306)]
    pub mysql_port: u16,

    #[arg(long, env = "MYSQL_USER", default_value = "root")]
    pub mysql_user: String,

    #[arg(long, env = "MYSQL_PASSWORD", default_value = "root", hide_env_values = true)]
    pub mysql_password: String,

    /// Database created on first start if it does not exist yet.
    #[arg(long, env = "MYSQL_DATABASE", default_value = "proxy_insight")]
    pub mysql_database: String,

    /// Point the operating system proxy at the engine while capture runs.
    ///
    /// # Command Line
    /// Use the `--system-proxy` flag; its presence enables the feature
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub system_proxy: bool,
}

impl Config {
    /// Builds the storage settings, validating the networked backend's values.
    pub fn storage_config(&self) -> Result<StorageConfig, ConfigError> {
        match self.db_type {
            DbType::Sqlite => {
                if self.sqlite_path.as_os_str().is_empty() {
                    return Err(ConfigError::MissingValue("sqlite path".to_string()));
                }
                Ok(StorageConfig::Sqlite {
                    path: self.sqlite_path.clone(),
                })
            }
            DbType::Mysql => {
                let mysql = MysqlConfig {
                    host: self.mysql_host.clone(),
                    port: self.mysql_port,
                    user: self.mysql_user.clone(),
                    password: self.mysql_password.clone(),
                    database: self.mysql_database.clone(),
                };
                mysql.validate()?;
                Ok(StorageConfig::Mysql(mysql))
            }
        }
    }

    pub fn proxy_endpoint(&self) -> ProxyEndpoint {
        ProxyEndpoint {
            host: self.proxy_host.clone(),
            port: self.proxy_port,
        }
    }

    pub fn lifecycle_policy(&self) -> LifecyclePolicy {
        LifecyclePolicy::default()
    }
}
