//! SQL dialect capabilities.
//!
//! Every statement the storage layer issues is assembled from these pieces,
//! so call sites never branch on the backend.

use chrono::NaiveDateTime;
use sea_orm::{DbBackend, DbErr, QueryResult};

use crate::configuration::types::DbType;
use crate::storage::types::TIMESTAMP_FORMAT;

pub trait Dialect: Send + Sync {
    fn db_type(&self) -> DbType;

    fn backend(&self) -> DbBackend;

    /// Bind marker for the 1-based parameter `index`.
    fn placeholder(&self, index: usize) -> String;

    fn create_table_statement(&self) -> &'static str;

    /// Select-list expression yielding `column` as text under its own name.
    fn text_column(&self, column: &str) -> String;

    /// Select-list expression for the `timestamp` column.
    fn timestamp_column(&self) -> &'static str;

    /// Reads the timestamp column of `row` as a [`TIMESTAMP_FORMAT`] string.
    fn normalize_timestamp(&self, row: &QueryResult, column: &str) -> Result<String, DbErr>;
}

pub fn dialect_for(db_type: DbType) -> Box<dyn Dialect> {
    match db_type {
        DbType::Sqlite => Box::new(SqliteDialect),
        DbType::Mysql => Box::new(MysqlDialect),
    }
}

pub fn format_datetime(value: NaiveDateTime) -> String {
    value.format(TIMESTAMP_FORMAT).to_string()
}

/// Rewrites RFC 3339 style text (`2024-01-02T03:04:05.123Z`) emitted by some
/// writers into the canonical format; anything else is returned unchanged.
pub fn normalize_text_timestamp(value: &str) -> String {
    let trimmed = value.trim();
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(trimmed) {
        return format_datetime(dt.naive_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S") {
        return format_datetime(dt);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f") {
        return format_datetime(dt);
    }
    trimmed.to_string()
}

pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn db_type(&self) -> DbType {
        DbType::Sqlite
    }

    fn backend(&self) -> DbBackend {
        DbBackend::Sqlite
    }

    fn placeholder(&self, index: usize) -> String {
        format!("?{}", index)
    }

    fn create_table_statement(&self) -> &'static str {
        "CREATE TABLE IF NOT EXISTS requests (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            method TEXT NOT NULL,
            url TEXT NOT NULL,
            status TEXT NOT NULL,
            time TEXT NOT NULL,
            request_headers TEXT NOT NULL,
            request_body TEXT NOT NULL,
            request_cookies TEXT NOT NULL,
            response_headers TEXT NOT NULL,
            response_body TEXT NOT NULL,
            response_cookies TEXT NOT NULL,
            timestamp TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )"
    }

    fn text_column(&self, column: &str) -> String {
        format!("CAST({0} AS TEXT) AS {0}", column)
    }

    fn timestamp_column(&self) -> &'static str {
        "CAST(timestamp AS TEXT) AS timestamp"
    }

    fn normalize_timestamp(&self, row: &QueryResult, column: &str) -> Result<String, DbErr> {
        let raw: Option<String> = row.try_get("", column)?;
        Ok(raw
            .map(|s| normalize_text_timestamp(&s))
            .unwrap_or_default())
    }
}

pub struct MysqlDialect;

impl Dialect for MysqlDialect {
    fn db_type(&self) -> DbType {
        DbType::Mysql
    }

    fn backend(&self) -> DbBackend {
        DbBackend::MySql
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn create_table_statement(&self) -> &'static str {
        "CREATE TABLE IF NOT EXISTS requests (
            id BIGINT AUTO_INCREMENT PRIMARY KEY,
            method TEXT NOT NULL,
            url TEXT NOT NULL,
            status TEXT NOT NULL,
            time TEXT NOT NULL,
            request_headers LONGTEXT NOT NULL,
            request_body LONGTEXT NOT NULL,
            request_cookies LONGTEXT NOT NULL,
            response_headers LONGTEXT NOT NULL,
            response_body LONGTEXT NOT NULL,
            response_cookies LONGTEXT NOT NULL,
            timestamp DATETIME DEFAULT CURRENT_TIMESTAMP
        ) DEFAULT CHARSET=utf8mb4"
    }

    fn text_column(&self, column: &str) -> String {
        format!("CAST({0} AS CHAR) AS {0}", column)
    }

    fn timestamp_column(&self) -> &'static str {
        "timestamp"
    }

    fn normalize_timestamp(&self, row: &QueryResult, column: &str) -> Result<String, DbErr> {
        let raw: Option<NaiveDateTime> = row.try_get("", column)?;
        Ok(raw.map(format_datetime).unwrap_or_default())
    }
}
