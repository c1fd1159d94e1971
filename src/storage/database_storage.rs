use std::path::Path;

use async_trait::async_trait;
use log::{debug, info};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, QueryResult, Statement, Value,
};

use crate::configuration::types::{DbType, MysqlConfig, StorageConfig};
use crate::error_handling::types::StorageError;
use crate::storage::dialect::{dialect_for, Dialect};
use crate::storage::stats::StatsCalculator;
use crate::storage::storage_trait::ExchangeStore;
use crate::storage::types::{Exchange, ExchangeQuery, HttpMessage, OrderedMap, StatsSnapshot};

/// Columns searched by [`ExchangeStore::query`].
const SEARCH_COLUMNS: [&str; 4] = ["url", "method", "request_body", "response_body"];

/// Escape character used in `LIKE ... ESCAPE` clauses.
const LIKE_ESCAPE: char = '!';

/// SQL-backed exchange store over either supported dialect.
///
/// The connection pool and the dialect are fixed at construction; every
/// statement is built from the dialect and executed with bound values.
pub struct DatabaseStorage {
    conn: DatabaseConnection,
    dialect: Box<dyn Dialect>,
    mysql: Option<MysqlConfig>,
    stats: StatsCalculator,
}

impl DatabaseStorage {
    const MAX_CONNECTIONS: u32 = 5;

    pub async fn connect(config: &StorageConfig) -> Result<Self, StorageError> {
        match config {
            StorageConfig::Sqlite { path } => Self::open_sqlite(path).await,
            StorageConfig::Mysql(mysql) => Self::open_mysql(mysql).await,
        }
    }

    /// Opens (creating if missing) a single-file database at `path`.
    pub async fn open_sqlite<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path_ref = path.as_ref();
        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StorageError::ConnectionFailed(format!(
                        "cannot create {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }
        let url = format!("sqlite://{}?mode=rwc", path_ref.display());
        let mut opts = ConnectOptions::new(url);
        opts.max_connections(Self::MAX_CONNECTIONS).sqlx_logging(false);
        let conn = Database::connect(opts)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;
        info!("Opened sqlite storage at {}", path_ref.display());
        Self::build(conn, DbType::Sqlite, None)
    }

    /// Prepares a lazily-connected pool; the database itself is created by
    /// [`ExchangeStore::init`] if it does not exist.
    pub async fn open_mysql(config: &MysqlConfig) -> Result<Self, StorageError> {
        config.validate()?;
        let mut opts = ConnectOptions::new(config.database_url());
        opts.max_connections(Self::MAX_CONNECTIONS)
            .sqlx_logging(false)
            .connect_lazy(true);
        let conn = Database::connect(opts)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;
        info!(
            "Prepared mysql storage for {}:{}/{}",
            config.host, config.port, config.database
        );
        Self::build(conn, DbType::Mysql, Some(config.clone()))
    }

    fn build(
        conn: DatabaseConnection,
        db_type: DbType,
        mysql: Option<MysqlConfig>,
    ) -> Result<Self, StorageError> {
        Ok(Self {
            conn,
            dialect: dialect_for(db_type),
            mysql,
            stats: StatsCalculator::new()?,
        })
    }

    pub fn db_type(&self) -> DbType {
        self.dialect.db_type()
    }

    pub async fn close(self) -> Result<(), StorageError> {
        self.conn
            .close()
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))
    }

    /// Creates the target database through a short-lived server connection.
    async fn ensure_mysql_database(config: &MysqlConfig) -> Result<(), StorageError> {
        config.validate()?;
        let mut opts = ConnectOptions::new(config.server_url());
        opts.max_connections(1).sqlx_logging(false);
        let server = Database::connect(opts)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;
        let created = server
            .execute_unprepared(&format!(
                "CREATE DATABASE IF NOT EXISTS `{}`",
                config.database
            ))
            .await
            .map_err(|e| StorageError::WriteFailed(e.to_string()));
        let _ = server.close().await;
        created?;
        debug!("Ensured mysql database {} exists", config.database);
        Ok(())
    }

    fn statement(&self, sql: String, values: Vec<Value>) -> Statement {
        Statement::from_sql_and_values(self.dialect.backend(), sql, values)
    }

    fn select_list(&self) -> String {
        format!(
            "id, method, url, {}, time, request_headers, request_body, request_cookies, \
             response_headers, response_body, response_cookies, {}",
            self.dialect.text_column("status"),
            self.dialect.timestamp_column()
        )
    }

    fn row_to_exchange(&self, row: &QueryResult) -> Result<Exchange, StorageError> {
        let text = |col: &str| -> Result<String, StorageError> {
            row.try_get::<Option<String>>("", col)
                .map(|v| v.unwrap_or_default())
                .map_err(|e| StorageError::ReadFailed(format!("{}: {}", col, e)))
        };
        let map = |col: &str| -> Result<OrderedMap, StorageError> {
            let raw = text(col)?;
            if raw.trim().is_empty() {
                return Ok(OrderedMap::new());
            }
            serde_json::from_str(&raw)
                .map_err(|e| StorageError::ReadFailed(format!("{}: {}", col, e)))
        };

        let id: i64 = row
            .try_get("", "id")
            .map_err(|e| StorageError::ReadFailed(format!("id: {}", e)))?;
        let timestamp = self
            .dialect
            .normalize_timestamp(row, "timestamp")
            .map_err(|e| StorageError::ReadFailed(format!("timestamp: {}", e)))?;

        Ok(Exchange {
            id: Some(id),
            method: text("method")?,
            url: text("url")?,
            status_line: text("status")?,
            duration_label: text("time")?,
            timestamp,
            request: HttpMessage {
                headers: map("request_headers")?,
                body: text("request_body")?,
                cookies: map("request_cookies")?,
            },
            response: HttpMessage {
                headers: map("response_headers")?,
                body: text("response_body")?,
                cookies: map("response_cookies")?,
            },
        })
    }
}

/// Escapes `LIKE` wildcards so `text` matches literally.
fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c == '%' || c == '_' || c == LIKE_ESCAPE {
            out.push(LIKE_ESCAPE);
        }
        out.push(c);
    }
    out
}

fn to_json(map: &OrderedMap) -> Result<String, StorageError> {
    serde_json::to_string(map).map_err(|e| StorageError::WriteFailed(e.to_string()))
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
impl ExchangeStore for DatabaseStorage {
    async fn init(&self) -> Result<(), StorageError> {
        if let Some(mysql) = &self.mysql {
            Self::ensure_mysql_database(mysql).await?;
        }
        self.conn
            .execute_unprepared(self.dialect.create_table_statement())
            .await
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        info!("Database initialized using {:?}", self.dialect.db_type());
        Ok(())
    }

    async fn insert(&self, exchange: &Exchange) -> Result<i64, StorageError> {
        let values: Vec<Value> = vec![
            exchange.method.clone().into(),
            exchange.url.clone().into(),
            exchange.status_line.clone().into(),
            exchange.duration_label.clone().into(),
            to_json(&exchange.request.headers)?.into(),
            exchange.request.body.clone().into(),
            to_json(&exchange.request.cookies)?.into(),
            to_json(&exchange.response.headers)?.into(),
            exchange.response.body.clone().into(),
            to_json(&exchange.response.cookies)?.into(),
            exchange.timestamp.clone().into(),
        ];
        let markers: Vec<String> = (1..=values.len())
            .map(|i| self.dialect.placeholder(i))
            .collect();
        let sql = format!(
            "INSERT INTO requests (method, url, status, time, request_headers, request_body, \
             request_cookies, response_headers, response_body, response_cookies, timestamp) \
             VALUES ({})",
            markers.join(", ")
        );
        let result = self
            .conn
            .execute(self.statement(sql, values))
            .await
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        Ok(result.last_insert_id() as i64)
    }

    async fn query(&self, query: &ExchangeQuery) -> Result<Vec<Exchange>, StorageError> {
        let mut sql = format!("SELECT {} FROM requests", self.select_list());
        let mut values: Vec<Value> = Vec::new();

        if let Some(text) = query.search.as_deref().filter(|t| !t.is_empty()) {
            let pattern = format!("%{}%", escape_like(text));
            let mut clauses = Vec::with_capacity(SEARCH_COLUMNS.len());
            for column in SEARCH_COLUMNS {
                values.push(pattern.clone().into());
                clauses.push(format!(
                    "LOWER({}) LIKE LOWER({}) ESCAPE '{}'",
                    column,
                    self.dialect.placeholder(values.len()),
                    LIKE_ESCAPE
                ));
            }
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" OR "));
        }

        values.push(clamp_i64(query.limit).into());
        let limit_marker = self.dialect.placeholder(values.len());
        values.push(clamp_i64(query.offset).into());
        let offset_marker = self.dialect.placeholder(values.len());
        sql.push_str(&format!(
            " ORDER BY id DESC LIMIT {} OFFSET {}",
            limit_marker, offset_marker
        ));

        let rows = self
            .conn
            .query_all(self.statement(sql, values))
            .await
            .map_err(|e| StorageError::ReadFailed(e.to_string()))?;
        rows.iter().map(|row| self.row_to_exchange(row)).collect()
    }

    async fn stats(&self) -> Result<StatsSnapshot, StorageError> {
        let sql = format!(
            "SELECT {}, {} FROM requests",
            self.dialect.text_column("status"),
            self.dialect.text_column("time")
        );
        let rows = self
            .conn
            .query_all(self.statement(sql, Vec::new()))
            .await
            .map_err(|e| StorageError::ReadFailed(e.to_string()))?;

        let mut pairs = Vec::with_capacity(rows.len());
        for row in &rows {
            let status: Option<String> = row
                .try_get("", "status")
                .map_err(|e| StorageError::ReadFailed(format!("status: {}", e)))?;
            let time: Option<String> = row
                .try_get("", "time")
                .map_err(|e| StorageError::ReadFailed(format!("time: {}", e)))?;
            pairs.push((status.unwrap_or_default(), time.unwrap_or_default()));
        }
        Ok(self
            .stats
            .compute(pairs.iter().map(|(s, t)| (s.as_str(), t.as_str()))))
    }

    async fn clear_all(&self) -> Result<(), StorageError> {
        self.conn
            .execute(self.statement("DELETE FROM requests".to_string(), Vec::new()))
            .await
            .map_err(|e| StorageError::WriteFailed(e.to_string()))?;
        info!("Database cleared");
        Ok(())
    }
}
