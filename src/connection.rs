//! Database connections and the resolver that hands them to models.
//!
//! Usage:
//! let conn = SqliteConnection::connect("sqlite", "sqlite::memory:").await?;
//! conn.statement("CREATE TABLE ...").await?;
//! let rows = conn.select("SELECT * FROM users WHERE id = ?", &[json!(1)]).await?;
use crate::error::{Error, Result};
use crate::model::{Entity, Model};
use crate::query::{Grammar, Processor, SqliteGrammar, SqliteProcessor};
use crate::settings::{ConnectionSettings, DatabaseSettings};
use crate::support::Record;
use log::{debug, error, info};
use serde_json::Value;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Executor, Row, SqlitePool, TypeInfo, ValueRef};
use std::collections::HashMap;
use std::sync::Arc;

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// A live database connection.
#[async_trait::async_trait]
pub trait Connection: Send + Sync {
    fn name(&self) -> &str;

    fn query_grammar(&self) -> Arc<dyn Grammar>;

    fn post_processor(&self) -> Arc<dyn Processor>;

    async fn select(&self, sql: &str, bindings: &[Value]) -> Result<Vec<Record>>;

    /// Run an insert and return the key of the new row.
    async fn insert_get_id(&self, sql: &str, bindings: &[Value]) -> Result<i64>;

    /// Run a statement and return the number of affected rows.
    async fn affecting_statement(&self, sql: &str, bindings: &[Value]) -> Result<u64>;

    /// Execute raw SQL with no bindings, e.g. DDL.
    async fn statement(&self, sql: &str) -> Result<()>;

    async fn close(&self) {}
}

/// SQLite connection backed by an sqlx pool.
#[derive(Clone)]
pub struct SqliteConnection {
    name: String,
    pool: SqlitePool,
    grammar: Arc<SqliteGrammar>,
    processor: Arc<SqliteProcessor>,
}

impl SqliteConnection {
    /// Connect (or create) a SQLite database at the given URI.
    pub async fn connect(name: &str, uri: &str) -> Result<Self> {
        Self::connect_with(
            name,
            &ConnectionSettings {
                url: uri.to_string(),
                max_connections: 1,
            },
        )
        .await
    }

    pub async fn connect_with(name: &str, settings: &ConnectionSettings) -> Result<Self> {
        info!("Connecting `{}` to SQLite database at URI: {}", name, settings.url);
        let pool = SqlitePoolOptions::new()
            .max_connections(settings.max_connections.max(1))
            .connect(&settings.url)
            .await?;
        info!("Connected `{}`", name);
        Ok(SqliteConnection {
            name: name.to_string(),
            pool,
            grammar: Arc::new(SqliteGrammar),
            processor: Arc::new(SqliteProcessor),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn bind_values<'q>(mut query: SqliteQuery<'q>, bindings: &'q [Value]) -> SqliteQuery<'q> {
    for value in bindings {
        query = match value {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => query.bind(i),
                None => query.bind(n.as_f64()),
            },
            Value::String(s) => query.bind(s.as_str()),
            other => query.bind(other.to_string()),
        };
    }
    query
}

/// Convert a row to a `Record`, keyed by column name.
fn row_to_record(row: &SqliteRow) -> Result<Record> {
    let mut record = Record::new();
    for column in row.columns() {
        let idx = column.ordinal();
        let declared = column.type_info().name().to_uppercase();
        let raw = row.try_get_raw(idx)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let storage = raw.type_info().name().to_string();
            match storage.as_str() {
                "INTEGER" if declared == "BOOLEAN" => Value::Bool(row.try_get::<i64, _>(idx)? != 0),
                "INTEGER" => Value::from(row.try_get::<i64, _>(idx)?),
                "REAL" => Value::from(row.try_get::<f64, _>(idx)?),
                "BLOB" => Value::from(row.try_get::<Vec<u8>, _>(idx)?),
                _ => Value::String(row.try_get::<String, _>(idx)?),
            }
        };
        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}

#[async_trait::async_trait]
impl Connection for SqliteConnection {
    fn name(&self) -> &str {
        &self.name
    }

    fn query_grammar(&self) -> Arc<dyn Grammar> {
        self.grammar.clone()
    }

    fn post_processor(&self) -> Arc<dyn Processor> {
        self.processor.clone()
    }

    async fn select(&self, sql: &str, bindings: &[Value]) -> Result<Vec<Record>> {
        debug!("Fetching rows with SQL: {}", sql);
        let rows = bind_values(sqlx::query(sql), bindings)
            .fetch_all(&self.pool)
            .await
            .inspect_err(|e| error!("Row fetch failed: {}", e))?;
        info!("Fetched {} rows successfully", rows.len());
        rows.iter().map(row_to_record).collect()
    }

    async fn insert_get_id(&self, sql: &str, bindings: &[Value]) -> Result<i64> {
        debug!("Inserting with SQL: {}", sql);
        let result = bind_values(sqlx::query(sql), bindings)
            .execute(&self.pool)
            .await
            .inspect_err(|e| error!("Insert failed: {}", e))?;
        Ok(result.last_insert_rowid())
    }

    async fn affecting_statement(&self, sql: &str, bindings: &[Value]) -> Result<u64> {
        debug!("Executing SQL: {}", sql);
        let result = bind_values(sqlx::query(sql), bindings)
            .execute(&self.pool)
            .await
            .inspect_err(|e| error!("SQL execution failed: {}", e))?;
        Ok(result.rows_affected())
    }

    async fn statement(&self, sql: &str) -> Result<()> {
        debug!("Executing SQL: {}", sql);
        self.pool
            .execute(sql)
            .await
            .inspect_err(|e| error!("SQL execution failed: {}", e))?;
        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("Closed connection `{}`", self.name);
    }
}

/// Turns a connection name into a live connection.
pub trait ConnectionResolver: Send + Sync {
    /// `None` selects the default connection.
    fn connection(&self, name: Option<&str>) -> Result<Arc<dyn Connection>>;

    fn default_connection(&self) -> &str;
}

/// The application's set of named connections.
pub struct DatabaseManager {
    default: String,
    connections: HashMap<String, Arc<dyn Connection>>,
}

impl DatabaseManager {
    pub fn new(default: impl Into<String>) -> Self {
        DatabaseManager {
            default: default.into(),
            connections: HashMap::new(),
        }
    }

    /// Open every configured connection.
    pub async fn from_settings(settings: &DatabaseSettings) -> Result<Self> {
        let mut manager = DatabaseManager::new(&settings.default);
        for (name, connection) in &settings.connections {
            let conn = SqliteConnection::connect_with(name, connection).await?;
            manager.add_connection(name, Arc::new(conn));
        }
        Ok(manager)
    }

    pub fn add_connection(&mut self, name: impl Into<String>, connection: Arc<dyn Connection>) {
        self.connections.insert(name.into(), connection);
    }

    pub fn set_default_connection(&mut self, name: impl Into<String>) {
        self.default = name.into();
    }

    /// A model for `E` wired to this manager.
    pub fn model<E: Entity>(self: &Arc<Self>) -> Model<E> {
        let resolver: Arc<dyn ConnectionResolver> = self.clone();
        Model::new().with_resolver(resolver)
    }

    pub async fn close(&self) {
        for connection in self.connections.values() {
            connection.close().await;
        }
    }
}

impl ConnectionResolver for DatabaseManager {
    fn connection(&self, name: Option<&str>) -> Result<Arc<dyn Connection>> {
        let name = name.unwrap_or(&self.default);
        self.connections
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownConnection(name.to_string()))
    }

    fn default_connection(&self) -> &str {
        &self.default
    }
}
