//! Query builder bound to a connection, its grammar and its post-processor.
//!
//! Filter methods consume and return the builder so calls chain:
//!
//! ```ignore
//! let rows = QueryBuilder::for_connection(conn)
//!     .from("users")
//!     .where_op("age", ">", 18)
//!     .order_by_desc("created_at")
//!     .limit(10)
//!     .get(ALL_COLUMNS)
//!     .await?;
//! ```
pub mod grammar;
pub mod processor;

use crate::connection::Connection;
use crate::error::Result;
use crate::support::Record;
use log::debug;
use serde_json::Value;
use std::sync::Arc;

pub use grammar::{Grammar, SqliteGrammar};
pub use processor::{Processor, SqliteProcessor};

/// Select every column.
pub const ALL_COLUMNS: &[&str] = &["*"];

/// Comparison operators accepted by `where_op`.
pub const OPERATORS: &[&str] = &[
    "=", "<", ">", "<=", ">=", "<>", "!=", "like", "not like", "glob",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Boolean {
    And,
    Or,
}

impl Boolean {
    pub fn as_sql(self) -> &'static str {
        match self {
            Boolean::And => "and",
            Boolean::Or => "or",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn as_sql(self) -> &'static str {
        match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WhereClause {
    Basic {
        column: String,
        operator: String,
        value: Value,
        boolean: Boolean,
    },
    In {
        column: String,
        values: Vec<Value>,
        not: bool,
        boolean: Boolean,
    },
    Null {
        column: String,
        not: bool,
        boolean: Boolean,
    },
}

impl WhereClause {
    pub fn boolean(&self) -> Boolean {
        match self {
            WhereClause::Basic { boolean, .. }
            | WhereClause::In { boolean, .. }
            | WhereClause::Null { boolean, .. } => *boolean,
        }
    }
}

#[derive(Clone)]
pub struct QueryBuilder {
    connection: Arc<dyn Connection>,
    grammar: Arc<dyn Grammar>,
    processor: Arc<dyn Processor>,
    from: Option<String>,
    key_name: String,
    columns: Vec<String>,
    wheres: Vec<WhereClause>,
    orders: Vec<(String, Direction)>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl QueryBuilder {
    pub fn new(
        connection: Arc<dyn Connection>,
        grammar: Arc<dyn Grammar>,
        processor: Arc<dyn Processor>,
    ) -> Self {
        QueryBuilder {
            connection,
            grammar,
            processor,
            from: None,
            key_name: "id".to_string(),
            columns: Vec::new(),
            wheres: Vec::new(),
            orders: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    /// Builder using the connection's own grammar and post-processor.
    pub fn for_connection(connection: Arc<dyn Connection>) -> Self {
        let grammar = connection.query_grammar();
        let processor = connection.post_processor();
        QueryBuilder::new(connection, grammar, processor)
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub fn grammar(&self) -> &Arc<dyn Grammar> {
        &self.grammar
    }

    pub fn processor(&self) -> &Arc<dyn Processor> {
        &self.processor
    }

    pub fn table(&self) -> Option<&str> {
        self.from.as_deref()
    }

    /// Column used by `find` and `find_many`. Defaults to `id`.
    pub fn key_name(&self) -> &str {
        &self.key_name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn wheres(&self) -> &[WhereClause] {
        &self.wheres
    }

    pub fn orders(&self) -> &[(String, Direction)] {
        &self.orders
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset_value(&self) -> Option<u64> {
        self.offset
    }

    pub fn from(mut self, table: impl Into<String>) -> Self {
        self.from = Some(table.into());
        self
    }

    pub fn with_key_name(mut self, key_name: impl Into<String>) -> Self {
        self.key_name = key_name.into();
        self
    }

    pub fn select(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn add_select(mut self, columns: &[&str]) -> Self {
        self.columns.extend(columns.iter().map(|c| c.to_string()));
        self
    }

    pub fn where_eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.push_basic(column, "=", value.into(), Boolean::And)
    }

    /// Add a comparison. An operator outside [`OPERATORS`] is taken as the
    /// value and compared with `=`.
    pub fn where_op(self, column: &str, operator: &str, value: impl Into<Value>) -> Self {
        self.push_basic(column, operator, value.into(), Boolean::And)
    }

    pub fn or_where(self, column: &str, operator: &str, value: impl Into<Value>) -> Self {
        self.push_basic(column, operator, value.into(), Boolean::Or)
    }

    fn push_basic(mut self, column: &str, operator: &str, value: Value, boolean: Boolean) -> Self {
        let lowered = operator.to_lowercase();
        let (operator, value) = if OPERATORS.contains(&lowered.as_str()) {
            (lowered, value)
        } else {
            ("=".to_string(), Value::String(operator.to_string()))
        };
        self.wheres.push(WhereClause::Basic {
            column: column.to_string(),
            operator,
            value,
            boolean,
        });
        self
    }

    pub fn where_in<I, V>(mut self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.wheres.push(WhereClause::In {
            column: column.to_string(),
            values: values.into_iter().map(Into::into).collect(),
            not: false,
            boolean: Boolean::And,
        });
        self
    }

    pub fn where_not_in<I, V>(mut self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.wheres.push(WhereClause::In {
            column: column.to_string(),
            values: values.into_iter().map(Into::into).collect(),
            not: true,
            boolean: Boolean::And,
        });
        self
    }

    pub fn where_null(mut self, column: &str) -> Self {
        self.wheres.push(WhereClause::Null {
            column: column.to_string(),
            not: false,
            boolean: Boolean::And,
        });
        self
    }

    pub fn where_not_null(mut self, column: &str) -> Self {
        self.wheres.push(WhereClause::Null {
            column: column.to_string(),
            not: true,
            boolean: Boolean::And,
        });
        self
    }

    pub fn order_by(mut self, column: &str, direction: Direction) -> Self {
        self.orders.push((column.to_string(), direction));
        self
    }

    pub fn order_by_desc(self, column: &str) -> Self {
        self.order_by(column, Direction::Desc)
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Limit and offset for a 1-based page number.
    pub fn for_page(self, page: u32, per_page: u32) -> Self {
        let page = u64::from(page.max(1));
        let per_page = u64::from(per_page);
        self.offset((page - 1) * per_page).limit(per_page)
    }

    pub fn to_sql(&self) -> String {
        self.grammar.compile_select(self)
    }

    /// Bindings for the where clauses, in placeholder order.
    pub fn bindings(&self) -> Vec<Value> {
        let mut bindings = Vec::new();
        for clause in &self.wheres {
            match clause {
                WhereClause::Basic { value, .. } => bindings.push(value.clone()),
                WhereClause::In { values, .. } => bindings.extend(values.iter().cloned()),
                WhereClause::Null { .. } => {}
            }
        }
        bindings
    }

    /// Run the select. `columns` apply only when no `select` was made.
    pub async fn get(&self, columns: &[&str]) -> Result<Vec<Record>> {
        let query = if self.columns.is_empty() {
            self.clone().select(columns)
        } else {
            self.clone()
        };
        let sql = query.to_sql();
        debug!("Running select: {}", sql);
        let rows = self.connection.select(&sql, &query.bindings()).await?;
        Ok(self.processor.process_select(&query, rows))
    }

    pub async fn first(&self, columns: &[&str]) -> Result<Option<Record>> {
        let rows = self.clone().limit(1).get(columns).await?;
        Ok(rows.into_iter().next())
    }

    /// Look a row up by its key column.
    pub async fn find(&self, id: impl Into<Value>, columns: &[&str]) -> Result<Option<Record>> {
        self.clone().where_eq(&self.key_name, id).first(columns).await
    }

    pub async fn find_many<I, V>(&self, ids: I, columns: &[&str]) -> Result<Vec<Record>>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.clone().where_in(&self.key_name, ids).get(columns).await
    }

    pub async fn count(&self) -> Result<u64> {
        let sql = self.grammar.compile_count(self);
        let rows = self.connection.select(&sql, &self.bindings()).await?;
        let count = rows
            .first()
            .and_then(|row| row.get("aggregate"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        Ok(count)
    }

    pub async fn insert(&self, values: &Record) -> Result<bool> {
        let sql = self.grammar.compile_insert(self, values);
        let bindings: Vec<Value> = values.values().cloned().collect();
        self.connection.affecting_statement(&sql, &bindings).await?;
        Ok(true)
    }

    /// Insert a row and return its generated key.
    pub async fn insert_get_id(&self, values: &Record) -> Result<i64> {
        let sql = self.grammar.compile_insert(self, values);
        let bindings: Vec<Value> = values.values().cloned().collect();
        self.processor
            .process_insert_get_id(self, &sql, &bindings)
            .await
    }

    /// Update matching rows and return the affected count.
    pub async fn update(&self, values: &Record) -> Result<u64> {
        let sql = self.grammar.compile_update(self, values);
        let mut bindings: Vec<Value> = values.values().cloned().collect();
        bindings.extend(self.bindings());
        self.connection.affecting_statement(&sql, &bindings).await
    }

    /// Delete matching rows and return the affected count.
    pub async fn delete(&self) -> Result<u64> {
        let sql = self.grammar.compile_delete(self);
        self.connection
            .affecting_statement(&sql, &self.bindings())
            .await
    }
}
