use super::QueryBuilder;
use crate::error::Result;
use crate::support::Record;
use serde_json::Value;

/// Post-processes results coming back from a connection.
#[async_trait::async_trait]
pub trait Processor: Send + Sync {
    fn process_select(&self, _query: &QueryBuilder, results: Vec<Record>) -> Vec<Record> {
        results
    }

    /// Run an insert and report the key it generated.
    async fn process_insert_get_id(
        &self,
        query: &QueryBuilder,
        sql: &str,
        bindings: &[Value],
    ) -> Result<i64> {
        query.connection().insert_get_id(sql, bindings).await
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteProcessor;

impl Processor for SqliteProcessor {}
