//! Active-record style models.
//!
//! An [`Entity`] describes a row type; a [`Model`] binds that type to a table
//! and a connection and offers CRUD helpers. Every helper builds a fresh
//! [`ModelQuery`], so no state is shared between calls. Anything beyond the
//! helpers goes through [`Model::query`], which exposes the whole builder.
//!
//! ```ignore
//! #[derive(Deserialize)]
//! struct UserProfile { id: i64, name: String }
//! impl Entity for UserProfile {}
//!
//! let users = db.model::<UserProfile>();           // table `user_profile`
//! let alice = users.find(1, ALL_COLUMNS).await?;
//! let adults = users.query()?.where_op("age", ">=", 18).get(ALL_COLUMNS).await?;
//! ```
use crate::connection::{Connection, ConnectionResolver};
use crate::error::{Error, Result};
use crate::query::QueryBuilder;
use crate::support::{Arrayable, Record, class_basename, snake_case};
use log::{debug, error};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

/// A row type a [`Model`] materializes query results into.
pub trait Entity: DeserializeOwned + Send + Sync + Unpin + 'static {
    /// Explicit table name. `None` derives it from the type name.
    const TABLE: Option<&'static str> = None;
    const PRIMARY_KEY: &'static str = "id";
    const PER_PAGE: u32 = 15;
    /// Connection name. `None` uses the resolver's default.
    const CONNECTION: Option<&'static str> = None;

    fn class_name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

pub struct Model<E: Entity> {
    connection: Option<String>,
    table: Option<String>,
    primary_key: String,
    per_page: u32,
    resolver: Option<Arc<dyn ConnectionResolver>>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Clone for Model<E> {
    fn clone(&self) -> Self {
        Model {
            connection: self.connection.clone(),
            table: self.table.clone(),
            primary_key: self.primary_key.clone(),
            per_page: self.per_page,
            resolver: self.resolver.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> Default for Model<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> Model<E> {
    /// A model with no connection resolver. Database calls fail with
    /// [`Error::ResolverNotSet`] until one is set.
    pub fn new() -> Self {
        Model {
            connection: E::CONNECTION.map(str::to_string),
            table: E::TABLE.map(str::to_string),
            primary_key: E::PRIMARY_KEY.to_string(),
            per_page: E::PER_PAGE,
            resolver: None,
            _entity: PhantomData,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn ConnectionResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Every row, with the given columns.
    pub async fn all(&self, columns: &[&str]) -> Result<Vec<E>> {
        self.new_query()?.get(columns).await
    }

    /// The row whose primary key is `id`, if any.
    pub async fn find(&self, id: impl Into<Value>, columns: &[&str]) -> Result<Option<E>> {
        self.new_query()?.find(id, columns).await
    }

    pub async fn find_many<I, V>(&self, ids: I, columns: &[&str]) -> Result<Vec<E>>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.new_query()?.find_many(ids, columns).await
    }

    /// Insert a row and return its generated primary key.
    pub async fn insert(&self, values: &Record) -> Result<i64> {
        self.new_query()?.insert_get_id(values).await
    }

    /// Update the row with primary key `id`; returns the affected row count.
    pub async fn update(&self, id: impl Into<Value>, attributes: &Record) -> Result<u64> {
        self.new_query()?
            .where_eq(&self.primary_key, id)
            .update(attributes)
            .await
    }

    /// Delete the row with primary key `id`.
    ///
    /// Always returns `Ok(true)` once the statement has run, even when no row
    /// matched. Callers that need to know whether a row was removed should use
    /// `query()?.where_eq(..).delete()`, which reports the affected count.
    pub async fn delete(&self, id: impl Into<Value>) -> Result<bool> {
        let affected = self
            .new_query()?
            .where_eq(&self.primary_key, id)
            .delete()
            .await?;
        debug!("Deleted {} rows from `{}`", affected, self.table());
        Ok(true)
    }

    /// The explicit table name, or the snake-cased type name.
    pub fn table(&self) -> String {
        match &self.table {
            Some(table) => table.clone(),
            None => snake_case(class_basename(E::class_name())),
        }
    }

    pub fn table_name(&self) -> String {
        self.table()
    }

    pub fn set_table(&mut self, table: impl Into<String>) {
        self.table = Some(table.into());
    }

    pub fn key_name(&self) -> &str {
        &self.primary_key
    }

    pub fn per_page(&self) -> u32 {
        self.per_page
    }

    pub fn set_per_page(&mut self, per_page: u32) {
        self.per_page = per_page;
    }

    /// Resolve this model's connection. Not cached.
    pub fn connection(&self) -> Result<Arc<dyn Connection>> {
        self.resolve_connection(self.connection.as_deref())
    }

    pub fn connection_name(&self) -> Option<&str> {
        self.connection.as_deref()
    }

    pub fn set_connection(&mut self, name: Option<&str>) {
        self.connection = name.map(str::to_string);
    }

    pub fn resolve_connection(&self, name: Option<&str>) -> Result<Arc<dyn Connection>> {
        let resolver = self.resolver.as_ref().ok_or(Error::ResolverNotSet)?;
        resolver.connection(name)
    }

    pub fn connection_resolver(&self) -> Option<Arc<dyn ConnectionResolver>> {
        self.resolver.clone()
    }

    pub fn set_connection_resolver(&mut self, resolver: Arc<dyn ConnectionResolver>) {
        self.resolver = Some(resolver);
    }

    pub fn unset_connection_resolver(&mut self) {
        self.resolver = None;
    }

    /// A fresh query for this model's table on its resolved connection.
    pub fn new_query(&self) -> Result<ModelQuery<E>> {
        let connection = self.connection()?;
        let grammar = connection.query_grammar();
        let processor = connection.post_processor();
        let base = QueryBuilder::new(connection, grammar, processor);
        Ok(ModelQuery::new(base, self))
    }

    /// The full query builder surface, scoped to this model.
    pub fn query(&self) -> Result<ModelQuery<E>> {
        self.new_query()
    }
}

/// A query that materializes its rows as `E`.
///
/// Filter methods mirror [`QueryBuilder`]'s and keep the wrapper; the
/// builder's other methods (`update`, `delete`, `count`, `to_sql`, ...) are
/// reachable through `Deref`.
pub struct ModelQuery<E: Entity> {
    query: QueryBuilder,
    key_name: String,
    per_page: u32,
    _entity: PhantomData<fn() -> E>,
}

macro_rules! forward {
    ($( $method:ident ( $( $arg:ident : $ty:ty ),* ) ),* $(,)?) => {
        $(
            pub fn $method(self, $( $arg: $ty ),*) -> Self {
                ModelQuery {
                    query: self.query.$method($( $arg ),*),
                    ..self
                }
            }
        )*
    };
}

impl<E: Entity> ModelQuery<E> {
    pub fn new(query: QueryBuilder, model: &Model<E>) -> Self {
        ModelQuery {
            query: query.from(model.table()).with_key_name(model.key_name()),
            key_name: model.key_name().to_string(),
            per_page: model.per_page(),
            _entity: PhantomData,
        }
    }

    forward!(
        select(columns: &[&str]),
        add_select(columns: &[&str]),
        where_eq(column: &str, value: impl Into<Value>),
        where_op(column: &str, operator: &str, value: impl Into<Value>),
        or_where(column: &str, operator: &str, value: impl Into<Value>),
        where_null(column: &str),
        where_not_null(column: &str),
        order_by(column: &str, direction: crate::query::Direction),
        order_by_desc(column: &str),
        limit(limit: u64),
        offset(offset: u64),
        for_page(page: u32, per_page: u32),
    );

    pub fn where_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        ModelQuery {
            query: self.query.where_in(column, values),
            ..self
        }
    }

    pub fn where_not_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        ModelQuery {
            query: self.query.where_not_in(column, values),
            ..self
        }
    }

    pub fn base(&self) -> &QueryBuilder {
        &self.query
    }

    pub fn into_base(self) -> QueryBuilder {
        self.query
    }

    pub async fn get(&self, columns: &[&str]) -> Result<Vec<E>> {
        let rows = self.query.get(columns).await?;
        rows.into_iter().map(hydrate).collect()
    }

    pub async fn first(&self, columns: &[&str]) -> Result<Option<E>> {
        self.query.first(columns).await?.map(hydrate).transpose()
    }

    /// Look a row up by the model's primary key.
    pub async fn find(&self, id: impl Into<Value>, columns: &[&str]) -> Result<Option<E>> {
        self.query
            .clone()
            .where_eq(&self.key_name, id)
            .first(columns)
            .await?
            .map(hydrate)
            .transpose()
    }

    /// Rows whose primary key is in `ids`. An empty list runs no query.
    pub async fn find_many<I, V>(&self, ids: I, columns: &[&str]) -> Result<Vec<E>>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let ids: Vec<Value> = ids.into_iter().map(Into::into).collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .query
            .clone()
            .where_in(&self.key_name, ids)
            .get(columns)
            .await?;
        rows.into_iter().map(hydrate).collect()
    }

    /// One page of results using the model's page size. Pages start at 1.
    pub async fn paginate(&self, page: u32, columns: &[&str]) -> Result<Paginator<E>> {
        let page = page.max(1);
        let total = self.query.count().await?;
        let rows = self
            .query
            .clone()
            .for_page(page, self.per_page)
            .get(columns)
            .await?;
        let items = rows.into_iter().map(hydrate).collect::<Result<Vec<E>>>()?;
        Ok(Paginator::new(items, total, self.per_page, page))
    }
}

impl<E: Entity> Deref for ModelQuery<E> {
    type Target = QueryBuilder;

    fn deref(&self) -> &Self::Target {
        &self.query
    }
}

fn hydrate<E: Entity>(record: Record) -> Result<E> {
    Ok(serde_json::from_value(Value::Object(record))?)
}

/// One page of a paginated query.
#[derive(Debug, Clone, Serialize)]
pub struct Paginator<E> {
    pub items: Vec<E>,
    pub total: u64,
    pub per_page: u32,
    pub current_page: u32,
    pub last_page: u32,
}

impl<E> Paginator<E> {
    pub fn new(items: Vec<E>, total: u64, per_page: u32, current_page: u32) -> Self {
        let last_page = if per_page == 0 {
            1
        } else {
            u32::try_from(total.div_ceil(u64::from(per_page)).max(1)).unwrap_or(u32::MAX)
        };
        Paginator {
            items,
            total,
            per_page,
            current_page,
            last_page,
        }
    }

    pub fn has_more_pages(&self) -> bool {
        self.current_page < self.last_page
    }
}

impl<E: Serialize> Arrayable for Paginator<E> {
    fn to_array(&self) -> Record {
        let mut record = Record::new();
        // Items that fail to serialize are reported as `null`.
        let data = serde_json::to_value(&self.items).unwrap_or_else(|e| {
            error!("Failed to serialize page items: {}", e);
            Value::Null
        });
        record.insert("data".to_string(), data);
        record.insert("total".to_string(), Value::from(self.total));
        record.insert("per_page".to_string(), Value::from(self.per_page));
        record.insert("current_page".to_string(), Value::from(self.current_page));
        record.insert("last_page".to_string(), Value::from(self.last_page));
        record
    }
}
