use keystone::connection::{Connection, DatabaseManager};
use keystone::model::{Entity, Model};
use keystone::query::{Grammar, Processor, SqliteGrammar, SqliteProcessor};
use keystone::{ALL_COLUMNS, QueryBuilder, Record, Result};
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

/// Captures every statement instead of talking to a database.
struct RecordingConnection {
    statements: Mutex<Vec<(String, Vec<Value>)>>,
    rows: Vec<Record>,
    affected: u64,
}

impl RecordingConnection {
    fn new(affected: u64) -> Self {
        RecordingConnection {
            statements: Mutex::new(Vec::new()),
            rows: Vec::new(),
            affected,
        }
    }

    fn with_rows(mut self, rows: Vec<Value>) -> Self {
        self.rows = rows
            .into_iter()
            .filter_map(|v| v.as_object().cloned())
            .collect();
        self
    }

    fn record(&self, sql: &str, bindings: &[Value]) {
        self.statements
            .lock()
            .unwrap()
            .push((sql.to_string(), bindings.to_vec()));
    }

    fn statements(&self) -> Vec<(String, Vec<Value>)> {
        self.statements.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Connection for RecordingConnection {
    fn name(&self) -> &str {
        "recording"
    }

    fn query_grammar(&self) -> Arc<dyn Grammar> {
        Arc::new(SqliteGrammar)
    }

    fn post_processor(&self) -> Arc<dyn Processor> {
        Arc::new(SqliteProcessor)
    }

    async fn select(&self, sql: &str, bindings: &[Value]) -> Result<Vec<Record>> {
        self.record(sql, bindings);
        Ok(self.rows.clone())
    }

    async fn insert_get_id(&self, sql: &str, bindings: &[Value]) -> Result<i64> {
        self.record(sql, bindings);
        Ok(42)
    }

    async fn affecting_statement(&self, sql: &str, bindings: &[Value]) -> Result<u64> {
        self.record(sql, bindings);
        Ok(self.affected)
    }

    async fn statement(&self, sql: &str) -> Result<()> {
        self.record(sql, &[]);
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct UserProfile {
    id: i64,
    name: String,
}

impl Entity for UserProfile {}

#[derive(Debug, Deserialize)]
struct Token {
    #[allow(dead_code)]
    uuid: String,
}

impl Entity for Token {
    const PRIMARY_KEY: &'static str = "uuid";
    const CONNECTION: Option<&'static str> = Some("recording");
}

fn model_on<E: Entity>(conn: Arc<RecordingConnection>) -> Model<E> {
    let mut manager = DatabaseManager::new("recording");
    manager.add_connection("recording", conn);
    Arc::new(manager).model::<E>()
}

fn builder() -> QueryBuilder {
    QueryBuilder::for_connection(Arc::new(RecordingConnection::new(0))).from("users")
}

fn record(value: Value) -> Record {
    value.as_object().cloned().unwrap_or_default()
}

// ========== model statements ==========

#[tokio::test]
async fn test_update_issues_exactly_one_statement() {
    let conn = Arc::new(RecordingConnection::new(1));
    let users = model_on::<UserProfile>(conn.clone());

    let affected = users.update(7, &record(json!({"name": "x"}))).await.unwrap();
    assert_eq!(affected, 1);
    assert_eq!(
        conn.statements(),
        vec![(
            r#"update "user_profile" set "name" = ? where "id" = ?"#.to_string(),
            vec![json!("x"), json!(7)],
        )]
    );
}

#[tokio::test]
async fn test_delete_reports_true_even_when_nothing_matched() {
    let conn = Arc::new(RecordingConnection::new(0));
    let users = model_on::<UserProfile>(conn.clone());

    assert!(users.delete(7).await.unwrap());
    assert_eq!(
        conn.statements(),
        vec![(
            r#"delete from "user_profile" where "id" = ?"#.to_string(),
            vec![json!(7)],
        )]
    );
}

#[tokio::test]
async fn test_find_and_insert_statements() {
    let conn = Arc::new(
        RecordingConnection::new(0).with_rows(vec![json!({"id": 3, "name": "Cy"})]),
    );
    let users = model_on::<UserProfile>(conn.clone());

    let user = users.find(3, &["id", "name"]).await.unwrap().unwrap();
    assert_eq!((user.id, user.name.as_str()), (3, "Cy"));

    let id = users.insert(&record(json!({"name": "Dee"}))).await.unwrap();
    assert_eq!(id, 42);

    let statements = conn.statements();
    assert_eq!(
        statements[0].0,
        r#"select "id", "name" from "user_profile" where "id" = ? limit 1"#
    );
    assert_eq!(
        statements[1],
        (
            r#"insert into "user_profile" ("name") values (?)"#.to_string(),
            vec![json!("Dee")],
        )
    );
}

#[tokio::test]
async fn test_find_many_with_no_ids_runs_no_query() {
    let conn = Arc::new(RecordingConnection::new(0));
    let users = model_on::<UserProfile>(conn.clone());

    let found = users.find_many(Vec::<i64>::new(), ALL_COLUMNS).await.unwrap();
    assert!(found.is_empty());
    assert!(conn.statements().is_empty());
}

#[tokio::test]
async fn test_custom_primary_key_and_connection() {
    let conn = Arc::new(RecordingConnection::new(1));
    let tokens = model_on::<Token>(conn.clone());
    assert_eq!(tokens.table(), "token");

    tokens.find_many(["a", "b"], ALL_COLUMNS).await.unwrap();
    tokens.delete("a").await.unwrap();
    let statements = conn.statements();
    assert_eq!(
        statements[0],
        (
            r#"select * from "token" where "uuid" in (?, ?)"#.to_string(),
            vec![json!("a"), json!("b")],
        )
    );
    assert_eq!(statements[1].0, r#"delete from "token" where "uuid" = ?"#);
}

#[tokio::test]
async fn test_every_helper_builds_a_fresh_query() {
    let conn = Arc::new(RecordingConnection::new(1));
    let users = model_on::<UserProfile>(conn.clone());

    users.update(1, &record(json!({"name": "a"}))).await.unwrap();
    users.update(2, &record(json!({"name": "b"}))).await.unwrap();
    let statements = conn.statements();
    assert_eq!(statements[0].0, statements[1].0);
    assert_eq!(statements[1].1, vec![json!("b"), json!(2)]);
}

// ========== grammar ==========

#[test]
fn test_compile_select_with_everything() {
    let query = builder()
        .select(&["id", "users.name as display"])
        .where_eq("active", true)
        .or_where("age", ">", 30)
        .where_in("role", ["admin", "staff"])
        .order_by_desc("id")
        .limit(10)
        .offset(20);
    assert_eq!(
        query.to_sql(),
        r#"select "id", "users"."name" as "display" from "users" where "active" = ? or "age" > ? and "role" in (?, ?) order by "id" desc limit 10 offset 20"#
    );
    assert_eq!(
        query.bindings(),
        vec![json!(true), json!(30), json!("admin"), json!("staff")]
    );
}

#[test]
fn test_unknown_operator_becomes_the_value() {
    let query = builder().where_op("name", "Alice", Value::Null);
    assert_eq!(query.to_sql(), r#"select * from "users" where "name" = ?"#);
    assert_eq!(query.bindings(), vec![json!("Alice")]);
}

#[test]
fn test_empty_in_lists() {
    let never = builder().where_in("id", Vec::<i64>::new());
    assert_eq!(never.to_sql(), r#"select * from "users" where 0 = 1"#);
    let always = builder().where_not_in("id", Vec::<i64>::new());
    assert_eq!(always.to_sql(), r#"select * from "users" where 1 = 1"#);
}

#[test]
fn test_sqlite_offset_without_limit() {
    assert_eq!(
        builder().offset(5).to_sql(),
        r#"select * from "users" limit -1 offset 5"#
    );
    assert_eq!(
        builder().for_page(3, 10).to_sql(),
        r#"select * from "users" limit 10 offset 20"#
    );
}

#[test]
fn test_compile_count_update_delete_and_empty_insert() {
    let query = builder().where_eq("id", 1);
    let grammar = SqliteGrammar;
    assert_eq!(
        grammar.compile_count(&query),
        r#"select count(*) as aggregate from "users" where "id" = ?"#
    );
    assert_eq!(
        grammar.compile_update(&query, &record(json!({"name": "x"}))),
        r#"update "users" set "name" = ? where "id" = ?"#
    );
    assert_eq!(
        grammar.compile_delete(&query),
        r#"delete from "users" where "id" = ?"#
    );
    assert_eq!(
        grammar.compile_insert(&query, &Record::new()),
        r#"insert into "users" default values"#
    );
}

#[test]
fn test_identifier_quotes_are_escaped() {
    assert_eq!(SqliteGrammar.wrap(r#"we"ird"#), r#""we""ird""#);
    assert_eq!(SqliteGrammar.wrap("users.*"), r#""users".*"#);
}

#[tokio::test]
async fn test_count_reads_aggregate_column() {
    let conn = Arc::new(RecordingConnection::new(0).with_rows(vec![json!({"aggregate": 7})]));
    let query = QueryBuilder::for_connection(conn.clone()).from("users");
    assert_eq!(query.count().await.unwrap(), 7);
    assert_eq!(
        conn.statements()[0].0,
        r#"select count(*) as aggregate from "users""#
    );
}

#[tokio::test]
async fn test_base_builder_keeps_model_key() {
    let conn = Arc::new(RecordingConnection::new(0));
    let tokens = model_on::<Token>(conn.clone());

    let base = tokens.query().unwrap().into_base();
    assert_eq!(base.key_name(), "uuid");
    base.find("a", ALL_COLUMNS).await.unwrap();
    base.find_many(["b"], ALL_COLUMNS).await.unwrap();

    let statements = conn.statements();
    assert_eq!(
        statements[0].0,
        r#"select * from "token" where "uuid" = ? limit 1"#
    );
    assert_eq!(statements[1].0, r#"select * from "token" where "uuid" in (?)"#);
}

#[test]
fn test_plain_builder_finds_by_id() {
    let query = builder();
    assert_eq!(query.key_name(), "id");
    assert_eq!(query.with_key_name("code").key_name(), "code");
}
