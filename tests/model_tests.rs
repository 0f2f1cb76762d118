use keystone::connection::{Connection, DatabaseManager, SqliteConnection};
use keystone::model::{Entity, Model, Paginator};
use keystone::{ALL_COLUMNS, Arrayable, Error, Record};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
struct UserProfile {
    id: i64,
    name: String,
    email: Option<String>,
}

impl Entity for UserProfile {}

#[derive(Debug, Deserialize)]
struct Person {
    #[allow(dead_code)]
    id: i64,
}

impl Entity for Person {
    const TABLE: Option<&'static str> = Some("people");
    const PER_PAGE: u32 = 2;
}

fn record(value: serde_json::Value) -> Record {
    match value {
        serde_json::Value::Object(map) => map,
        _ => panic!("expected an object"),
    }
}

async fn setup() -> Arc<DatabaseManager> {
    let conn = SqliteConnection::connect("sqlite", "sqlite::memory:").await.unwrap();
    conn.statement(
        "CREATE TABLE user_profile (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL, email TEXT)",
    )
    .await
    .unwrap();
    let mut manager = DatabaseManager::new("sqlite");
    manager.add_connection("sqlite", Arc::new(conn));
    Arc::new(manager)
}

// ========== configuration ==========

#[test]
fn test_table_name_derived_from_type() {
    let users = Model::<UserProfile>::new();
    assert_eq!(users.table(), "user_profile");
    assert_eq!(users.key_name(), "id");
    assert_eq!(users.per_page(), 15);
}

#[test]
fn test_explicit_table_and_overrides() {
    let mut people = Model::<Person>::new();
    assert_eq!(people.table_name(), "people");
    assert_eq!(people.per_page(), 2);

    people.set_table("humans");
    people.set_per_page(50);
    assert_eq!(people.table(), "humans");
    assert_eq!(people.per_page(), 50);
}

#[tokio::test]
async fn test_missing_resolver_is_an_error() {
    let users = Model::<UserProfile>::new();
    assert!(users.connection_resolver().is_none());
    assert!(matches!(users.connection(), Err(Error::ResolverNotSet)));
    assert!(matches!(users.all(ALL_COLUMNS).await, Err(Error::ResolverNotSet)));
}

#[tokio::test]
async fn test_unset_connection_resolver() {
    let db = setup().await;
    let mut users = db.model::<UserProfile>();
    assert!(users.connection().is_ok());

    users.unset_connection_resolver();
    assert!(matches!(users.new_query(), Err(Error::ResolverNotSet)));

    users.set_connection_resolver(db.clone());
    assert_eq!(users.connection().unwrap().name(), "sqlite");
}

#[tokio::test]
async fn test_unknown_connection_name() {
    let db = setup().await;
    let mut users = db.model::<UserProfile>();
    users.set_connection(Some("archive"));
    assert_eq!(users.connection_name(), Some("archive"));
    assert!(matches!(users.connection(), Err(Error::UnknownConnection(name)) if name == "archive"));
}

// ========== CRUD against SQLite ==========

#[tokio::test]
async fn test_insert_find_and_all() {
    let db = setup().await;
    let users = db.model::<UserProfile>();

    let alice = users.insert(&record(json!({"name": "Alice"}))).await.unwrap();
    let bob = users
        .insert(&record(json!({"name": "Bob", "email": "bob@example.com"})))
        .await
        .unwrap();
    assert_eq!((alice, bob), (1, 2));

    let found = users.find(bob, ALL_COLUMNS).await.unwrap().unwrap();
    assert_eq!(
        found,
        UserProfile {
            id: 2,
            name: "Bob".into(),
            email: Some("bob@example.com".into()),
        }
    );
    assert!(users.find(99, ALL_COLUMNS).await.unwrap().is_none());

    let all = users.all(ALL_COLUMNS).await.unwrap();
    let names: Vec<String> = all.into_iter().map(|u| u.name).collect();
    assert_eq!(names, vec!["Alice", "Bob"]);
}

#[tokio::test]
async fn test_find_many() {
    let db = setup().await;
    let users = db.model::<UserProfile>();
    for name in ["a", "b", "c"] {
        users.insert(&record(json!({ "name": name }))).await.unwrap();
    }

    let some = users.find_many([1, 3, 42], ALL_COLUMNS).await.unwrap();
    let ids: Vec<i64> = some.iter().map(|u| u.id).collect();
    assert_eq!(ids, vec![1, 3]);

    let none = users.find_many(Vec::<i64>::new(), ALL_COLUMNS).await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_update_and_delete() {
    let db = setup().await;
    let users = db.model::<UserProfile>();
    let id = users.insert(&record(json!({"name": "Alice"}))).await.unwrap();

    let affected = users
        .update(id, &record(json!({"name": "Alicia", "email": "a@example.com"})))
        .await
        .unwrap();
    assert_eq!(affected, 1);
    let updated = users.find(id, ALL_COLUMNS).await.unwrap().unwrap();
    assert_eq!(updated.name, "Alicia");
    assert_eq!(updated.email.as_deref(), Some("a@example.com"));

    assert_eq!(users.update(99, &record(json!({"name": "x"}))).await.unwrap(), 0);

    assert!(users.delete(id).await.unwrap());
    assert!(users.find(id, ALL_COLUMNS).await.unwrap().is_none());
    // Reports success even when nothing matched.
    assert!(users.delete(id).await.unwrap());
}

#[tokio::test]
async fn test_query_chain_and_columns() {
    let db = setup().await;
    let users = db.model::<UserProfile>();
    for (name, email) in [("Ann", Some("ann@x.io")), ("Andy", None), ("Bea", Some("bea@x.io"))] {
        users
            .insert(&record(json!({"name": name, "email": email})))
            .await
            .unwrap();
    }

    let rows = users
        .query()
        .unwrap()
        .where_op("name", "like", "A%")
        .where_not_null("email")
        .order_by_desc("id")
        .get(ALL_COLUMNS)
        .await
        .unwrap();
    let names: Vec<&str> = rows.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(names, vec!["Ann"]);

    let query = users.query().unwrap().where_null("email");
    assert_eq!(query.count().await.unwrap(), 1);
    assert_eq!(
        query.to_sql(),
        r#"select * from "user_profile" where "email" is null"#
    );

    let first = users
        .query()
        .unwrap()
        .order_by_desc("id")
        .first(ALL_COLUMNS)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.name, "Bea");
}

#[tokio::test]
async fn test_paginate() {
    let db = setup().await;
    let mut users = db.model::<UserProfile>();
    for i in 0..5 {
        users
            .insert(&record(json!({ "name": format!("user{}", i) })))
            .await
            .unwrap();
    }
    users.set_per_page(2);

    let page = users.query().unwrap().paginate(2, ALL_COLUMNS).await.unwrap();
    assert_eq!(page.total, 5);
    assert_eq!(page.per_page, 2);
    assert_eq!(page.current_page, 2);
    assert_eq!(page.last_page, 3);
    assert!(page.has_more_pages());
    let ids: Vec<i64> = page.items.iter().map(|u| u.id).collect();
    assert_eq!(ids, vec![3, 4]);

    let array = page.to_array();
    assert_eq!(array["total"], json!(5));
    assert_eq!(array["data"][0]["name"], json!("user2"));

    let last = users.query().unwrap().paginate(3, ALL_COLUMNS).await.unwrap();
    assert_eq!(last.items.len(), 1);
    assert!(!last.has_more_pages());
}

#[tokio::test]
async fn test_boolean_columns_hydrate_as_bool() {
    #[derive(Debug, Deserialize)]
    struct Flag {
        active: bool,
    }
    impl Entity for Flag {
        const TABLE: Option<&'static str> = Some("flags");
    }

    let conn = SqliteConnection::connect("sqlite", "sqlite::memory:").await.unwrap();
    conn.statement("CREATE TABLE flags (id INTEGER PRIMARY KEY, active BOOLEAN NOT NULL)")
        .await
        .unwrap();
    let mut manager = DatabaseManager::new("sqlite");
    manager.add_connection("sqlite", Arc::new(conn));
    let flags = Arc::new(manager).model::<Flag>();

    flags.insert(&record(json!({"active": true}))).await.unwrap();
    let flag = flags.find(1, ALL_COLUMNS).await.unwrap().unwrap();
    assert!(flag.active);
}

#[test]
fn test_last_page_saturates() {
    let page: Paginator<UserProfile> = Paginator::new(Vec::new(), u64::MAX, 1, 1);
    assert_eq!(page.last_page, u32::MAX);

    let empty: Paginator<UserProfile> = Paginator::new(Vec::new(), 0, 15, 1);
    assert_eq!(empty.last_page, 1);
}

struct Unserializable;

impl Serialize for Unserializable {
    fn serialize<S: serde::Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
        Err(serde::ser::Error::custom("cannot serialize"))
    }
}

#[test]
fn test_page_items_that_fail_to_serialize_become_null() {
    let page = Paginator::new(vec![Unserializable], 1, 15, 1);
    let array = page.to_array();
    assert_eq!(array["data"], serde_json::Value::Null);
    assert_eq!(array["total"], json!(1));
}
