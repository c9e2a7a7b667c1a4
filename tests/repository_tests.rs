/// Repository Tests
///
/// Schema validation, index exclusions and batched persistence end to end
/// Run with: cargo test --test repository_tests

use docloader::prelude::*;
use docloader::{MemoryStore, StoreOps};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Product {
    id: String,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    price: Option<f64>,
    attributes: Value,
}

fn products() -> Repository<Product> {
    let schema = DocumentSchema::from_json_schema(
        r#"{
            "type": "object",
            "properties": {
                "id": {"type": "string"},
                "name": {"type": "string"},
                "price": {"type": "number"},
                "attributes": {"type": "object"}
            },
            "required": ["id", "name", "attributes"]
        }"#,
    )
    .unwrap();

    let index: IndexSpec = serde_json::from_value(json!({
        "name": true,
        "attributes": {"a": true, "b": {"c": true}}
    }))
    .unwrap();

    Repository::new("Product", schema)
        .with_options(RepositoryOptions::new().index(index))
        .unwrap()
}

fn product(id: &str, attributes: Value) -> Product {
    Product {
        id: id.to_string(),
        name: format!("Product {id}"),
        price: Some(9.5),
        attributes,
    }
}

fn setup() -> (Arc<MemoryStore>, Client) {
    let store = Arc::new(MemoryStore::new());
    (store.clone(), Client::new(store))
}

#[tokio::test]
async fn test_exclusions_follow_document_shape() {
    let (store, client) = setup();
    let ctx = client.context();

    products()
        .save(&ctx, product("p1", json!({"a": {"x": 1}, "b": {"c": 2, "d": 3}, "e": 4})))
        .await
        .unwrap();

    let key = Key::new("Product", "p1");
    let excluded = store.stats().exclusions[&key].clone();
    assert!(excluded.contains("attributes.b.d"));
    assert!(excluded.contains("attributes.e"));
    assert!(excluded.contains("price"));
    assert!(!excluded.contains("attributes.a"));
    assert!(!excluded.contains("attributes.a.x"));
    assert!(!excluded.contains("attributes.b.c"));
    assert!(!excluded.contains("name"));

    // Same repository, different shape: exclusions are recomputed.
    products()
        .save(&ctx, product("p1", json!({"tags": ["x"]})))
        .await
        .unwrap();
    let excluded = store.stats().exclusions[&key].clone();
    assert!(excluded.contains("attributes.tags[]"));
    assert!(!excluded.contains("attributes.b.d"));
}

#[tokio::test]
async fn test_missing_required_field_never_reaches_store() {
    let (store, client) = setup();
    let ctx = client.context();
    let repo: Repository<Value> = Repository::new("Product", products().schema().clone());

    let result = repo
        .insert_many(
            &ctx,
            vec![
                json!({"id": "ok", "name": "fine", "attributes": {}}),
                json!({"id": "bad", "attributes": {}}),
            ],
        )
        .await;

    match result {
        Err(Error::Save(err)) => {
            assert_eq!(err.id, "bad");
            assert_eq!(err.errors.len(), 1);
            assert_eq!(err.errors[0].path, "name");
        }
        other => panic!("expected SaveError, got {other:?}"),
    }
    assert_eq!(store.stats().write_calls, 0);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_insert_existing_fails_whole_call() {
    let (store, client) = setup();
    let ctx = client.context();
    let repo = products();
    repo.insert(&ctx, product("p1", json!({}))).await.unwrap();

    let result = repo
        .insert_many(&ctx, vec![product("p2", json!({})), product("p1", json!({}))])
        .await;

    assert!(matches!(result, Err(Error::Store(StoreError::AlreadyExists(_)))));
    assert!(store.peek(&Key::new("Product", "p2")).await.is_none());
}

#[tokio::test]
async fn test_reads_validate_and_report_every_field() {
    let (store, client) = setup();
    store
        .write(
            docloader::WriteMode::Save,
            vec![docloader::Payload::new(
                Key::new("Product", "broken"),
                json!({"name": 1, "price": "cheap"}).as_object().cloned().unwrap(),
            )],
        )
        .await
        .unwrap();

    let err = products()
        .get(&client.context(), "broken")
        .await
        .unwrap_err();

    let Error::Load(LoadError::Invalid { errors, .. }) = err else {
        panic!("expected invalid load");
    };
    let mut paths: Vec<String> = errors.into_iter().map(|e| e.path).collect();
    paths.sort();
    assert_eq!(paths, vec!["attributes", "name", "price"]);
}

#[tokio::test]
async fn test_query_pages_through_results() {
    let (store, client) = setup();
    let ctx = client.context();
    let repo = products();
    let batch = (1..=5_i32)
        .map(|i| {
            let mut p = product(&format!("p{i}"), json!({}));
            p.price = Some(f64::from(i));
            p
        })
        .collect();
    repo.save_many(&ctx, batch).await.unwrap();

    let fresh = client.context();
    let query = Query::new("Product")
        .filter("price", FilterOp::Ge, 2.0)
        .order_desc("price")
        .limit(3);
    let (page, meta) = repo.query(&fresh, query.clone()).await.unwrap();
    let ids: Vec<&str> = page.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["p5", "p4", "p3"]);
    assert!(meta.has_more());

    let (rest, meta) = repo
        .query(&fresh, query.start(meta.end_cursor.unwrap()))
        .await
        .unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].id, "p2");
    assert!(!meta.has_more());

    // Query rows prime the cache.
    store.reset_stats();
    repo.get_required(&fresh, "p4").await.unwrap();
    assert_eq!(store.stats().get_calls, 0);
}

#[tokio::test]
async fn test_reindex_applies_current_policy() {
    let (store, client) = setup();
    let ctx = client.context();
    let unindexed: Repository<Product> = Repository::new("Product", products().schema().clone());
    unindexed
        .save_many(&ctx, vec![product("p1", json!({"a": 1})), product("p2", json!({"a": 2}))])
        .await
        .unwrap();
    assert!(store.stats().exclusions[&Key::new("Product", "p1")].contains("name"));

    let reindexed = products().reindex(&client.context()).await.unwrap();
    assert_eq!(reindexed.len(), 2);

    let stats = store.stats();
    for id in ["p1", "p2"] {
        let excluded = &stats.exclusions[&Key::new("Product", id)];
        assert!(!excluded.contains("name"));
        assert!(!excluded.contains("attributes.a"));
    }
}
