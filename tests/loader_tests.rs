/// Batching Loader Tests
///
/// Coalescing, memoization and cache maintenance as seen through the public API
/// Run with: cargo test --test loader_tests

use docloader::{Client, Document, Key, LoaderConfig, MemoryStore, Payload, StoreError, StoreOps, WriteMode};
use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;

fn doc(value: serde_json::Value) -> Document {
    value.as_object().cloned().unwrap()
}

async fn seeded(n: usize) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let rows = (0..n)
        .map(|i| Payload::new(Key::new("Item", format!("i{i}")), doc(json!({ "n": i }))))
        .collect();
    store.write(WriteMode::Save, rows).await.unwrap();
    store.reset_stats();
    store
}

#[tokio::test]
async fn test_concurrent_gets_coalesce_into_one_call() {
    let store = seeded(5).await;
    let ctx = Client::new(store.clone()).context();

    let keys: Vec<Key> = [3, 0, 4, 1].iter().map(|i| Key::new("Item", format!("i{i}"))).collect();
    let results = join_all(keys.iter().map(|key| {
        let loader = ctx.loader().clone();
        async move { loader.get(key).await }
    }))
    .await;

    let ns: Vec<_> = results
        .into_iter()
        .map(|r| r.unwrap().unwrap()["n"].clone())
        .collect();
    assert_eq!(ns, vec![json!(3), json!(0), json!(4), json!(1)]);

    let stats = store.stats();
    assert_eq!(stats.get_calls, 1);
    assert_eq!(stats.get_batches[0].len(), 4);
}

#[tokio::test]
async fn test_repeated_keys_fetched_once() {
    let store = seeded(2).await;
    let ctx = Client::new(store.clone()).context();
    let a = Key::new("Item", "i0");

    let docs = ctx.loader().get_many(&[a.clone(), a.clone(), Key::new("Item", "nope")]).await.unwrap();
    assert_eq!(docs[0], docs[1]);
    assert!(docs[2].is_none());

    ctx.loader().get(&a).await.unwrap();
    let stats = store.stats();
    assert_eq!(stats.get_calls, 1);
    assert_eq!(stats.get_batches[0].len(), 2);
}

#[tokio::test]
async fn test_batches_split_at_max_batch_size() {
    let store = seeded(7).await;
    let config = LoaderConfig::new().max_batch_size(3);
    let ctx = Client::with_config(store.clone(), config).unwrap().context();

    let keys: Vec<Key> = (0..7).map(|i| Key::new("Item", format!("i{i}"))).collect();
    let docs = ctx.loader().get_many(&keys).await.unwrap();
    assert!(docs.iter().all(Option::is_some));

    let sizes: Vec<usize> = store.stats().get_batches.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![3, 3, 1]);
}

#[tokio::test]
async fn test_failed_key_is_isolated() {
    let store = seeded(2).await;
    store.fail_key(Key::new("Item", "i1"), StoreError::Unavailable("replica lag".into()));
    let ctx = Client::new(store.clone()).context();

    let results = ctx
        .loader()
        .try_get_many(&[Key::new("Item", "i0"), Key::new("Item", "i1")])
        .await;

    assert!(matches!(results[0], Ok(Some(_))));
    assert!(matches!(results[1], Err(StoreError::Unavailable(_))));
}

#[tokio::test]
async fn test_writes_update_cache_and_deletes_clear_it() {
    let store = seeded(1).await;
    let ctx = Client::new(store.clone()).context();
    let key = Key::new("Item", "i0");

    ctx.loader()
        .upsert(vec![Payload::new(key.clone(), doc(json!({"n": 42})))])
        .await
        .unwrap();
    assert_eq!(ctx.loader().get(&key).await.unwrap().unwrap()["n"], json!(42));
    assert_eq!(store.stats().get_calls, 0);

    ctx.loader().delete(vec![key.clone()]).await.unwrap();
    assert!(ctx.loader().get(&key).await.unwrap().is_none());
    assert_eq!(store.stats().get_calls, 1);
}

#[tokio::test]
async fn test_failed_write_surfaces_whole_call() {
    let store = seeded(0).await;
    store.fail_next_write(StoreError::Unavailable("down".into()));
    let ctx = Client::new(store.clone()).context();

    let result = ctx
        .loader()
        .save(vec![Payload::new(Key::new("Item", "x"), Document::new())])
        .await;

    assert!(matches!(result, Err(docloader::Error::Store(StoreError::Unavailable(_)))));
    assert!(store.is_empty().await);
}
