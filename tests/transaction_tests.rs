/// Transaction Propagation Tests
///
/// Nesting, commit invalidation and rollback through `Context` and repositories
/// Run with: cargo test --test transaction_tests

use docloader::prelude::*;
use docloader::{MemoryStore, StoreOps, WriteMode, Payload};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Account {
    id: String,
    balance: i64,
}

fn accounts() -> Repository<Account> {
    Repository::new(
        "Account",
        DocumentSchema::new()
            .field("id", FieldType::String)
            .field("balance", FieldType::Integer),
    )
}

async fn setup() -> (Arc<MemoryStore>, Client) {
    let store = Arc::new(MemoryStore::new());
    let rows = [("a", 100), ("b", 0), ("c", 7)]
        .into_iter()
        .map(|(id, balance)| {
            Payload::new(
                Key::new("Account", id),
                json!({ "balance": balance }).as_object().cloned().unwrap(),
            )
        })
        .collect();
    store.write(WriteMode::Save, rows).await.unwrap();
    store.reset_stats();
    (store.clone(), Client::new(store))
}

async fn transfer(ctx: &Context, from: &str, to: &str, amount: i64) -> Result<()> {
    transactional(ctx, |tx| async move {
        let repo = accounts();
        let mut source = repo.get_required(&tx, from).await?;
        let mut target = repo.get_required(&tx, to).await?;
        if source.balance < amount {
            return Err(Error::NonFatal(format!("insufficient funds in {from}")));
        }
        source.balance -= amount;
        target.balance += amount;
        repo.update_many(&tx, vec![source, target]).await?;
        Ok(())
    })
    .await
}

#[tokio::test]
async fn test_nested_transfers_share_one_transaction() {
    let (store, client) = setup().await;
    let ctx = client.context();

    ctx.transactional(|tx| async move {
        transfer(&tx, "a", "b", 30).await?;
        transfer(&tx, "b", "c", 10).await?;
        Ok::<_, Error>(())
    })
    .await
    .unwrap();

    let stats = store.stats();
    assert_eq!(stats.transactions_begun, 1);
    assert_eq!(stats.transactions_committed, 1);

    let repo = accounts();
    let balances: Vec<i64> = repo
        .get_many(&client.context(), &["a", "b", "c"])
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.unwrap().balance)
        .collect();
    assert_eq!(balances, vec![70, 20, 17]);
}

#[tokio::test]
async fn test_inner_failure_rolls_back_everything() {
    let (store, client) = setup().await;
    let ctx = client.context();

    let result = ctx
        .transactional(|tx| async move {
            transfer(&tx, "a", "b", 30).await?;
            transfer(&tx, "c", "a", 1_000).await?;
            Ok::<_, Error>(())
        })
        .await;

    assert!(matches!(result, Err(Error::NonFatal(ref m)) if m == "insufficient funds in c"));
    let stats = store.stats();
    assert_eq!(stats.transactions_begun, 1);
    assert_eq!(stats.transactions_rolled_back, 1);
    assert_eq!(stats.transactions_committed, 0);

    let a = accounts().get_required(&client.context(), "a").await.unwrap();
    assert_eq!(a.balance, 100);
}

#[tokio::test]
async fn test_commit_invalidates_parent_cache() {
    let (store, client) = setup().await;
    let ctx = client.context();
    let repo = accounts();

    repo.get_many(&ctx, &["a", "c"]).await.unwrap();
    transfer(&ctx, "a", "b", 5).await.unwrap();
    store.reset_stats();

    let after = repo.get_many(&ctx, &["a", "c"]).await.unwrap();
    assert_eq!(after[0].as_ref().unwrap().balance, 95);
    assert_eq!(after[1].as_ref().unwrap().balance, 7);

    let stats = store.stats();
    assert_eq!(stats.get_calls, 1);
    assert_eq!(stats.get_batches[0].len(), 2);
}

#[tokio::test]
async fn test_rollback_returns_original_error() {
    #[derive(Debug)]
    enum AppError {
        Store(StoreError),
        Rejected(&'static str),
    }

    impl From<StoreError> for AppError {
        fn from(err: StoreError) -> Self {
            Self::Store(err)
        }
    }

    impl ErrorClass for AppError {}

    impl std::fmt::Display for AppError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Self::Store(err) => write!(f, "{err}"),
                Self::Rejected(why) => write!(f, "rejected: {why}"),
            }
        }
    }

    let (store, client) = setup().await;
    let ctx = client.context();

    let result: std::result::Result<(), AppError> = ctx
        .transactional(|tx| async move {
            tx.loader()
                .delete(vec![Key::new("Account", "a")])
                .await
                .map_err(|_| AppError::Rejected("delete"))?;
            Err(AppError::Rejected("policy"))
        })
        .await;

    assert!(matches!(result, Err(AppError::Rejected("policy"))));
    assert_eq!(store.stats().transactions_rolled_back, 1);
    assert!(store.peek(&Key::new("Account", "a")).await.is_some());
}

#[tokio::test]
async fn test_concurrent_commit_conflict_aborts() {
    let (store, client) = setup().await;
    let first = client.context();
    let second = client.context();

    let result = first
        .transactional(|tx| {
            let second = second.clone();
            async move {
                let repo = accounts();
                let mut a = repo.get_required(&tx, "a").await?;
                transfer(&second, "a", "c", 50).await?;
                a.balance += 1;
                repo.update(&tx, a).await?;
                Ok::<_, Error>(())
            }
        })
        .await;

    assert!(matches!(result, Err(Error::Store(StoreError::Aborted(_)))));
    let stored = store.peek(&Key::new("Account", "a")).await.unwrap();
    assert_eq!(stored["balance"], json!(50));
}
