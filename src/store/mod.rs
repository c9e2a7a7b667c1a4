//! Interface to the external document store.
//!
//! The store is a collaborator: adapters for a concrete backend implement
//! [`Datastore`] and [`StoreTransaction`]. [`memory::MemoryStore`] is the
//! in-process implementation used for tests and local development.

pub mod memory;
pub mod query;

use crate::core::{Entity, Key, Payload, StoreResult};
use async_trait::async_trait;
use std::sync::Arc;

pub use memory::{MemoryStore, StoreStats};
pub use query::{Filter, FilterOp, MoreResults, Order, Query, QueryMeta};

/// How a batched write treats documents that already exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteMode {
    /// Create or replace.
    Save,
    /// Replace; fails if the document does not exist.
    Update,
    /// Create or replace.
    Upsert,
    /// Create; fails if the document already exists.
    Insert,
}

impl WriteMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Save => "save",
            Self::Update => "update",
            Self::Upsert => "upsert",
            Self::Insert => "insert",
        }
    }
}

/// Outcome of one bulk lookup.
///
/// The store answers in no particular order. Keys that appear in none of the
/// three lists are treated as missing.
#[derive(Debug, Clone, Default)]
pub struct GetResponse {
    pub found: Vec<Entity>,
    pub missing: Vec<Key>,
    pub failed: Vec<(Key, crate::core::StoreError)>,
}

/// Operations available both on a plain connection and inside a transaction.
#[async_trait]
pub trait StoreOps: Send + Sync {
    async fn get(&self, keys: &[Key]) -> StoreResult<GetResponse>;

    async fn write(&self, mode: WriteMode, entries: Vec<Payload>) -> StoreResult<()>;

    async fn delete(&self, keys: Vec<Key>) -> StoreResult<()>;

    async fn run_query(&self, query: &Query) -> StoreResult<(Vec<Entity>, QueryMeta)>;
}

/// A top-level store connection, safe for concurrent use.
#[async_trait]
pub trait Datastore: StoreOps + 'static {
    async fn begin_transaction(&self) -> StoreResult<Arc<dyn StoreTransaction>>;
}

/// An open store transaction.
#[async_trait]
pub trait StoreTransaction: StoreOps + 'static {
    /// Opaque identifier, used for logging.
    fn id(&self) -> &str;

    async fn commit(&self) -> StoreResult<()>;

    async fn rollback(&self) -> StoreResult<()>;
}

/// Transaction handle together with the connection it was opened on.
#[derive(Clone)]
pub struct TxnHandle {
    pub store: Arc<dyn Datastore>,
    pub transaction: Arc<dyn StoreTransaction>,
}

/// What a loader talks to: either the plain connection or an open transaction.
#[derive(Clone)]
pub enum StoreHandle {
    Plain(Arc<dyn Datastore>),
    Txn(TxnHandle),
}

impl StoreHandle {
    pub fn is_transaction(&self) -> bool {
        matches!(self, Self::Txn(_))
    }

    pub fn transaction_id(&self) -> Option<&str> {
        match self {
            Self::Plain(_) => None,
            Self::Txn(handle) => Some(handle.transaction.id()),
        }
    }

    /// The underlying connection, regardless of transaction state.
    pub fn datastore(&self) -> &Arc<dyn Datastore> {
        match self {
            Self::Plain(store) => store,
            Self::Txn(handle) => &handle.store,
        }
    }

    pub async fn get(&self, keys: &[Key]) -> StoreResult<GetResponse> {
        match self {
            Self::Plain(store) => store.get(keys).await,
            Self::Txn(handle) => handle.transaction.get(keys).await,
        }
    }

    pub async fn write(&self, mode: WriteMode, entries: Vec<Payload>) -> StoreResult<()> {
        match self {
            Self::Plain(store) => store.write(mode, entries).await,
            Self::Txn(handle) => handle.transaction.write(mode, entries).await,
        }
    }

    pub async fn delete(&self, keys: Vec<Key>) -> StoreResult<()> {
        match self {
            Self::Plain(store) => store.delete(keys).await,
            Self::Txn(handle) => handle.transaction.delete(keys).await,
        }
    }

    pub async fn run_query(&self, query: &Query) -> StoreResult<(Vec<Entity>, QueryMeta)> {
        match self {
            Self::Plain(store) => store.run_query(query).await,
            Self::Txn(handle) => handle.transaction.run_query(query).await,
        }
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain(_) => f.write_str("StoreHandle::Plain"),
            Self::Txn(handle) => write!(f, "StoreHandle::Txn({})", handle.transaction.id()),
        }
    }
}
