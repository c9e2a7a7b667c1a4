// ============================================================================
// docloader Library
// ============================================================================
//
// Request-scoped batching, caching and transaction layer over a key-addressed
// document store.
//
// ============================================================================

pub mod context;
pub mod core;
pub mod index;
pub mod loader;
pub mod prelude;
pub mod repository;
pub mod store;
pub mod transaction;

// Re-export main types for convenience
pub use context::{Context, Principal};
pub use crate::core::{
    Document, Entity, Error, ErrorClass, FieldError, Key, LoadError, Payload, Result, SaveError,
    StoreError, StoreResult,
};
pub use index::{IndexSpec, compute_exclusions, exclude_from_indexes};
pub use loader::{BatchingLoader, CacheEntry, LoaderConfig};
pub use repository::{
    DocumentSchema, FieldType, Model, PersistHook, Repository, RepositoryOptions,
};
pub use store::{
    Datastore, MemoryStore, Query, QueryMeta, StoreHandle, StoreOps, StoreTransaction, WriteMode,
};
pub use transaction::{Transaction, transactional};

use std::sync::Arc;

// ============================================================================
// Client
// ============================================================================

/// Entry point that owns the shared store handle
///
/// Create one `Client` per process and one [`Context`] per inbound request
/// or background job. Contexts never share a cache, so nothing read for one
/// request is served to another.
///
/// # Examples
///
/// ```
/// use docloader::{Client, Key, MemoryStore, Payload};
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() -> docloader::Result<()> {
/// let client = Client::new(Arc::new(MemoryStore::new()));
/// let ctx = client.context();
///
/// let key = Key::new("Greeting", "hello");
/// ctx.loader()
///     .save(vec![Payload::new(key.clone(), serde_json::Map::new())])
///     .await?;
/// assert!(ctx.loader().get(&key).await?.is_some());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    store: Arc<dyn Datastore>,
    config: LoaderConfig,
}

impl Client {
    /// Client with the default loader configuration
    pub fn new(store: Arc<dyn Datastore>) -> Self {
        Self {
            store,
            config: LoaderConfig::default(),
        }
    }

    /// Client with a custom loader configuration
    ///
    /// # Examples
    ///
    /// ```
    /// # use docloader::{Client, LoaderConfig, MemoryStore};
    /// # use std::sync::Arc;
    /// let config = LoaderConfig::new().max_batch_size(100);
    /// let client = Client::with_config(Arc::new(MemoryStore::new()), config).unwrap();
    /// assert_eq!(client.config().max_batch_size, 100);
    /// ```
    pub fn with_config(store: Arc<dyn Datastore>, config: LoaderConfig) -> Result<Self> {
        config.validate().map_err(Error::Config)?;
        Ok(Self { store, config })
    }

    /// Fresh context with its own loader and an empty property bag
    pub fn context(&self) -> Context {
        Context::new(Arc::clone(&self.store), self.config.clone())
    }

    /// Fresh context with `user` already attached
    pub fn context_for(&self, user: Principal) -> Result<Context> {
        self.context().with_user(user)
    }

    pub fn store(&self) -> &Arc<dyn Datastore> {
        &self.store
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_rejected() {
        let result = Client::with_config(
            Arc::new(MemoryStore::new()),
            LoaderConfig::new().max_batch_size(0),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_contexts_do_not_share_cache() {
        let store = Arc::new(MemoryStore::new());
        let client = Client::new(store.clone());
        let key = Key::new("Doc", "a");

        let first = client.context();
        first
            .loader()
            .save(vec![Payload::new(key.clone(), Document::new())])
            .await
            .unwrap();
        store.reset_stats();

        let second = client.context();
        assert!(second.loader().get(&key).await.unwrap().is_some());
        assert_eq!(store.stats().get_calls, 1);
        assert_eq!(second.loader().cached_len(), 1);
    }

    #[test]
    fn test_context_for_attaches_user() {
        let client = Client::new(Arc::new(MemoryStore::new()));
        let ctx = client.context_for(Principal::new("u1")).unwrap();
        assert_eq!(ctx.user().map(|u| u.id.as_str()), Some("u1"));
        assert!(client.context().user().is_none());
    }
}
