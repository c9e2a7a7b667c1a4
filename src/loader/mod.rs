//! Request-scoped batching loader.
//!
//! Point reads issued before the pending batch is dispatched are coalesced
//! into a single store lookup. Every answer (including "not found" and
//! failures) is memoized for the loader's lifetime, and writes prime the cache
//! so a read that follows a write on the same loader needs no round trip.

mod cache;
pub mod config;

pub use cache::CacheEntry;
pub use config::LoaderConfig;

use crate::core::{Document, Entity, Error, ErrorClass, Key, Payload, Result, StoreError, StoreResult};
use crate::store::{Datastore, Query, QueryMeta, StoreHandle, WriteMode};
use cache::{Cache, EntryReceiver, EntrySender, Slot};
use futures::future::{join_all, try_join_all};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

struct Queued {
    key: Key,
    cache_key: String,
    ticket: u64,
    tx: EntrySender,
}

#[derive(Default)]
struct LoaderState {
    cache: Cache,
    queue: Vec<Queued>,
    dispatch_scheduled: bool,
}

struct LoaderInner {
    handle: StoreHandle,
    config: LoaderConfig,
    state: Mutex<LoaderState>,
    /// Request-level loader this transaction-bound loader was derived from.
    parent: Option<BatchingLoader>,
}

enum Waiter {
    Ready(CacheEntry),
    Pending { key: Key, rx: EntryReceiver },
}

/// Coalescing, caching access layer over a [`StoreHandle`].
///
/// Cloning is cheap and shares the cache; that is how concurrent repository
/// calls made for the same request end up in the same batch.
#[derive(Clone)]
pub struct BatchingLoader {
    inner: Arc<LoaderInner>,
}

impl BatchingLoader {
    /// Loader over a plain store connection.
    pub fn new(store: Arc<dyn Datastore>, config: LoaderConfig) -> Self {
        Self::with_handle(StoreHandle::Plain(store), config, None)
    }

    pub(crate) fn with_handle(
        handle: StoreHandle,
        config: LoaderConfig,
        parent: Option<BatchingLoader>,
    ) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                handle,
                config,
                state: Mutex::new(LoaderState::default()),
                parent,
            }),
        }
    }

    pub fn handle(&self) -> &StoreHandle {
        &self.inner.handle
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }

    pub fn parent(&self) -> Option<&BatchingLoader> {
        self.inner.parent.as_ref()
    }

    pub fn is_transactional(&self) -> bool {
        self.inner.handle.is_transaction()
    }

    pub fn transaction_id(&self) -> Option<&str> {
        self.inner.handle.transaction_id()
    }

    /// Number of cached or in-flight keys.
    pub fn cached_len(&self) -> usize {
        self.state().cache.len()
    }

    fn state(&self) -> MutexGuard<'_, LoaderState> {
        // The cache only memoizes store answers; a poisoned guard is still usable.
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    pub async fn get(&self, key: &Key) -> Result<Option<Document>> {
        let mut results = self.get_many(std::slice::from_ref(key)).await?;
        Ok(results.pop().flatten())
    }

    /// One result per input key, in input order. Fails with the first failed
    /// key's error.
    pub async fn get_many(&self, keys: &[Key]) -> Result<Vec<Option<Document>>> {
        self.try_get_many(keys)
            .await
            .into_iter()
            .map(|result| result.map_err(Error::from))
            .collect()
    }

    /// One outcome per input key, in input order. A failure for one key does
    /// not affect the others.
    pub async fn try_get_many(&self, keys: &[Key]) -> Vec<StoreResult<Option<Document>>> {
        let waiters = self.enqueue(keys);
        join_all(waiters.into_iter().map(Self::resolve)).await
    }

    fn enqueue(&self, keys: &[Key]) -> Vec<Waiter> {
        let mut waiters = Vec::with_capacity(keys.len());
        let schedule = {
            let mut state = self.state();
            for key in keys {
                let cache_key = key.cache_key();
                match state.cache.get(&cache_key) {
                    Some(Slot::Ready(entry)) => waiters.push(Waiter::Ready(entry.clone())),
                    Some(Slot::Pending { rx, .. }) => waiters.push(Waiter::Pending {
                        key: key.clone(),
                        rx: rx.clone(),
                    }),
                    None => {
                        let (ticket, tx, rx) = state.cache.reserve(cache_key.clone());
                        state.queue.push(Queued {
                            key: key.clone(),
                            cache_key,
                            ticket,
                            tx,
                        });
                        waiters.push(Waiter::Pending {
                            key: key.clone(),
                            rx,
                        });
                    }
                }
            }

            let schedule = !state.queue.is_empty() && !state.dispatch_scheduled;
            if schedule {
                state.dispatch_scheduled = true;
            }
            schedule
        };

        if schedule {
            let loader = self.clone();
            tokio::spawn(async move {
                // Let every caller that is already runnable join this batch.
                tokio::task::yield_now().await;
                loader.dispatch().await;
            });
        }
        waiters
    }

    async fn resolve(waiter: Waiter) -> StoreResult<Option<Document>> {
        match waiter {
            Waiter::Ready(entry) => entry.into_result(),
            Waiter::Pending { key, mut rx } => {
                let entry = rx
                    .wait_for(Option::is_some)
                    .await
                    .map(|value| value.clone())
                    .map_err(|_| StoreError::BatchDropped(key.to_string()))?;
                match entry {
                    Some(entry) => entry.into_result(),
                    None => Err(StoreError::BatchDropped(key.to_string())),
                }
            }
        }
    }

    async fn dispatch(&self) {
        let queued = {
            let mut state = self.state();
            state.dispatch_scheduled = false;
            std::mem::take(&mut state.queue)
        };
        if queued.is_empty() {
            return;
        }

        let batches: Vec<Vec<Key>> = queued
            .chunks(self.inner.config.max_batch_size.max(1))
            .map(|chunk| chunk.iter().map(|q| q.key.clone()).collect())
            .collect();
        debug!(
            keys = queued.len(),
            batches = batches.len(),
            transaction = self.transaction_id().unwrap_or("-"),
            "dispatching lookup batch"
        );

        let responses = join_all(batches.iter().map(|keys| self.inner.handle.get(keys))).await;

        let mut answers: HashMap<String, CacheEntry> = HashMap::with_capacity(queued.len());
        for (keys, response) in batches.iter().zip(responses) {
            match response {
                Ok(response) => {
                    for entity in response.found {
                        answers.insert(entity.key.cache_key(), CacheEntry::Found(entity.data));
                    }
                    for key in response.missing {
                        answers.insert(key.cache_key(), CacheEntry::NotFound);
                    }
                    for (key, err) in response.failed {
                        answers.insert(key.cache_key(), CacheEntry::Failed(err));
                    }
                }
                Err(err) => {
                    warn!(keys = keys.len(), error = %err, "lookup batch failed");
                    for key in keys {
                        answers.insert(key.cache_key(), CacheEntry::Failed(err.clone()));
                    }
                }
            }
        }

        let mut state = self.state();
        for item in queued {
            let entry = answers
                .get(&item.cache_key)
                .cloned()
                .unwrap_or(CacheEntry::NotFound);
            state.cache.fulfil(&item.cache_key, item.ticket, entry.clone());
            item.tx.send_replace(Some(entry));
        }
    }

    // ------------------------------------------------------------------------
    // Cache hooks
    // ------------------------------------------------------------------------

    /// Caches `doc` for `key` unless the key already has an entry.
    pub fn prime(&self, key: &Key, doc: Document) {
        self.state()
            .cache
            .prime(key.cache_key(), CacheEntry::Found(doc));
    }

    pub fn clear(&self, key: &Key) {
        self.state().cache.clear(&key.cache_key());
    }

    pub fn clear_all(&self) {
        self.state().cache.clear_all();
    }

    fn replace(&self, entries: &[Payload]) {
        let mut state = self.state();
        for entry in entries {
            let cache_key = entry.key.cache_key();
            state.cache.clear(&cache_key);
            state
                .cache
                .prime(cache_key, CacheEntry::Found(entry.data.clone()));
        }
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    pub async fn save(&self, entries: Vec<Payload>) -> Result<()> {
        self.write(WriteMode::Save, entries).await
    }

    pub async fn update(&self, entries: Vec<Payload>) -> Result<()> {
        self.write(WriteMode::Update, entries).await
    }

    pub async fn upsert(&self, entries: Vec<Payload>) -> Result<()> {
        self.write(WriteMode::Upsert, entries).await
    }

    pub async fn insert(&self, entries: Vec<Payload>) -> Result<()> {
        self.write(WriteMode::Insert, entries).await
    }

    /// Issues `entries` in concurrent chunks, then replaces each written key's
    /// cache entry with the new data.
    pub async fn write(&self, mode: WriteMode, entries: Vec<Payload>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let chunk_size = self.inner.config.write_chunk_size.max(1);
        debug!(
            mode = mode.as_str(),
            entities = entries.len(),
            transaction = self.transaction_id().unwrap_or("-"),
            "writing batch"
        );
        try_join_all(
            entries
                .chunks(chunk_size)
                .map(|chunk| self.inner.handle.write(mode, chunk.to_vec())),
        )
        .await?;

        self.replace(&entries);
        Ok(())
    }

    /// Deletes `keys` in concurrent chunks and forgets them.
    ///
    /// A transaction-bound loader also clears the keys from its parent's
    /// cache right away, before the transaction's outcome is known.
    pub async fn delete(&self, keys: Vec<Key>) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }

        let chunk_size = self.inner.config.write_chunk_size.max(1);
        try_join_all(
            keys.chunks(chunk_size)
                .map(|chunk| self.inner.handle.delete(chunk.to_vec())),
        )
        .await?;

        for key in &keys {
            self.clear(key);
            if let Some(parent) = &self.inner.parent {
                parent.clear(key);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Runs `query` directly against the store and primes the cache with every
    /// returned document.
    pub async fn run_query(&self, query: &Query) -> Result<(Vec<Entity>, QueryMeta)> {
        let (entities, meta) = self.inner.handle.run_query(query).await?;
        if !query.keys_only {
            let mut state = self.state();
            for entity in &entities {
                state
                    .cache
                    .prime(entity.key.cache_key(), CacheEntry::Found(entity.data.clone()));
            }
        }
        Ok((entities, meta))
    }

    // ------------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------------

    /// Runs `op` with a loader bound to a transaction.
    ///
    /// A loader that is already transaction-bound passes itself. Otherwise a
    /// new transaction is opened, committed when `op` succeeds and rolled back
    /// when it fails.
    pub async fn in_transaction<F, Fut, T, E>(&self, op: F) -> std::result::Result<T, E>
    where
        F: FnOnce(BatchingLoader) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<StoreError> + ErrorClass + std::fmt::Display,
    {
        if self.is_transactional() {
            return op(self.clone()).await;
        }
        crate::transaction::execute(self, op).await
    }
}

impl std::fmt::Debug for BatchingLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchingLoader")
            .field("handle", &self.inner.handle)
            .field("config", &self.inner.config)
            .finish()
    }
}
