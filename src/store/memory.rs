use super::query::{FilterOp, MoreResults, Query, QueryMeta};
use super::{Datastore, GetResponse, StoreOps, StoreTransaction, WriteMode};
use crate::core::{Document, Entity, Key, Payload, StoreError, StoreResult};
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

/// Version assigned to keys that do not exist.
const ABSENT: u64 = 0;

#[derive(Debug, Clone)]
struct Stored {
    data: Document,
    version: u64,
}

/// Call counters kept by [`MemoryStore`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub get_calls: usize,
    /// Keys requested by each `get` call, in call order.
    pub get_batches: Vec<Vec<Key>>,
    pub write_calls: usize,
    pub entities_written: usize,
    pub delete_calls: usize,
    pub query_calls: usize,
    pub transactions_begun: usize,
    pub transactions_committed: usize,
    pub transactions_rolled_back: usize,
    /// Index exclusions sent with the most recent write of each key.
    pub exclusions: BTreeMap<Key, BTreeSet<String>>,
}

impl std::fmt::Display for StoreStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Store Stats: {} gets, {} writes ({} entities), {} deletes, {} queries, txn {}/{}/{} begun/committed/rolled back",
            self.get_calls,
            self.write_calls,
            self.entities_written,
            self.delete_calls,
            self.query_calls,
            self.transactions_begun,
            self.transactions_committed,
            self.transactions_rolled_back
        )
    }
}

#[derive(Default)]
struct Faults {
    keys: HashMap<Key, StoreError>,
    next_write: Option<StoreError>,
    next_commit: Option<StoreError>,
}

struct Inner {
    entities: RwLock<BTreeMap<Key, Stored>>,
    clock: AtomicU64,
    stats: StdMutex<StoreStats>,
    faults: StdMutex<Faults>,
}

impl Inner {
    fn next_version(&self) -> u64 {
        self.clock.fetch_add(1, AtomicOrdering::SeqCst) + 1
    }

    fn record(&self, update: impl FnOnce(&mut StoreStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            update(&mut stats);
        }
    }

    fn record_exclusions(&self, entries: &[Payload]) {
        self.record(|stats| {
            for entry in entries {
                stats
                    .exclusions
                    .insert(entry.key.clone(), entry.exclude_from_indexes.clone());
            }
        });
    }

    fn key_fault(&self, key: &Key) -> Option<StoreError> {
        self.faults
            .lock()
            .ok()
            .and_then(|faults| faults.keys.get(key).cloned())
    }

    fn take_write_fault(&self) -> Option<StoreError> {
        self.faults.lock().ok().and_then(|mut faults| faults.next_write.take())
    }

    fn take_commit_fault(&self) -> Option<StoreError> {
        self.faults.lock().ok().and_then(|mut faults| faults.next_commit.take())
    }
}

/// In-process document store.
///
/// Implements the full store contract, including transactions with optimistic
/// conflict detection, and records every call it receives.
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                entities: RwLock::new(BTreeMap::new()),
                clock: AtomicU64::new(ABSENT),
                stats: StdMutex::new(StoreStats::default()),
                faults: StdMutex::new(Faults::default()),
            }),
        }
    }

    pub fn stats(&self) -> StoreStats {
        self.inner
            .stats
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }

    pub fn reset_stats(&self) {
        self.inner.record(|stats| *stats = StoreStats::default());
    }

    /// Makes every subsequent lookup of `key` fail with `error`.
    pub fn fail_key(&self, key: Key, error: StoreError) {
        if let Ok(mut faults) = self.inner.faults.lock() {
            faults.keys.insert(key, error);
        }
    }

    /// Makes the next write or delete call fail with `error`.
    pub fn fail_next_write(&self, error: StoreError) {
        if let Ok(mut faults) = self.inner.faults.lock() {
            faults.next_write = Some(error);
        }
    }

    /// Makes the next transaction commit fail with `error`.
    pub fn fail_next_commit(&self, error: StoreError) {
        if let Ok(mut faults) = self.inner.faults.lock() {
            faults.next_commit = Some(error);
        }
    }

    pub fn clear_faults(&self) {
        if let Ok(mut faults) = self.inner.faults.lock() {
            *faults = Faults::default();
        }
    }

    /// Direct read that bypasses statistics, for assertions.
    pub async fn peek(&self, key: &Key) -> Option<Document> {
        self.inner
            .entities
            .read()
            .await
            .get(key)
            .map(|stored| stored.data.clone())
    }

    pub async fn len(&self) -> usize {
        self.inner.entities.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Checks a whole write batch before any of it is applied. Keys written
/// earlier in the same batch count as existing.
fn check_batch(
    mode: WriteMode,
    entries: &[Payload],
    exists: impl Fn(&Key) -> bool,
) -> StoreResult<()> {
    let mut seen: HashSet<&Key> = HashSet::with_capacity(entries.len());
    for entry in entries {
        let key = &entry.key;
        let exists = seen.contains(key) || exists(key);
        match mode {
            WriteMode::Update if !exists => return Err(StoreError::NotFound(key.to_string())),
            WriteMode::Insert if exists => return Err(StoreError::AlreadyExists(key.to_string())),
            _ => {}
        }
        seen.insert(key);
    }
    Ok(())
}

#[async_trait]
impl StoreOps for MemoryStore {
    async fn get(&self, keys: &[Key]) -> StoreResult<GetResponse> {
        self.inner.record(|stats| {
            stats.get_calls += 1;
            stats.get_batches.push(keys.to_vec());
        });

        let entities = self.inner.entities.read().await;
        let mut response = GetResponse::default();
        for key in keys {
            if let Some(err) = self.inner.key_fault(key) {
                response.failed.push((key.clone(), err));
                continue;
            }
            match entities.get(key) {
                Some(stored) => response
                    .found
                    .push(Entity::new(key.clone(), stored.data.clone())),
                None => response.missing.push(key.clone()),
            }
        }
        Ok(response)
    }

    async fn write(&self, mode: WriteMode, entries: Vec<Payload>) -> StoreResult<()> {
        self.inner.record(|stats| {
            stats.write_calls += 1;
        });
        if let Some(err) = self.inner.take_write_fault() {
            return Err(err);
        }

        let mut entities = self.inner.entities.write().await;
        check_batch(mode, &entries, |key| entities.contains_key(key))?;

        let count = entries.len();
        self.inner.record_exclusions(&entries);
        for entry in entries {
            let version = self.inner.next_version();
            entities.insert(
                entry.key,
                Stored {
                    data: entry.data,
                    version,
                },
            );
        }
        self.inner.record(|stats| stats.entities_written += count);
        Ok(())
    }

    async fn delete(&self, keys: Vec<Key>) -> StoreResult<()> {
        self.inner.record(|stats| stats.delete_calls += 1);
        if let Some(err) = self.inner.take_write_fault() {
            return Err(err);
        }

        let mut entities = self.inner.entities.write().await;
        for key in &keys {
            entities.remove(key);
        }
        Ok(())
    }

    async fn run_query(&self, query: &Query) -> StoreResult<(Vec<Entity>, QueryMeta)> {
        self.inner.record(|stats| stats.query_calls += 1);
        let entities = self.inner.entities.read().await;
        let rows = entities
            .iter()
            .filter(|(key, _)| key.kind() == query.kind)
            .map(|(key, stored)| Entity::new(key.clone(), stored.data.clone()));
        execute_query(query, rows.collect())
    }
}

#[async_trait]
impl Datastore for MemoryStore {
    async fn begin_transaction(&self) -> StoreResult<Arc<dyn StoreTransaction>> {
        self.inner.record(|stats| stats.transactions_begun += 1);
        let transaction = MemoryTransaction {
            id: Uuid::new_v4().to_string(),
            inner: Arc::clone(&self.inner),
            state: Mutex::new(TxnState {
                active: true,
                writes: BTreeMap::new(),
                observed: HashMap::new(),
            }),
        };
        debug!("memory store: began transaction {}", transaction.id);
        Ok(Arc::new(transaction))
    }
}

struct TxnState {
    active: bool,
    /// Buffered mutations; `None` marks a delete.
    writes: BTreeMap<Key, Option<Document>>,
    /// Committed version of every key this transaction depends on.
    observed: HashMap<Key, u64>,
}

impl TxnState {
    fn ensure_active(&self, id: &str) -> StoreResult<()> {
        if self.active {
            Ok(())
        } else {
            Err(StoreError::TransactionClosed(id.to_string()))
        }
    }

    fn observe(&mut self, key: &Key, committed: &BTreeMap<Key, Stored>) {
        if !self.writes.contains_key(key) {
            self.observed
                .entry(key.clone())
                .or_insert_with(|| committed.get(key).map_or(ABSENT, |s| s.version));
        }
    }

    fn exists(&self, key: &Key, committed: &BTreeMap<Key, Stored>) -> bool {
        match self.writes.get(key) {
            Some(buffered) => buffered.is_some(),
            None => committed.contains_key(key),
        }
    }
}

/// Transaction over a [`MemoryStore`].
///
/// Mutations are buffered and applied on commit. Reads see the transaction's
/// own buffered writes. Commit fails with [`StoreError::Aborted`] if any key
/// the transaction read or wrote was changed by someone else after it was
/// first touched.
pub struct MemoryTransaction {
    id: String,
    inner: Arc<Inner>,
    state: Mutex<TxnState>,
}

#[async_trait]
impl StoreOps for MemoryTransaction {
    async fn get(&self, keys: &[Key]) -> StoreResult<GetResponse> {
        self.inner.record(|stats| {
            stats.get_calls += 1;
            stats.get_batches.push(keys.to_vec());
        });

        let mut state = self.state.lock().await;
        state.ensure_active(&self.id)?;
        let committed = self.inner.entities.read().await;

        let mut response = GetResponse::default();
        for key in keys {
            if let Some(err) = self.inner.key_fault(key) {
                response.failed.push((key.clone(), err));
                continue;
            }
            state.observe(key, &committed);
            let data = match state.writes.get(key) {
                Some(buffered) => buffered.clone(),
                None => committed.get(key).map(|stored| stored.data.clone()),
            };
            match data {
                Some(data) => response.found.push(Entity::new(key.clone(), data)),
                None => response.missing.push(key.clone()),
            }
        }
        Ok(response)
    }

    async fn write(&self, mode: WriteMode, entries: Vec<Payload>) -> StoreResult<()> {
        self.inner.record(|stats| stats.write_calls += 1);
        if let Some(err) = self.inner.take_write_fault() {
            return Err(err);
        }

        let mut state = self.state.lock().await;
        state.ensure_active(&self.id)?;
        let committed = self.inner.entities.read().await;

        check_batch(mode, &entries, |key| state.exists(key, &committed))?;
        let count = entries.len();
        self.inner.record_exclusions(&entries);
        for entry in entries {
            state.observe(&entry.key, &committed);
            state.writes.insert(entry.key, Some(entry.data));
        }
        self.inner.record(|stats| stats.entities_written += count);
        Ok(())
    }

    async fn delete(&self, keys: Vec<Key>) -> StoreResult<()> {
        self.inner.record(|stats| stats.delete_calls += 1);
        if let Some(err) = self.inner.take_write_fault() {
            return Err(err);
        }

        let mut state = self.state.lock().await;
        state.ensure_active(&self.id)?;
        let committed = self.inner.entities.read().await;
        for key in keys {
            state.observe(&key, &committed);
            state.writes.insert(key, None);
        }
        Ok(())
    }

    async fn run_query(&self, query: &Query) -> StoreResult<(Vec<Entity>, QueryMeta)> {
        self.inner.record(|stats| stats.query_calls += 1);

        let state = self.state.lock().await;
        state.ensure_active(&self.id)?;
        let committed = self.inner.entities.read().await;

        let mut view: BTreeMap<&Key, &Document> = committed
            .iter()
            .filter(|(key, _)| key.kind() == query.kind)
            .map(|(key, stored)| (key, &stored.data))
            .collect();
        for (key, buffered) in &state.writes {
            if key.kind() != query.kind {
                continue;
            }
            match buffered {
                Some(data) => {
                    view.insert(key, data);
                }
                None => {
                    view.remove(key);
                }
            }
        }

        let rows = view
            .into_iter()
            .map(|(key, data)| Entity::new(key.clone(), data.clone()))
            .collect();
        execute_query(query, rows)
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    fn id(&self) -> &str {
        &self.id
    }

    async fn commit(&self) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.ensure_active(&self.id)?;
        if let Some(err) = self.inner.take_commit_fault() {
            return Err(err);
        }

        let mut committed = self.inner.entities.write().await;
        let conflict = state
            .observed
            .iter()
            .find(|(key, seen)| {
                committed.get(*key).map_or(ABSENT, |stored| stored.version) != **seen
            })
            .map(|(key, _)| key.clone());
        if let Some(key) = conflict {
            state.active = false;
            return Err(StoreError::Aborted(format!(
                "'{}' was modified concurrently",
                key
            )));
        }

        let writes = std::mem::take(&mut state.writes);
        for (key, buffered) in writes {
            match buffered {
                Some(data) => {
                    let version = self.inner.next_version();
                    committed.insert(key, Stored { data, version });
                }
                None => {
                    committed.remove(&key);
                }
            }
        }
        state.active = false;
        self.inner.record(|stats| stats.transactions_committed += 1);
        Ok(())
    }

    async fn rollback(&self) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.ensure_active(&self.id)?;
        state.active = false;
        state.writes.clear();
        self.inner.record(|stats| stats.transactions_rolled_back += 1);
        Ok(())
    }
}

// ============================================================================
// Query evaluation
// ============================================================================

fn execute_query(query: &Query, mut rows: Vec<Entity>) -> StoreResult<(Vec<Entity>, QueryMeta)> {
    for filter in &query.filters {
        if filter.property.is_empty() {
            return Err(StoreError::InvalidQuery("filter property cannot be empty".into()));
        }
    }

    rows.retain(|row| {
        query
            .ancestor
            .as_ref()
            .is_none_or(|ancestor| row.key.has_ancestor(ancestor))
            && query.filters.iter().all(|filter| {
            lookup(&row.data, &filter.property)
                .is_some_and(|value| matches_filter(value, filter.op, &filter.value))
        })
    });

    if !query.orders.is_empty() {
        rows.sort_by(|a, b| {
            for order in &query.orders {
                let ordering = compare_total(
                    lookup(&a.data, &order.property),
                    lookup(&b.data, &order.property),
                );
                let ordering = if order.descending {
                    ordering.reverse()
                } else {
                    ordering
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            a.key.cmp(&b.key)
        });
    }

    let start = match &query.start_cursor {
        Some(cursor) => cursor
            .parse::<usize>()
            .map_err(|_| StoreError::InvalidQuery(format!("invalid cursor '{}'", cursor)))?,
        None => 0,
    };
    let begin = start.saturating_add(query.offset).min(rows.len());
    let end = match query.limit {
        Some(limit) => begin.saturating_add(limit).min(rows.len()),
        None => rows.len(),
    };
    let more_results = if end < rows.len() {
        MoreResults::MoreResultsAfterLimit
    } else {
        MoreResults::NoMoreResults
    };

    let mut page: Vec<Entity> = rows.drain(begin..end).collect();
    if query.keys_only {
        for row in &mut page {
            row.data = Document::new();
        }
    }

    Ok((
        page,
        QueryMeta {
            end_cursor: Some(end.to_string()),
            more_results,
        },
    ))
}

fn lookup<'a>(data: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = data.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn matches_filter(value: &Value, op: FilterOp, expected: &Value) -> bool {
    let Some(ordering) = compare_same_type(value, expected) else {
        return false;
    };
    match op {
        FilterOp::Eq => ordering == Ordering::Equal,
        FilterOp::Lt => ordering == Ordering::Less,
        FilterOp::Le => ordering != Ordering::Greater,
        FilterOp::Gt => ordering == Ordering::Greater,
        FilterOp::Ge => ordering != Ordering::Less,
    }
}

fn compare_same_type(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => {
            (a == b).then_some(Ordering::Equal)
        }
        _ => None,
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None => 0,
        Some(Value::Null) => 1,
        Some(Value::Bool(_)) => 2,
        Some(Value::Number(_)) => 3,
        Some(Value::String(_)) => 4,
        Some(Value::Array(_)) => 5,
        Some(Value::Object(_)) => 6,
    }
}

fn compare_total(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => compare_same_type(x, y)
            .unwrap_or_else(|| type_rank(a).cmp(&type_rank(b))),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}
