use crate::core::{Document, StoreError, StoreResult};
use std::collections::HashMap;
use tokio::sync::watch;

/// Memoized outcome of one lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEntry {
    Found(Document),
    NotFound,
    Failed(StoreError),
}

impl CacheEntry {
    pub fn into_result(self) -> StoreResult<Option<Document>> {
        match self {
            Self::Found(doc) => Ok(Some(doc)),
            Self::NotFound => Ok(None),
            Self::Failed(err) => Err(err),
        }
    }
}

pub(crate) type EntrySender = watch::Sender<Option<CacheEntry>>;
pub(crate) type EntryReceiver = watch::Receiver<Option<CacheEntry>>;

pub(crate) enum Slot {
    Ready(CacheEntry),
    /// A lookup is queued or in flight. `ticket` identifies the request so a
    /// late answer never overwrites a slot that was cleared or primed since.
    Pending { ticket: u64, rx: EntryReceiver },
}

/// Per-loader cache keyed by `Key::cache_key`.
#[derive(Default)]
pub(crate) struct Cache {
    slots: HashMap<String, Slot>,
    next_ticket: u64,
}

impl Cache {
    pub fn get(&self, cache_key: &str) -> Option<&Slot> {
        self.slots.get(cache_key)
    }

    /// Registers a pending lookup and returns its ticket and sender.
    pub fn reserve(&mut self, cache_key: String) -> (u64, EntrySender, EntryReceiver) {
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let (tx, rx) = watch::channel(None);
        self.slots.insert(
            cache_key,
            Slot::Pending {
                ticket,
                rx: rx.clone(),
            },
        );
        (ticket, tx, rx)
    }

    /// Stores the answer for `ticket` if the slot still belongs to it.
    pub fn fulfil(&mut self, cache_key: &str, ticket: u64, entry: CacheEntry) {
        if let Some(slot) = self.slots.get_mut(cache_key) {
            if matches!(slot, Slot::Pending { ticket: t, .. } if *t == ticket) {
                *slot = Slot::Ready(entry);
            }
        }
    }

    /// Inserts `entry` unless the key already has a slot.
    pub fn prime(&mut self, cache_key: String, entry: CacheEntry) {
        self.slots.entry(cache_key).or_insert(Slot::Ready(entry));
    }

    pub fn clear(&mut self, cache_key: &str) {
        self.slots.remove(cache_key);
    }

    pub fn clear_all(&mut self) {
        self.slots.clear();
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_answer_does_not_overwrite_primed_value() {
        let mut cache = Cache::default();
        let (ticket, _tx, _rx) = cache.reserve("k".into());

        cache.clear("k");
        cache.prime("k".into(), CacheEntry::NotFound);
        cache.fulfil("k", ticket, CacheEntry::Failed(StoreError::Internal("late".into())));

        assert!(matches!(cache.get("k"), Some(Slot::Ready(CacheEntry::NotFound))));
    }

    #[test]
    fn test_prime_keeps_existing_entry() {
        let mut cache = Cache::default();
        cache.prime("k".into(), CacheEntry::NotFound);
        cache.prime("k".into(), CacheEntry::Found(Document::new()));

        assert!(matches!(cache.get("k"), Some(Slot::Ready(CacheEntry::NotFound))));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_fulfil_matching_ticket() {
        let mut cache = Cache::default();
        let (ticket, _tx, _rx) = cache.reserve("k".into());
        cache.fulfil("k", ticket, CacheEntry::NotFound);
        assert!(matches!(cache.get("k"), Some(Slot::Ready(CacheEntry::NotFound))));
    }
}
