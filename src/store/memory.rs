use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::errors::SyncError;
use crate::item_type::BaseItemType;
use crate::items::{ItemKey, LookupItem};
use crate::store::{FeedEntry, GuardedWrite, LookupStore, StoreMutation};
use crate::types::ContentHash;

#[derive(Debug, Default)]
struct MemoryState {
    items: BTreeMap<ItemKey, LookupItem>,
    feed: BTreeMap<u64, StoreMutation>,
    next_sequence: u64,
}

/// In-memory lookup store for tests and single-process runs.
///
/// Items and the change feed share one lock, so a transaction and its feed
/// entries become visible together.
#[derive(Debug, Default)]
pub struct InMemoryLookupStore {
    state: RwLock<MemoryState>,
}

impl InMemoryLookupStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored items.
    pub fn len(&self) -> usize {
        self.state.read().map(|state| state.items.len()).unwrap_or(0)
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, MemoryState>, SyncError> {
        self.state
            .read()
            .map_err(|_| SyncError::Store("lookup items lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryState>, SyncError> {
        self.state
            .write()
            .map_err(|_| SyncError::Store("lookup items lock poisoned".into()))
    }
}

impl LookupStore for InMemoryLookupStore {
    fn get(&self, key: &ItemKey) -> Result<Option<LookupItem>, SyncError> {
        Ok(self.read()?.items.get(key).cloned())
    }

    fn batch_get_hashes(
        &self,
        keys: &[ItemKey],
    ) -> Result<HashMap<ItemKey, ContentHash>, SyncError> {
        let state = self.read()?;
        Ok(keys
            .iter()
            .filter_map(|key| {
                state
                    .items
                    .get(key)
                    .map(|item| (key.clone(), item.content_hash().to_string()))
            })
            .collect())
    }

    fn query_base_type(
        &self,
        firm_reference: &str,
        base: BaseItemType,
    ) -> Result<Vec<LookupItem>, SyncError> {
        let state = self.read()?;
        let prefix = base.prefix();
        let start = ItemKey::new(firm_reference, prefix.clone());
        Ok(state
            .items
            .range(start..)
            .take_while(|(key, _)| {
                key.firm_reference == firm_reference && key.item_type.starts_with(&prefix)
            })
            .filter(|(_, item)| item.body().base_type() == base)
            .map(|(_, item)| item.clone())
            .collect())
    }

    fn transact(&self, writes: &[GuardedWrite]) -> Result<Vec<StoreMutation>, SyncError> {
        let mut state = self.write()?;
        for write in writes {
            let current = state.items.get(&write.item.key());
            write.check(current.map(LookupItem::content_hash))?;
        }
        let mut mutations = Vec::with_capacity(writes.len());
        for write in writes {
            let old_image = state.items.insert(write.item.key(), write.item.clone());
            let mutation = StoreMutation::committed(old_image, write.item.clone());
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            state.feed.insert(sequence, mutation.clone());
            mutations.push(mutation);
        }
        Ok(mutations)
    }

    fn pending_feed(&self, limit: usize) -> Result<Vec<FeedEntry>, SyncError> {
        Ok(self
            .read()?
            .feed
            .iter()
            .take(limit)
            .map(|(sequence, mutation)| FeedEntry {
                sequence: *sequence,
                mutation: mutation.clone(),
            })
            .collect())
    }

    fn ack_feed(&self, sequence: u64) -> Result<(), SyncError> {
        self.write()?.feed.remove(&sequence);
        Ok(())
    }
}
