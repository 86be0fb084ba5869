//! Iterator index: ordered listing of stored keys per base item type, fed by
//! change events.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::constants::item_types::SUFFIX_SEPARATOR;
use crate::errors::SyncError;
use crate::item_type::{BaseItemType, ItemType};
use crate::messages::ChangeEvent;

/// One listing entry derived from a change event.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IteratorEntry {
    /// Listing the entry belongs to.
    pub iterator_type: BaseItemType,
    /// `firmReference`, or `firmReference-suffix` for relationship types.
    pub sort_key: String,
}

impl IteratorEntry {
    /// Decompose the event's item type into a listing entry.
    pub fn from_event(event: &ChangeEvent) -> Result<Self, SyncError> {
        let item_type = ItemType::parse(&event.item_type)?;
        let sort_key = match item_type.suffix() {
            Some(suffix) => format!("{}{SUFFIX_SEPARATOR}{suffix}", event.firm_reference),
            None => event.firm_reference.clone(),
        };
        Ok(Self {
            iterator_type: item_type.base(),
            sort_key,
        })
    }
}

/// In-memory ordered listings keyed by base item type.
#[derive(Debug, Default)]
pub struct InMemoryIteratorIndex {
    entries: RwLock<BTreeMap<BaseItemType, BTreeSet<String>>>,
}

impl InMemoryIteratorIndex {
    /// Empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the entry for `event`; repeated events are no-ops.
    ///
    /// Returns `true` when the entry was new.
    pub fn apply(&self, event: &ChangeEvent) -> Result<bool, SyncError> {
        let entry = IteratorEntry::from_event(event)?;
        let mut entries = self
            .entries
            .write()
            .map_err(|_| SyncError::Store("iterator index lock poisoned".into()))?;
        Ok(entries
            .entry(entry.iterator_type)
            .or_default()
            .insert(entry.sort_key))
    }

    /// Sort keys of one listing, ascending.
    pub fn list(&self, iterator_type: BaseItemType) -> Result<Vec<String>, SyncError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| SyncError::Store("iterator index lock poisoned".into()))?;
        Ok(entries
            .get(&iterator_type)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default())
    }
}
