//! Lookup store interface and backends.
//!
//! Ownership model:
//! - `LookupStore` is the keyed item store the upsert engine writes through.
//! - Writes are grouped into guarded transactions: every guard is checked and
//!   every write applied atomically, or nothing changes.
//! - A committed transaction returns the `StoreMutation`s it produced and, in
//!   the same atomic step, appends them to the store's change feed.
//! - Feed entries stay pending until acknowledged, so a publisher that fails
//!   partway re-reads them on the next round.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::derived::REGISTERED_STATUS_CODE;
use crate::errors::SyncError;
use crate::item_type::BaseItemType;
use crate::items::{FirmAuthorisation, ItemKey, LookupItem};
use crate::types::{ContentHash, FirmReference};

/// In-memory backend.
pub mod memory;
/// SQLite backend.
pub mod sqlite;

pub use memory::InMemoryLookupStore;
pub use sqlite::SqliteLookupStore;

/// Precondition attached to a single write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteGuard {
    /// The key must not exist yet.
    NotExists,
    /// The stored item's hash must still equal the observed hash.
    HashEquals(ContentHash),
}

/// Put of one item, conditioned on a guard.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardedWrite {
    /// Item to store.
    pub item: LookupItem,
    /// Condition checked inside the transaction.
    pub guard: WriteGuard,
}

impl GuardedWrite {
    /// Insert that fails if another writer created the key first.
    pub fn insert(item: LookupItem) -> Self {
        Self {
            item,
            guard: WriteGuard::NotExists,
        }
    }

    /// Update that fails if the stored hash moved since it was read.
    pub fn update(item: LookupItem, observed: ContentHash) -> Self {
        Self {
            item,
            guard: WriteGuard::HashEquals(observed),
        }
    }

    pub(crate) fn check(&self, current: Option<&str>) -> Result<(), SyncError> {
        let satisfied = match (&self.guard, current) {
            (WriteGuard::NotExists, None) => true,
            (WriteGuard::HashEquals(expected), Some(current)) => expected == current,
            _ => false,
        };
        if satisfied {
            Ok(())
        } else {
            Err(SyncError::ConditionFailed {
                firm_reference: self.item.firm_reference().to_string(),
                item_type: self.item.item_type().to_string(),
            })
        }
    }
}

/// Kind of a committed change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MutationKind {
    /// A new key.
    Insert,
    /// A changed item under an existing key.
    Modify,
    /// A deleted key. Stores here never delete, but feeds may carry it.
    Remove,
}

impl MutationKind {
    /// Wire name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            MutationKind::Insert => "INSERT",
            MutationKind::Modify => "MODIFY",
            MutationKind::Remove => "REMOVE",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MutationKind {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "INSERT" => Ok(MutationKind::Insert),
            "MODIFY" => Ok(MutationKind::Modify),
            "REMOVE" => Ok(MutationKind::Remove),
            other => Err(SyncError::Store(format!("unknown mutation kind '{other}'"))),
        }
    }
}

/// One committed change with before and after images.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreMutation {
    /// Kind of change.
    pub kind: MutationKind,
    /// Key that changed.
    pub key: ItemKey,
    /// Item before the change.
    pub old_image: Option<LookupItem>,
    /// Item after the change.
    pub new_image: Option<LookupItem>,
}

impl StoreMutation {
    pub(crate) fn committed(old_image: Option<LookupItem>, new_image: LookupItem) -> Self {
        let kind = if old_image.is_some() {
            MutationKind::Modify
        } else {
            MutationKind::Insert
        };
        Self {
            kind,
            key: new_image.key(),
            old_image,
            new_image: Some(new_image),
        }
    }
}

/// Change-feed entry awaiting publication.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedEntry {
    /// Position in the feed, increasing in commit order.
    pub sequence: u64,
    /// The committed change.
    pub mutation: StoreMutation,
}

/// Keyed store of lookup items.
pub trait LookupStore: Send + Sync {
    /// Fetch one item.
    fn get(&self, key: &ItemKey) -> Result<Option<LookupItem>, SyncError>;

    /// Stored hashes for whichever of `keys` exist.
    fn batch_get_hashes(
        &self,
        keys: &[ItemKey],
    ) -> Result<HashMap<ItemKey, ContentHash>, SyncError>;

    /// All items of `firm_reference` whose item type has base `base`.
    fn query_base_type(
        &self,
        firm_reference: &str,
        base: BaseItemType,
    ) -> Result<Vec<LookupItem>, SyncError>;

    /// Apply every write atomically, or none if any guard fails.
    ///
    /// The returned mutations are appended to the change feed inside the same
    /// transaction. A failed guard returns [`SyncError::ConditionFailed`]
    /// naming the key.
    fn transact(&self, writes: &[GuardedWrite]) -> Result<Vec<StoreMutation>, SyncError>;

    /// Up to `limit` unacknowledged feed entries, oldest first.
    fn pending_feed(&self, limit: usize) -> Result<Vec<FeedEntry>, SyncError>;

    /// Drop the feed entry at `sequence` once its messages are out.
    fn ack_feed(&self, sequence: u64) -> Result<(), SyncError>;

    /// The firm's authorisation record.
    fn firm_authorisation(
        &self,
        firm_reference: &str,
    ) -> Result<Option<FirmAuthorisation>, SyncError> {
        let key = ItemKey::new(firm_reference, BaseItemType::FirmAuthorisation.as_str());
        Ok(self
            .get(&key)?
            .and_then(|item| item.as_firm_authorisation().cloned()))
    }

    /// Principal of a currently registered appointment of `firm_reference`.
    fn registered_principal(
        &self,
        firm_reference: &str,
    ) -> Result<Option<FirmReference>, SyncError> {
        let items = self.query_base_type(firm_reference, BaseItemType::FirmAppointedRepresentative)?;
        Ok(items.iter().find_map(|item| {
            item.as_appointed_representative()
                .filter(|body| body.status_code == REGISTERED_STATUS_CODE)
                .map(|body| body.principal_firm_ref.clone())
        }))
    }

    /// Every appointed representative listed by the firm's principal items.
    fn appointed_representatives(
        &self,
        firm_reference: &str,
    ) -> Result<Vec<FirmReference>, SyncError> {
        let items = self.query_base_type(firm_reference, BaseItemType::FirmPrincipal)?;
        Ok(items
            .iter()
            .filter_map(|item| item.as_firm_principal())
            .map(|body| body.appointed_representative_firm_ref.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::items::{FirmAppointedRepresentative, FirmPrincipal, ItemBody};

    fn appointment(representative: &str, principal: &str, status: &str) -> [LookupItem; 2] {
        [
            LookupItem::new(
                principal,
                ItemBody::FirmPrincipal(FirmPrincipal {
                    appointed_representative_firm_ref: representative.into(),
                    status_code: status.into(),
                    status_effective_date: "2020-01-01".into(),
                }),
            )
            .unwrap(),
            LookupItem::new(
                representative,
                ItemBody::FirmAppointedRepresentative(FirmAppointedRepresentative {
                    principal_firm_ref: principal.into(),
                    status_code: status.into(),
                    status_effective_date: "2020-01-01".into(),
                }),
            )
            .unwrap(),
        ]
    }

    #[test]
    fn relationship_helpers_read_both_sides() {
        let store = InMemoryLookupStore::new();
        let writes: Vec<GuardedWrite> = appointment("Y", "P", "Registered")
            .into_iter()
            .chain(appointment("Y", "Q", "Withdrawn"))
            .chain(appointment("Z", "P", "Withdrawn"))
            .map(GuardedWrite::insert)
            .collect();
        store.transact(&writes).unwrap();

        assert_eq!(store.registered_principal("Y").unwrap().as_deref(), Some("P"));
        assert_eq!(store.registered_principal("Z").unwrap(), None);
        let mut representatives = store.appointed_representatives("P").unwrap();
        representatives.sort();
        assert_eq!(representatives, vec!["Y".to_string(), "Z".to_string()]);
        assert_eq!(store.firm_authorisation("P").unwrap(), None);
    }

    #[test]
    fn guards_match_current_state() {
        let [item, _] = appointment("Y", "P", "Registered");
        assert!(GuardedWrite::insert(item.clone()).check(None).is_ok());
        assert!(GuardedWrite::insert(item.clone()).check(Some("h")).is_err());
        let update = GuardedWrite::update(item, "h".into());
        assert!(update.check(Some("h")).is_ok());
        assert!(update.check(Some("other")).is_err());
        assert!(update.check(None).is_err());
    }

    #[test]
    fn mutation_kind_names_parse_back() {
        for kind in [MutationKind::Insert, MutationKind::Modify, MutationKind::Remove] {
            assert_eq!(kind.as_str().parse::<MutationKind>().unwrap(), kind);
        }
        assert!(matches!(
            "UPSERT".parse::<MutationKind>(),
            Err(SyncError::Store(_))
        ));
    }
}
