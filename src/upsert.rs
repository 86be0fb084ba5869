//! Hash-guarded idempotent upserts.
//!
//! The stored content hash doubles as the optimistic-concurrency token: an
//! insert is guarded by "key absent", an update by "hash still equals what was
//! read". Unchanged items are never written, so replaying the same input
//! produces no mutations.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::constants::sync::DEFAULT_TRANSACTION_LIMIT;
use crate::errors::SyncError;
use crate::items::{ItemKey, LookupItem};
use crate::store::{GuardedWrite, LookupStore, MutationKind, StoreMutation};

/// What to do when another writer wins a guarded write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictPolicy {
    /// Log and count the conflict; the other writer's data stands.
    #[default]
    Swallow,
    /// Return `ConditionFailed` to the caller.
    Reject,
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictPolicy::Swallow => f.write_str("swallow"),
            ConflictPolicy::Reject => f.write_str("reject"),
        }
    }
}

impl FromStr for ConflictPolicy {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "swallow" => Ok(ConflictPolicy::Swallow),
            "reject" => Ok(ConflictPolicy::Reject),
            other => Err(SyncError::Configuration(format!(
                "unknown conflict policy '{other}' (expected 'swallow' or 'reject')"
            ))),
        }
    }
}

/// Outcome of one [`UpsertEngine::upsert`] call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UpsertReport {
    /// New keys written.
    pub inserted: usize,
    /// Existing keys whose content changed.
    pub updated: usize,
    /// Items whose stored hash already matched.
    pub unchanged: usize,
    /// Items dropped because a guarded transaction lost a race.
    pub conflicted: usize,
    /// Committed mutations, in commit order.
    pub mutations: Vec<StoreMutation>,
}

impl UpsertReport {
    /// Fold another report into this one.
    pub fn merge(&mut self, other: UpsertReport) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.conflicted += other.conflicted;
        self.mutations.extend(other.mutations);
    }

    /// True when nothing was written.
    pub fn is_noop(&self) -> bool {
        self.mutations.is_empty()
    }
}

/// Writes items through a [`LookupStore`] in bounded guarded transactions.
#[derive(Clone)]
pub struct UpsertEngine {
    store: Arc<dyn LookupStore>,
    transaction_limit: usize,
    conflict_policy: ConflictPolicy,
}

impl fmt::Debug for UpsertEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpsertEngine")
            .field("transaction_limit", &self.transaction_limit)
            .field("conflict_policy", &self.conflict_policy)
            .finish()
    }
}

impl UpsertEngine {
    /// Engine with the default transaction limit and conflict policy.
    pub fn new(store: Arc<dyn LookupStore>) -> Self {
        Self {
            store,
            transaction_limit: DEFAULT_TRANSACTION_LIMIT,
            conflict_policy: ConflictPolicy::default(),
        }
    }

    /// Cap the number of writes per transaction (at least one).
    pub fn with_transaction_limit(mut self, limit: usize) -> Self {
        self.transaction_limit = limit.max(1);
        self
    }

    /// Set the conflict policy.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Underlying store.
    pub fn store(&self) -> &Arc<dyn LookupStore> {
        &self.store
    }

    /// Upsert `items`, returning counts and the committed mutations.
    ///
    /// When the same key appears more than once, the last item wins. Each
    /// chunk of up to `transaction_limit` writes commits atomically.
    pub fn upsert(&self, items: Vec<LookupItem>) -> Result<UpsertReport, SyncError> {
        let mut latest: IndexMap<ItemKey, LookupItem> = IndexMap::with_capacity(items.len());
        for item in items {
            latest.insert(item.key(), item);
        }
        let items: Vec<LookupItem> = latest.into_values().collect();

        let mut report = UpsertReport::default();
        for chunk in items.chunks(self.transaction_limit) {
            report.merge(self.upsert_chunk(chunk)?);
        }
        if !report.is_noop() || report.conflicted > 0 {
            info!(
                inserted = report.inserted,
                updated = report.updated,
                unchanged = report.unchanged,
                conflicted = report.conflicted,
                "upsert complete"
            );
        }
        Ok(report)
    }

    fn upsert_chunk(&self, chunk: &[LookupItem]) -> Result<UpsertReport, SyncError> {
        let keys: Vec<ItemKey> = chunk.iter().map(LookupItem::key).collect();
        let stored = self.store.batch_get_hashes(&keys)?;

        let mut report = UpsertReport::default();
        let mut writes = Vec::with_capacity(chunk.len());
        for (item, key) in chunk.iter().zip(&keys) {
            match stored.get(key) {
                None => writes.push(GuardedWrite::insert(item.clone())),
                Some(hash) if hash == item.content_hash() => report.unchanged += 1,
                Some(hash) => writes.push(GuardedWrite::update(item.clone(), hash.clone())),
            }
        }
        if writes.is_empty() {
            return Ok(report);
        }

        match self.store.transact(&writes) {
            Ok(mutations) => {
                for mutation in &mutations {
                    match mutation.kind {
                        MutationKind::Insert => report.inserted += 1,
                        MutationKind::Modify => report.updated += 1,
                        MutationKind::Remove => {}
                    }
                }
                report.mutations = mutations;
                Ok(report)
            }
            Err(err @ SyncError::ConditionFailed { .. }) => match self.conflict_policy {
                ConflictPolicy::Swallow => {
                    debug!(error = %err, writes = writes.len(), "guarded write lost a race");
                    report.conflicted += writes.len();
                    Ok(report)
                }
                ConflictPolicy::Reject => Err(err),
            },
            Err(err) => Err(err),
        }
    }
}
