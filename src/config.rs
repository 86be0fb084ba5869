use std::path::PathBuf;
use std::str::FromStr;

use crate::constants::env;
use crate::constants::sync::{DEFAULT_BLOCK_SIZE, DEFAULT_TRANSACTION_LIMIT};
use crate::errors::SyncError;
use crate::store::SqliteLookupStore;
use crate::upsert::ConflictPolicy;

/// Top-level synchronizer configuration.
///
/// Threaded explicitly through constructors; nothing reads the environment
/// after [`SyncConfig::from_env`] returns.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncConfig {
    /// Maximum guarded writes per store transaction.
    pub transaction_limit: usize,
    /// Line groups per block when splitting an extract.
    pub block_size: usize,
    /// What to do when a guarded write loses a race.
    pub conflict_policy: ConflictPolicy,
    /// Path of the SQLite lookup store.
    pub store_path: PathBuf,
    /// JSON-lines file receiving change events and triggers, if any.
    pub outbox_path: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            transaction_limit: DEFAULT_TRANSACTION_LIMIT,
            block_size: DEFAULT_BLOCK_SIZE,
            conflict_policy: ConflictPolicy::Swallow,
            store_path: SqliteLookupStore::default_path(),
            outbox_path: None,
        }
    }
}

impl SyncConfig {
    /// Load settings from the process environment.
    ///
    /// `REGSYNC_STORE_PATH` is required; the rest fall back to defaults.
    pub fn from_env() -> Result<Self, SyncError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load settings through `lookup`, which maps a variable name to its value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SyncError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let store_path = lookup(env::STORE_PATH)
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| {
                SyncError::Configuration(format!("{} must be set", env::STORE_PATH))
            })?;
        let config = Self {
            transaction_limit: parse_setting(&lookup, env::TRANSACTION_LIMIT)?
                .unwrap_or(defaults.transaction_limit),
            block_size: parse_setting(&lookup, env::BLOCK_SIZE)?.unwrap_or(defaults.block_size),
            conflict_policy: parse_setting(&lookup, env::CONFLICT_POLICY)?
                .unwrap_or(defaults.conflict_policy),
            store_path,
            outbox_path: lookup(env::OUTBOX_PATH)
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no run can use.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.transaction_limit == 0 {
            return Err(SyncError::Configuration(
                "transaction_limit must be greater than zero".into(),
            ));
        }
        if self.block_size == 0 {
            return Err(SyncError::Configuration(
                "block_size must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn parse_setting<T, F>(lookup: &F, name: &str) -> Result<Option<T>, SyncError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|err| SyncError::Configuration(format!("{name}='{raw}': {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = SyncConfig::default();
        assert_eq!(config.transaction_limit, 10);
        assert_eq!(config.block_size, 1000);
        assert_eq!(config.conflict_policy, ConflictPolicy::Swallow);
        assert_eq!(
            config.store_path,
            PathBuf::from(".regsync").join("lookup.sqlite3")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_store_path_fails_fast() {
        let err = SyncConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(
            err,
            SyncError::Configuration(ref msg) if msg.contains("REGSYNC_STORE_PATH")
        ));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = SyncConfig::from_lookup(lookup_from(&[
            ("REGSYNC_STORE_PATH", "/tmp/lookup.sqlite3"),
            ("REGSYNC_OUTBOX_PATH", "/tmp/out.jsonl"),
            ("REGSYNC_TRANSACTION_LIMIT", "25"),
            ("REGSYNC_BLOCK_SIZE", " 50 "),
            ("REGSYNC_CONFLICT_POLICY", "reject"),
        ]))
        .unwrap();
        assert_eq!(config.transaction_limit, 25);
        assert_eq!(config.block_size, 50);
        assert_eq!(config.conflict_policy, ConflictPolicy::Reject);
        assert_eq!(config.outbox_path, Some(PathBuf::from("/tmp/out.jsonl")));
    }

    #[test]
    fn bad_numbers_and_zero_sizes_are_rejected() {
        let err = SyncConfig::from_lookup(lookup_from(&[
            ("REGSYNC_STORE_PATH", "x"),
            ("REGSYNC_BLOCK_SIZE", "many"),
        ]))
        .unwrap_err();
        assert!(matches!(err, SyncError::Configuration(ref msg) if msg.contains("REGSYNC_BLOCK_SIZE")));

        let err = SyncConfig::from_lookup(lookup_from(&[
            ("REGSYNC_STORE_PATH", "x"),
            ("REGSYNC_TRANSACTION_LIMIT", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
    }
}
