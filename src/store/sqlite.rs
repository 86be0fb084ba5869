use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use tracing::debug;

use crate::constants::store::{
    BITCODE_PREFIX, DEFAULT_STORE_DIR, DEFAULT_STORE_FILENAME, ITEM_RECORD_VERSION,
};
use crate::errors::SyncError;
use crate::item_type::BaseItemType;
use crate::items::{ItemKey, LookupItem};
use crate::store::{FeedEntry, GuardedWrite, LookupStore, MutationKind, StoreMutation};
use crate::types::ContentHash;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS lookup_items (
    firm_reference TEXT NOT NULL,
    item_type TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    payload BLOB NOT NULL,
    PRIMARY KEY (firm_reference, item_type)
);
CREATE TABLE IF NOT EXISTS change_feed (
    sequence INTEGER PRIMARY KEY AUTOINCREMENT,
    kind TEXT NOT NULL,
    firm_reference TEXT NOT NULL,
    item_type TEXT NOT NULL,
    old_payload BLOB,
    new_payload BLOB
);";

/// File-backed lookup store on SQLite.
///
/// Guarded transactions run under `BEGIN IMMEDIATE`, so guard checks and
/// writes are serialized against other processes sharing the file.
pub struct SqliteLookupStore {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl fmt::Debug for SqliteLookupStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteLookupStore")
            .field("path", &self.path)
            .finish()
    }
}

impl SqliteLookupStore {
    /// Open (or create) a store at `path`. A directory gets the default filename.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, SyncError> {
        let path = coerce_store_path(path.into());
        ensure_parent_dir(&path)?;
        let conn = Connection::open(&path).map_err(map_sqlite_err)?;
        conn.execute_batch(SCHEMA).map_err(map_sqlite_err)?;
        debug!(path = %path.display(), "lookup store opened");
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// Default store file, `.regsync/lookup.sqlite3` under the working directory.
    pub fn default_path() -> PathBuf {
        Path::new(DEFAULT_STORE_DIR).join(DEFAULT_STORE_FILENAME)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_conn<T>(
        &self,
        func: impl FnOnce(&mut Connection) -> Result<T, SyncError>,
    ) -> Result<T, SyncError> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| SyncError::Store("sqlite connection poisoned".into()))?;
        func(&mut guard)
    }
}

impl LookupStore for SqliteLookupStore {
    fn get(&self, key: &ItemKey) -> Result<Option<LookupItem>, SyncError> {
        self.with_conn(|conn| read_item(conn, key))
    }

    fn batch_get_hashes(
        &self,
        keys: &[ItemKey],
    ) -> Result<HashMap<ItemKey, ContentHash>, SyncError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare_cached(
                    "SELECT content_hash FROM lookup_items
                     WHERE firm_reference = ?1 AND item_type = ?2",
                )
                .map_err(map_sqlite_err)?;
            let mut hashes = HashMap::with_capacity(keys.len());
            for key in keys {
                let hash: Option<String> = stmt
                    .query_row(params![key.firm_reference, key.item_type], |row| row.get(0))
                    .optional()
                    .map_err(map_sqlite_err)?;
                if let Some(hash) = hash {
                    hashes.insert(key.clone(), hash);
                }
            }
            Ok(hashes)
        })
    }

    fn query_base_type(
        &self,
        firm_reference: &str,
        base: BaseItemType,
    ) -> Result<Vec<LookupItem>, SyncError> {
        let prefix = base.prefix();
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare_cached(
                    "SELECT payload FROM lookup_items
                     WHERE firm_reference = ?1 AND substr(item_type, 1, length(?2)) = ?2
                     ORDER BY item_type",
                )
                .map_err(map_sqlite_err)?;
            let payloads = stmt
                .query_map(params![firm_reference, prefix], |row| row.get::<_, Vec<u8>>(0))
                .map_err(map_sqlite_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(map_sqlite_err)?;
            let mut items = Vec::with_capacity(payloads.len());
            for payload in payloads {
                let item = decode_item(&payload)?;
                if item.body().base_type() == base {
                    items.push(item);
                }
            }
            Ok(items)
        })
    }

    fn transact(&self, writes: &[GuardedWrite]) -> Result<Vec<StoreMutation>, SyncError> {
        self.with_conn(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(map_sqlite_err)?;
            let mut mutations = Vec::with_capacity(writes.len());
            for write in writes {
                let key = write.item.key();
                let old_image = read_item(&tx, &key)?;
                write.check(old_image.as_ref().map(LookupItem::content_hash))?;
                tx.execute(
                    "INSERT INTO lookup_items (firm_reference, item_type, content_hash, payload)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT (firm_reference, item_type)
                     DO UPDATE SET content_hash = excluded.content_hash, payload = excluded.payload",
                    params![
                        key.firm_reference,
                        key.item_type,
                        write.item.content_hash(),
                        encode_item(&write.item)
                    ],
                )
                .map_err(map_sqlite_err)?;
                let mutation = StoreMutation::committed(old_image, write.item.clone());
                append_feed(&tx, &mutation)?;
                mutations.push(mutation);
            }
            tx.commit().map_err(map_sqlite_err)?;
            Ok(mutations)
        })
    }

    fn pending_feed(&self, limit: usize) -> Result<Vec<FeedEntry>, SyncError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare_cached(
                    "SELECT sequence, kind, firm_reference, item_type, old_payload, new_payload
                     FROM change_feed ORDER BY sequence LIMIT ?1",
                )
                .map_err(map_sqlite_err)?;
            let rows = stmt
                .query_map(params![limit], |row| {
                    Ok(FeedRow {
                        sequence: row.get(0)?,
                        kind: row.get(1)?,
                        key: ItemKey::new(row.get::<_, String>(2)?, row.get::<_, String>(3)?),
                        old_payload: row.get(4)?,
                        new_payload: row.get(5)?,
                    })
                })
                .map_err(map_sqlite_err)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(map_sqlite_err)?;
            rows.into_iter().map(FeedRow::into_entry).collect()
        })
    }

    fn ack_feed(&self, sequence: u64) -> Result<(), SyncError> {
        let sequence = i64::try_from(sequence)
            .map_err(|_| SyncError::Store(format!("feed sequence {sequence} out of range")))?;
        self.with_conn(|conn| {
            conn.execute("DELETE FROM change_feed WHERE sequence = ?1", params![sequence])
                .map_err(map_sqlite_err)?;
            Ok(())
        })
    }
}

struct FeedRow {
    sequence: i64,
    kind: String,
    key: ItemKey,
    old_payload: Option<Vec<u8>>,
    new_payload: Option<Vec<u8>>,
}

impl FeedRow {
    fn into_entry(self) -> Result<FeedEntry, SyncError> {
        let sequence = u64::try_from(self.sequence)
            .map_err(|_| SyncError::Store(format!("negative feed sequence {}", self.sequence)))?;
        Ok(FeedEntry {
            sequence,
            mutation: StoreMutation {
                kind: self.kind.parse::<MutationKind>()?,
                key: self.key,
                old_image: self.old_payload.as_deref().map(decode_item).transpose()?,
                new_image: self.new_payload.as_deref().map(decode_item).transpose()?,
            },
        })
    }
}

fn append_feed(conn: &Connection, mutation: &StoreMutation) -> Result<(), SyncError> {
    conn.execute(
        "INSERT INTO change_feed (kind, firm_reference, item_type, old_payload, new_payload)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            mutation.kind.as_str(),
            mutation.key.firm_reference,
            mutation.key.item_type,
            mutation.old_image.as_ref().map(encode_item),
            mutation.new_image.as_ref().map(encode_item)
        ],
    )
    .map_err(map_sqlite_err)?;
    Ok(())
}

fn read_item(conn: &Connection, key: &ItemKey) -> Result<Option<LookupItem>, SyncError> {
    let payload: Option<Vec<u8>> = conn
        .query_row(
            "SELECT payload FROM lookup_items WHERE firm_reference = ?1 AND item_type = ?2",
            params![key.firm_reference, key.item_type],
            |row| row.get(0),
        )
        .optional()
        .map_err(map_sqlite_err)?;
    payload.as_deref().map(decode_item).transpose()
}

fn encode_item(item: &LookupItem) -> Vec<u8> {
    let payload = encode_bitcode_payload(&bitcode::encode(item));
    let mut buf = Vec::with_capacity(1 + payload.len());
    buf.push(ITEM_RECORD_VERSION);
    buf.extend_from_slice(&payload);
    buf
}

fn decode_item(bytes: &[u8]) -> Result<LookupItem, SyncError> {
    if bytes.first().copied() != Some(ITEM_RECORD_VERSION) {
        return Err(SyncError::Store("lookup item record version mismatch".into()));
    }
    let raw = decode_bitcode_payload(&bytes[1..])?;
    let item: LookupItem = bitcode::decode(raw)
        .map_err(|err| SyncError::Store(format!("corrupt lookup item record: {err}")))?;
    item.verify()
        .map_err(|err| SyncError::Store(format!("corrupt lookup item record: {err}")))?;
    Ok(item)
}

fn encode_bitcode_payload(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + bytes.len());
    out.push(BITCODE_PREFIX);
    out.extend_from_slice(bytes);
    out
}

fn decode_bitcode_payload(bytes: &[u8]) -> Result<&[u8], SyncError> {
    match bytes.split_first() {
        Some((&BITCODE_PREFIX, rest)) => Ok(rest),
        _ => Err(SyncError::Store(
            "bitcode payload missing expected prefix".into(),
        )),
    }
}

fn coerce_store_path(path: PathBuf) -> PathBuf {
    if path.is_dir() {
        return path.join(DEFAULT_STORE_FILENAME);
    }
    path
}

fn ensure_parent_dir(path: &Path) -> Result<(), SyncError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn map_sqlite_err(err: rusqlite::Error) -> SyncError {
    SyncError::Store(err.to_string())
}
