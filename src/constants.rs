/// Constants describing the register extract line format.
pub mod parsing {
    /// Field delimiter used by every extract.
    pub const FIELD_DELIMITER: char = '|';
    /// Quote character that may wrap a field containing the delimiter.
    pub const QUOTE: char = '"';
    /// First-field sentinel that opens a file and names its record type.
    pub const HEADER_SENTINEL: &str = "Header";
    /// First-field sentinel for the optional trailer line.
    pub const FOOTER_SENTINEL: &str = "Footer";
    /// Separator joining the parts of a two-part group key.
    pub const GROUP_KEY_SEPARATOR: &str = "|";
    /// Input date layout (`YYYYMMDD`).
    pub const REGISTER_DATE_FORMAT: &str = "%Y%m%d";
    /// Stored date layout (`YYYY-MM-DD`).
    pub const STORED_DATE_FORMAT: &str = "%Y-%m-%d";
}

/// Expected column counts per record type.
pub mod columns {
    /// Firms master list line width.
    pub const FIRMS_MASTER_LIST: usize = 29;
    /// Alternative firm name line width.
    pub const ALTERNATIVE_FIRM_NAME: usize = 8;
    /// Firm permission line width.
    pub const FIRM_PERMISSION: usize = 8;
    /// Appointment line width.
    pub const APPOINTMENT: usize = 9;
}

/// Constants used when composing and decomposing item types.
pub mod item_types {
    /// Separator between a base item type and its relationship suffix.
    pub const SUFFIX_SEPARATOR: char = '-';
}

/// Constants used by the upsert engine and block producer.
pub mod sync {
    /// Maximum guarded writes per store transaction.
    pub const DEFAULT_TRANSACTION_LIMIT: usize = 10;
    /// Line groups per block when splitting a large extract.
    pub const DEFAULT_BLOCK_SIZE: usize = 1000;
}

/// Constants used by derived-fact recomputation.
pub mod derived {
    /// Authorisation status codes that count as actively authorised.
    pub const AUTHORISED_STATUS_CODES: [&str; 2] = ["Authorised", "EEA Authorised"];
    /// Status code of a firm that depends on a principal, and of a live appointment.
    pub const REGISTERED_STATUS_CODE: &str = "Registered";
}

/// Constants used by the SQLite-backed lookup store.
pub mod store {
    /// Version tag for persisted item payloads.
    pub const ITEM_RECORD_VERSION: u8 = 1;
    /// Prefix marker for bitcode-encoded payloads.
    pub const BITCODE_PREFIX: u8 = b'B';
    /// Default directory for the persisted lookup store.
    pub const DEFAULT_STORE_DIR: &str = ".regsync";
    /// Default filename for the persisted lookup store.
    pub const DEFAULT_STORE_FILENAME: &str = "lookup.sqlite3";
    /// Change-feed entries fetched per publisher round.
    pub const FEED_BATCH_SIZE: usize = 256;
}

/// Environment variable names read by `SyncConfig::from_env`.
pub mod env {
    /// Path of the SQLite lookup store (required).
    pub const STORE_PATH: &str = "REGSYNC_STORE_PATH";
    /// Path of the JSON-lines outbox (optional).
    pub const OUTBOX_PATH: &str = "REGSYNC_OUTBOX_PATH";
    /// Transaction limit override.
    pub const TRANSACTION_LIMIT: &str = "REGSYNC_TRANSACTION_LIMIT";
    /// Block size override.
    pub const BLOCK_SIZE: &str = "REGSYNC_BLOCK_SIZE";
    /// Conflict policy override (`swallow` or `reject`).
    pub const CONFLICT_POLICY: &str = "REGSYNC_CONFLICT_POLICY";
}
