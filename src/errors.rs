use std::io;

use thiserror::Error;

use crate::types::{FirmReference, GroupKey};

/// How the delivery layer should treat a failed unit of work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// The message can never succeed; route it to the dead-letter path.
    Reject,
    /// Infrastructure trouble; let the platform redeliver.
    Retry,
    /// Another writer got there first; nothing to do.
    Benign,
}

/// Error type for parsing, store, messaging, and configuration failures.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("line group '{group_key}' expected {expected} columns, found {found}")]
    ColumnCount {
        group_key: GroupKey,
        expected: usize,
        found: usize,
    },
    #[error("value for {field} could not be read as a YYYYMMDD date: '{value}'")]
    InvalidDate { field: &'static str, value: String },
    #[error("data line before any Header line: '{line}'")]
    MissingHeader { line: String },
    #[error("unknown record type '{0}'")]
    UnknownRecordType(String),
    #[error("item type '{0}' is not a recognised lookup item type")]
    InvalidItemType(String),
    #[error("line segmenter is closed")]
    SegmenterClosed,
    #[error("conditional write rejected for ({firm_reference}, {item_type})")]
    ConditionFailed {
        firm_reference: FirmReference,
        item_type: String,
    },
    #[error("lookup store failure: {0}")]
    Store(String),
    #[error("malformed message: {0}")]
    Message(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl SyncError {
    /// Map this error onto the delivery-layer failure path.
    pub fn disposition(&self) -> ErrorDisposition {
        match self {
            SyncError::ConditionFailed { .. } => ErrorDisposition::Benign,
            SyncError::Store(_) | SyncError::Io(_) => ErrorDisposition::Retry,
            SyncError::ColumnCount { .. }
            | SyncError::InvalidDate { .. }
            | SyncError::MissingHeader { .. }
            | SyncError::UnknownRecordType(_)
            | SyncError::InvalidItemType(_)
            | SyncError::SegmenterClosed
            | SyncError::Message(_)
            | SyncError::Configuration(_) => ErrorDisposition::Reject,
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Message(err.to_string())
    }
}
