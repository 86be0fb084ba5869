//! Register extract sources: record types, line groups, and block bounds.
//!
//! An extract is a stream of pipe-delimited lines. The first line is a header
//! naming the record type; one logical record may span several contiguous lines
//! sharing a group key. [`segmenter::LineSegmenter`] turns the stream into
//! [`LineGroup`]s and [`segmenter::BlockSplitter`] cuts large files into
//! [`Block`]s that can be processed independently.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::columns;
use crate::errors::SyncError;
use crate::types::{GroupKey, RawLine};

/// Line segmentation and block splitting.
pub mod segmenter;

pub use segmenter::{BlockSplitter, LineSegmenter, collect_line_groups, split_blocks};

/// Record type named by an extract header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordType {
    /// One line per firm: name, address, authorisation status.
    FirmsMasterList,
    /// One line per trading or former name.
    AlternativeFirmName,
    /// One line per permission; grouped by firm and activity.
    FirmPermission,
    /// One line per appointment; grouped by representative and principal.
    Appointment,
}

impl RecordType {
    /// Name used in headers and block messages.
    pub const fn as_str(self) -> &'static str {
        match self {
            RecordType::FirmsMasterList => "FirmsMasterList",
            RecordType::AlternativeFirmName => "AlternativeFirmName",
            RecordType::FirmPermission => "FirmPermission",
            RecordType::Appointment => "Appointment",
        }
    }

    /// Fixed column count of every data line of this type.
    pub const fn expected_columns(self) -> usize {
        match self {
            RecordType::FirmsMasterList => columns::FIRMS_MASTER_LIST,
            RecordType::AlternativeFirmName => columns::ALTERNATIVE_FIRM_NAME,
            RecordType::FirmPermission => columns::FIRM_PERMISSION,
            RecordType::Appointment => columns::APPOINTMENT,
        }
    }

    /// Whether the group key joins the first two fields.
    pub const fn uses_two_part_key(self) -> bool {
        matches!(self, RecordType::FirmPermission | RecordType::Appointment)
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordType {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "FirmsMasterList" => Ok(RecordType::FirmsMasterList),
            "AlternativeFirmName" => Ok(RecordType::AlternativeFirmName),
            "FirmPermission" => Ok(RecordType::FirmPermission),
            "Appointment" => Ok(RecordType::Appointment),
            other => Err(SyncError::UnknownRecordType(other.to_string())),
        }
    }
}

/// Contiguous lines sharing one group key, in file order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LineGroup {
    /// Shared group key.
    pub key: GroupKey,
    /// Record type from the file header.
    pub record_type: RecordType,
    /// Raw lines, never empty.
    pub lines: Vec<RawLine>,
}

/// Inclusive group-key bounds of an independently processable unit.
///
/// An absent start means "from the first group"; an absent end means "to the
/// end of the file".
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// First group key of the block.
    pub start_key: Option<GroupKey>,
    /// Last group key of the block.
    pub end_key: Option<GroupKey>,
}

impl Block {
    /// Block covering the whole file.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Block with both bounds given.
    pub fn bounded(start_key: impl Into<GroupKey>, end_key: impl Into<GroupKey>) -> Self {
        Self {
            start_key: Some(start_key.into()),
            end_key: Some(end_key.into()),
        }
    }
}
