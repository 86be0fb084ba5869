//! Wire messages exchanged with the delivery layer.
//!
//! All messages are JSON with camelCase field names. Blocks arrive as
//! [`BlockMessage`]s; committed changes leave as [`ChangeEvent`]s and
//! [`DerivedFactTrigger`]s.

use serde::{Deserialize, Serialize};

use crate::errors::SyncError;
use crate::source::{Block, RecordType};
use crate::store::{MutationKind, StoreMutation};
use crate::types::{FileLocation, FirmReference, GroupKey};

/// Kind of change announced on the change stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeEventName {
    /// A new key.
    Created,
    /// New content under an existing key.
    Updated,
}

/// Notification that one lookup item was created or updated.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    /// Created or updated.
    pub event_name: ChangeEventName,
    /// Firm of the changed item.
    pub firm_reference: FirmReference,
    /// Item type of the changed item.
    pub item_type: String,
}

impl ChangeEvent {
    /// Event for a committed mutation; removals produce none.
    pub fn from_mutation(mutation: &StoreMutation) -> Option<Self> {
        let event_name = match mutation.kind {
            MutationKind::Insert => ChangeEventName::Created,
            MutationKind::Modify => ChangeEventName::Updated,
            MutationKind::Remove => return None,
        };
        Some(Self {
            event_name,
            firm_reference: mutation.key.firm_reference.clone(),
            item_type: mutation.key.item_type.clone(),
        })
    }
}

/// Request to recompute derived facts of one firm.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedFactTrigger {
    /// Firm to recompute.
    pub firm_reference: FirmReference,
}

impl DerivedFactTrigger {
    /// Trigger for `firm_reference`.
    pub fn new(firm_reference: impl Into<FirmReference>) -> Self {
        Self {
            firm_reference: firm_reference.into(),
        }
    }
}

/// Work unit: one key range of one extract file.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockMessage {
    /// Where the extract lives.
    pub file_location: FileLocation,
    /// Record type named by the extract header.
    pub record_type: RecordType,
    /// First group key, inclusive; null means from the first group.
    pub start_key: Option<GroupKey>,
    /// Last group key, inclusive; null means to the end of the file.
    pub end_key: Option<GroupKey>,
}

impl BlockMessage {
    /// Message for `block` of the extract at `file_location`.
    pub fn new(file_location: impl Into<FileLocation>, record_type: RecordType, block: Block) -> Self {
        Self {
            file_location: file_location.into(),
            record_type,
            start_key: block.start_key,
            end_key: block.end_key,
        }
    }

    /// Key range carried by this message.
    pub fn block(&self) -> Block {
        Block {
            start_key: self.start_key.clone(),
            end_key: self.end_key.clone(),
        }
    }

    /// Decode a message body; malformed bodies are rejected.
    pub fn from_json(body: &str) -> Result<Self, SyncError> {
        Ok(serde_json::from_str(body)?)
    }
}

/// Anything a [`crate::transport::MessageSink`] can carry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "channel", content = "message", rename_all = "camelCase")]
pub enum OutboundMessage {
    /// Change stream entry.
    Change(ChangeEvent),
    /// Derived-fact work queue entry.
    Trigger(DerivedFactTrigger),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn block_message_reads_null_bounds() {
        let message = BlockMessage::from_json(
            r#"{"fileLocation":"/x/appointments.txt","recordType":"Appointment","startKey":"K5","endKey":null}"#,
        )
        .unwrap();
        assert_eq!(message.record_type, RecordType::Appointment);
        assert_eq!(message.block().end_key, None);
        assert_eq!(message.block().start_key.as_deref(), Some("K5"));
    }

    #[test]
    fn malformed_block_message_is_rejected() {
        let err = BlockMessage::from_json(r#"{"fileLocation":1}"#).unwrap_err();
        assert_eq!(err.disposition(), crate::errors::ErrorDisposition::Reject);
    }

    #[test]
    fn change_event_wire_shape() {
        let event = ChangeEvent {
            event_name: ChangeEventName::Created,
            firm_reference: "117659".into(),
            item_type: "FirmPrincipal-100014".into(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({
                "eventName": "created",
                "firmReference": "117659",
                "itemType": "FirmPrincipal-100014"
            })
        );
        assert_eq!(
            serde_json::to_value(OutboundMessage::Trigger(DerivedFactTrigger::new("1"))).unwrap(),
            json!({"channel": "trigger", "message": {"firmReference": "1"}})
        );
    }
}
