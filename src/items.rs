//! Lookup items: a shared key-and-hash envelope around a closed set of bodies.

use serde::{Deserialize, Serialize};

use crate::errors::SyncError;
use crate::hash::content_hash;
use crate::item_type::{BaseItemType, ItemType};
use crate::types::{ContentHash, FirmReference};

/// Store identity of a lookup item.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemKey {
    /// Firm the item belongs to.
    pub firm_reference: FirmReference,
    /// Canonical item type string.
    pub item_type: String,
}

impl ItemKey {
    /// Build a key from its parts.
    pub fn new(firm_reference: impl Into<FirmReference>, item_type: impl Into<String>) -> Self {
        Self {
            firm_reference: firm_reference.into(),
            item_type: item_type.into(),
        }
    }
}

/// Registered name, address, and authorisation status of a firm.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode)]
#[serde(rename_all = "camelCase")]
pub struct FirmAuthorisation {
    /// Registered name.
    pub registered_firm_name: String,
    /// First address line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_line1: Option<String>,
    /// Address line 2.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_line2: Option<String>,
    /// Address line 3.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_line3: Option<String>,
    /// Address line 4.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_line4: Option<String>,
    /// Address line 5.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_line5: Option<String>,
    /// Last address line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_line6: Option<String>,
    /// Inward postcode part.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postcode_in: Option<String>,
    /// Outward postcode part.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postcode_out: Option<String>,
    /// Status code, e.g. `Authorised` or `Registered`.
    pub current_authorisation_status_code: String,
    /// Date of the last status change (`YYYY-MM-DD`).
    pub date_status_last_changed: String,
}

/// One trading or former name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode)]
#[serde(rename_all = "camelCase")]
pub struct AlternativeFirmName {
    /// Name as registered.
    pub name: String,
    /// Date the entry took effect (`YYYY-MM-DD`).
    pub effective_date: String,
    /// Date the entry ended, if it has.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
}

/// All alternative names of a firm.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode)]
#[serde(rename_all = "camelCase")]
pub struct AlternativeFirmNames {
    /// Names in extract order.
    pub names: Vec<AlternativeFirmName>,
}

/// One permission line under a regulated activity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode)]
#[serde(rename_all = "camelCase")]
pub struct FirmPermission {
    /// Investment type, if restricted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub investment_type_code: Option<String>,
    /// Customer type, if restricted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_type_code: Option<String>,
    /// Status code of the entry.
    pub status_code: String,
    /// Date the entry took effect (`YYYY-MM-DD`).
    pub effective_date: String,
}

/// Permission set of a firm for one regulated activity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode)]
#[serde(rename_all = "camelCase")]
pub struct FirmPermissions {
    /// Activity the permissions apply to.
    pub regulated_activity_code: String,
    /// Permission lines in extract order.
    pub permissions: Vec<FirmPermission>,
}

/// Principal side of an appointment, stored under the principal's reference.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode)]
#[serde(rename_all = "camelCase")]
pub struct FirmPrincipal {
    /// Appointed representative's firm reference.
    pub appointed_representative_firm_ref: FirmReference,
    /// Status code of the entry.
    pub status_code: String,
    /// Date the status took effect (`YYYY-MM-DD`).
    pub status_effective_date: String,
}

/// Representative side of an appointment, stored under the representative's reference.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode)]
#[serde(rename_all = "camelCase")]
pub struct FirmAppointedRepresentative {
    /// Principal's firm reference.
    pub principal_firm_ref: FirmReference,
    /// Status code of the entry.
    pub status_code: String,
    /// Date the status took effect (`YYYY-MM-DD`).
    pub status_effective_date: String,
}

/// Derived flag: whether the firm is an active mortgage firm.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode)]
#[serde(rename_all = "camelCase")]
pub struct IsActiveMortgageFirm {
    /// Flag value.
    pub is_active_mortgage_firm: bool,
}

/// Item body; the variant determines the item type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode)]
#[serde(tag = "kind")]
pub enum ItemBody {
    /// Master list entry.
    FirmAuthorisation(FirmAuthorisation),
    /// Alternative names.
    AlternativeFirmNames(AlternativeFirmNames),
    /// Permission set for one activity.
    FirmPermissions(FirmPermissions),
    /// Principal side of an appointment.
    FirmPrincipal(FirmPrincipal),
    /// Representative side of an appointment.
    FirmAppointedRepresentative(FirmAppointedRepresentative),
    /// Derived active mortgage-firm flag.
    IsActiveMortgageFirm(IsActiveMortgageFirm),
}

impl ItemBody {
    /// Base type of this body.
    pub fn base_type(&self) -> BaseItemType {
        match self {
            ItemBody::FirmAuthorisation(_) => BaseItemType::FirmAuthorisation,
            ItemBody::AlternativeFirmNames(_) => BaseItemType::AlternativeFirmNames,
            ItemBody::FirmPermissions(_) => BaseItemType::FirmPermissions,
            ItemBody::FirmPrincipal(_) => BaseItemType::FirmPrincipal,
            ItemBody::FirmAppointedRepresentative(_) => BaseItemType::FirmAppointedRepresentative,
            ItemBody::IsActiveMortgageFirm(_) => BaseItemType::IsActiveMortgageFirm,
        }
    }

    /// Full item type, including the relationship suffix where one applies.
    pub fn item_type(&self) -> Result<ItemType, SyncError> {
        let base = self.base_type();
        match self {
            ItemBody::FirmPermissions(body) => {
                ItemType::with_suffix(base, body.regulated_activity_code.as_str())
            }
            ItemBody::FirmPrincipal(body) => {
                ItemType::with_suffix(base, body.appointed_representative_firm_ref.as_str())
            }
            ItemBody::FirmAppointedRepresentative(body) => {
                ItemType::with_suffix(base, body.principal_firm_ref.as_str())
            }
            ItemBody::FirmAuthorisation(_)
            | ItemBody::AlternativeFirmNames(_)
            | ItemBody::IsActiveMortgageFirm(_) => ItemType::bare(base),
        }
    }
}

/// A keyed, hashed record in the lookup store.
///
/// Build items with [`LookupItem::new`]; it derives the item type from the body
/// and computes the content hash, so both always agree with the other fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode)]
#[serde(rename_all = "camelCase")]
pub struct LookupItem {
    firm_reference: FirmReference,
    item_type: String,
    content_hash: ContentHash,
    #[serde(flatten)]
    body: ItemBody,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HashView<'a> {
    firm_reference: &'a str,
    item_type: &'a str,
    #[serde(flatten)]
    body: &'a ItemBody,
}

impl LookupItem {
    /// Create an item, deriving its item type and content hash.
    pub fn new(firm_reference: impl Into<FirmReference>, body: ItemBody) -> Result<Self, SyncError> {
        let firm_reference = firm_reference.into();
        let item_type = body.item_type()?.to_string();
        let content_hash = content_hash(&HashView {
            firm_reference: &firm_reference,
            item_type: &item_type,
            body: &body,
        })?;
        Ok(Self {
            firm_reference,
            item_type,
            content_hash,
            body,
        })
    }

    /// Firm reference.
    pub fn firm_reference(&self) -> &str {
        &self.firm_reference
    }

    /// Canonical item type string.
    pub fn item_type(&self) -> &str {
        &self.item_type
    }

    /// Content hash over every other field.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Variant body.
    pub fn body(&self) -> &ItemBody {
        &self.body
    }

    /// Store key of this item.
    pub fn key(&self) -> ItemKey {
        ItemKey::new(self.firm_reference.clone(), self.item_type.clone())
    }

    /// Recompute the hash and compare it to the stored one.
    ///
    /// The SQLite store checks every decoded row with this before its hash is
    /// trusted as a version token.
    pub fn verify(&self) -> Result<(), SyncError> {
        let rebuilt = Self::new(self.firm_reference.clone(), self.body.clone())?;
        if rebuilt.item_type != self.item_type || rebuilt.content_hash != self.content_hash {
            return Err(SyncError::Message(format!(
                "item ({}, {}) does not match its body",
                self.firm_reference, self.item_type
            )));
        }
        Ok(())
    }

    /// Authorisation body, when this is a `FirmAuthorisation` item.
    pub fn as_firm_authorisation(&self) -> Option<&FirmAuthorisation> {
        match &self.body {
            ItemBody::FirmAuthorisation(body) => Some(body),
            _ => None,
        }
    }

    /// Principal body, when this is a `FirmPrincipal-*` item.
    pub fn as_firm_principal(&self) -> Option<&FirmPrincipal> {
        match &self.body {
            ItemBody::FirmPrincipal(body) => Some(body),
            _ => None,
        }
    }

    /// Representative body, when this is a `FirmAppointedRepresentative-*` item.
    pub fn as_appointed_representative(&self) -> Option<&FirmAppointedRepresentative> {
        match &self.body {
            ItemBody::FirmAppointedRepresentative(body) => Some(body),
            _ => None,
        }
    }

    /// Derived flag value, when this is an `IsActiveMortgageFirm` item.
    pub fn as_active_mortgage_firm(&self) -> Option<bool> {
        match &self.body {
            ItemBody::IsActiveMortgageFirm(body) => Some(body.is_active_mortgage_firm),
            _ => None,
        }
    }
}
