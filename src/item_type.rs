//! Structured item types.
//!
//! Every stored item type is either a bare base type (`FirmAuthorisation`) or a
//! base type with a relationship suffix (`FirmPrincipal-100014`). Producers build
//! item types through [`ItemType`] and consumers decompose them with
//! [`ItemType::parse`], so the separator convention lives in one place.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::item_types::SUFFIX_SEPARATOR;
use crate::errors::SyncError;

/// Fixed enumeration of lookup item base types.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum BaseItemType {
    /// Registered name, address, and authorisation status.
    FirmAuthorisation,
    /// Trading and former names.
    AlternativeFirmNames,
    /// Permissions for one regulated activity (suffix: activity code).
    FirmPermissions,
    /// Principal side of an appointment (suffix: representative reference).
    FirmPrincipal,
    /// Representative side of an appointment (suffix: principal reference).
    FirmAppointedRepresentative,
    /// Derived active mortgage-firm flag.
    IsActiveMortgageFirm,
}

/// Every base type, in declaration order.
pub const ALL_BASE_ITEM_TYPES: [BaseItemType; 6] = [
    BaseItemType::FirmAuthorisation,
    BaseItemType::AlternativeFirmNames,
    BaseItemType::FirmPermissions,
    BaseItemType::FirmPrincipal,
    BaseItemType::FirmAppointedRepresentative,
    BaseItemType::IsActiveMortgageFirm,
];

impl BaseItemType {
    /// Canonical name used in stored item types.
    pub const fn as_str(self) -> &'static str {
        match self {
            BaseItemType::FirmAuthorisation => "FirmAuthorisation",
            BaseItemType::AlternativeFirmNames => "AlternativeFirmNames",
            BaseItemType::FirmPermissions => "FirmPermissions",
            BaseItemType::FirmPrincipal => "FirmPrincipal",
            BaseItemType::FirmAppointedRepresentative => "FirmAppointedRepresentative",
            BaseItemType::IsActiveMortgageFirm => "IsActiveMortgageFirm",
        }
    }

    /// Whether item types of this base carry a suffix.
    pub const fn requires_suffix(self) -> bool {
        matches!(
            self,
            BaseItemType::FirmPermissions
                | BaseItemType::FirmPrincipal
                | BaseItemType::FirmAppointedRepresentative
        )
    }

    /// Prefix shared by every item type of this base (`FirmPrincipal-`).
    ///
    /// Bases without a suffix return the bare name.
    pub fn prefix(self) -> String {
        if self.requires_suffix() {
            format!("{}{}", self.as_str(), SUFFIX_SEPARATOR)
        } else {
            self.as_str().to_string()
        }
    }
}

impl fmt::Display for BaseItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BaseItemType {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ALL_BASE_ITEM_TYPES
            .into_iter()
            .find(|base| base.as_str() == value)
            .ok_or_else(|| SyncError::InvalidItemType(value.to_string()))
    }
}

/// Decomposed item type: base plus optional relationship suffix.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemType {
    base: BaseItemType,
    suffix: Option<String>,
}

impl ItemType {
    /// Item type for a base that carries no suffix.
    pub fn bare(base: BaseItemType) -> Result<Self, SyncError> {
        if base.requires_suffix() {
            return Err(SyncError::InvalidItemType(format!(
                "{base} requires a suffix"
            )));
        }
        Ok(Self { base, suffix: None })
    }

    /// Item type for a base that carries a suffix.
    pub fn with_suffix(base: BaseItemType, suffix: impl Into<String>) -> Result<Self, SyncError> {
        let suffix = suffix.into();
        if !base.requires_suffix() || suffix.is_empty() {
            return Err(SyncError::InvalidItemType(format!(
                "{base}{SUFFIX_SEPARATOR}{suffix}"
            )));
        }
        Ok(Self {
            base,
            suffix: Some(suffix),
        })
    }

    /// Parse a stored item type, validating it against the known base types.
    pub fn parse(value: &str) -> Result<Self, SyncError> {
        let invalid = || SyncError::InvalidItemType(value.to_string());
        match value.split_once(SUFFIX_SEPARATOR) {
            Some((base, suffix)) => {
                let base = base.parse::<BaseItemType>().map_err(|_| invalid())?;
                Self::with_suffix(base, suffix).map_err(|_| invalid())
            }
            None => {
                let base = value.parse::<BaseItemType>()?;
                Self::bare(base).map_err(|_| invalid())
            }
        }
    }

    /// Base type.
    pub fn base(&self) -> BaseItemType {
        self.base
    }

    /// Relationship suffix, when the base carries one.
    pub fn suffix(&self) -> Option<&str> {
        self.suffix.as_deref()
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.suffix {
            Some(suffix) => write!(f, "{}{}{}", self.base, SUFFIX_SEPARATOR, suffix),
            None => f.write_str(self.base.as_str()),
        }
    }
}

impl FromStr for ItemType {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}
