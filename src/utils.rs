//! Value normalization helpers shared by record builders.

use chrono::NaiveDate;

use crate::constants::parsing::{REGISTER_DATE_FORMAT, STORED_DATE_FORMAT};
use crate::errors::SyncError;

/// Map a blank field to `None`.
pub fn optional_value(raw: &str) -> Option<String> {
    if raw.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}

/// Convert a `YYYYMMDD` register date into `YYYY-MM-DD`.
pub fn register_date(raw: &str, field: &'static str) -> Result<String, SyncError> {
    NaiveDate::parse_from_str(raw.trim(), REGISTER_DATE_FORMAT)
        .map(|date| date.format(STORED_DATE_FORMAT).to_string())
        .map_err(|_| SyncError::InvalidDate {
            field,
            value: raw.to_string(),
        })
}

/// Like [`register_date`], but a blank value yields `None`.
pub fn optional_register_date(
    raw: &str,
    field: &'static str,
) -> Result<Option<String>, SyncError> {
    if raw.trim().is_empty() {
        return Ok(None);
    }
    register_date(raw, field).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_values_become_absent() {
        assert_eq!(optional_value(""), None);
        assert_eq!(optional_value("EC2N"), Some("EC2N".to_string()));
    }

    #[test]
    fn register_dates_are_reformatted() {
        assert_eq!(
            register_date("20011201", "statusEffectiveDate").unwrap(),
            "2001-12-01"
        );
    }

    #[test]
    fn malformed_dates_are_rejected() {
        for raw in ["2001120", "20011301", "", "abcdefgh"] {
            let err = register_date(raw, "effectiveDate").unwrap_err();
            assert!(matches!(
                err,
                SyncError::InvalidDate {
                    field: "effectiveDate",
                    ..
                }
            ));
        }
    }

    #[test]
    fn optional_dates_allow_blank() {
        assert_eq!(optional_register_date("", "endDate").unwrap(), None);
        assert_eq!(
            optional_register_date("20200229", "endDate").unwrap(),
            Some("2020-02-29".to_string())
        );
        assert!(optional_register_date("20190229", "endDate").is_err());
    }
}
