//! Line group to lookup item mapping.
//!
//! Each record type has a pure builder taking a complete [`LineGroup`] and
//! returning the items it produces. Column positions are fixed by the register
//! extract layout.

use crate::errors::SyncError;
use crate::items::{
    AlternativeFirmName, AlternativeFirmNames, FirmAppointedRepresentative, FirmAuthorisation,
    FirmPermission, FirmPermissions, FirmPrincipal, ItemBody, LookupItem,
};
use crate::parsing::parse_fields;
use crate::source::{LineGroup, RecordType};
use crate::types::Fields;
use crate::utils::{optional_register_date, optional_value, register_date};

/// Build the lookup items for one line group.
pub fn build_items(group: &LineGroup) -> Result<Vec<LookupItem>, SyncError> {
    match group.record_type {
        RecordType::FirmsMasterList => build_firm_authorisation(group).map(|item| vec![item]),
        RecordType::AlternativeFirmName => {
            build_alternative_names(group).map(|item| vec![item])
        }
        RecordType::FirmPermission => build_firm_permissions(group).map(|item| vec![item]),
        RecordType::Appointment => build_appointment_pair(group).map(Vec::from),
    }
}

fn group_fields(group: &LineGroup) -> Result<Vec<Fields>, SyncError> {
    let expected = group.record_type.expected_columns();
    if group.lines.is_empty() {
        return Err(SyncError::ColumnCount {
            group_key: group.key.clone(),
            expected,
            found: 0,
        });
    }
    group
        .lines
        .iter()
        .map(|line| parse_fields(line, expected, &group.key))
        .collect()
}

fn first_fields(group: &LineGroup) -> Result<Fields, SyncError> {
    let expected = group.record_type.expected_columns();
    let line = group.lines.first().ok_or_else(|| SyncError::ColumnCount {
        group_key: group.key.clone(),
        expected,
        found: 0,
    })?;
    parse_fields(line, expected, &group.key)
}

fn build_firm_authorisation(group: &LineGroup) -> Result<LookupItem, SyncError> {
    let f = first_fields(group)?;
    let body = FirmAuthorisation {
        registered_firm_name: f[1].clone(),
        address_line1: optional_value(&f[5]),
        address_line2: optional_value(&f[6]),
        address_line3: optional_value(&f[7]),
        address_line4: optional_value(&f[8]),
        address_line5: optional_value(&f[9]),
        address_line6: optional_value(&f[10]),
        postcode_in: optional_value(&f[11]),
        postcode_out: optional_value(&f[12]),
        current_authorisation_status_code: f[19].clone(),
        date_status_last_changed: register_date(&f[20], "dateStatusLastChanged")?,
    };
    LookupItem::new(f[0].clone(), ItemBody::FirmAuthorisation(body))
}

fn build_alternative_names(group: &LineGroup) -> Result<LookupItem, SyncError> {
    let rows = group_fields(group)?;
    let firm_reference = rows[0][0].clone();
    let names = rows
        .iter()
        .map(|f| {
            Ok(AlternativeFirmName {
                name: f[1].clone(),
                effective_date: register_date(&f[3], "effectiveDate")?,
                end_date: optional_register_date(&f[4], "endDate")?,
            })
        })
        .collect::<Result<Vec<_>, SyncError>>()?;
    LookupItem::new(
        firm_reference,
        ItemBody::AlternativeFirmNames(AlternativeFirmNames { names }),
    )
}

fn build_firm_permissions(group: &LineGroup) -> Result<LookupItem, SyncError> {
    let rows = group_fields(group)?;
    let firm_reference = rows[0][0].clone();
    let regulated_activity_code = rows[0][1].clone();
    let permissions = rows
        .iter()
        .map(|f| {
            Ok(FirmPermission {
                investment_type_code: optional_value(&f[2]),
                customer_type_code: optional_value(&f[3]),
                status_code: f[4].clone(),
                effective_date: register_date(&f[5], "effectiveDate")?,
            })
        })
        .collect::<Result<Vec<_>, SyncError>>()?;
    LookupItem::new(
        firm_reference,
        ItemBody::FirmPermissions(FirmPermissions {
            regulated_activity_code,
            permissions,
        }),
    )
}

/// One appointment line yields the principal's view and the representative's
/// view, with identical status fields.
fn build_appointment_pair(group: &LineGroup) -> Result<[LookupItem; 2], SyncError> {
    let f = first_fields(group)?;
    let representative = f[0].clone();
    let principal = f[1].clone();
    let status_code = f[2].clone();
    let status_effective_date = register_date(&f[3], "statusEffectiveDate")?;

    let principal_item = LookupItem::new(
        principal.clone(),
        ItemBody::FirmPrincipal(FirmPrincipal {
            appointed_representative_firm_ref: representative.clone(),
            status_code: status_code.clone(),
            status_effective_date: status_effective_date.clone(),
        }),
    )?;
    let representative_item = LookupItem::new(
        representative,
        ItemBody::FirmAppointedRepresentative(FirmAppointedRepresentative {
            principal_firm_ref: principal,
            status_code,
            status_effective_date,
        }),
    )?;
    Ok([principal_item, representative_item])
}
