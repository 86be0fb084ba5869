//! Field parsing for pipe-delimited register lines.

use crate::constants::parsing::{FIELD_DELIMITER, QUOTE};
use crate::errors::SyncError;
use crate::types::Fields;

/// Split `line` into fields.
///
/// When `expected_fields` is supplied and the raw split count differs, quoted
/// fields that embed the delimiter are merged back together. A quoted field with
/// no closing partner is left as it was split.
pub fn parse_line(line: &str, expected_fields: Option<usize>) -> Fields {
    let parts: Vec<&str> = line.split(FIELD_DELIMITER).collect();
    match expected_fields {
        Some(expected) if parts.len() != expected => merge_quoted_parts(&parts),
        _ => parts.into_iter().map(str::to_string).collect(),
    }
}

/// Parse `line` and require exactly `expected_fields` fields after quote merging.
pub fn parse_fields(
    line: &str,
    expected_fields: usize,
    group_key: &str,
) -> Result<Fields, SyncError> {
    let fields = parse_line(line, Some(expected_fields));
    if fields.len() != expected_fields {
        return Err(SyncError::ColumnCount {
            group_key: group_key.to_string(),
            expected: expected_fields,
            found: fields.len(),
        });
    }
    Ok(fields)
}

fn merge_quoted_parts(parts: &[&str]) -> Fields {
    let mut merged = Vec::with_capacity(parts.len());
    let mut idx = 0;
    while idx < parts.len() {
        let part = parts[idx];
        if !part.starts_with(QUOTE) {
            merged.push(part.to_string());
            idx += 1;
            continue;
        }
        // A part quoted on both ends is taken as one field rather than merged
        // through the next part ending in a quote.
        if part.len() > 1 && part.ends_with(QUOTE) {
            merged.push(part[1..part.len() - 1].to_string());
            idx += 1;
            continue;
        }
        let closing = parts
            .iter()
            .enumerate()
            .skip(idx + 1)
            .find(|(_, candidate)| candidate.ends_with(QUOTE))
            .map(|(pos, _)| pos);
        let Some(closing) = closing else {
            merged.push(part.to_string());
            idx += 1;
            continue;
        };
        let joined = parts[idx..=closing].join(&FIELD_DELIMITER.to_string());
        // Both ends are quote characters, so slicing one byte off each side is safe.
        merged.push(joined[1..joined.len() - 1].to_string());
        idx = closing + 1;
    }
    merged
}
