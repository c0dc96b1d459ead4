//! Shared interpreter for declarative layouts.
//!
//! Every device family goes through [`resolve`]: header first, then the first
//! matching version branch, then each step in order. Optional groups that run
//! out of bytes are rewound and reported as warnings; once that happens the
//! stream is considered exhausted and any later mandatory group fails the
//! decode with `TruncatedPayload`.

use super::{ByteField, ByteLength, FieldSpec, Group, Layout, LayoutStep, SkipBlock};
use crate::error::{CursorError, DecodeError, DecodeWarning};
use crate::payload::codec::scale;
use crate::payload::cursor::ByteCursor;
use crate::payload::header::HeaderFields;
use crate::payload::record::{DecodedRecord, FieldValue};
use crate::util::hex::format_hex_spaced;
use log::{debug, trace};

/// Result of interpreting a layout against one payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub header: Option<HeaderFields>,
    pub record: DecodedRecord,
    pub warnings: Vec<DecodeWarning>,
    /// Bytes consumed by header and present groups.
    pub consumed: usize,
}

enum RawValue {
    Unsigned(u64),
    Signed(i64),
}

enum GroupError {
    /// Ran out of bytes, optionally inside a named field.
    Short(Option<String>, CursorError),
    Layout(DecodeError),
}

pub fn resolve(layout: &Layout, payload: &[u8], port: u8) -> Result<Resolution, DecodeError> {
    if payload.is_empty() {
        return Err(DecodeError::EmptyPayload);
    }

    let mut cursor = ByteCursor::new(payload);
    let mut record = DecodedRecord::new();

    let header = if layout.header {
        let header = HeaderFields::parse(&mut cursor).map_err(|e| e.into_truncated("header"))?;
        record.insert("base_id", FieldValue::Integer(header.base_id.into()));
        record.insert("major_version", FieldValue::Integer(header.major_version.into()));
        record.insert("minor_version", FieldValue::Integer(header.minor_version.into()));
        record.insert("product_version", FieldValue::Integer(header.product_version.into()));
        Some(header)
    } else {
        None
    };

    let (major, minor, features) = header.map_or((0, 0, 0), |h| {
        (h.major_version, h.minor_version, h.product_version)
    });

    let (branch_index, branch) = layout
        .branches
        .iter()
        .enumerate()
        .find(|(_, branch)| branch.when.matches(major, minor, port))
        .ok_or(DecodeError::UnsupportedVersion { major, minor, port })?;

    debug!(
        target: "mioty::layout",
        "{}: v{}.{} features {:#06b} port {} -> branch {}",
        layout.name, major, minor, features, port, branch_index
    );

    let mut warnings = Vec::new();
    let mut starved = false;

    for (index, step) in branch.steps.iter().enumerate() {
        let group = if step.when.holds(features) {
            &step.group
        } else {
            match &step.otherwise {
                Some(group) => group,
                None => {
                    trace!(target: "mioty::layout", "{}: step {} not selected", layout.name, index);
                    continue;
                }
            }
        };

        let start = cursor.offset();
        let available = cursor.remaining();

        if starved {
            if step.optional {
                warnings.push(omitted(step, index, group, group.static_width().unwrap_or(1), available));
                continue;
            }
            return Err(DecodeError::TruncatedPayload {
                field: step.display_name(index),
                offset: start,
                needed: group.static_width().unwrap_or(1),
                available,
            });
        }

        let mut group_record = DecodedRecord::new();
        match read_group(&mut cursor, group, &record, &mut group_record) {
            Ok(()) => record.extend(group_record),
            Err(GroupError::Layout(err)) => return Err(err),
            Err(GroupError::Short(field, err)) => {
                if !step.optional {
                    let field = field.unwrap_or_else(|| step.display_name(index));
                    return Err(err.into_truncated(&field));
                }
                cursor.rewind_to(start);
                starved = true;
                let CursorError::OutOfBounds { needed, .. } = err;
                let needed = group.static_width().unwrap_or(needed);
                debug!(
                    target: "mioty::layout",
                    "{}: optional group {} omitted at offset {} ({} of {} bytes)",
                    layout.name,
                    step.display_name(index),
                    start,
                    available,
                    needed
                );
                warnings.push(omitted(step, index, group, needed, available));
            }
        }
    }

    if !starved && !cursor.is_exhausted() {
        warnings.push(DecodeWarning::TrailingBytes {
            count: cursor.remaining(),
        });
    }

    Ok(Resolution {
        header,
        record,
        warnings,
        consumed: cursor.offset(),
    })
}

fn omitted(step: &LayoutStep, index: usize, group: &Group, needed: usize, available: usize) -> DecodeWarning {
    DecodeWarning::OptionalFieldOmitted {
        group: step.display_name(index),
        fields: group.field_names(),
        needed,
        available,
    }
}

/// Reads one group; on failure reports the field being read (if any).
fn read_group(
    cursor: &mut ByteCursor<'_>,
    group: &Group,
    decoded: &DecodedRecord,
    out: &mut DecodedRecord,
) -> Result<(), GroupError> {
    match group {
        Group::Fields(fields) => {
            for field in fields {
                let value = read_field(cursor, field)
                    .map_err(|e| GroupError::Short(Some(field.name.clone()), e))?;
                out.insert(field.name.clone(), value);
            }
            Ok(())
        }
        Group::Skip(count) => cursor.skip(*count).map_err(|e| GroupError::Short(None, e)),
        Group::SkipBlock(block) => skip_block(cursor, block)
            .map(|_| ())
            .map_err(|e| GroupError::Short(None, e)),
        Group::Bytes(field) => {
            let length = byte_length(field, decoded)?;
            let bytes = cursor
                .read_bytes(length)
                .map_err(|e| GroupError::Short(Some(field.name.clone()), e))?;
            out.insert(field.name.clone(), byte_value(field, bytes));
            Ok(())
        }
    }
}

fn byte_length(field: &ByteField, decoded: &DecodedRecord) -> Result<usize, GroupError> {
    match &field.length {
        ByteLength::Fixed(n) => Ok(*n),
        ByteLength::Field(source) => decoded
            .get(source)
            .and_then(FieldValue::as_u64)
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| {
                GroupError::Layout(DecodeError::InvalidLayout(format!(
                    "length field '{source}' for '{}' was not decoded",
                    field.name
                )))
            }),
    }
}

fn byte_value(field: &ByteField, bytes: &[u8]) -> FieldValue {
    let value = FieldValue::Text(format_hex_spaced(bytes));
    match (&field.unit, &field.description) {
        (None, None) => value,
        (unit, description) => FieldValue::annotated(
            value,
            unit.clone().unwrap_or_default(),
            description.clone(),
        ),
    }
}

/// Skip a counted block: one count byte, `reserved` bytes, then
/// `count * entry_width` bytes of entries. Returns the entry count.
pub fn skip_block(cursor: &mut ByteCursor<'_>, block: &SkipBlock) -> Result<usize, CursorError> {
    let count = usize::from(cursor.read_u8()?);
    cursor.skip(block.reserved)?;
    cursor.skip(count.saturating_mul(block.entry_width))?;
    Ok(count)
}

fn read_field(cursor: &mut ByteCursor<'_>, spec: &FieldSpec) -> Result<FieldValue, CursorError> {
    let width = spec.kind.width();
    let raw = match (spec.kind.is_signed(), width) {
        (true, 8) => RawValue::Signed(cursor.read_i64(spec.endian)?),
        (true, _) => RawValue::Signed(cursor.read_int(width, spec.endian)?),
        (false, 8) => RawValue::Unsigned(cursor.read_u64(spec.endian)?),
        (false, _) => RawValue::Unsigned(cursor.read_uint(width, spec.endian)?),
    };
    Ok(convert(spec, raw))
}

fn convert(spec: &FieldSpec, raw: RawValue) -> FieldValue {
    if !spec.flags.is_empty() {
        let bits = match raw {
            RawValue::Unsigned(u) => u,
            RawValue::Signed(i) => i as u64,
        };
        let mut flags = DecodedRecord::new();
        for (bit, name) in spec.flags.iter().enumerate() {
            flags.insert(name.clone(), FieldValue::Boolean((bits >> bit) & 1 == 1));
        }
        return FieldValue::Record(flags);
    }

    let value = if spec.divisor.is_some() || spec.offset.is_some() {
        let raw = match raw {
            RawValue::Unsigned(u) => u as f64,
            RawValue::Signed(i) => i as f64,
        };
        FieldValue::Float(scale(
            raw,
            spec.divisor.unwrap_or(1.0),
            spec.offset.unwrap_or(0.0),
        ))
    } else {
        match raw {
            RawValue::Signed(i) => FieldValue::Integer(i),
            RawValue::Unsigned(u) => i64::try_from(u)
                .map(FieldValue::Integer)
                .unwrap_or(FieldValue::Unsigned(u)),
        }
    };

    match (&spec.unit, &spec.description) {
        (None, None) => value,
        (unit, description) => FieldValue::annotated(
            value,
            unit.clone().unwrap_or_default(),
            description.clone(),
        ),
    }
}
