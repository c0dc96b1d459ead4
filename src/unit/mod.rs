//! Decoding unit framework
//!
//! A decoding unit turns one payload plus its routing context into a
//! [`DecodedRecord`]. Units are selected per device by the registry and are
//! required to be deterministic and free of side effects; externally supplied
//! units run inside the script sandbox (see [`script`]).

pub mod script;

pub use script::{ScriptMetadata, ScriptUnit};

use crate::error::{DecodeError, DecodeWarning};
use crate::layout::{resolve, Layout};
use crate::payload::{DecodeContext, DecodedRecord, FieldValue, RawPayload};
use serde::Serialize;
use std::fmt;

/// What a unit hands back to the engine on success.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitOutput {
    pub record: DecodedRecord,
    pub warnings: Vec<DecodeWarning>,
}

impl UnitOutput {
    pub fn new(record: DecodedRecord) -> Self {
        Self {
            record,
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Layout,
    Script,
    Passthrough,
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UnitKind::Layout => "layout",
            UnitKind::Script => "script",
            UnitKind::Passthrough => "passthrough",
        };
        f.write_str(name)
    }
}

/// Descriptive information shown by administration surfaces.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitInfo {
    pub name: String,
    pub kind: UnitKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Trait implemented by every decoding unit
pub trait DecodingUnit: Send + Sync + fmt::Debug {
    /// Decode a payload into a structured record
    fn decode(&self, payload: &RawPayload, context: &DecodeContext) -> Result<UnitOutput, DecodeError>;

    fn kind(&self) -> UnitKind;

    /// Registry name of this unit
    fn name(&self) -> &str;

    fn info(&self) -> UnitInfo {
        UnitInfo {
            name: self.name().to_string(),
            kind: self.kind(),
            version: None,
            description: None,
        }
    }
}

/// Unit backed by a declarative layout and the shared resolver.
#[derive(Debug, Clone)]
pub struct LayoutUnit {
    layout: Layout,
}

impl LayoutUnit {
    pub fn new(layout: Layout) -> Result<Self, DecodeError> {
        layout.validate()?;
        Ok(Self { layout })
    }

    pub fn from_json(json: &str) -> Result<Self, DecodeError> {
        Ok(Self {
            layout: Layout::from_json(json)?,
        })
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }
}

impl DecodingUnit for LayoutUnit {
    fn decode(&self, payload: &RawPayload, context: &DecodeContext) -> Result<UnitOutput, DecodeError> {
        let resolution = resolve(&self.layout, payload.as_bytes(), context.port)?;
        Ok(UnitOutput {
            record: resolution.record,
            warnings: resolution.warnings,
        })
    }

    fn kind(&self) -> UnitKind {
        UnitKind::Layout
    }

    fn name(&self) -> &str {
        &self.layout.name
    }

    fn info(&self) -> UnitInfo {
        UnitInfo {
            name: self.layout.name.clone(),
            kind: UnitKind::Layout,
            version: None,
            description: self.layout.description.clone(),
        }
    }
}

/// Reports the payload as a single opaque hex measurement.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawPassthroughUnit;

pub const RAW_PASSTHROUGH_NAME: &str = "raw_passthrough";
pub const RAW_HEX_FIELD: &str = "raw_hex";

impl DecodingUnit for RawPassthroughUnit {
    fn decode(&self, payload: &RawPayload, _context: &DecodeContext) -> Result<UnitOutput, DecodeError> {
        if payload.is_empty() {
            return Err(DecodeError::EmptyPayload);
        }
        let mut record = DecodedRecord::new();
        record.insert(
            RAW_HEX_FIELD,
            FieldValue::annotated(
                FieldValue::Text(payload.to_hex_spaced()),
                "hex",
                Some("Raw Payload".to_string()),
            ),
        );
        Ok(UnitOutput::new(record))
    }

    fn kind(&self) -> UnitKind {
        UnitKind::Passthrough
    }

    fn name(&self) -> &str {
        RAW_PASSTHROUGH_NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::families;

    #[test]
    fn test_passthrough_reports_hex() {
        let output = RawPassthroughUnit
            .decode(&RawPayload::from(vec![0xde, 0xad, 0x01]), &DecodeContext::new(1, "x"))
            .unwrap();
        match output.record.get(RAW_HEX_FIELD) {
            Some(FieldValue::Annotated(a)) => {
                assert_eq!(*a.value, FieldValue::Text("DE AD 01".into()));
                assert_eq!(a.unit, "hex");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(RawPassthroughUnit
            .decode(&RawPayload::default(), &DecodeContext::new(1, "x"))
            .is_err());
    }

    #[test]
    fn test_layout_unit_info() {
        let unit = LayoutUnit::new(families::ranging()).unwrap();
        let info = unit.info();
        assert_eq!(info.name, "ranging");
        assert_eq!(info.kind, UnitKind::Layout);
        assert!(info.description.is_some());
        assert_eq!(UnitKind::Passthrough.to_string(), "passthrough");
    }

    #[test]
    fn test_layout_unit_uses_context_port() {
        let json = r#"{
            "name": "ported",
            "header": false,
            "branches": [
                { "when": { "ports": [1] }, "steps": [ { "group": { "fields": [ { "name": "a", "type": "u8" } ] } } ] },
                { "when": { "ports": [2] }, "steps": [ { "group": { "fields": [ { "name": "b", "type": "u8" } ] } } ] }
            ]
        }"#;
        let unit = LayoutUnit::from_json(json).unwrap();
        let payload = RawPayload::from(vec![7]);

        let out = unit.decode(&payload, &DecodeContext::new(2, "dev")).unwrap();
        assert_eq!(out.record.get("b"), Some(&FieldValue::Integer(7)));
        assert!(matches!(
            unit.decode(&payload, &DecodeContext::new(3, "dev")),
            Err(DecodeError::UnsupportedVersion { port: 3, .. })
        ));
    }
}
