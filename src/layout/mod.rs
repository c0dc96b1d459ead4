//! # Declarative Payload Layouts
//!
//! A [`Layout`] describes a device family's wire format as data: an optional
//! two-byte header, then one or more version branches selected by
//! `(major, minor, port)`, each an ordered list of steps. A step is gated by a
//! condition over the header's feature bitmask and contributes a field group,
//! a fixed skip, a counted block that is skipped entirely, or an opaque byte
//! run reported as hex. Offsets are never
//! stored; they follow from the widths of the groups that were present.
//!
//! Layouts deserialize from JSON ("blueprints"), so a new device family is a
//! file rather than a code path:
//!
//! ```rust
//! use mioty_payload::layout::Layout;
//!
//! let layout = Layout::from_json(r#"{
//!     "name": "door_sensor",
//!     "branches": [{
//!         "steps": [
//!             { "group": { "fields": [
//!                 { "name": "battery_voltage", "type": "u16", "divisor": 1000.0 }
//!             ] } },
//!             { "when": { "feature": 0 }, "optional": true, "group": { "fields": [
//!                 { "name": "open_count", "type": "u16", "endian": "little" }
//!             ] } }
//!         ]
//!     }]
//! }"#).unwrap();
//! assert_eq!(layout.name, "door_sensor");
//! ```

pub mod families;
pub mod resolver;

pub use resolver::{resolve, Resolution};

use crate::error::DecodeError;
use crate::payload::codec::bit_set;
use crate::payload::cursor::Endianness;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Field names emitted for the common header.
pub const HEADER_FIELD_NAMES: [&str; 4] =
    ["base_id", "major_version", "minor_version", "product_version"];

fn default_true() -> bool {
    true
}

/// Complete wire description of one device family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the payload starts with the two-byte version/feature header.
    #[serde(default = "default_true")]
    pub header: bool,
    /// Mutually exclusive version branches; the first match wins.
    pub branches: Vec<VersionBranch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionBranch {
    #[serde(default)]
    pub when: VersionMatch,
    #[serde(default)]
    pub steps: Vec<LayoutStep>,
}

/// Inclusive version bounds and an optional port filter. Unset bounds match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_major: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_major: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_minor: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_minor: Option<u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<u8>,
}

impl VersionMatch {
    pub fn any() -> Self {
        Self::default()
    }

    pub fn major(major: u8) -> Self {
        Self {
            min_major: Some(major),
            max_major: Some(major),
            ..Self::default()
        }
    }

    pub fn min_major(mut self, major: u8) -> Self {
        self.min_major = Some(major);
        self
    }

    pub fn min_minor(mut self, minor: u8) -> Self {
        self.min_minor = Some(minor);
        self
    }

    pub fn max_minor(mut self, minor: u8) -> Self {
        self.max_minor = Some(minor);
        self
    }

    pub fn ports(mut self, ports: &[u8]) -> Self {
        self.ports = ports.to_vec();
        self
    }

    pub fn matches(&self, major: u8, minor: u8, port: u8) -> bool {
        self.min_major.map_or(true, |m| major >= m)
            && self.max_major.map_or(true, |m| major <= m)
            && self.min_minor.map_or(true, |m| minor >= m)
            && self.max_minor.map_or(true, |m| minor <= m)
            && (self.ports.is_empty() || self.ports.contains(&port))
    }
}

/// Gate over the header's feature bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    #[default]
    Always,
    /// Bit `n` is set.
    Feature(u8),
    /// Bit `n` is clear.
    NotFeature(u8),
    /// At least one bit of the mask is set.
    AnyFeature(u8),
    /// Every bit of the mask is set.
    AllFeatures(u8),
}

impl Condition {
    pub fn holds(&self, features: u8) -> bool {
        match *self {
            Condition::Always => true,
            Condition::Feature(bit) => bit_set(features, bit),
            Condition::NotFeature(bit) => !bit_set(features, bit),
            Condition::AnyFeature(mask) => features & mask != 0,
            Condition::AllFeatures(mask) => features & mask == mask,
        }
    }
}

/// One entry of a branch's parse sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutStep {
    /// Name used in warnings; defaults to the first field name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub when: Condition,
    /// Optional groups are dropped with a warning when their bytes are missing.
    #[serde(default)]
    pub optional: bool,
    pub group: Group,
    /// Group consumed instead when the condition does not hold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otherwise: Option<Group>,
}

impl LayoutStep {
    pub fn new(group: Group) -> Self {
        Self {
            name: None,
            when: Condition::Always,
            optional: false,
            group,
            otherwise: None,
        }
    }

    pub fn fields(fields: Vec<FieldSpec>) -> Self {
        Self::new(Group::Fields(fields))
    }

    pub fn when(mut self, condition: Condition) -> Self {
        self.when = condition;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn otherwise(mut self, group: Group) -> Self {
        self.otherwise = Some(group);
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Name reported in warnings and truncation errors.
    pub fn display_name(&self, index: usize) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        match &self.group {
            Group::Fields(fields) if !fields.is_empty() => fields[0].name.clone(),
            Group::SkipBlock(_) => format!("block_{index}"),
            Group::Bytes(field) => field.name.clone(),
            _ => format!("group_{index}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Group {
    /// Fields decoded in order.
    Fields(Vec<FieldSpec>),
    /// Fixed number of reserved bytes.
    Skip(usize),
    /// A count byte followed by `count` fixed-size entries, all skipped.
    SkipBlock(SkipBlock),
    /// Opaque bytes kept as a spaced hex string.
    Bytes(ByteField),
}

impl Group {
    /// Byte width when it does not depend on the payload.
    pub fn static_width(&self) -> Option<usize> {
        match self {
            Group::Fields(fields) => Some(fields.iter().map(|f| f.kind.width()).sum()),
            Group::Skip(n) => Some(*n),
            Group::SkipBlock(_) => None,
            Group::Bytes(field) => match field.length {
                ByteLength::Fixed(n) => Some(n),
                ByteLength::Field(_) => None,
            },
        }
    }

    pub fn field_names(&self) -> Vec<String> {
        match self {
            Group::Fields(fields) => fields.iter().map(|f| f.name.clone()).collect(),
            Group::Bytes(field) => vec![field.name.clone()],
            Group::Skip(_) | Group::SkipBlock(_) => Vec::new(),
        }
    }
}

/// Length of a [`ByteField`]: a constant, or the value of an unsigned field
/// decoded earlier in the same branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteLength {
    Fixed(usize),
    Field(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteField {
    pub name: String,
    pub length: ByteLength,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ByteField {
    pub fn fixed(name: impl Into<String>, length: usize) -> Self {
        Self::new(name, ByteLength::Fixed(length))
    }

    pub fn sized_by(name: impl Into<String>, length_field: impl Into<String>) -> Self {
        Self::new(name, ByteLength::Field(length_field.into()))
    }

    fn new(name: impl Into<String>, length: ByteLength) -> Self {
        Self {
            name: name.into(),
            length,
            unit: None,
            description: None,
        }
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipBlock {
    pub entry_width: usize,
    /// Bytes between the count byte and the first entry.
    #[serde(default)]
    pub reserved: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    U8,
    U16,
    U24,
    U32,
    U64,
    I8,
    I16,
    I24,
    I32,
    I64,
}

impl FieldType {
    pub fn width(&self) -> usize {
        match self {
            FieldType::U8 | FieldType::I8 => 1,
            FieldType::U16 | FieldType::I16 => 2,
            FieldType::U24 | FieldType::I24 => 3,
            FieldType::U32 | FieldType::I32 => 4,
            FieldType::U64 | FieldType::I64 => 8,
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            FieldType::I8 | FieldType::I16 | FieldType::I24 | FieldType::I32 | FieldType::I64
        )
    }
}

/// One wire field and how to turn its raw integer into a value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FieldType,
    #[serde(default)]
    pub endian: Endianness,
    /// Physical value is `raw / divisor - offset`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub divisor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Bit names, least significant first; decodes the field as a flag record.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, kind: FieldType) -> Self {
        Self {
            name: name.into(),
            kind,
            endian: Endianness::Big,
            divisor: None,
            offset: None,
            unit: None,
            description: None,
            flags: Vec::new(),
        }
    }

    pub fn u8(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::U8)
    }

    pub fn u16(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::U16)
    }

    pub fn little(mut self) -> Self {
        self.endian = Endianness::Little;
        self
    }

    pub fn scaled(mut self, divisor: f64, offset: f64) -> Self {
        self.divisor = Some(divisor);
        self.offset = Some(offset);
        self
    }

    pub fn unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn flags(mut self, names: &[&str]) -> Self {
        self.flags = names.iter().map(|n| n.to_string()).collect();
        self
    }
}

impl Layout {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            header: true,
            branches: Vec::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn without_header(mut self) -> Self {
        self.header = false;
        self
    }

    pub fn branch(mut self, when: VersionMatch, steps: Vec<LayoutStep>) -> Self {
        self.branches.push(VersionBranch { when, steps });
        self
    }

    /// Parse and validate a JSON blueprint.
    pub fn from_json(json: &str) -> Result<Self, DecodeError> {
        let layout: Layout =
            serde_json::from_str(json).map_err(|e| DecodeError::InvalidLayout(e.to_string()))?;
        layout.validate()?;
        Ok(layout)
    }

    /// Check the structural rules the resolver relies on.
    pub fn validate(&self) -> Result<(), DecodeError> {
        let invalid = |msg: String| DecodeError::InvalidLayout(format!("{}: {msg}", self.name));

        if self.name.trim().is_empty() {
            return Err(DecodeError::InvalidLayout("layout name is empty".into()));
        }
        if self.branches.is_empty() {
            return Err(invalid("no version branches".into()));
        }

        for (branch_index, branch) in self.branches.iter().enumerate() {
            let mut seen: HashSet<&str> = HashSet::new();
            if self.header {
                seen.extend(HEADER_FIELD_NAMES);
            }
            // plain unsigned fields, usable as byte-run lengths
            let mut lengths: HashSet<&str> = HashSet::new();
            for step in &branch.steps {
                for group in std::iter::once(&step.group).chain(step.otherwise.as_ref()) {
                    match group {
                        Group::Fields(fields) => {
                            for field in fields {
                                validate_field(field).map_err(&invalid)?;
                                if !seen.insert(field.name.as_str()) {
                                    return Err(invalid(format!(
                                        "field '{}' declared twice in branch {branch_index}",
                                        field.name
                                    )));
                                }
                                if is_plain_unsigned(field) {
                                    lengths.insert(field.name.as_str());
                                }
                            }
                        }
                        Group::SkipBlock(block) if block.entry_width == 0 => {
                            return Err(invalid("skip block entry width is zero".into()));
                        }
                        Group::Bytes(field) => {
                            if field.name.trim().is_empty() {
                                return Err(invalid("byte field with empty name".into()));
                            }
                            if let ByteLength::Field(source) = &field.length {
                                if !lengths.contains(source.as_str()) {
                                    return Err(invalid(format!(
                                        "byte field '{}' takes its length from '{source}', which is not an earlier unsigned field",
                                        field.name
                                    )));
                                }
                            }
                            if !seen.insert(field.name.as_str()) {
                                return Err(invalid(format!(
                                    "field '{}' declared twice in branch {branch_index}",
                                    field.name
                                )));
                            }
                        }
                        Group::Skip(_) | Group::SkipBlock(_) => {}
                    }
                }
            }
        }
        Ok(())
    }
}

fn is_plain_unsigned(field: &FieldSpec) -> bool {
    !field.kind.is_signed()
        && field.flags.is_empty()
        && field.divisor.is_none()
        && field.offset.is_none()
}

fn validate_field(field: &FieldSpec) -> Result<(), String> {
    if field.name.trim().is_empty() {
        return Err("field with empty name".into());
    }
    if let Some(divisor) = field.divisor {
        if divisor == 0.0 || !divisor.is_finite() {
            return Err(format!("field '{}' has divisor {divisor}", field.name));
        }
    }
    if field.offset.is_some_and(|o| !o.is_finite()) {
        return Err(format!("field '{}' has a non-finite offset", field.name));
    }
    if !field.flags.is_empty() {
        if field.kind.is_signed() {
            return Err(format!("flag field '{}' must be unsigned", field.name));
        }
        if field.flags.len() > field.kind.width() * 8 {
            return Err(format!("field '{}' names more flags than bits", field.name));
        }
    }
    Ok(())
}
