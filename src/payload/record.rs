//! # Decoded Records
//!
//! The structured output of a decoding unit: an insertion-ordered mapping from
//! field name to typed value. Keys are unique; inserting an existing key
//! replaces its value in place.

use crate::error::DecodeWarning;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::Value;

/// A typed field value produced by a decoding unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Unsigned(u64),
    Float(f64),
    Boolean(bool),
    Text(String),
    Record(DecodedRecord),
    Annotated(AnnotatedValue),
}

/// A value the decoding unit already tagged with a unit and description.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotatedValue {
    pub value: Box<FieldValue>,
    pub unit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FieldValue {
    pub fn annotated(value: FieldValue, unit: impl Into<String>, description: Option<String>) -> Self {
        Self::Annotated(AnnotatedValue {
            value: Box::new(value),
            unit: unit.into(),
            description,
        })
    }

    /// Numeric view of scalar values; annotated values unwrap to their inner value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(v) => Some(*v as f64),
            Self::Unsigned(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Boolean(v) => Some(if *v { 1.0 } else { 0.0 }),
            Self::Annotated(a) => a.value.as_f64(),
            Self::Text(_) | Self::Record(_) => None,
        }
    }

    /// Non-negative integer view, used for lengths taken from earlier fields.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Integer(v) => u64::try_from(*v).ok(),
            Self::Unsigned(v) => Some(*v),
            Self::Annotated(a) => a.value.as_u64(),
            _ => None,
        }
    }
}

/// Insertion-ordered field map with unique keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedRecord {
    fields: Vec<(String, FieldValue)>,
}

impl DecodedRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) {
        let name = name.into();
        match self.fields.iter_mut().find(|(key, _)| *key == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(key, value)| (key.as_str(), value))
    }

    /// Append every field of `other`, replacing duplicates.
    pub fn extend(&mut self, other: DecodedRecord) {
        for (key, value) in other.fields {
            self.insert(key, value);
        }
    }

    /// Build a record from the JSON object returned by a script unit.
    ///
    /// Objects shaped `{value, unit[, description]}` become annotated values,
    /// other objects and arrays become nested records, and nulls are dropped
    /// with a warning. Returns `None` when `value` is not an object.
    pub fn from_json(value: &Value) -> Option<(Self, Vec<DecodeWarning>)> {
        let object = value.as_object()?;
        let mut warnings = Vec::new();
        let mut record = DecodedRecord::new();
        for (key, item) in object {
            if let Some(field) = field_from_json(key, item, &mut warnings) {
                record.insert(key.clone(), field);
            }
        }
        Some((record, warnings))
    }
}

fn field_from_json(path: &str, value: &Value, warnings: &mut Vec<DecodeWarning>) -> Option<FieldValue> {
    match value {
        Value::Null => {
            warnings.push(DecodeWarning::NullField(path.to_string()));
            None
        }
        Value::Bool(b) => Some(FieldValue::Boolean(*b)),
        Value::Number(n) => Some(if let Some(i) = n.as_i64() {
            FieldValue::Integer(i)
        } else if let Some(u) = n.as_u64() {
            FieldValue::Unsigned(u)
        } else {
            FieldValue::Float(n.as_f64().unwrap_or(f64::NAN))
        }),
        Value::String(s) => Some(FieldValue::Text(s.clone())),
        Value::Array(items) => {
            let mut record = DecodedRecord::new();
            for (index, item) in items.iter().enumerate() {
                let key = index.to_string();
                if let Some(field) = field_from_json(&format!("{path}_{key}"), item, warnings) {
                    record.insert(key, field);
                }
            }
            Some(FieldValue::Record(record))
        }
        Value::Object(map) => {
            let is_annotation = map.contains_key("value")
                && map.contains_key("unit")
                && map.keys().all(|k| matches!(k.as_str(), "value" | "unit" | "description"));
            if is_annotation {
                let inner = field_from_json(path, &map["value"], warnings)?;
                let unit = map["unit"].as_str().unwrap_or_default().to_string();
                let description = map
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                return Some(FieldValue::annotated(inner, unit, description));
            }
            let mut record = DecodedRecord::new();
            for (key, item) in map {
                if let Some(field) = field_from_json(&format!("{path}_{key}"), item, warnings) {
                    record.insert(key.clone(), field);
                }
            }
            Some(FieldValue::Record(record))
        }
    }
}

impl Serialize for DecodedRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_insert_keeps_keys_unique_and_ordered() {
        let mut record = DecodedRecord::new();
        record.insert("b", FieldValue::Integer(1));
        record.insert("a", FieldValue::Integer(2));
        record.insert("b", FieldValue::Integer(3));

        let keys: Vec<_> = record.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(record.get("b"), Some(&FieldValue::Integer(3)));
    }

    #[test]
    fn test_from_json_shapes() {
        let value = json!({
            "temperature": { "value": 21.5, "unit": "°C" },
            "alarms": { "open": true },
            "counter": 7,
            "raw": [1, 2],
            "missing": null
        });

        let (record, warnings) = DecodedRecord::from_json(&value).unwrap();
        assert_eq!(warnings, vec![DecodeWarning::NullField("missing".into())]);
        assert_eq!(record.len(), 4);

        match record.get("temperature") {
            Some(FieldValue::Annotated(a)) => {
                assert_eq!(*a.value, FieldValue::Float(21.5));
                assert_eq!(a.unit, "°C");
                assert_eq!(a.description, None);
            }
            other => panic!("expected annotated value, got {other:?}"),
        }
        assert!(matches!(record.get("alarms"), Some(FieldValue::Record(_))));
        assert_eq!(record.get("counter"), Some(&FieldValue::Integer(7)));
        match record.get("raw") {
            Some(FieldValue::Record(r)) => assert_eq!(r.get("1"), Some(&FieldValue::Integer(2))),
            other => panic!("expected nested record, got {other:?}"),
        }
    }

    #[test]
    fn test_from_json_rejects_non_object() {
        assert!(DecodedRecord::from_json(&json!([1, 2, 3])).is_none());
        assert!(DecodedRecord::from_json(&json!(42)).is_none());
    }

    #[test]
    fn test_serialize_as_map() {
        let mut record = DecodedRecord::new();
        record.insert("humidity", FieldValue::Integer(45));
        record.insert("ok", FieldValue::Boolean(true));
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"humidity":45,"ok":true}"#);
    }
}
