//! # Measurement Normalizer
//!
//! Flattens a [`DecodedRecord`] into `{name, value, unit, description}`
//! measurements. Annotations supplied by the decoding unit are used verbatim;
//! otherwise units and descriptions are inferred from the field name. Nested
//! records are flattened with `parent_child` names. Output order follows the
//! record.

use crate::config::NormalizerConfig;
use crate::constants::DEFAULT_EXCLUDED_KEYS;
use crate::payload::record::{DecodedRecord, FieldValue};
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MeasurementValue {
    Numeric(f64),
    Text(String),
}

impl MeasurementValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MeasurementValue::Numeric(v) => Some(*v),
            MeasurementValue::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    pub name: String,
    pub value: MeasurementValue,
    /// May be empty.
    pub unit: String,
    pub description: String,
}

enum KeyMatch {
    Exact(&'static str),
    Contains(&'static str),
    ContainsAll(&'static [&'static str]),
}

struct Rule {
    key: KeyMatch,
    unit: &'static str,
    description: Option<&'static str>,
}

// First match wins.
const RULES: &[Rule] = &[
    Rule {
        key: KeyMatch::Contains("temperature"),
        unit: "°C",
        description: None,
    },
    Rule {
        key: KeyMatch::Exact("humidity"),
        unit: "%RH",
        description: Some("Relative Humidity"),
    },
    Rule {
        key: KeyMatch::ContainsAll(&["battery", "voltage"]),
        unit: "V",
        description: Some("Battery Voltage"),
    },
    Rule {
        key: KeyMatch::Contains("dew_point"),
        unit: "°C",
        description: Some("Dew Point"),
    },
];

impl KeyMatch {
    fn matches(&self, key: &str) -> bool {
        let lower = key.to_ascii_lowercase();
        match self {
            KeyMatch::Exact(name) => key == *name,
            KeyMatch::Contains(part) => lower.contains(part),
            KeyMatch::ContainsAll(parts) => parts.iter().all(|part| lower.contains(part)),
        }
    }
}

/// Unit and description inferred from a field name alone.
pub fn infer(key: &str) -> (String, String) {
    match RULES.iter().find(|rule| rule.key.matches(key)) {
        Some(rule) => (
            rule.unit.to_string(),
            rule.description
                .map(str::to_string)
                .unwrap_or_else(|| describe_key(key)),
        ),
        None => (String::new(), describe_key(key)),
    }
}

/// `"wall_temperature"` -> `"Wall Temperature"`, `"openAlarm"` -> `"Open Alarm"`.
pub fn describe_key(key: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    for part in key.split(['_', '-', ' ', '.']).filter(|p| !p.is_empty()) {
        let mut word = String::new();
        let mut prev_lower = false;
        for c in part.chars() {
            if c.is_ascii_uppercase() && prev_lower {
                words.push(std::mem::take(&mut word));
            }
            prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
            word.push(c);
        }
        words.push(word);
    }
    words
        .iter()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    excluded: HashSet<String>,
    round_decimals: Option<u32>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(&NormalizerConfig::default())
    }
}

impl Normalizer {
    pub fn new(config: &NormalizerConfig) -> Self {
        let excluded = DEFAULT_EXCLUDED_KEYS
            .iter()
            .map(|k| k.to_string())
            .chain(config.excluded_keys.iter().cloned())
            .collect();
        Self {
            excluded,
            round_decimals: config.round_decimals,
        }
    }

    pub fn normalize(&self, record: &DecodedRecord) -> Vec<Measurement> {
        let mut out = Vec::with_capacity(record.len());
        self.collect(record, None, &mut out);
        out
    }

    fn collect(&self, record: &DecodedRecord, prefix: Option<&str>, out: &mut Vec<Measurement>) {
        for (key, value) in record.iter() {
            if self.excluded.contains(key) {
                continue;
            }
            let name = match prefix {
                Some(prefix) => format!("{prefix}_{key}"),
                None => key.to_string(),
            };
            self.push(name, value, None, out);
        }
    }

    fn push(&self, name: String, value: &FieldValue, annotation: Option<(&str, Option<&str>)>, out: &mut Vec<Measurement>) {
        let scalar = match value {
            FieldValue::Annotated(a) => {
                return self.push(name, &a.value, Some((a.unit.as_str(), a.description.as_deref())), out);
            }
            FieldValue::Record(nested) => return self.collect(nested, Some(&name), out),
            FieldValue::Text(s) => MeasurementValue::Text(s.clone()),
            FieldValue::Integer(v) => MeasurementValue::Numeric(*v as f64),
            FieldValue::Unsigned(v) => MeasurementValue::Numeric(*v as f64),
            FieldValue::Boolean(b) => MeasurementValue::Numeric(if *b { 1.0 } else { 0.0 }),
            FieldValue::Float(v) => MeasurementValue::Numeric(self.round(*v)),
        };

        let (unit, description) = match annotation {
            Some((unit, Some(description))) => (unit.to_string(), description.to_string()),
            Some((unit, None)) => (unit.to_string(), infer(&name).1),
            None => infer(&name),
        };

        out.push(Measurement {
            name,
            value: scalar,
            unit,
            description,
        });
    }

    fn round(&self, value: f64) -> f64 {
        match self.round_decimals {
            Some(decimals) => {
                let factor = 10f64.powi(decimals as i32);
                (value * factor).round() / factor
            }
            None => value,
        }
    }
}
