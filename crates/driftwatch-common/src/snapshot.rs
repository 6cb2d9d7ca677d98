//! Structured observations of a tracked entity and their content hash.
//!
//! A [`Snapshot`] is a map of named fields, each a scalar (text, number,
//! boolean) or a collection of `heading -> text` sections. Snapshots are
//! normalized on construction so that a missing optional field and an
//! empty one are indistinguishable, and [`Snapshot::content_hash`] is a
//! pure function of that normalized content.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

/// Name of the section collection whose headings are reported unqualified
/// in diffs.
pub const DEFAULT_SECTIONS_FIELD: &str = "sections";

/// One observed field value.
///
/// The serialized form is the natural JSON shape of each variant: a string,
/// a number, a boolean, or an object of strings.
///
/// # Examples
///
/// ```
/// use driftwatch_common::snapshot::FieldValue;
///
/// let v: FieldValue = serde_json::from_str("299.5").unwrap();
/// assert_eq!(v.as_number(), Some(299.5));
/// let v: FieldValue = serde_json::from_str("true").unwrap();
/// assert_eq!(v.as_bool(), Some(true));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(f64),
    Text(String),
    Sections(BTreeMap<String, String>),
}

impl FieldValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_sections(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            FieldValue::Sections(s) => Some(s),
            _ => None,
        }
    }

    /// Empty text and empty section collections carry no content.
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::Sections(s) => s.is_empty(),
            FieldValue::Bool(_) | FieldValue::Number(_) => false,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(b) => write!(f, "{b}"),
            FieldValue::Number(n) => write!(f, "{n}"),
            FieldValue::Text(s) => write!(f, "{s}"),
            FieldValue::Sections(s) => {
                let headings: Vec<&str> = s.keys().map(String::as_str).collect();
                write!(f, "[{}]", headings.join(", "))
            }
        }
    }
}

/// Reasons an extracted value cannot be accepted as a [`Snapshot`].
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Snapshot: expected a JSON object at the top level, got {0}")]
    NotAnObject(&'static str),

    #[error("Snapshot: field '{field}' has unsupported type {found}")]
    UnsupportedField { field: String, found: &'static str },

    #[error("Snapshot: section '{heading}' in field '{field}' is not a string")]
    NonTextSection { field: String, heading: String },

    #[error("Snapshot: field '{0}' is not a finite number")]
    NonFiniteNumber(String),

    #[error("Snapshot: two sections share the diff key '{0}'")]
    SectionKeyClash(String),

    #[error("Snapshot: no hashable content after normalization")]
    Empty,

    #[error("Snapshot: invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Hex-encoded SHA-256 digest of a snapshot's normalized content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ContentHash {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A structured observation of one entity at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    fields: BTreeMap<String, FieldValue>,
    pub captured_at: DateTime<Utc>,
}

impl Snapshot {
    /// Builds a snapshot, dropping empty fields.
    pub fn new(fields: BTreeMap<String, FieldValue>, captured_at: DateTime<Utc>) -> Self {
        let fields = fields
            .into_iter()
            .filter(|(_, v)| !v.is_empty())
            .collect();
        Self {
            fields,
            captured_at,
        }
    }

    /// Validates and normalizes an extractor's JSON output.
    ///
    /// `null` fields are treated as absent. Arrays, nested non-string
    /// section values, sections whose flattened keys collide and a
    /// snapshot with no remaining content are rejected as malformed.
    pub fn from_json(
        value: serde_json::Value,
        captured_at: DateTime<Utc>,
    ) -> Result<Self, SnapshotError> {
        use serde_json::Value;

        let object = match value {
            Value::Object(map) => map,
            other => return Err(SnapshotError::NotAnObject(json_type(&other))),
        };

        let mut fields = BTreeMap::new();
        for (name, raw) in object {
            let field = match raw {
                Value::Null => continue,
                Value::Bool(b) => FieldValue::Bool(b),
                Value::Number(n) => match n.as_f64() {
                    Some(f) if f.is_finite() => FieldValue::Number(f),
                    _ => return Err(SnapshotError::NonFiniteNumber(name)),
                },
                Value::String(s) => FieldValue::Text(s),
                Value::Object(sections) => {
                    let mut collected = BTreeMap::new();
                    for (heading, text) in sections {
                        match text {
                            Value::String(t) => {
                                collected.insert(heading, t);
                            }
                            Value::Null => {}
                            _ => {
                                return Err(SnapshotError::NonTextSection {
                                    field: name,
                                    heading,
                                })
                            }
                        }
                    }
                    FieldValue::Sections(collected)
                }
                Value::Array(_) => {
                    return Err(SnapshotError::UnsupportedField {
                        field: name,
                        found: "array",
                    })
                }
            };
            fields.insert(name, field);
        }

        let snapshot = Self::new(fields, captured_at);
        if snapshot.fields.is_empty() {
            return Err(SnapshotError::Empty);
        }
        if let Some(key) = snapshot.section_key_clash() {
            return Err(SnapshotError::SectionKeyClash(key));
        }
        Ok(snapshot)
    }

    /// Parses extractor output from raw JSON text.
    pub fn from_json_str(raw: &str, captured_at: DateTime<Utc>) -> Result<Self, SnapshotError> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        Self::from_json(value, captured_at)
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn number(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(FieldValue::as_number)
    }

    pub fn boolean(&self, field: &str) -> Option<bool> {
        self.get(field).and_then(FieldValue::as_bool)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Flattened view of every section across all section collections,
    /// keyed by the heading as reported in diffs.
    pub fn sections(&self) -> BTreeMap<String, &str> {
        let mut out = BTreeMap::new();
        for (field, value) in &self.fields {
            if let FieldValue::Sections(sections) = value {
                for (heading, text) in sections {
                    out.insert(section_key(field, heading), text.as_str());
                }
            }
        }
        out
    }

    fn section_key_clash(&self) -> Option<String> {
        let mut seen = HashSet::new();
        self.fields
            .iter()
            .filter_map(|(field, value)| value.as_sections().map(|s| (field, s)))
            .flat_map(|(field, sections)| sections.keys().map(move |h| section_key(field, h)))
            .find(|key| !seen.insert(key.clone()))
    }

    /// Deterministic digest of the normalized content.
    ///
    /// Field names are visited in sorted order, sections sorted by heading,
    /// and every string is length-prefixed so adjacent values cannot run
    /// together. The capture time is not part of the hash.
    pub fn content_hash(&self) -> ContentHash {
        let mut hasher = Sha256::new();
        for (name, value) in &self.fields {
            write_str(&mut hasher, name);
            match value {
                FieldValue::Bool(b) => {
                    hasher.update([b'b', u8::from(*b)]);
                }
                FieldValue::Number(n) => {
                    // -0.0 and 0.0 compare equal and must hash equal
                    let n = if *n == 0.0 { 0.0_f64 } else { *n };
                    hasher.update([b'n']);
                    hasher.update(n.to_bits().to_be_bytes());
                }
                FieldValue::Text(s) => {
                    hasher.update([b't']);
                    write_str(&mut hasher, s);
                }
                FieldValue::Sections(sections) => {
                    hasher.update([b's']);
                    hasher.update((sections.len() as u64).to_be_bytes());
                    for (heading, text) in sections {
                        write_str(&mut hasher, heading);
                        write_str(&mut hasher, text);
                    }
                }
            }
        }
        ContentHash(format!("{:x}", hasher.finalize()))
    }
}

/// Heading key used in diffs for a section of the given collection field.
pub fn section_key(field: &str, heading: &str) -> String {
    if field == DEFAULT_SECTIONS_FIELD {
        heading.to_string()
    } else {
        format!("{field}/{heading}")
    }
}

fn write_str(hasher: &mut Sha256, s: &str) {
    hasher.update((s.len() as u64).to_be_bytes());
    hasher.update(s.as_bytes());
}

fn json_type(value: &serde_json::Value) -> &'static str {
    use serde_json::Value;
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
