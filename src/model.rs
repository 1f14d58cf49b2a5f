//! Data model shared by every stage of the harvest: the dynamic [`Value`]
//! type threaded through extraction chains, item/asset descriptors handed
//! out by inputs, and the final [`StructuredRecord`] handed to outputs.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Ordered string-keyed mapping used for nested values and records.
pub type Mapping = IndexMap<String, Value>;

// ============================================================================
// Values
// ============================================================================

/// Loosely-typed value written by extraction methods.
///
/// Mappings preserve insertion order so that serializing the same record
/// twice always yields the same bytes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Sequence(Vec<Value>),
    Mapping(Mapping),
}

/// The variant of a [`Value`], used in conflict and mismatch reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Null,
    Bool,
    Integer,
    Float,
    String,
    Sequence,
    Mapping,
}

impl ValueKind {
    /// Whether two writes of these kinds can share a key without a
    /// configured coercion rule.
    pub fn is_compatible_with(self, other: ValueKind) -> bool {
        use ValueKind::*;
        match (self, other) {
            (Null, _) | (_, Null) => true,
            (Integer | Float, Integer | Float) => true,
            (a, b) => a == b,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Integer => "integer",
            ValueKind::Float => "float",
            ValueKind::String => "string",
            ValueKind::Sequence => "sequence",
            ValueKind::Mapping => "mapping",
        };
        f.write_str(name)
    }
}

/// Explicit conversion applied at the merge or mapping boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Coercion {
    String,
    Integer,
    Float,
    Boolean,
    /// Wraps non-sequence values in a one-element sequence.
    Sequence,
    /// Parses a date or datetime string and renders it as
    /// `YYYY-MM-DDTHH:MM:SSZ` in UTC.
    Datetime,
}

impl fmt::Display for Coercion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Coercion::String => "string",
            Coercion::Integer => "integer",
            Coercion::Float => "float",
            Coercion::Boolean => "boolean",
            Coercion::Sequence => "sequence",
            Coercion::Datetime => "datetime",
        };
        f.write_str(name)
    }
}

/// A value could not be converted to the requested type.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("cannot coerce {from} value to {to}")]
pub struct CoercionError {
    pub from: ValueKind,
    pub to: Coercion,
}

const STAC_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Integer(_) => ValueKind::Integer,
            Value::Float(_) => ValueKind::Float,
            Value::String(_) => ValueKind::String,
            Value::Sequence(_) => ValueKind::Sequence,
            Value::Mapping(_) => ValueKind::Mapping,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Numeric view of integers, floats and numeric strings.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::Sequence(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&Mapping> {
        match self {
            Value::Mapping(map) => Some(map),
            _ => None,
        }
    }

    /// Renders scalars as plain text. Used when joining or hashing terms.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Converts this value according to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`CoercionError`] when the value has no sensible
    /// representation in the target type (e.g. a mapping as an integer, or
    /// an unparsable date string).
    pub fn coerce(&self, to: Coercion) -> Result<Value, CoercionError> {
        let fail = || CoercionError {
            from: self.kind(),
            to,
        };

        match to {
            Coercion::String => self.to_text().map(Value::String).ok_or_else(fail),
            Coercion::Integer => match self {
                Value::Integer(i) => Ok(Value::Integer(*i)),
                Value::Float(f) if f.fract() == 0.0 && f.is_finite() => {
                    Ok(Value::Integer(*f as i64))
                }
                Value::String(s) => s.trim().parse().map(Value::Integer).map_err(|_| fail()),
                _ => Err(fail()),
            },
            Coercion::Float => match self {
                Value::String(_) | Value::Integer(_) | Value::Float(_) => {
                    self.as_f64().map(Value::Float).ok_or_else(fail)
                }
                _ => Err(fail()),
            },
            Coercion::Boolean => match self {
                Value::Bool(b) => Ok(Value::Bool(*b)),
                Value::Integer(0) => Ok(Value::Bool(false)),
                Value::Integer(1) => Ok(Value::Bool(true)),
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" | "yes" => Ok(Value::Bool(true)),
                    "false" | "no" => Ok(Value::Bool(false)),
                    _ => Err(fail()),
                },
                _ => Err(fail()),
            },
            Coercion::Sequence => match self {
                Value::Sequence(items) => Ok(Value::Sequence(items.clone())),
                Value::Null => Ok(Value::Sequence(Vec::new())),
                other => Ok(Value::Sequence(vec![other.clone()])),
            },
            Coercion::Datetime => self
                .as_str()
                .and_then(parse_datetime)
                .map(|dt| Value::String(dt.format(STAC_DATETIME_FORMAT).to_string()))
                .ok_or_else(fail),
        }
    }
}

/// Parses RFC 3339 timestamps, naive `YYYY-MM-DDTHH:MM:SS[.f]` datetimes
/// (taken as UTC) and bare `YYYY-MM-DD` dates.
pub fn parse_datetime(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(input, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        i64::try_from(value)
            .map(Value::Integer)
            .unwrap_or(Value::Float(value as f64))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::Sequence(value)
    }
}

impl From<Mapping> for Value {
    fn from(value: Mapping) -> Self {
        Value::Mapping(value)
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Sequence(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Mapping(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

// ============================================================================
// Scope
// ============================================================================

/// Whether a field applies once per catalog entry or once per asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    #[default]
    Item,
    Asset,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Item => f.write_str("item"),
            Scope::Asset => f.write_str("asset"),
        }
    }
}

// ============================================================================
// Descriptors
// ============================================================================

/// Handle to one discoverable unit produced by an input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemDescriptor {
    /// Identifier used for logging and failure attribution
    pub id: String,

    /// Location of the item (file path, URL, object key)
    pub uri: String,

    /// Sub-resources in enumeration order
    #[serde(default)]
    pub assets: Vec<AssetDescriptor>,

    /// Extra facets supplied by the input itself
    #[serde(default)]
    pub attributes: Mapping,
}

impl ItemDescriptor {
    /// Creates an item whose id is its URI.
    pub fn new(uri: impl Into<String>) -> Self {
        let uri = uri.into();
        Self {
            id: uri.clone(),
            uri,
            assets: Vec::new(),
            attributes: Mapping::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_asset(mut self, asset: AssetDescriptor) -> Self {
        self.assets.push(asset);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// One sub-resource of an item, e.g. a single file of a multi-file dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    pub href: String,

    #[serde(default)]
    pub attributes: Mapping,
}

impl AssetDescriptor {
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            attributes: Mapping::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

// ============================================================================
// Structured Record
// ============================================================================

/// Final schema-conformant record for one item.
///
/// Built only by the [`Mapper`](crate::harvest::Mapper); there is no way to
/// mutate it afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuredRecord {
    #[serde(skip)]
    item_id: String,

    #[serde(flatten)]
    fields: Mapping,
}

impl StructuredRecord {
    pub(crate) fn new(item_id: String, fields: Mapping) -> Self {
        Self { item_id, fields }
    }

    /// Identifier of the item this record was built from.
    pub fn item_id(&self) -> &str {
        &self.item_id
    }

    pub fn fields(&self) -> &Mapping {
        &self.fields
    }

    /// Looks up a dotted path such as `properties.datetime`.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.fields.get(segments.next()?)?;
        for segment in segments {
            current = current.as_mapping()?.get(segment)?;
        }
        Some(current)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

// ============================================================================
// Tests
// ============================================================================
