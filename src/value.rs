//! Dynamic field and wire values.
//!
//! `FieldValue` is what applications read and write through the façade;
//! `CellValue` is what the backend clients carry on the wire. The two are
//! bridged by [`crate::codec::FieldCodec`].

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A record as seen by the application: field name to dynamic value.
///
/// Absent fields and fields holding [`FieldValue::Null`] are treated the same
/// way by the codec layer, matching how optional and default-valued fields
/// behave.
pub type Record = BTreeMap<String, FieldValue>;

/// Application-facing dynamic value for a single field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
    Null,
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(v) => write!(f, "{v}"),
            FieldValue::Integer(v) => write!(f, "{v}"),
            FieldValue::Float(v) => write!(f, "{v}"),
            // Quoted like JSON so error messages show exact string contents.
            FieldValue::Text(v) => {
                write!(f, "{}", serde_json::to_string(v).unwrap_or_else(|_| v.clone()))
            }
            FieldValue::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            FieldValue::Timestamp(v) => write!(f, "{}", v.to_rfc3339()),
            FieldValue::Null => write!(f, "null"),
        }
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(v: Vec<u8>) -> Self {
        FieldValue::Bytes(v)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(v)
    }
}

/// Wire-facing value carried in backend requests and rows.
///
/// `InfMin`/`InfMax` are the open-range sentinels used when a key component is
/// unbound; they sort below and above every concrete value.
#[derive(Debug, Clone)]
pub enum CellValue {
    Bool(bool),
    Long(i64),
    Double(f64),
    Text(String),
    Blob(Vec<u8>),
    Null,
    InfMin,
    InfMax,
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    fn kind_rank(&self) -> u8 {
        match self {
            CellValue::InfMin => 0,
            CellValue::Null => 1,
            CellValue::Bool(_) => 2,
            CellValue::Long(_) | CellValue::Double(_) => 3,
            CellValue::Text(_) => 4,
            CellValue::Blob(_) => 5,
            CellValue::InfMax => 6,
        }
    }
}

// Equality must agree with `Ord`: `Long` and `Double` compare numerically, so
// they are also equal numerically.
impl PartialEq for CellValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for CellValue {}

impl Ord for CellValue {
    fn cmp(&self, other: &Self) -> Ordering {
        use CellValue::*;
        match (self, other) {
            (Bool(a), Bool(b)) => a.cmp(b),
            (Long(a), Long(b)) => a.cmp(b),
            (Double(a), Double(b)) => a.total_cmp(b),
            (Long(a), Double(b)) => (*a as f64).total_cmp(b),
            (Double(a), Long(b)) => a.total_cmp(&(*b as f64)),
            (Text(a), Text(b)) => a.cmp(b),
            (Blob(a), Blob(b)) => a.cmp(b),
            _ => self.kind_rank().cmp(&other.kind_rank()),
        }
    }
}

impl PartialOrd for CellValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Bool(v) => write!(f, "{v}"),
            CellValue::Long(v) => write!(f, "{v}"),
            CellValue::Double(v) => write!(f, "{v}"),
            CellValue::Text(v) => {
                write!(f, "{}", serde_json::to_string(v).unwrap_or_else(|_| v.clone()))
            }
            CellValue::Blob(v) => write!(f, "<{} bytes>", v.len()),
            CellValue::Null => write!(f, "null"),
            CellValue::InfMin => write!(f, "-inf"),
            CellValue::InfMax => write!(f, "+inf"),
        }
    }
}
