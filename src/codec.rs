//! Per-field type codecs.
//!
//! A [`FieldCodec`] owns the three steps a field value goes through: validate
//! an application value against the declared kind, encode it into a wire
//! [`CellValue`], and decode a wire cell back. Wrappers add optionality and
//! default substitution without changing the base kind.

use chrono::{DateTime, Utc};

use crate::error::{DbError, DbResult};
use crate::value::{CellValue, FieldValue};

#[derive(Debug, Clone, PartialEq)]
enum Kind {
    Bool,
    String,
    Integer,
    Float,
    Bytes,
    Timestamp,
    Enums(Vec<String>),
}

/// Validate/encode/decode for a single declared field.
#[derive(Debug, Clone)]
pub struct FieldCodec {
    kind: Kind,
    optional: bool,
    default: Option<FieldValue>,
}

impl FieldCodec {
    pub fn bool() -> Self {
        Self::base(Kind::Bool)
    }

    pub fn string() -> Self {
        Self::base(Kind::String)
    }

    pub fn integer() -> Self {
        Self::base(Kind::Integer)
    }

    pub fn float() -> Self {
        Self::base(Kind::Float)
    }

    pub fn bytes() -> Self {
        Self::base(Kind::Bytes)
    }

    pub fn timestamp() -> Self {
        Self::base(Kind::Timestamp)
    }

    /// An enumeration stored as the `Long` index of the variant.
    pub fn enums(variants: &[&str]) -> Self {
        Self::base(Kind::Enums(variants.iter().map(|v| v.to_string()).collect()))
    }

    fn base(kind: Kind) -> Self {
        FieldCodec { kind, optional: false, default: None }
    }

    /// Absent or null values stay null on the wire instead of being rejected.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Substituted when the application omits the field and when the wire
    /// holds null. The stored form is the encoded default.
    pub fn default_value(mut self, value: impl Into<FieldValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    /// Checks that `value` fits the declared kind. Null passes only for
    /// optional or defaulted fields.
    pub fn validate(&self, field: &str, value: &FieldValue) -> DbResult<()> {
        if value.is_null() {
            if self.optional || self.default.is_some() {
                return Ok(());
            }
            return Err(self.invalid(field, value));
        }
        let ok = match (&self.kind, value) {
            (Kind::Bool, FieldValue::Bool(_)) => true,
            (Kind::String, FieldValue::Text(_)) => true,
            (Kind::Integer, FieldValue::Integer(_)) => true,
            (Kind::Float, FieldValue::Float(_)) | (Kind::Float, FieldValue::Integer(_)) => true,
            (Kind::Bytes, FieldValue::Bytes(_)) => true,
            (Kind::Timestamp, FieldValue::Timestamp(_)) => true,
            (Kind::Enums(variants), FieldValue::Text(v)) => variants.iter().any(|x| x == v),
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(self.invalid(field, value))
        }
    }

    /// Encodes an application value into its wire cell. `value = None` means
    /// the field is absent from the record.
    pub fn encode(&self, field: &str, value: Option<&FieldValue>) -> DbResult<CellValue> {
        let effective = match value {
            Some(v) if !v.is_null() => v.clone(),
            _ => match &self.default {
                Some(d) => d.clone(),
                None if self.optional => return Ok(CellValue::Null),
                None => {
                    return Err(self.invalid(field, value.unwrap_or(&FieldValue::Null)));
                }
            },
        };
        self.validate(field, &effective)?;
        Ok(match (&self.kind, effective) {
            (Kind::Bool, FieldValue::Bool(v)) => CellValue::Bool(v),
            (Kind::String, FieldValue::Text(v)) => CellValue::Text(v),
            (Kind::Integer, FieldValue::Integer(v)) => CellValue::Long(v),
            (Kind::Float, FieldValue::Float(v)) => CellValue::Double(v),
            (Kind::Float, FieldValue::Integer(v)) => CellValue::Double(v as f64),
            (Kind::Bytes, FieldValue::Bytes(v)) => CellValue::Blob(v),
            (Kind::Timestamp, FieldValue::Timestamp(v)) => CellValue::Text(v.to_rfc3339()),
            (Kind::Enums(variants), FieldValue::Text(v)) => {
                // validate() guarantees membership.
                let index = variants.iter().position(|x| *x == v).unwrap_or_default();
                CellValue::Long(index as i64)
            }
            (_, v) => return Err(self.invalid(field, &v)),
        })
    }

    /// Decodes a wire cell back into an application value.
    pub fn decode(&self, field: &str, cell: &CellValue) -> DbResult<FieldValue> {
        if cell.is_null() {
            if let Some(d) = &self.default {
                return Ok(d.clone());
            }
            if self.optional {
                return Ok(FieldValue::Null);
            }
            return Err(self.invalid(field, &FieldValue::Null));
        }
        match (&self.kind, cell) {
            (Kind::Bool, CellValue::Bool(v)) => Ok(FieldValue::Bool(*v)),
            (Kind::String, CellValue::Text(v)) => Ok(FieldValue::Text(v.clone())),
            (Kind::Integer, CellValue::Long(v)) => Ok(FieldValue::Integer(*v)),
            (Kind::Float, CellValue::Double(v)) => Ok(FieldValue::Float(*v)),
            (Kind::Float, CellValue::Long(v)) => Ok(FieldValue::Float(*v as f64)),
            (Kind::Bytes, CellValue::Blob(v)) => Ok(FieldValue::Bytes(v.clone())),
            (Kind::Timestamp, CellValue::Text(v)) => {
                let parsed: DateTime<Utc> = v
                    .parse()
                    .map_err(|_| DbError::InvalidValue {
                        field: field.to_string(),
                        value: FieldValue::Text(v.clone()),
                    })?;
                Ok(FieldValue::Timestamp(parsed))
            }
            (Kind::Enums(variants), CellValue::Long(v)) => variants
                .get(*v as usize)
                .map(|x| FieldValue::Text(x.clone()))
                .ok_or_else(|| DbError::InvalidValue {
                    field: field.to_string(),
                    value: FieldValue::Integer(*v),
                }),
            _ => Err(DbError::InvalidValue {
                field: field.to_string(),
                value: FieldValue::Text(cell.to_string()),
            }),
        }
    }

    fn invalid(&self, field: &str, value: &FieldValue) -> DbError {
        DbError::InvalidValue { field: field.to_string(), value: value.clone() }
    }
}
