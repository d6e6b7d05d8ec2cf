//! Model schemas and the per-adapter registry.

use std::collections::BTreeMap;

use crate::codec::FieldCodec;
use crate::error::{DbError, DbResult};
use crate::value::{CellValue, FieldValue, Record};

/// A declared secondary index: name plus the ordered fields it covers.
#[derive(Debug, Clone)]
pub struct IndexDecl {
    pub name: String,
    pub fields: Vec<String>,
}

/// Immutable description of one model: ordered key fields, value fields and
/// declared indexes. Built once via [`SchemaBuilder`], then shared.
#[derive(Debug, Clone)]
pub struct ModelSchema {
    name: String,
    key_fields: Vec<(String, FieldCodec)>,
    value_fields: Vec<(String, FieldCodec)>,
    indexes: Vec<IndexDecl>,
}

impl ModelSchema {
    pub fn builder(name: &str) -> SchemaBuilder {
        SchemaBuilder {
            name: name.to_string(),
            key_fields: Vec::new(),
            value_fields: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key fields in declaration order. Declaration order is key order.
    pub fn key_fields(&self) -> &[(String, FieldCodec)] {
        &self.key_fields
    }

    pub fn value_fields(&self) -> &[(String, FieldCodec)] {
        &self.value_fields
    }

    pub fn indexes(&self) -> &[IndexDecl] {
        &self.indexes
    }

    pub fn is_key_field(&self, field: &str) -> bool {
        self.key_fields.iter().any(|(name, _)| name == field)
    }

    pub fn key_names(&self) -> Vec<String> {
        self.key_fields.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn codec(&self, field: &str) -> Option<&FieldCodec> {
        self.key_fields
            .iter()
            .chain(self.value_fields.iter())
            .find(|(name, _)| name == field)
            .map(|(_, codec)| codec)
    }

    /// Encodes one field of a record, applying optional/default rules when the
    /// field is absent.
    pub fn encode_field(&self, field: &str, record: &Record) -> DbResult<CellValue> {
        let codec = self.codec(field).ok_or_else(|| DbError::UnknownField {
            model: self.name.clone(),
            field: field.to_string(),
        })?;
        codec.encode(field, record.get(field))
    }

    /// Encodes a single standalone value for use in a condition.
    pub fn encode_value(&self, field: &str, value: &FieldValue) -> DbResult<CellValue> {
        let codec = self.codec(field).ok_or_else(|| DbError::UnknownField {
            model: self.name.clone(),
            field: field.to_string(),
        })?;
        codec.validate(field, value)?;
        codec.encode(field, Some(value))
    }

    pub fn decode_field(&self, field: &str, cell: &CellValue) -> DbResult<FieldValue> {
        let codec = self.codec(field).ok_or_else(|| DbError::UnknownField {
            model: self.name.clone(),
            field: field.to_string(),
        })?;
        codec.decode(field, cell)
    }
}

/// Collects fields and indexes, then freezes into a [`ModelSchema`].
pub struct SchemaBuilder {
    name: String,
    key_fields: Vec<(String, FieldCodec)>,
    value_fields: Vec<(String, FieldCodec)>,
    indexes: Vec<IndexDecl>,
}

impl SchemaBuilder {
    pub fn key(mut self, field: &str, codec: FieldCodec) -> Self {
        self.key_fields.push((field.to_string(), codec));
        self
    }

    pub fn field(mut self, field: &str, codec: FieldCodec) -> Self {
        self.value_fields.push((field.to_string(), codec));
        self
    }

    pub fn index(mut self, name: &str, fields: &[&str]) -> Self {
        self.indexes.push(IndexDecl {
            name: name.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        });
        self
    }

    pub fn build(self) -> ModelSchema {
        ModelSchema {
            name: self.name,
            key_fields: self.key_fields,
            value_fields: self.value_fields,
            indexes: self.indexes,
        }
    }
}

/// Per-field metadata exposed to the condition builder.
#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub conditionable: bool,
    pub codec: FieldCodec,
}

/// Model name to field descriptors, derived once per adapter and shared with
/// the façade for condition validation.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: BTreeMap<String, BTreeMap<String, FieldDescriptor>>,
}

impl ModelRegistry {
    pub fn from_schemas<'a>(schemas: impl IntoIterator<Item = &'a ModelSchema>) -> Self {
        let mut models = BTreeMap::new();
        for schema in schemas {
            let mut fields = BTreeMap::new();
            for (name, codec) in schema.key_fields() {
                fields.insert(
                    name.clone(),
                    FieldDescriptor { conditionable: true, codec: codec.clone() },
                );
            }
            for (name, codec) in schema.value_fields() {
                // A value field is conditionable only when an index covers it.
                let indexed = schema
                    .indexes()
                    .iter()
                    .any(|index| index.fields.iter().any(|f| f == name));
                fields.insert(
                    name.clone(),
                    FieldDescriptor { conditionable: indexed, codec: codec.clone() },
                );
            }
            models.insert(schema.name().to_string(), fields);
        }
        ModelRegistry { models }
    }

    pub fn contains_model(&self, model: &str) -> bool {
        self.models.contains_key(model)
    }

    pub fn field(&self, model: &str, field: &str) -> DbResult<&FieldDescriptor> {
        let fields = self
            .models
            .get(model)
            .ok_or_else(|| DbError::UnknownModel(model.to_string()))?;
        fields.get(field).ok_or_else(|| DbError::UnknownField {
            model: model.to_string(),
            field: field.to_string(),
        })
    }

    /// Validates one condition reference: the field must exist, be
    /// conditionable, and accept the value.
    pub fn check_condition(&self, model: &str, field: &str, value: &FieldValue) -> DbResult<()> {
        let descriptor = self.field(model, field)?;
        if !descriptor.conditionable {
            return Err(DbError::NotConditionable {
                model: model.to_string(),
                field: field.to_string(),
            });
        }
        descriptor.codec.validate(field, value)
    }
}
