//! Per-model table layout for the item backend.
//!
//! The backend has no native composite primary keys and no ordered secondary
//! indexes, so the layout compensates: leading key fields fold into one
//! `/`-joined hash attribute, declared indexes become global secondary
//! indexes, and extra GSIs are synthesized so range queries over key prefixes
//! avoid full scans.

use crate::error::{DbError, DbResult};
use crate::plan::{DescriptorKind, KeyDescriptor, INDEX_NAME_JOIN, KEY_JOIN};
use crate::schema::ModelSchema;
use crate::value::{CellValue, Record};

use super::client::AttrMap;

/// Plain text form of a cell inside a folded composite attribute.
pub fn cell_text(cell: &CellValue) -> String {
    match cell {
        CellValue::Text(v) => v.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug)]
pub struct ItemTable {
    schema: ModelSchema,
    descriptors: Vec<KeyDescriptor>,
}

impl ItemTable {
    /// Derives the descriptor set. Declared index names must not collide with
    /// each other or with the names this layout synthesizes.
    pub fn new(schema: ModelSchema) -> DbResult<Self> {
        let key_names = schema.key_names();
        let (hash_fields, range_field) = match key_names.len() {
            0 => (Vec::new(), None),
            1 => (vec![key_names[0].clone()], None),
            _ => (
                key_names[..key_names.len() - 1].to_vec(),
                key_names.last().cloned(),
            ),
        };

        let mut descriptors = vec![KeyDescriptor {
            name: schema.name().to_string(),
            kind: DescriptorKind::Primary,
            cost: 0,
            hash_fields: hash_fields.clone(),
            range_field: range_field.clone(),
            fields: key_names.clone(),
        }];

        for index in schema.indexes() {
            let mut fields = index.fields.clone();
            for key in &key_names {
                if !fields.contains(key) {
                    fields.push(key.clone());
                }
            }
            descriptors.push(KeyDescriptor {
                name: index.name.clone(),
                kind: DescriptorKind::Index,
                cost: 2,
                hash_fields: vec![fields[0].clone()],
                range_field: fields.get(1).cloned(),
                fields,
            });
        }

        if key_names.len() >= 3 {
            descriptors.push(KeyDescriptor {
                name: format!("{}{}{}", key_names[0], INDEX_NAME_JOIN, key_names[1]),
                kind: DescriptorKind::Synthesized,
                cost: 2,
                hash_fields: vec![key_names[0].clone()],
                range_field: Some(key_names[1].clone()),
                fields: key_names.clone(),
            });
        }
        if key_names.len() >= 4 {
            descriptors.push(KeyDescriptor {
                name: format!(
                    "{}{KEY_JOIN}{}{KEY_JOIN}{}",
                    key_names[0], key_names[1], key_names[2]
                ),
                kind: DescriptorKind::Synthesized,
                cost: 1,
                hash_fields: vec![key_names[0].clone(), key_names[1].clone()],
                range_field: Some(key_names[2].clone()),
                fields: key_names.clone(),
            });
        }

        descriptors.push(KeyDescriptor {
            name: schema.name().to_string(),
            kind: DescriptorKind::Scan,
            cost: u32::MAX - 1,
            hash_fields,
            range_field,
            fields: key_names,
        });

        for (i, a) in descriptors.iter().enumerate() {
            if a.kind == DescriptorKind::Primary || a.kind == DescriptorKind::Scan {
                continue;
            }
            for b in descriptors.iter().skip(i + 1) {
                if b.kind != DescriptorKind::Primary
                    && b.kind != DescriptorKind::Scan
                    && a.name == b.name
                {
                    return Err(DbError::IndexNameCollision {
                        model: schema.name().to_string(),
                        index: a.name.clone(),
                    });
                }
            }
        }

        Ok(ItemTable { schema, descriptors })
    }

    pub fn schema(&self) -> &ModelSchema {
        &self.schema
    }

    pub fn descriptors(&self) -> &[KeyDescriptor] {
        &self.descriptors
    }

    pub fn primary(&self) -> &KeyDescriptor {
        // Constructed first, always present.
        &self.descriptors[0]
    }

    /// The synthesized ≥4-key descriptor whose folded hash attribute must be
    /// materialized on write.
    pub fn combined_descriptor(&self) -> Option<&KeyDescriptor> {
        self.descriptors
            .iter()
            .find(|d| d.kind == DescriptorKind::Synthesized && d.hash_fields.len() > 1)
    }

    /// Encodes a full record into an item, materializing the folded hash
    /// attributes the layout depends on. Fields resolving to null are not
    /// stored.
    pub fn record_to_item(&self, record: &Record) -> DbResult<AttrMap> {
        for field in record.keys() {
            if self.schema.codec(field).is_none() {
                return Err(DbError::UnexpectedField {
                    model: self.schema.name().to_string(),
                    field: field.clone(),
                });
            }
        }
        let mut item = AttrMap::new();
        let mut key_cells = Vec::new();
        for (field, _) in self.schema.key_fields() {
            let cell = self.schema.encode_field(field, record)?;
            if cell.is_null() {
                return Err(DbError::LostPrimaryKey { field: field.clone() });
            }
            key_cells.push((field.clone(), cell.clone()));
            item.insert(field.clone(), cell);
        }
        for (field, codec) in self.schema.value_fields() {
            if record.get(field).is_none() && !codec.is_optional() && !codec.has_default() {
                return Err(DbError::MissingField {
                    model: self.schema.name().to_string(),
                    field: field.clone(),
                });
            }
            let cell = self.schema.encode_field(field, record)?;
            if !cell.is_null() {
                item.insert(field.clone(), cell);
            }
        }

        let primary = self.primary();
        if primary.hash_fields.len() > 1 {
            item.insert(
                primary.hash_attr(),
                CellValue::Text(self.fold_hash(&primary.hash_fields, &key_cells)),
            );
        }
        if let Some(combined) = self.combined_descriptor() {
            item.insert(
                combined.hash_attr(),
                CellValue::Text(self.fold_hash(&combined.hash_fields, &key_cells)),
            );
        }
        Ok(item)
    }

    fn fold_hash(&self, fields: &[String], key_cells: &[(String, CellValue)]) -> String {
        let parts: Vec<String> = fields
            .iter()
            .filter_map(|field| {
                key_cells
                    .iter()
                    .find(|(name, _)| name == field)
                    .map(|(_, cell)| cell_text(cell))
            })
            .collect();
        parts.join(KEY_JOIN)
    }

    /// Decodes an item back into a record, skipping the synthetic folded
    /// attributes.
    pub fn item_to_record(&self, item: &AttrMap) -> DbResult<Record> {
        let mut record = Record::new();
        for (field, _) in self.schema.key_fields() {
            let cell = item
                .get(field)
                .ok_or_else(|| DbError::LostPrimaryKey { field: field.clone() })?;
            record.insert(field.clone(), self.schema.decode_field(field, cell)?);
        }
        for (field, _) in self.schema.value_fields() {
            let cell = item.get(field).cloned().unwrap_or(CellValue::Null);
            let value = self.schema.decode_field(field, &cell)?;
            if !value.is_null() {
                record.insert(field.clone(), value);
            }
        }
        Ok(record)
    }

    /// The wire key of a record: the folded hash attribute plus the range
    /// attribute when the table has one.
    pub fn record_key(&self, record: &Record) -> DbResult<AttrMap> {
        let mut key_cells = Vec::new();
        for (field, _) in self.schema.key_fields() {
            let cell = self.schema.encode_field(field, record)?;
            if cell.is_null() {
                return Err(DbError::LostPrimaryKey { field: field.clone() });
            }
            key_cells.push((field.clone(), cell));
        }
        Ok(self.key_from_cells(&key_cells))
    }

    pub fn key_from_cells(&self, key_cells: &[(String, CellValue)]) -> AttrMap {
        let primary = self.primary();
        let mut key = AttrMap::new();
        if primary.hash_fields.len() > 1 {
            key.insert(
                primary.hash_attr(),
                CellValue::Text(self.fold_hash(&primary.hash_fields, key_cells)),
            );
        } else if let Some(hash) = primary.hash_fields.first() {
            if let Some((_, cell)) = key_cells.iter().find(|(name, _)| name == hash) {
                key.insert(hash.clone(), cell.clone());
            }
        }
        if let Some(range) = &primary.range_field {
            if let Some((_, cell)) = key_cells.iter().find(|(name, _)| name == range) {
                key.insert(range.clone(), cell.clone());
            }
        }
        key
    }
}
