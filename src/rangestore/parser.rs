//! Record and condition translation for the ordered-range backend.

use crate::condition::{ConditionSet, Operator};
use crate::error::{DbError, DbResult};
use crate::plan::{collect_bounds, FieldBound, KeyDescriptor};
use crate::schema::ModelSchema;
use crate::value::{CellValue, Record};

use super::client::{KeyTuple, StoreRow};

/// Builds the point primary-key tuple from equality conditions. Every key
/// component must be pinned with `=`.
pub fn conditions_to_primary_key(
    schema: &ModelSchema,
    set: &ConditionSet,
) -> DbResult<KeyTuple> {
    let group = set.single_group()?;
    let mut key = Vec::with_capacity(schema.key_fields().len());
    for (field, _) in schema.key_fields() {
        let condition = group
            .iter()
            .find(|c| &c.field == field)
            .ok_or_else(|| DbError::LostPrimaryKey { field: field.clone() })?;
        if !condition.operator.is_equality() {
            return Err(DbError::NonEqualityKeyCondition {
                field: field.clone(),
                operator: condition.operator.to_string(),
            });
        }
        key.push((field.clone(), schema.encode_value(field, &condition.value)?));
    }
    Ok(key)
}

/// Start/end tuples for a range read over `fields`, filled with open-range
/// sentinels where conditions leave a component unbound. Exclusive bounds are
/// realized by stepping integer values by one.
pub fn conditions_to_range(
    schema: &ModelSchema,
    fields: &[String],
    set: &ConditionSet,
) -> DbResult<(KeyTuple, KeyTuple)> {
    let group = set.single_group()?;
    let bounds = collect_bounds(schema, fields, group, set)?;
    let mut start = Vec::with_capacity(fields.len());
    let mut end = Vec::with_capacity(fields.len());
    for (field, bound) in bounds {
        let (lower, upper) = realize_bound(&field, bound)?;
        start.push((field.clone(), lower));
        end.push((field, upper));
    }
    Ok((start, end))
}

fn realize_bound(field: &str, bound: Option<FieldBound>) -> DbResult<(CellValue, CellValue)> {
    let Some(bound) = bound else {
        return Ok((CellValue::InfMin, CellValue::InfMax));
    };
    if let Some(point) = bound.point {
        return Ok((point.clone(), point));
    }
    let lower = match bound.lower {
        Some((Operator::Gt, cell)) => step(field, cell, 1)?,
        Some((_, cell)) => cell,
        None => CellValue::InfMin,
    };
    let upper = match bound.upper {
        Some((Operator::Lt, cell)) => step(field, cell, -1)?,
        Some((_, cell)) => cell,
        None => CellValue::InfMax,
    };
    Ok((lower, upper))
}

fn step(field: &str, cell: CellValue, delta: i64) -> DbResult<CellValue> {
    match cell {
        CellValue::Long(v) => Ok(match v.checked_add(delta) {
            Some(stepped) => CellValue::Long(stepped),
            // Stepping past the integer limit leaves no representable value;
            // the realized bound excludes everything.
            None if delta > 0 => CellValue::InfMax,
            None => CellValue::InfMin,
        }),
        _ => Err(DbError::NonIntegerRangeBound { field: field.to_string() }),
    }
}

/// Overwrites the start tuple component-by-component with the continuation
/// key the backend returned.
pub fn advance_start(start: &mut KeyTuple, next_start: &KeyTuple) {
    for (field, cell) in start.iter_mut() {
        if let Some((_, next)) = next_start.iter().find(|(name, _)| name == field) {
            *cell = next.clone();
        }
    }
}

/// Encodes a full record into a row. Every key must resolve to a concrete
/// cell; value fields go through their optional/default rules, and fields
/// resolving to null are not stored.
pub fn record_to_row(schema: &ModelSchema, record: &Record) -> DbResult<StoreRow> {
    for field in record.keys() {
        if schema.codec(field).is_none() {
            return Err(DbError::UnexpectedField {
                model: schema.name().to_string(),
                field: field.clone(),
            });
        }
    }
    let mut key = Vec::with_capacity(schema.key_fields().len());
    for (field, _) in schema.key_fields() {
        let cell = schema.encode_field(field, record)?;
        if cell.is_null() {
            return Err(DbError::LostPrimaryKey { field: field.clone() });
        }
        key.push((field.clone(), cell));
    }
    let mut columns = Vec::new();
    for (field, codec) in schema.value_fields() {
        if record.get(field).is_none() && !codec.is_optional() && !codec.has_default() {
            return Err(DbError::MissingField {
                model: schema.name().to_string(),
                field: field.clone(),
            });
        }
        let cell = schema.encode_field(field, record)?;
        if !cell.is_null() {
            columns.push((field.clone(), cell));
        }
    }
    Ok(StoreRow { key, columns })
}

/// Decodes a row back into a record. Null and absent cells fall back to the
/// codec's default when one exists; optional fields stay absent.
pub fn row_to_record(schema: &ModelSchema, row: &StoreRow) -> DbResult<Record> {
    let mut record = Record::new();
    for (field, _) in schema.key_fields() {
        let cell = row
            .key
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, cell)| cell.clone())
            .ok_or_else(|| DbError::LostPrimaryKey { field: field.clone() })?;
        record.insert(field.clone(), schema.decode_field(field, &cell)?);
    }
    for (field, _) in schema.value_fields() {
        let cell = row
            .columns
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, cell)| cell.clone())
            .unwrap_or(CellValue::Null);
        let value = schema.decode_field(field, &cell)?;
        if !value.is_null() {
            record.insert(field.clone(), value);
        }
    }
    Ok(record)
}

/// Picks the table's primary-key cells out of an index row. Index rows carry
/// the index components plus every uncovered key component.
pub fn pick_primary_key(schema: &ModelSchema, row: &StoreRow) -> DbResult<KeyTuple> {
    let mut key = Vec::with_capacity(schema.key_fields().len());
    for (field, _) in schema.key_fields() {
        let cell = row
            .key
            .iter()
            .chain(row.columns.iter())
            .find(|(name, _)| name == field)
            .map(|(_, cell)| cell.clone())
            .ok_or_else(|| DbError::LostPrimaryKey { field: field.clone() })?;
        key.push((field.clone(), cell));
    }
    Ok(key)
}

/// Builds descriptors for every way into a model on this backend: the primary
/// key itself, plus one descriptor per declared native index whose components
/// are the declared fields followed by the uncovered key fields.
pub fn build_descriptors(schema: &ModelSchema) -> DbResult<Vec<KeyDescriptor>> {
    use crate::plan::DescriptorKind;

    let key_names = schema.key_names();
    let mut descriptors = vec![KeyDescriptor {
        name: schema.name().to_string(),
        kind: DescriptorKind::Primary,
        cost: key_names.len() as u32,
        hash_fields: Vec::new(),
        range_field: None,
        fields: key_names.clone(),
    }];
    for index in schema.indexes() {
        if descriptors.iter().any(|d| d.name == index.name) {
            return Err(DbError::IndexNameCollision {
                model: schema.name().to_string(),
                index: index.name.clone(),
            });
        }
        let mut fields = index.fields.clone();
        for key in &key_names {
            if !fields.contains(key) {
                fields.push(key.clone());
            }
        }
        descriptors.push(KeyDescriptor {
            name: index.name.clone(),
            kind: DescriptorKind::Index,
            cost: fields.len() as u32,
            hash_fields: Vec::new(),
            range_field: None,
            fields,
        });
    }
    Ok(descriptors)
}

/// Renders a key tuple for the operation log.
pub fn describe_key(key: &KeyTuple) -> String {
    let parts: Vec<String> = key.iter().map(|(field, cell)| format!("{field}={cell}")).collect();
    parts.join(", ")
}
