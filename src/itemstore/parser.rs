//! Expression synthesis for the item backend.
//!
//! Every attribute reference goes through a `#name` placeholder and every
//! literal through a `:value` placeholder, so reserved words can never
//! collide. Filter references use generated single-letter names.

use crate::condition::{ConditionSet, Operator};
use crate::error::{DbError, DbResult};
use crate::plan::{collect_bounds, DescriptorKind, FieldBound, KeyDescriptor};
use crate::value::CellValue;

use super::client::{
    AttrMap, DeleteItemRequest, ExpressionParts, GetItemRequest, PutItemRequest, QueryRequest,
    ScanRequest, UpdateItemRequest,
};
use super::table::{cell_text, ItemTable};

/// A planned read: a key-condition query or a filtered scan.
#[derive(Debug, Clone)]
pub enum ReadRequest {
    Query(QueryRequest),
    Scan(ScanRequest),
}

fn alphabet() -> Vec<char> {
    ('A'..='Z').collect()
}

fn comparator(operator: Operator) -> &'static str {
    match operator {
        Operator::Eq => "=",
        Operator::Gt => ">",
        Operator::Ge => ">=",
        Operator::Lt => "<",
        Operator::Le => "<=",
    }
}

/// Renders one field's bound as an expression fragment under placeholder
/// `reference`, merging the names/values into `parts`.
fn bound_fragment(
    reference: &str,
    attr: &str,
    bound: &FieldBound,
    parts: &mut ExpressionParts,
) -> String {
    parts.names.insert(format!("#{reference}"), attr.to_string());
    if let Some(point) = &bound.point {
        parts.values.insert(format!(":{reference}start"), point.clone());
        return format!("#{reference} = :{reference}start");
    }
    let mut fragments = Vec::new();
    if let Some((operator, cell)) = &bound.lower {
        parts.values.insert(format!(":{reference}start"), cell.clone());
        fragments.push(format!("#{reference} {} :{reference}start", comparator(*operator)));
    }
    if let Some((operator, cell)) = &bound.upper {
        parts.values.insert(format!(":{reference}end"), cell.clone());
        fragments.push(format!("#{reference} {} :{reference}end", comparator(*operator)));
    }
    fragments.join(" AND ")
}

/// Builds the query or scan a descriptor serves for the given conditions.
pub fn conditions_to_read(
    table: &ItemTable,
    table_name: &str,
    descriptor: &KeyDescriptor,
    set: &ConditionSet,
) -> DbResult<ReadRequest> {
    let group = set.single_group()?;
    let bounds = collect_bounds(table.schema(), &descriptor.fields, group, set)?;

    if descriptor.kind == DescriptorKind::Scan || set.includes_all {
        let mut parts = ExpressionParts::default();
        let mut refs = alphabet();
        let mut fragments = Vec::new();
        for (field, bound) in &bounds {
            if let Some(bound) = bound {
                // The alphabet outlasts any realistic key count.
                let reference = refs.pop().unwrap_or('0').to_string();
                fragments.push(bound_fragment(&reference, field, bound, &mut parts));
            }
        }
        let filter = if fragments.is_empty() { None } else { Some(fragments.join(" AND ")) };
        return Ok(ReadRequest::Scan(ScanRequest {
            table: table_name.to_string(),
            filter,
            expressions: parts,
            limit: None,
            start_key: None,
        }));
    }

    let mut parts = ExpressionParts::default();
    let hash_cell = hash_value(descriptor, &bounds)?;
    parts.names.insert("#pk".to_string(), descriptor.hash_attr());
    parts.values.insert(":pk".to_string(), hash_cell);
    let mut key_condition = "#pk = :pk".to_string();

    if let Some(range) = &descriptor.range_field {
        if let Some((_, Some(bound))) = bounds.iter().find(|(field, _)| field == range) {
            let fragment = bound_fragment(range, range, bound, &mut parts);
            key_condition = format!("{key_condition} AND {fragment}");
        }
    }

    let mut refs = alphabet();
    let mut filters = Vec::new();
    for (field, bound) in &bounds {
        let in_key = descriptor.hash_fields.contains(field)
            || descriptor.range_field.as_deref() == Some(field);
        if in_key {
            continue;
        }
        if let Some(bound) = bound {
            let reference = refs.pop().unwrap_or('0').to_string();
            filters.push(bound_fragment(&reference, field, bound, &mut parts));
        }
    }
    let filter = if filters.is_empty() { None } else { Some(filters.join(" AND ")) };

    Ok(ReadRequest::Query(QueryRequest {
        table: table_name.to_string(),
        index: descriptor.is_index_path().then(|| descriptor.name.clone()),
        key_condition,
        filter,
        expressions: parts,
        limit: None,
        forward: true,
        start_key: None,
    }))
}

/// The literal value of the descriptor's hash attribute. Multi-field hashes
/// fold into `/`-joined text.
fn hash_value(
    descriptor: &KeyDescriptor,
    bounds: &[(String, Option<FieldBound>)],
) -> DbResult<CellValue> {
    let mut cells = Vec::with_capacity(descriptor.hash_fields.len());
    for field in &descriptor.hash_fields {
        let bound = bounds
            .iter()
            .find(|(name, _)| name == field)
            .and_then(|(_, bound)| bound.as_ref())
            .and_then(|bound| bound.point.as_ref())
            .ok_or_else(|| DbError::LostPrimaryKey { field: field.clone() })?;
        cells.push(bound.clone());
    }
    if cells.len() == 1 {
        Ok(cells.remove(0))
    } else {
        let parts: Vec<String> = cells.iter().map(cell_text).collect();
        Ok(CellValue::Text(parts.join(crate::plan::KEY_JOIN)))
    }
}

/// The point key for a single-row operation. Every key field must be pinned
/// with `=`.
pub fn conditions_to_key(table: &ItemTable, set: &ConditionSet) -> DbResult<AttrMap> {
    let group = set.single_group()?;
    let schema = table.schema();
    let mut key_cells = Vec::with_capacity(schema.key_fields().len());
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
        key_cells.push((field.clone(), schema.encode_value(field, &condition.value)?));
    }
    Ok(table.key_from_cells(&key_cells))
}

pub fn get_item_request(table_name: &str, key: AttrMap) -> GetItemRequest {
    GetItemRequest { table: table_name.to_string(), key }
}

/// Insert with an absence precondition on the key attributes unless the
/// caller overrides.
pub fn put_item_request(
    table: &ItemTable,
    table_name: &str,
    item: AttrMap,
    override_existing: bool,
) -> PutItemRequest {
    let mut parts = ExpressionParts::default();
    let condition = if override_existing {
        None
    } else {
        let primary = table.primary();
        parts.names.insert("#c".to_string(), primary.hash_attr());
        let mut expression = "attribute_not_exists(#c)".to_string();
        if let Some(range) = &primary.range_field {
            parts.names.insert("#r".to_string(), range.clone());
            expression.push_str(" AND attribute_not_exists(#r)");
        }
        Some(expression)
    };
    PutItemRequest {
        table: table_name.to_string(),
        item,
        condition,
        expressions: parts,
    }
}

/// `SET`/`REMOVE` update over a point key, guarded by row existence.
pub fn update_item_request(
    table: &ItemTable,
    table_name: &str,
    key: AttrMap,
    puts: &[(String, CellValue)],
    removes: &[String],
) -> UpdateItemRequest {
    let mut parts = ExpressionParts::default();
    let mut update = String::new();
    if !puts.is_empty() {
        let fragments: Vec<String> = puts
            .iter()
            .map(|(field, cell)| {
                parts.names.insert(format!("#{field}"), field.clone());
                parts.values.insert(format!(":{field}"), cell.clone());
                format!("#{field} = :{field}")
            })
            .collect();
        update.push_str("SET ");
        update.push_str(&fragments.join(", "));
    }
    if !removes.is_empty() {
        let fragments: Vec<String> = removes
            .iter()
            .map(|field| {
                parts.names.insert(format!("#{field}"), field.clone());
                format!("#{field}")
            })
            .collect();
        if !update.is_empty() {
            update.push(' ');
        }
        update.push_str("REMOVE ");
        update.push_str(&fragments.join(", "));
    }
    let condition = existence_condition(table, &mut parts);
    UpdateItemRequest {
        table: table_name.to_string(),
        key,
        update,
        condition: Some(condition),
        expressions: parts,
    }
}

pub fn delete_item_request(
    table: &ItemTable,
    table_name: &str,
    key: AttrMap,
    expect_exists: bool,
) -> DeleteItemRequest {
    let mut parts = ExpressionParts::default();
    let condition = expect_exists.then(|| existence_condition(table, &mut parts));
    DeleteItemRequest {
        table: table_name.to_string(),
        key,
        condition,
        expressions: parts,
    }
}

fn existence_condition(table: &ItemTable, parts: &mut ExpressionParts) -> String {
    let primary = table.primary();
    parts.names.insert("#c".to_string(), primary.hash_attr());
    let mut expression = "attribute_exists(#c)".to_string();
    if let Some(range) = &primary.range_field {
        parts.names.insert("#r".to_string(), range.clone());
        expression.push_str(" AND attribute_exists(#r)");
    }
    expression
}
