//! Key descriptors, descriptor selection, and range-bound collection.
//!
//! Each adapter derives an immutable descriptor list per model at
//! construction. A query selects the cheapest descriptor matching its
//! condition set, then the descriptor's ordered fields drive request
//! synthesis.

use crate::condition::{Condition, ConditionSet, Operator};
use crate::error::{DbError, DbResult};
use crate::schema::ModelSchema;
use crate::value::CellValue;

/// Separator folding several key fields into one composite hash attribute.
pub const KEY_JOIN: &str = "/";
/// Separator for synthesized index names (the item store forbids `/` there).
pub const INDEX_NAME_JOIN: &str = "-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    /// The table's own primary key.
    Primary,
    /// A secondary index the schema declares.
    Index,
    /// A planner-invented index compensating for missing native indexing.
    Synthesized,
    /// Full-scan fallback.
    Scan,
}

/// One way to reach rows of a model, with the cost used for selection.
///
/// `hash_fields` are the components that must be fixed by equality before the
/// backend can use the descriptor (empty on backends with ordered-scan
/// primaries). `fields` is the full ordered component list conditions may
/// reference through this descriptor.
#[derive(Debug, Clone)]
pub struct KeyDescriptor {
    pub name: String,
    pub kind: DescriptorKind,
    pub cost: u32,
    pub hash_fields: Vec<String>,
    pub range_field: Option<String>,
    pub fields: Vec<String>,
}

impl KeyDescriptor {
    /// The physical attribute name of the hash component. Multi-field hashes
    /// fold into one `/`-joined attribute.
    pub fn hash_attr(&self) -> String {
        self.hash_fields.join(KEY_JOIN)
    }

    /// True for paths that read through an index rather than the table itself.
    pub fn is_index_path(&self) -> bool {
        matches!(self.kind, DescriptorKind::Index | DescriptorKind::Synthesized)
    }

    fn is_bound(&self, set: &ConditionSet, field: &str) -> bool {
        set.groups.iter().flatten().any(|c| c.field == field)
    }

    /// Whether this descriptor can serve the condition set. May fail with
    /// `LostPrimaryKey` when a later key component is bound while an earlier
    /// one is not.
    fn matches(&self, set: &ConditionSet) -> DbResult<bool> {
        for condition in set.groups.iter().flatten() {
            if !self.fields.contains(&condition.field) {
                return Ok(false);
            }
            // Hash components only support equality; inequalities must go
            // through the range component or a filter.
            if !condition.operator.is_equality()
                && self.kind != DescriptorKind::Scan
                && self.hash_fields.contains(&condition.field)
            {
                return Ok(false);
            }
        }
        if matches!(self.kind, DescriptorKind::Primary | DescriptorKind::Scan)
            && !self.hash_fields.is_empty()
        {
            let mut missing: Option<&String> = None;
            for field in self.hash_fields.iter().chain(self.range_field.iter()) {
                if self.is_bound(set, field) {
                    if let Some(lost) = missing {
                        return Err(DbError::LostPrimaryKey { field: lost.clone() });
                    }
                } else {
                    missing = Some(field);
                }
            }
            for field in &self.hash_fields {
                if !self.is_bound(set, field) {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

/// Picks the cheapest matching descriptor. `includes_all` always resolves to
/// the primary; a matching primary descriptor short-circuits the search since
/// every key component is then fixed.
pub fn select_descriptor<'a>(
    descriptors: &'a [KeyDescriptor],
    set: &ConditionSet,
    model: &str,
) -> DbResult<&'a KeyDescriptor> {
    if set.includes_all {
        return descriptors
            .iter()
            .find(|d| d.kind == DescriptorKind::Primary)
            .ok_or_else(|| DbError::UnknownModel(model.to_string()));
    }
    let mut suitable: Option<&KeyDescriptor> = None;
    let mut current_cost = u32::MAX;
    for descriptor in descriptors {
        if descriptor.cost < current_cost && descriptor.matches(set)? {
            suitable = Some(descriptor);
            current_cost = descriptor.cost;
        }
        if let Some(found) = suitable {
            if found.kind == DescriptorKind::Primary {
                return Ok(found);
            }
        }
    }
    suitable.ok_or_else(|| DbError::UnresolvableConditions {
        model: model.to_string(),
        conditions: set.to_string(),
    })
}

/// Range bound accumulated for one key component: an exact point, or
/// inclusive/exclusive edges on either side. At most one bound per side.
#[derive(Debug, Clone, Default)]
pub struct FieldBound {
    pub point: Option<CellValue>,
    pub lower: Option<(Operator, CellValue)>,
    pub upper: Option<(Operator, CellValue)>,
}

impl FieldBound {
    pub fn is_point(&self) -> bool {
        self.point.is_some()
    }

    fn apply(&mut self, field: &str, operator: Operator, cell: CellValue) -> DbResult<()> {
        let conflict = || DbError::ConflictingCondition { field: field.to_string() };
        match operator {
            Operator::Eq => {
                if self.point.is_some() || self.lower.is_some() || self.upper.is_some() {
                    return Err(conflict());
                }
                self.point = Some(cell);
            }
            Operator::Gt | Operator::Ge => {
                if self.point.is_some() || self.lower.is_some() {
                    return Err(conflict());
                }
                self.lower = Some((operator, cell));
            }
            Operator::Lt | Operator::Le => {
                if self.point.is_some() || self.upper.is_some() {
                    return Err(conflict());
                }
                self.upper = Some((operator, cell));
            }
        }
        Ok(())
    }
}

/// Collects per-component bounds for `fields` in order, encoding values
/// through the schema codecs.
///
/// Conditions must cover a contiguous prefix of the components: collection
/// stops at the first unbound component, and any condition left unconsumed at
/// that point means the set skipped a component (or referenced a field this
/// descriptor cannot reach) and the whole plan fails.
pub fn collect_bounds(
    schema: &ModelSchema,
    fields: &[String],
    group: &[Condition],
    set_for_message: &ConditionSet,
) -> DbResult<Vec<(String, Option<FieldBound>)>> {
    let mut bounds: Vec<(String, Option<FieldBound>)> = Vec::with_capacity(fields.len());
    let mut consumed = 0usize;
    let mut open = true;
    for field in fields {
        if !open {
            bounds.push((field.clone(), None));
            continue;
        }
        let mut bound: Option<FieldBound> = None;
        for condition in group.iter().filter(|c| &c.field == field) {
            let cell = schema.encode_value(field, &condition.value)?;
            bound
                .get_or_insert_with(FieldBound::default)
                .apply(field, condition.operator, cell)?;
            consumed += 1;
        }
        if bound.is_none() {
            open = false;
        }
        bounds.push((field.clone(), bound));
    }
    if consumed != group.len() {
        return Err(DbError::InvalidConditionFields {
            conditions: set_for_message.to_string(),
        });
    }
    Ok(bounds)
}
