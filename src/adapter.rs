//! The backend adapter seam.
//!
//! Each backend implements the mandatory subset (`get_with_slices`, `create`,
//! `set`, `update`, `delete_all`); everything else has a default
//! implementation in terms of those, so an adapter only overrides what it can
//! do natively.

use crate::condition::{Condition, ConditionSet, Operator};
use crate::error::{DbError, DbResult};
use crate::schema::{ModelRegistry, ModelSchema};
use crate::value::Record;

/// Page size used when the caller does not ask for specific slices.
pub const DEFAULT_SLICE_SIZE: usize = 1024;
/// Page size for bulk deletes.
pub const DELETE_SLICE_SIZE: usize = 256;

/// One resolved read/write description: conditions plus modifiers. Built per
/// call by the façade and discarded after dispatch.
#[derive(Debug, Clone)]
pub struct Query {
    pub model: String,
    pub conditions: ConditionSet,
    pub descending: bool,
    pub limit: Option<usize>,
    pub slice_size: Option<usize>,
}

impl Query {
    pub fn new(model: &str, conditions: ConditionSet) -> Self {
        Query {
            model: model.to_string(),
            conditions,
            descending: false,
            limit: None,
            slice_size: None,
        }
    }

    pub fn slice_size_or(&self, fallback: usize) -> usize {
        self.slice_size.unwrap_or(fallback)
    }
}

/// What the paging consumer wants after seeing a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceStep {
    Continue,
    Stop,
}

pub type SliceConsumer<'a> = dyn FnMut(&[Record]) -> SliceStep + 'a;

pub trait StorageAdapter: Send + Sync {
    fn registry(&self) -> &ModelRegistry;

    fn schema(&self, model: &str) -> DbResult<&ModelSchema>;

    /// Pages matching rows to `consumer` and returns the total row count
    /// observed. Honors limit, slice size and order.
    fn get_with_slices(&self, query: &Query, consumer: &mut SliceConsumer<'_>) -> DbResult<usize>;

    /// Inserts a record. Without `override_existing` an already present row
    /// yields `Ok(false)`.
    fn create(&self, model: &str, record: &Record, override_existing: bool) -> DbResult<bool>;

    /// Replaces the full row the conditions pin down.
    fn set(&self, query: &Query, record: &Record) -> DbResult<bool>;

    /// Patches the row the conditions resolve to. Fields resolving to null
    /// are removed from the row.
    fn update(&self, query: &Query, patch: &Record) -> DbResult<bool>;

    /// Deletes every matching row in pages, returning the count.
    fn delete_all(&self, query: &Query) -> DbResult<usize>;

    fn get(&self, query: &Query) -> DbResult<Option<Record>> {
        let mut limited = query.clone();
        limited.limit = Some(1);
        let mut found = None;
        self.get_with_slices(&limited, &mut |rows| {
            found = rows.first().cloned();
            SliceStep::Stop
        })?;
        Ok(found)
    }

    fn get_all(&self, query: &Query) -> DbResult<Vec<Record>> {
        let mut all = Vec::new();
        self.get_with_slices(query, &mut |rows| {
            all.extend_from_slice(rows);
            SliceStep::Continue
        })?;
        Ok(all)
    }

    fn exists(&self, query: &Query) -> DbResult<bool> {
        Ok(self.get(query)?.is_some())
    }

    fn count(&self, query: &Query) -> DbResult<usize> {
        self.get_with_slices(query, &mut |_| SliceStep::Continue)
    }

    /// Deletes the single row the conditions resolve to. More than one match
    /// is an error; zero matches is benign.
    fn delete(&self, query: &Query) -> DbResult<bool> {
        let mut limited = query.clone();
        limited.limit = Some(2);
        let rows = self.get_all(&limited)?;
        match rows.len() {
            0 => Ok(false),
            1 => {
                let schema = self.schema(&query.model)?;
                let pinned = key_equality_query(schema, &query.model, &rows[0])?;
                self.delete_all(&pinned)?;
                Ok(true)
            }
            _ => Err(DbError::AmbiguousTarget {
                model: query.model.clone(),
                conditions: query.conditions.to_string(),
            }),
        }
    }
}

/// Builds a query pinning every key field of `record` by equality.
pub fn key_equality_query(schema: &ModelSchema, model: &str, record: &Record) -> DbResult<Query> {
    let mut group = Vec::new();
    for (field, _) in schema.key_fields() {
        let value = record.get(field).cloned().ok_or_else(|| DbError::LostPrimaryKey {
            field: field.clone(),
        })?;
        group.push(Condition::new(field, Operator::Eq, value));
    }
    Ok(Query::new(model, ConditionSet { includes_all: false, groups: vec![group] }))
}
