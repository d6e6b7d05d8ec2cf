//! The query/mutation façade.
//!
//! `Database` wraps an adapter; `Model` handles expose `post`, a get chain and
//! a set chain. Every builder step consumes and returns the builder, so there
//! is never a live mutation handle outside the chain. Usage errors (duplicate
//! root selector, re-set modifiers, modifiers a terminator cannot honor) are
//! recorded on the builder and surfaced by the terminator before any I/O.

use std::sync::Arc;

use crate::adapter::{Query, SliceStep, StorageAdapter};
use crate::condition::{Condition, ConditionLog, Operator};
use crate::error::{DbError, DbResult};
use crate::value::{FieldValue, Record};

/// The field `value()`/`values()`/`value_slices()` project to.
pub const VALUE_FIELD: &str = "value";

pub struct Database {
    adapter: Arc<dyn StorageAdapter>,
}

impl Database {
    pub fn new(adapter: Arc<dyn StorageAdapter>) -> Self {
        Database { adapter }
    }

    pub fn model(&self, name: &str) -> Model {
        Model { adapter: self.adapter.clone(), name: name.to_string() }
    }
}

pub struct Model {
    adapter: Arc<dyn StorageAdapter>,
    name: String,
}

impl Model {
    /// Inserts a record; `false` when the row already exists.
    pub fn post(&self, record: &Record) -> DbResult<bool> {
        self.adapter.create(&self.name, record, false)
    }

    /// Inserts a record, replacing an existing row.
    pub fn post_override(&self, record: &Record) -> DbResult<bool> {
        self.adapter.create(&self.name, record, true)
    }

    pub fn get(&self) -> GetBuilder {
        GetBuilder {
            adapter: self.adapter.clone(),
            model: self.name.clone(),
            log: ConditionLog::new(),
            descending: None,
            limit: None,
            slice_size: None,
            error: None,
        }
    }

    pub fn set(&self) -> SetBuilder {
        SetBuilder {
            adapter: self.adapter.clone(),
            model: self.name.clone(),
            log: ConditionLog::new(),
            slice_size: None,
            override_existing: false,
            error: None,
        }
    }
}

#[doc(hidden)]
#[derive(Clone, Copy)]
pub enum Link {
    Root,
    And,
    Or,
}

/// Chains that accept field conditions. Sealed to the two builders.
pub trait ConditionChain: Sized {
    #[doc(hidden)]
    fn push(self, link: Link, condition: Condition) -> Self;
}

/// A field picked out of a chain, waiting for its comparison.
pub struct FieldSelector<B: ConditionChain> {
    builder: B,
    field: String,
    link: Link,
}

impl<B: ConditionChain> FieldSelector<B> {
    fn push(self, operator: Operator, value: impl Into<FieldValue>) -> B {
        let condition = Condition::new(&self.field, operator, value);
        self.builder.push(self.link, condition)
    }

    pub fn equals(self, value: impl Into<FieldValue>) -> B {
        self.push(Operator::Eq, value)
    }

    pub fn greater_than(self, value: impl Into<FieldValue>) -> B {
        self.push(Operator::Gt, value)
    }

    pub fn at_least(self, value: impl Into<FieldValue>) -> B {
        self.push(Operator::Ge, value)
    }

    pub fn less_than(self, value: impl Into<FieldValue>) -> B {
        self.push(Operator::Lt, value)
    }

    pub fn at_most(self, value: impl Into<FieldValue>) -> B {
        self.push(Operator::Le, value)
    }
}

macro_rules! condition_entry_points {
    ($builder:ident) => {
        impl $builder {
            /// The root selector; usable once per chain.
            pub fn field(self, name: &str) -> FieldSelector<$builder> {
                FieldSelector { builder: self, field: name.to_string(), link: Link::Root }
            }

            pub fn and(self, name: &str) -> FieldSelector<$builder> {
                FieldSelector { builder: self, field: name.to_string(), link: Link::And }
            }

            pub fn or(self, name: &str) -> FieldSelector<$builder> {
                FieldSelector { builder: self, field: name.to_string(), link: Link::Or }
            }

            /// Matches every row; mutually exclusive with field conditions.
            pub fn all(mut self) -> Self {
                if self.error.is_none() {
                    if let Err(err) = self.log.all() {
                        self.error = Some(err);
                    }
                }
                self
            }
        }

        impl ConditionChain for $builder {
            fn push(mut self, link: Link, condition: Condition) -> Self {
                if self.error.is_none() {
                    let outcome = match link {
                        Link::Root => self.log.root(condition),
                        Link::And => self.log.and(condition),
                        Link::Or => self.log.or(condition),
                    };
                    if let Err(err) = outcome {
                        self.error = Some(err);
                    }
                }
                self
            }
        }
    };
}

pub struct GetBuilder {
    adapter: Arc<dyn StorageAdapter>,
    model: String,
    log: ConditionLog,
    descending: Option<bool>,
    limit: Option<usize>,
    slice_size: Option<usize>,
    error: Option<DbError>,
}

condition_entry_points!(GetBuilder);

impl GetBuilder {
    pub fn ascending(mut self) -> Self {
        if self.error.is_none() {
            if self.descending.is_some() {
                self.error = Some(DbError::OrderAlreadySet);
            } else {
                self.descending = Some(false);
            }
        }
        self
    }

    pub fn descending(mut self) -> Self {
        if self.error.is_none() {
            if self.descending.is_some() {
                self.error = Some(DbError::OrderAlreadySet);
            } else {
                self.descending = Some(true);
            }
        }
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        if self.error.is_none() {
            if self.limit.is_some() {
                self.error = Some(DbError::LimitAlreadySet);
            } else {
                self.limit = Some(limit);
            }
        }
        self
    }

    pub fn slices(mut self, slice_size: usize) -> Self {
        if self.error.is_none() {
            if self.slice_size.is_some() {
                self.error = Some(DbError::SliceSizeAlreadySet);
            } else {
                self.slice_size = Some(slice_size);
            }
        }
        self
    }

    fn finish(self) -> DbResult<(Arc<dyn StorageAdapter>, Query)> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let conditions = self.log.finish(self.adapter.registry(), &self.model)?;
        let query = Query {
            model: self.model,
            conditions,
            descending: self.descending.unwrap_or(false),
            limit: self.limit,
            slice_size: self.slice_size,
        };
        Ok((self.adapter, query))
    }

    /// The first matching record, or `None`.
    pub fn result(self) -> DbResult<Option<Record>> {
        let (adapter, query) = self.finish()?;
        adapter.get(&query)
    }

    pub fn results(self) -> DbResult<Vec<Record>> {
        let (adapter, query) = self.finish()?;
        adapter.get_all(&query)
    }

    /// Pages matching records to `consumer`, returning the total row count.
    pub fn result_slices(
        self,
        mut consumer: impl FnMut(&[Record]) -> SliceStep,
    ) -> DbResult<usize> {
        let (adapter, query) = self.finish()?;
        adapter.get_with_slices(&query, &mut consumer)
    }

    /// The `value` field of the first matching record.
    pub fn value(self) -> DbResult<Option<FieldValue>> {
        Ok(self.result()?.map(project_value))
    }

    pub fn values(self) -> DbResult<Vec<FieldValue>> {
        Ok(self.results()?.into_iter().map(project_value).collect())
    }

    pub fn value_slices(
        self,
        mut consumer: impl FnMut(&[FieldValue]) -> SliceStep,
    ) -> DbResult<usize> {
        self.result_slices(|records| {
            let values: Vec<FieldValue> =
                records.iter().cloned().map(project_value).collect();
            consumer(&values)
        })
    }

    pub fn exists(self) -> DbResult<bool> {
        let (adapter, query) = self.finish()?;
        adapter.exists(&query)
    }

    pub fn count(self) -> DbResult<usize> {
        let (adapter, query) = self.finish()?;
        adapter.count(&query)
    }
}

fn project_value(mut record: Record) -> FieldValue {
    record.remove(VALUE_FIELD).unwrap_or(FieldValue::Null)
}

pub struct SetBuilder {
    adapter: Arc<dyn StorageAdapter>,
    model: String,
    log: ConditionLog,
    slice_size: Option<usize>,
    override_existing: bool,
    error: Option<DbError>,
}

condition_entry_points!(SetBuilder);

impl SetBuilder {
    /// Lets `put` replace a row that is not known to exist. Order and limit
    /// have no meaning on a set chain and are not offered.
    pub fn override_existing(mut self) -> Self {
        if self.error.is_none() {
            if self.override_existing {
                self.error = Some(DbError::OverrideAlreadySet);
            } else {
                self.override_existing = true;
            }
        }
        self
    }

    /// Page size for `delete_all`; other terminators reject it.
    pub fn slices(mut self, slice_size: usize) -> Self {
        if self.error.is_none() {
            if self.slice_size.is_some() {
                self.error = Some(DbError::SliceSizeAlreadySet);
            } else {
                self.slice_size = Some(slice_size);
            }
        }
        self
    }

    fn finish(
        mut self,
        allow_slices: bool,
        allow_override: bool,
    ) -> DbResult<(Arc<dyn StorageAdapter>, Query, bool)> {
        if self.error.is_none() {
            if !allow_slices && self.slice_size.is_some() {
                self.error = Some(DbError::IncompatibleModifier("slices"));
            } else if !allow_override && self.override_existing {
                self.error = Some(DbError::IncompatibleModifier("override"));
            }
        }
        if let Some(err) = self.error {
            return Err(err);
        }
        let conditions = self.log.finish(self.adapter.registry(), &self.model)?;
        let query = Query {
            model: self.model,
            conditions,
            descending: false,
            limit: None,
            slice_size: self.slice_size,
        };
        Ok((self.adapter, query, self.override_existing))
    }

    /// Replaces the full row the conditions pin down. Without
    /// `override_existing` a missing row reports `false` and nothing is
    /// written.
    pub fn put(self, record: &Record) -> DbResult<bool> {
        let (adapter, query, override_existing) = self.finish(false, true)?;
        if !override_existing && !adapter.exists(&query)? {
            return Ok(false);
        }
        adapter.set(&query, record)
    }

    /// Patches the row the conditions resolve to.
    pub fn patch(self, patch: &Record) -> DbResult<bool> {
        let (adapter, query, _) = self.finish(false, false)?;
        adapter.update(&query, patch)
    }

    /// Deletes the single row the conditions resolve to; more than one match
    /// is an error.
    pub fn delete(self) -> DbResult<bool> {
        let (adapter, query, _) = self.finish(false, false)?;
        adapter.delete(&query)
    }

    /// Deletes every matching row in pages, returning the count.
    pub fn delete_all(self) -> DbResult<usize> {
        let (adapter, query, _) = self.finish(true, false)?;
        adapter.delete_all(&query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::SliceConsumer;
    use crate::codec::FieldCodec;
    use crate::schema::{ModelRegistry, ModelSchema};
    use std::sync::Mutex;

    /// Records calls; returns canned rows from `get_with_slices`.
    struct StubAdapter {
        registry: ModelRegistry,
        schema: ModelSchema,
        rows: Vec<Record>,
        calls: Mutex<Vec<String>>,
    }

    impl StubAdapter {
        fn new(rows: Vec<Record>) -> Self {
            let schema = ModelSchema::builder("rooms")
                .key("uuid", FieldCodec::string())
                .field("value", FieldCodec::string().optional())
                .build();
            StubAdapter {
                registry: ModelRegistry::from_schemas([&schema]),
                schema,
                rows,
                calls: Mutex::new(Vec::new()),
            }
        }

        fn record(&self, call: &str) {
            self.calls.lock().unwrap().push(call.to_string());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl StorageAdapter for StubAdapter {
        fn registry(&self) -> &ModelRegistry {
            &self.registry
        }

        fn schema(&self, _model: &str) -> DbResult<&ModelSchema> {
            Ok(&self.schema)
        }

        fn get_with_slices(
            &self,
            query: &Query,
            consumer: &mut SliceConsumer<'_>,
        ) -> DbResult<usize> {
            self.record("get_with_slices");
            let mut rows = self.rows.clone();
            if let Some(limit) = query.limit {
                rows.truncate(limit);
            }
            if !rows.is_empty() {
                consumer(&rows);
            }
            Ok(rows.len())
        }

        fn create(&self, _model: &str, _record: &Record, _override: bool) -> DbResult<bool> {
            self.record("create");
            Ok(true)
        }

        fn set(&self, _query: &Query, _record: &Record) -> DbResult<bool> {
            self.record("set");
            Ok(true)
        }

        fn update(&self, _query: &Query, _patch: &Record) -> DbResult<bool> {
            self.record("update");
            Ok(true)
        }

        fn delete_all(&self, _query: &Query) -> DbResult<usize> {
            self.record("delete_all");
            Ok(self.rows.len())
        }
    }

    fn room(uuid: &str, value: &str) -> Record {
        let mut record = Record::new();
        record.insert("uuid".to_string(), uuid.into());
        record.insert("value".to_string(), value.into());
        record
    }

    fn database(rows: Vec<Record>) -> (Arc<StubAdapter>, Database) {
        let adapter = Arc::new(StubAdapter::new(rows));
        let database = Database::new(adapter.clone());
        (adapter, database)
    }

    #[test]
    fn test_duplicate_root_surfaces_before_io() {
        let (adapter, database) = database(vec![room("a", "1")]);
        let err = database
            .model("rooms")
            .get()
            .field("uuid")
            .equals("a")
            .field("uuid")
            .equals("b")
            .result()
            .unwrap_err();
        assert!(matches!(err, DbError::DuplicateRootSelector));
        assert!(adapter.calls().is_empty());
    }

    #[test]
    fn test_order_is_one_shot() {
        let (adapter, database) = database(Vec::new());
        let err = database
            .model("rooms")
            .get()
            .all()
            .ascending()
            .descending()
            .results()
            .unwrap_err();
        assert!(matches!(err, DbError::OrderAlreadySet));
        assert!(adapter.calls().is_empty());
    }

    #[test]
    fn test_unknown_field_surfaces_at_terminator() {
        let (adapter, database) = database(Vec::new());
        let err = database
            .model("rooms")
            .get()
            .field("nickname")
            .equals("x")
            .result()
            .unwrap_err();
        assert!(matches!(err, DbError::UnknownField { .. }));
        assert!(adapter.calls().is_empty());
    }

    #[test]
    fn test_values_project_the_value_field() {
        let (_, database) = database(vec![room("a", "1"), room("b", "2")]);
        let values = database.model("rooms").get().all().values().unwrap();
        assert_eq!(
            values,
            vec![
                FieldValue::Text("1".to_string()),
                FieldValue::Text("2".to_string())
            ]
        );
    }

    #[test]
    fn test_put_without_override_requires_existing_row() {
        let (adapter, database) = database(Vec::new());
        let written = database
            .model("rooms")
            .set()
            .field("uuid")
            .equals("a")
            .put(&room("a", "1"))
            .unwrap();
        assert!(!written);
        assert_eq!(adapter.calls(), vec!["get_with_slices"]);

        let (adapter, database) = self::database(vec![room("a", "0")]);
        let written = database
            .model("rooms")
            .set()
            .field("uuid")
            .equals("a")
            .put(&room("a", "1"))
            .unwrap();
        assert!(written);
        assert_eq!(adapter.calls(), vec!["get_with_slices", "set"]);
    }

    #[test]
    fn test_override_put_skips_the_existence_check() {
        let (adapter, database) = database(Vec::new());
        let written = database
            .model("rooms")
            .set()
            .field("uuid")
            .equals("a")
            .override_existing()
            .put(&room("a", "1"))
            .unwrap();
        assert!(written);
        assert_eq!(adapter.calls(), vec!["set"]);
    }

    #[test]
    fn test_patch_rejects_override() {
        let (adapter, database) = database(Vec::new());
        let err = database
            .model("rooms")
            .set()
            .field("uuid")
            .equals("a")
            .override_existing()
            .patch(&Record::new())
            .unwrap_err();
        assert!(matches!(err, DbError::IncompatibleModifier("override")));
        assert!(adapter.calls().is_empty());
    }

    #[test]
    fn test_delete_all_accepts_slices() {
        let (adapter, database) = database(vec![room("a", "1")]);
        let count = database
            .model("rooms")
            .set()
            .field("uuid")
            .at_least("a")
            .slices(16)
            .delete_all()
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(adapter.calls(), vec!["delete_all"]);
    }

    #[test]
    fn test_delete_rejects_slices() {
        let (_, database) = database(Vec::new());
        let err = database
            .model("rooms")
            .set()
            .field("uuid")
            .equals("a")
            .slices(16)
            .delete()
            .unwrap_err();
        assert!(matches!(err, DbError::IncompatibleModifier("slices")));
    }
}
