//! `StorageAdapter` over an ordered-range client.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::adapter::{
    Query, SliceConsumer, SliceStep, StorageAdapter, DEFAULT_SLICE_SIZE, DELETE_SLICE_SIZE,
};
use crate::config::ConnectionConfig;
use crate::error::{DbError, DbResult, StoreError, StoreErrorKind};
use crate::executor::AdmissionQueue;
use crate::oplog::OpLog;
use crate::plan::{select_descriptor, KeyDescriptor};
use crate::schema::{ModelRegistry, ModelSchema};
use crate::value::Record;

use super::client::{
    ColumnAction, DeleteRowRequest, Direction, GetRangeRequest, GetRowRequest, KeyTuple,
    PutRowRequest, RangeStoreClient, RowExistence, StoreRow, UpdateRowRequest,
};
use super::parser::{
    advance_start, build_descriptors, conditions_to_primary_key, conditions_to_range,
    describe_key, pick_primary_key, record_to_row, row_to_record,
};

/// Attempts before a persistent row conflict becomes terminal.
pub const CONFLICT_RETRY_COUNT: u32 = 26;
/// Base backoff between conflict retries.
pub const CONFLICT_RETRY_INTERVAL: Duration = Duration::from_millis(500);
/// Upper bound of the multiplicative backoff jitter.
pub const CONFLICT_RETRY_JITTER: f64 = 1.2;

/// Runs a row write, translating the benign error kinds: a failed
/// precondition reports `false`, a row-lock conflict is retried with jittered
/// backoff until the attempt budget runs out.
pub fn write_with_conflict_retry<F>(write: F) -> DbResult<bool>
where
    F: FnMut() -> Result<(), StoreError>,
{
    retry_row_conflicts(write, CONFLICT_RETRY_COUNT, CONFLICT_RETRY_INTERVAL)
}

fn retry_row_conflicts<F>(mut write: F, attempts: u32, interval: Duration) -> DbResult<bool>
where
    F: FnMut() -> Result<(), StoreError>,
{
    for attempt in 1..=attempts {
        match write() {
            Ok(()) => return Ok(true),
            Err(err) if err.kind == StoreErrorKind::ConditionNotMet => return Ok(false),
            Err(err) if err.kind == StoreErrorKind::RowConflict => {
                if attempt == attempts {
                    break;
                }
                log::debug!("row conflict, attempt {attempt}: {}", err.message);
                let jitter = 1.0 + rand::random::<f64>() * CONFLICT_RETRY_JITTER;
                may::coroutine::sleep(interval.mul_f64(jitter));
            }
            Err(err) => return Err(err.into()),
        }
    }
    Err(DbError::ConflictRetriesExhausted { attempts })
}

pub struct RangeStoreAdapter {
    client: Arc<dyn RangeStoreClient>,
    config: ConnectionConfig,
    schemas: BTreeMap<String, ModelSchema>,
    descriptors: BTreeMap<String, Vec<KeyDescriptor>>,
    registry: ModelRegistry,
    queue: AdmissionQueue,
    oplog: OpLog,
}

impl RangeStoreAdapter {
    pub fn new(
        client: Arc<dyn RangeStoreClient>,
        config: ConnectionConfig,
        schemas: Vec<ModelSchema>,
    ) -> DbResult<Self> {
        let registry = ModelRegistry::from_schemas(schemas.iter());
        let mut descriptors = BTreeMap::new();
        let mut by_name = BTreeMap::new();
        for schema in schemas {
            descriptors.insert(schema.name().to_string(), build_descriptors(&schema)?);
            by_name.insert(schema.name().to_string(), schema);
        }
        let queue = AdmissionQueue::new(config.seats_limit);
        Ok(RangeStoreAdapter {
            client,
            config,
            schemas: by_name,
            descriptors,
            registry,
            queue,
            oplog: OpLog::disabled(),
        })
    }

    pub fn with_oplog(mut self, oplog: OpLog) -> Self {
        self.oplog = oplog;
        self
    }

    pub fn admission_queue(&self) -> &AdmissionQueue {
        &self.queue
    }

    fn table(&self, model: &str) -> String {
        self.config.table_name(model)
    }

    fn model_descriptors(&self, model: &str) -> DbResult<&[KeyDescriptor]> {
        self.descriptors
            .get(model)
            .map(Vec::as_slice)
            .ok_or_else(|| DbError::UnknownModel(model.to_string()))
    }

    fn direction(&self, query: &Query) -> Direction {
        if query.descending {
            Direction::Backward
        } else {
            Direction::Forward
        }
    }

    /// Backward reads expect the start tuple on the upper side of the range.
    fn orient(
        &self,
        start: KeyTuple,
        end: KeyTuple,
        direction: Direction,
    ) -> (KeyTuple, KeyTuple) {
        match direction {
            Direction::Forward => (start, end),
            Direction::Backward => (end, start),
        }
    }

    /// Index rows carry keys only; full rows are fetched through the
    /// admission queue, one point read per row, preserving row order.
    fn fetch_full_rows(&self, schema: &ModelSchema, rows: &[StoreRow]) -> DbResult<Vec<Record>> {
        let table = self.table(schema.name());
        let mut tickets = Vec::with_capacity(rows.len());
        for row in rows {
            let key = pick_primary_key(schema, row)?;
            let client = self.client.clone();
            let request = GetRowRequest { table: table.clone(), key };
            tickets.push(self.queue.submit(move || client.get_row(&request)));
        }
        let mut records = Vec::with_capacity(tickets.len());
        for ticket in tickets {
            let fetched = ticket
                .wait()
                .ok_or_else(|| DbError::Backend(StoreError::other("point read unit failed")))??;
            // The row may have been deleted between the index read and now.
            if let Some(row) = fetched {
                records.push(row_to_record(schema, &row)?);
            }
        }
        Ok(records)
    }

    /// Resolves the single row an index-path mutation targets.
    fn resolve_unique(&self, query: &Query) -> DbResult<Option<Record>> {
        let mut limited = query.clone();
        limited.limit = Some(2);
        let rows = self.get_all(&limited)?;
        match rows.len() {
            0 => Ok(None),
            1 => Ok(rows.into_iter().next()),
            _ => Err(DbError::AmbiguousTarget {
                model: query.model.clone(),
                conditions: query.conditions.to_string(),
            }),
        }
    }

    fn record_key(&self, schema: &ModelSchema, record: &Record) -> DbResult<KeyTuple> {
        let mut key = Vec::with_capacity(schema.key_fields().len());
        for (field, _) in schema.key_fields() {
            let cell = schema.encode_field(field, record)?;
            if cell.is_null() {
                return Err(DbError::LostPrimaryKey { field: field.clone() });
            }
            key.push((field.clone(), cell));
        }
        Ok(key)
    }

    /// PUT/DELETE column actions for a patch. Key fields may appear only when
    /// the conditions already pin them to the same value.
    fn patch_actions(
        &self,
        schema: &ModelSchema,
        query: &Query,
        patch: &Record,
    ) -> DbResult<Vec<(String, ColumnAction)>> {
        let group = query.conditions.single_group()?;
        let mut actions = Vec::new();
        for (field, value) in patch {
            let codec = schema.codec(field).ok_or_else(|| DbError::UnexpectedField {
                model: schema.name().to_string(),
                field: field.clone(),
            })?;
            if schema.is_key_field(field) {
                let pinned = group
                    .iter()
                    .any(|c| &c.field == field && c.operator.is_equality() && &c.value == value);
                if !pinned {
                    return Err(DbError::ImmutableKeyViolation { field: field.clone() });
                }
                continue;
            }
            let cell = codec.encode(field, Some(value))?;
            if cell.is_null() {
                actions.push((field.clone(), ColumnAction::Delete));
            } else {
                actions.push((field.clone(), ColumnAction::Put(cell)));
            }
        }
        Ok(actions)
    }

    fn log_write(&self, label: &str, table: &str, key: &KeyTuple, existence: RowExistence) {
        self.oplog.write(
            label,
            vec![
                ("table".to_string(), table.to_string()),
                ("key".to_string(), describe_key(key)),
                ("existence".to_string(), format!("{existence:?}")),
            ],
        );
    }
}

impl StorageAdapter for RangeStoreAdapter {
    fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    fn schema(&self, model: &str) -> DbResult<&ModelSchema> {
        self.schemas
            .get(model)
            .ok_or_else(|| DbError::UnknownModel(model.to_string()))
    }

    fn get(&self, query: &Query) -> DbResult<Option<Record>> {
        let schema = self.schema(&query.model)?;
        let descriptor =
            select_descriptor(self.model_descriptors(&query.model)?, &query.conditions, &query.model)?;
        let table = self.table(&query.model);

        let key = if descriptor.is_index_path() {
            let direction = self.direction(query);
            let (start, end) =
                conditions_to_range(schema, &descriptor.fields, &query.conditions)?;
            let (start, end) = self.orient(start, end, direction);
            let response = self.client.get_range(&GetRangeRequest {
                table: table.clone(),
                index: Some(descriptor.name.clone()),
                start,
                end,
                direction,
                limit: 1,
            })?;
            match response.rows.first() {
                Some(row) => pick_primary_key(schema, row)?,
                None => return Ok(None),
            }
        } else {
            conditions_to_primary_key(schema, &query.conditions)?
        };

        let row = self.client.get_row(&GetRowRequest { table, key })?;
        row.map(|row| row_to_record(schema, &row)).transpose()
    }

    fn get_with_slices(&self, query: &Query, consumer: &mut SliceConsumer<'_>) -> DbResult<usize> {
        let schema = self.schema(&query.model)?;
        let descriptor =
            select_descriptor(self.model_descriptors(&query.model)?, &query.conditions, &query.model)?;
        let table = self.table(&query.model);
        let direction = self.direction(query);
        let index = descriptor.is_index_path().then(|| descriptor.name.clone());

        let (start, end) = conditions_to_range(schema, &descriptor.fields, &query.conditions)?;
        let (mut start, end) = self.orient(start, end, direction);

        let slice_size = query.slice_size_or(DEFAULT_SLICE_SIZE);
        let mut remaining = query.limit;
        let mut total = 0usize;
        loop {
            let page_size = match remaining {
                Some(left) if left == 0 => break,
                Some(left) => left.min(slice_size),
                None => slice_size,
            };
            let response = self.client.get_range(&GetRangeRequest {
                table: table.clone(),
                index: index.clone(),
                start: start.clone(),
                end: end.clone(),
                direction,
                limit: page_size,
            })?;
            if response.rows.is_empty() {
                break;
            }
            let records = if index.is_some() {
                self.fetch_full_rows(schema, &response.rows)?
            } else {
                response
                    .rows
                    .iter()
                    .map(|row| row_to_record(schema, row))
                    .collect::<DbResult<Vec<_>>>()?
            };
            total += records.len();
            if let Some(left) = &mut remaining {
                *left = left.saturating_sub(records.len());
            }
            if consumer(&records) == SliceStep::Stop {
                break;
            }
            match response.next_start {
                Some(next) => advance_start(&mut start, &next),
                None => break,
            }
        }
        Ok(total)
    }

    fn create(&self, model: &str, record: &Record, override_existing: bool) -> DbResult<bool> {
        let schema = self.schema(model)?;
        let row = record_to_row(schema, record)?;
        let existence = if override_existing {
            RowExistence::Ignore
        } else {
            RowExistence::ExpectNotExist
        };
        let table = self.table(model);
        self.log_write("putRow", &table, &row.key, existence);
        let request = PutRowRequest { table, key: row.key, columns: row.columns, existence };
        write_with_conflict_retry(|| self.client.put_row(&request))
    }

    fn set(&self, query: &Query, record: &Record) -> DbResult<bool> {
        let schema = self.schema(&query.model)?;
        let key = conditions_to_primary_key(schema, &query.conditions)?;

        // The record may repeat key fields; they must agree with the pinned
        // key cells.
        let mut columns = Vec::new();
        for (field, _) in schema.key_fields() {
            if let Some(value) = record.get(field) {
                let cell = schema.encode_value(field, value)?;
                let pinned = key.iter().any(|(name, pin)| name == field && pin == &cell);
                if !pinned {
                    return Err(DbError::ImmutableKeyViolation { field: field.clone() });
                }
            }
        }
        for field in record.keys() {
            if schema.codec(field).is_none() {
                return Err(DbError::UnexpectedField {
                    model: schema.name().to_string(),
                    field: field.clone(),
                });
            }
        }
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

        let table = self.table(&query.model);
        self.log_write("putRow", &table, &key, RowExistence::Ignore);
        let request = PutRowRequest { table, key, columns, existence: RowExistence::Ignore };
        write_with_conflict_retry(|| self.client.put_row(&request))
    }

    fn update(&self, query: &Query, patch: &Record) -> DbResult<bool> {
        let schema = self.schema(&query.model)?;
        let descriptor =
            select_descriptor(self.model_descriptors(&query.model)?, &query.conditions, &query.model)?;

        let actions = self.patch_actions(schema, query, patch)?;
        if actions.is_empty() {
            return Ok(true);
        }

        let key = if descriptor.is_index_path() {
            match self.resolve_unique(query)? {
                Some(record) => self.record_key(schema, &record)?,
                None => return Ok(false),
            }
        } else {
            conditions_to_primary_key(schema, &query.conditions)?
        };

        let table = self.table(&query.model);
        self.log_write("updateRow", &table, &key, RowExistence::ExpectExist);
        let request = UpdateRowRequest {
            table,
            key,
            actions,
            existence: RowExistence::ExpectExist,
        };
        write_with_conflict_retry(|| self.client.update_row(&request))
    }

    fn delete(&self, query: &Query) -> DbResult<bool> {
        let schema = self.schema(&query.model)?;
        let descriptor =
            select_descriptor(self.model_descriptors(&query.model)?, &query.conditions, &query.model)?;

        let key = if descriptor.is_index_path() {
            match self.resolve_unique(query)? {
                Some(record) => self.record_key(schema, &record)?,
                None => return Ok(false),
            }
        } else {
            conditions_to_primary_key(schema, &query.conditions)?
        };

        let table = self.table(&query.model);
        self.log_write("deleteRow", &table, &key, RowExistence::ExpectExist);
        let request = DeleteRowRequest { table, key, existence: RowExistence::ExpectExist };
        write_with_conflict_retry(|| self.client.delete_row(&request))
    }

    fn delete_all(&self, query: &Query) -> DbResult<usize> {
        let schema = self.schema(&query.model)?;
        let table = self.table(&query.model);
        let mut paged = query.clone();
        paged.slice_size = Some(query.slice_size_or(DELETE_SLICE_SIZE));

        let mut failures: Vec<DbError> = Vec::new();
        let deleted = {
            let client = &self.client;
            let queue = &self.queue;
            let oplog = &self.oplog;
            let failures = &mut failures;
            let mut consumer = |records: &[Record]| {
                let mut tickets = Vec::with_capacity(records.len());
                for record in records {
                    let key = match self.record_key(schema, record) {
                        Ok(key) => key,
                        Err(err) => {
                            failures.push(err);
                            return SliceStep::Stop;
                        }
                    };
                    oplog.write(
                        "deleteRow",
                        vec![
                            ("table".to_string(), table.clone()),
                            ("key".to_string(), describe_key(&key)),
                        ],
                    );
                    let client = client.clone();
                    let request = DeleteRowRequest {
                        table: table.clone(),
                        key,
                        existence: RowExistence::Ignore,
                    };
                    tickets.push(queue.submit(move || {
                        write_with_conflict_retry(|| client.delete_row(&request))
                    }));
                }
                for ticket in tickets {
                    match ticket.wait() {
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            failures.push(err);
                            return SliceStep::Stop;
                        }
                        None => {
                            failures.push(DbError::Backend(StoreError::other(
                                "delete unit failed",
                            )));
                            return SliceStep::Stop;
                        }
                    }
                }
                SliceStep::Continue
            };
            self.get_with_slices(&paged, &mut consumer)?
        };
        match failures.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(deleted),
        }
    }
}
