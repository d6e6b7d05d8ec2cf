//! `StorageAdapter` over an item client.
//!
//! Writes are guarded by conditional expressions instead of row existence
//! flags, so a failed precondition surfaces as `ConditionNotMet` and is
//! translated to `Ok(false)` here. There are no row-lock conflicts to retry on
//! this backend.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::adapter::{
    Query, SliceConsumer, SliceStep, StorageAdapter, DEFAULT_SLICE_SIZE, DELETE_SLICE_SIZE,
};
use crate::config::ConnectionConfig;
use crate::error::{DbError, DbResult, StoreError, StoreErrorKind};
use crate::executor::AdmissionQueue;
use crate::oplog::OpLog;
use crate::plan::select_descriptor;
use crate::schema::{ModelRegistry, ModelSchema};
use crate::value::{CellValue, Record};

use super::client::{AttrMap, ItemStoreClient, QueryRequest, ScanRequest};
use super::parser::{
    conditions_to_key, conditions_to_read, delete_item_request, get_item_request,
    put_item_request, update_item_request, ReadRequest,
};
use super::table::{cell_text, ItemTable};

pub struct ItemStoreAdapter {
    client: Arc<dyn ItemStoreClient>,
    config: ConnectionConfig,
    tables: BTreeMap<String, ItemTable>,
    registry: ModelRegistry,
    queue: AdmissionQueue,
    oplog: OpLog,
}

fn describe_item_key(key: &AttrMap) -> String {
    let parts: Vec<String> = key
        .iter()
        .map(|(attr, cell)| format!("{attr}={}", cell_text(cell)))
        .collect();
    parts.join(", ")
}

impl ItemStoreAdapter {
    pub fn new(
        client: Arc<dyn ItemStoreClient>,
        config: ConnectionConfig,
        schemas: Vec<ModelSchema>,
    ) -> DbResult<Self> {
        let registry = ModelRegistry::from_schemas(schemas.iter());
        let mut tables = BTreeMap::new();
        for schema in schemas {
            let name = schema.name().to_string();
            tables.insert(name, ItemTable::new(schema)?);
        }
        let queue = AdmissionQueue::new(config.seats_limit);
        Ok(ItemStoreAdapter {
            client,
            config,
            tables,
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

    fn table(&self, model: &str) -> DbResult<&ItemTable> {
        self.tables
            .get(model)
            .ok_or_else(|| DbError::UnknownModel(model.to_string()))
    }

    fn table_name(&self, model: &str) -> String {
        self.config.table_name(model)
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

    /// Splits a patch into SET values and REMOVE attributes. Key fields may
    /// appear only when the conditions already pin them to the same value.
    fn patch_actions(
        &self,
        table: &ItemTable,
        query: &Query,
        patch: &Record,
    ) -> DbResult<(Vec<(String, CellValue)>, Vec<String>)> {
        let schema = table.schema();
        let group = query.conditions.single_group()?;
        let mut puts = Vec::new();
        let mut removes = Vec::new();
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
                removes.push(field.clone());
            } else {
                puts.push((field.clone(), cell));
            }
        }
        Ok((puts, removes))
    }

    fn page_query(
        &self,
        table: &ItemTable,
        request: &QueryRequest,
        query: &Query,
        consumer: &mut SliceConsumer<'_>,
    ) -> DbResult<usize> {
        let slice_size = query.slice_size_or(DEFAULT_SLICE_SIZE);
        let mut remaining = query.limit;
        let mut cursor: Option<AttrMap> = None;
        let mut total = 0usize;
        loop {
            let page_size = match remaining {
                Some(0) => break,
                Some(left) => left.min(slice_size),
                None => slice_size,
            };
            let mut request = request.clone();
            request.limit = Some(page_size);
            request.forward = !query.descending;
            request.start_key = cursor.take();
            let page = self.client.query(&request)?;
            if page.items.is_empty() && page.last_key.is_none() {
                break;
            }
            let records = page
                .items
                .iter()
                .map(|item| table.item_to_record(item))
                .collect::<DbResult<Vec<_>>>()?;
            total += records.len();
            if let Some(left) = &mut remaining {
                *left = left.saturating_sub(records.len());
            }
            if !records.is_empty() && consumer(&records) == SliceStep::Stop {
                break;
            }
            match page.last_key {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(total)
    }

    /// Scans yield rows in the backend's native reverse order. A descending
    /// read streams pages; an ascending read has to buffer the whole result,
    /// reverse it and re-chunk, which does not scale past small tables.
    fn page_scan(
        &self,
        table: &ItemTable,
        request: &ScanRequest,
        query: &Query,
        consumer: &mut SliceConsumer<'_>,
    ) -> DbResult<usize> {
        let slice_size = query.slice_size_or(DEFAULT_SLICE_SIZE);
        if query.descending {
            let mut remaining = query.limit;
            let mut cursor: Option<AttrMap> = None;
            let mut total = 0usize;
            loop {
                let page_size = match remaining {
                    Some(0) => break,
                    Some(left) => left.min(slice_size),
                    None => slice_size,
                };
                let mut request = request.clone();
                request.limit = Some(page_size);
                request.start_key = cursor.take();
                let page = self.client.scan(&request)?;
                if page.items.is_empty() && page.last_key.is_none() {
                    break;
                }
                let records = page
                    .items
                    .iter()
                    .map(|item| table.item_to_record(item))
                    .collect::<DbResult<Vec<_>>>()?;
                total += records.len();
                if let Some(left) = &mut remaining {
                    *left = left.saturating_sub(records.len());
                }
                if !records.is_empty() && consumer(&records) == SliceStep::Stop {
                    break;
                }
                match page.last_key {
                    Some(next) => cursor = Some(next),
                    None => break,
                }
            }
            return Ok(total);
        }

        let mut buffered: Vec<Record> = Vec::new();
        let mut cursor: Option<AttrMap> = None;
        loop {
            let mut request = request.clone();
            request.limit = Some(slice_size);
            request.start_key = cursor.take();
            let page = self.client.scan(&request)?;
            for item in &page.items {
                buffered.push(table.item_to_record(item)?);
            }
            match page.last_key {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        buffered.reverse();
        if let Some(limit) = query.limit {
            buffered.truncate(limit);
        }
        let mut total = 0usize;
        for chunk in buffered.chunks(slice_size) {
            total += chunk.len();
            if consumer(chunk) == SliceStep::Stop {
                break;
            }
        }
        Ok(total)
    }

    fn log_write(&self, label: &str, table: &str, key: &AttrMap, condition: Option<&str>) {
        let mut fields = vec![
            ("table".to_string(), table.to_string()),
            ("key".to_string(), describe_item_key(key)),
        ];
        if let Some(condition) = condition {
            fields.push(("condition".to_string(), condition.to_string()));
        }
        self.oplog.write(label, fields);
    }
}

impl StorageAdapter for ItemStoreAdapter {
    fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    fn schema(&self, model: &str) -> DbResult<&ModelSchema> {
        Ok(self.table(model)?.schema())
    }

    fn get(&self, query: &Query) -> DbResult<Option<Record>> {
        let table = self.table(&query.model)?;
        let descriptor =
            select_descriptor(table.descriptors(), &query.conditions, &query.model)?;
        let name = self.table_name(&query.model);

        if descriptor.is_index_path() {
            let mut limited = query.clone();
            limited.limit = Some(1);
            let rows = self.get_all(&limited)?;
            return Ok(rows.into_iter().next());
        }

        let key = conditions_to_key(table, &query.conditions)?;
        let item = self.client.get_item(&get_item_request(&name, key))?;
        item.map(|item| table.item_to_record(&item)).transpose()
    }

    fn get_with_slices(&self, query: &Query, consumer: &mut SliceConsumer<'_>) -> DbResult<usize> {
        let table = self.table(&query.model)?;
        let descriptor =
            select_descriptor(table.descriptors(), &query.conditions, &query.model)?;
        let name = self.table_name(&query.model);

        match conditions_to_read(table, &name, descriptor, &query.conditions)? {
            ReadRequest::Query(request) => self.page_query(table, &request, query, consumer),
            ReadRequest::Scan(request) => self.page_scan(table, &request, query, consumer),
        }
    }

    fn create(&self, model: &str, record: &Record, override_existing: bool) -> DbResult<bool> {
        let table = self.table(model)?;
        let item = table.record_to_item(record)?;
        let key = table.record_key(record)?;
        let name = self.table_name(model);
        let request = put_item_request(table, &name, item, override_existing);
        self.log_write("putItem", &name, &key, request.condition.as_deref());
        match self.client.put_item(&request) {
            Ok(()) => Ok(true),
            Err(err) if err.kind == StoreErrorKind::ConditionNotMet => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&self, query: &Query, record: &Record) -> DbResult<bool> {
        let table = self.table(&query.model)?;
        let schema = table.schema();
        let key = conditions_to_key(table, &query.conditions)?;
        let group = query.conditions.single_group()?;

        // The record may repeat key fields; they must agree with the pinned
        // key cells.
        let mut merged = record.clone();
        for (field, _) in schema.key_fields() {
            let condition = group
                .iter()
                .find(|c| &c.field == field && c.operator.is_equality())
                .ok_or_else(|| DbError::LostPrimaryKey { field: field.clone() })?;
            if let Some(value) = record.get(field) {
                if value != &condition.value {
                    return Err(DbError::ImmutableKeyViolation { field: field.clone() });
                }
            }
            merged.insert(field.clone(), condition.value.clone());
        }

        let item = table.record_to_item(&merged)?;
        let name = self.table_name(&query.model);
        let request = put_item_request(table, &name, item, true);
        self.log_write("putItem", &name, &key, None);
        self.client.put_item(&request)?;
        Ok(true)
    }

    fn update(&self, query: &Query, patch: &Record) -> DbResult<bool> {
        let table = self.table(&query.model)?;
        let descriptor =
            select_descriptor(table.descriptors(), &query.conditions, &query.model)?;

        let (puts, removes) = self.patch_actions(table, query, patch)?;
        if puts.is_empty() && removes.is_empty() {
            return Ok(true);
        }

        let key = if descriptor.is_index_path() {
            match self.resolve_unique(query)? {
                Some(record) => table.record_key(&record)?,
                None => {
                    return Err(DbError::NotFound {
                        model: query.model.clone(),
                        conditions: query.conditions.to_string(),
                    })
                }
            }
        } else {
            conditions_to_key(table, &query.conditions)?
        };

        let name = self.table_name(&query.model);
        let request = update_item_request(table, &name, key, &puts, &removes);
        self.log_write("updateItem", &name, &request.key, request.condition.as_deref());
        match self.client.update_item(&request) {
            Ok(()) => Ok(true),
            Err(err) if err.kind == StoreErrorKind::ConditionNotMet => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn delete(&self, query: &Query) -> DbResult<bool> {
        let table = self.table(&query.model)?;
        let descriptor =
            select_descriptor(table.descriptors(), &query.conditions, &query.model)?;

        let key = if descriptor.is_index_path() {
            match self.resolve_unique(query)? {
                Some(record) => table.record_key(&record)?,
                // Nothing matched through the index; nothing to delete.
                None => return Ok(true),
            }
        } else {
            conditions_to_key(table, &query.conditions)?
        };

        let name = self.table_name(&query.model);
        let request = delete_item_request(table, &name, key, true);
        self.log_write("deleteItem", &name, &request.key, request.condition.as_deref());
        match self.client.delete_item(&request) {
            Ok(()) => Ok(true),
            Err(err) if err.kind == StoreErrorKind::ConditionNotMet => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn delete_all(&self, query: &Query) -> DbResult<usize> {
        let table = self.table(&query.model)?;
        let name = self.table_name(&query.model);
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
                    let key = match table.record_key(record) {
                        Ok(key) => key,
                        Err(err) => {
                            failures.push(err);
                            return SliceStep::Stop;
                        }
                    };
                    oplog.write(
                        "deleteItem",
                        vec![
                            ("table".to_string(), name.clone()),
                            ("key".to_string(), describe_item_key(&key)),
                        ],
                    );
                    let client = client.clone();
                    let request = delete_item_request(table, &name, key, false);
                    tickets.push(queue.submit(move || client.delete_item(&request)));
                }
                for ticket in tickets {
                    match ticket.wait() {
                        Some(Ok(())) => {}
                        Some(Err(err)) => {
                            failures.push(err.into());
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
