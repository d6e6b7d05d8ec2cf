//! Shared fixtures: in-memory clients for both backends and the schema set
//! the integration tests run against.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tidewater::error::StoreError;
use tidewater::itemstore::{
    AttrMap, DeleteItemRequest, ExpressionParts, GetItemRequest, ItemStoreAdapter,
    ItemStoreClient, Page, PutItemRequest, QueryRequest, ScanRequest, UpdateItemRequest,
};
use tidewater::rangestore::{
    ColumnAction, DeleteRowRequest, Direction, GetRangeRequest, GetRangeResponse, GetRowRequest,
    KeyTuple, PutRowRequest, RangeStoreAdapter, RangeStoreClient, RowExistence, StoreRow,
    UpdateRowRequest,
};
use tidewater::{CellValue, ConnectionConfig, Database, FieldCodec, ModelSchema};

// ---------------------------------------------------------------------------
// Schemas

pub fn rooms_schema() -> ModelSchema {
    ModelSchema::builder("rooms")
        .key("uuid", FieldCodec::string())
        .field("x", FieldCodec::integer().optional())
        .field("value", FieldCodec::string().optional())
        .build()
}

pub fn snapshots_schema() -> ModelSchema {
    ModelSchema::builder("snapshots")
        .key("sliceUUID", FieldCodec::string())
        .key("timestamp", FieldCodec::integer())
        .key("roomUUID", FieldCodec::string())
        .field("frameId", FieldCodec::integer())
        .field("createdAt", FieldCodec::timestamp().optional())
        .build()
}

pub fn members_schema() -> ModelSchema {
    ModelSchema::builder("members")
        .key("uuid", FieldCodec::string())
        .field("nickname", FieldCodec::string())
        .field("teamId", FieldCodec::integer())
        .index("teamId-index", &["teamId"])
        .build()
}

pub fn room_states_schema() -> ModelSchema {
    ModelSchema::builder("roomStates")
        .key("timestamp", FieldCodec::integer())
        .key("uuid", FieldCodec::string())
        .field("appUUID", FieldCodec::string().default_value("unknown"))
        .field("state", FieldCodec::enums(&["active", "banning", "closed"]))
        .build()
}

pub fn all_schemas() -> Vec<ModelSchema> {
    vec![
        rooms_schema(),
        snapshots_schema(),
        members_schema(),
        room_states_schema(),
    ]
}

// ---------------------------------------------------------------------------
// Range-store fake

/// Field list an index row exposes: the declared fields followed by the
/// primary-key fields the declaration leaves uncovered.
fn index_row_fields(schema: &ModelSchema, declared: &[String]) -> Vec<String> {
    let mut fields = declared.to_vec();
    for key in schema.key_names() {
        if !fields.contains(&key) {
            fields.push(key);
        }
    }
    fields
}

struct RangeIndex {
    table: String,
    name: String,
    fields: Vec<String>,
}

/// In-memory ordered-range store: rows sorted by primary-key tuple, native
/// index emulation, existence preconditions.
pub struct MemoryRangeStore {
    rows: Mutex<BTreeMap<String, BTreeMap<Vec<CellValue>, StoreRow>>>,
    indexes: Vec<RangeIndex>,
    calls: Mutex<usize>,
}

impl MemoryRangeStore {
    pub fn new(schemas: &[ModelSchema]) -> Self {
        let mut indexes = Vec::new();
        for schema in schemas {
            for index in schema.indexes() {
                indexes.push(RangeIndex {
                    table: schema.name().to_string(),
                    name: index.name.clone(),
                    fields: index_row_fields(schema, &index.fields),
                });
            }
        }
        MemoryRangeStore {
            rows: Mutex::new(BTreeMap::new()),
            indexes,
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.rows
            .lock()
            .unwrap()
            .get(table)
            .map(|rows| rows.len())
            .unwrap_or(0)
    }

    fn bump(&self) {
        *self.calls.lock().unwrap() += 1;
    }

    fn cell(row: &StoreRow, field: &str) -> Option<CellValue> {
        row.key
            .iter()
            .chain(row.columns.iter())
            .find(|(name, _)| name == field)
            .map(|(_, cell)| cell.clone())
    }

    /// The tuple a row exposes through the given read path.
    fn read_tuple(&self, request: &GetRangeRequest, row: &StoreRow) -> Option<KeyTuple> {
        match &request.index {
            None => Some(row.key.clone()),
            Some(name) => {
                let index = self
                    .indexes
                    .iter()
                    .find(|i| i.table == request.table && &i.name == name)?;
                let mut tuple = Vec::with_capacity(index.fields.len());
                for field in &index.fields {
                    tuple.push((field.clone(), Self::cell(row, field)?));
                }
                Some(tuple)
            }
        }
    }
}

fn tuple_cells(tuple: &KeyTuple) -> Vec<CellValue> {
    tuple.iter().map(|(_, cell)| cell.clone()).collect()
}

fn tuple_within(tuple: &[CellValue], lo: &[CellValue], hi: &[CellValue]) -> bool {
    tuple >= lo && tuple <= hi
}

impl RangeStoreClient for MemoryRangeStore {
    fn get_row(&self, request: &GetRowRequest) -> Result<Option<StoreRow>, StoreError> {
        self.bump();
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .get(&request.table)
            .and_then(|table| table.get(&tuple_cells(&request.key)))
            .cloned())
    }

    fn get_range(&self, request: &GetRangeRequest) -> Result<GetRangeResponse, StoreError> {
        self.bump();
        let rows = self.rows.lock().unwrap();
        let empty = BTreeMap::new();
        let table = rows.get(&request.table).unwrap_or(&empty);

        // Backward requests arrive with the start tuple on the upper side.
        let (lo, hi) = match request.direction {
            Direction::Forward => (tuple_cells(&request.start), tuple_cells(&request.end)),
            Direction::Backward => (tuple_cells(&request.end), tuple_cells(&request.start)),
        };

        let mut matched: Vec<(Vec<CellValue>, StoreRow)> = Vec::new();
        for row in table.values() {
            if let Some(tuple) = self.read_tuple(request, row) {
                let cells = tuple_cells(&tuple);
                if tuple_within(&cells, &lo, &hi) {
                    let exposed = match request.index {
                        None => row.clone(),
                        // Index rows carry the index tuple only.
                        Some(_) => StoreRow { key: tuple, columns: Vec::new() },
                    };
                    matched.push((cells, exposed));
                }
            }
        }
        matched.sort_by(|a, b| a.0.cmp(&b.0));
        if request.direction == Direction::Backward {
            matched.reverse();
        }

        let page: Vec<StoreRow> = matched
            .iter()
            .take(request.limit)
            .map(|(_, row)| row.clone())
            .collect();
        let next_start = matched.get(page.len()).map(|(_, row)| row.key.clone());
        Ok(GetRangeResponse { rows: page, next_start })
    }

    fn put_row(&self, request: &PutRowRequest) -> Result<(), StoreError> {
        self.bump();
        let mut rows = self.rows.lock().unwrap();
        let table = rows.entry(request.table.clone()).or_default();
        let cells = tuple_cells(&request.key);
        match request.existence {
            RowExistence::ExpectNotExist if table.contains_key(&cells) => {
                return Err(StoreError::condition_not_met("row already exists"));
            }
            RowExistence::ExpectExist if !table.contains_key(&cells) => {
                return Err(StoreError::condition_not_met("row does not exist"));
            }
            _ => {}
        }
        table.insert(
            cells,
            StoreRow { key: request.key.clone(), columns: request.columns.clone() },
        );
        Ok(())
    }

    fn update_row(&self, request: &UpdateRowRequest) -> Result<(), StoreError> {
        self.bump();
        let mut rows = self.rows.lock().unwrap();
        let table = rows.entry(request.table.clone()).or_default();
        let cells = tuple_cells(&request.key);
        let row = match table.get_mut(&cells) {
            Some(row) => row,
            None if request.existence == RowExistence::ExpectExist => {
                return Err(StoreError::condition_not_met("row does not exist"));
            }
            None => {
                table.insert(
                    cells.clone(),
                    StoreRow { key: request.key.clone(), columns: Vec::new() },
                );
                table.get_mut(&cells).unwrap()
            }
        };
        for (field, action) in &request.actions {
            row.columns.retain(|(name, _)| name != field);
            if let ColumnAction::Put(cell) = action {
                row.columns.push((field.clone(), cell.clone()));
            }
        }
        Ok(())
    }

    fn delete_row(&self, request: &DeleteRowRequest) -> Result<(), StoreError> {
        self.bump();
        let mut rows = self.rows.lock().unwrap();
        let table = rows.entry(request.table.clone()).or_default();
        let cells = tuple_cells(&request.key);
        if table.remove(&cells).is_none() && request.existence == RowExistence::ExpectExist {
            return Err(StoreError::condition_not_met("row does not exist"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Item-store fake

struct ItemKeyLayout {
    hash_attr: String,
    range_attr: Option<String>,
}

struct ItemIndex {
    table: String,
    name: String,
    layout: ItemKeyLayout,
}

/// In-memory item store: hash/range keyed items, GSI emulation over the
/// placeholder expression grammar, conditional writes. Scans yield items in
/// reverse key order, so ascending scans exercise the buffering path.
pub struct MemoryItemStore {
    items: Mutex<BTreeMap<String, BTreeMap<AttrMap, AttrMap>>>,
    tables: Vec<(String, ItemKeyLayout)>,
    indexes: Vec<ItemIndex>,
    calls: Mutex<usize>,
}

fn fold_attr(fields: &[String]) -> String {
    fields.join("/")
}

impl MemoryItemStore {
    pub fn new(schemas: &[ModelSchema]) -> Self {
        let mut tables = Vec::new();
        let mut indexes = Vec::new();
        for schema in schemas {
            let keys = schema.key_names();
            let layout = match keys.len() {
                1 => ItemKeyLayout { hash_attr: keys[0].clone(), range_attr: None },
                _ => ItemKeyLayout {
                    hash_attr: fold_attr(&keys[..keys.len() - 1]),
                    range_attr: keys.last().cloned(),
                },
            };
            tables.push((schema.name().to_string(), layout));

            for index in schema.indexes() {
                let fields = index_row_fields(schema, &index.fields);
                indexes.push(ItemIndex {
                    table: schema.name().to_string(),
                    name: index.name.clone(),
                    layout: ItemKeyLayout {
                        hash_attr: fields[0].clone(),
                        range_attr: fields.get(1).cloned(),
                    },
                });
            }
            if keys.len() >= 3 {
                indexes.push(ItemIndex {
                    table: schema.name().to_string(),
                    name: format!("{}-{}", keys[0], keys[1]),
                    layout: ItemKeyLayout {
                        hash_attr: keys[0].clone(),
                        range_attr: Some(keys[1].clone()),
                    },
                });
            }
            if keys.len() >= 4 {
                indexes.push(ItemIndex {
                    table: schema.name().to_string(),
                    name: fold_attr(&keys[..3]),
                    layout: ItemKeyLayout {
                        hash_attr: fold_attr(&keys[..2]),
                        range_attr: Some(keys[2].clone()),
                    },
                });
            }
        }
        MemoryItemStore {
            items: Mutex::new(BTreeMap::new()),
            tables,
            indexes,
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }

    pub fn item_count(&self, table: &str) -> usize {
        self.items
            .lock()
            .unwrap()
            .get(table)
            .map(|items| items.len())
            .unwrap_or(0)
    }

    fn bump(&self) {
        *self.calls.lock().unwrap() += 1;
    }

    fn table_layout(&self, table: &str) -> &ItemKeyLayout {
        self.tables
            .iter()
            .find(|(name, _)| name == table)
            .map(|(_, layout)| layout)
            .expect("unregistered table")
    }

    fn index_layout(&self, table: &str, index: &str) -> &ItemKeyLayout {
        self.indexes
            .iter()
            .find(|i| i.table == table && i.name == index)
            .map(|i| &i.layout)
            .expect("unregistered index")
    }

    fn primary_key(&self, table: &str, item: &AttrMap) -> AttrMap {
        let layout = self.table_layout(table);
        let mut key = AttrMap::new();
        if let Some(cell) = item.get(&layout.hash_attr) {
            key.insert(layout.hash_attr.clone(), cell.clone());
        }
        if let Some(range) = &layout.range_attr {
            if let Some(cell) = item.get(range) {
                key.insert(range.clone(), cell.clone());
            }
        }
        key
    }

    /// Sort key of an item under a layout: the range cell, then the primary
    /// key for ties.
    fn sort_key(&self, table: &str, layout: &ItemKeyLayout, item: &AttrMap) -> (CellValue, AttrMap) {
        let range = layout
            .range_attr
            .as_ref()
            .and_then(|attr| item.get(attr))
            .cloned()
            .unwrap_or(CellValue::InfMin);
        (range, self.primary_key(table, item))
    }
}

/// Evaluates one `#name OP :value` fragment against an item.
fn eval_fragment(item: &AttrMap, fragment: &str, parts: &ExpressionParts) -> bool {
    let pieces: Vec<&str> = fragment.split_whitespace().collect();
    assert_eq!(pieces.len(), 3, "unsupported fragment: {fragment}");
    let attr = parts.names.get(pieces[0]).expect("unknown name placeholder");
    let expected = parts.values.get(pieces[2]).expect("unknown value placeholder");
    let actual = match item.get(attr) {
        Some(cell) => cell,
        None => return false,
    };
    match pieces[1] {
        "=" => actual == expected,
        ">" => actual > expected,
        ">=" => actual >= expected,
        "<" => actual < expected,
        "<=" => actual <= expected,
        other => panic!("unsupported comparator: {other}"),
    }
}

fn eval_expression(item: &AttrMap, expression: &str, parts: &ExpressionParts) -> bool {
    expression
        .split(" AND ")
        .all(|fragment| eval_fragment(item, fragment, parts))
}

/// `attribute_exists` / `attribute_not_exists` conditions on write requests.
fn eval_existence(condition: &str, exists: bool) -> bool {
    if condition.contains("attribute_not_exists") {
        !exists
    } else if condition.contains("attribute_exists") {
        exists
    } else {
        true
    }
}

impl ItemStoreClient for MemoryItemStore {
    fn get_item(&self, request: &GetItemRequest) -> Result<Option<AttrMap>, StoreError> {
        self.bump();
        let items = self.items.lock().unwrap();
        Ok(items
            .get(&request.table)
            .and_then(|table| table.get(&request.key))
            .cloned())
    }

    fn query(&self, request: &QueryRequest) -> Result<Page, StoreError> {
        self.bump();
        let items = self.items.lock().unwrap();
        let empty = BTreeMap::new();
        let table = items.get(&request.table).unwrap_or(&empty);
        let layout = match &request.index {
            Some(index) => self.index_layout(&request.table, index),
            None => self.table_layout(&request.table),
        };

        let mut matched: Vec<((CellValue, AttrMap), AttrMap)> = Vec::new();
        for item in table.values() {
            if !eval_expression(item, &request.key_condition, &request.expressions) {
                continue;
            }
            if let Some(filter) = &request.filter {
                if !eval_expression(item, filter, &request.expressions) {
                    continue;
                }
            }
            matched.push((self.sort_key(&request.table, layout, item), item.clone()));
        }
        matched.sort_by(|a, b| a.0.cmp(&b.0));
        if !request.forward {
            matched.reverse();
        }

        if let Some(start) = &request.start_key {
            let cursor = self.sort_key(&request.table, layout, start);
            matched.retain(|(key, _)| {
                if request.forward {
                    key > &cursor
                } else {
                    key < &cursor
                }
            });
        }

        let limit = request.limit.unwrap_or(usize::MAX);
        let more = matched.len() > limit;
        let page: Vec<AttrMap> = matched.into_iter().take(limit).map(|(_, item)| item).collect();
        let last_key = if more { page.last().cloned() } else { None };
        Ok(Page { items: page, last_key })
    }

    fn scan(&self, request: &ScanRequest) -> Result<Page, StoreError> {
        self.bump();
        let items = self.items.lock().unwrap();
        let empty = BTreeMap::new();
        let table = items.get(&request.table).unwrap_or(&empty);

        let mut matched: Vec<(AttrMap, AttrMap)> = Vec::new();
        for (key, item) in table.iter() {
            if let Some(filter) = &request.filter {
                if !eval_expression(item, filter, &request.expressions) {
                    continue;
                }
            }
            matched.push((key.clone(), item.clone()));
        }
        // Native scan order is reverse key order.
        matched.sort_by(|a, b| b.0.cmp(&a.0));

        if let Some(start) = &request.start_key {
            let cursor = self.primary_key(&request.table, start);
            matched.retain(|(key, _)| key < &cursor);
        }

        let limit = request.limit.unwrap_or(usize::MAX);
        let more = matched.len() > limit;
        let page: Vec<AttrMap> = matched.into_iter().take(limit).map(|(_, item)| item).collect();
        let last_key = if more { page.last().cloned() } else { None };
        Ok(Page { items: page, last_key })
    }

    fn put_item(&self, request: &PutItemRequest) -> Result<(), StoreError> {
        self.bump();
        let mut items = self.items.lock().unwrap();
        let table = items.entry(request.table.clone()).or_default();
        let key = self.primary_key(&request.table, &request.item);
        if let Some(condition) = &request.condition {
            if !eval_existence(condition, table.contains_key(&key)) {
                return Err(StoreError::condition_not_met("conditional check failed"));
            }
        }
        table.insert(key, request.item.clone());
        Ok(())
    }

    fn update_item(&self, request: &UpdateItemRequest) -> Result<(), StoreError> {
        self.bump();
        let mut items = self.items.lock().unwrap();
        let table = items.entry(request.table.clone()).or_default();
        if let Some(condition) = &request.condition {
            if !eval_existence(condition, table.contains_key(&request.key)) {
                return Err(StoreError::condition_not_met("conditional check failed"));
            }
        }
        let item = table.entry(request.key.clone()).or_insert_with(|| request.key.clone());

        let (sets, removes) = match request.update.find("REMOVE ") {
            Some(at) => (&request.update[..at], &request.update[at + "REMOVE ".len()..]),
            None => (request.update.as_str(), ""),
        };
        if let Some(sets) = sets.trim().strip_prefix("SET ") {
            for assignment in sets.split(", ") {
                let (name, value) = assignment.split_once(" = ").expect("malformed SET");
                let attr = request.expressions.names.get(name.trim()).unwrap();
                let cell = request.expressions.values.get(value.trim()).unwrap();
                item.insert(attr.clone(), cell.clone());
            }
        }
        for name in removes.split(", ").filter(|n| !n.is_empty()) {
            let attr = request.expressions.names.get(name.trim()).unwrap();
            item.remove(attr);
        }
        Ok(())
    }

    fn delete_item(&self, request: &DeleteItemRequest) -> Result<(), StoreError> {
        self.bump();
        let mut items = self.items.lock().unwrap();
        let table = items.entry(request.table.clone()).or_default();
        if let Some(condition) = &request.condition {
            if !eval_existence(condition, table.contains_key(&request.key)) {
                return Err(StoreError::condition_not_met("conditional check failed"));
            }
        }
        table.remove(&request.key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Wiring

pub fn range_database() -> (Arc<MemoryRangeStore>, Database) {
    let client = Arc::new(MemoryRangeStore::new(&all_schemas()));
    let adapter =
        RangeStoreAdapter::new(client.clone(), ConnectionConfig::default(), all_schemas())
            .expect("adapter construction");
    (client, Database::new(Arc::new(adapter)))
}

pub fn item_database() -> (Arc<MemoryItemStore>, Database) {
    let client = Arc::new(MemoryItemStore::new(&all_schemas()));
    let adapter =
        ItemStoreAdapter::new(client.clone(), ConnectionConfig::default(), all_schemas())
            .expect("adapter construction");
    (client, Database::new(Arc::new(adapter)))
}

/// Runs one scenario against both backends.
pub fn with_both_backends(scenario: impl Fn(&Database, &str)) {
    let (_, database) = range_database();
    scenario(&database, "range store");
    let (_, database) = item_database();
    scenario(&database, "item store");
}
