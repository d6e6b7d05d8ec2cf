//! Wire types and the client trait for the item backend.
//!
//! The client exposes hash/range point access, queries over a fixed hash key,
//! unordered scans with a continuation key, and conditional writes. Key
//! conditions, filters and update expressions travel as expression strings
//! with `#name`/`:value` placeholder maps.

use std::collections::BTreeMap;

use crate::error::StoreError;
use crate::value::CellValue;

/// Attribute name to wire value, as stored per item.
pub type AttrMap = BTreeMap<String, CellValue>;

#[derive(Debug, Clone)]
pub struct GetItemRequest {
    pub table: String,
    pub key: AttrMap,
}

#[derive(Debug, Clone, Default)]
pub struct ExpressionParts {
    /// `#x` placeholder to attribute name.
    pub names: BTreeMap<String, String>,
    /// `:x` placeholder to value.
    pub values: BTreeMap<String, CellValue>,
}

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub table: String,
    pub index: Option<String>,
    pub key_condition: String,
    pub filter: Option<String>,
    pub expressions: ExpressionParts,
    pub limit: Option<usize>,
    /// False reverses the native range-key order.
    pub forward: bool,
    pub start_key: Option<AttrMap>,
}

#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub table: String,
    pub filter: Option<String>,
    pub expressions: ExpressionParts,
    pub limit: Option<usize>,
    pub start_key: Option<AttrMap>,
}

#[derive(Debug, Clone)]
pub struct Page {
    pub items: Vec<AttrMap>,
    /// Continuation key, absent when the read is exhausted.
    pub last_key: Option<AttrMap>,
}

#[derive(Debug, Clone)]
pub struct PutItemRequest {
    pub table: String,
    pub item: AttrMap,
    pub condition: Option<String>,
    pub expressions: ExpressionParts,
}

#[derive(Debug, Clone)]
pub struct UpdateItemRequest {
    pub table: String,
    pub key: AttrMap,
    pub update: String,
    pub condition: Option<String>,
    pub expressions: ExpressionParts,
}

#[derive(Debug, Clone)]
pub struct DeleteItemRequest {
    pub table: String,
    pub key: AttrMap,
    pub condition: Option<String>,
    pub expressions: ExpressionParts,
}

pub trait ItemStoreClient: Send + Sync {
    fn get_item(&self, request: &GetItemRequest) -> Result<Option<AttrMap>, StoreError>;

    fn query(&self, request: &QueryRequest) -> Result<Page, StoreError>;

    /// Scans have no direction; the native order is whatever the backend
    /// yields.
    fn scan(&self, request: &ScanRequest) -> Result<Page, StoreError>;

    fn put_item(&self, request: &PutItemRequest) -> Result<(), StoreError>;

    fn update_item(&self, request: &UpdateItemRequest) -> Result<(), StoreError>;

    fn delete_item(&self, request: &DeleteItemRequest) -> Result<(), StoreError>;
}
