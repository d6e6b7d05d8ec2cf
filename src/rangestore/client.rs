//! Wire types and the client trait for the ordered-range backend.
//!
//! The network client is an external collaborator. It must offer point gets,
//! ordered range reads with a continuation key, and row writes guarded by an
//! existence precondition. Calls block the calling coroutine.

use crate::error::StoreError;
use crate::value::CellValue;

/// Ordered primary-key tuple, one cell per key component.
pub type KeyTuple = Vec<(String, CellValue)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Precondition attached to row writes. A failed expectation surfaces as
/// [`StoreErrorKind::ConditionNotMet`](crate::error::StoreErrorKind).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowExistence {
    Ignore,
    ExpectExist,
    ExpectNotExist,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreRow {
    pub key: KeyTuple,
    pub columns: Vec<(String, CellValue)>,
}

#[derive(Debug, Clone)]
pub struct GetRowRequest {
    pub table: String,
    pub key: KeyTuple,
}

#[derive(Debug, Clone)]
pub struct GetRangeRequest {
    pub table: String,
    /// Read through a native secondary index instead of the table.
    pub index: Option<String>,
    pub start: KeyTuple,
    pub end: KeyTuple,
    pub direction: Direction,
    pub limit: usize,
}

#[derive(Debug, Clone)]
pub struct GetRangeResponse {
    pub rows: Vec<StoreRow>,
    /// Key tuple to resume from, absent when the range is exhausted.
    pub next_start: Option<KeyTuple>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnAction {
    Put(CellValue),
    Delete,
}

#[derive(Debug, Clone)]
pub struct PutRowRequest {
    pub table: String,
    pub key: KeyTuple,
    pub columns: Vec<(String, CellValue)>,
    pub existence: RowExistence,
}

#[derive(Debug, Clone)]
pub struct UpdateRowRequest {
    pub table: String,
    pub key: KeyTuple,
    pub actions: Vec<(String, ColumnAction)>,
    pub existence: RowExistence,
}

#[derive(Debug, Clone)]
pub struct DeleteRowRequest {
    pub table: String,
    pub key: KeyTuple,
    pub existence: RowExistence,
}

pub trait RangeStoreClient: Send + Sync {
    fn get_row(&self, request: &GetRowRequest) -> Result<Option<StoreRow>, StoreError>;

    fn get_range(&self, request: &GetRangeRequest) -> Result<GetRangeResponse, StoreError>;

    fn put_row(&self, request: &PutRowRequest) -> Result<(), StoreError>;

    fn update_row(&self, request: &UpdateRowRequest) -> Result<(), StoreError>;

    fn delete_row(&self, request: &DeleteRowRequest) -> Result<(), StoreError>;
}
