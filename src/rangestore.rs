//! Ordered-range backend: native secondary indexes, ordered scans over full
//! primary-key tuples, per-row preconditions, retried row-lock conflicts.

pub mod adapter;
pub mod client;
pub mod parser;

pub use adapter::{RangeStoreAdapter, CONFLICT_RETRY_COUNT, CONFLICT_RETRY_INTERVAL};
pub use client::{
    ColumnAction, DeleteRowRequest, Direction, GetRangeRequest, GetRangeResponse, GetRowRequest,
    KeyTuple, PutRowRequest, RangeStoreClient, RowExistence, StoreRow, UpdateRowRequest,
};
