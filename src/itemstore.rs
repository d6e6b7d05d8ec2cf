//! Item backend: hash/range point access, global secondary indexes,
//! unordered scans, conditional writes through expression strings.

pub mod adapter;
pub mod client;
pub mod parser;
pub mod table;

pub use adapter::ItemStoreAdapter;
pub use client::{
    AttrMap, DeleteItemRequest, ExpressionParts, GetItemRequest, ItemStoreClient, Page,
    PutItemRequest, QueryRequest, ScanRequest, UpdateItemRequest,
};
pub use table::ItemTable;
