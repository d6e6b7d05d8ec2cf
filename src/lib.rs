//! Tidewater: one condition query model over two wide-column backends.
//!
//! A schema declares each model's ordered key fields, value fields and
//! secondary indexes. The façade builds OR-of-AND condition sets over those
//! fields; an adapter plans the cheapest key path and synthesizes the native
//! requests: ordered range scans with per-row preconditions on the range
//! store, key-condition queries and conditional expressions on the item
//! store. Network clients are external collaborators behind one trait per
//! backend.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tidewater::{Database, FieldCodec, ModelSchema};
//! # fn wire_up(adapter: Arc<dyn tidewater::StorageAdapter>) -> tidewater::DbResult<()> {
//! let schema = ModelSchema::builder("rooms")
//!     .key("uuid", FieldCodec::string())
//!     .field("state", FieldCodec::enums(&["active", "closed"]))
//!     .index("state-index", &["state"])
//!     .build();
//!
//! let db = Database::new(adapter);
//! let room = db.model("rooms").get().field("uuid").equals("r-1").result()?;
//! # let _ = room; Ok(())
//! # }
//! ```

pub mod adapter;
pub mod codec;
pub mod condition;
pub mod config;
pub mod error;
pub mod executor;
pub mod itemstore;
pub mod oplog;
pub mod plan;
pub mod query;
pub mod rangestore;
pub mod schema;
pub mod value;

pub use adapter::{Query, SliceConsumer, SliceStep, StorageAdapter};
pub use codec::FieldCodec;
pub use condition::{Condition, ConditionSet, Operator};
pub use config::ConnectionConfig;
pub use error::{DbError, DbResult, StoreError, StoreErrorKind};
pub use executor::AdmissionQueue;
pub use itemstore::ItemStoreAdapter;
pub use oplog::OpLog;
pub use query::{Database, GetBuilder, Model, SetBuilder};
pub use rangestore::RangeStoreAdapter;
pub use schema::{ModelRegistry, ModelSchema};
pub use value::{CellValue, FieldValue, Record};
