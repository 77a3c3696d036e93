//! # azrow-tables
//!
//! Typed access to a partitioned key/value table service.
//!
//! ## Features
//!
//! - **OData filters** – composable predicate trees compiled to `$filter` strings
//! - **Accessor** – ensure/delete/find/list tables, scan/insert/upsert/delete rows
//! - **Operation results** – uniform `{ success, result, error_code }` reporting
//! - **Overflow columns** – split long strings across suffixed columns and back
//! - **Tables** – typed handles with key functions and row transforms
//! - **Stores** – REST (shared key / SAS) and an in-memory store for tests

pub mod types;
pub mod odata;
pub mod overflow;
pub mod store;
pub mod eval;
pub mod memory;
pub mod config;
pub mod rest;
pub mod accessor;
pub mod transform;
pub mod table;
pub mod azurite;

pub use accessor::{classify, Classification, ScanOptions, TableAccessor};
pub use azurite::{is_azurite_running, DEFAULT_AZURITE_ENDPOINT};
pub use config::{ConnectionString, StorageCredential, TableStorageConfig};
pub use memory::MemoryTableStore;
pub use odata::{compile, Filter, FilterNode, FilterStatement, FilterValue, Join, Operator};
pub use overflow::{restore_overflow, split_overflow, utf16_len, TABLE_COLUMN_LENGTH_LIMIT};
pub use rest::RestTableStore;
pub use store::RemoteStore;
pub use table::Table;
pub use transform::{FnTransform, IdentityTransform, JsonColumns, RowTransform};
pub use types::{
    Entity, EntityKeys, EntityValue, OperationResult, RawResponse, TablesError, TablesResult,
    UpdateMode,
};
