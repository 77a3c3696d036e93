//! Table-scoped CRUD and scans on top of a [`RemoteStore`].
//!
//! Every operation reports an [`OperationResult`]; nothing here returns
//! `Err`. Store outcomes are classified with [`classify`], transport
//! failures become `success: false` without an error code.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use log::{debug, error};

use crate::config::{ConnectionString, TableStorageConfig};
use crate::memory::MemoryTableStore;
use crate::odata::{compile, Filter, FilterStatement};
use crate::rest::RestTableStore;
use crate::store::RemoteStore;
use crate::types::{
    error_codes, Entity, OperationResult, RawResponse, TablesError, TablesResult, UpdateMode,
};

/// Client-side row predicate applied after the store returns rows.
pub type PostFilter<'a> = &'a (dyn Fn(&Entity) -> bool + Send + Sync);

/// Options for [`TableAccessor::get_items`].
#[derive(Clone, Copy, Default)]
pub struct ScanOptions<'a> {
    /// Compiled and sent to the store; skipped when it compiles to `""`.
    pub filter: Option<&'a FilterStatement>,
    pub post_filter: Option<PostFilter<'a>>,
}

impl<'a> ScanOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: &'a FilterStatement) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn post_filter(mut self, f: PostFilter<'a>) -> Self {
        self.post_filter = Some(f);
        self
    }
}

/// Result of classifying a raw store response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub is_error: bool,
    pub error_code: Option<String>,
}

/// Status >= 400 is an error; its code comes from the payload or falls back
/// to `"Unknown error"` (some failures, e.g. bad table names, carry none).
pub fn classify(raw: &RawResponse) -> Classification {
    if raw.status < 400 {
        return Classification {
            is_error: false,
            error_code: None,
        };
    }
    let code = raw
        .error
        .as_ref()
        .map(|e| e.code.as_str())
        .filter(|c| !c.is_empty())
        .unwrap_or(error_codes::UNKNOWN_ERROR);
    Classification {
        is_error: true,
        error_code: Some(code.to_string()),
    }
}

/// Handle to a table service; cheap to clone.
#[derive(Clone)]
pub struct TableAccessor {
    store: Arc<dyn RemoteStore>,
    column_length_limit: usize,
}

impl TableAccessor {
    /// Build an accessor talking to the service named by the connection string.
    pub fn from_config(config: &TableStorageConfig) -> TablesResult<Self> {
        if config.connection_string.trim().is_empty() {
            return Err(TablesError::Configuration(
                "a connection string is required".into(),
            ));
        }
        let connection = ConnectionString::parse(&config.connection_string)?;
        debug!("table storage endpoint → {}", connection.table_endpoint);
        let store = RestTableStore::new(
            connection,
            Duration::from_secs(config.request_timeout_secs),
        )?;
        Ok(Self::with_store(Arc::new(store)).with_column_length_limit(config.column_length_limit))
    }

    pub fn with_store(store: Arc<dyn RemoteStore>) -> Self {
        Self {
            store,
            column_length_limit: crate::overflow::TABLE_COLUMN_LENGTH_LIMIT,
        }
    }

    /// Accessor over a fresh [`MemoryTableStore`].
    pub fn in_memory() -> Self {
        Self::with_store(Arc::new(MemoryTableStore::new()))
    }

    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    /// Longest string a [`crate::table::Table`] writes into one column
    /// before splitting it, in UTF-16 units.
    pub fn column_length_limit(&self) -> usize {
        self.column_length_limit
    }

    /// Override the column length limit; `0` keeps the service default.
    pub fn with_column_length_limit(mut self, limit: usize) -> Self {
        self.column_length_limit = if limit == 0 {
            crate::overflow::TABLE_COLUMN_LENGTH_LIMIT
        } else {
            limit
        };
        self
    }

    // ── Tables ───────────────────────────────────────────────────────

    /// Create the table; an existing table counts as success.
    pub async fn ensure_table(&self, table: &str) -> OperationResult {
        let raw = self.store.create_table(table).await;
        outcome("ensure_table", table, raw, Some(error_codes::TABLE_ALREADY_EXISTS))
    }

    /// Delete the table. A missing table is reported as a failure.
    pub async fn delete_table(&self, table: &str) -> OperationResult {
        let raw = self.store.delete_table(table).await;
        outcome("delete_table", table, raw, None)
    }

    /// Check whether a table with exactly this name exists.
    pub async fn find_table(&self, table: &str) -> OperationResult {
        let filter = compile(&FilterStatement::single(Filter::eq("TableName", table)));
        let mut tables = self.store.list_tables(Some(filter));
        let mut found = false;
        while let Some(item) = tables.next().await {
            match item {
                Ok(t) if t.name == table => found = true,
                Ok(_) => {}
                Err(e) => {
                    debug!("find_table({}) failed: {}", table, e);
                    break;
                }
            }
        }
        if found {
            OperationResult::ok()
        } else {
            OperationResult::failed(Some(error_codes::NOT_FOUND.into()))
        }
    }

    /// All table names; empty on any failure.
    pub async fn list_tables(&self) -> Vec<String> {
        let mut tables = self.store.list_tables(None);
        let mut names = Vec::new();
        while let Some(item) = tables.next().await {
            match item {
                Ok(t) => names.push(t.name),
                Err(e) => {
                    debug!("list_tables failed: {}", e);
                    return Vec::new();
                }
            }
        }
        names
    }

    // ── Rows ─────────────────────────────────────────────────────────

    /// Scan a table. Rows come back in store order after the optional
    /// client-side `post_filter`.
    pub async fn get_items(&self, table: &str, options: ScanOptions<'_>) -> OperationResult<Vec<Entity>> {
        let filter = options.filter.map(compile).filter(|f| !f.is_empty());
        debug!("get_items({}) filter={:?}", table, filter);

        let mut rows = self.store.list_entities(table, filter);
        let mut result = Vec::new();
        while let Some(row) = rows.next().await {
            match row {
                Ok(entity) => {
                    if options.post_filter.map_or(true, |keep| keep(&entity)) {
                        result.push(entity);
                    }
                }
                Err(e) => {
                    debug!("get_items({}) failed: {}", table, e);
                    return OperationResult::failed(Some(error_codes::COULD_NOT_GET_ITEMS.into()))
                        .with_result(Vec::new());
                }
            }
        }
        OperationResult::ok_with(result)
    }

    /// Insert a new row. Fails if the identity pair exists or the table is missing.
    pub async fn add_item(&self, table: &str, item: &Entity) -> OperationResult {
        let raw = self.store.create_entity(table, item).await;
        outcome("add_item", table, raw, None)
    }

    pub async fn upsert_item(&self, table: &str, item: &Entity, mode: UpdateMode) -> OperationResult {
        let raw = self.store.upsert_entity(table, item, mode).await;
        outcome("upsert_item", table, raw, None)
    }

    /// Delete a row; a row that is already gone counts as success.
    pub async fn delete_item(&self, table: &str, partition_key: &str, row_key: &str) -> OperationResult {
        let raw = self.store.delete_entity(table, partition_key, row_key).await;
        outcome("delete_item", table, raw, Some(error_codes::RESOURCE_NOT_FOUND))
    }
}

/// Map a store call onto an [`OperationResult`]; `tolerated` is an error
/// code that still counts as success (reported alongside).
fn outcome(
    op: &str,
    table: &str,
    raw: TablesResult<RawResponse>,
    tolerated: Option<&str>,
) -> OperationResult {
    match raw {
        Ok(raw) => {
            let c = classify(&raw);
            if let Some(code) = &c.error_code {
                error!("{}({}) → {} {}", op, table, raw.status, code);
            }
            let success = !c.is_error || (tolerated.is_some() && c.error_code.as_deref() == tolerated);
            OperationResult {
                success,
                result: None,
                error_code: c.error_code,
            }
        }
        Err(e) => {
            error!("{}({}) failed: {}", op, table, e);
            OperationResult::failed(None)
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ODataError;

    #[test]
    fn classify_success() {
        let c = classify(&RawResponse::status(204));
        assert!(!c.is_error);
        assert!(c.error_code.is_none());
    }

    #[test]
    fn classify_known_code() {
        let c = classify(&RawResponse::error(409, "EntityAlreadyExists", "exists"));
        assert!(c.is_error);
        assert_eq!(c.error_code.as_deref(), Some("EntityAlreadyExists"));
    }

    #[test]
    fn classify_without_code() {
        let c = classify(&RawResponse::status(400));
        assert_eq!(c.error_code.as_deref(), Some("Unknown error"));
        let c = classify(&RawResponse {
            status: 400,
            error: Some(ODataError::new("", "")),
        });
        assert_eq!(c.error_code.as_deref(), Some("Unknown error"));
    }

    #[test]
    fn outcome_transport_error() {
        let r = outcome("op", "t", Err(TablesError::Transport("down".into())), None);
        assert!(!r.success);
        assert!(r.error_code.is_none());
    }

    #[test]
    fn from_config_requires_connection_string() {
        let err = TableAccessor::from_config(&TableStorageConfig::default()).err().unwrap();
        assert!(matches!(err, TablesError::Configuration(_)));
    }

    #[test]
    fn from_config_development_storage() {
        let acc = TableAccessor::from_config(&TableStorageConfig::development()).unwrap();
        assert_eq!(acc.column_length_limit(), 31_999);
    }

    #[test]
    fn from_config_carries_column_limit() {
        let config = TableStorageConfig {
            column_length_limit: 1_000,
            ..TableStorageConfig::development()
        };
        let acc = TableAccessor::from_config(&config).unwrap();
        assert_eq!(acc.column_length_limit(), 1_000);
        assert_eq!(acc.with_column_length_limit(0).column_length_limit(), 31_999);
    }

    #[tokio::test]
    async fn ensure_is_idempotent() {
        let acc = TableAccessor::in_memory();
        assert!(acc.ensure_table("Orders").await.success);
        let again = acc.ensure_table("Orders").await;
        assert!(again.success);
        assert_eq!(again.error_code.as_deref(), Some("TableAlreadyExists"));
    }

    #[tokio::test]
    async fn ensure_invalid_name() {
        let acc = TableAccessor::in_memory();
        let r = acc.ensure_table("T2").await;
        assert!(!r.success);
        assert_eq!(r.error_code.as_deref(), Some("Unknown error"));
    }

    #[tokio::test]
    async fn delete_table_is_not_normalized() {
        let acc = TableAccessor::in_memory();
        acc.ensure_table("Orders").await;
        assert!(acc.delete_table("Orders").await.success);
        let again = acc.delete_table("Orders").await;
        assert!(!again.success);
        assert_eq!(again.error_code.as_deref(), Some("ResourceNotFound"));
    }

    #[tokio::test]
    async fn find_and_list_tables() {
        let acc = TableAccessor::in_memory();
        assert!(acc.list_tables().await.is_empty());
        acc.ensure_table("Orders").await;
        acc.ensure_table("OrdersArchive").await;
        assert!(acc.find_table("Orders").await.success);
        let missing = acc.find_table("Order").await;
        assert!(!missing.success);
        assert_eq!(missing.error_code.as_deref(), Some("Not found"));
        assert_eq!(acc.list_tables().await, vec!["Orders", "OrdersArchive"]);
    }

    #[tokio::test]
    async fn add_to_missing_table_fails() {
        let acc = TableAccessor::in_memory();
        let r = acc.add_item("Nope", &Entity::new("PK1", "R1")).await;
        assert!(!r.success);
        assert_eq!(r.error_code.as_deref(), Some("TableNotFound"));
    }

    #[tokio::test]
    async fn upsert_does_not_create_table() {
        let acc = TableAccessor::in_memory();
        let r = acc.upsert_item("Nope", &Entity::new("PK1", "R1"), UpdateMode::Merge).await;
        assert!(!r.success);
        assert!(acc.list_tables().await.is_empty());
    }

    #[tokio::test]
    async fn scan_failure_returns_empty_result() {
        let acc = TableAccessor::in_memory();
        let r = acc.get_items("Nope", ScanOptions::new()).await;
        assert!(!r.success);
        assert_eq!(r.error_code.as_deref(), Some("Could not get items"));
        assert_eq!(r.result, Some(Vec::new()));
    }

    #[tokio::test]
    async fn scan_with_post_filter() {
        let acc = TableAccessor::in_memory();
        acc.ensure_table("Orders").await;
        for i in 0..5 {
            acc.add_item("Orders", &Entity::new("PK", format!("R{i}")).with("n", i)).await;
        }
        let odd = |e: &Entity| matches!(e.get("n"), Some(crate::types::EntityValue::Int32(n)) if n % 2 == 1);
        let r = acc.get_items("Orders", ScanOptions::new().post_filter(&odd)).await;
        let keys: Vec<String> = r.result.unwrap().into_iter().map(|e| e.row_key).collect();
        assert_eq!(keys, vec!["R1", "R3"]);
    }

    #[tokio::test]
    async fn empty_filter_statement_is_skipped() {
        let acc = TableAccessor::in_memory();
        acc.ensure_table("Orders").await;
        acc.add_item("Orders", &Entity::new("PK", "R")).await;
        let empty = FilterStatement::default();
        let r = acc.get_items("Orders", ScanOptions::new().filter(&empty)).await;
        assert!(r.success);
        assert_eq!(r.result.map(|v| v.len()), Some(1));
    }
}
