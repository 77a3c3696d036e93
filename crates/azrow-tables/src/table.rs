//! Typed handle bound to one table.

use std::sync::Arc;

use log::{debug, warn};

use crate::accessor::{ScanOptions, TableAccessor};
use crate::transform::{IdentityTransform, RowTransform};
use crate::types::{error_codes, Entity, EntityKeys, OperationResult, TablesError, TablesResult, UpdateMode};

/// Derives the identity pair from a lookup parameter.
pub type KeyFn<P> = dyn Fn(&P) -> EntityKeys + Send + Sync;

/// A named table with a key function and a row transform.
///
/// `P` is whatever callers use to address a row; `R` is the application row.
/// Writes make sure the table exists first.
pub struct Table<P, R = Entity> {
    name: String,
    accessor: TableAccessor,
    get_keys: Arc<KeyFn<P>>,
    transform: Arc<dyn RowTransform<R>>,
}

impl<P, R> Clone for Table<P, R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            accessor: self.accessor.clone(),
            get_keys: Arc::clone(&self.get_keys),
            transform: Arc::clone(&self.transform),
        }
    }
}

impl<P> Table<P, Entity> {
    /// Table storing raw entities.
    pub fn untyped(
        accessor: TableAccessor,
        name: impl Into<String>,
        get_keys: impl Fn(&P) -> EntityKeys + Send + Sync + 'static,
    ) -> Self {
        Self::new(accessor, name, get_keys, IdentityTransform)
    }
}

impl<P, R> Table<P, R> {
    pub fn new(
        accessor: TableAccessor,
        name: impl Into<String>,
        get_keys: impl Fn(&P) -> EntityKeys + Send + Sync + 'static,
        transform: impl RowTransform<R> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            accessor,
            get_keys: Arc::new(get_keys),
            transform: Arc::new(transform),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn accessor(&self) -> &TableAccessor {
        &self.accessor
    }

    pub fn get_keys(&self, param: &P) -> EntityKeys {
        (self.get_keys)(param)
    }

    pub async fn ensure(&self) -> OperationResult {
        self.accessor.ensure_table(&self.name).await
    }

    pub async fn delete(&self) -> OperationResult {
        self.accessor.delete_table(&self.name).await
    }

    pub async fn find(&self) -> OperationResult {
        self.accessor.find_table(&self.name).await
    }

    /// Scan and load every row. A row the transform rejects fails the scan.
    pub async fn get_items(&self, options: ScanOptions<'_>) -> OperationResult<Vec<R>> {
        let scan = self.accessor.get_items(&self.name, options).await;
        if !scan.success {
            return OperationResult {
                success: false,
                result: Some(Vec::new()),
                error_code: scan.error_code,
            };
        }

        let rows = scan.result.unwrap_or_default();
        let mut loaded = Vec::with_capacity(rows.len());
        for row in rows {
            match self.transform.load(row) {
                Ok(r) => loaded.push(r),
                Err(e) => {
                    warn!("{}: could not load row: {}", self.name, e);
                    return OperationResult::failed(Some(error_codes::COULD_NOT_LOAD_ITEMS.into()))
                        .with_result(Vec::new());
                }
            }
        }
        OperationResult::ok_with(loaded)
    }

    pub async fn add_item(&self, item: &R) -> OperationResult {
        self.ensure_before_write().await;
        match self.save(item) {
            Ok(entity) => self.accessor.add_item(&self.name, &entity).await,
            Err(e) => self.save_failed(e),
        }
    }

    pub async fn upsert_item(&self, item: &R, mode: UpdateMode) -> OperationResult {
        self.ensure_before_write().await;
        match self.save(item) {
            Ok(entity) => self.accessor.upsert_item(&self.name, &entity, mode).await,
            Err(e) => self.save_failed(e),
        }
    }

    pub async fn delete_item(&self, keys: &EntityKeys) -> OperationResult {
        self.accessor
            .delete_item(&self.name, &keys.partition_key, &keys.row_key)
            .await
    }

    pub async fn delete_item_by_key(&self, param: &P) -> OperationResult {
        let keys = self.get_keys(param);
        self.delete_item(&keys).await
    }

    /// The write that follows reports its own failure; this only leaves a trace.
    async fn ensure_before_write(&self) {
        let ensured = self.ensure().await;
        if !ensured.success {
            warn!(
                "{}: ensure before write failed: {}",
                self.name,
                ensured.error_code.as_deref().unwrap_or("no error code")
            );
        }
    }

    fn save(&self, item: &R) -> TablesResult<Entity> {
        let limit = self.accessor.column_length_limit();
        debug!("{}: saving row (column limit {})", self.name, limit);
        self.transform.save_with_limit(item, limit)
    }

    fn save_failed(&self, e: TablesError) -> OperationResult {
        warn!("{}: could not save row: {}", self.name, e);
        OperationResult::failed(Some(error_codes::COULD_NOT_SAVE_ITEM.into()))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
