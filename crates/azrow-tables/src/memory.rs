//! In-process [`RemoteStore`] with the table service's status codes and
//! error vocabulary. Used by tests and for running without an account.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use log::debug;
use tokio::sync::RwLock;

use crate::eval;
use crate::overflow::utf16_len;
use crate::store::{is_valid_key, is_valid_table_name, RemoteStore};
use crate::types::{
    error_codes, Entity, EntityValue, RawResponse, TableItem, TablesError, TablesResult,
    UpdateMode,
};

/// Default cap on string column length, in UTF-16 code units.
pub const MAX_STRING_UNITS: usize = 32_000;

type Rows = BTreeMap<(String, String), Entity>;

pub struct MemoryTableStore {
    tables: RwLock<BTreeMap<String, Rows>>,
    max_string_units: usize,
}

impl Default for MemoryTableStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(BTreeMap::new()),
            max_string_units: MAX_STRING_UNITS,
        }
    }

    /// Override the per-column string limit.
    pub fn with_max_string_units(mut self, max: usize) -> Self {
        self.max_string_units = max;
        self
    }

    pub async fn table_count(&self) -> usize {
        self.tables.read().await.len()
    }

    pub async fn row_count(&self, table: &str) -> Option<usize> {
        self.tables.read().await.get(table).map(BTreeMap::len)
    }

    fn validate_entity(&self, entity: &Entity) -> Option<RawResponse> {
        if !is_valid_key(&entity.partition_key) || !is_valid_key(&entity.row_key) {
            return Some(RawResponse::error(
                400,
                error_codes::OUT_OF_RANGE_INPUT,
                "One of the request inputs is out of range.",
            ));
        }
        let too_large = entity.properties.values().any(|v| match v {
            EntityValue::String(s) => utf16_len(s) > self.max_string_units,
            _ => false,
        });
        if too_large {
            return Some(RawResponse::error(
                400,
                error_codes::PROPERTY_VALUE_TOO_LARGE,
                "The property value exceeds the maximum allowed size (64KB).",
            ));
        }
        None
    }

    async fn snapshot(&self, table: &str, filter: Option<&str>) -> TablesResult<Vec<Entity>> {
        let expr = compile_filter(filter)?;
        let tables = self.tables.read().await;
        let rows = tables.get(table).ok_or_else(|| TablesError::Store {
            status: 404,
            code: error_codes::TABLE_NOT_FOUND.into(),
            message: "The table specified does not exist.".into(),
        })?;
        Ok(rows
            .values()
            .filter(|e| expr.as_ref().map_or(true, |x| eval::matches(x, e)))
            .cloned()
            .collect())
    }

    async fn table_snapshot(&self, filter: Option<&str>) -> TablesResult<Vec<TableItem>> {
        let expr = compile_filter(filter)?;
        let tables = self.tables.read().await;
        Ok(tables
            .keys()
            .filter(|name| {
                expr.as_ref().map_or(true, |x| {
                    let row = Entity::new("", "").with("TableName", name.as_str());
                    eval::matches(x, &row)
                })
            })
            .map(|name| TableItem { name: name.clone() })
            .collect())
    }
}

fn compile_filter(filter: Option<&str>) -> TablesResult<Option<eval::Expr>> {
    match filter.filter(|f| !f.trim().is_empty()) {
        None => Ok(None),
        Some(f) => eval::parse(f).map(Some).map_err(|e| TablesError::Store {
            status: 400,
            code: error_codes::INVALID_INPUT.into(),
            message: e.to_string(),
        }),
    }
}

#[async_trait]
impl RemoteStore for MemoryTableStore {
    async fn create_table(&self, table: &str) -> TablesResult<RawResponse> {
        debug!("memory create_table({})", table);
        if !is_valid_table_name(table) {
            // the service answers invalid names without an error code
            return Ok(RawResponse::status(400));
        }
        let mut tables = self.tables.write().await;
        if tables.contains_key(table) {
            return Ok(RawResponse::error(
                409,
                error_codes::TABLE_ALREADY_EXISTS,
                "The table specified already exists.",
            ));
        }
        tables.insert(table.to_string(), Rows::new());
        Ok(RawResponse::status(201))
    }

    async fn delete_table(&self, table: &str) -> TablesResult<RawResponse> {
        debug!("memory delete_table({})", table);
        match self.tables.write().await.remove(table) {
            Some(_) => Ok(RawResponse::status(204)),
            None => Ok(RawResponse::error(
                404,
                error_codes::RESOURCE_NOT_FOUND,
                "The specified resource does not exist.",
            )),
        }
    }

    fn list_tables(&self, filter: Option<String>) -> BoxStream<'_, TablesResult<TableItem>> {
        stream::once(async move { self.table_snapshot(filter.as_deref()).await })
            .map_ok(|items| stream::iter(items.into_iter().map(Ok)))
            .try_flatten()
            .boxed()
    }

    async fn create_entity(&self, table: &str, entity: &Entity) -> TablesResult<RawResponse> {
        debug!(
            "memory create_entity({}, {}/{})",
            table, entity.partition_key, entity.row_key
        );
        if let Some(invalid) = self.validate_entity(entity) {
            return Ok(invalid);
        }
        let mut tables = self.tables.write().await;
        let Some(rows) = tables.get_mut(table) else {
            return Ok(RawResponse::error(
                404,
                error_codes::TABLE_NOT_FOUND,
                "The table specified does not exist.",
            ));
        };
        let key = (entity.partition_key.clone(), entity.row_key.clone());
        if rows.contains_key(&key) {
            return Ok(RawResponse::error(
                409,
                error_codes::ENTITY_ALREADY_EXISTS,
                "The specified entity already exists.",
            ));
        }
        rows.insert(key, entity.clone());
        Ok(RawResponse::status(204))
    }

    fn list_entities<'a>(
        &'a self,
        table: &'a str,
        filter: Option<String>,
    ) -> BoxStream<'a, TablesResult<Entity>> {
        stream::once(async move { self.snapshot(table, filter.as_deref()).await })
            .map_ok(|rows| stream::iter(rows.into_iter().map(Ok)))
            .try_flatten()
            .boxed()
    }

    async fn delete_entity(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> TablesResult<RawResponse> {
        debug!("memory delete_entity({}, {}/{})", table, partition_key, row_key);
        let mut tables = self.tables.write().await;
        let removed = tables
            .get_mut(table)
            .and_then(|rows| rows.remove(&(partition_key.to_string(), row_key.to_string())));
        match removed {
            Some(_) => Ok(RawResponse::status(204)),
            None => Ok(RawResponse::error(
                404,
                error_codes::RESOURCE_NOT_FOUND,
                "The specified resource does not exist.",
            )),
        }
    }

    async fn upsert_entity(
        &self,
        table: &str,
        entity: &Entity,
        mode: UpdateMode,
    ) -> TablesResult<RawResponse> {
        debug!(
            "memory upsert_entity({}, {}/{}, {:?})",
            table, entity.partition_key, entity.row_key, mode
        );
        if let Some(invalid) = self.validate_entity(entity) {
            return Ok(invalid);
        }
        let mut tables = self.tables.write().await;
        let Some(rows) = tables.get_mut(table) else {
            return Ok(RawResponse::error(
                404,
                error_codes::TABLE_NOT_FOUND,
                "The table specified does not exist.",
            ));
        };
        let key = (entity.partition_key.clone(), entity.row_key.clone());
        if mode == UpdateMode::Merge {
            if let Some(existing) = rows.get_mut(&key) {
                for (name, value) in &entity.properties {
                    existing.set(name.clone(), value.clone());
                }
                return Ok(RawResponse::status(204));
            }
        }
        rows.insert(key, entity.clone());
        Ok(RawResponse::status(204))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
