//! The remote-store capability the accessor is built on.
//!
//! Mutating calls report the service outcome as a [`RawResponse`]; `Err` is
//! reserved for failures that never produced one (network, decoding).
//! Listings are lazily paged streams.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::types::{Entity, RawResponse, TableItem, TablesResult, UpdateMode};

#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn create_table(&self, table: &str) -> TablesResult<RawResponse>;

    async fn delete_table(&self, table: &str) -> TablesResult<RawResponse>;

    /// List tables, optionally restricted by a native filter expression.
    fn list_tables(&self, filter: Option<String>) -> BoxStream<'_, TablesResult<TableItem>>;

    async fn create_entity(&self, table: &str, entity: &Entity) -> TablesResult<RawResponse>;

    /// List rows, optionally restricted by a native filter expression.
    fn list_entities<'a>(
        &'a self,
        table: &'a str,
        filter: Option<String>,
    ) -> BoxStream<'a, TablesResult<Entity>>;

    async fn delete_entity(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> TablesResult<RawResponse>;

    async fn upsert_entity(
        &self,
        table: &str,
        entity: &Entity,
        mode: UpdateMode,
    ) -> TablesResult<RawResponse>;
}

/// Table names: 3-63 alphanumerics starting with a letter.
pub fn is_valid_table_name(name: &str) -> bool {
    let len = name.chars().count();
    (3..=63).contains(&len)
        && name.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && name.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Key values may not contain `/ \ # ?` or control characters.
pub fn is_valid_key(key: &str) -> bool {
    !key
        .chars()
        .any(|c| matches!(c, '/' | '\\' | '#' | '?') || c.is_control())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names() {
        assert!(is_valid_table_name("TestTable"));
        assert!(is_valid_table_name("abc"));
        assert!(!is_valid_table_name("T2"));
        assert!(!is_valid_table_name("1abc"));
        assert!(!is_valid_table_name("my-table"));
        assert!(!is_valid_table_name(&"a".repeat(64)));
    }

    #[test]
    fn keys() {
        assert!(is_valid_key("0b8612bb|d2e32b93"));
        assert!(!is_valid_key("a/b"));
        assert!(!is_valid_key("a#b"));
        assert!(!is_valid_key("line\nbreak"));
    }
}
