//! Core types for the table-storage layer: entities, operation results,
//! raw store responses and the crate error.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Error types ─────────────────────────────────────────────────────

/// Errors raised outside the `OperationResult` taxonomy: configuration,
/// transport and (de)serialization failures.
#[derive(Debug, thiserror::Error)]
pub enum TablesError {
    #[error("table storage is not configured: {0}")]
    Configuration(String),
    #[error("invalid connection string: {0}")]
    ConnectionString(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("store error {status} ({code}): {message}")]
    Store {
        status: u16,
        code: String,
        message: String,
    },
}

impl TablesError {
    pub fn store(status: u16, error: Option<&ODataError>) -> Self {
        let (code, message) = match error {
            Some(e) => (e.code.clone(), e.message.value.clone()),
            None => (String::new(), String::new()),
        };
        Self::Store {
            status,
            code,
            message,
        }
    }
}

impl From<reqwest::Error> for TablesError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for TablesError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

pub type TablesResult<T> = Result<T, TablesError>;

/// Error codes reported by the table service that callers commonly match on.
pub mod error_codes {
    pub const TABLE_ALREADY_EXISTS: &str = "TableAlreadyExists";
    pub const ENTITY_ALREADY_EXISTS: &str = "EntityAlreadyExists";
    pub const TABLE_NOT_FOUND: &str = "TableNotFound";
    pub const RESOURCE_NOT_FOUND: &str = "ResourceNotFound";
    pub const PROPERTY_VALUE_TOO_LARGE: &str = "PropertyValueTooLarge";
    pub const OUT_OF_RANGE_INPUT: &str = "OutOfRangeInput";
    pub const INVALID_INPUT: &str = "InvalidInput";
    /// Fallback when the service returns an error status without a code.
    pub const UNKNOWN_ERROR: &str = "Unknown error";
    pub const COULD_NOT_GET_ITEMS: &str = "Could not get items";
    pub const COULD_NOT_LOAD_ITEMS: &str = "Could not load items";
    pub const COULD_NOT_SAVE_ITEM: &str = "Could not save item";
    pub const NOT_FOUND: &str = "Not found";
}

// ─── Raw store responses ─────────────────────────────────────────────

/// `odata.error` payload returned by the table service on failure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ODataError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: ODataErrorMessage,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ODataErrorMessage {
    #[serde(default)]
    pub lang: String,
    #[serde(default)]
    pub value: String,
}

/// Envelope around [`ODataError`]; the service has used both spellings.
#[derive(Debug, Deserialize)]
pub(crate) struct ODataErrorEnvelope {
    #[serde(rename = "odata.error", alias = "odata-error")]
    pub error: ODataError,
}

impl ODataError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: ODataErrorMessage {
                lang: "en-US".into(),
                value: message.into(),
            },
        }
    }

    /// Parse an error body, returning `None` when it is not an OData error.
    pub fn from_body(body: &str) -> Option<Self> {
        serde_json::from_str::<ODataErrorEnvelope>(body)
            .ok()
            .map(|env| env.error)
    }
}

/// Outcome of a single store call as reported by the service.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub error: Option<ODataError>,
}

impl RawResponse {
    pub fn status(status: u16) -> Self {
        Self {
            status,
            error: None,
        }
    }

    pub fn error(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            error: Some(ODataError::new(code, message)),
        }
    }
}

// ─── Entities ────────────────────────────────────────────────────────

/// A scalar column value.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityValue {
    String(String),
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Double(f64),
    DateTime(DateTime<Utc>),
}

impl EntityValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for EntityValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int32(n) => write!(f, "{n}"),
            Self::Int64(n) => write!(f, "{n}"),
            Self::Double(n) => write!(f, "{n}"),
            Self::DateTime(d) => write!(f, "{}", d.to_rfc3339()),
        }
    }
}

impl From<&str> for EntityValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for EntityValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<bool> for EntityValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for EntityValue {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for EntityValue {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f64> for EntityValue {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<DateTime<Utc>> for EntityValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::DateTime(v)
    }
}

/// The identity pair of a row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityKeys {
    pub partition_key: String,
    pub row_key: String,
}

impl EntityKeys {
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
        }
    }
}

/// A stored row: identity pair plus a flat map of scalar columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub partition_key: String,
    pub row_key: String,
    pub properties: BTreeMap<String, EntityValue>,
}

impl Entity {
    pub fn new(partition_key: impl Into<String>, row_key: impl Into<String>) -> Self {
        Self {
            partition_key: partition_key.into(),
            row_key: row_key.into(),
            properties: BTreeMap::new(),
        }
    }

    /// Builder-style column setter.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<EntityValue>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<EntityValue>) {
        self.properties.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&EntityValue> {
        self.properties.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(EntityValue::as_str)
    }

    pub fn remove(&mut self, name: &str) -> Option<EntityValue> {
        self.properties.remove(name)
    }

    pub fn keys(&self) -> EntityKeys {
        EntityKeys::new(self.partition_key.clone(), self.row_key.clone())
    }
}

/// Write mode for upserts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateMode {
    /// Replace the whole row.
    #[default]
    Replace,
    /// Merge the supplied columns into the existing row.
    Merge,
}

/// Minimal table descriptor returned by table listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableItem {
    #[serde(rename = "TableName")]
    pub name: String,
}

// ─── Operation results ───────────────────────────────────────────────

/// Result of an accessor operation. `error_code` is set on failure and,
/// for a few idempotent operations, on soft successes.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult<T = ()> {
    pub success: bool,
    pub result: Option<T>,
    pub error_code: Option<String>,
}

impl<T> OperationResult<T> {
    pub fn ok() -> Self {
        Self {
            success: true,
            result: None,
            error_code: None,
        }
    }

    pub fn ok_with(result: T) -> Self {
        Self {
            success: true,
            result: Some(result),
            error_code: None,
        }
    }

    pub fn failed(error_code: Option<String>) -> Self {
        Self {
            success: false,
            result: None,
            error_code,
        }
    }

    pub fn with_result(mut self, result: T) -> Self {
        self.result = Some(result);
        self
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> OperationResult<U> {
        OperationResult {
            success: self.success,
            result: self.result.map(f),
            error_code: self.error_code,
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn odata_error_from_body() {
        let body = r#"{"odata.error":{"code":"TableAlreadyExists","message":{"lang":"en-US","value":"The table specified already exists."}}}"#;
        let e = ODataError::from_body(body).unwrap();
        assert_eq!(e.code, "TableAlreadyExists");
        assert_eq!(e.message.lang, "en-US");
    }

    #[test]
    fn odata_error_dash_spelling() {
        let body = r#"{"odata-error":{"code":"TableNotFound","message":{"value":"nope"}}}"#;
        let e = ODataError::from_body(body).unwrap();
        assert_eq!(e.code, "TableNotFound");
        assert_eq!(e.message.value, "nope");
    }

    #[test]
    fn odata_error_garbage_body() {
        assert!(ODataError::from_body("").is_none());
        assert!(ODataError::from_body("<html/>").is_none());
    }

    #[test]
    fn entity_builder() {
        let e = Entity::new("PK1", "R1").with("name", "x").with("count", 3);
        assert_eq!(e.get_str("name"), Some("x"));
        assert_eq!(e.get("count"), Some(&EntityValue::Int32(3)));
        assert_eq!(e.keys(), EntityKeys::new("PK1", "R1"));
    }

    #[test]
    fn operation_result_map() {
        let r: OperationResult<Vec<u8>> = OperationResult::ok_with(vec![1, 2]);
        let mapped = r.map(|v| v.len());
        assert!(mapped.success);
        assert_eq!(mapped.result, Some(2));
    }

    #[test]
    fn store_error_display() {
        let e = TablesError::store(404, Some(&ODataError::new("TableNotFound", "gone")));
        assert!(e.to_string().contains("TableNotFound"));
    }

    #[test]
    fn update_mode_default_is_replace() {
        assert_eq!(UpdateMode::default(), UpdateMode::Replace);
    }
}
