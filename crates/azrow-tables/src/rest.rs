//! [`RemoteStore`] over the Azure Table service REST API.
//!
//! Handles Shared Key Lite signing (or SAS), transient-error retries with
//! exponential backoff, continuation-token paging and the JSON entity wire
//! format with `odata.type` annotations.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use hmac::{Hmac, Mac};
use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, Response};
use serde::Deserialize;
use serde_json::{Map, Number, Value};
use sha2::Sha256;
use url::Url;

use crate::config::{ConnectionString, StorageCredential};
use crate::store::RemoteStore;
use crate::types::{
    Entity, EntityValue, ODataError, RawResponse, TableItem, TablesError, TablesResult,
    UpdateMode,
};

const API_VERSION: &str = "2019-02-02";
const DATA_SERVICE_VERSION: &str = "3.0;NetFx";
const NO_METADATA: &str = "application/json;odata=nometadata";
const MINIMAL_METADATA: &str = "application/json;odata=minimalmetadata";

/// Maximum retries for transient / rate-limit errors.
const MAX_RETRIES: u32 = 3;
/// Base delay between retries (doubled each attempt).
const BASE_DELAY_MS: u64 = 500;

const EDM_TYPE_SUFFIX: &str = "@odata.type";

#[derive(Debug, Deserialize)]
struct ODataList<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
}

/// Continuation state for a paged listing.
#[derive(Debug, Clone, Default)]
struct Continuation {
    params: Vec<(&'static str, String)>,
}

pub struct RestTableStore {
    http: Client,
    connection: ConnectionString,
}

impl RestTableStore {
    pub fn new(connection: ConnectionString, timeout: Duration) -> TablesResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TablesError::Transport(format!("HTTP client: {e}")))?;
        Ok(Self { http, connection })
    }

    pub fn connection(&self) -> &ConnectionString {
        &self.connection
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Endpoint URL with `segment` appended as one path segment.
    fn url(&self, segment: &str) -> TablesResult<Url> {
        let mut url = Url::parse(&self.connection.table_endpoint)
            .map_err(|e| TablesError::Configuration(format!("table endpoint: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| TablesError::Configuration("table endpoint cannot be a base URL".into()))?
            .pop_if_empty()
            .push(segment);
        if let StorageCredential::Sas(sas) = &self.connection.credential {
            let merged = match url.query() {
                Some(q) if !q.is_empty() => format!("{q}&{sas}"),
                _ => sas.clone(),
            };
            url.set_query(Some(&merged));
        }
        Ok(url)
    }

    fn entity_url(&self, table: &str, partition_key: &str, row_key: &str) -> TablesResult<Url> {
        self.url(&format!(
            "{}(PartitionKey='{}',RowKey='{}')",
            table,
            escape_key(partition_key),
            escape_key(row_key)
        ))
    }

    // ── Auth header builder ──────────────────────────────────────────

    fn headers(&self, url: &Url, accept: &str) -> TablesResult<HeaderMap> {
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, header_value(accept)?);
        headers.insert("x-ms-version", HeaderValue::from_static(API_VERSION));
        headers.insert("dataserviceversion", HeaderValue::from_static(DATA_SERVICE_VERSION));
        headers.insert("maxdataserviceversion", HeaderValue::from_static(DATA_SERVICE_VERSION));
        headers.insert("x-ms-date", header_value(&date)?);

        if let StorageCredential::SharedKey {
            account_name,
            account_key,
        } = &self.connection.credential
        {
            let signature = sign_shared_key_lite(account_name, account_key, &date, url.path())?;
            headers.insert(
                AUTHORIZATION,
                header_value(&format!("SharedKeyLite {account_name}:{signature}"))?,
            );
        }
        Ok(headers)
    }

    // ── Core request ─────────────────────────────────────────────────

    async fn send(
        &self,
        method: Method,
        url: Url,
        accept: &str,
        body: Option<&Value>,
        extra: &[(&'static str, &'static str)],
    ) -> TablesResult<Response> {
        for attempt in 0..=MAX_RETRIES {
            let mut headers = self.headers(&url, accept)?;
            for &(name, value) in extra {
                headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
            }

            let mut req = self.http.request(method.clone(), url.clone()).headers(headers);
            if let Some(body) = body {
                req = req.header(CONTENT_TYPE, "application/json").json(body);
            }
            debug!("Table {} {}", method, url.path());
            let resp = req.send().await?;

            let status = resp.status().as_u16();
            if should_retry(&method, status) && attempt < MAX_RETRIES {
                let delay = BASE_DELAY_MS * 2u64.pow(attempt);
                warn!("Table {} {} → {} – retrying in {}ms", method, url.path(), status, delay);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                continue;
            }
            return Ok(resp);
        }

        Err(TablesError::Transport("Max retries exceeded".into()))
    }

    async fn execute(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
        extra: &[(&'static str, &'static str)],
    ) -> TablesResult<RawResponse> {
        let resp = self.send(method, url, NO_METADATA, body, extra).await?;
        Ok(raw_response(resp).await)
    }

    // ── Paging ───────────────────────────────────────────────────────

    async fn fetch_page(
        &self,
        mut url: Url,
        filter: Option<&str>,
        continuation: &Continuation,
        next_headers: &[(&'static str, &'static str)],
    ) -> TablesResult<(Vec<Map<String, Value>>, Option<Continuation>)> {
        {
            let mut query = url.query_pairs_mut();
            if let Some(f) = filter {
                query.append_pair("$filter", f);
            }
            for (k, v) in &continuation.params {
                query.append_pair(k, v);
            }
        }

        let resp = self.send(Method::GET, url, MINIMAL_METADATA, None, &[]).await?;
        let status = resp.status().as_u16();
        if status >= 400 {
            let raw = raw_response(resp).await;
            return Err(TablesError::store(raw.status, raw.error.as_ref()));
        }

        let params: Vec<(&'static str, String)> = next_headers
            .iter()
            .filter_map(|(header, param)| {
                resp.headers()
                    .get(*header)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| (*param, v.to_string()))
            })
            .collect();
        let next = (!params.is_empty()).then_some(Continuation { params });

        let page: ODataList<Map<String, Value>> = resp.json().await?;
        Ok((page.value, next))
    }

    fn paged<'a>(
        &'a self,
        url: TablesResult<Url>,
        filter: Option<String>,
        next_headers: &'static [(&'static str, &'static str)],
    ) -> BoxStream<'a, TablesResult<Map<String, Value>>> {
        stream::try_unfold(Some(Continuation::default()), move |state| {
            let url = url.as_ref().map(Clone::clone).map_err(|e| TablesError::Configuration(e.to_string()));
            let filter = filter.clone();
            async move {
                let Some(token) = state else {
                    return Ok::<_, TablesError>(None);
                };
                let (rows, next) = self.fetch_page(url?, filter.as_deref(), &token, next_headers).await?;
                Ok(Some((rows, next)))
            }
        })
        .map_ok(|rows| stream::iter(rows.into_iter().map(Ok)))
        .try_flatten()
        .boxed()
    }
}

const TABLE_CONTINUATION: &[(&str, &str)] = &[("x-ms-continuation-NextTableName", "NextTableName")];
const ENTITY_CONTINUATION: &[(&str, &str)] = &[
    ("x-ms-continuation-NextPartitionKey", "NextPartitionKey"),
    ("x-ms-continuation-NextRowKey", "NextRowKey"),
];

#[async_trait]
impl RemoteStore for RestTableStore {
    async fn create_table(&self, table: &str) -> TablesResult<RawResponse> {
        let url = self.url("Tables")?;
        let body = serde_json::json!({ "TableName": table });
        self.execute(Method::POST, url, Some(&body), &[("prefer", "return-no-content")])
            .await
    }

    async fn delete_table(&self, table: &str) -> TablesResult<RawResponse> {
        let url = self.url(&format!("Tables('{}')", escape_key(table)))?;
        self.execute(Method::DELETE, url, None, &[]).await
    }

    fn list_tables(&self, filter: Option<String>) -> BoxStream<'_, TablesResult<TableItem>> {
        self.paged(self.url("Tables"), filter, TABLE_CONTINUATION)
            .and_then(|row| async move {
                serde_json::from_value::<TableItem>(Value::Object(row)).map_err(TablesError::from)
            })
            .boxed()
    }

    async fn create_entity(&self, table: &str, entity: &Entity) -> TablesResult<RawResponse> {
        let url = self.url(table)?;
        let body = Value::Object(entity_to_json(entity));
        self.execute(Method::POST, url, Some(&body), &[("prefer", "return-no-content")])
            .await
    }

    fn list_entities<'a>(
        &'a self,
        table: &'a str,
        filter: Option<String>,
    ) -> BoxStream<'a, TablesResult<Entity>> {
        self.paged(self.url(&format!("{table}()")), filter, ENTITY_CONTINUATION)
            .and_then(|row| async move { entity_from_json(&row) })
            .boxed()
    }

    async fn delete_entity(
        &self,
        table: &str,
        partition_key: &str,
        row_key: &str,
    ) -> TablesResult<RawResponse> {
        let url = self.entity_url(table, partition_key, row_key)?;
        self.execute(Method::DELETE, url, None, &[("if-match", "*")]).await
    }

    async fn upsert_entity(
        &self,
        table: &str,
        entity: &Entity,
        mode: UpdateMode,
    ) -> TablesResult<RawResponse> {
        let url = self.entity_url(table, &entity.partition_key, &entity.row_key)?;
        let method = match mode {
            UpdateMode::Replace => Method::PUT,
            UpdateMode::Merge => Method::from_bytes(b"MERGE")
                .map_err(|e| TablesError::Transport(format!("MERGE method: {e}")))?,
        };
        let body = Value::Object(entity_to_json(entity));
        self.execute(method, url, Some(&body), &[]).await
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// POST creates are not idempotent: a 500 or 504 may arrive after the row
/// was committed, so they are retried only on statuses that mean the
/// request was turned away.
fn should_retry(method: &Method, status: u16) -> bool {
    if *method == Method::POST {
        matches!(status, 429 | 503)
    } else {
        matches!(status, 429 | 500 | 502 | 503 | 504)
    }
}

fn header_value(v: &str) -> TablesResult<HeaderValue> {
    HeaderValue::from_str(v).map_err(|e| TablesError::Transport(format!("Header value error: {e}")))
}

fn escape_key(key: &str) -> String {
    key.replace('\'', "''")
}

async fn raw_response(resp: Response) -> RawResponse {
    let status = resp.status().as_u16();
    if status < 400 {
        return RawResponse::status(status);
    }
    let body = resp.text().await.unwrap_or_default();
    RawResponse {
        status,
        error: ODataError::from_body(&body),
    }
}

/// `Base64(HMAC-SHA256(key, date + "\n" + "/" + account + path))`.
pub fn sign_shared_key_lite(
    account_name: &str,
    account_key: &str,
    date: &str,
    path: &str,
) -> TablesResult<String> {
    let key = STANDARD
        .decode(account_key)
        .map_err(|e| TablesError::ConnectionString(format!("AccountKey is not base64: {e}")))?;
    let mut mac = Hmac::<Sha256>::new_from_slice(&key)
        .map_err(|e| TablesError::ConnectionString(format!("AccountKey: {e}")))?;
    let string_to_sign = format!("{date}\n/{account_name}{path}");
    mac.update(string_to_sign.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

// ── Entity wire format ──────────────────────────────────────────────

/// Serialize an entity, annotating the types JSON cannot carry on its own.
pub fn entity_to_json(entity: &Entity) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("PartitionKey".into(), Value::String(entity.partition_key.clone()));
    map.insert("RowKey".into(), Value::String(entity.row_key.clone()));

    for (name, value) in &entity.properties {
        let (json, edm) = match value {
            EntityValue::String(s) => (Value::String(s.clone()), None),
            EntityValue::Bool(b) => (Value::Bool(*b), None),
            EntityValue::Int32(n) => (Value::Number((*n).into()), None),
            EntityValue::Int64(n) => (Value::String(n.to_string()), Some("Edm.Int64")),
            EntityValue::Double(n) => match Number::from_f64(*n) {
                Some(num) => (Value::Number(num), Some("Edm.Double")),
                None => (Value::String(special_double(*n).into()), Some("Edm.Double")),
            },
            EntityValue::DateTime(d) => (
                Value::String(d.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
                Some("Edm.DateTime"),
            ),
        };
        if let Some(edm) = edm {
            map.insert(format!("{name}{EDM_TYPE_SUFFIX}"), Value::String(edm.into()));
        }
        map.insert(name.clone(), json);
    }
    map
}

fn special_double(n: f64) -> &'static str {
    if n.is_nan() {
        "NaN"
    } else if n.is_sign_positive() {
        "Infinity"
    } else {
        "-Infinity"
    }
}

/// Parse a row returned with `odata=minimalmetadata` (or `nometadata`).
pub fn entity_from_json(map: &Map<String, Value>) -> TablesResult<Entity> {
    let key = |name: &str| {
        map.get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| TablesError::Serialization(format!("row is missing {name}")))
    };
    let mut entity = Entity::new(key("PartitionKey")?, key("RowKey")?);

    for (name, value) in map {
        if name == "PartitionKey"
            || name == "RowKey"
            || name.starts_with("odata.")
            || name.ends_with(EDM_TYPE_SUFFIX)
        {
            continue;
        }
        let edm = map
            .get(&format!("{name}{EDM_TYPE_SUFFIX}"))
            .and_then(Value::as_str);
        if let Some(v) = decode_value(name, value, edm)? {
            entity.set(name.clone(), v);
        }
    }
    Ok(entity)
}

fn decode_value(name: &str, value: &Value, edm: Option<&str>) -> TablesResult<Option<EntityValue>> {
    let bad = |what: &str| TablesError::Serialization(format!("column {name}: invalid {what}"));
    let decoded = match (value, edm) {
        (Value::Null, _) => return Ok(None),
        (Value::String(s), Some("Edm.DateTime")) => DateTime::parse_from_rfc3339(s)
            .map(|d| EntityValue::DateTime(d.with_timezone(&Utc)))
            .map_err(|_| bad("Edm.DateTime"))?,
        (Value::String(s), Some("Edm.Int64")) => {
            EntityValue::Int64(s.parse().map_err(|_| bad("Edm.Int64"))?)
        }
        (Value::String(s), Some("Edm.Double")) => match s.as_str() {
            "NaN" => EntityValue::Double(f64::NAN),
            "Infinity" => EntityValue::Double(f64::INFINITY),
            "-Infinity" => EntityValue::Double(f64::NEG_INFINITY),
            other => EntityValue::Double(other.parse().map_err(|_| bad("Edm.Double"))?),
        },
        (Value::String(s), _) => EntityValue::String(s.clone()),
        (Value::Bool(b), _) => EntityValue::Bool(*b),
        (Value::Number(n), Some("Edm.Double")) => EntityValue::Double(n.as_f64().ok_or_else(|| bad("number"))?),
        (Value::Number(n), _) => match n.as_i64() {
            Some(i) => match i32::try_from(i) {
                Ok(small) => EntityValue::Int32(small),
                Err(_) => EntityValue::Int64(i),
            },
            None => EntityValue::Double(n.as_f64().ok_or_else(|| bad("number"))?),
        },
        (Value::Array(_) | Value::Object(_), _) => return Err(bad("nested value")),
    };
    Ok(Some(decoded))
}

// ─── Tests ──────────────────────────────────────────────────────────
