//! Conversions between application rows and stored entities.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Number, Value};

use crate::overflow::{overflow_column_name, restore_overflow, split_overflow};
use crate::types::{Entity, EntityValue, TablesError, TablesResult};

/// Two-way mapping applied on every save and load.
pub trait RowTransform<R>: Send + Sync {
    fn save(&self, parsed: &R) -> TablesResult<Entity>;
    fn load(&self, stored: Entity) -> TablesResult<R>;

    /// Save for a table whose columns hold at most `column_length_limit`
    /// UTF-16 units. Transforms that split long values override this.
    fn save_with_limit(&self, parsed: &R, _column_length_limit: usize) -> TablesResult<Entity> {
        self.save(parsed)
    }
}

/// Rows are stored as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTransform;

impl RowTransform<Entity> for IdentityTransform {
    fn save(&self, parsed: &Entity) -> TablesResult<Entity> {
        Ok(parsed.clone())
    }

    fn load(&self, stored: Entity) -> TablesResult<Entity> {
        Ok(stored)
    }
}

/// Transform built from a pair of closures.
pub struct FnTransform<S, L> {
    save: S,
    load: L,
}

impl<S, L> FnTransform<S, L> {
    pub fn new(save: S, load: L) -> Self {
        Self { save, load }
    }
}

impl<R, S, L> RowTransform<R> for FnTransform<S, L>
where
    S: Fn(&R) -> TablesResult<Entity> + Send + Sync,
    L: Fn(Entity) -> TablesResult<R> + Send + Sync,
{
    fn save(&self, parsed: &R) -> TablesResult<Entity> {
        (self.save)(parsed)
    }

    fn load(&self, stored: Entity) -> TablesResult<R> {
        (self.load)(stored)
    }
}

/// Serde-backed transform for typed rows.
///
/// The row must serialize to a JSON object carrying `partitionKey` and
/// `rowKey` (or `PartitionKey` / `RowKey`). Scalar fields map onto
/// entity values; fields listed in `json_columns` are stored as JSON text.
/// Columns listed in `overflow_columns` are split across suffixed columns
/// once they exceed the length limit. Each saved overflow column is followed
/// by an empty piece so a merge over a previously longer value cannot leave
/// stale pieces behind.
pub struct JsonColumns<T> {
    json_columns: Vec<String>,
    overflow_columns: Vec<String>,
    overflow_limit: Option<usize>,
    _row: PhantomData<fn() -> T>,
}

impl<T> Default for JsonColumns<T> {
    fn default() -> Self {
        Self {
            json_columns: Vec::new(),
            overflow_columns: Vec::new(),
            overflow_limit: None,
            _row: PhantomData,
        }
    }
}

impl<T> JsonColumns<T> {
    pub fn new(json_columns: &[&str]) -> Self {
        Self {
            json_columns: json_columns.iter().map(|c| c.to_string()).collect(),
            ..Default::default()
        }
    }

    /// Split these columns when longer than `limit` UTF-16 units. `None`
    /// uses the table's column length limit.
    pub fn with_overflow(mut self, columns: &[&str], limit: Option<usize>) -> Self {
        self.overflow_columns = columns.iter().map(|c| c.to_string()).collect();
        self.overflow_limit = limit;
        self
    }

    fn is_json(&self, column: &str) -> bool {
        self.json_columns.iter().any(|c| c == column)
    }

    fn to_entity(&self, parsed: &T, limit: Option<usize>) -> TablesResult<Entity>
    where
        T: Serialize,
    {
        let Value::Object(mut map) = serde_json::to_value(parsed)? else {
            return Err(TablesError::Serialization("row must serialize to an object".into()));
        };
        let partition_key = take_key(&mut map, "partitionKey", "PartitionKey")?;
        let row_key = take_key(&mut map, "rowKey", "RowKey")?;

        let mut entity = Entity::new(partition_key, row_key);
        for (name, value) in map {
            if self.is_json(&name) {
                if !value.is_null() {
                    entity.set(name, serde_json::to_string(&value)?);
                }
                continue;
            }
            if let Some(v) = to_entity_value(&name, value)? {
                entity.set(name, v);
            }
        }

        if self.overflow_columns.is_empty() {
            return Ok(entity);
        }
        let mut entity = split_overflow(&entity, &self.overflow_columns, limit);
        for column in &self.overflow_columns {
            terminate_pieces(&mut entity, column);
        }
        Ok(entity)
    }
}

impl<T: Serialize + DeserializeOwned> RowTransform<T> for JsonColumns<T> {
    fn save(&self, parsed: &T) -> TablesResult<Entity> {
        self.to_entity(parsed, self.overflow_limit)
    }

    fn save_with_limit(&self, parsed: &T, column_length_limit: usize) -> TablesResult<Entity> {
        self.to_entity(parsed, self.overflow_limit.or(Some(column_length_limit)))
    }

    fn load(&self, stored: Entity) -> TablesResult<T> {
        let stored = if self.overflow_columns.is_empty() {
            stored
        } else {
            restore_overflow(stored, &self.overflow_columns)
        };

        let mut map = Map::new();
        map.insert("partitionKey".into(), Value::String(stored.partition_key));
        map.insert("rowKey".into(), Value::String(stored.row_key));
        for (name, value) in stored.properties {
            let json = match value {
                EntityValue::String(s) if self.is_json(&name) => serde_json::from_str(&s)?,
                other => from_entity_value(other),
            };
            map.insert(name, json);
        }
        Ok(serde_json::from_value(Value::Object(map))?)
    }
}

/// Write an empty piece after the last one of a string column.
fn terminate_pieces(entity: &mut Entity, column: &str) {
    if entity.get_str(column).is_none() {
        return;
    }
    let mut index = 1;
    while entity.get(&overflow_column_name(column, index)).is_some() {
        index += 1;
    }
    entity.set(overflow_column_name(column, index), "");
}

fn take_key(map: &mut Map<String, Value>, camel: &str, pascal: &str) -> TablesResult<String> {
    let value = map.remove(camel).or_else(|| map.remove(pascal));
    match value {
        Some(Value::String(s)) => Ok(s),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(TablesError::Serialization(format!("row is missing '{camel}'"))),
    }
}

fn to_entity_value(name: &str, value: Value) -> TablesResult<Option<EntityValue>> {
    Ok(match value {
        Value::Null => None,
        Value::Bool(b) => Some(EntityValue::Bool(b)),
        Value::String(s) => Some(EntityValue::String(s)),
        Value::Number(n) => Some(match n.as_i64() {
            Some(i) => match i32::try_from(i) {
                Ok(small) => EntityValue::Int32(small),
                Err(_) => EntityValue::Int64(i),
            },
            None => EntityValue::Double(n.as_f64().unwrap_or(f64::NAN)),
        }),
        Value::Array(_) | Value::Object(_) => {
            return Err(TablesError::Serialization(format!(
                "column '{name}' is structured; declare it as a JSON column"
            )))
        }
    })
}

fn from_entity_value(value: EntityValue) -> Value {
    match value {
        EntityValue::String(s) => Value::String(s),
        EntityValue::Bool(b) => Value::Bool(b),
        EntityValue::Int32(i) => Value::from(i),
        EntityValue::Int64(i) => Value::from(i),
        EntityValue::Double(d) => Number::from_f64(d).map(Value::Number).unwrap_or(Value::Null),
        EntityValue::DateTime(dt) => Value::String(dt.to_rfc3339()),
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Job {
        partition_key: String,
        row_key: String,
        title: String,
        attempts: i64,
        #[serde(default)]
        schedule: Option<Schedule>,
        #[serde(default)]
        notes: Option<String>,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Schedule {
        cron: String,
        days: Vec<u8>,
    }

    fn job() -> Job {
        Job {
            partition_key: "site".into(),
            row_key: "job-1".into(),
            title: "Nightly".into(),
            attempts: 3,
            schedule: Some(Schedule {
                cron: "0 2 * * *".into(),
                days: vec![1, 2, 3],
            }),
            notes: None,
        }
    }

    #[test]
    fn identity_is_passthrough() {
        let e = Entity::new("p", "r").with("x", 1);
        assert_eq!(IdentityTransform.save(&e).unwrap(), e);
        assert_eq!(IdentityTransform.load(e.clone()).unwrap(), e);
    }

    #[test]
    fn json_columns_save_shape() {
        let t = JsonColumns::<Job>::new(&["schedule"]);
        let e = t.save(&job()).unwrap();
        assert_eq!(e.partition_key, "site");
        assert_eq!(e.row_key, "job-1");
        assert_eq!(e.get("attempts"), Some(&EntityValue::Int32(3)));
        assert_eq!(e.get_str("schedule"), Some(r#"{"cron":"0 2 * * *","days":[1,2,3]}"#));
        assert!(e.get("notes").is_none());
        assert!(e.get("partitionKey").is_none());
    }

    #[test]
    fn json_columns_load_back() {
        let t = JsonColumns::<Job>::new(&["schedule"]);
        let stored = t.save(&job()).unwrap();
        assert_eq!(t.load(stored).unwrap(), job());
    }

    #[test]
    fn structured_field_requires_json_column() {
        let t = JsonColumns::<Job>::default();
        assert!(matches!(t.save(&job()), Err(TablesError::Serialization(_))));
    }

    #[test]
    fn overflow_columns_split_and_restore() {
        let t = JsonColumns::<Job>::new(&["schedule"]).with_overflow(&["notes"], Some(4));
        let mut j = job();
        j.notes = Some("abcdefghij".into());
        let stored = t.save(&j).unwrap();
        assert_eq!(stored.get_str("notes"), Some("abcd"));
        assert_eq!(stored.get_str("notes2"), Some("efgh"));
        assert_eq!(stored.get_str("notes3"), Some("ij"));
        assert_eq!(stored.get_str("notes4"), Some(""));
        assert_eq!(t.load(stored).unwrap(), j);
    }

    #[test]
    fn short_overflow_column_clears_next_piece() {
        let t = JsonColumns::<Job>::new(&["schedule"]).with_overflow(&["notes"], Some(4));
        let mut j = job();
        j.notes = Some("ab".into());
        let stored = t.save(&j).unwrap();
        assert_eq!(stored.get_str("notes"), Some("ab"));
        assert_eq!(stored.get_str("notes2"), Some(""));

        j.notes = None;
        assert!(t.save(&j).unwrap().get("notes2").is_none());
    }

    #[test]
    fn table_limit_applies_without_explicit_limit() {
        let t = JsonColumns::<Job>::new(&["schedule"]).with_overflow(&["notes"], None);
        let mut j = job();
        j.notes = Some("abcdef".into());
        let stored = t.save_with_limit(&j, 4).unwrap();
        assert_eq!(stored.get_str("notes"), Some("abcd"));
        assert_eq!(stored.get_str("notes2"), Some("ef"));

        let explicit = JsonColumns::<Job>::new(&["schedule"]).with_overflow(&["notes"], Some(3));
        let stored = explicit.save_with_limit(&j, 4).unwrap();
        assert_eq!(stored.get_str("notes"), Some("abc"));
    }

    #[test]
    fn fn_transform_delegates() {
        let t = FnTransform::new(
            |name: &String| Ok::<_, TablesError>(Entity::new("names", name.clone())),
            |e: Entity| Ok::<_, TablesError>(e.row_key),
        );
        let stored = RowTransform::<String>::save(&t, &"ada".to_string()).unwrap();
        assert_eq!(stored.row_key, "ada");
        let loaded: String = RowTransform::<String>::load(&t, stored).unwrap();
        assert_eq!(loaded, "ada");
    }

    #[test]
    fn bad_json_text_fails_load() {
        let t = JsonColumns::<Job>::new(&["schedule"]);
        let stored = Entity::new("p", "r")
            .with("title", "x")
            .with("attempts", 1)
            .with("schedule", "{not json");
        assert!(t.load(stored).is_err());
    }
}
