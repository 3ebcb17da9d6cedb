//! Record identity and local record synthesis.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{de, de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Prefix carried by every client-generated identity.
///
/// Remote identities never carry it, which keeps local and remote id spaces
/// disjoint.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Anything with a stable identity used for deduplication.
pub trait Identified {
    fn id(&self) -> &str;
}

/// Generate a new client-side identity (UUIDv7, timestamp-sortable).
pub fn new_local_id() -> String {
    format!("{}{}", LOCAL_ID_PREFIX, Uuid::now_v7())
}

/// Whether an identity was generated on this client.
pub fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("Record payload must be a JSON object")]
    NotAnObject,
    #[error("Record has no usable id field")]
    MissingId,
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Turn a proposed payload into a record authored locally.
///
/// Any `id` in the payload is replaced by a fresh local identity; `created_at`
/// is stamped with `now` unless the payload already carries one.
pub fn synthesize_local<T, P>(payload: &P, now: DateTime<Utc>) -> Result<T, RecordError>
where
    T: DeserializeOwned,
    P: Serialize + ?Sized,
{
    let mut fields = to_object(payload)?;
    fields.insert("id".to_string(), Value::String(new_local_id()));
    fields
        .entry("created_at")
        .or_insert_with(|| Value::String(now.to_rfc3339_opts(SecondsFormat::Millis, true)));
    Ok(serde_json::from_value(Value::Object(fields))?)
}

/// Shallow-merge `patch` into `record`, keeping the record's identity.
pub fn apply_patch<T, P>(record: &T, patch: &P, now: DateTime<Utc>) -> Result<T, RecordError>
where
    T: Identified + Serialize + DeserializeOwned,
    P: Serialize + ?Sized,
{
    let mut fields = to_object(record)?;
    for (key, value) in to_object(patch)? {
        if key != "id" {
            fields.insert(key, value);
        }
    }
    fields.insert(
        "updated_at".to_string(),
        Value::String(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    Ok(serde_json::from_value(Value::Object(fields))?)
}

/// Serialize anything into a JSON object.
pub fn to_object<P: Serialize + ?Sized>(payload: &P) -> Result<Map<String, Value>, RecordError> {
    match serde_json::to_value(payload)? {
        Value::Object(map) => Ok(map),
        _ => Err(RecordError::NotAnObject),
    }
}

// ============================================================================
// DYNAMIC RECORD
// ============================================================================

/// A loosely-shaped row: arbitrary columns plus a normalized identity.
///
/// Numeric ids are accepted and normalized to their decimal string form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Map<String, Value>", into = "Map<String, Value>")]
pub struct DynamicRecord {
    id: String,
    fields: Map<String, Value>,
}

impl DynamicRecord {
    pub fn from_map(fields: Map<String, Value>) -> Result<Self, RecordError> {
        let id = fields
            .get("id")
            .and_then(id_text)
            .filter(|id| !id.is_empty())
            .ok_or(RecordError::MissingId)?;
        Ok(Self { id, fields })
    }

    pub fn from_value(value: Value) -> Result<Self, RecordError> {
        match value {
            Value::Object(map) => Self::from_map(map),
            _ => Err(RecordError::NotAnObject),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

impl Identified for DynamicRecord {
    fn id(&self) -> &str {
        &self.id
    }
}

impl TryFrom<Map<String, Value>> for DynamicRecord {
    type Error = RecordError;

    fn try_from(fields: Map<String, Value>) -> Result<Self, Self::Error> {
        Self::from_map(fields)
    }
}

impl From<DynamicRecord> for Map<String, Value> {
    fn from(record: DynamicRecord) -> Self {
        record.fields
    }
}

fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Deserialize an identifier column sent either as a string or as a number.
pub fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    id_text(&value)
        .ok_or_else(|| de::Error::custom(format!("expected a string or numeric id, found {}", value)))
}

/// Like [`deserialize_id`] for nullable reference columns.
pub fn deserialize_optional_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        value => id_text(&value).map(Some).ok_or_else(|| {
            de::Error::custom(format!("expected a string or numeric id, found {}", value))
        }),
    }
}
