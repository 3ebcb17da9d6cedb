//! Entity types served through the data-access layer.

use crate::record::{deserialize_id, deserialize_optional_id, DynamicRecord, Identified};
use crate::status::{to_backend_status, BackendStatus};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Entity type discriminator; each type has its own fallback partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Association of unit owners (SVJ)
    Association,
    Employee,
    PayrollRecord,
    Document,
}

impl EntityType {
    pub const ALL: [EntityType; 4] = [
        EntityType::Association,
        EntityType::Employee,
        EntityType::PayrollRecord,
        EntityType::Document,
    ];

    /// Remote table backing this entity type.
    pub fn table(&self) -> &'static str {
        match self {
            EntityType::Association => "associations",
            EntityType::Employee => "employees",
            EntityType::PayrollRecord => "payroll_records",
            EntityType::Document => "documents",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Association => "association",
            EntityType::Employee => "employee",
            EntityType::PayrollRecord => "payroll_record",
            EntityType::Document => "document",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error when parsing an invalid entity type string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid entity type: {0}")]
pub struct EntityTypeParseError(pub String);

impl FromStr for EntityType {
    type Err = EntityTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        EntityType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized || t.table() == normalized)
            .ok_or_else(|| EntityTypeParseError(s.to_string()))
    }
}

/// A record type that can flow through repositories, stores and the merge.
pub trait Entity: Identified + Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Get the entity type for this record.
    fn entity_type() -> EntityType;

    /// Rewrite an outgoing payload into the shape the backend accepts.
    fn normalize_payload(_payload: &mut Map<String, Value>) {}
}

// ============================================================================
// CONCRETE ENTITIES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Association {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Columns this client does not model, carried through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Employee {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(
        default,
        deserialize_with = "deserialize_optional_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub association_id: Option<String>,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayrollRecord {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default, deserialize_with = "deserialize_id")]
    pub employee_id: String,
    /// Payroll period, `YYYY-MM`
    #[serde(default)]
    pub period: String,
    #[serde(default)]
    pub status: BackendStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gross_amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Identified for Association {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Identified for Employee {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Identified for PayrollRecord {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Entity for Association {
    fn entity_type() -> EntityType {
        EntityType::Association
    }
}

impl Entity for Employee {
    fn entity_type() -> EntityType {
        EntityType::Employee
    }
}

impl Entity for PayrollRecord {
    fn entity_type() -> EntityType {
        EntityType::PayrollRecord
    }

    fn normalize_payload(payload: &mut Map<String, Value>) {
        if let Some(status) = payload.get_mut("status") {
            let normalized = to_backend_status(status.as_str());
            *status = Value::String(normalized.as_str().to_string());
        }
    }
}

/// Untyped rows are used for document metadata, whose columns vary per upload.
impl Entity for DynamicRecord {
    fn entity_type() -> EntityType {
        EntityType::Document
    }
}
