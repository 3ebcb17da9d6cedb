//! Ledgerline Core - Records, Errors and Pure Policies
//!
//! Data types shared by every Ledgerline crate plus the two pure policies of
//! the data-access layer: reconciliation of remote and local records, and
//! status normalization. This crate performs no I/O.

pub mod entity;
pub mod error;
pub mod reconcile;
pub mod record;
pub mod status;

pub use entity::{Association, Employee, Entity, EntityType, EntityTypeParseError, PayrollRecord};
pub use error::{AccessDenial, ApiError, ApiResult, DisplayError, ErrorKind, Locale};
pub use reconcile::{local_only, merge};
pub use record::{
    apply_patch, is_local_id, new_local_id, synthesize_local, to_object, DynamicRecord, Identified,
    RecordError, LOCAL_ID_PREFIX,
};
pub use status::{to_backend_status, BackendStatus, UI_STATUS_TABLE};

/// Timestamp type using UTC timezone.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
