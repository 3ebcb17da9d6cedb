//! Status normalization onto the backend's accepted vocabulary.
//!
//! The payroll table only accepts two status values (enforced by a check
//! constraint). The UI works with a richer vocabulary, so every write goes
//! through [`to_backend_status`], which is total: unknown or missing labels
//! map to the designated default instead of failing.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status values accepted by the backend schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "Option<String>")]
pub enum BackendStatus {
    /// Designated default
    #[default]
    Draft,
    Approved,
}

impl BackendStatus {
    /// The complete accepted set.
    pub const ACCEPTED: [BackendStatus; 2] = [BackendStatus::Draft, BackendStatus::Approved];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendStatus::Draft => "draft",
            BackendStatus::Approved => "approved",
        }
    }
}

impl fmt::Display for BackendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Option<String>> for BackendStatus {
    fn from(label: Option<String>) -> Self {
        to_backend_status(label.as_deref())
    }
}

/// Known UI labels and the backend value each one stores as.
pub const UI_STATUS_TABLE: &[(&str, BackendStatus)] = &[
    ("draft", BackendStatus::Draft),
    ("new", BackendStatus::Draft),
    ("prepared", BackendStatus::Draft),
    ("in_progress", BackendStatus::Draft),
    ("pending", BackendStatus::Draft),
    ("ready_for_approval", BackendStatus::Draft),
    ("in_review", BackendStatus::Draft),
    ("submitted", BackendStatus::Draft),
    ("rejected", BackendStatus::Draft),
    ("returned", BackendStatus::Draft),
    ("approved", BackendStatus::Approved),
    ("confirmed", BackendStatus::Approved),
    ("paid", BackendStatus::Approved),
    ("exported", BackendStatus::Approved),
    ("closed", BackendStatus::Approved),
    ("locked", BackendStatus::Approved),
    ("archived", BackendStatus::Approved),
];

/// Map any UI status label onto an accepted backend status.
pub fn to_backend_status(ui_status: Option<&str>) -> BackendStatus {
    let Some(label) = ui_status else {
        return BackendStatus::default();
    };
    let canonical = canonical_label(label);
    UI_STATUS_TABLE
        .iter()
        .find(|(known, _)| *known == canonical)
        .map(|(_, status)| *status)
        .unwrap_or_default()
}

fn canonical_label(label: &str) -> String {
    label
        .trim()
        .chars()
        .map(|c| match c {
            '-' | ' ' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}
