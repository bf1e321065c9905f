//! Inspection records.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use fieldbook_common::{EntityId, Timestamp};

/// Progress of an inspection visit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InspectionStatus {
    #[default]
    Planned,
    InProgress,
    Completed,
}

/// A site visit within a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inspection {
    pub id: EntityId,
    pub project_id: EntityId,
    pub inspector: String,
    #[serde(default)]
    pub scheduled_for: Option<NaiveDate>,
    #[serde(default)]
    pub status: InspectionStatus,
    #[serde(default)]
    pub notes: String,
    pub updated_at: Timestamp,
    #[serde(default)]
    pub deleted_at: Option<Timestamp>,
}

impl Inspection {
    /// Create a new, not yet stamped inspection.
    pub fn new(project_id: EntityId, inspector: impl Into<String>) -> Self {
        Self {
            id: EntityId::generate(),
            project_id,
            inspector: inspector.into(),
            scheduled_for: None,
            status: InspectionStatus::default(),
            notes: String::new(),
            updated_at: Timestamp::ZERO,
            deleted_at: None,
        }
    }
}

crate::impl_entity!(Inspection, "inspections", parent = "projects", project_id);
