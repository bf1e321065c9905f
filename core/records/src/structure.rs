//! Structure records.

use serde::{Deserialize, Serialize};

use fieldbook_common::{EntityId, Timestamp};

/// A physical asset inspected within a project (bridge, building, tank).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Structure {
    pub id: EntityId,
    pub project_id: EntityId,
    pub name: String,
    #[serde(default)]
    pub kind: Option<String>,
    pub updated_at: Timestamp,
    #[serde(default)]
    pub deleted_at: Option<Timestamp>,
}

impl Structure {
    /// Create a new, not yet stamped structure.
    pub fn new(project_id: EntityId, name: impl Into<String>) -> Self {
        Self {
            id: EntityId::generate(),
            project_id,
            name: name.into(),
            kind: None,
            updated_at: Timestamp::ZERO,
            deleted_at: None,
        }
    }
}

crate::impl_entity!(Structure, "structures", parent = "projects", project_id);
