//! Project records.

use serde::{Deserialize, Serialize};

use fieldbook_common::{EntityId, Timestamp};

/// A body of work for one client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: EntityId,
    pub client_id: EntityId,
    pub name: String,
    #[serde(default)]
    pub address: Option<String>,
    pub updated_at: Timestamp,
    #[serde(default)]
    pub deleted_at: Option<Timestamp>,
}

impl Project {
    /// Create a new, not yet stamped project.
    pub fn new(client_id: EntityId, name: impl Into<String>) -> Self {
        Self {
            id: EntityId::generate(),
            client_id,
            name: name.into(),
            address: None,
            updated_at: Timestamp::ZERO,
            deleted_at: None,
        }
    }
}

crate::impl_entity!(Project, "projects", parent = "clients", client_id);
