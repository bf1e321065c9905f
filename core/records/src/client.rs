//! Client records.

use serde::{Deserialize, Serialize};

use fieldbook_common::{EntityId, Timestamp};

/// A customer commissioning inspections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: EntityId,
    pub name: String,
    #[serde(default)]
    pub contact_email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    pub updated_at: Timestamp,
    #[serde(default)]
    pub deleted_at: Option<Timestamp>,
}

impl Client {
    /// Create a new, not yet stamped client.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: EntityId::generate(),
            name: name.into(),
            contact_email: None,
            phone: None,
            updated_at: Timestamp::ZERO,
            deleted_at: None,
        }
    }

    /// Set the contact email.
    pub fn with_contact_email(mut self, email: impl Into<String>) -> Self {
        self.contact_email = Some(email.into());
        self
    }
}

crate::impl_entity!(Client, "clients");
