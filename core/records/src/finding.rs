//! Finding records.

use serde::{Deserialize, Serialize};

use fieldbook_common::{EntityId, Timestamp};

/// How urgent a finding is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

/// An observation recorded against a structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    pub id: EntityId,
    pub structure_id: EntityId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub severity: Severity,
    pub updated_at: Timestamp,
    #[serde(default)]
    pub deleted_at: Option<Timestamp>,
}

impl Finding {
    /// Create a new, not yet stamped finding.
    pub fn new(structure_id: EntityId, title: impl Into<String>) -> Self {
        Self {
            id: EntityId::generate(),
            structure_id,
            title: title.into(),
            description: String::new(),
            severity: Severity::default(),
            updated_at: Timestamp::ZERO,
            deleted_at: None,
        }
    }

    /// Set the severity.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

crate::impl_entity!(Finding, "findings", parent = "structures", structure_id);

#[cfg(test)]
mod tests {
    use super::*;
    use fieldbook_common::Entity;

    #[test]
    fn test_parent_is_structure() {
        let structure_id = EntityId::from("s1");
        let finding = Finding::new(structure_id.clone(), "Spalling").with_severity(Severity::High);
        assert_eq!(finding.parent_id(), Some(&structure_id));

        let json = serde_json::to_value(&finding).unwrap();
        assert_eq!(json["severity"], "high");
        assert_eq!(json["structureId"], "s1");
    }
}
