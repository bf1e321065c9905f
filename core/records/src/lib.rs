//! Fieldbook domain records.
//!
//! Clients own projects; projects own structures and inspections; structures
//! own findings. Every record implements [`Entity`] so the sync engine can
//! route, compare and cascade it without knowing its payload.

use fieldbook_common::Entity;

pub mod client;
pub mod finding;
pub mod inspection;
pub mod project;
pub mod structure;

pub use client::Client;
pub use finding::{Finding, Severity};
pub use inspection::{Inspection, InspectionStatus};
pub use project::Project;
pub use structure::Structure;

/// Type tags of every record kind, parents before children.
pub const ENTITY_TYPES: [&str; 5] = [
    Client::TYPE_ID,
    Project::TYPE_ID,
    Structure::TYPE_ID,
    Inspection::TYPE_ID,
    Finding::TYPE_ID,
];

/// Implements the sync-relevant accessors for a record with the standard
/// `id`, `updated_at` and `deleted_at` fields.
macro_rules! impl_entity {
    ($ty:ty, $type_id:literal) => {
        impl fieldbook_common::Entity for $ty {
            const TYPE_ID: &'static str = $type_id;

            fn id(&self) -> &fieldbook_common::EntityId {
                &self.id
            }
            fn updated_at(&self) -> fieldbook_common::Timestamp {
                self.updated_at
            }
            fn set_updated_at(&mut self, at: fieldbook_common::Timestamp) {
                self.updated_at = at;
            }
            fn deleted_at(&self) -> Option<fieldbook_common::Timestamp> {
                self.deleted_at
            }
            fn set_deleted_at(&mut self, at: fieldbook_common::Timestamp) {
                self.deleted_at = Some(at);
            }
        }
    };
    ($ty:ty, $type_id:literal, parent = $parent:literal, $parent_field:ident) => {
        impl fieldbook_common::Entity for $ty {
            const TYPE_ID: &'static str = $type_id;
            const PARENT_TYPE_ID: Option<&'static str> = Some($parent);

            fn id(&self) -> &fieldbook_common::EntityId {
                &self.id
            }
            fn parent_id(&self) -> Option<&fieldbook_common::EntityId> {
                Some(&self.$parent_field)
            }
            fn updated_at(&self) -> fieldbook_common::Timestamp {
                self.updated_at
            }
            fn set_updated_at(&mut self, at: fieldbook_common::Timestamp) {
                self.updated_at = at;
            }
            fn deleted_at(&self) -> Option<fieldbook_common::Timestamp> {
                self.deleted_at
            }
            fn set_deleted_at(&mut self, at: fieldbook_common::Timestamp) {
                self.deleted_at = Some(at);
            }
        }
    };
}

pub(crate) use impl_entity;
