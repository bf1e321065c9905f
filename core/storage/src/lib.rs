//! Local storage boundary for Fieldbook.
//!
//! Local storage owns the authoritative local copy of every record. It is a
//! per-entity-type table keyed by id, supporting lookups, scoped listings,
//! upserts and deletes, and it publishes a revision counter so handlers and
//! UI can observe changes without polling.
//!
//! # Backends
//! - [`MemoryStore`]: in-process maps, for tests and previews
//! - [`SqliteStore`]: a shared SQLite [`Database`] holding JSON payloads

pub mod memory;
pub mod sqlite;
pub mod store;

pub use memory::MemoryStore;
pub use sqlite::{Database, SqliteStore};
pub use store::{observe_entity, observe_scope, EntityStream, LocalStore, ScopeStream};
