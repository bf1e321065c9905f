//! Common types shared across the Fieldbook sync engine.
//!
//! This crate holds the pieces every other crate agrees on: the error
//! taxonomy, identifiers and logical timestamps, the [`Entity`] contract a
//! record must satisfy to be synchronized, the timestamp authority, and the
//! last-write-wins rule applied identically by clients and the server.

pub mod clock;
pub mod conflict;
pub mod entity;
pub mod error;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use conflict::{ConflictResolver, DeleteOutcome, UpsertOutcome};
pub use entity::Entity;
pub use error::{Error, Result};
pub use types::{EntityId, Timestamp};
