//! Fieldbook application layer.
//!
//! Use cases mutate local storage optimistically and queue the change for
//! push; [`Fieldbook`] wires the five record types into a single sync
//! engine, pull coordinator and background scheduler.

pub mod config;
pub mod repository;
pub mod wiring;

pub use config::AppConfig;
pub use repository::LocalRepository;
pub use wiring::{Fieldbook, MemoryServer, Remotes, Stores};
