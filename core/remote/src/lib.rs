//! Remote API boundary for Fieldbook.
//!
//! Each entity type talks to a REST-ish collection:
//! - `GET /<parent>/<id>/<entities>?since=<ts>` (or `GET /<entities>?since=<ts>`)
//! - `PUT /<entities>/<id>` with the full payload
//! - `DELETE /<entities>/<id>` with `{"deletedAt": <ts>}`
//!
//! [`HttpRemote`] speaks that contract over reqwest. [`MemoryRemote`] is an
//! in-process server that accepts writes through the same last-write-wins
//! resolver the real server applies; it backs tests and simulations.

pub mod api;
pub mod http;
pub mod memory;

pub use api::{RemoteApi, RemoteChange};
pub use http::HttpRemote;
pub use memory::{MemoryRemote, Request};
