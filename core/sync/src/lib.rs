//! Offline-first synchronization engine for Fieldbook.
//!
//! Local mutations are applied to local storage immediately and recorded in
//! a durable, coalescing [`SyncQueue`]. The [`SyncEngine`] drains that queue
//! in order through per-type [`EntitySyncHandler`]s, halting on the first
//! failure. The [`PullCoordinator`] fetches server changes per
//! [`CursorKey`], always after flushing pending pushes.
//!
//! # Components
//! - Queue and cursors: SQLite tables sharing the local database
//! - Handlers: [`RecordSync`] pairs a local store with a remote API
//! - Cascade: children-first local deletion across the record hierarchy
//! - Status: aggregate [`SyncStatus`] for the UI
//! - Scheduler: background worker with periodic pulls and timed retry

pub mod cascade;
pub mod cursor;
pub mod engine;
pub mod handler;
pub mod pull;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod status;

pub use cascade::{Cascade, CascadeNode, RemovedRecord, StoreNode};
pub use cursor::{CursorKey, CursorStore};
pub use engine::{DrainHalt, DrainReport, HaltPolicy, HandlerRegistry, SyncConfig, SyncEngine};
pub use handler::{EntitySync, EntitySyncHandler, OperationResult, RecordSync};
pub use pull::{PullCoordinator, PullReport, PullSource, PullStats};
pub use queue::{OperationType, SyncOperation, SyncQueue};
pub use retry::{Backoff, RetryConfig};
pub use scheduler::{SchedulerConfig, SyncRequest, SyncScheduler, SyncSchedulerHandle};
pub use status::{StatusSnapshot, StatusTracker, SyncStatus};
