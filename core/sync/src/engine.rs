//! Push-side orchestration.
//!
//! The engine drains the [`SyncQueue`] in enqueue order, one operation at a
//! time across all entity types, dispatching each to the handler registered
//! for its type. A single drain lock serializes drains and
//! [`SyncEngine::with_flushed_queue`] blocks, so a pull can never interleave
//! with a push.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use fieldbook_common::{Clock, EntityId, Error, Result, Timestamp};

use crate::handler::{EntitySyncHandler, OperationResult};
use crate::queue::{OperationType, SyncOperation, SyncQueue};
use crate::retry::RetryConfig;
use crate::status::StatusTracker;

/// What a failed operation blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HaltPolicy {
    /// Stop the whole drain.
    #[default]
    Global,
    /// Skip the rest of the failing entity type; other types continue.
    PerEntityType,
}

/// Sync engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncConfig {
    /// Seconds between background pulls; `None` pulls only on demand.
    pub pull_interval_secs: Option<u64>,
    /// Timed retry after a halted drain.
    pub retry: RetryConfig,
    pub halt_policy: HaltPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            pull_interval_secs: Some(300),
            retry: RetryConfig::default(),
            halt_policy: HaltPolicy::Global,
        }
    }
}

/// Handlers keyed by entity type tag. Built once at startup.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn EntitySyncHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own entity type tag.
    pub fn register(&mut self, handler: Arc<dyn EntitySyncHandler>) -> Result<()> {
        let entity_type_id = handler.entity_type_id().to_string();
        if self.handlers.contains_key(&entity_type_id) {
            return Err(Error::InvalidInput(format!(
                "Handler '{}' already registered",
                entity_type_id
            )));
        }
        self.handlers.insert(entity_type_id, handler);
        Ok(())
    }

    pub fn get(&self, entity_type_id: &str) -> Option<&Arc<dyn EntitySyncHandler>> {
        self.handlers.get(entity_type_id)
    }

    pub fn entity_types(&self) -> Vec<String> {
        let mut types: Vec<_> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Where and why a drain stopped.
#[derive(Debug)]
pub struct DrainHalt {
    /// The operation that failed; `None` if the queue itself failed.
    pub operation: Option<SyncOperation>,
    pub error: Error,
}

/// Summary of one drain pass.
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Operations applied remotely and removed.
    pub applied: usize,
    /// Stale operations discarded.
    pub discarded: usize,
    /// Operations left untouched behind a per-type failure.
    pub deferred: usize,
    /// First failure, if any.
    pub halted: Option<DrainHalt>,
}

impl DrainReport {
    /// Whether every pending operation was processed.
    pub fn is_complete(&self) -> bool {
        self.halted.is_none()
    }

    pub fn was_cancelled(&self) -> bool {
        matches!(
            self.halted,
            Some(DrainHalt {
                error: Error::Cancelled(_),
                ..
            })
        )
    }
}

/// The push orchestrator.
pub struct SyncEngine {
    queue: Arc<SyncQueue>,
    handlers: HandlerRegistry,
    clock: Arc<dyn Clock>,
    halt_policy: HaltPolicy,
    drain_lock: Mutex<()>,
    wakeup: Notify,
    status: StatusTracker,
    cancel: CancellationToken,
}

impl SyncEngine {
    pub fn new(queue: Arc<SyncQueue>, handlers: HandlerRegistry, clock: Arc<dyn Clock>) -> Self {
        Self {
            queue,
            handlers,
            clock,
            halt_policy: HaltPolicy::default(),
            drain_lock: Mutex::new(()),
            wakeup: Notify::new(),
            status: StatusTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_halt_policy(mut self, policy: HaltPolicy) -> Self {
        self.halt_policy = policy;
        self
    }

    /// Tie drains to an owning scope; cancelling it stops in-flight work.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn queue(&self) -> &Arc<SyncQueue> {
        &self.queue
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn status(&self) -> &StatusTracker {
        &self.status
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Queue an intent stamped now, and wake the drain worker.
    pub fn enqueue(
        &self,
        entity_type_id: &str,
        entity_id: &EntityId,
        operation: OperationType,
    ) -> Result<Timestamp> {
        let stamped_at = self.clock.now();
        self.enqueue_at(entity_type_id, entity_id, operation, stamped_at)?;
        Ok(stamped_at)
    }

    /// Queue an intent with an explicit stamp, and wake the drain worker.
    pub fn enqueue_at(
        &self,
        entity_type_id: &str,
        entity_id: &EntityId,
        operation: OperationType,
        stamped_at: Timestamp,
    ) -> Result<()> {
        self.queue
            .enqueue(entity_type_id, entity_id, operation, stamped_at)?;
        self.wakeup.notify_one();
        Ok(())
    }

    /// Resolves once an enqueue has happened since the last wait.
    pub async fn wait_for_wakeup(&self) {
        self.wakeup.notified().await
    }

    /// Run one drain pass, waiting for any drain already in flight.
    pub async fn drain(&self) -> DrainReport {
        let _guard = self.drain_lock.lock().await;
        self.drain_locked().await
    }

    /// Drain, then run `block` while still holding the drain lock.
    ///
    /// `block` receives the flush result; no push can start until it
    /// completes.
    pub async fn with_flushed_queue<F, Fut, T>(&self, block: F) -> T
    where
        F: FnOnce(DrainReport) -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.drain_lock.lock().await;
        let report = self.drain_locked().await;
        block(report).await
    }

    async fn drain_locked(&self) -> DrainReport {
        self.status.drain_started();
        let report = self.run_pass().await;
        self.status.drain_finished(&report);

        match &report.halted {
            Some(halt) => warn!(
                "Drain halted after {} applied, {} discarded: {}",
                report.applied, report.discarded, halt.error
            ),
            None if report.applied + report.discarded > 0 => info!(
                "Drain complete: {} applied, {} discarded",
                report.applied, report.discarded
            ),
            None => debug!("Drain complete: queue empty"),
        }
        report
    }

    async fn run_pass(&self) -> DrainReport {
        let mut report = DrainReport::default();

        let pending = match self.queue.get_all_pending() {
            Ok(pending) => pending,
            Err(error) => {
                report.halted = Some(DrainHalt {
                    operation: None,
                    error,
                });
                return report;
            }
        };

        let mut blocked: HashSet<String> = HashSet::new();

        for operation in pending {
            if blocked.contains(&operation.entity_type_id) {
                report.deferred += 1;
                continue;
            }

            let handler = self.handler_for(&operation);
            debug!("Executing {}", operation);

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    OperationResult::Failure(Error::Cancelled(format!("drain stopped at {}", operation)))
                }
                result = handler.execute(&operation) => result,
            };

            let removal = match result {
                OperationResult::Success => {
                    report.applied += 1;
                    self.queue.remove(&operation)
                }
                OperationResult::EntityNotFound => {
                    report.discarded += 1;
                    self.queue.remove(&operation)
                }
                OperationResult::Failure(error) => {
                    warn!("{} failed: {}", operation, error);
                    let global = self.halt_policy == HaltPolicy::Global
                        || matches!(error, Error::Cancelled(_));
                    blocked.insert(operation.entity_type_id.clone());
                    if report.halted.is_none() {
                        report.halted = Some(DrainHalt {
                            operation: Some(operation),
                            error,
                        });
                    }
                    if global {
                        break;
                    }
                    continue;
                }
            };

            match removal {
                Ok(true) => {}
                Ok(false) => debug!("{} was superseded while in flight", operation),
                Err(error) => {
                    if report.halted.is_none() {
                        report.halted = Some(DrainHalt {
                            operation: Some(operation),
                            error,
                        });
                    }
                    break;
                }
            }
        }

        report
    }

    fn handler_for(&self, operation: &SyncOperation) -> &Arc<dyn EntitySyncHandler> {
        self.handlers.get(&operation.entity_type_id).unwrap_or_else(|| {
            panic!(
                "No sync handler registered for entity type '{}'",
                operation.entity_type_id
            )
        })
    }
}
