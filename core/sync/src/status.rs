//! Aggregate sync status exposed to the UI layer.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::watch;

use fieldbook_common::Error;

use crate::engine::DrainReport;

/// What the user sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    Synced,
    Syncing,
    Offline,
    Error,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SyncStatus::Synced => "synced",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Offline => "offline",
            SyncStatus::Error => "error",
        };
        f.write_str(label)
    }
}

/// Inputs the status is derived from. Individual queue entries are never
/// inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub online: bool,
    pub syncing: bool,
    pub last_drain_halted: bool,
}

impl StatusSnapshot {
    pub fn status(&self) -> SyncStatus {
        if self.syncing {
            SyncStatus::Syncing
        } else if !self.online {
            SyncStatus::Offline
        } else if self.last_drain_halted {
            SyncStatus::Error
        } else {
            SyncStatus::Synced
        }
    }
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            online: true,
            syncing: false,
            last_drain_halted: false,
        }
    }
}

/// Publishes [`StatusSnapshot`] changes.
pub struct StatusTracker {
    tx: watch::Sender<StatusSnapshot>,
}

impl StatusTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(StatusSnapshot::default());
        Self { tx }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        *self.tx.borrow()
    }

    pub fn status(&self) -> SyncStatus {
        self.snapshot().status()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.tx.subscribe()
    }

    /// Connectivity reported by the platform.
    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|s| replace(&mut s.online, online));
    }

    pub(crate) fn drain_started(&self) {
        self.tx.send_if_modified(|s| replace(&mut s.syncing, true));
    }

    pub(crate) fn drain_finished(&self, report: &DrainReport) {
        self.tx.send_if_modified(|s| {
            let mut changed = replace(&mut s.syncing, false);
            match &report.halted {
                Some(halt) if matches!(halt.error, Error::Cancelled(_)) => {}
                Some(halt) => {
                    changed |= replace(&mut s.last_drain_halted, true);
                    changed |= observe_connectivity(s, &halt.error);
                }
                None => {
                    changed |= replace(&mut s.last_drain_halted, false);
                    if report.applied > 0 {
                        changed |= replace(&mut s.online, true);
                    }
                }
            }
            changed
        });
    }

    /// A pull reached the server.
    pub(crate) fn pull_succeeded(&self) {
        self.tx.send_if_modified(|s| replace(&mut s.online, true));
    }

    pub(crate) fn pull_failed(&self, error: &Error) {
        self.tx.send_if_modified(|s| observe_connectivity(s, error));
    }
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Offline errors mark the device offline; any answer from the server
/// proves it reachable.
fn observe_connectivity(s: &mut StatusSnapshot, error: &Error) -> bool {
    if error.is_offline() {
        replace(&mut s.online, false)
    } else if error.is_network() {
        replace(&mut s.online, true)
    } else {
        false
    }
}

fn replace(slot: &mut bool, value: bool) -> bool {
    let changed = *slot != value;
    *slot = value;
    changed
}
