//! Background sync worker.
//!
//! One task owns all background sync activity: it drains after every
//! enqueue wakeup, pulls the configured targets on a timer, serves explicit
//! requests, and re-runs halted drains on a backoff timer. The worker stops
//! on [`SyncScheduler::shutdown`] or when the engine's cancellation token
//! fires.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use fieldbook_common::{Error, Result};

use crate::cursor::CursorKey;
use crate::engine::{DrainReport, SyncEngine};
use crate::pull::{PullCoordinator, PullReport};
use crate::retry::{Backoff, RetryConfig};

/// Scheduler configuration.
#[derive(Debug, Clone, Default)]
pub struct SchedulerConfig {
    /// Time between background pulls; `None` disables them.
    pub pull_interval: Option<Duration>,
    /// Targets pulled on each tick and by [`SyncScheduler::pull_all`].
    pub pull_targets: Vec<CursorKey>,
    pub retry: RetryConfig,
}

/// Requests served by the worker.
#[derive(Debug)]
pub enum SyncRequest {
    /// Drain the queue now.
    Push(oneshot::Sender<DrainReport>),
    /// Pull one target.
    Pull(CursorKey, oneshot::Sender<Result<PullReport>>),
    /// Pull every configured target.
    PullAll(oneshot::Sender<Vec<Result<PullReport>>>),
    /// Stop the worker.
    Shutdown,
}

/// Client side of the worker.
#[derive(Clone)]
pub struct SyncScheduler {
    request_tx: mpsc::Sender<SyncRequest>,
    cancel: CancellationToken,
}

impl SyncScheduler {
    /// Create a scheduler and the handle to run on a background task.
    pub fn new(
        puller: Arc<PullCoordinator>,
        config: SchedulerConfig,
    ) -> (Self, SyncSchedulerHandle) {
        let (request_tx, request_rx) = mpsc::channel(100);
        let cancel = puller.engine().cancellation().clone();

        let scheduler = Self {
            request_tx,
            cancel: cancel.clone(),
        };

        let handle = SyncSchedulerHandle {
            engine: puller.engine().clone(),
            puller,
            config,
            request_rx,
            cancel,
        };

        (scheduler, handle)
    }

    /// Drain the queue and wait for the result.
    pub async fn push(&self) -> Result<DrainReport> {
        self.request(SyncRequest::Push).await
    }

    /// Pull one target and wait for the result.
    pub async fn pull(&self, key: CursorKey) -> Result<PullReport> {
        self.request(|tx| SyncRequest::Pull(key, tx)).await?
    }

    /// Pull every configured target and wait for the results.
    pub async fn pull_all(&self) -> Result<Vec<Result<PullReport>>> {
        self.request(SyncRequest::PullAll).await
    }

    /// Stop the worker after the current request.
    pub async fn shutdown(&self) {
        let _ = self.request_tx.send(SyncRequest::Shutdown).await;
    }

    /// Stop the worker and abort in-flight drains and pulls.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> SyncRequest) -> Result<T> {
        let (response_tx, response_rx) = oneshot::channel();

        self.request_tx
            .send(build(response_tx))
            .await
            .map_err(|_| Error::Cancelled("Scheduler not running".to_string()))?;

        response_rx
            .await
            .map_err(|_| Error::Cancelled("Scheduler stopped before answering".to_string()))
    }
}

/// Worker half of the scheduler.
pub struct SyncSchedulerHandle {
    engine: Arc<SyncEngine>,
    puller: Arc<PullCoordinator>,
    config: SchedulerConfig,
    request_rx: mpsc::Receiver<SyncRequest>,
    cancel: CancellationToken,
}

impl SyncSchedulerHandle {
    /// Run the worker until shutdown or cancellation.
    ///
    /// This should be spawned in a tokio task. Operations left queued by a
    /// previous run are drained first.
    pub async fn run(mut self) {
        let mut periodic = self.config.pull_interval.map(|period| {
            let mut ticks = interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticks
        });
        let mut backoff = Backoff::new(self.config.retry.clone());
        let mut retry_at: Option<Instant> = None;

        info!("Sync scheduler started");

        let report = self.engine.drain().await;
        Self::arm_retry(&mut backoff, &mut retry_at, &report);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Sync scheduler cancelled");
                    break;
                }

                request = self.request_rx.recv() => match request {
                    None | Some(SyncRequest::Shutdown) => {
                        info!("Sync scheduler shutting down");
                        break;
                    }
                    Some(SyncRequest::Push(response_tx)) => {
                        let report = self.engine.drain().await;
                        Self::arm_retry(&mut backoff, &mut retry_at, &report);
                        let _ = response_tx.send(report);
                    }
                    Some(SyncRequest::Pull(key, response_tx)) => {
                        let result = self.puller.pull(&key).await;
                        if let Ok(report) = &result {
                            Self::arm_retry(&mut backoff, &mut retry_at, &report.flush);
                        }
                        let _ = response_tx.send(result);
                    }
                    Some(SyncRequest::PullAll(response_tx)) => {
                        let results = self.pull_targets(&mut backoff, &mut retry_at).await;
                        let _ = response_tx.send(results);
                    }
                },

                _ = self.engine.wait_for_wakeup() => {
                    debug!("Enqueue wakeup");
                    let report = self.engine.drain().await;
                    Self::arm_retry(&mut backoff, &mut retry_at, &report);
                }

                _ = Self::wait_for_periodic(&mut periodic) => {
                    debug!("Triggering periodic pull");
                    self.pull_targets(&mut backoff, &mut retry_at).await;
                }

                _ = Self::wait_for_retry(retry_at) => {
                    retry_at = None;
                    debug!("Retrying halted drain (attempt {})", backoff.attempts());
                    let report = self.engine.drain().await;
                    Self::arm_retry(&mut backoff, &mut retry_at, &report);
                }
            }
        }
    }

    async fn pull_targets(
        &self,
        backoff: &mut Backoff,
        retry_at: &mut Option<Instant>,
    ) -> Vec<Result<PullReport>> {
        let results = self.puller.pull_all(&self.config.pull_targets).await;
        for result in &results {
            match result {
                Ok(report) => Self::arm_retry(backoff, retry_at, &report.flush),
                Err(e) => error!("Periodic pull failed: {}", e),
            }
        }
        results
    }

    /// Schedule a retry after a halted drain; forget failures after a
    /// complete one.
    fn arm_retry(backoff: &mut Backoff, retry_at: &mut Option<Instant>, report: &DrainReport) {
        if report.is_complete() {
            backoff.reset();
            *retry_at = None;
        } else if report.was_cancelled() {
            *retry_at = None;
        } else if retry_at.is_none() {
            *retry_at = backoff.next_delay().map(|delay| {
                debug!("Next drain retry in {:?}", delay);
                Instant::now() + delay
            });
        }
    }

    async fn wait_for_periodic(periodic: &mut Option<Interval>) {
        match periodic {
            Some(ticks) => {
                ticks.tick().await;
            }
            None => std::future::pending().await,
        }
    }

    async fn wait_for_retry(retry_at: Option<Instant>) {
        match retry_at {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    }
}
