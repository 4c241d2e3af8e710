//! Poll-driven scheduling.
//!
//! Each poll is a bounded batch: load everything due at the clock's
//! current instant and dispatch it sequentially. Overlapping polls are
//! safe because the dispatcher's claim decides every race; losers are
//! counted as skipped.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use super::dispatcher::{DispatchReport, Dispatcher};
use crate::clock::Clock;
use crate::models::item::ContentStatus;
use crate::persistence::item_repo::ItemRepo;
use crate::{AppError, Result};

/// Counts for one poll batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollSummary {
    /// Items found due.
    pub due: usize,
    /// Delivered.
    pub sent: usize,
    /// Failed and left for the operator.
    pub failed: usize,
    /// Failed and rescheduled automatically.
    pub rescheduled: usize,
    /// Claimed by someone else or no longer scheduled.
    pub skipped: usize,
    /// Dispatches aborted by an engine error.
    pub errors: usize,
}

/// Finds due items and hands them to the dispatcher.
pub struct Scheduler {
    items: ItemRepo,
    dispatcher: Arc<Dispatcher>,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    /// Create a scheduler.
    #[must_use]
    pub fn new(items: ItemRepo, dispatcher: Arc<Dispatcher>, clock: Arc<dyn Clock>) -> Self {
        Self {
            items,
            dispatcher,
            clock,
        }
    }

    /// Run one poll batch.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the due query fails. Failures of individual
    /// dispatches are counted, not returned.
    pub async fn poll_once(&self) -> Result<PollSummary> {
        let now = self.clock.now();
        async move {
            let due = self.items.list_due(now).await?;
            let mut summary = PollSummary {
                due: due.len(),
                ..PollSummary::default()
            };

            for item in &due {
                match self.dispatcher.dispatch(&item.id).await {
                    Ok(report) => tally(&mut summary, &report),
                    Err(AppError::Conflict(reason)) => {
                        info!(item_id = %item.id, %reason, "skipping item");
                        summary.skipped += 1;
                    }
                    Err(err) => {
                        error!(item_id = %item.id, %err, "dispatch aborted");
                        summary.errors += 1;
                    }
                }
            }

            info!(
                due = summary.due,
                sent = summary.sent,
                failed = summary.failed,
                rescheduled = summary.rescheduled,
                skipped = summary.skipped,
                errors = summary.errors,
                "poll complete"
            );
            Ok(summary)
        }
        .instrument(info_span!("poll", now = %now))
        .await
    }

    /// Dispatch a scheduled item immediately, whether or not it is due.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`Dispatcher::dispatch`].
    pub async fn execute_now(&self, item_id: &str) -> Result<DispatchReport> {
        info!(item_id, "manual execution requested");
        self.dispatcher.dispatch(item_id).await
    }

    /// Spawn a task that polls every `interval` until `cancel` fires.
    #[must_use]
    pub fn spawn_poll_task(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("poll task shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(err) = self.poll_once().await {
                            warn!(%err, "poll failed");
                        }
                    }
                }
            }
        })
    }
}

fn tally(summary: &mut PollSummary, report: &DispatchReport) {
    match report.status {
        ContentStatus::Sent => summary.sent += 1,
        ContentStatus::Scheduled if report.rescheduled_at.is_some() => summary.rescheduled += 1,
        _ => summary.failed += 1,
    }
}
