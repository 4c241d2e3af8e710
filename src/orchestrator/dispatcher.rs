//! Dispatch of a single scheduled item.
//!
//! A dispatch claims a lease on the item, picks a backend, delivers with
//! bounded in-call retries for transient failures, records every attempt
//! in history, and finishes with exactly one compare-and-set to `sent` or
//! `failed`. A dispatch that cannot claim the item returns
//! `AppError::Conflict` without touching any backend.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::backend::{BackendSet, DeliveryBackend, DeliveryFailure, DeliveryResult};
use crate::clock::Clock;
use crate::content;
use crate::models::failure::FailureKind;
use crate::models::history::{Backend, DeliveryHistory};
use crate::models::item::{ContentItem, ContentStatus, Destination};
use crate::persistence::history_repo::HistoryRepo;
use crate::persistence::item_repo::{ItemRepo, TransitionFields};
use crate::policy::classifier::classify_failure;
use crate::policy::retry::{decide, RecoveryAction, RetryPolicy};
use crate::{AppError, Result};

/// Default lifetime of a dispatch lease.
pub const DEFAULT_LEASE_SECONDS: i64 = 300;

/// What a dispatch did to an item.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    /// Dispatched item.
    pub item_id: String,
    /// Backend the item was routed to; `None` if no backend was usable.
    pub backend: Option<Backend>,
    /// Status after the dispatch.
    pub status: ContentStatus,
    /// Adapter invocations made by this dispatch.
    pub attempts: u32,
    /// Remote reference, on success.
    pub result_ref: Option<String>,
    /// Classified failure, on failure.
    pub failure: Option<FailureKind>,
    /// New delivery time when the failure was rescheduled automatically.
    pub rescheduled_at: Option<DateTime<FixedOffset>>,
}

/// Final result of the delivery loop.
struct DeliveryRun {
    attempts: u32,
    result: std::result::Result<String, (FailureKind, String, RecoveryAction)>,
}

/// Drives one scheduled item through delivery.
pub struct Dispatcher {
    items: ItemRepo,
    history: HistoryRepo,
    backends: BackendSet,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    lease: chrono::Duration,
}

impl Dispatcher {
    /// Create a dispatcher with the default lease.
    #[must_use]
    pub fn new(
        items: ItemRepo,
        history: HistoryRepo,
        backends: BackendSet,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            items,
            history,
            backends,
            clock,
            policy,
            lease: chrono::Duration::seconds(DEFAULT_LEASE_SECONDS),
        }
    }

    /// Override the lease lifetime.
    #[must_use]
    pub fn with_lease(mut self, lease: chrono::Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Dispatch a scheduled item.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown items, `AppError::Conflict`
    /// if the item is not scheduled or another dispatch holds it, and
    /// `AppError::Db` on persistence failures.
    pub async fn dispatch(&self, item_id: &str) -> Result<DispatchReport> {
        let span = info_span!("dispatch", item_id);
        async move {
            let item = self.items.get(item_id).await?;
            if item.status != ContentStatus::Scheduled {
                return Err(AppError::Conflict(format!(
                    "content item {item_id} is {}, not scheduled",
                    item.status.as_str()
                )));
            }

            let token = Uuid::new_v4().to_string();
            let now = self.clock.now();
            let claimed = self
                .items
                .claim(item_id, &token, now, now + self.lease)
                .instrument(info_span!("claim", item_id))
                .await?;
            if !claimed {
                return Err(AppError::Conflict(format!(
                    "content item {item_id} is already being dispatched"
                )));
            }

            let outcome = self.run_claimed(&item, &token, now).await;
            if outcome.is_err() {
                if let Err(err) = self.items.release_claim(item_id, &token).await {
                    warn!(item_id, %err, "failed to release dispatch lease");
                }
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn run_claimed(
        &self,
        item: &ContentItem,
        token: &str,
        claimed_at: DateTime<FixedOffset>,
    ) -> Result<DispatchReport> {
        let selected = self.select_backend(item, claimed_at).await;
        let (backend, run) = match selected {
            Ok(backend) => {
                let run = self.deliver_with_retries(item, backend.as_ref()).await?;
                (Some(backend.backend()), run)
            }
            Err(failure) => {
                let kind = classify_failure(&failure);
                warn!(item_id = %item.id, %failure, "no usable backend");
                let run = DeliveryRun {
                    attempts: 0,
                    result: Err((kind, failure.message, RecoveryAction::FailTerminal)),
                };
                (None, run)
            }
        };

        let now = self.clock.now();
        match run.result {
            Ok(result_ref) => {
                let fields = TransitionFields::at(now)
                    .with_result(result_ref.clone())
                    .clear_error()
                    .with_attempts(run.attempts)
                    .with_claim(token);
                let sent = self
                    .items
                    .transition(&item.id, ContentStatus::Scheduled, ContentStatus::Sent, &fields)
                    .await?;
                info!(item_id = %item.id, %result_ref, attempts = sent.attempts, "content item sent");
                Ok(DispatchReport {
                    item_id: item.id.clone(),
                    backend,
                    status: ContentStatus::Sent,
                    attempts: run.attempts,
                    result_ref: Some(result_ref),
                    failure: None,
                    rescheduled_at: None,
                })
            }
            Err((kind, message, action)) => {
                let fields = TransitionFields::at(now)
                    .with_error(kind, message.clone())
                    .with_attempts(run.attempts)
                    .with_claim(token);
                let failed = self
                    .items
                    .transition(&item.id, ContentStatus::Scheduled, ContentStatus::Failed, &fields)
                    .await?;
                warn!(
                    item_id = %item.id,
                    kind = kind.as_str(),
                    %message,
                    attempts = failed.attempts,
                    "content item failed"
                );

                let rescheduled_at = self.auto_reschedule(&failed, action).await?;
                Ok(DispatchReport {
                    item_id: item.id.clone(),
                    backend,
                    status: if rescheduled_at.is_some() {
                        ContentStatus::Scheduled
                    } else {
                        ContentStatus::Failed
                    },
                    attempts: run.attempts,
                    result_ref: None,
                    failure: Some(kind),
                    rescheduled_at,
                })
            }
        }
    }

    /// Pick the backend for `item`.
    ///
    /// Explicit destinations map one-to-one. `auto` prefers the relay for
    /// items dated strictly after `now`; otherwise the direct executor when
    /// it is configured for the owner, falling back to the relay.
    async fn select_backend(
        &self,
        item: &ContentItem,
        now: DateTime<FixedOffset>,
    ) -> std::result::Result<Arc<dyn DeliveryBackend>, DeliveryFailure> {
        let explicit = match item.destination {
            Destination::DirectApi => Some(Backend::DirectApi),
            Destination::Relay => Some(Backend::Relay),
            Destination::Webhook => Some(Backend::Webhook),
            Destination::Auto => None,
        };
        if let Some(backend) = explicit {
            return self.backends.get(backend).cloned().ok_or_else(|| {
                DeliveryFailure::classified(
                    FailureKind::AuthFailure,
                    format!("{} backend is not configured", backend.as_str()),
                )
            });
        }

        let future_dated = item.scheduled_at.is_some_and(|at| at > now);
        let mut direct = self
            .backends
            .get(Backend::DirectApi)
            .filter(|_| content::fits_direct_api(&item.payload));
        if let Some(candidate) = direct {
            if !candidate.is_configured_for(&item.owner_id).await {
                direct = None;
            }
        }
        let relay = self.backends.get(Backend::Relay);

        let chosen = if future_dated {
            relay.or(direct)
        } else {
            direct.or(relay)
        };
        chosen.cloned().ok_or_else(|| {
            DeliveryFailure::classified(
                FailureKind::AuthFailure,
                format!("no backend is configured for owner {}", item.owner_id),
            )
        })
    }

    async fn deliver_with_retries(
        &self,
        item: &ContentItem,
        backend: &dyn DeliveryBackend,
    ) -> Result<DeliveryRun> {
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let result = self.attempt(item, backend).await;
            let at = self.clock.now();

            match result {
                Ok(outcome) => {
                    self.history
                        .append(&DeliveryHistory::success(
                            &item.id,
                            backend.backend(),
                            at,
                            outcome.remote_ref.clone(),
                        ))
                        .await?;
                    return Ok(DeliveryRun {
                        attempts,
                        result: Ok(outcome.remote_ref),
                    });
                }
                Err(failure) => {
                    let kind = classify_failure(&failure);
                    let message = failure.to_string();
                    self.history
                        .append(&DeliveryHistory::failure(
                            &item.id,
                            backend.backend(),
                            at,
                            kind,
                            message.clone(),
                        ))
                        .await?;

                    let action = decide(kind, attempts, item.attempts + attempts, &self.policy);
                    if let RecoveryAction::RetryNow(pause) = action {
                        warn!(
                            item_id = %item.id,
                            attempt = attempts,
                            pause_ms = u64::try_from(pause.as_millis()).unwrap_or(u64::MAX),
                            "transient delivery failure, retrying"
                        );
                        self.clock.sleep(pause).await;
                        continue;
                    }
                    return Ok(DeliveryRun {
                        attempts,
                        result: Err((kind, message, action)),
                    });
                }
            }
        }
    }

    async fn attempt(&self, item: &ContentItem, backend: &dyn DeliveryBackend) -> DeliveryResult {
        let timeout = backend.timeout();
        match tokio::time::timeout(timeout, backend.deliver(item)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryFailure::transient(format!(
                "delivery timed out after {}s",
                timeout.as_secs()
            ))),
        }
    }

    async fn auto_reschedule(
        &self,
        failed: &ContentItem,
        action: RecoveryAction,
    ) -> Result<Option<DateTime<FixedOffset>>> {
        let RecoveryAction::Reschedule(delay) = action else {
            return Ok(None);
        };
        if !self.policy.allows_auto_reschedule(failed.attempts) {
            info!(
                item_id = %failed.id,
                attempts = failed.attempts,
                "reschedule recommended, awaiting operator"
            );
            return Ok(None);
        }

        let now = self.clock.now();
        let at = now + delay;
        let fields = TransitionFields::at(now).with_scheduled_at(at).clear_error();
        let moved = self
            .items
            .try_transition(&failed.id, ContentStatus::Failed, ContentStatus::Scheduled, &fields)
            .await?;
        if moved {
            let stored = self.items.get(&failed.id).await?;
            info!(item_id = %failed.id, scheduled_at = ?stored.scheduled_at, "content item rescheduled automatically");
            Ok(stored.scheduled_at)
        } else {
            Ok(None)
        }
    }
}
