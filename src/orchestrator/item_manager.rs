//! Operator-facing lifecycle operations.
//!
//! Everything an operator does to an item (create, approve, schedule,
//! reschedule, discard, convert, purge) goes through here. Each change is
//! a single compare-and-set on the status the item was read in, so an
//! operator racing a dispatcher gets `AppError::Conflict` instead of a
//! silent overwrite.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use tracing::{info, info_span, Instrument};

use crate::clock::Clock;
use crate::content::{sanitize, validate, TextGenerator};
use crate::models::history::DeliveryHistory;
use crate::models::item::{ContentItem, ContentKind, ContentStatus, Destination, Payload};
use crate::persistence::history_repo::HistoryRepo;
use crate::persistence::item_repo::{ItemRepo, TransitionFields};
use crate::policy::retry::{remediation_options, Remediation};
use crate::{AppError, Result};

/// Input for a new draft.
#[derive(Debug, Clone)]
pub struct NewItem {
    /// Owning cast.
    pub owner_id: String,
    /// Action kind.
    pub kind: ContentKind,
    /// Kind-specific body.
    pub payload: Payload,
    /// Requested backend.
    pub destination: Destination,
    /// Optional delivery time, kept until the item is scheduled.
    pub scheduled_at: Option<DateTime<FixedOffset>>,
}

/// Result of scheduling an item.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleOutcome {
    /// The item as stored.
    pub item: ContentItem,
    /// Whether the item is already due.
    pub due: bool,
}

/// Lifecycle API over the item store.
pub struct ItemManager {
    items: ItemRepo,
    history: HistoryRepo,
    clock: Arc<dyn Clock>,
}

impl ItemManager {
    /// Create a manager.
    #[must_use]
    pub fn new(items: ItemRepo, history: HistoryRepo, clock: Arc<dyn Clock>) -> Self {
        Self {
            items,
            history,
            clock,
        }
    }

    /// Validate and store a new draft.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for an invalid payload or destination.
    pub async fn create_draft(&self, new_item: NewItem) -> Result<ContentItem> {
        if new_item.owner_id.trim().is_empty() {
            return Err(AppError::Validation("owner_id is required".into()));
        }
        validate(new_item.kind, &new_item.payload, new_item.destination)?;

        let item = ContentItem::new_draft(
            new_item.owner_id,
            new_item.kind,
            new_item.payload,
            new_item.destination,
            new_item.scheduled_at,
            self.clock.now(),
        );
        let stored = self.items.create(&item).await?;
        info!(item_id = %stored.id, owner_id = %stored.owner_id, kind = stored.kind.as_str(), "draft created");
        Ok(stored)
    }

    /// Generate post text, sanitise it, and store it as a draft.
    ///
    /// # Errors
    ///
    /// Returns the generator's error, or `AppError::Validation` if nothing
    /// usable remains after sanitisation.
    pub async fn draft_from_generator(
        &self,
        generator: &dyn TextGenerator,
        prompt: &str,
        owner_id: &str,
        destination: Destination,
    ) -> Result<ContentItem> {
        let raw = generator
            .generate(prompt)
            .instrument(info_span!("generate", owner_id))
            .await?;
        let text = sanitize(&raw);
        if text.is_empty() {
            return Err(AppError::Validation(
                "generated text is empty after sanitisation".into(),
            ));
        }

        self.create_draft(NewItem {
            owner_id: owner_id.to_owned(),
            kind: ContentKind::Post,
            payload: Payload::Post {
                text,
                image_refs: Vec::new(),
            },
            destination,
            scheduled_at: None,
        })
        .await
    }

    /// Approve a draft.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` if the payload no longer validates and
    /// `AppError::Conflict` if the item is not a draft.
    pub async fn approve(&self, id: &str) -> Result<ContentItem> {
        let item = self.items.get(id).await?;
        validate(item.kind, &item.payload, item.destination)?;
        let approved = self
            .items
            .transition(
                id,
                ContentStatus::Draft,
                ContentStatus::Approved,
                &TransitionFields::at(self.clock.now()),
            )
            .await?;
        info!(item_id = id, "content item approved");
        Ok(approved)
    }

    /// Schedule an approved item at `at`, or at the time it was drafted with.
    ///
    /// Past times are accepted; such items are due immediately.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` if no time is available and
    /// `AppError::Conflict` if the item is not approved.
    pub async fn schedule(
        &self,
        id: &str,
        at: Option<DateTime<FixedOffset>>,
    ) -> Result<ScheduleOutcome> {
        let item = self.items.get(id).await?;
        let at = at.or(item.scheduled_at).ok_or_else(|| {
            AppError::Validation(format!("content item {id} needs a scheduled_at"))
        })?;

        let now = self.clock.now();
        let stored = self
            .items
            .transition(
                id,
                ContentStatus::Approved,
                ContentStatus::Scheduled,
                &TransitionFields::at(now).with_scheduled_at(at),
            )
            .await?;
        let due = stored.is_due(now);
        info!(item_id = id, scheduled_at = ?stored.scheduled_at, due, "content item scheduled");
        Ok(ScheduleOutcome { item: stored, due })
    }

    /// Move a failed item back to `scheduled` at `at`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` unless `at` is strictly in the future,
    /// `AppError::InvalidTransition` for failed duplicates, and
    /// `AppError::Conflict` if the item is not failed.
    pub async fn reschedule_at(&self, id: &str, at: DateTime<FixedOffset>) -> Result<ContentItem> {
        let now = self.clock.now();
        if at <= now {
            return Err(AppError::Validation(format!(
                "reschedule time {at} is not after {now}"
            )));
        }

        let stored = self
            .items
            .transition(
                id,
                ContentStatus::Failed,
                ContentStatus::Scheduled,
                &TransitionFields::at(now).with_scheduled_at(at).clear_error(),
            )
            .await?;
        info!(item_id = id, scheduled_at = ?stored.scheduled_at, "content item rescheduled");
        Ok(stored)
    }

    /// Move a failed item back to `scheduled`, `delay` from now.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for a non-positive delay, plus every
    /// error of [`Self::reschedule_at`].
    pub async fn reschedule_after(&self, id: &str, delay: chrono::Duration) -> Result<ContentItem> {
        if delay <= chrono::Duration::zero() {
            return Err(AppError::Validation("reschedule delay must be positive".into()));
        }
        self.reschedule_at(id, self.clock.now() + delay).await
    }

    /// Discard an item that has not been delivered.
    ///
    /// Scheduled items can only be discarded while no dispatch holds them.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` for sent or discarded items and
    /// `AppError::Conflict` if the item changed or is being dispatched.
    pub async fn discard(&self, id: &str) -> Result<ContentItem> {
        let item = self.items.get(id).await?;
        let stored = self
            .items
            .transition(
                id,
                item.status,
                ContentStatus::Discarded,
                &TransitionFields::at(self.clock.now()),
            )
            .await?;
        info!(item_id = id, from = item.status.as_str(), "content item discarded");
        Ok(stored)
    }

    /// Discard a retweet that failed as a duplicate and draft a quote
    /// retweet of the same target with `comment`. Both writes commit together.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` unless the item is a failed
    /// duplicate retweet, and `AppError::Validation` for an invalid comment.
    pub async fn convert_duplicate_to_quote(&self, id: &str, comment: &str) -> Result<ContentItem> {
        let item = self.items.get(id).await?;
        if item.status != ContentStatus::Failed
            || !item.failed_as_duplicate()
            || item.kind != ContentKind::Retweet
        {
            return Err(AppError::InvalidTransition(format!(
                "content item {id} is not a retweet that failed as a duplicate"
            )));
        }
        let target_ref = item
            .payload
            .target_ref()
            .ok_or_else(|| AppError::Validation(format!("content item {id} has no target")))?
            .to_owned();

        let payload = Payload::Repost {
            target_ref,
            comment: Some(comment.trim().to_owned()),
        };
        validate(ContentKind::QuoteRetweet, &payload, item.destination)?;

        let now = self.clock.now();
        let draft = ContentItem::new_draft(
            item.owner_id.clone(),
            ContentKind::QuoteRetweet,
            payload,
            item.destination,
            None,
            now,
        );
        let quote = self.items.discard_and_create(id, &draft, now).await?;
        info!(item_id = id, quote_id = %quote.id, "duplicate retweet converted to quote retweet");
        Ok(quote)
    }

    /// Physically delete a discarded item. Its history is kept.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if the item is not discarded.
    pub async fn purge(&self, id: &str) -> Result<()> {
        self.items.delete_discarded(id).await?;
        info!(item_id = id, "content item purged");
        Ok(())
    }

    /// Quick recovery options for an item.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown items.
    pub async fn remediation_options(&self, id: &str) -> Result<Vec<Remediation>> {
        let item = self.items.get(id).await?;
        Ok(remediation_options(&item))
    }

    /// Look up an item.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` for unknown items.
    pub async fn get(&self, id: &str) -> Result<ContentItem> {
        self.items.get(id).await
    }

    /// Items in `status`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_by_status(&self, status: ContentStatus) -> Result<Vec<ContentItem>> {
        self.items.list_by_status(status).await
    }

    /// Items belonging to `owner_id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<ContentItem>> {
        self.items.list_by_owner(owner_id).await
    }

    /// Delivery attempts for an item, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn history(&self, id: &str) -> Result<Vec<DeliveryHistory>> {
        self.history.list_for_item(id).await
    }
}
