//! Content item repository for `SQLite` persistence.
//!
//! Status changes go exclusively through [`ItemRepo::try_transition`] /
//! [`ItemRepo::transition`], which apply the change with a compare-and-set
//! on the expected current status. Dispatchers additionally take a
//! time-bounded lease with [`ItemRepo::claim`] before calling a backend;
//! the lease lives in its own columns and never changes `status`, so an
//! abandoned claim simply expires.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, SecondsFormat, Timelike};

use crate::clock::canonical_offset;
use crate::models::failure::FailureKind;
use crate::models::item::{ContentItem, ContentKind, ContentStatus, Destination, LastError, Payload};
use crate::{AppError, Result};

use super::db::Database;

const ITEM_COLUMNS: &str = "id, owner_id, kind, payload_json, destination, scheduled_at, \
     status, attempts, last_error_kind, last_error_message, result_ref, created_at, \
     executed_at, updated_at";

/// How a transition treats the stored `last_error`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ErrorUpdate {
    /// Leave the stored error untouched.
    #[default]
    Keep,
    /// Replace it.
    Set(LastError),
    /// Remove it.
    Clear,
}

/// Field changes applied together with a status transition.
#[derive(Debug, Clone)]
pub struct TransitionFields {
    /// Instant of the write; also used to decide whether a lease has expired.
    pub at: DateTime<FixedOffset>,
    /// New delivery time.
    pub scheduled_at: Option<DateTime<FixedOffset>>,
    /// Change to the stored error.
    pub last_error: ErrorUpdate,
    /// Remote artifact reference.
    pub result_ref: Option<String>,
    /// Delivery timestamp.
    pub executed_at: Option<DateTime<FixedOffset>>,
    /// Delivery attempts made since the last write.
    pub attempts_delta: u32,
    /// Lease token held by the caller; `None` requires the item to be unclaimed.
    pub claim_token: Option<String>,
}

impl TransitionFields {
    /// Empty change set written at `at`.
    #[must_use]
    pub fn at(at: DateTime<FixedOffset>) -> Self {
        Self {
            at,
            scheduled_at: None,
            last_error: ErrorUpdate::Keep,
            result_ref: None,
            executed_at: None,
            attempts_delta: 0,
            claim_token: None,
        }
    }

    /// Set a new delivery time.
    #[must_use]
    pub fn with_scheduled_at(mut self, scheduled_at: DateTime<FixedOffset>) -> Self {
        self.scheduled_at = Some(scheduled_at);
        self
    }

    /// Record a classified failure.
    #[must_use]
    pub fn with_error(mut self, kind: FailureKind, message: impl Into<String>) -> Self {
        self.last_error = ErrorUpdate::Set(LastError {
            kind,
            message: message.into(),
        });
        self
    }

    /// Clear any stored failure.
    #[must_use]
    pub fn clear_error(mut self) -> Self {
        self.last_error = ErrorUpdate::Clear;
        self
    }

    /// Record a successful delivery.
    #[must_use]
    pub fn with_result(mut self, result_ref: impl Into<String>) -> Self {
        self.result_ref = Some(result_ref.into());
        self.executed_at = Some(self.at);
        self
    }

    /// Count delivery attempts made under this transition.
    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts_delta = attempts;
        self
    }

    /// Act under a previously acquired lease.
    #[must_use]
    pub fn with_claim(mut self, token: impl Into<String>) -> Self {
        self.claim_token = Some(token.into());
        self
    }
}

/// Repository wrapper around `SQLite` for content item records.
#[derive(Clone)]
pub struct ItemRepo {
    db: Arc<Database>,
    offset: FixedOffset,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct ItemRow {
    id: String,
    owner_id: String,
    kind: String,
    payload_json: String,
    destination: String,
    scheduled_at: Option<String>,
    status: String,
    attempts: i64,
    last_error_kind: Option<String>,
    last_error_message: Option<String>,
    result_ref: Option<String>,
    created_at: String,
    executed_at: Option<String>,
    updated_at: String,
}

impl ItemRow {
    /// Convert a database row into the domain model.
    fn into_item(self) -> Result<ContentItem> {
        let payload: Payload = serde_json::from_str(&self.payload_json)?;
        let last_error = match self.last_error_kind.as_deref() {
            Some(raw) => Some(LastError {
                kind: FailureKind::parse(raw)
                    .ok_or_else(|| AppError::Db(format!("invalid last_error_kind: {raw}")))?,
                message: self.last_error_message.unwrap_or_default(),
            }),
            None => None,
        };

        Ok(ContentItem {
            id: self.id,
            owner_id: self.owner_id,
            kind: parse_kind(&self.kind)?,
            payload,
            destination: parse_destination(&self.destination)?,
            scheduled_at: parse_optional_ts(self.scheduled_at.as_deref(), "scheduled_at")?,
            status: parse_status(&self.status)?,
            attempts: u32::try_from(self.attempts)
                .map_err(|e| AppError::Db(format!("invalid attempts: {e}")))?,
            last_error,
            result_ref: self.result_ref,
            created_at: parse_ts(&self.created_at, "created_at")?,
            executed_at: parse_optional_ts(self.executed_at.as_deref(), "executed_at")?,
            updated_at: parse_ts(&self.updated_at, "updated_at")?,
        })
    }
}

fn parse_ts(raw: &str, field: &str) -> Result<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(raw).map_err(|e| AppError::Db(format!("invalid {field}: {e}")))
}

fn parse_optional_ts(raw: Option<&str>, field: &str) -> Result<Option<DateTime<FixedOffset>>> {
    raw.map(|s| parse_ts(s, field)).transpose()
}

fn parse_kind(s: &str) -> Result<ContentKind> {
    match s {
        "post" => Ok(ContentKind::Post),
        "retweet" => Ok(ContentKind::Retweet),
        "quote_retweet" => Ok(ContentKind::QuoteRetweet),
        other => Err(AppError::Db(format!("invalid kind: {other}"))),
    }
}

fn parse_destination(s: &str) -> Result<Destination> {
    match s {
        "direct_api" => Ok(Destination::DirectApi),
        "relay" => Ok(Destination::Relay),
        "webhook" => Ok(Destination::Webhook),
        "auto" => Ok(Destination::Auto),
        other => Err(AppError::Db(format!("invalid destination: {other}"))),
    }
}

fn parse_status(s: &str) -> Result<ContentStatus> {
    match s {
        "draft" => Ok(ContentStatus::Draft),
        "approved" => Ok(ContentStatus::Approved),
        "scheduled" => Ok(ContentStatus::Scheduled),
        "sent" => Ok(ContentStatus::Sent),
        "failed" => Ok(ContentStatus::Failed),
        "discarded" => Ok(ContentStatus::Discarded),
        other => Err(AppError::Db(format!("invalid content status: {other}"))),
    }
}

/// Drop sub-microsecond precision so the stored text and the stored
/// microsecond timestamp describe the same instant.
fn truncate_micros(instant: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    let nanos = instant.nanosecond() / 1_000 * 1_000;
    instant.with_nanosecond(nanos).unwrap_or(instant)
}

/// Field-level requirements for the edges that carry data.
fn check_fields(expected: ContentStatus, next: ContentStatus, fields: &TransitionFields) -> Result<()> {
    match (expected, next) {
        (ContentStatus::Scheduled, ContentStatus::Sent) if fields.result_ref.is_none() => Err(
            AppError::InvalidTransition("sent requires a result reference".into()),
        ),
        (ContentStatus::Scheduled, ContentStatus::Failed)
            if !matches!(fields.last_error, ErrorUpdate::Set(_)) =>
        {
            Err(AppError::InvalidTransition(
                "failed requires a classified error".into(),
            ))
        }
        (ContentStatus::Failed, ContentStatus::Scheduled) => match fields.scheduled_at {
            Some(at) if at > fields.at => Ok(()),
            Some(_) => Err(AppError::InvalidTransition(
                "reschedule time must be strictly in the future".into(),
            )),
            None => Err(AppError::InvalidTransition(
                "reschedule requires a new scheduled_at".into(),
            )),
        },
        _ => Ok(()),
    }
}

impl ItemRepo {
    /// Create a new repository instance using the default canonical offset.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self::with_offset(db, canonical_offset())
    }

    /// Create a repository that stores instants in `offset`.
    #[must_use]
    pub fn with_offset(db: Arc<Database>, offset: FixedOffset) -> Self {
        Self { db, offset }
    }

    fn canonical(&self, instant: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
        truncate_micros(instant.with_timezone(&self.offset))
    }

    fn ts_string(&self, instant: DateTime<FixedOffset>) -> String {
        self.canonical(instant)
            .to_rfc3339_opts(SecondsFormat::AutoSi, false)
    }

    /// Insert a new content item record.
    ///
    /// Timestamps are converted to the canonical offset before storage;
    /// the returned item reflects what was stored.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the database insert fails.
    pub async fn create(&self, item: &ContentItem) -> Result<ContentItem> {
        let stored = self.normalised(item);
        self.insert(self.db.as_ref(), &stored).await?;
        Ok(stored)
    }

    /// Discard a failed item and store `replacement` in one transaction.
    ///
    /// Either both writes land or neither does.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Conflict` if `id` is no longer failed or is leased,
    /// `AppError::NotFound` if it does not exist, and `AppError::Db` if
    /// either write fails.
    pub async fn discard_and_create(
        &self,
        id: &str,
        replacement: &ContentItem,
        at: DateTime<FixedOffset>,
    ) -> Result<ContentItem> {
        let stored = self.normalised(replacement);
        let mut tx = self.db.begin().await?;

        let discarded = sqlx::query(
            "UPDATE content_item SET
                status = 'discarded',
                updated_at = ?1,
                claim_token = NULL,
                claimed_until = NULL
             WHERE id = ?2
               AND status = 'failed'
               AND (claim_token IS NULL OR claimed_until <= ?3)",
        )
        .bind(self.ts_string(at))
        .bind(id)
        .bind(at.timestamp_micros())
        .execute(&mut *tx)
        .await?;

        if discarded.rows_affected() == 0 {
            tx.rollback().await?;
            let current = self.get(id).await?;
            return Err(AppError::Conflict(format!(
                "content item {id} is {} and could not be discarded",
                current.status.as_str()
            )));
        }

        self.insert(&mut *tx, &stored).await?;
        tx.commit().await?;
        Ok(stored)
    }

    fn normalised(&self, item: &ContentItem) -> ContentItem {
        let mut stored = item.clone();
        stored.scheduled_at = item.scheduled_at.map(|at| self.canonical(at));
        stored.created_at = self.canonical(item.created_at);
        stored.updated_at = self.canonical(item.updated_at);
        stored.executed_at = item.executed_at.map(|at| self.canonical(at));
        stored
    }

    async fn insert<'e, E>(&self, executor: E, stored: &ContentItem) -> Result<()>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        let payload_json = serde_json::to_string(&stored.payload)?;
        let scheduled_ts = stored.scheduled_at.map(|at| at.timestamp_micros());

        sqlx::query(
            "INSERT INTO content_item (id, owner_id, kind, payload_json, destination,
             scheduled_at, scheduled_ts, status, attempts, last_error_kind, last_error_message,
             result_ref, created_at, executed_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        )
        .bind(&stored.id)
        .bind(&stored.owner_id)
        .bind(stored.kind.as_str())
        .bind(payload_json)
        .bind(stored.destination.as_str())
        .bind(stored.scheduled_at.map(|at| self.ts_string(at)))
        .bind(scheduled_ts)
        .bind(stored.status.as_str())
        .bind(i64::from(stored.attempts))
        .bind(stored.last_error.as_ref().map(|e| e.kind.as_str()))
        .bind(stored.last_error.as_ref().map(|e| e.message.clone()))
        .bind(&stored.result_ref)
        .bind(self.ts_string(stored.created_at))
        .bind(stored.executed_at.map(|at| self.ts_string(at)))
        .bind(self.ts_string(stored.updated_at))
        .execute(executor)
        .await?;

        Ok(())
    }

    /// Retrieve a content item by identifier, if it exists.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn find(&self, id: &str) -> Result<Option<ContentItem>> {
        let row: Option<ItemRow> = sqlx::query_as(&format!(
            "SELECT {ITEM_COLUMNS} FROM content_item WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(self.db.as_ref())
        .await?;

        row.map(ItemRow::into_item).transpose()
    }

    /// Retrieve a content item by identifier.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the item does not exist.
    pub async fn get(&self, id: &str) -> Result<ContentItem> {
        self.find(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("content item {id} not found")))
    }

    /// Scheduled items whose time is at or before `before`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_due(&self, before: DateTime<FixedOffset>) -> Result<Vec<ContentItem>> {
        let rows: Vec<ItemRow> = sqlx::query_as(&format!(
            "SELECT {ITEM_COLUMNS} FROM content_item
             WHERE status = 'scheduled' AND scheduled_ts IS NOT NULL AND scheduled_ts <= ?1
             ORDER BY scheduled_ts ASC, created_at ASC"
        ))
        .bind(before.timestamp_micros())
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(ItemRow::into_item).collect()
    }

    /// All items in `status`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_by_status(&self, status: ContentStatus) -> Result<Vec<ContentItem>> {
        let rows: Vec<ItemRow> = sqlx::query_as(&format!(
            "SELECT {ITEM_COLUMNS} FROM content_item WHERE status = ?1 ORDER BY created_at ASC"
        ))
        .bind(status.as_str())
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(ItemRow::into_item).collect()
    }

    /// All items belonging to `owner_id`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<ContentItem>> {
        let rows: Vec<ItemRow> = sqlx::query_as(&format!(
            "SELECT {ITEM_COLUMNS} FROM content_item WHERE owner_id = ?1 ORDER BY created_at ASC"
        ))
        .bind(owner_id)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(ItemRow::into_item).collect()
    }

    /// Apply a status transition with compare-and-set on `expected`.
    ///
    /// Returns `Ok(false)` when the stored status differs from `expected`
    /// or the item is leased by someone else.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidTransition` if the edge is not part of the
    /// lifecycle, the fields do not satisfy it, or the item is a failed
    /// duplicate being rescheduled as-is. Returns `AppError::NotFound` if the
    /// item does not exist.
    pub async fn try_transition(
        &self,
        id: &str,
        expected: ContentStatus,
        next: ContentStatus,
        fields: &TransitionFields,
    ) -> Result<bool> {
        if !expected.can_transition_to(next) {
            return Err(AppError::InvalidTransition(format!(
                "{} -> {} is not permitted",
                expected.as_str(),
                next.as_str()
            )));
        }
        check_fields(expected, next, fields)?;

        let (error_mode, error_kind, error_message) = match &fields.last_error {
            ErrorUpdate::Keep => ("keep", None, None),
            ErrorUpdate::Clear => ("clear", None, None),
            ErrorUpdate::Set(err) => ("set", Some(err.kind.as_str()), Some(err.message.clone())),
        };
        let scheduled_at = fields.scheduled_at.map(|at| self.canonical(at));

        let result = sqlx::query(
            "UPDATE content_item SET
                status = ?1,
                attempts = attempts + ?2,
                scheduled_at = COALESCE(?3, scheduled_at),
                scheduled_ts = COALESCE(?4, scheduled_ts),
                last_error_kind = CASE ?5 WHEN 'keep' THEN last_error_kind WHEN 'clear' THEN NULL ELSE ?6 END,
                last_error_message = CASE ?5 WHEN 'keep' THEN last_error_message WHEN 'clear' THEN NULL ELSE ?7 END,
                result_ref = COALESCE(?8, result_ref),
                executed_at = COALESCE(?9, executed_at),
                updated_at = ?10,
                claim_token = NULL,
                claimed_until = NULL
             WHERE id = ?11
               AND status = ?12
               AND ((?13 IS NOT NULL AND claim_token = ?13)
                    OR (?13 IS NULL AND (claim_token IS NULL OR claimed_until <= ?14)))
               AND NOT (?12 = 'failed' AND ?1 = 'scheduled'
                        AND COALESCE(last_error_kind, '') = 'duplicate_action')",
        )
        .bind(next.as_str())
        .bind(i64::from(fields.attempts_delta))
        .bind(scheduled_at.map(|at| self.ts_string(at)))
        .bind(scheduled_at.map(|at| at.timestamp_micros()))
        .bind(error_mode)
        .bind(error_kind)
        .bind(error_message)
        .bind(&fields.result_ref)
        .bind(fields.executed_at.map(|at| self.ts_string(at)))
        .bind(self.ts_string(fields.at))
        .bind(id)
        .bind(expected.as_str())
        .bind(&fields.claim_token)
        .bind(fields.at.timestamp_micros())
        .execute(self.db.as_ref())
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        let current = self.get(id).await?;
        if current.status == expected
            && expected == ContentStatus::Failed
            && next == ContentStatus::Scheduled
            && current.failed_as_duplicate()
        {
            return Err(AppError::InvalidTransition(format!(
                "content item {id} failed as a duplicate and cannot be rescheduled as-is"
            )));
        }
        Ok(false)
    }

    /// Apply a status transition, failing with `Conflict` on a CAS miss.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Conflict` if the stored status differs from
    /// `expected`, plus every error of [`Self::try_transition`].
    pub async fn transition(
        &self,
        id: &str,
        expected: ContentStatus,
        next: ContentStatus,
        fields: &TransitionFields,
    ) -> Result<ContentItem> {
        if self.try_transition(id, expected, next, fields).await? {
            self.get(id).await
        } else {
            Err(AppError::Conflict(format!(
                "content item {id} is no longer {}",
                expected.as_str()
            )))
        }
    }

    /// Take the dispatch lease on a scheduled item until `until`.
    ///
    /// Returns `Ok(false)` if the item is not scheduled or is already leased.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the item does not exist.
    pub async fn claim(
        &self,
        id: &str,
        token: &str,
        now: DateTime<FixedOffset>,
        until: DateTime<FixedOffset>,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE content_item SET claim_token = ?1, claimed_until = ?2
             WHERE id = ?3 AND status = 'scheduled'
               AND (claim_token IS NULL OR claimed_until <= ?4)",
        )
        .bind(token)
        .bind(until.timestamp_micros())
        .bind(id)
        .bind(now.timestamp_micros())
        .execute(self.db.as_ref())
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        self.get(id).await?;
        Ok(false)
    }

    /// Give up a lease without changing status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the update fails.
    pub async fn release_claim(&self, id: &str, token: &str) -> Result<()> {
        sqlx::query(
            "UPDATE content_item SET claim_token = NULL, claimed_until = NULL
             WHERE id = ?1 AND claim_token = ?2",
        )
        .bind(id)
        .bind(token)
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Physically delete a discarded item.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the item does not exist and
    /// `AppError::InvalidTransition` if it is not discarded.
    pub async fn delete_discarded(&self, id: &str) -> Result<()> {
        let result =
            sqlx::query("DELETE FROM content_item WHERE id = ?1 AND status = 'discarded'")
                .bind(id)
                .execute(self.db.as_ref())
                .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }
        let current = self.get(id).await?;
        Err(AppError::InvalidTransition(format!(
            "content item {id} is {} and must be discarded before purge",
            current.status.as_str()
        )))
    }
}
