//! Delivery history repository for `SQLite` persistence.
//!
//! History is append-only: this repository exposes no update or delete.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat};

use crate::models::failure::FailureKind;
use crate::models::history::{AttemptOutcome, Backend, DeliveryHistory};
use crate::{AppError, Result};

use super::db::Database;

/// Repository for delivery attempt records.
#[derive(Clone)]
pub struct HistoryRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: String,
    item_id: String,
    backend_used: String,
    attempted_at: String,
    outcome: String,
    classified_error: Option<String>,
    error_message: Option<String>,
    remote_ref: Option<String>,
}

impl HistoryRow {
    fn into_entry(self) -> Result<DeliveryHistory> {
        let attempted_at = DateTime::parse_from_rfc3339(&self.attempted_at)
            .map_err(|e| AppError::Db(format!("invalid attempted_at: {e}")))?;
        let classified_error = self
            .classified_error
            .as_deref()
            .map(|raw| {
                FailureKind::parse(raw)
                    .ok_or_else(|| AppError::Db(format!("invalid classified_error: {raw}")))
            })
            .transpose()?;

        Ok(DeliveryHistory {
            id: self.id,
            item_id: self.item_id,
            backend_used: parse_backend(&self.backend_used)?,
            attempted_at,
            outcome: parse_outcome(&self.outcome)?,
            classified_error,
            error_message: self.error_message,
            remote_ref: self.remote_ref,
        })
    }
}

fn parse_backend(s: &str) -> Result<Backend> {
    match s {
        "direct_api" => Ok(Backend::DirectApi),
        "relay" => Ok(Backend::Relay),
        "webhook" => Ok(Backend::Webhook),
        other => Err(AppError::Db(format!("invalid backend: {other}"))),
    }
}

fn parse_outcome(s: &str) -> Result<AttemptOutcome> {
    match s {
        "success" => Ok(AttemptOutcome::Success),
        "failure" => Ok(AttemptOutcome::Failure),
        other => Err(AppError::Db(format!("invalid outcome: {other}"))),
    }
}

fn outcome_str(outcome: AttemptOutcome) -> &'static str {
    match outcome {
        AttemptOutcome::Success => "success",
        AttemptOutcome::Failure => "failure",
    }
}

impl HistoryRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append one attempt record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails.
    pub async fn append(&self, entry: &DeliveryHistory) -> Result<()> {
        sqlx::query(
            "INSERT INTO delivery_history (id, item_id, backend_used, attempted_at, attempted_ts,
             outcome, classified_error, error_message, remote_ref)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(&entry.id)
        .bind(&entry.item_id)
        .bind(entry.backend_used.as_str())
        .bind(
            entry
                .attempted_at
                .to_rfc3339_opts(SecondsFormat::AutoSi, false),
        )
        .bind(entry.attempted_at.timestamp_micros())
        .bind(outcome_str(entry.outcome))
        .bind(entry.classified_error.map(FailureKind::as_str))
        .bind(&entry.error_message)
        .bind(&entry.remote_ref)
        .execute(self.db.as_ref())
        .await?;

        Ok(())
    }

    /// All attempts for an item, in the order they were made.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_for_item(&self, item_id: &str) -> Result<Vec<DeliveryHistory>> {
        let rows: Vec<HistoryRow> = sqlx::query_as(
            "SELECT id, item_id, backend_used, attempted_at, outcome, classified_error,
                    error_message, remote_ref
             FROM delivery_history
             WHERE item_id = ?1
             ORDER BY attempted_ts ASC, rowid ASC",
        )
        .bind(item_id)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(HistoryRow::into_entry).collect()
    }

    /// Number of attempts recorded for an item.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn count_attempts(&self, item_id: &str) -> Result<u32> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM delivery_history WHERE item_id = ?1")
                .bind(item_id)
                .fetch_one(self.db.as_ref())
                .await?;

        u32::try_from(count).map_err(|e| AppError::Db(format!("invalid attempt count: {e}")))
    }
}
