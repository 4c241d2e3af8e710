//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS` and are safe to
//! re-run on every startup.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS content_item (
    id                  TEXT PRIMARY KEY NOT NULL,
    owner_id            TEXT NOT NULL,
    kind                TEXT NOT NULL CHECK(kind IN ('post','retweet','quote_retweet')),
    payload_json        TEXT NOT NULL,
    destination         TEXT NOT NULL CHECK(destination IN ('direct_api','relay','webhook','auto')),
    scheduled_at        TEXT,
    scheduled_ts        INTEGER,
    status              TEXT NOT NULL CHECK(status IN ('draft','approved','scheduled','sent','failed','discarded')),
    attempts            INTEGER NOT NULL DEFAULT 0,
    last_error_kind     TEXT,
    last_error_message  TEXT,
    result_ref          TEXT,
    created_at          TEXT NOT NULL,
    executed_at         TEXT,
    updated_at          TEXT NOT NULL,
    claim_token         TEXT,
    claimed_until       INTEGER
);

CREATE TABLE IF NOT EXISTS delivery_history (
    id                  TEXT PRIMARY KEY NOT NULL,
    item_id             TEXT NOT NULL,
    backend_used        TEXT NOT NULL CHECK(backend_used IN ('direct_api','relay','webhook')),
    attempted_at        TEXT NOT NULL,
    attempted_ts        INTEGER NOT NULL,
    outcome             TEXT NOT NULL CHECK(outcome IN ('success','failure')),
    classified_error    TEXT,
    error_message       TEXT,
    remote_ref          TEXT
);

CREATE INDEX IF NOT EXISTS idx_item_due ON content_item(status, scheduled_ts);
CREATE INDEX IF NOT EXISTS idx_item_owner ON content_item(owner_id);
CREATE INDEX IF NOT EXISTS idx_history_item ON delivery_history(item_id);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
