//! Append-only delivery history entries.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::failure::FailureKind;

/// Concrete backend an attempt went through.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Synchronous remote executor.
    DirectApi,
    /// Tabular relay hand-off.
    Relay,
    /// Remote automation endpoint.
    Webhook,
}

impl Backend {
    /// Stable storage name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DirectApi => "direct_api",
            Self::Relay => "relay",
            Self::Webhook => "webhook",
        }
    }
}

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Backend reported success.
    Success,
    /// Backend reported failure.
    Failure,
}

/// One delivery attempt. Never mutated after insertion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeliveryHistory {
    /// Unique record identifier.
    pub id: String,
    /// Item the attempt was made for.
    pub item_id: String,
    /// Backend used.
    pub backend_used: Backend,
    /// When the attempt finished.
    pub attempted_at: DateTime<FixedOffset>,
    /// Success or failure.
    pub outcome: AttemptOutcome,
    /// Classified failure kind, for failures.
    pub classified_error: Option<FailureKind>,
    /// Raw failure message, for failures.
    pub error_message: Option<String>,
    /// Remote artifact identifier, for successes.
    pub remote_ref: Option<String>,
}

impl DeliveryHistory {
    /// Record a successful attempt.
    #[must_use]
    pub fn success(
        item_id: &str,
        backend_used: Backend,
        attempted_at: DateTime<FixedOffset>,
        remote_ref: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            item_id: item_id.to_owned(),
            backend_used,
            attempted_at,
            outcome: AttemptOutcome::Success,
            classified_error: None,
            error_message: None,
            remote_ref: Some(remote_ref),
        }
    }

    /// Record a failed attempt.
    #[must_use]
    pub fn failure(
        item_id: &str,
        backend_used: Backend,
        attempted_at: DateTime<FixedOffset>,
        kind: FailureKind,
        message: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            item_id: item_id.to_owned(),
            backend_used,
            attempted_at,
            outcome: AttemptOutcome::Failure,
            classified_error: Some(kind),
            error_message: Some(message),
            remote_ref: None,
        }
    }
}
