//! Closed set of classified delivery failure kinds.

use serde::{Deserialize, Serialize};

/// Classified delivery failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network error or timeout.
    Transient,
    /// Remote rate limit or quota window exceeded.
    RateLimited,
    /// The action was already performed remotely.
    DuplicateAction,
    /// Credentials, permissions, or configuration problem.
    AuthFailure,
    /// Target reference does not exist remotely.
    NotFound,
    /// Anything else.
    Unknown,
}

impl FailureKind {
    /// All kinds, in classification precedence order.
    pub const ALL: [FailureKind; 6] = [
        FailureKind::RateLimited,
        FailureKind::DuplicateAction,
        FailureKind::AuthFailure,
        FailureKind::NotFound,
        FailureKind::Transient,
        FailureKind::Unknown,
    ];

    /// Stable storage name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::RateLimited => "rate_limited",
            Self::DuplicateAction => "duplicate_action",
            Self::AuthFailure => "auth_failure",
            Self::NotFound => "not_found",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a stored name back into a kind.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == raw)
    }
}
