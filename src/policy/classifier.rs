//! Raw backend failure to [`FailureKind`] classification.
//!
//! Message patterns are checked first, in precedence order, so a specific
//! message beats a generic status code (a 403 saying "already retweeted"
//! is a duplicate, not an auth problem). Status codes are the fallback.
//!
//! Nothing here yields [`FailureKind::Transient`]. Only an adapter that saw
//! the network error or timeout itself assigns it; a remote 5xx may follow
//! an action that already happened and stays `Unknown`.

use std::sync::LazyLock;

use regex::Regex;

use crate::backend::DeliveryFailure;
use crate::models::failure::FailureKind;

static MESSAGE_PATTERNS: LazyLock<Vec<(FailureKind, Regex)>> = LazyLock::new(|| {
    [
        (
            FailureKind::RateLimited,
            r"(?i)rate[\s_-]?limit|too many requests|resource[\s_-]?exhausted",
        ),
        (FailureKind::DuplicateAction, r"(?i)already retweeted|duplicate"),
        (
            FailureKind::AuthFailure,
            r"(?i)unauthori[sz]ed|forbidden|credential|permission|token|quota|attached to a project|not configured",
        ),
        (
            FailureKind::NotFound,
            r"(?i)not found|does not exist|no status found",
        ),
    ]
    .into_iter()
    .filter_map(|(kind, pattern)| Regex::new(pattern).ok().map(|re| (kind, re)))
    .collect()
});

/// Classify a failure from its HTTP status and message text.
///
/// Total: every input maps to exactly one kind, `Unknown` when nothing
/// matches.
#[must_use]
pub fn classify(http_status: Option<u16>, message: &str) -> FailureKind {
    if let Some(kind) = MESSAGE_PATTERNS
        .iter()
        .find(|(_, re)| re.is_match(message))
        .map(|(kind, _)| *kind)
    {
        return kind;
    }

    match http_status {
        Some(429) => FailureKind::RateLimited,
        Some(401 | 403) => FailureKind::AuthFailure,
        Some(404) => FailureKind::NotFound,
        _ => FailureKind::Unknown,
    }
}

/// Classify a delivery failure, honouring a kind the backend already assigned.
#[must_use]
pub fn classify_failure(failure: &DeliveryFailure) -> FailureKind {
    failure
        .kind
        .unwrap_or_else(|| classify(failure.http_status, &failure.message))
}
