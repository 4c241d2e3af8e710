//! Retry and reschedule policy.
//!
//! [`decide`] maps a classified failure and the item's attempt counts to a
//! [`RecoveryAction`]. The dispatcher applies `RetryNow` in-call and
//! `Reschedule` only when automatic rescheduling is enabled; otherwise the
//! operator picks from [`remediation_options`].

use std::time::Duration;

use serde::Serialize;

use crate::config::RetryConfig;
use crate::models::failure::FailureKind;
use crate::models::item::{ContentItem, ContentKind, ContentStatus};

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Try again within the same dispatch after the given pause.
    RetryNow(Duration),
    /// Leave the item failed, recommending a new time this far from now.
    Reschedule(chrono::Duration),
    /// No automatic recovery.
    FailTerminal,
}

/// Resolved retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Apply recommended reschedules without operator action.
    pub auto_reschedule: bool,
    /// Rate-limit backoff ladder, indexed by attempt count.
    pub backoff: Vec<chrono::Duration>,
    /// In-call retries for transient failures.
    pub max_immediate_retries: u32,
    /// Base pause between in-call retries; doubles per retry.
    pub immediate_retry_delay: Duration,
    /// Reschedule delay once in-call retries are exhausted.
    pub transient_reschedule: chrono::Duration,
    /// Attempts after which automatic rescheduling stops.
    pub max_auto_reschedules: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// Build the policy from its configuration section.
    #[must_use]
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            auto_reschedule: config.auto_reschedule,
            backoff: config
                .backoff_hours
                .iter()
                .map(|h| chrono::Duration::hours(i64::from(*h)))
                .collect(),
            max_immediate_retries: config.max_immediate_retries,
            immediate_retry_delay: Duration::from_millis(config.immediate_retry_delay_ms),
            transient_reschedule: chrono::Duration::minutes(i64::from(
                config.transient_reschedule_minutes,
            )),
            max_auto_reschedules: config.max_auto_reschedules,
        }
    }

    /// Rate-limit backoff for an item that has made `total_attempts`
    /// attempts, capped at the last rung.
    #[must_use]
    pub fn backoff_for(&self, total_attempts: u32) -> chrono::Duration {
        let index = usize::try_from(total_attempts.saturating_sub(1)).unwrap_or(usize::MAX);
        self.backoff
            .get(index)
            .or_else(|| self.backoff.last())
            .copied()
            .unwrap_or_else(|| chrono::Duration::hours(1))
    }

    /// Whether a recommended reschedule may be applied automatically.
    #[must_use]
    pub fn allows_auto_reschedule(&self, total_attempts: u32) -> bool {
        self.auto_reschedule && total_attempts <= self.max_auto_reschedules
    }
}

/// Decide how to recover from a failure.
///
/// `dispatch_attempt` counts attempts made by the current dispatch call
/// (starting at 1); `total_attempts` counts every attempt the item has
/// ever made, including this one.
#[must_use]
pub fn decide(
    kind: FailureKind,
    dispatch_attempt: u32,
    total_attempts: u32,
    policy: &RetryPolicy,
) -> RecoveryAction {
    match kind {
        FailureKind::Transient if dispatch_attempt <= policy.max_immediate_retries => {
            let exponent = dispatch_attempt.saturating_sub(1).min(16);
            RecoveryAction::RetryNow(policy.immediate_retry_delay.saturating_mul(1 << exponent))
        }
        FailureKind::Transient => RecoveryAction::Reschedule(policy.transient_reschedule),
        FailureKind::RateLimited => RecoveryAction::Reschedule(policy.backoff_for(total_attempts)),
        FailureKind::DuplicateAction
        | FailureKind::AuthFailure
        | FailureKind::NotFound
        | FailureKind::Unknown => RecoveryAction::FailTerminal,
    }
}

/// Operator quick option for a failed item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "option", rename_all = "snake_case")]
pub enum Remediation {
    /// Reschedule this far from now.
    RetryAfter {
        /// Delay in whole hours.
        hours: u32,
    },
    /// Abandon the item.
    Discard,
    /// Discard the item and draft a quote retweet of the same target.
    ConvertToQuote,
    /// Fix the owner's credentials before anything else.
    ReconfigureCredentials,
}

impl Remediation {
    /// Short label for operator display.
    #[must_use]
    pub fn label(self) -> String {
        match self {
            Self::RetryAfter { hours } => format!("retry in {hours}h"),
            Self::Discard => "discard".into(),
            Self::ConvertToQuote => "convert to quote retweet".into(),
            Self::ReconfigureCredentials => "reconfigure credentials".into(),
        }
    }
}

/// Quick options for an item; empty unless it is failed.
#[must_use]
pub fn remediation_options(item: &ContentItem) -> Vec<Remediation> {
    if item.status != ContentStatus::Failed {
        return Vec::new();
    }

    let kind = item
        .last_error
        .as_ref()
        .map_or(FailureKind::Unknown, |e| e.kind);
    match kind {
        FailureKind::RateLimited => vec![
            Remediation::RetryAfter { hours: 1 },
            Remediation::RetryAfter { hours: 6 },
        ],
        FailureKind::DuplicateAction if item.kind == ContentKind::Retweet => {
            vec![Remediation::Discard, Remediation::ConvertToQuote]
        }
        FailureKind::DuplicateAction | FailureKind::NotFound => vec![Remediation::Discard],
        FailureKind::AuthFailure => vec![Remediation::ReconfigureCredentials, Remediation::Discard],
        FailureKind::Transient | FailureKind::Unknown => vec![
            Remediation::RetryAfter { hours: 1 },
            Remediation::Discard,
        ],
    }
}
