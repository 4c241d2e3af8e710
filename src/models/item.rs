//! Content item model and lifecycle helpers.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::failure::FailureKind;

/// Action a content item performs on behalf of its owner.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    /// Original post.
    Post,
    /// Plain retweet of an existing post.
    Retweet,
    /// Retweet with an attached comment.
    QuoteRetweet,
}

impl ContentKind {
    /// Stable storage / wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Retweet => "retweet",
            Self::QuoteRetweet => "quote_retweet",
        }
    }

    /// Whether this kind targets an existing remote post.
    #[must_use]
    pub fn is_repost(self) -> bool {
        matches!(self, Self::Retweet | Self::QuoteRetweet)
    }
}

/// Kind-specific body of a content item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// Body of an original post.
    Post {
        /// Post text.
        text: String,
        /// Image URLs attached to the post.
        #[serde(default)]
        image_refs: Vec<String>,
    },
    /// Body of a retweet or quote retweet.
    Repost {
        /// Remote identifier of the post being reposted.
        target_ref: String,
        /// Comment attached to a quote retweet.
        #[serde(default)]
        comment: Option<String>,
    },
}

impl Payload {
    /// Whether the payload carries nothing deliverable.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Post { text, image_refs } => text.trim().is_empty() && image_refs.is_empty(),
            Self::Repost { target_ref, .. } => target_ref.trim().is_empty(),
        }
    }

    /// Remote target reference, for reposts.
    #[must_use]
    pub fn target_ref(&self) -> Option<&str> {
        match self {
            Self::Post { .. } => None,
            Self::Repost { target_ref, .. } => Some(target_ref.as_str()),
        }
    }

    /// Trimmed comment text, for reposts that carry one.
    #[must_use]
    pub fn comment(&self) -> Option<&str> {
        match self {
            Self::Post { .. } => None,
            Self::Repost { comment, .. } => comment
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty()),
        }
    }
}

/// Where an item should be delivered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Destination {
    /// Synchronous remote executor.
    DirectApi,
    /// Tabular relay executed later by third-party automation.
    Relay,
    /// Remote automation endpoint.
    Webhook,
    /// Let the dispatcher choose.
    Auto,
}

impl Destination {
    /// Stable storage name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DirectApi => "direct_api",
            Self::Relay => "relay",
            Self::Webhook => "webhook",
            Self::Auto => "auto",
        }
    }
}

/// Lifecycle status for a content item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    /// Generated, awaiting human approval.
    Draft,
    /// Approved, not yet scheduled.
    Approved,
    /// Waiting for its scheduled time.
    Scheduled,
    /// Delivered (or handed off, for the relay backend).
    Sent,
    /// Delivery failed; awaiting reschedule or discard.
    Failed,
    /// Cancelled or abandoned by an operator.
    Discarded,
}

impl ContentStatus {
    /// Stable storage name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Approved => "approved",
            Self::Scheduled => "scheduled",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Discarded => "discarded",
        }
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: ContentStatus) -> bool {
        matches!(
            (self, next),
            (ContentStatus::Draft, ContentStatus::Approved)
                | (ContentStatus::Approved | ContentStatus::Failed, ContentStatus::Scheduled)
                | (
                    ContentStatus::Scheduled,
                    ContentStatus::Sent | ContentStatus::Failed
                )
                | (
                    ContentStatus::Draft
                        | ContentStatus::Approved
                        | ContentStatus::Scheduled
                        | ContentStatus::Failed,
                    ContentStatus::Discarded
                )
        )
    }

    /// Whether no further transitions leave this status.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Sent | Self::Discarded)
    }
}

/// Most recent classified delivery failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LastError {
    /// Classified failure kind.
    pub kind: FailureKind,
    /// Raw message returned by the backend.
    pub message: String,
}

/// The unit of schedulable work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContentItem {
    /// Unique record identifier.
    pub id: String,
    /// Cast whose credentials and preferences apply.
    pub owner_id: String,
    /// Action kind.
    pub kind: ContentKind,
    /// Kind-specific body.
    pub payload: Payload,
    /// Requested backend.
    pub destination: Destination,
    /// Delivery time in the canonical offset.
    pub scheduled_at: Option<DateTime<FixedOffset>>,
    /// Current lifecycle status.
    pub status: ContentStatus,
    /// Number of delivery attempts made.
    pub attempts: u32,
    /// Most recent classified failure.
    pub last_error: Option<LastError>,
    /// Backend-assigned identifier of the delivered artifact.
    pub result_ref: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<FixedOffset>,
    /// Timestamp of the successful delivery.
    pub executed_at: Option<DateTime<FixedOffset>>,
    /// Last write timestamp.
    pub updated_at: DateTime<FixedOffset>,
}

impl ContentItem {
    /// Construct a new draft item with a generated identifier.
    #[must_use]
    pub fn new_draft(
        owner_id: String,
        kind: ContentKind,
        payload: Payload,
        destination: Destination,
        scheduled_at: Option<DateTime<FixedOffset>>,
        now: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id,
            kind,
            payload,
            destination,
            scheduled_at,
            status: ContentStatus::Draft,
            attempts: 0,
            last_error: None,
            result_ref: None,
            created_at: now,
            executed_at: None,
            updated_at: now,
        }
    }

    /// Whether the item is scheduled and its time has come.
    #[must_use]
    pub fn is_due(&self, now: DateTime<FixedOffset>) -> bool {
        self.status == ContentStatus::Scheduled && self.scheduled_at.is_some_and(|at| at <= now)
    }

    /// Whether the last failure was a duplicate action.
    #[must_use]
    pub fn failed_as_duplicate(&self) -> bool {
        self.last_error
            .as_ref()
            .is_some_and(|e| e.kind == FailureKind::DuplicateAction)
    }
}
