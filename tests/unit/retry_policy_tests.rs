use std::time::Duration;

use cast_dispatch::clock::canonical_offset;
use cast_dispatch::config::RetryConfig;
use cast_dispatch::models::failure::FailureKind;
use cast_dispatch::models::item::{
    ContentItem, ContentKind, ContentStatus, Destination, LastError, Payload,
};
use cast_dispatch::policy::retry::{decide, remediation_options, RecoveryAction, Remediation, RetryPolicy};
use chrono::TimeZone;

fn failed_item(kind: ContentKind, error: FailureKind) -> ContentItem {
    let now = canonical_offset()
        .with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
        .unwrap();
    let payload = match kind {
        ContentKind::Post => Payload::Post {
            text: "hello".into(),
            image_refs: vec![],
        },
        ContentKind::Retweet => Payload::Repost {
            target_ref: "42".into(),
            comment: None,
        },
        ContentKind::QuoteRetweet => Payload::Repost {
            target_ref: "42".into(),
            comment: Some("nice".into()),
        },
    };
    let mut item = ContentItem::new_draft("cast-a".into(), kind, payload, Destination::Auto, None, now);
    item.status = ContentStatus::Failed;
    item.attempts = 1;
    item.last_error = Some(LastError {
        kind: error,
        message: "boom".into(),
    });
    item
}

#[test]
fn default_policy_matches_config_defaults() {
    let policy = RetryPolicy::default();
    assert!(!policy.auto_reschedule);
    assert_eq!(
        policy.backoff,
        vec![
            chrono::Duration::hours(1),
            chrono::Duration::hours(6),
            chrono::Duration::hours(24)
        ]
    );
    assert_eq!(policy.max_immediate_retries, 1);
    assert_eq!(policy.immediate_retry_delay, Duration::from_secs(2));
    assert_eq!(policy.transient_reschedule, chrono::Duration::minutes(15));
}

#[test]
fn transient_retries_in_call_then_reschedules() {
    let policy = RetryPolicy::from_config(&RetryConfig {
        max_immediate_retries: 2,
        immediate_retry_delay_ms: 100,
        ..RetryConfig::default()
    });

    assert_eq!(
        decide(FailureKind::Transient, 1, 1, &policy),
        RecoveryAction::RetryNow(Duration::from_millis(100))
    );
    assert_eq!(
        decide(FailureKind::Transient, 2, 2, &policy),
        RecoveryAction::RetryNow(Duration::from_millis(200))
    );
    assert_eq!(
        decide(FailureKind::Transient, 3, 3, &policy),
        RecoveryAction::Reschedule(chrono::Duration::minutes(15))
    );
}

#[test]
fn rate_limit_walks_the_backoff_ladder_and_caps() {
    let policy = RetryPolicy::default();
    let expected = [(1, 1), (2, 6), (3, 24), (4, 24), (50, 24)];
    for (attempts, hours) in expected {
        assert_eq!(
            decide(FailureKind::RateLimited, 1, attempts, &policy),
            RecoveryAction::Reschedule(chrono::Duration::hours(hours)),
            "attempts = {attempts}"
        );
    }
}

#[test]
fn non_recoverable_kinds_are_terminal() {
    let policy = RetryPolicy::default();
    for kind in [
        FailureKind::DuplicateAction,
        FailureKind::AuthFailure,
        FailureKind::NotFound,
        FailureKind::Unknown,
    ] {
        for attempt in 1..4 {
            assert_eq!(
                decide(kind, attempt, attempt, &policy),
                RecoveryAction::FailTerminal
            );
        }
    }
}

#[test]
fn auto_reschedule_requires_flag_and_budget() {
    let mut policy = RetryPolicy::default();
    assert!(!policy.allows_auto_reschedule(1));

    policy.auto_reschedule = true;
    policy.max_auto_reschedules = 2;
    assert!(policy.allows_auto_reschedule(1));
    assert!(policy.allows_auto_reschedule(2));
    assert!(!policy.allows_auto_reschedule(3));
}

#[test]
fn remediation_options_per_failure_kind() {
    assert_eq!(
        remediation_options(&failed_item(ContentKind::Post, FailureKind::RateLimited)),
        vec![
            Remediation::RetryAfter { hours: 1 },
            Remediation::RetryAfter { hours: 6 }
        ]
    );
    assert_eq!(
        remediation_options(&failed_item(
            ContentKind::Retweet,
            FailureKind::DuplicateAction
        )),
        vec![Remediation::Discard, Remediation::ConvertToQuote]
    );
    assert_eq!(
        remediation_options(&failed_item(
            ContentKind::QuoteRetweet,
            FailureKind::DuplicateAction
        )),
        vec![Remediation::Discard]
    );
    assert_eq!(
        remediation_options(&failed_item(ContentKind::Post, FailureKind::AuthFailure))[0],
        Remediation::ReconfigureCredentials
    );
    assert_eq!(
        remediation_options(&failed_item(ContentKind::Retweet, FailureKind::NotFound)),
        vec![Remediation::Discard]
    );
    assert_eq!(
        remediation_options(&failed_item(ContentKind::Post, FailureKind::Unknown)),
        vec![Remediation::RetryAfter { hours: 1 }, Remediation::Discard]
    );
}

#[test]
fn duplicate_failures_never_offer_a_retry() {
    for kind in [
        ContentKind::Post,
        ContentKind::Retweet,
        ContentKind::QuoteRetweet,
    ] {
        let options = remediation_options(&failed_item(kind, FailureKind::DuplicateAction));
        assert!(options
            .iter()
            .all(|o| !matches!(o, Remediation::RetryAfter { .. })));
    }
}

#[test]
fn items_that_are_not_failed_have_no_options() {
    let mut item = failed_item(ContentKind::Post, FailureKind::RateLimited);
    item.status = ContentStatus::Scheduled;
    assert!(remediation_options(&item).is_empty());
}

#[test]
fn remediation_labels_are_human_readable() {
    assert_eq!(Remediation::RetryAfter { hours: 6 }.label(), "retry in 6h");
    assert_eq!(Remediation::ConvertToQuote.label(), "convert to quote retweet");
}
