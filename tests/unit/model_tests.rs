use cast_dispatch::clock::canonical_offset;
use cast_dispatch::models::failure::FailureKind;
use cast_dispatch::models::item::{
    ContentItem, ContentKind, ContentStatus, Destination, LastError, Payload,
};
use chrono::TimeZone;

const ALL_STATUSES: [ContentStatus; 6] = [
    ContentStatus::Draft,
    ContentStatus::Approved,
    ContentStatus::Scheduled,
    ContentStatus::Sent,
    ContentStatus::Failed,
    ContentStatus::Discarded,
];

#[test]
fn lifecycle_edges() {
    use ContentStatus::{Approved, Discarded, Draft, Failed, Scheduled, Sent};

    let allowed = [
        (Draft, Approved),
        (Approved, Scheduled),
        (Scheduled, Sent),
        (Scheduled, Failed),
        (Failed, Scheduled),
        (Draft, Discarded),
        (Approved, Discarded),
        (Scheduled, Discarded),
        (Failed, Discarded),
    ];

    for from in ALL_STATUSES {
        for to in ALL_STATUSES {
            assert_eq!(
                from.can_transition_to(to),
                allowed.contains(&(from, to)),
                "{} -> {}",
                from.as_str(),
                to.as_str()
            );
        }
    }
}

#[test]
fn terminal_statuses_have_no_exits() {
    for status in ALL_STATUSES {
        if status.is_terminal() {
            assert!(ALL_STATUSES.iter().all(|next| !status.can_transition_to(*next)));
        }
    }
    assert!(ContentStatus::Sent.is_terminal());
    assert!(ContentStatus::Discarded.is_terminal());
    assert!(!ContentStatus::Failed.is_terminal());
}

#[test]
fn failure_kind_names_round_trip() {
    for kind in FailureKind::ALL {
        assert_eq!(FailureKind::parse(kind.as_str()), Some(kind));
    }
    assert_eq!(FailureKind::parse("rate_limited"), Some(FailureKind::RateLimited));
    assert_eq!(FailureKind::parse("bogus"), None);
}

#[test]
fn payload_serialises_as_tagged_union() {
    let post = Payload::Post {
        text: "hi".into(),
        image_refs: vec!["https://img/1.png".into()],
    };
    let json = serde_json::to_value(&post).unwrap();
    assert_eq!(json["type"], "post");
    assert_eq!(json["image_refs"][0], "https://img/1.png");

    let repost: Payload =
        serde_json::from_str(r#"{"type":"repost","target_ref":"99"}"#).unwrap();
    assert_eq!(repost.target_ref(), Some("99"));
    assert_eq!(repost.comment(), None);
}

#[test]
fn blank_comment_counts_as_none() {
    let repost = Payload::Repost {
        target_ref: "1".into(),
        comment: Some("   ".into()),
    };
    assert_eq!(repost.comment(), None);
    assert!(ContentKind::QuoteRetweet.is_repost());
    assert!(!ContentKind::Post.is_repost());
}

#[test]
fn new_draft_and_due_predicate() {
    let now = canonical_offset()
        .with_ymd_and_hms(2026, 1, 1, 9, 0, 0)
        .unwrap();
    let mut item = ContentItem::new_draft(
        "cast".into(),
        ContentKind::Retweet,
        Payload::Repost {
            target_ref: "1".into(),
            comment: None,
        },
        Destination::Relay,
        Some(now),
        now,
    );

    assert_eq!(item.status, ContentStatus::Draft);
    assert_eq!(item.attempts, 0);
    assert!(uuid::Uuid::parse_str(&item.id).is_ok());
    assert!(!item.is_due(now), "drafts are never due");

    item.status = ContentStatus::Scheduled;
    assert!(item.is_due(now));
    assert!(!item.is_due(now - chrono::Duration::seconds(1)));

    assert!(!item.failed_as_duplicate());
    item.last_error = Some(LastError {
        kind: FailureKind::DuplicateAction,
        message: "already retweeted".into(),
    });
    assert!(item.failed_as_duplicate());
}
