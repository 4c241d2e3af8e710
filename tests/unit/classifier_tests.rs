use cast_dispatch::backend::DeliveryFailure;
use cast_dispatch::models::failure::FailureKind;
use cast_dispatch::policy::classifier::{classify, classify_failure};

#[test]
fn rate_limits_by_status_and_message() {
    assert_eq!(classify(Some(429), ""), FailureKind::RateLimited);
    assert_eq!(
        classify(Some(429), "rate limit exceeded"),
        FailureKind::RateLimited
    );
    assert_eq!(classify(None, "Too Many Requests"), FailureKind::RateLimited);
    assert_eq!(
        classify(Some(500), "RESOURCE_EXHAUSTED: try later"),
        FailureKind::RateLimited
    );
}

#[test]
fn duplicate_message_beats_forbidden_status() {
    assert_eq!(
        classify(Some(403), "You have already retweeted this Tweet."),
        FailureKind::DuplicateAction
    );
    assert_eq!(
        classify(Some(403), "Status is a duplicate."),
        FailureKind::DuplicateAction
    );
}

#[test]
fn auth_failures() {
    assert_eq!(classify(Some(401), ""), FailureKind::AuthFailure);
    assert_eq!(classify(Some(403), "Forbidden"), FailureKind::AuthFailure);
    assert_eq!(
        classify(None, "client-not-enrolled: not attached to a project"),
        FailureKind::AuthFailure
    );
    assert_eq!(
        classify(
            Some(403),
            "you must use keys and tokens from a developer App that is attached to a Project"
        ),
        FailureKind::AuthFailure
    );
    assert_eq!(
        classify(None, "direct api not configured for owner a"),
        FailureKind::AuthFailure
    );
    assert_eq!(classify(Some(400), "invalid token"), FailureKind::AuthFailure);
}

#[test]
fn not_found() {
    assert_eq!(classify(Some(404), ""), FailureKind::NotFound);
    assert_eq!(
        classify(Some(400), "No status found with that ID."),
        FailureKind::NotFound
    );
    assert_eq!(
        classify(None, "the tweet does not exist"),
        FailureKind::NotFound
    );
}

#[test]
fn server_errors_and_timeout_text_are_never_transient() {
    for status in [500, 502, 503, 504] {
        assert_eq!(classify(Some(status), ""), FailureKind::Unknown);
    }
    assert_eq!(
        classify(Some(500), "Internal Server Error"),
        FailureKind::Unknown
    );
    assert_eq!(
        classify(None, "upstream timeout while posting"),
        FailureKind::Unknown
    );
    assert_eq!(
        classify(Some(502), "connection reset by peer"),
        FailureKind::Unknown
    );
}

#[test]
fn everything_else_is_unknown() {
    assert_eq!(classify(None, ""), FailureKind::Unknown);
    assert_eq!(classify(Some(418), "I'm a teapot"), FailureKind::Unknown);
    assert_eq!(classify(Some(200), "weird body"), FailureKind::Unknown);
}

#[test]
fn classification_is_total_and_deterministic() {
    let statuses = [
        None,
        Some(0),
        Some(200),
        Some(301),
        Some(400),
        Some(401),
        Some(403),
        Some(404),
        Some(429),
        Some(500),
        Some(599),
        Some(u16::MAX),
    ];
    let messages = [
        "",
        " ",
        "rate limit",
        "already retweeted",
        "forbidden",
        "not found",
        "timed out",
        "🙂 ユニコード",
        "\u{0}",
    ];

    for status in statuses {
        for message in messages {
            let first = classify(status, message);
            assert!(FailureKind::ALL.contains(&first));
            assert_ne!(first, FailureKind::Transient);
            assert_eq!(first, classify(status, message));
        }
    }
}

#[test]
fn preclassified_failures_keep_their_kind() {
    let failure = DeliveryFailure::transient("already retweeted");
    assert_eq!(classify_failure(&failure), FailureKind::Transient);

    let raw = DeliveryFailure::http(429, "slow down");
    assert_eq!(classify_failure(&raw), FailureKind::RateLimited);
}
