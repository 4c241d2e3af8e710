//! Operator lifecycle flows through the item manager.
//!
//! Validates:
//! - Drafts are validated before they are stored
//! - Approval and scheduling follow the lifecycle in order
//! - Discard and purge respect leases and keep delivery history

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use cast_dispatch::backend::{BackendSet, DeliveryFailure};
use cast_dispatch::content::TextGenerator;
use cast_dispatch::models::history::Backend;
use cast_dispatch::models::item::{ContentKind, ContentStatus, Destination, Payload};
use cast_dispatch::orchestrator::item_manager::NewItem;
use cast_dispatch::policy::retry::RetryPolicy;
use cast_dispatch::{AppError, Result};

use super::test_helpers::{post, quote, retweet, shared, t0, Harness, StubBackend};

fn new_item(kind: ContentKind, payload: Payload, destination: Destination) -> NewItem {
    NewItem {
        owner_id: "cast-a".into(),
        kind,
        payload,
        destination,
        scheduled_at: None,
    }
}

#[tokio::test]
async fn invalid_drafts_are_rejected() {
    let h = Harness::new().await;

    let cases = [
        NewItem {
            owner_id: "  ".into(),
            ..new_item(ContentKind::Post, post("hi"), Destination::Relay)
        },
        new_item(ContentKind::Post, post(&"x".repeat(281)), Destination::Relay),
        new_item(ContentKind::Retweet, quote("1", "nice"), Destination::DirectApi),
        new_item(ContentKind::QuoteRetweet, retweet("1"), Destination::DirectApi),
        new_item(ContentKind::Post, post("hi"), Destination::Webhook),
        new_item(ContentKind::Post, retweet("1"), Destination::Relay),
        new_item(ContentKind::Retweet, retweet(" "), Destination::Relay),
    ];

    for case in cases {
        let err = h.manager.create_draft(case.clone()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)), "{case:?}: {err}");
    }
    assert!(h.manager.list_by_owner("cast-a").await.unwrap().is_empty());
}

#[tokio::test]
async fn draft_to_scheduled_flow() {
    let h = Harness::new().await;
    let later = t0() + chrono::Duration::hours(2);
    let draft = h
        .manager
        .create_draft(NewItem {
            scheduled_at: Some(later),
            ..new_item(ContentKind::Post, post("evening post"), Destination::Relay)
        })
        .await
        .unwrap();
    assert_eq!(draft.status, ContentStatus::Draft);

    let err = h.manager.schedule(&draft.id, None).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)), "drafts cannot be scheduled");

    let approved = h.manager.approve(&draft.id).await.unwrap();
    assert_eq!(approved.status, ContentStatus::Approved);
    assert!(matches!(
        h.manager.approve(&draft.id).await.unwrap_err(),
        AppError::Conflict(_)
    ));

    let outcome = h.manager.schedule(&draft.id, None).await.unwrap();
    assert_eq!(outcome.item.status, ContentStatus::Scheduled);
    assert_eq!(outcome.item.scheduled_at, Some(later));
    assert!(!outcome.due);

    assert_eq!(
        h.manager
            .list_by_status(ContentStatus::Scheduled)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn scheduling_needs_a_time_and_past_times_are_due() {
    let h = Harness::new().await;
    let draft = h
        .manager
        .create_draft(new_item(ContentKind::Retweet, retweet("5"), Destination::Relay))
        .await
        .unwrap();
    h.manager.approve(&draft.id).await.unwrap();

    let err = h.manager.schedule(&draft.id, None).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let outcome = h
        .manager
        .schedule(&draft.id, Some(t0() - chrono::Duration::hours(1)))
        .await
        .unwrap();
    assert!(outcome.due);
}

#[tokio::test]
async fn reschedule_requires_a_failed_item_and_a_future_time() {
    let h = Harness::new().await;
    let direct = Arc::new(StubBackend::failing(
        Backend::DirectApi,
        DeliveryFailure::http(500, "upstream exploded"),
    ));
    let dispatcher = h.dispatcher(
        BackendSet::new().with_direct_api(shared(&direct)),
        RetryPolicy::default(),
    );
    let item = h
        .scheduled_retweet("1", Destination::DirectApi, t0())
        .await;

    let err = h
        .manager
        .reschedule_at(&item.id, t0() + chrono::Duration::hours(1))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)), "scheduled items are not failed");

    dispatcher.dispatch(&item.id).await.unwrap();
    let now = t0();

    let err = h.manager.reschedule_at(&item.id, now).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
    let err = h
        .manager
        .reschedule_after(&item.id, chrono::Duration::zero())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let moved = h
        .manager
        .reschedule_at(&item.id, now + chrono::Duration::minutes(10))
        .await
        .unwrap();
    assert_eq!(moved.status, ContentStatus::Scheduled);
    assert!(moved.last_error.is_none());
}

#[tokio::test]
async fn discard_respects_status_and_leases() {
    let h = Harness::new().await;
    let direct = Arc::new(StubBackend::succeeding(Backend::DirectApi, "1"));
    let dispatcher = h.dispatcher(
        BackendSet::new().with_direct_api(shared(&direct)),
        RetryPolicy::default(),
    );

    let scheduled = h
        .scheduled_retweet("1", Destination::DirectApi, t0() + chrono::Duration::hours(1))
        .await;
    let discarded = h.manager.discard(&scheduled.id).await.unwrap();
    assert_eq!(discarded.status, ContentStatus::Discarded);
    assert!(matches!(
        h.manager.discard(&scheduled.id).await.unwrap_err(),
        AppError::InvalidTransition(_)
    ));

    let leased = h
        .scheduled_retweet("2", Destination::DirectApi, t0())
        .await;
    h.items
        .claim(&leased.id, "worker", t0(), t0() + chrono::Duration::minutes(5))
        .await
        .unwrap();
    assert!(matches!(
        h.manager.discard(&leased.id).await.unwrap_err(),
        AppError::Conflict(_)
    ));
    h.items.release_claim(&leased.id, "worker").await.unwrap();

    dispatcher.dispatch(&leased.id).await.unwrap();
    assert!(matches!(
        h.manager.discard(&leased.id).await.unwrap_err(),
        AppError::InvalidTransition(_)
    ));
}

#[tokio::test]
async fn purge_deletes_discarded_items_but_keeps_history() {
    let h = Harness::new().await;
    let direct = Arc::new(StubBackend::failing(
        Backend::DirectApi,
        DeliveryFailure::http(404, "tweet does not exist"),
    ));
    let dispatcher = h.dispatcher(
        BackendSet::new().with_direct_api(shared(&direct)),
        RetryPolicy::default(),
    );
    let item = h
        .scheduled_retweet("gone", Destination::DirectApi, t0())
        .await;
    dispatcher.dispatch(&item.id).await.unwrap();

    assert!(matches!(
        h.manager.purge(&item.id).await.unwrap_err(),
        AppError::InvalidTransition(_)
    ));

    h.manager.discard(&item.id).await.unwrap();
    h.manager.purge(&item.id).await.unwrap();

    assert!(matches!(
        h.manager.get(&item.id).await.unwrap_err(),
        AppError::NotFound(_)
    ));
    assert_eq!(h.manager.history(&item.id).await.unwrap().len(), 1);
    assert!(matches!(
        h.manager.purge(&item.id).await.unwrap_err(),
        AppError::NotFound(_)
    ));
}

struct CannedGenerator(&'static str);

impl TextGenerator for CannedGenerator {
    fn generate<'a>(
        &'a self,
        _prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move { Ok(self.0.to_owned()) })
    }
}

#[tokio::test]
async fn generated_text_is_sanitised_into_a_draft() {
    let h = Harness::new().await;
    let generator = CannedGenerator("# Draft\nName: Hana\n\"Rainy day, coffee time.\"\n---");

    let draft = h
        .manager
        .draft_from_generator(&generator, "write a post", "cast-a", Destination::Relay)
        .await
        .unwrap();
    assert_eq!(draft.kind, ContentKind::Post);
    assert_eq!(draft.status, ContentStatus::Draft);
    assert_eq!(draft.payload, post("Rainy day, coffee time."));

    let empty = CannedGenerator("## heading only\n---");
    let err = h
        .manager
        .draft_from_generator(&empty, "write a post", "cast-a", Destination::Relay)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}
