//! Remote automation webhook backend.
//!
//! Posts a structured repost command. The endpoint either executes the
//! action immediately or, for future-dated retweets, schedules itself and
//! returns a trigger id.

use std::sync::Arc;
use std::time::Duration;

use chrono::SecondsFormat;
use serde_json::{json, Value};
use tracing::{info_span, Instrument};

use super::http::{expect_success, post_json};
use super::{BackendFuture, DeliveryBackend, DeliveryFailure, DeliveryOutcome, DeliveryResult};
use crate::clock::Clock;
use crate::config::EndpointConfig;
use crate::credentials::CredentialClientPool;
use crate::models::failure::FailureKind;
use crate::models::history::Backend;
use crate::models::item::{ContentItem, ContentKind, Payload};

/// Build the webhook command for `item` as seen at the clock's current instant.
///
/// # Errors
///
/// Returns a failure for original posts, which the automation cannot perform.
pub fn command_body(
    item: &ContentItem,
    cast_name: &str,
    clock: &dyn Clock,
) -> Result<Value, DeliveryFailure> {
    let Payload::Repost { target_ref, .. } = &item.payload else {
        return Err(DeliveryFailure::classified(
            FailureKind::Unknown,
            "webhook backend only accepts retweets and quote retweets",
        ));
    };

    match item.kind {
        ContentKind::Retweet => match item.scheduled_at.filter(|at| *at > clock.now()) {
            Some(at) => Ok(json!({
                "action": "schedule_retweet",
                "tweet_id": target_ref,
                "scheduled_at": at
                    .with_timezone(&clock.offset())
                    .to_rfc3339_opts(SecondsFormat::Secs, false),
                "cast_name": cast_name,
            })),
            None => Ok(json!({
                "action": "retweet",
                "tweet_id": target_ref,
                "cast_name": cast_name,
            })),
        },
        ContentKind::QuoteRetweet => Ok(json!({
            "action": "quote_tweet",
            "tweet_id": target_ref,
            "comment": item.payload.comment().unwrap_or_default(),
            "cast_name": cast_name,
        })),
        ContentKind::Post => Err(DeliveryFailure::classified(
            FailureKind::Unknown,
            "webhook backend only accepts retweets and quote retweets",
        )),
    }
}

/// Adapter for the remote automation endpoint.
pub struct WebhookAdapter {
    endpoint: String,
    timeout: Duration,
    pool: Arc<CredentialClientPool>,
    clock: Arc<dyn Clock>,
}

impl WebhookAdapter {
    /// Create an adapter posting to `config.endpoint`.
    #[must_use]
    pub fn new(
        config: &EndpointConfig,
        pool: Arc<CredentialClientPool>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            timeout: config.timeout(),
            pool,
            clock,
        }
    }
}

impl DeliveryBackend for WebhookAdapter {
    fn backend(&self) -> Backend {
        Backend::Webhook
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn is_configured_for<'a>(&'a self, owner_id: &'a str) -> BackendFuture<'a, bool> {
        Box::pin(async move { self.pool.get(owner_id).await.is_ok() })
    }

    fn deliver<'a>(&'a self, item: &'a ContentItem) -> BackendFuture<'a, DeliveryResult> {
        let span = info_span!("webhook_deliver", item_id = %item.id, owner_id = %item.owner_id);
        Box::pin(
            async move {
                let client = self.pool.get(&item.owner_id).await.map_err(|err| {
                    DeliveryFailure::classified(FailureKind::AuthFailure, err.to_string())
                })?;
                let body = command_body(item, &client.credentials.display_name, self.clock.as_ref())?;
                let (status, text) =
                    post_json(&client.http, &self.endpoint, &body, self.timeout).await?;
                let envelope = expect_success(status, &text)?;

                envelope
                    .data
                    .as_ref()
                    .and_then(|data| data.get("trigger_id"))
                    .and_then(Value::as_str)
                    .map(|trigger_id| DeliveryOutcome {
                        remote_ref: trigger_id.to_owned(),
                    })
                    .ok_or_else(|| {
                        DeliveryFailure::classified(
                            FailureKind::Unknown,
                            "webhook reported success without data.trigger_id",
                        )
                    })
            }
            .instrument(span),
        )
    }
}
