//! Direct executor backend.
//!
//! Posts a JSON command to a remote executor that performs the action
//! synchronously and reports the resulting tweet id.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{info_span, warn, Instrument};

use super::http::{expect_success, post_json};
use super::{BackendFuture, DeliveryBackend, DeliveryFailure, DeliveryOutcome, DeliveryResult};
use crate::config::EndpointConfig;
use crate::credentials::CredentialClientPool;
use crate::models::failure::FailureKind;
use crate::models::history::Backend;
use crate::models::item::{ContentItem, ContentKind, Payload};

/// Adapter for the synchronous remote executor.
pub struct DirectApiAdapter {
    endpoint: String,
    timeout: Duration,
    pool: Arc<CredentialClientPool>,
}

impl DirectApiAdapter {
    /// Create an adapter posting to `config.endpoint` with owner clients from `pool`.
    #[must_use]
    pub fn new(config: &EndpointConfig, pool: Arc<CredentialClientPool>) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            timeout: config.timeout(),
            pool,
        }
    }
}

/// Build the executor command for `item`.
///
/// # Errors
///
/// Returns a failure if the payload shape does not match the item kind.
pub fn command_body(item: &ContentItem, account_id: &str) -> Result<Value, DeliveryFailure> {
    match (item.kind, &item.payload) {
        (ContentKind::Post, Payload::Post { text, image_refs }) => {
            let mut body = json!({
                "action": "post",
                "account_id": account_id,
                "text": text.trim(),
            });
            match image_refs.as_slice() {
                [] => {}
                [image] => body["image_url"] = Value::String(image.clone()),
                _ => {
                    return Err(DeliveryFailure::classified(
                        FailureKind::Unknown,
                        format!(
                            "direct executor accepts one image, post has {}",
                            image_refs.len()
                        ),
                    ));
                }
            }
            Ok(body)
        }
        (ContentKind::Retweet, Payload::Repost { target_ref, .. }) => Ok(json!({
            "action": "retweet",
            "account_id": account_id,
            "tweet_id": target_ref,
        })),
        (ContentKind::QuoteRetweet, Payload::Repost { target_ref, .. }) => Ok(json!({
            "action": "quote_tweet",
            "account_id": account_id,
            "tweet_id": target_ref,
            "comment": item.payload.comment().unwrap_or_default(),
        })),
        _ => Err(DeliveryFailure::classified(
            FailureKind::Unknown,
            format!("payload does not match kind {}", item.kind.as_str()),
        )),
    }
}

impl DeliveryBackend for DirectApiAdapter {
    fn backend(&self) -> Backend {
        Backend::DirectApi
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn is_configured_for<'a>(&'a self, owner_id: &'a str) -> BackendFuture<'a, bool> {
        Box::pin(async move {
            match self.pool.get(owner_id).await {
                Ok(client) => client.credentials.direct_account().is_some(),
                Err(err) => {
                    warn!(owner_id, %err, "owner credentials unavailable");
                    false
                }
            }
        })
    }

    fn deliver<'a>(&'a self, item: &'a ContentItem) -> BackendFuture<'a, DeliveryResult> {
        let span = info_span!("direct_api_deliver", item_id = %item.id, owner_id = %item.owner_id);
        Box::pin(
            async move {
                let client = self.pool.get(&item.owner_id).await.map_err(|err| {
                    DeliveryFailure::classified(FailureKind::AuthFailure, err.to_string())
                })?;
                let account_id = client.credentials.direct_account().ok_or_else(|| {
                    DeliveryFailure::classified(
                        FailureKind::AuthFailure,
                        format!("direct api not configured for owner {}", item.owner_id),
                    )
                })?;

                let body = command_body(item, account_id)?;
                let (status, text) =
                    post_json(&client.http, &self.endpoint, &body, self.timeout).await?;
                let envelope = expect_success(status, &text)?;

                match (envelope.tweet_id, item.kind) {
                    (Some(tweet_id), _) => Ok(DeliveryOutcome {
                        remote_ref: tweet_id,
                    }),
                    (None, ContentKind::Retweet) => Ok(DeliveryOutcome {
                        remote_ref: item.payload.target_ref().unwrap_or_default().to_owned(),
                    }),
                    (None, _) => Err(DeliveryFailure::classified(
                        FailureKind::Unknown,
                        "executor reported success without a tweet_id",
                    )),
                }
            }
            .instrument(span),
        )
    }
}
