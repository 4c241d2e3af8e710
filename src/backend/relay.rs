//! Tabular relay backend.
//!
//! Appends one row per item to an owner's relay spreadsheet through an HTTP
//! append endpoint. A third-party automation watches the sheet and performs
//! the remote action later, so success here means "handed off", never
//! "published".

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{info, info_span, Instrument};

use super::http::{expect_accepted, post_json};
use super::{BackendFuture, DeliveryBackend, DeliveryFailure, DeliveryOutcome, DeliveryResult};
use crate::clock::{wall_time, Clock};
use crate::config::EndpointConfig;
use crate::credentials::CredentialClientPool;
use crate::models::failure::FailureKind;
use crate::models::history::Backend;
use crate::models::item::{ContentItem, Payload};

/// Worksheet receiving original posts.
pub const POSTS_WORKSHEET: &str = "posts";
/// Worksheet receiving retweets and quote retweets.
pub const RETWEETS_WORKSHEET: &str = "retweets";
/// Status written to new retweet rows; the automation updates it.
pub const PENDING_STATUS: &str = "pending";

const IMAGE_COLUMNS: usize = 4;

/// Worksheet and ordered cell values for one relay row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayRow {
    /// Target worksheet.
    pub worksheet: &'static str,
    /// Cells in column order.
    pub values: Vec<String>,
}

/// Build the relay row for `item`.
///
/// Post rows are `[datetime, content, display_name, image_url_1..4]`;
/// retweet rows are `[execution_datetime, tweet_id, comment, status,
/// completion_datetime]`. Datetimes are wall-clock in the canonical offset.
#[must_use]
pub fn relay_row(item: &ContentItem, display_name: &str, clock: &dyn Clock) -> RelayRow {
    let when = wall_time(&item.scheduled_at.unwrap_or_else(|| clock.now()), clock.offset());

    match &item.payload {
        Payload::Post { text, image_refs } => {
            let mut values = vec![when, text.trim().to_owned(), display_name.to_owned()];
            values.extend(
                (0..IMAGE_COLUMNS).map(|i| image_refs.get(i).cloned().unwrap_or_default()),
            );
            RelayRow {
                worksheet: POSTS_WORKSHEET,
                values,
            }
        }
        Payload::Repost { target_ref, .. } => RelayRow {
            worksheet: RETWEETS_WORKSHEET,
            values: vec![
                when,
                target_ref.clone(),
                item.payload.comment().unwrap_or_default().to_owned(),
                PENDING_STATUS.to_owned(),
                String::new(),
            ],
        },
    }
}

/// Adapter appending rows to the owner's relay spreadsheet.
pub struct RelayAdapter {
    endpoint: String,
    timeout: Duration,
    pool: Arc<CredentialClientPool>,
    clock: Arc<dyn Clock>,
}

impl RelayAdapter {
    /// Create an adapter appending through `config.endpoint`.
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

impl DeliveryBackend for RelayAdapter {
    fn backend(&self) -> Backend {
        Backend::Relay
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn is_configured_for<'a>(&'a self, owner_id: &'a str) -> BackendFuture<'a, bool> {
        Box::pin(async move { self.pool.get(owner_id).await.is_ok() })
    }

    fn deliver<'a>(&'a self, item: &'a ContentItem) -> BackendFuture<'a, DeliveryResult> {
        let span = info_span!("relay_deliver", item_id = %item.id, owner_id = %item.owner_id);
        Box::pin(
            async move {
                let client = self.pool.get(&item.owner_id).await.map_err(|err| {
                    DeliveryFailure::classified(FailureKind::AuthFailure, err.to_string())
                })?;
                let sheet = client.credentials.relay_sheet.as_str();
                let row = relay_row(item, &client.credentials.display_name, self.clock.as_ref());

                let body = json!({
                    "spreadsheet": sheet,
                    "worksheet": row.worksheet,
                    "values": [row.values],
                });
                let (status, text) =
                    post_json(&client.http, &self.endpoint, &body, self.timeout).await?;
                let envelope = expect_accepted(status, &text)?;

                let remote_ref = envelope
                    .updated_range
                    .unwrap_or_else(|| format!("relay:{sheet}/{}", row.worksheet));
                info!(%remote_ref, "row handed off to relay");
                Ok(DeliveryOutcome { remote_ref })
            }
            .instrument(span),
        )
    }
}
