//! Delivery backends.
//!
//! Every transport implements [`DeliveryBackend`]. Backends never return
//! [`AppError`](crate::AppError) from a delivery: network errors, remote
//! rejections, and malformed responses all come back as a
//! [`DeliveryFailure`] value for the classifier to interpret.

pub mod direct_api;
mod http;
pub mod relay;
pub mod webhook;

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::models::failure::FailureKind;
use crate::models::history::Backend;
use crate::models::item::ContentItem;

pub use direct_api::DirectApiAdapter;
pub use relay::RelayAdapter;
pub use webhook::WebhookAdapter;

/// Request timeout used when a backend does not override it.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Boxed future returned by backend operations.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Successful hand-off to a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    /// Backend-assigned identifier of the delivered artifact.
    pub remote_ref: String,
}

/// A failed delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryFailure {
    /// Kind assigned by the backend itself, bypassing message classification.
    pub kind: Option<FailureKind>,
    /// HTTP status returned by the remote side, if any.
    pub http_status: Option<u16>,
    /// Raw failure text.
    pub message: String,
}

impl DeliveryFailure {
    /// Failure to be classified from its message alone.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: None,
            http_status: None,
            message: message.into(),
        }
    }

    /// Failure carrying the remote HTTP status.
    #[must_use]
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: None,
            http_status: Some(status),
            message: message.into(),
        }
    }

    /// Network-level failure (timeout, refused or reset connection).
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: Some(FailureKind::Transient),
            http_status: None,
            message: message.into(),
        }
    }

    /// Failure with a kind decided by the backend.
    #[must_use]
    pub fn classified(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind: Some(kind),
            http_status: None,
            message: message.into(),
        }
    }
}

impl Display for DeliveryFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.http_status {
            Some(status) => write!(f, "{status} {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Result of one delivery attempt.
pub type DeliveryResult = std::result::Result<DeliveryOutcome, DeliveryFailure>;

/// A concrete transport capable of delivering content items.
pub trait DeliveryBackend: Send + Sync {
    /// Which backend this is, for history and logging.
    fn backend(&self) -> Backend;

    /// Upper bound for a single delivery attempt.
    fn timeout(&self) -> Duration {
        DEFAULT_TIMEOUT
    }

    /// Whether the owner has what this backend needs to deliver for them.
    fn is_configured_for<'a>(&'a self, owner_id: &'a str) -> BackendFuture<'a, bool>;

    /// Attempt delivery of `item`.
    fn deliver<'a>(&'a self, item: &'a ContentItem) -> BackendFuture<'a, DeliveryResult>;
}

/// The backends available to a dispatcher. Any of them may be absent.
#[derive(Clone, Default)]
pub struct BackendSet {
    direct_api: Option<Arc<dyn DeliveryBackend>>,
    relay: Option<Arc<dyn DeliveryBackend>>,
    webhook: Option<Arc<dyn DeliveryBackend>>,
}

impl BackendSet {
    /// Empty set; every destination is unconfigured.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the direct executor.
    #[must_use]
    pub fn with_direct_api(mut self, backend: Arc<dyn DeliveryBackend>) -> Self {
        self.direct_api = Some(backend);
        self
    }

    /// Register the tabular relay.
    #[must_use]
    pub fn with_relay(mut self, backend: Arc<dyn DeliveryBackend>) -> Self {
        self.relay = Some(backend);
        self
    }

    /// Register the automation webhook.
    #[must_use]
    pub fn with_webhook(mut self, backend: Arc<dyn DeliveryBackend>) -> Self {
        self.webhook = Some(backend);
        self
    }

    /// Backend registered for `backend`, if any.
    #[must_use]
    pub fn get(&self, backend: Backend) -> Option<&Arc<dyn DeliveryBackend>> {
        match backend {
            Backend::DirectApi => self.direct_api.as_ref(),
            Backend::Relay => self.relay.as_ref(),
            Backend::Webhook => self.webhook.as_ref(),
        }
    }
}
