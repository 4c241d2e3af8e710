//! Per-owner credential lookup and authenticated client pool.
//!
//! Credentials are supplied by an external [`CredentialSource`]; the engine
//! never mutates them. [`CredentialClientPool`] caches one authenticated
//! HTTP client per owner and exposes explicit invalidation so a
//! reconfigured owner can be picked up without restarting.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::{load_owner_token, OwnerConfig};
use crate::{AppError, Result};

/// Resolved delivery identity for one owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerCredentials {
    /// Owner identifier.
    pub owner_id: String,
    /// Remote account handle for the direct executor.
    pub account_id: Option<String>,
    /// Human-facing name.
    pub display_name: String,
    /// Relay spreadsheet name.
    pub relay_sheet: String,
    /// Whether the direct executor is enabled for this owner.
    pub direct_api: bool,
    /// Bearer token sent to HTTP backends, if any.
    pub api_token: Option<String>,
}

impl OwnerCredentials {
    /// Account id, when the direct executor is usable for this owner.
    #[must_use]
    pub fn direct_account(&self) -> Option<&str> {
        if self.direct_api {
            self.account_id.as_deref()
        } else {
            None
        }
    }
}

/// Lookup service for owner credentials.
pub trait CredentialSource: Send + Sync {
    /// Resolve credentials for `owner_id`; `Ok(None)` for unknown owners.
    fn lookup<'a>(
        &'a self,
        owner_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<OwnerCredentials>>> + Send + 'a>>;
}

/// Credential source backed by the `[[owners]]` config table, with tokens
/// from the OS keychain or environment.
pub struct ConfigCredentialSource {
    owners: HashMap<String, OwnerConfig>,
    use_keychain: bool,
}

impl ConfigCredentialSource {
    /// Build a source from configured owners.
    #[must_use]
    pub fn new(owners: &[OwnerConfig], use_keychain: bool) -> Self {
        Self {
            owners: owners.iter().map(|o| (o.id.clone(), o.clone())).collect(),
            use_keychain,
        }
    }
}

impl CredentialSource for ConfigCredentialSource {
    fn lookup<'a>(
        &'a self,
        owner_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<OwnerCredentials>>> + Send + 'a>> {
        Box::pin(async move {
            let Some(owner) = self.owners.get(owner_id) else {
                return Ok(None);
            };
            let api_token = load_owner_token(owner_id, self.use_keychain).await?;
            Ok(Some(OwnerCredentials {
                owner_id: owner.id.clone(),
                account_id: owner.account_id.clone(),
                display_name: owner.display_name.clone(),
                relay_sheet: owner.relay_sheet.clone().unwrap_or_else(|| owner.id.clone()),
                direct_api: owner.direct_api,
                api_token,
            }))
        })
    }
}

/// Authenticated client bound to one owner.
#[derive(Debug)]
pub struct OwnerClient {
    /// Credentials the client was built from.
    pub credentials: OwnerCredentials,
    /// HTTP client carrying the owner's authorization header.
    pub http: reqwest::Client,
}

/// Cache of authenticated clients keyed by owner id.
pub struct CredentialClientPool {
    source: Arc<dyn CredentialSource>,
    timeout: Duration,
    clients: RwLock<HashMap<String, Arc<OwnerClient>>>,
}

impl CredentialClientPool {
    /// Create an empty pool. `timeout` bounds every request made by pooled clients.
    #[must_use]
    pub fn new(source: Arc<dyn CredentialSource>, timeout: Duration) -> Self {
        Self {
            source,
            timeout,
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Client for `owner_id`, building and caching it on first use.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Credential` if the owner is unknown or the client
    /// cannot be built.
    pub async fn get(&self, owner_id: &str) -> Result<Arc<OwnerClient>> {
        if let Some(client) = self.clients.read().await.get(owner_id) {
            return Ok(Arc::clone(client));
        }

        let credentials = self
            .source
            .lookup(owner_id)
            .await?
            .ok_or_else(|| AppError::Credential(format!("owner {owner_id} is not configured")))?;
        let client = Arc::new(OwnerClient {
            http: build_http_client(credentials.api_token.as_deref(), self.timeout)?,
            credentials,
        });

        let mut clients = self.clients.write().await;
        let entry = clients
            .entry(owner_id.to_owned())
            .or_insert_with(|| Arc::clone(&client));
        debug!(owner_id, "owner client cached");
        Ok(Arc::clone(entry))
    }

    /// Drop the cached client for `owner_id`.
    pub async fn invalidate(&self, owner_id: &str) {
        if self.clients.write().await.remove(owner_id).is_some() {
            info!(owner_id, "owner client invalidated");
        }
    }

    /// Rebuild the client for `owner_id` from fresh credentials.
    ///
    /// # Errors
    ///
    /// Returns the same errors as [`Self::get`].
    pub async fn refresh(&self, owner_id: &str) -> Result<Arc<OwnerClient>> {
        self.invalidate(owner_id).await;
        self.get(owner_id).await
    }

    /// Drop every cached client.
    pub async fn invalidate_all(&self) {
        self.clients.write().await.clear();
    }
}

fn build_http_client(token: Option<&str>, timeout: Duration) -> Result<reqwest::Client> {
    let mut headers = HeaderMap::new();
    if let Some(token) = token {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| AppError::Credential(format!("invalid token header value: {e}")))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::Credential(format!("failed to build HTTP client: {e}")))
}
