//! Global configuration parsing, validation, and owner credential loading.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::FixedOffset;
use serde::Deserialize;
use tracing::warn;
use url::{Host, Url};

use crate::clock::parse_offset;
use crate::{AppError, Result};

/// Keychain service name for per-owner API tokens.
pub const KEYRING_SERVICE: &str = "cast-dispatch";

const MAX_CLAIM_LEASE: i64 = 86_400;
const MAX_IMMEDIATE_RETRIES: u32 = 10;

/// Endpoint settings shared by the HTTP-backed delivery backends.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct EndpointConfig {
    /// Absolute URL requests are posted to.
    pub endpoint: String,
    /// Per-request timeout.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl EndpointConfig {
    /// Request timeout as a [`Duration`].
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

fn default_timeout_seconds() -> u64 {
    30
}

/// Retry and reschedule policy knobs.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Apply recommended reschedules without operator action.
    #[serde(default)]
    pub auto_reschedule: bool,
    /// Backoff ladder for rate-limited items, in hours.
    #[serde(default = "default_backoff_hours")]
    pub backoff_hours: Vec<u32>,
    /// In-call retries for transient failures.
    #[serde(default = "default_max_immediate_retries")]
    pub max_immediate_retries: u32,
    /// Base delay between in-call retries.
    #[serde(default = "default_immediate_retry_delay_ms")]
    pub immediate_retry_delay_ms: u64,
    /// Reschedule delay once in-call retries for a transient failure are exhausted.
    #[serde(default = "default_transient_reschedule_minutes")]
    pub transient_reschedule_minutes: u32,
    /// Attempts after which automatic rescheduling stops.
    #[serde(default = "default_max_auto_reschedules")]
    pub max_auto_reschedules: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            auto_reschedule: false,
            backoff_hours: default_backoff_hours(),
            max_immediate_retries: default_max_immediate_retries(),
            immediate_retry_delay_ms: default_immediate_retry_delay_ms(),
            transient_reschedule_minutes: default_transient_reschedule_minutes(),
            max_auto_reschedules: default_max_auto_reschedules(),
        }
    }
}

fn default_backoff_hours() -> Vec<u32> {
    vec![1, 6, 24]
}

fn default_max_immediate_retries() -> u32 {
    1
}

fn default_immediate_retry_delay_ms() -> u64 {
    2000
}

fn default_transient_reschedule_minutes() -> u32 {
    15
}

fn default_max_auto_reschedules() -> u32 {
    3
}

/// Per-cast delivery preferences.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct OwnerConfig {
    /// Owner identifier referenced by content items.
    pub id: String,
    /// Remote account handle used by the direct executor.
    #[serde(default)]
    pub account_id: Option<String>,
    /// Human-facing name written to relay rows and webhook commands.
    pub display_name: String,
    /// Relay spreadsheet for this owner; defaults to the owner id.
    #[serde(default)]
    pub relay_sheet: Option<String>,
    /// Whether the direct executor may be used for this owner.
    #[serde(default)]
    pub direct_api: bool,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("cast_dispatch.db")
}

fn default_offset() -> String {
    "+09:00".into()
}

fn default_poll_interval() -> u64 {
    300
}

fn default_claim_lease() -> u64 {
    300
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// `SQLite` database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Canonical offset for all scheduling comparisons.
    #[serde(default = "default_offset")]
    pub canonical_utc_offset: String,
    /// Seconds between scheduler polls in `run` mode.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Lifetime of a dispatch lease.
    #[serde(default = "default_claim_lease")]
    pub claim_lease_seconds: u64,
    /// Direct executor backend.
    #[serde(default)]
    pub direct_api: Option<EndpointConfig>,
    /// Tabular relay backend.
    #[serde(default)]
    pub relay: Option<EndpointConfig>,
    /// Remote automation webhook backend.
    #[serde(default)]
    pub webhook: Option<EndpointConfig>,
    /// Retry and reschedule policy.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Known casts.
    #[serde(default)]
    pub owners: Vec<OwnerConfig>,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Parsed canonical offset.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the offset string is invalid.
    pub fn offset(&self) -> Result<FixedOffset> {
        parse_offset(&self.canonical_utc_offset)
    }

    /// Interval between scheduler polls.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    /// Lifetime of a dispatch lease.
    #[must_use]
    pub fn claim_lease(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.claim_lease_seconds).unwrap_or(MAX_CLAIM_LEASE))
    }

    /// Longest a single dispatch can hold its lease: every in-call attempt
    /// running to the slowest configured timeout, plus the pauses between them.
    #[must_use]
    pub fn worst_case_dispatch(&self) -> Duration {
        let timeout = [&self.direct_api, &self.relay, &self.webhook]
            .into_iter()
            .flatten()
            .map(EndpointConfig::timeout)
            .max()
            .unwrap_or_default();
        let retries = self.retry.max_immediate_retries.min(MAX_IMMEDIATE_RETRIES);
        let base = Duration::from_millis(self.retry.immediate_retry_delay_ms);
        let pauses = (0..retries)
            .map(|n| base.saturating_mul(1_u32 << n.min(16)))
            .fold(Duration::ZERO, Duration::saturating_add);
        timeout
            .saturating_mul(retries.saturating_add(1))
            .saturating_add(pauses)
    }

    /// Look up an owner's configuration.
    #[must_use]
    pub fn owner(&self, owner_id: &str) -> Option<&OwnerConfig> {
        self.owners.iter().find(|o| o.id == owner_id)
    }

    fn validate(&self) -> Result<()> {
        self.offset()?;

        if self.poll_interval_seconds == 0 {
            return Err(AppError::Config(
                "poll_interval_seconds must be greater than zero".into(),
            ));
        }
        if self.claim_lease_seconds == 0 || self.claim_lease_seconds > MAX_CLAIM_LEASE.unsigned_abs() {
            return Err(AppError::Config(format!(
                "claim_lease_seconds must be between 1 and {MAX_CLAIM_LEASE}"
            )));
        }

        for (name, endpoint) in [
            ("direct_api", &self.direct_api),
            ("relay", &self.relay),
            ("webhook", &self.webhook),
        ] {
            if let Some(endpoint) = endpoint {
                validate_endpoint(name, endpoint)?;
            }
        }

        if self.retry.backoff_hours.is_empty() || self.retry.backoff_hours.contains(&0) {
            return Err(AppError::Config(
                "retry.backoff_hours must be non-empty and positive".into(),
            ));
        }
        if self.retry.transient_reschedule_minutes == 0 {
            return Err(AppError::Config(
                "retry.transient_reschedule_minutes must be greater than zero".into(),
            ));
        }
        if self.retry.max_immediate_retries > MAX_IMMEDIATE_RETRIES {
            return Err(AppError::Config(format!(
                "retry.max_immediate_retries must be at most {MAX_IMMEDIATE_RETRIES}"
            )));
        }

        let worst_case = self.worst_case_dispatch();
        if Duration::from_secs(self.claim_lease_seconds) < worst_case {
            return Err(AppError::Config(format!(
                "claim_lease_seconds ({}) is shorter than the worst-case dispatch time of {}s",
                self.claim_lease_seconds,
                worst_case.as_secs() + u64::from(worst_case.subsec_nanos() > 0)
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for owner in &self.owners {
            if owner.id.trim().is_empty() {
                return Err(AppError::Config("owner id must not be empty".into()));
            }
            if !seen.insert(owner.id.as_str()) {
                return Err(AppError::Config(format!("duplicate owner id {}", owner.id)));
            }
            if owner.direct_api && owner.account_id.is_none() {
                return Err(AppError::Config(format!(
                    "owner {} enables direct_api without account_id",
                    owner.id
                )));
            }
        }

        Ok(())
    }
}

/// Endpoints must use https, except for loopback hosts.
fn validate_endpoint(name: &str, endpoint: &EndpointConfig) -> Result<()> {
    let raw = endpoint.endpoint.trim();
    if raw.is_empty() {
        return Err(AppError::Config(format!("{name}.endpoint is not configured")));
    }
    let url = Url::parse(raw)
        .map_err(|err| AppError::Config(format!("{name}.endpoint is not a valid url: {err}")))?;
    let secure = match url.scheme() {
        "https" => true,
        "http" => is_loopback(&url),
        _ => false,
    };
    if !secure {
        return Err(AppError::Config(format!(
            "{name}.endpoint must start with https"
        )));
    }
    if endpoint.timeout_seconds == 0 {
        return Err(AppError::Config(format!(
            "{name}.timeout_seconds must be greater than zero"
        )));
    }
    Ok(())
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

/// Environment variable consulted for an owner's API token.
#[must_use]
pub fn token_env_var(owner_id: &str) -> String {
    let suffix: String = owner_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("CAST_DISPATCH_TOKEN_{suffix}")
}

/// Load an owner's API token from OS keychain with env-var fallback.
///
/// Returns `Ok(None)` when neither source has a value; tokens are optional
/// for backends that authenticate by account id alone.
///
/// # Errors
///
/// Returns `AppError::Credential` if the keychain task panics.
pub async fn load_owner_token(owner_id: &str, use_keychain: bool) -> Result<Option<String>> {
    if use_keychain {
        let key = format!("owner:{owner_id}");
        let keychain_result = tokio::task::spawn_blocking(move || {
            keyring::Entry::new(KEYRING_SERVICE, &key).and_then(|entry| entry.get_password())
        })
        .await
        .map_err(|err| AppError::Credential(format!("keychain task panicked: {err}")))?;

        match keychain_result {
            Ok(value) if !value.is_empty() => return Ok(Some(value)),
            Ok(_) => {
                warn!(owner_id, "keychain entry is empty, trying env var");
            }
            Err(err) => {
                warn!(owner_id, ?err, "keychain lookup failed, trying env var");
            }
        }
    }

    Ok(env::var(token_env_var(owner_id))
        .ok()
        .filter(|value| !value.is_empty()))
}
