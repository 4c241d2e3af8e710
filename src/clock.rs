//! Canonical time source and schedule normalization.
//!
//! Every scheduling comparison in the engine happens in one fixed offset
//! (UTC+9 unless configured otherwise). Naive inputs are interpreted in
//! that offset; offset-qualified inputs are converted to it. The [`Clock`]
//! trait also owns the delay primitive so retry backoff can be exercised in
//! tests without real sleeping.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, TimeZone, Utc};

use crate::{AppError, Result};

/// Default canonical offset in seconds east of UTC.
pub const DEFAULT_OFFSET_SECONDS: i32 = 9 * 3600;

/// Naive formats accepted by [`parse_schedule`], tried in order.
const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Source of the current instant and of delays.
pub trait Clock: Send + Sync {
    /// Canonical offset used for all returned instants.
    fn offset(&self) -> FixedOffset;

    /// Current instant in the canonical offset.
    fn now(&self) -> DateTime<FixedOffset>;

    /// Wait for `duration` before resolving.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Wall clock backed by the system time and `tokio::time::sleep`.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    /// Construct a wall clock reporting instants in `offset`.
    #[must_use]
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(canonical_offset())
    }
}

impl Clock for SystemClock {
    fn offset(&self) -> FixedOffset {
        self.offset
    }

    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Manually driven clock. `sleep` advances the clock instead of waiting.
#[derive(Debug)]
pub struct ManualClock {
    offset: FixedOffset,
    now: Mutex<DateTime<FixedOffset>>,
    slept: Mutex<Vec<Duration>>,
}

impl ManualClock {
    /// Construct a manual clock frozen at `start` (converted to `offset`).
    #[must_use]
    pub fn new(start: DateTime<FixedOffset>, offset: FixedOffset) -> Self {
        Self {
            offset,
            now: Mutex::new(start.with_timezone(&offset)),
            slept: Mutex::new(Vec::new()),
        }
    }

    /// Move the clock forward by `delta`.
    pub fn advance(&self, delta: chrono::Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += delta;
        }
    }

    /// Replace the current instant.
    pub fn set(&self, instant: DateTime<FixedOffset>) {
        if let Ok(mut now) = self.now.lock() {
            *now = instant.with_timezone(&self.offset);
        }
    }

    /// Every duration passed to [`Clock::sleep`] so far.
    #[must_use]
    pub fn sleeps(&self) -> Vec<Duration> {
        self.slept.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl Clock for ManualClock {
    fn offset(&self) -> FixedOffset {
        self.offset
    }

    fn now(&self) -> DateTime<FixedOffset> {
        self.now
            .lock()
            .map(|now| *now)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        if let Ok(mut slept) = self.slept.lock() {
            slept.push(duration);
        }
        if let Ok(delta) = chrono::Duration::from_std(duration) {
            self.advance(delta);
        }
        Box::pin(std::future::ready(()))
    }
}

/// The default canonical offset (UTC+9).
#[must_use]
pub fn canonical_offset() -> FixedOffset {
    FixedOffset::east_opt(DEFAULT_OFFSET_SECONDS).unwrap_or_else(|| Utc.fix())
}

/// Parse an offset string such as `+09:00`, `-05:30`, or `Z`.
///
/// # Errors
///
/// Returns `AppError::Config` if the string is not a valid offset.
pub fn parse_offset(raw: &str) -> Result<FixedOffset> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("z") || trimmed.eq_ignore_ascii_case("utc") {
        return Ok(Utc.fix());
    }
    trimmed
        .parse::<FixedOffset>()
        .map_err(|err| AppError::Config(format!("invalid utc offset {trimmed:?}: {err}")))
}

/// Interpret a naive timestamp as wall time in `offset`.
///
/// # Errors
///
/// Returns `AppError::Validation` if the wall time does not map to an instant.
pub fn from_naive(naive: NaiveDateTime, offset: FixedOffset) -> Result<DateTime<FixedOffset>> {
    offset
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| AppError::Validation(format!("ambiguous local time {naive}")))
}

/// Convert any offset-qualified instant into `offset`.
#[must_use]
pub fn to_canonical<Tz: TimeZone>(instant: &DateTime<Tz>, offset: FixedOffset) -> DateTime<FixedOffset> {
    instant.with_timezone(&offset)
}

/// Parse a user-supplied schedule string into the canonical offset.
///
/// RFC 3339 inputs carry their own offset and are converted; naive inputs
/// (`YYYY-MM-DD HH:MM[:SS]`, with a space or `T`) are taken as canonical
/// wall time.
///
/// # Errors
///
/// Returns `AppError::Validation` if no accepted format matches.
pub fn parse_schedule(raw: &str, offset: FixedOffset) -> Result<DateTime<FixedOffset>> {
    let trimmed = raw.trim();
    if let Ok(aware) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(to_canonical(&aware, offset));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return from_naive(naive, offset);
        }
    }
    Err(AppError::Validation(format!(
        "unrecognized schedule time {trimmed:?}"
    )))
}

/// Format an instant as `YYYY-MM-DD HH:MM:SS` wall time in `offset`.
#[must_use]
pub fn wall_time(instant: &DateTime<FixedOffset>, offset: FixedOffset) -> String {
    instant
        .with_timezone(&offset)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

