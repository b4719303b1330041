//! Backoff schedule and retry message formatting for the API client.
//!
//! Two conditions are transient: rate limiting (HTTP 429 and 503) and request
//! timeouts. Each has its own attempt budget; both share one exponential
//! schedule.

use std::time::Duration;

/// Maximum attempts per transient condition, including the first request
pub const MAX_ATTEMPTS: u32 = 10;

/// Multiplier applied to the exponential term (2 s, 4 s, 8 s, ...)
pub const BACKOFF_FACTOR: Duration = Duration::from_secs(2);

/// Exponential backoff schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    factor: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(MAX_ATTEMPTS, BACKOFF_FACTOR)
    }
}

impl RetryPolicy {
    /// Custom schedule. `max_attempts` is clamped to at least 1.
    pub fn new(max_attempts: u32, factor: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            factor,
        }
    }

    /// Attempts allowed per transient condition
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay to wait after the given failed attempt (0-based): `factor * 2^n`
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let multiplier = 2u32.checked_pow(retry_count).unwrap_or(u32::MAX);
        self.factor.saturating_mul(multiplier)
    }
}

/// Why a request is being retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// HTTP 429 or 503
    RateLimited(u16),
    /// The request did not complete within the client timeout
    Timeout,
}

impl RetryReason {
    /// Label used for metrics
    pub fn label(&self) -> &'static str {
        match self {
            Self::RateLimited(_) => "rate_limited",
            Self::Timeout => "timeout",
        }
    }

    /// User-facing description
    pub fn description(&self) -> &'static str {
        match self {
            Self::RateLimited(429) => "rate limit exceeded",
            Self::RateLimited(503) => "service unavailable",
            Self::RateLimited(_) => "rate limited",
            Self::Timeout => "request timeout",
        }
    }
}

/// Context for one retry decision, used to format log messages
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Attempt that just failed (1-based)
    pub attempt: u32,
    /// Attempt budget for this condition
    pub max_attempts: u32,
    /// Condition that triggered the retry
    pub reason: RetryReason,
    /// Wait before the next attempt
    pub backoff: Duration,
    /// Stream that issued the request
    pub stream: String,
    /// Request path
    pub endpoint: String,
}

impl RetryContext {
    /// Message logged before sleeping
    pub fn format_retry(&self) -> String {
        format!(
            "Retrying {} (attempt {}/{}) after {} - waiting {:.1} seconds... ({})",
            self.endpoint,
            self.attempt,
            self.max_attempts,
            self.reason.description(),
            self.backoff.as_secs_f64(),
            self.stream
        )
    }

    /// Message logged once the budget is exhausted
    pub fn format_failure(&self) -> String {
        format!(
            "Giving up on {} after {} attempts: {} ({})",
            self.endpoint,
            self.max_attempts,
            self.reason.description(),
            self.stream
        )
    }
}
