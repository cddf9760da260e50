//! Transport errors and the retry policy applied to them.
//!
//! Provider calls fail in ways worth retrying (throttling, upstream
//! trouble, dropped connections) and in ways that are final (rejected
//! requests, unparseable payloads). The error type carries that
//! distinction plus everything the retry loop needs to pace itself.

use std::time::Duration;

use thiserror::Error;

/// Ceiling on a single backoff delay.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Why a provider call failed.
#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP 429, optionally carrying the server's suggested delay.
    #[error("throttled by provider: {message}")]
    Throttled {
        message: String,
        retry_after: Option<Duration>,
    },
    /// HTTP 5xx.
    #[error("provider failure (HTTP {status}): {message}")]
    Upstream { status: u16, message: String },
    /// HTTP 4xx other than 429; retrying cannot help.
    #[error("request rejected (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },
    /// The connection dropped or timed out before a response arrived.
    #[error("network failure: {message}")]
    Network { message: String },
    /// A response arrived but its payload did not parse.
    #[error("malformed response: {message}")]
    Malformed { message: String },
}

impl LlmError {
    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: String, retry_after: Option<Duration>) -> Self {
        match status {
            429 => Self::Throttled {
                message,
                retry_after,
            },
            400..=499 => Self::Rejected { status, message },
            _ => Self::Upstream { status, message },
        }
    }

    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Throttled { .. } | Self::Upstream { .. } | Self::Network { .. }
        )
    }

    /// Delay before the next attempt. A server-provided hint wins;
    /// otherwise exponential backoff from a per-variant base with a
    /// small deterministic jitter, capped at one minute.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if let Self::Throttled {
            retry_after: Some(hint),
            ..
        } = self
        {
            return *hint;
        }
        let base: u64 = match self {
            Self::Throttled { .. } => 5,
            Self::Upstream { .. } => 2,
            _ => 1,
        };
        let scaled = base.saturating_mul(1u64 << attempt.min(16));
        let jitter = if scaled >= 4 {
            (attempt as u64 * 7) % (scaled / 4)
        } else {
            0
        };
        Duration::from_secs(scaled.saturating_add(jitter)).min(MAX_BACKOFF)
    }
}

/// Retry policy for transient transport errors.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Additional attempts after the first call.
    pub max_retries: u32,
    /// Wall-clock budget across all attempts of one request.
    pub max_elapsed: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            max_elapsed: Duration::from_secs(120),
        }
    }
}

impl RetryConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }

    /// Retry only transient failures, and only while attempts remain.
    pub fn should_retry(&self, error: &LlmError, attempt: u32) -> bool {
        attempt < self.max_retries && error.is_transient()
    }
}
