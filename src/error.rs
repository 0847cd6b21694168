//! Error types for SakaiBot.
//!
//! Uses `thiserror` for ergonomic error handling. Provider failures carry a
//! structured [`ProviderError`] classification so key rotation, retry, and
//! circuit-breaker decisions never rely on string matching.

use std::fmt;
use thiserror::Error;

// ============================================================================
// Provider Error Classification
// ============================================================================

/// Structured backend error classification.
///
/// Distinguishes short-term rate limits from daily-quota exhaustion because
/// the two drive different key-pool transitions: a 429 cools the key down for
/// a minute, a daily-quota hit parks it until the provider's quota reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// 429 — short-term rate limit; rotate to the next credential
    RateLimit(String),
    /// Daily request quota exhausted; credential unusable until quota reset
    QuotaExhausted(String),
    /// 401/403 — invalid or revoked credential
    Auth(String),
    /// 400 — malformed request; retrying cannot help
    InvalidRequest(String),
    /// 5xx — server-side failure
    ServerError(String),
    /// Connection or read timeout
    Timeout(String),
    /// Catch-all for unrecognized failures
    Unknown(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::RateLimit(msg) => write!(f, "Rate limit: {}", msg),
            ProviderError::QuotaExhausted(msg) => write!(f, "Daily quota exhausted: {}", msg),
            ProviderError::Auth(msg) => write!(f, "Authentication error: {}", msg),
            ProviderError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            ProviderError::ServerError(msg) => write!(f, "Server error: {}", msg),
            ProviderError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            ProviderError::Unknown(msg) => write!(f, "Unknown provider error: {}", msg),
        }
    }
}

impl ProviderError {
    /// Classify an HTTP status + response body into a provider error.
    ///
    /// Gemini reports both flavors of 429 as `RESOURCE_EXHAUSTED`; the daily
    /// variant is recognized by its per-day quota marker in the body.
    pub fn from_status(status: u16, body: &str) -> Self {
        let lowered = body.to_lowercase();
        match status {
            401 | 403 => ProviderError::Auth(format!("HTTP {}", status)),
            400 => ProviderError::InvalidRequest(truncate(body)),
            404 => ProviderError::InvalidRequest(format!("HTTP 404: {}", truncate(body))),
            429 => {
                if lowered.contains("perday")
                    || lowered.contains("per day")
                    || lowered.contains("daily")
                {
                    ProviderError::QuotaExhausted(truncate(body))
                } else {
                    ProviderError::RateLimit(truncate(body))
                }
            }
            s if s >= 500 => ProviderError::ServerError(format!("HTTP {}", s)),
            s => ProviderError::Unknown(format!("HTTP {}: {}", s, truncate(body))),
        }
    }

    /// Returns `true` if the same request may succeed with another credential.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimit(_)
                | ProviderError::QuotaExhausted(_)
                | ProviderError::ServerError(_)
                | ProviderError::Timeout(_)
        )
    }
}

fn truncate(body: &str) -> String {
    let mut s: String = body.chars().take(200).collect();
    if body.chars().count() > 200 {
        s.push_str("...");
    }
    s
}

impl From<ProviderError> for SakaiError {
    fn from(err: ProviderError) -> Self {
        SakaiError::Provider(err)
    }
}

// ============================================================================
// Primary Error Type
// ============================================================================

/// The primary error type for SakaiBot operations.
#[derive(Error, Debug)]
pub enum SakaiError {
    /// Missing or invalid configuration; never retried
    #[error("Configuration error: {0}")]
    Config(String),

    /// User input rejected by the parser or sanitizer; surfaces as a usage hint
    #[error("Validation error: {0}")]
    Validation(String),

    /// Command from a sender that is neither the owner nor authorized
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Principal exceeded the local command rate limit
    #[error("Rate limited; retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// A dependency circuit is open; fail fast without calling out
    #[error("Circuit open for {0}")]
    CircuitOpen(&'static str),

    /// Classified backend failure
    #[error("Provider error: {0}")]
    Provider(ProviderError),

    /// Telegram send/edit/forward/download failure
    #[error("Telegram error: {0}")]
    Telegram(String),

    /// Edit was a no-op because the content did not change; always swallowed
    #[error("message content not modified")]
    NotModified,

    /// Job queue failure (lane closed, job vanished)
    #[error("Queue error: {0}")]
    Queue(String),

    /// External tool (ffmpeg, restart hook) failure
    #[error("External tool error: {0}")]
    Tool(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl SakaiError {
    /// Whether this failure should count against a dependency circuit.
    ///
    /// Validation, authorization, and rate-limit outcomes are local decisions
    /// and must not open a breaker.
    pub fn trips_circuit(&self) -> bool {
        match self {
            SakaiError::Provider(p) => {
                !matches!(p, ProviderError::InvalidRequest(_) | ProviderError::Auth(_))
            }
            SakaiError::Telegram(_) | SakaiError::Http(_) | SakaiError::Io(_) => true,
            _ => false,
        }
    }
}

/// A specialized `Result` type for SakaiBot operations.
pub type Result<T> = std::result::Result<T, SakaiError>;
