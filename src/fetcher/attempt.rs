//! Single-attempt error classification and retry log formatting.
//!
//! Providers report each failed attempt as an [`AttemptError`]; the retrying
//! client decides from its [`AttemptErrorType`] whether to back off, fail
//! over or give up, and uses [`RetryContext`] to produce consistent log lines.

use crate::fetcher::FetchErrorKind;
use crate::FacilityCategory;
use reqwest::{Error as ReqwestError, StatusCode};
use std::fmt;
use std::time::Duration;

/// Classification of one failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptErrorType {
    /// Request timed out
    NetworkTimeout,
    /// Connection refused, DNS failure or similar
    NetworkOffline,
    /// HTTP 429
    RateLimit,
    /// HTTP 5xx
    ServerError(u16),
    /// Overpass answered 200 but reported a runtime error (timeout, memory)
    ServerRuntime,
    /// HTTP 400: the interpreter rejected the query
    InvalidQuery,
    /// Other 4xx
    ClientError(u16),
    /// Response body was not the expected JSON
    MalformedResponse,
    /// Anything else
    NetworkGeneric,
}

impl AttemptErrorType {
    /// Short description used inside log messages
    pub fn description(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "network timeout",
            Self::NetworkOffline => "connection failed",
            Self::RateLimit => "rate limit exceeded",
            Self::ServerError(code) => match code {
                500 => "internal server error",
                502 => "bad gateway",
                503 => "service unavailable",
                504 => "gateway timeout",
                _ => "server error",
            },
            Self::ServerRuntime => "interpreter runtime error",
            Self::InvalidQuery => "query rejected",
            Self::ClientError(code) => match code {
                404 => "interpreter not found",
                _ => "client error",
            },
            Self::MalformedResponse => "malformed response",
            Self::NetworkGeneric => "network error",
        }
    }

    /// Remediation hint shown after the final failure
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "Check network connectivity or raise retry.request_timeout_secs",
            Self::NetworkOffline => "Verify internet connectivity and the endpoint URLs",
            Self::RateLimit => "Lower concurrency.per_endpoint_cap or set concurrency.cooldown_ms",
            Self::ServerError(_) | Self::ServerRuntime => {
                "The interpreter is overloaded; add endpoints or retry later"
            }
            Self::InvalidQuery => "Check the category predicate template for Overpass QL syntax errors",
            Self::ClientError(_) => "Check the endpoint URL points at an Overpass interpreter",
            Self::MalformedResponse => "The endpoint may not be an Overpass interpreter",
            Self::NetworkGeneric => "Check network connectivity and try again",
        }
    }

    /// Whether another attempt can succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidQuery | Self::ClientError(_) | Self::MalformedResponse
        )
    }

    /// Kind reported when this is the last error of a query
    pub fn fetch_kind(&self) -> FetchErrorKind {
        match self {
            Self::RateLimit => FetchErrorKind::RateLimited,
            Self::InvalidQuery | Self::ClientError(_) | Self::MalformedResponse => {
                FetchErrorKind::MalformedQuery
            }
            _ => FetchErrorKind::TransientNetwork,
        }
    }

    /// Metric label
    pub fn label(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "timeout",
            Self::NetworkOffline => "offline",
            Self::RateLimit => "rate_limited",
            Self::ServerError(_) => "server_error",
            Self::ServerRuntime => "runtime_error",
            Self::InvalidQuery => "invalid_query",
            Self::ClientError(_) => "client_error",
            Self::MalformedResponse => "malformed_response",
            Self::NetworkGeneric => "network_error",
        }
    }
}

impl fmt::Display for AttemptErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// One failed network attempt
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{error_type}: {message}")]
pub struct AttemptError {
    /// Classification
    pub error_type: AttemptErrorType,
    /// Underlying detail
    pub message: String,
}

impl AttemptError {
    /// Build an attempt error
    pub fn new(error_type: AttemptErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type,
            message: message.into(),
        }
    }
}

/// Classify an HTTP status and/or reqwest error
pub fn extract_error_type(
    status: Option<StatusCode>,
    err: Option<&ReqwestError>,
) -> AttemptErrorType {
    if let Some(status) = status {
        match status.as_u16() {
            400 => return AttemptErrorType::InvalidQuery,
            429 => return AttemptErrorType::RateLimit,
            _ => {}
        }

        if status.is_server_error() {
            return AttemptErrorType::ServerError(status.as_u16());
        }

        if status.is_client_error() {
            return AttemptErrorType::ClientError(status.as_u16());
        }
    }

    if let Some(err) = err {
        if err.is_timeout() {
            return AttemptErrorType::NetworkTimeout;
        }

        if err.is_connect() {
            return AttemptErrorType::NetworkOffline;
        }

        if err.is_decode() {
            return AttemptErrorType::MalformedResponse;
        }
    }

    AttemptErrorType::NetworkGeneric
}

/// Context for formatting retry messages
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Attempt number (1-based) across all endpoints
    pub attempt: u32,
    /// Attempt ceiling
    pub max_attempts: u32,
    /// What went wrong
    pub error_type: AttemptErrorType,
    /// Delay before the next attempt
    pub backoff_duration: Duration,
    /// Category being queried
    pub category: FacilityCategory,
    /// Cache key of the query, for correlation
    pub query: String,
    /// Last underlying message
    pub error_message: String,
    /// Endpoint that failed
    pub endpoint: String,
}

impl RetryContext {
    /// Format the retry notice logged before a backoff
    pub fn format_retry(&self) -> String {
        format!(
            "Retrying (attempt {}/{}) after {} - waiting {:.1} seconds... ({} {} via {})",
            self.attempt,
            self.max_attempts,
            self.error_type.description(),
            self.backoff_duration.as_secs_f64(),
            self.category,
            self.query,
            self.endpoint
        )
    }

    /// Format the notice logged when a retried query finally succeeds
    pub fn format_success(&self) -> String {
        format!(
            "Retry attempt {}/{} succeeded ({} {} via {})",
            self.attempt, self.max_attempts, self.category, self.query, self.endpoint
        )
    }

    /// Format the summary logged when a query gives up
    pub fn format_failure(&self) -> String {
        let mut lines = vec![
            format!("[FAILED] {} query failed after {} attempts", self.category, self.attempt),
            format!("  Last error: {}", self.error_message),
            format!("  Query: {}", self.query),
            format!("  Endpoint: {}", self.endpoint),
            "  Suggestions:".to_string(),
        ];
        for suggestion in self.format_suggestions() {
            lines.push(format!("    - {suggestion}"));
        }
        lines.join("\n")
    }

    /// Suggestions tailored to the failure
    pub fn format_suggestions(&self) -> Vec<String> {
        let mut suggestions = vec![self.error_type.suggestion().to_string()];
        if self.error_type.is_retryable() {
            suggestions.push(format!(
                "Try increasing retry.max_total_attempts (current: {})",
                self.max_attempts
            ));
        }
        suggestions
    }
}
