//! Provider Errors
//!
//! Failures an adapter can report, with upstream HTTP statuses folded into a
//! small set of failure classes.

use std::fmt;

use thiserror::Error;

/// Maximum number of upstream body bytes kept in an error message
const MAX_BODY_EXCERPT: usize = 200;

/// Class of transport failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TransportFailure {
    /// Credentials were rejected (401, 403)
    AuthInvalid,
    /// Model or endpoint does not exist (404)
    NotFound,
    /// Upstream is throttling us (429)
    RateLimited,
    /// Upstream is down or overloaded (5xx)
    Unavailable,
    /// Upstream rejected the request for another reason (other 4xx)
    Rejected,
    /// No response, or no stream activity, within the allowed time
    Timeout,
    /// Could not connect
    Connect,
    /// The response stream broke mid-flight
    Stream,
    /// The response was not in the expected format
    Malformed,
}

impl TransportFailure {
    /// Classify an HTTP status code
    #[must_use]
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::AuthInvalid,
            404 => Self::NotFound,
            408 => Self::Timeout,
            429 => Self::RateLimited,
            500..=599 => Self::Unavailable,
            _ => Self::Rejected,
        }
    }

    /// Whether retrying later might succeed
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::Unavailable | Self::Timeout | Self::Connect | Self::Stream
        )
    }
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::AuthInvalid => "authentication failed",
            Self::NotFound => "model or endpoint not found",
            Self::RateLimited => "rate limited",
            Self::Unavailable => "provider unavailable",
            Self::Rejected => "request rejected",
            Self::Timeout => "timed out",
            Self::Connect => "connection failed",
            Self::Stream => "stream interrupted",
            Self::Malformed => "malformed response",
        };
        f.write_str(text)
    }
}

/// Errors reported by a provider adapter
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The adapter needs credentials that were not supplied
    #[error("missing credentials for provider '{0}'")]
    MissingCredentials(String),

    /// Talking to the upstream service failed
    #[error("{kind}: {message}")]
    Transport {
        /// Failure class
        kind: TransportFailure,
        /// Detail for logs and clients
        message: String,
    },

    /// The upstream service reported an error inside the stream
    #[error("{0}")]
    Reported(String),
}

impl ProviderError {
    /// Build a transport error
    pub fn transport(kind: TransportFailure, message: impl Into<String>) -> Self {
        Self::Transport {
            kind,
            message: message.into(),
        }
    }

    /// Build an error from a non-success HTTP status and response body
    pub fn http(status: u16, body: &str) -> Self {
        let body = body.trim();
        let excerpt = match body.char_indices().nth(MAX_BODY_EXCERPT) {
            Some((cut, _)) => format!("{}...", &body[..cut]),
            None => body.to_string(),
        };
        let message = if excerpt.is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {excerpt}")
        };
        Self::transport(TransportFailure::from_status(status), message)
    }

    /// Build a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::transport(TransportFailure::Timeout, message)
    }

    /// Build a malformed-response error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::transport(TransportFailure::Malformed, message)
    }

    /// The failure class, if this is a transport error
    #[must_use]
    pub fn failure(&self) -> Option<TransportFailure> {
        match self {
            Self::Transport { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            TransportFailure::Timeout
        } else if e.is_connect() {
            TransportFailure::Connect
        } else if let Some(status) = e.status() {
            TransportFailure::from_status(status.as_u16())
        } else if e.is_decode() || e.is_body() {
            TransportFailure::Stream
        } else {
            TransportFailure::Rejected
        };
        Self::transport(kind, e.to_string())
    }
}
