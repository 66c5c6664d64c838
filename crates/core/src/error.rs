use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error taxonomy shared by every layer. Kinds, not types: each crate keeps its
/// own error enum and reports which kind a value belongs to through [`Classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Timeout or connection reset.
    NetworkTransient,
    /// HTTP 429.
    RateLimited,
    /// HTTP 401/405 after the refresh attempt.
    Authentication,
    /// HTTP 404, terminal for the resource.
    NotFound,
    /// Any other 4xx.
    Client,
    /// 5xx or an HTML error page.
    Server,
    /// Undecodable provider payload.
    Data,
    /// The host failed to do what it was asked (player never started).
    Host,
    /// The user cancelled.
    Cancelled,
    /// Local storage or programming error.
    Internal,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            Self::NetworkTransient => "network_transient",
            Self::RateLimited => "rate_limited",
            Self::Authentication => "authentication",
            Self::NotFound => "not_found",
            Self::Client => "client",
            Self::Server => "server",
            Self::Data => "data",
            Self::Host => "host",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }

    /// Map an HTTP status to a kind. Success codes map to `None`.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=399 => None,
            401 | 405 => Some(Self::Authentication),
            404 => Some(Self::NotFound),
            429 => Some(Self::RateLimited),
            400..=499 => Some(Self::Client),
            _ => Some(Self::Server),
        }
    }

    /// Transient failures keep stale data, mark records incomplete and queue mutations.
    pub fn is_transient(self) -> bool {
        matches!(self, Self::NetworkTransient | Self::RateLimited | Self::Server)
    }

    /// Whether a provider call failing with this kind leaves the merge incomplete.
    pub fn leaves_incomplete(self) -> bool {
        self.is_transient()
    }

    /// HTTP status used when the server surfaces the error.
    pub fn status_code(self) -> u16 {
        match self {
            Self::NetworkTransient | Self::Server => 502,
            Self::RateLimited => 429,
            Self::Authentication => 401,
            Self::NotFound => 404,
            Self::Client | Self::Data => 400,
            Self::Host => 503,
            Self::Cancelled => 499,
            Self::Internal => 500,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Implemented by every crate error so callers can branch on the taxonomy.
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

/// Failure reported by a host capability.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostError {
    #[error("host call failed: {0}")]
    Failed(String),
    #[error("capability not available: {0}")]
    Unavailable(&'static str),
    #[error("cancelled by user")]
    Cancelled,
}

impl Classify for HostError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Host,
        }
    }
}

/// JSON error envelope: `{ "error": { "code": "…", "message": "…", "details": {} } }`
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    pub details: serde_json::Value,
}

impl ErrorEnvelope {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            error: ErrorBody {
                code: kind.code().to_string(),
                message: message.into(),
                details: serde_json::Value::Object(serde_json::Map::new()),
            },
        }
    }
}
