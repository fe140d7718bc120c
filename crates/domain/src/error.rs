//! Shared error type used across all Groundline crates.
//!
//! Every failure carries a kind from a closed taxonomy, an optional
//! correlation id (upstream request id or a generated UUID), a
//! retry-eligibility bit, and an optional structured context payload.

use serde::Serialize;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Kind taxonomy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The closed set of error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConfigMissing,
    Transport,
    Auth,
    RateLimited,
    Timeout,
    Upstream5xx,
    Upstream4xx,
    Validation,
    Parse,
    CriticError,
    RetrievalExhausted,
    CitationInvalid,
    Cancelled,
    Internal,
}

impl ErrorKind {
    /// Whether this kind is transient and eligible for the shared retry
    /// wrapper by default.
    pub fn default_retry_eligible(self) -> bool {
        matches!(
            self,
            ErrorKind::Transport
                | ErrorKind::RateLimited
                | ErrorKind::Timeout
                | ErrorKind::Upstream5xx
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ConfigMissing => "config_missing",
            ErrorKind::Transport => "transport",
            ErrorKind::Auth => "auth",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Upstream5xx => "upstream_5xx",
            ErrorKind::Upstream4xx => "upstream_4xx",
            ErrorKind::Validation => "validation",
            ErrorKind::Parse => "parse",
            ErrorKind::CriticError => "critic_error",
            ErrorKind::RetrievalExhausted => "retrieval_exhausted",
            ErrorKind::CitationInvalid => "citation_invalid",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Shared typed error.
#[derive(thiserror::Error, Debug, Clone)]
#[error("{}: {}", .kind.as_str(), .message)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    /// Upstream request id when the service returned one, else a
    /// locally generated UUID.
    pub correlation_id: String,
    pub retry_eligible: bool,
    /// Structured context for diagnostics (never user-visible).
    pub context: Option<serde_json::Value>,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            correlation_id: uuid::Uuid::new_v4().to_string(),
            retry_eligible: kind.default_retry_eligible(),
            context: None,
        }
    }

    /// Replace the generated correlation id with an upstream one.
    pub fn with_correlation(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = id.into();
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = Some(context);
        self
    }

    /// Override the default retry eligibility for this kind.
    pub fn with_retry_eligible(mut self, eligible: bool) -> Self {
        self.retry_eligible = eligible;
        self
    }

    /// Map an upstream HTTP status to an error kind.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            429 => ErrorKind::RateLimited,
            s if s >= 500 => ErrorKind::Upstream5xx,
            _ => ErrorKind::Upstream4xx,
        };
        Self::new(kind, message)
    }

    // ── Shorthand constructors ─────────────────────────────────────

    pub fn config_missing(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigMissing, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::new(ErrorKind::Internal, format!("IO: {e}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::new(ErrorKind::Parse, format!("JSON: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
