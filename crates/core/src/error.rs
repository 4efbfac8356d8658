//! Closed error-kind set shared across the orchestrator.

use thiserror::Error;

/// Errors that can cross a component boundary inside a session.
///
/// The set is intentionally closed (see propagation policy in the design
/// doc): every crate-local error type converts into one of these variants
/// rather than growing the set.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("auth: {0}")]
    Auth(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("overloaded: {0}")]
    Overloaded(String),

    #[error("upstream failure: {0}")]
    Upstream(String),

    #[error("cancelled")]
    Cancelled,

    #[error("timeout")]
    Timeout,

    #[error("transport: {0}")]
    Transport(String),

    #[error("segment too small")]
    SegmentTooSmall,

    #[error("slow consumer")]
    SlowConsumer,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    /// The `{code}` field carried on an outbound `error` control frame.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Auth(_) => "auth",
            Error::Validation(_) => "validation",
            Error::Overloaded(_) => "overloaded",
            Error::Upstream(_) => "upstream",
            Error::Cancelled => "cancelled",
            Error::Timeout => "timeout",
            Error::Transport(_) => "transport",
            Error::SegmentTooSmall => "segment_too_small",
            Error::SlowConsumer => "slow_consumer",
            Error::NotFound(_) => "not_found",
            Error::Internal(_) => "internal",
        }
    }

    /// Whether this error is terminal for the session (per §7 propagation
    /// policy) vs. one that degrades the current turn and continues.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::SlowConsumer | Error::Transport(_) | Error::Internal(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
