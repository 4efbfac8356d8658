//! Eloquence orchestration server: WebSocket control-frame protocol plus the
//! ambient HTTP surface (session management, health, metrics) described in
//! spec §6.

pub mod auth;
pub mod http;
pub mod metrics;
pub mod rate_limit;
pub mod session;
pub mod state;
pub mod websocket;

pub use auth::auth_middleware;
pub use http::create_router;
pub use metrics::{
    init_metrics, record_error, record_llm_latency, record_request, record_stt_latency,
    record_total_latency, record_tts_latency,
};
pub use rate_limit::{RateLimitError, RateLimiter};
pub use session::{Session, SessionDependencies, SessionManager};
pub use state::AppState;
pub use websocket::websocket_handler;

use thiserror::Error;

/// Server-local error set. Mirrors the closed kind set in
/// [`eloquence_core::Error`] plus the handful of outcomes that only make
/// sense at the HTTP/WebSocket boundary (`NotFound` for an unknown session
/// id, `Overloaded` once [`SessionManager`] is at capacity).
#[derive(Error, Debug, Clone)]
pub enum ServerError {
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

impl ServerError {
    /// The `{code}` field carried on an outbound `error` control frame and
    /// HTTP error body (spec §7).
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::Auth(_) => "auth",
            ServerError::Validation(_) => "validation",
            ServerError::Overloaded(_) => "overloaded",
            ServerError::Upstream(_) => "upstream",
            ServerError::Cancelled => "cancelled",
            ServerError::Timeout => "timeout",
            ServerError::Transport(_) => "transport",
            ServerError::SegmentTooSmall => "segment_too_small",
            ServerError::SlowConsumer => "slow_consumer",
            ServerError::NotFound(_) => "not_found",
            ServerError::Internal(_) => "internal",
        }
    }
}

impl From<eloquence_core::Error> for ServerError {
    fn from(err: eloquence_core::Error) -> Self {
        match err {
            eloquence_core::Error::Auth(m) => ServerError::Auth(m),
            eloquence_core::Error::Validation(m) => ServerError::Validation(m),
            eloquence_core::Error::Overloaded(m) => ServerError::Overloaded(m),
            eloquence_core::Error::Upstream(m) => ServerError::Upstream(m),
            eloquence_core::Error::Cancelled => ServerError::Cancelled,
            eloquence_core::Error::Timeout => ServerError::Timeout,
            eloquence_core::Error::Transport(m) => ServerError::Transport(m),
            eloquence_core::Error::SegmentTooSmall => ServerError::SegmentTooSmall,
            eloquence_core::Error::SlowConsumer => ServerError::SlowConsumer,
            eloquence_core::Error::NotFound(m) => ServerError::NotFound(m),
            eloquence_core::Error::Internal(m) => ServerError::Internal(m),
        }
    }
}

impl From<ServerError> for axum::http::StatusCode {
    fn from(err: ServerError) -> Self {
        match err {
            ServerError::Auth(_) => axum::http::StatusCode::UNAUTHORIZED,
            ServerError::Validation(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::Overloaded(_) => axum::http::StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Upstream(_) => axum::http::StatusCode::BAD_GATEWAY,
            ServerError::Cancelled => axum::http::StatusCode::BAD_REQUEST,
            ServerError::Timeout => axum::http::StatusCode::GATEWAY_TIMEOUT,
            ServerError::Transport(_) => axum::http::StatusCode::BAD_REQUEST,
            ServerError::SegmentTooSmall => axum::http::StatusCode::BAD_REQUEST,
            ServerError::SlowConsumer => axum::http::StatusCode::TOO_MANY_REQUESTS,
            ServerError::NotFound(_) => axum::http::StatusCode::NOT_FOUND,
            ServerError::Internal(_) => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl axum::response::IntoResponse for ServerError {
    fn into_response(self) -> axum::response::Response {
        let status: axum::http::StatusCode = self.clone().into();
        let body = serde_json::json!({ "code": self.code(), "message": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
