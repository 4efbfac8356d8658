//! HTTP surface: session lifecycle, feedback retrieval, and the ambient
//! health/metrics/admin routes (spec §6).

use axum::{
    extract::{ConnectInfo, Path, Query, State},
    http::{HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::auth_middleware;
use crate::metrics::metrics_handler;
use crate::session::SessionDependencies;
use crate::state::AppState;
use crate::websocket::websocket_handler;
use crate::ServerError;

pub fn create_router(state: AppState) -> Router {
    let cors_layer = {
        let config = state.config.read();
        build_cors_layer(&config.auth.allowed_origins)
    };

    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/:id", delete(delete_session))
        .route("/sessions/:id/feedback", get(get_feedback))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .route("/admin/reload-config", post(reload_config))
        .route("/ws/:session_id", get(ws_handler))
        .layer(axum::middleware::from_fn_with_state(state.clone(), auth_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors_layer)
        .with_state(state)
}

/// Builds the CORS layer from `auth.allowed_origins` (spec §6). An empty
/// list means no deployment-specific origins were configured; fail closed
/// to same-origin rather than defaulting to permissive.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        tracing::warn!("no CORS origins configured; cross-origin requests will be rejected");
        return CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!(%origin, "invalid CORS origin, skipping");
                None
            })
        })
        .collect();

    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any)
        .allow_credentials(true)
}

#[derive(Debug, Deserialize, Default)]
struct CreateSessionRequest {
    language: Option<String>,
    scenario_id: Option<String>,
    agent_profile_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateSessionResponse {
    session_id: String,
    language: String,
    voice_id: String,
}

async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<Json<CreateSessionResponse>, ServerError> {
    let language = request.language.unwrap_or_else(|| "fr".to_string());
    let agent_profile = state.resolve_agent_profile(request.agent_profile_id.as_deref())?;
    let scenario_template = state.resolve_scenario_template(request.scenario_id.as_deref())?;

    let deps = SessionDependencies {
        language: language.clone(),
        agent_profile,
        scenario_template,
        vad_model: state.vad_model.clone(),
        asr_model: state.asr_model.clone(),
        tts_model: state.tts_model.clone(),
        llm_backend: state.llm_backend.clone(),
        tts_cache: state.tts_cache_port(),
        vad_config: state.vad_config.clone(),
    };

    let session = state.sessions.create(deps).await?;
    Ok(Json(CreateSessionResponse {
        session_id: session.id.clone(),
        language,
        voice_id: session.voice_id.clone(),
    }))
}

/// Idempotent session end (spec §8 invariant 7): a second `DELETE` for a
/// session already gone still returns success, flagged so the caller can
/// tell the difference, rather than a 404.
async fn delete_session(State(state): State<AppState>, Path(id): Path<String>) -> Json<serde_json::Value> {
    let removed = state.sessions.remove(&id).await.is_some();
    Json(serde_json::json!({ "removed": removed }))
}

#[derive(Debug, Deserialize)]
struct FeedbackQuery {
    segment_id: u32,
    feedback_type: Option<String>,
}

/// Returns the persisted scoring job for one learner turn (spec §4.10
/// Persisted state layout: `{feedback_root}/{session_id}/{turn_index}.json`).
/// `feedback_type` narrows the response to that field when present,
/// otherwise the full scoring document is returned.
async fn get_feedback(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<FeedbackQuery>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let path = {
        let config = state.get_config();
        std::path::Path::new(&config.feedback_storage_path)
            .join(&session_id)
            .join(format!("{}.json", query.segment_id))
    };

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| ServerError::NotFound(format!("no feedback for segment {}", query.segment_id)))?;
    let document: serde_json::Value =
        serde_json::from_slice(&bytes).map_err(|e| ServerError::Internal(e.to_string()))?;

    match query.feedback_type {
        Some(field) => Ok(Json(document.get(&field).cloned().unwrap_or(serde_json::Value::Null))),
        None => Ok(Json(document)),
    }
}

async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let active_sessions = state.sessions.count().await;
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "healthy",
            "version": env!("CARGO_PKG_VERSION"),
            "active_sessions": active_sessions,
        })),
    )
}

/// Readiness probes the downstream VAD/ASR/LLM/TTS HTTP endpoints with a
/// short timeout (spec §9 Design Notes — degrade, don't crash, on a
/// downstream outage; readiness just surfaces it before traffic lands).
async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let (asr_url, llm_url, tts_url) = {
        let config = state.get_config();
        (config.asr_api_url.clone(), config.llm.local_api_url.clone(), config.tts.api_url.clone())
    };

    let mut ready = true;
    let mut checks = serde_json::Map::new();

    for (name, url) in [("asr", asr_url), ("llm", llm_url), ("tts", tts_url)] {
        let status = match tokio::time::timeout(std::time::Duration::from_secs(2), reqwest::get(&url)).await {
            Ok(Ok(resp)) if resp.status().is_success() || resp.status().is_client_error() => "ok",
            Ok(Ok(_)) => {
                ready = false;
                "error"
            }
            Ok(Err(_)) => {
                ready = false;
                "unreachable"
            }
            Err(_) => {
                ready = false;
                "timeout"
            }
        };
        checks.insert(name.to_string(), serde_json::json!({ "status": status, "url": url }));
    }

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(serde_json::json!({ "status": if ready { "ready" } else { "not_ready" }, "checks": checks })))
}

async fn reload_config(State(state): State<AppState>) -> impl IntoResponse {
    match state.reload_config() {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "status": "success" }))),
        Err(e) => {
            tracing::error!(error = %e, "config reload failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "status": "error", "message": e })))
        }
    }
}

async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Result<impl IntoResponse, StatusCode> {
    let session = state.sessions.get(&session_id).await.ok_or(StatusCode::NOT_FOUND)?;
    Ok(ws.on_upgrade(move |socket| websocket_handler(socket, session, state, addr)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cors_layer_builds_for_empty_and_configured_origins() {
        let _ = build_cors_layer(&[]);
        let _ = build_cors_layer(&["https://example.com".to_string()]);
    }
}
