//! Shared application state handed to every HTTP/WebSocket handler.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusHandle;
use parking_lot::RwLock;

use eloquence_config::{load_settings, AgentProfile, ScenarioTemplate, Settings};
use eloquence_llm::LlmBackend;
use eloquence_persistence::{FeedbackSink, InMemoryTtsCache};
use eloquence_pipeline::{GateConfig, TtsCache};

use crate::rate_limit::RateLimiter;
use crate::session::SessionManager;
use crate::ServerError;

/// Shared, cloneable application state (spec §9 Design Notes — handlers
/// receive this via axum's `State` extractor).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RwLock<Settings>>,
    pub sessions: Arc<SessionManager>,
    pub rate_limiter: Arc<RateLimiter>,

    /// Every known Agent Profile/Scenario Template, keyed by their own
    /// `id` field, so a session can request one by id (spec §3/§6
    /// `POST /sessions`). `default_*_id` is used when the caller doesn't
    /// specify one.
    pub agent_profiles: Arc<HashMap<String, AgentProfile>>,
    pub scenario_templates: Arc<HashMap<String, ScenarioTemplate>>,
    pub default_agent_profile_id: String,
    pub default_scenario_id: String,
    pub vad_config: GateConfig,

    pub vad_model: Arc<dyn eloquence_core::VadModel>,
    pub asr_model: Arc<dyn eloquence_core::Transcribe>,
    pub tts_model: Arc<dyn eloquence_core::Synthesize>,
    pub llm_backend: Arc<dyn LlmBackend>,

    pub tts_cache: Arc<InMemoryTtsCache>,
    pub feedback_sink: Arc<dyn FeedbackSink>,
    pub metrics_handle: PrometheusHandle,
}

pub struct AppStateDependencies {
    pub agent_profiles: HashMap<String, AgentProfile>,
    pub scenario_templates: HashMap<String, ScenarioTemplate>,
    pub default_agent_profile_id: String,
    pub default_scenario_id: String,
    pub vad_model: Arc<dyn eloquence_core::VadModel>,
    pub asr_model: Arc<dyn eloquence_core::Transcribe>,
    pub tts_model: Arc<dyn eloquence_core::Synthesize>,
    pub llm_backend: Arc<dyn LlmBackend>,
    pub feedback_sink: Arc<dyn FeedbackSink>,
    pub metrics_handle: PrometheusHandle,
}

impl AppState {
    pub fn new(config: Settings, deps: AppStateDependencies) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(&config.auth));
        let max_connections = config.server.max_connections;
        let tts_cache = Arc::new(InMemoryTtsCache::new(config.tts.ttl()));
        // Transport frames are 20ms (spec §6); min_speech_frames=2 matches
        // spec §4.2 "stays above for at least 2 consecutive frames".
        let frame_ms = 20;
        let vad_config = GateConfig {
            threshold: config.vad.threshold,
            min_speech_frames: 2,
            min_silence_frames: ((config.vad.min_silence_duration_ms / frame_ms).max(1)) as usize,
            speech_pad_ms: config.vad.speech_pad_ms,
            frame_ms,
            ..GateConfig::default()
        };

        Self {
            config: Arc::new(RwLock::new(config)),
            sessions: Arc::new(SessionManager::new(max_connections)),
            rate_limiter,
            agent_profiles: Arc::new(deps.agent_profiles),
            scenario_templates: Arc::new(deps.scenario_templates),
            default_agent_profile_id: deps.default_agent_profile_id,
            default_scenario_id: deps.default_scenario_id,
            vad_config,
            vad_model: deps.vad_model,
            asr_model: deps.asr_model,
            tts_model: deps.tts_model,
            llm_backend: deps.llm_backend,
            tts_cache,
            feedback_sink: deps.feedback_sink,
            metrics_handle: deps.metrics_handle,
        }
    }

    pub fn tts_cache_port(&self) -> Option<Arc<dyn TtsCache>> {
        Some(self.tts_cache.clone())
    }

    /// Resolves an Agent Profile by id, falling back to
    /// `default_agent_profile_id` when `id` is `None` (spec §6
    /// `POST /sessions` `agent_profile_id`).
    pub fn resolve_agent_profile(&self, id: Option<&str>) -> Result<AgentProfile, ServerError> {
        let key = id.unwrap_or(&self.default_agent_profile_id);
        self.agent_profiles
            .get(key)
            .cloned()
            .ok_or_else(|| ServerError::NotFound(format!("unknown agent profile '{key}'")))
    }

    /// Resolves a Scenario Template by id, falling back to
    /// `default_scenario_id` when `id` is `None` (spec §6 `POST /sessions`
    /// `scenario_id`).
    pub fn resolve_scenario_template(&self, id: Option<&str>) -> Result<ScenarioTemplate, ServerError> {
        let key = id.unwrap_or(&self.default_scenario_id);
        self.scenario_templates
            .get(key)
            .cloned()
            .ok_or_else(|| ServerError::NotFound(format!("unknown scenario '{key}'")))
    }

    /// Reloads configuration from files/env (spec §6 `/admin/reload-config`).
    pub fn reload_config(&self) -> Result<(), String> {
        let new_config = load_settings().map_err(|e| format!("failed to reload config: {}", e))?;
        *self.config.write() = new_config;
        tracing::info!("configuration reloaded successfully");
        Ok(())
    }

    pub fn get_config(&self) -> parking_lot::RwLockReadGuard<'_, Settings> {
        self.config.read()
    }

    pub fn session_timeout(&self) -> Duration {
        crate::session::DEFAULT_SESSION_TIMEOUT
    }
}
