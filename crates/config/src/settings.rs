//! Layered settings loading (spec §6 "Configuration (environment)").
//!
//! The loading *mechanism* follows the teacher's `config`-crate pattern:
//! file defaults overlaid by an environment source, then validated. The
//! teacher nests its env vars under a `VOICE_AGENT__SECTION__FIELD` prefix;
//! this deployment is single-tenant, so the environment source registers
//! the flat, single-segment key names spec.md states literally (`API_KEY`,
//! `VAD_THRESHOLD`, ...) with no prefix and no separator.

use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ws_path: default_ws_path(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_ws_path() -> String {
    "/ws".to_string()
}
fn default_max_connections() -> usize {
    1000
}

/// `X-API-Key` auth + per-IP rate limiting (spec §6 "Authentication").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_max_requests_per_minute")]
    pub max_requests_per_minute: u32,
    #[serde(default = "default_failed_attempts_limit")]
    pub failed_attempts_limit: u32,
    #[serde(default = "default_block_duration_s")]
    pub block_duration_s: u64,
}

fn default_max_requests_per_minute() -> u32 {
    60
}
fn default_failed_attempts_limit() -> u32 {
    3
}
fn default_block_duration_s() -> u64 {
    300
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            allowed_origins: Vec::new(),
            max_requests_per_minute: default_max_requests_per_minute(),
            failed_attempts_limit: default_failed_attempts_limit(),
            block_duration_s: default_block_duration_s(),
        }
    }
}

impl AuthConfig {
    pub fn block_duration(&self) -> Duration {
        Duration::from_secs(self.block_duration_s)
    }
}

/// VAD Gate tuning (spec §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    #[serde(default = "default_vad_threshold")]
    pub threshold: f32,
    #[serde(default = "default_vad_min_silence_ms")]
    pub min_silence_duration_ms: u32,
    #[serde(default = "default_vad_speech_pad_ms")]
    pub speech_pad_ms: u32,
}

fn default_vad_threshold() -> f32 {
    0.45
}
fn default_vad_min_silence_ms() -> u32 {
    2000
}
fn default_vad_speech_pad_ms() -> u32 {
    400
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: default_vad_threshold(),
            min_silence_duration_ms: default_vad_min_silence_ms(),
            speech_pad_ms: default_vad_speech_pad_ms(),
        }
    }
}

/// LLM Client call bounds (spec §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_timeout_s")]
    pub timeout_s: u64,
    #[serde(default = "default_llm_max_tokens")]
    pub max_max_tokens: usize,
    #[serde(default = "default_llm_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_local_api_url")]
    pub local_api_url: String,
}

fn default_llm_timeout_s() -> u64 {
    30
}
fn default_llm_max_tokens() -> usize {
    512
}
fn default_llm_temperature() -> f32 {
    0.7
}
fn default_llm_local_api_url() -> String {
    "http://localhost:11434".to_string()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            timeout_s: default_llm_timeout_s(),
            max_max_tokens: default_llm_max_tokens(),
            temperature: default_llm_temperature(),
            local_api_url: default_llm_local_api_url(),
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_s)
    }
}

/// TTS cache + upstream (spec §4.7, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default = "default_true")]
    pub use_cache: bool,
    #[serde(default = "default_tts_cache_prefix")]
    pub cache_prefix: String,
    #[serde(default = "default_tts_cache_expiration_s")]
    pub cache_expiration_s: u64,
    #[serde(default = "default_tts_api_url")]
    pub api_url: String,
}

fn default_true() -> bool {
    true
}
fn default_tts_cache_prefix() -> String {
    "eloquence:tts".to_string()
}
fn default_tts_cache_expiration_s() -> u64 {
    24 * 3600
}
fn default_tts_api_url() -> String {
    "http://localhost:5002".to_string()
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            use_cache: true,
            cache_prefix: default_tts_cache_prefix(),
            cache_expiration_s: default_tts_cache_expiration_s(),
            api_url: default_tts_api_url(),
        }
    }
}

impl TtsConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.cache_expiration_s)
    }
}

fn default_asr_api_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_audio_storage_path() -> String {
    "./data/audio".to_string()
}
fn default_feedback_storage_path() -> String {
    "./data/feedback".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub vad: VadConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default = "default_asr_api_url")]
    pub asr_api_url: String,
    #[serde(default = "default_audio_storage_path")]
    pub audio_storage_path: String,
    #[serde(default = "default_feedback_storage_path")]
    pub feedback_storage_path: String,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            environment: RuntimeEnvironment::default(),
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            vad: VadConfig::default(),
            llm: LlmConfig::default(),
            tts: TtsConfig::default(),
            asr_api_url: default_asr_api_url(),
            audio_storage_path: default_audio_storage_path(),
            feedback_storage_path: default_feedback_storage_path(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.validate_vad()?;
        self.validate_llm()?;
        Ok(())
    }

    pub fn validate_server(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".into(),
                message: "port must be nonzero".into(),
            });
        }
        if self.server.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.max_connections".into(),
                message: "must be nonzero".into(),
            });
        }
        if self.environment.is_production() && self.auth.api_key.is_none() {
            return Err(ConfigError::InvalidValue {
                field: "auth.api_key".into(),
                message: "production requires API_KEY to be set".into(),
            });
        }
        Ok(())
    }

    pub fn validate_vad(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.vad.threshold) {
            return Err(ConfigError::InvalidValue {
                field: "vad.threshold".into(),
                message: "must be within [0.0, 1.0]".into(),
            });
        }
        Ok(())
    }

    pub fn validate_llm(&self) -> Result<(), ConfigError> {
        if self.llm.timeout_s == 0 {
            return Err(ConfigError::InvalidValue {
                field: "llm.timeout_s".into(),
                message: "must be nonzero".into(),
            });
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::InvalidValue {
                field: "llm.temperature".into(),
                message: "must be within [0.0, 2.0]".into(),
            });
        }
        Ok(())
    }
}

/// Load settings: `config/default.toml` (if present) overlaid by the flat
/// environment keys named in spec §6, then validated.
pub fn load_settings() -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();
    builder = builder.add_source(File::with_name("config/default").required(false));

    builder = builder
        .set_override_option("server.port", std::env::var("PORT").ok())?
        .set_override_option("auth.api_key", std::env::var("API_KEY").ok())?
        .set_override_option(
            "auth.allowed_origins",
            std::env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect::<Vec<_>>()),
        )?
        .set_override_option(
            "auth.max_requests_per_minute",
            std::env::var("MAX_REQUESTS_PER_MINUTE").ok(),
        )?
        .set_override_option("vad.threshold", std::env::var("VAD_THRESHOLD").ok())?
        .set_override_option(
            "vad.min_silence_duration_ms",
            std::env::var("VAD_MIN_SILENCE_DURATION_MS").ok(),
        )?
        .set_override_option("vad.speech_pad_ms", std::env::var("VAD_SPEECH_PAD_MS").ok())?
        .set_override_option("llm.timeout_s", std::env::var("LLM_TIMEOUT_S").ok())?
        .set_override_option("llm.max_max_tokens", std::env::var("LLM_MAX_MAX_TOKENS").ok())?
        .set_override_option("llm.temperature", std::env::var("LLM_TEMPERATURE").ok())?
        .set_override_option("asr_api_url", std::env::var("ASR_API_URL").ok())?
        .set_override_option("llm.local_api_url", std::env::var("LLM_LOCAL_API_URL").ok())?
        .set_override_option("tts.api_url", std::env::var("TTS_API_URL").ok())?
        .set_override_option("tts.use_cache", std::env::var("TTS_USE_CACHE").ok())?
        .set_override_option("tts.cache_prefix", std::env::var("TTS_CACHE_PREFIX").ok())?
        .set_override_option(
            "tts.cache_expiration_s",
            std::env::var("TTS_CACHE_EXPIRATION_S").ok(),
        )?
        .set_override_option("audio_storage_path", std::env::var("AUDIO_STORAGE_PATH").ok())?
        .set_override_option(
            "feedback_storage_path",
            std::env::var("FEEDBACK_STORAGE_PATH").ok(),
        )?;

    // Honor RUST_LOG-style overrides without forcing a prefix on everything.
    builder = builder.add_source(Environment::default().separator("__").try_parsing(true));

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_literal_values() {
        let settings = Settings::default();
        assert_eq!(settings.vad.threshold, 0.45);
        assert_eq!(settings.vad.min_silence_duration_ms, 2000);
        assert_eq!(settings.vad.speech_pad_ms, 400);
        assert_eq!(settings.llm.timeout_s, 30);
        assert_eq!(settings.auth.max_requests_per_minute, 60);
        assert_eq!(settings.auth.failed_attempts_limit, 3);
        assert_eq!(settings.auth.block_duration_s, 300);
        assert_eq!(settings.tts.cache_expiration_s, 24 * 3600);
    }

    #[test]
    fn rejects_zero_port() {
        let mut settings = Settings::default();
        settings.server.port = 0;
        assert!(settings.validate_server().is_err());
    }

    #[test]
    fn production_requires_api_key() {
        let mut settings = Settings::default();
        settings.environment = RuntimeEnvironment::Production;
        assert!(settings.validate_server().is_err());
        settings.auth.api_key = Some("secret".into());
        assert!(settings.validate_server().is_ok());
    }

    #[test]
    fn rejects_out_of_range_vad_threshold() {
        let mut settings = Settings::default();
        settings.vad.threshold = 1.5;
        assert!(settings.validate_vad().is_err());
    }
}
