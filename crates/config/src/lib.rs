//! Configuration for the Eloquence voice-coaching orchestrator.
//!
//! Loading follows a layered `config`-crate pattern: an optional
//! `config/default.toml` overlaid by flat environment variables, then
//! validated (see [`settings::load_settings`]). Scenario templates and
//! agent profiles are static content loaded once at process or session
//! start, not tunable runtime settings.

pub mod agent_profile;
pub mod scenario;
pub mod settings;

pub use agent_profile::AgentProfile;
pub use scenario::{ScenarioStep, ScenarioTemplate, ScenarioVariable, VariableType};
pub use settings::{
    AuthConfig, LlmConfig, ObservabilityConfig, RuntimeEnvironment, ServerConfig, Settings,
    TtsConfig, VadConfig, load_settings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    #[error("failed to parse configuration: {0}")]
    ParseError(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("environment error: {0}")]
    Environment(String),
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
