//! Eloquence orchestration server entry point.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use eloquence_config::{load_settings, AgentProfile, ScenarioTemplate, Settings};
use eloquence_llm::backend::{LlmClientConfig, OpenAIBackend};
use eloquence_persistence::{FeedbackSink, FilesystemFeedbackSink};
use eloquence_pipeline::{AsrHttpClient, TtsHttpClient, VadHttpClient};
use eloquence_server::state::AppStateDependencies;
use eloquence_server::{create_router, init_metrics, AppState};

const DEFAULT_AGENT_PROFILE_PATH: &str = "config/agent_profile.toml";
const DEFAULT_SCENARIO_PATH: &str = "config/scenario.toml";
/// Additional profiles/scenarios selectable per-session by id (spec §6
/// `POST /sessions` `agent_profile_id`/`scenario_id`) live alongside the
/// single default file as `*.toml` siblings in these directories.
const AGENT_PROFILES_DIR: &str = "config/agent_profiles";
const SCENARIOS_DIR: &str = "config/scenarios";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match load_settings() {
        Ok(settings) => {
            eprintln!("loaded configuration from config/default.toml and environment");
            settings
        },
        Err(e) => {
            eprintln!("warning: failed to load config: {e}. using defaults.");
            Settings::default()
        },
    };

    init_tracing(&config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = ?config.environment,
        "starting eloquence orchestrator"
    );

    let default_agent_profile = load_agent_profile(DEFAULT_AGENT_PROFILE_PATH);
    let default_scenario_template = load_scenario_template(DEFAULT_SCENARIO_PATH);
    let default_agent_profile_id = default_agent_profile.id.clone();
    let default_scenario_id = default_scenario_template.id.clone();
    tracing::info!(
        agent = %default_agent_profile_id,
        scenario = %default_scenario_id,
        "loaded default agent profile and scenario template"
    );

    let mut agent_profiles = load_agent_profiles_dir(AGENT_PROFILES_DIR);
    agent_profiles.insert(default_agent_profile_id.clone(), default_agent_profile);
    let mut scenario_templates = load_scenario_templates_dir(SCENARIOS_DIR);
    scenario_templates.insert(default_scenario_id.clone(), default_scenario_template);
    tracing::info!(
        agent_profile_count = agent_profiles.len(),
        scenario_count = scenario_templates.len(),
        "loaded per-session agent profile/scenario registry"
    );

    let vad_model = Arc::new(VadHttpClient::new(vad_endpoint_from_asr(&config.asr_api_url)));
    let asr_model =
        Arc::new(AsrHttpClient::new(config.asr_api_url.clone(), std::time::Duration::from_secs(10)));
    let tts_model =
        Arc::new(TtsHttpClient::new(config.tts.api_url.clone(), std::time::Duration::from_secs(10)));

    let llm_backend: Arc<dyn eloquence_llm::LlmBackend> = Arc::new(OpenAIBackend::new(LlmClientConfig {
        endpoint: config.llm.local_api_url.clone(),
        api_key: std::env::var("LLM_API_KEY").ok(),
        model: std::env::var("LLM_MODEL").unwrap_or_else(|_| "llama-3".to_string()),
        max_tokens: config.llm.max_max_tokens,
        temperature: config.llm.temperature,
        top_p: 0.9,
        timeout: config.llm.timeout(),
        max_retries: 3,
        initial_backoff: std::time::Duration::from_millis(100),
    })?);

    let feedback_sink: Arc<dyn FeedbackSink> = Arc::new(FilesystemFeedbackSink::new(
        config.audio_storage_path.clone(),
        config.feedback_storage_path.clone(),
    ));

    let metrics_handle = init_metrics();
    tracing::info!("initialized prometheus metrics at /metrics");

    let deps = AppStateDependencies {
        agent_profiles,
        scenario_templates,
        default_agent_profile_id,
        default_scenario_id,
        vad_model,
        asr_model,
        tts_model,
        llm_backend,
        feedback_sink,
        metrics_handle,
    };

    let port = config.server.port;
    let state = AppState::new(config, deps);
    // Held for the life of the process: dropping it would close the watch
    // channel and spin the cleanup task's select loop.
    let _cleanup_shutdown = state.sessions.start_cleanup_task();

    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shutdown complete");
    Ok(())
}

/// The VAD and ASR models are commonly colocated behind the same speech
/// stack; default the VAD probe to the ASR host unless `VAD_API_URL`
/// overrides it (spec §4.2 "Model is external").
fn vad_endpoint_from_asr(asr_api_url: &str) -> String {
    std::env::var("VAD_API_URL").unwrap_or_else(|_| asr_api_url.to_string())
}

/// Waits for Ctrl+C or SIGTERM so `axum::serve` can drain in-flight
/// WebSocket sessions before exiting.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}

fn init_tracing(config: &Settings) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("eloquence={},tower_http=debug", config.observability.log_level).into()
    });

    let subscriber = tracing_subscriber::registry().with(env_filter);
    if config.observability.log_json {
        subscriber.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Loads the static Agent Profile (spec §3) from `path`, falling back to a
/// bundled default coach if the file is absent or fails to parse.
fn load_agent_profile(path: &str) -> AgentProfile {
    match std::fs::read_to_string(Path::new(path)) {
        Ok(raw) => match AgentProfile::from_toml_str(&raw) {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!(%path, error = %e, "failed to parse agent profile, using default");
                default_agent_profile()
            },
        },
        Err(_) => {
            tracing::info!(%path, "agent profile not found, using default");
            default_agent_profile()
        },
    }
}

/// Loads the static Scenario Template (spec §3) from `path`, falling back to
/// a bundled default single-step scenario if the file is absent or invalid.
fn load_scenario_template(path: &str) -> ScenarioTemplate {
    match std::fs::read_to_string(Path::new(path)) {
        Ok(raw) => match ScenarioTemplate::from_toml_str(&raw) {
            Ok(template) => template,
            Err(e) => {
                tracing::warn!(%path, error = %e, "failed to parse scenario template, using default");
                default_scenario_template()
            },
        },
        Err(_) => {
            tracing::info!(%path, "scenario template not found, using default");
            default_scenario_template()
        },
    }
}

/// Reads every `*.toml` file directly under `dir` as an [`AgentProfile`],
/// keyed by its own `id` field. A missing directory yields an empty map
/// rather than an error — only the bundled default profile is required.
fn load_agent_profiles_dir(dir: &str) -> HashMap<String, AgentProfile> {
    let mut profiles = HashMap::new();
    let entries = match std::fs::read_dir(Path::new(dir)) {
        Ok(entries) => entries,
        Err(_) => {
            tracing::info!(%dir, "no additional agent profile directory found");
            return profiles;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("toml") {
            continue;
        }
        match std::fs::read_to_string(&path).ok().and_then(|raw| AgentProfile::from_toml_str(&raw).ok()) {
            Some(profile) => {
                tracing::info!(agent = %profile.id, path = %path.display(), "loaded agent profile");
                profiles.insert(profile.id.clone(), profile);
            }
            None => tracing::warn!(path = %path.display(), "failed to parse agent profile, skipping"),
        }
    }
    profiles
}

/// Reads every `*.toml` file directly under `dir` as a [`ScenarioTemplate`],
/// keyed by its own `id` field. A missing directory yields an empty map
/// rather than an error — only the bundled default scenario is required.
fn load_scenario_templates_dir(dir: &str) -> HashMap<String, ScenarioTemplate> {
    let mut templates = HashMap::new();
    let entries = match std::fs::read_dir(Path::new(dir)) {
        Ok(entries) => entries,
        Err(_) => {
            tracing::info!(%dir, "no additional scenario directory found");
            return templates;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("toml") {
            continue;
        }
        match std::fs::read_to_string(&path).ok().and_then(|raw| ScenarioTemplate::from_toml_str(&raw).ok()) {
            Some(template) => {
                tracing::info!(scenario = %template.id, path = %path.display(), "loaded scenario template");
                templates.insert(template.id.clone(), template);
            }
            None => tracing::warn!(path = %path.display(), "failed to parse scenario template, skipping"),
        }
    }
    templates
}

fn default_agent_profile() -> AgentProfile {
    AgentProfile::from_toml_str(
        r#"
        id = "coach-fr-01"
        display_name = "Claire"
        system_prompt_template = "Tu es Claire, une coach vocale bienveillante qui aide l'apprenant a s'entrainer pour un entretien."
        voice_id = "fr-FR-Standard-A"
        default_emotion = "neutre"
        "#,
    )
    .expect("bundled default agent profile is valid")
}

fn default_scenario_template() -> ScenarioTemplate {
    ScenarioTemplate::from_toml_str(
        r#"
        id = "entretien_embauche"
        title = "Entretien d'embauche"
        first_step_id = "presentation"

        [[variables]]
        name = "nom_candidat"
        type = "text"
        required = true

        [[steps]]
        id = "presentation"
        name = "Presentation"
        prompt_template = "Demande au candidat {nom_candidat} de se presenter."
        expected_variables = ["nom_candidat"]
        successors = ["cloture"]

        [[steps]]
        id = "cloture"
        name = "Cloture"
        prompt_template = "Remercie le candidat et conclus l'entretien."
        terminal = true
        "#,
    )
    .expect("bundled default scenario template is valid")
}
