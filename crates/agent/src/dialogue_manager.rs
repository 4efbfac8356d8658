//! Dialogue Manager: builds the LLM prompt from the agent profile and
//! current scenario step, calls the LLM Client, tags the response with an
//! emotion, and degrades to a canned fallback phrase on failure or timeout
//! (spec §4.4).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use eloquence_config::AgentProfile;
use eloquence_core::{CancellationHandle, Emotion, Turn};
use eloquence_llm::{fallback_phrase, LlmBackend, Message, PromptBuilder};

use crate::emotion::tag;
use crate::scenario_engine::ScenarioEngine;

/// A growing reply is re-emitted on a sentence boundary or this interval,
/// whichever comes first (spec §4.4 step 4).
const PARTIAL_EMIT_INTERVAL: Duration = Duration::from_millis(250);

pub struct DialogueManager {
    backend: Arc<dyn LlmBackend>,
    profile: AgentProfile,
}

#[derive(Debug, Clone)]
pub struct DialogueResponse {
    pub text: String,
    pub emotion: Emotion,
    pub degraded: bool,
}

impl DialogueManager {
    pub fn new(backend: Arc<dyn LlmBackend>, profile: AgentProfile) -> Self {
        Self { backend, profile }
    }

    /// Produces the agent's next turn text. On any LLM failure (spec §4.4
    /// Failure path) returns one of the six canned fallback phrases instead
    /// of propagating the error, tagged `degraded = true` so downstream
    /// consumers (Feedback Sink, transcript) can distinguish it.
    pub async fn respond(
        &self,
        scenario: &ScenarioEngine,
        history: &[Turn],
        learner_utterance: &str,
        cancellation: CancellationHandle,
    ) -> DialogueResponse {
        self.respond_streaming(scenario, history, learner_utterance, cancellation, None).await
    }

    /// Same as [`Self::respond`], additionally re-emitting the growing
    /// reply through `partials` on a sentence boundary or every
    /// [`PARTIAL_EMIT_INTERVAL`], whichever comes first (spec §4.4 step 4),
    /// so the transport can show live partial text before the full turn
    /// finishes generating.
    pub async fn respond_streaming(
        &self,
        scenario: &ScenarioEngine,
        history: &[Turn],
        learner_utterance: &str,
        cancellation: CancellationHandle,
        partials: Option<mpsc::Sender<String>>,
    ) -> DialogueResponse {
        let system_prompt = self
            .profile
            .system_prompt_template
            .replace("{scenario_prompt}", &scenario.render_current_prompt());

        let mut builder = PromptBuilder::new().with_system_prompt(system_prompt);
        for turn in history {
            let message = match turn.role {
                eloquence_core::TurnRole::Learner => Message::user(turn.text.clone()),
                eloquence_core::TurnRole::Agent => Message::assistant(turn.text.clone()),
            };
            builder.push_history(message);
        }
        builder.push_history(Message::user(learner_utterance.to_string()));
        let messages = builder.build();

        let backend = self.backend.clone();
        let (token_tx, token_rx) = mpsc::channel::<String>(32);
        let generation = tokio::spawn(async move { backend.generate_stream(&messages, token_tx, cancellation).await });

        drain_partials(token_rx, partials).await;

        let outcome = match generation.await {
            Ok(result) => result,
            Err(join_error) => {
                tracing::warn!(%join_error, "llm generation task panicked, falling back to canned phrase");
                Err(eloquence_llm::LlmError::Generation(join_error.to_string()))
            }
        };

        match outcome {
            Ok(result) => {
                let (text, emotion) = tag(&result.text);
                DialogueResponse { text, emotion, degraded: false }
            }
            Err(error) => {
                tracing::warn!(%error, "llm call failed, falling back to canned phrase");
                let emotion = Emotion::Neutre;
                DialogueResponse {
                    text: fallback_phrase(emotion).to_string(),
                    emotion,
                    degraded: true,
                }
            }
        }
    }
}

/// Drains `token_rx` until the stream closes, re-emitting the accumulated
/// buffer through `partials` on a sentence boundary or every
/// [`PARTIAL_EMIT_INTERVAL`], whichever comes first. Returns the fully
/// accumulated text (unused by the caller today, kept for callers that
/// want the streamed text independent of the final `GenerationResult`).
async fn drain_partials(mut token_rx: mpsc::Receiver<String>, partials: Option<mpsc::Sender<String>>) -> String {
    let mut buffer = String::new();
    let mut dirty = false;
    let mut last_emit = tokio::time::Instant::now();

    loop {
        tokio::select! {
            token = token_rx.recv() => {
                match token {
                    Some(piece) => {
                        buffer.push_str(&piece);
                        dirty = true;
                        if buffer.trim_end().ends_with(['.', '!', '?']) {
                            emit_partial(&partials, &buffer).await;
                            dirty = false;
                            last_emit = tokio::time::Instant::now();
                        }
                    }
                    None => break,
                }
            }
            _ = tokio::time::sleep_until(last_emit + PARTIAL_EMIT_INTERVAL) => {
                if dirty {
                    emit_partial(&partials, &buffer).await;
                    dirty = false;
                }
                last_emit = tokio::time::Instant::now();
            }
        }
    }

    if dirty {
        emit_partial(&partials, &buffer).await;
    }

    buffer
}

async fn emit_partial(partials: &Option<mpsc::Sender<String>>, text: &str) {
    if let Some(tx) = partials {
        let _ = tx.send(text.to_string()).await;
    }
}
