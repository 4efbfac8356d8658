//! Per-session runtime state: phase FSM, interruption epoch, scenario
//! progress, and the pipeline components scoped to one learner connection
//! (spec §3 Session, §9 Design Notes — "scoped resources acquired on
//! Session construction, released on transition to Ended").
//!
//! Grounded on the teacher's `Session`/`SessionManager` (`touch`/
//! `is_expired`/`close` plus `start_cleanup_task`'s
//! `tokio::select!`-over-`watch`-shutdown idiom), generalized from an
//! `Arc<DomainAgent>` payload to this orchestrator's FSM/arbiter/scenario/
//! dialogue/pipeline bundle, and with the idle timeout changed to this
//! spec's 10-minute default (spec §8 scenario f).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{watch, RwLock};

use eloquence_agent::{DialogueManager, InterruptionArbiter, ScenarioEngine, SessionFsm};
use eloquence_config::{AgentProfile, ScenarioTemplate};
use eloquence_core::{
    new_session_id, CancellationHandle, CancellationSource, Epoch, PhaseEvent, SessionId, Synthesize, Transcribe,
    Turn, VadModel,
};
use eloquence_llm::LlmBackend;
use eloquence_pipeline::{AsrClient, AsrClientConfig, GateConfig, TtsCache, TtsPipeline, VadGate};

use crate::ServerError;

/// Default idle timeout: spec §8 scenario f, "idle 10 minutes -> session
/// closes".
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(30);

/// Everything one active connection needs, bundled so [`SessionManager`]
/// doesn't have to thread eight constructor arguments through `create`.
pub struct SessionDependencies {
    pub language: String,
    pub agent_profile: AgentProfile,
    pub scenario_template: ScenarioTemplate,
    pub vad_model: Arc<dyn VadModel>,
    pub asr_model: Arc<dyn Transcribe>,
    pub tts_model: Arc<dyn Synthesize>,
    pub llm_backend: Arc<dyn LlmBackend>,
    pub tts_cache: Option<Arc<dyn TtsCache>>,
    pub vad_config: GateConfig,
}

pub struct Session {
    pub id: SessionId,
    pub language: String,
    pub voice_id: String,

    pub fsm: Mutex<SessionFsm>,
    pub arbiter: InterruptionArbiter,
    pub scenario: Mutex<ScenarioEngine>,
    pub dialogue: DialogueManager,
    pub vad_gate: VadGate,
    pub asr_client: AsrClient,
    pub tts_pipeline: TtsPipeline,

    pub history: Mutex<Vec<Turn>>,
    turn_counter: AtomicU32,
    vad_pad_frames: usize,

    cancellation: CancellationSource,
    created_at: Instant,
    last_activity: Mutex<Instant>,
}

impl Session {
    fn new(id: SessionId, deps: SessionDependencies) -> Self {
        let (cancellation, _rx) = CancellationSource::new();
        let voice_id = deps.agent_profile.voice_id.clone();
        let vad_pad_frames = deps.vad_config.pad_frames();
        Self {
            id,
            language: deps.language.clone(),
            voice_id,
            fsm: Mutex::new(SessionFsm::new()),
            arbiter: InterruptionArbiter::new(),
            scenario: Mutex::new(ScenarioEngine::new(deps.scenario_template)),
            dialogue: DialogueManager::new(deps.llm_backend, deps.agent_profile),
            vad_gate: VadGate::new(deps.vad_model, deps.vad_config),
            asr_client: AsrClient::new(deps.asr_model, AsrClientConfig { language: deps.language, ..Default::default() }),
            tts_pipeline: TtsPipeline::new(deps.tts_model, deps.tts_cache),
            history: Mutex::new(Vec::new()),
            turn_counter: AtomicU32::new(0),
            vad_pad_frames,
            cancellation,
            created_at: Instant::now(),
            last_activity: Mutex::new(Instant::now()),
        }
    }

    /// Padding (in frames) the transport's segment accumulator should seed
    /// its preroll/trailing buffers with (spec §4.2 `speech_pad_ms`).
    pub fn vad_gate_pad_frames(&self) -> usize {
        self.vad_pad_frames
    }

    pub fn current_epoch(&self) -> Epoch {
        self.arbiter.current_epoch()
    }

    /// A fresh cancellation handle for a call issued under the current
    /// epoch; cooperative cancellation fires via [`Session::cancel_current`]
    /// or implicitly when the arbiter advances the epoch on barge-in.
    pub fn cancellation_handle(&self) -> CancellationHandle {
        self.cancellation.handle(self.current_epoch())
    }

    /// Cancels all in-flight calls issued under the current epoch, then
    /// resets the source so subsequent calls aren't born pre-cancelled.
    pub fn cancel_current(&self) {
        self.cancellation.fire();
        self.cancellation.reset();
    }

    pub fn next_turn_index(&self) -> u32 {
        self.turn_counter.fetch_add(1, Ordering::SeqCst)
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn is_idle_expired(&self, timeout: Duration) -> bool {
        self.last_activity.lock().elapsed() > timeout
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn apply_phase_event(&self, event: PhaseEvent) -> bool {
        self.fsm.lock().apply(event)
    }

    pub fn is_ended(&self) -> bool {
        self.fsm.lock().is_ended()
    }

    pub fn close(&self) {
        self.apply_phase_event(PhaseEvent::TransportClose);
        self.cancel_current();
    }
}

/// Owns every active [`Session`], evicting idle ones on a background tick
/// (spec §8 scenario f).
pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    max_sessions: usize,
    session_timeout: Duration,
    cleanup_interval: Duration,
}

impl SessionManager {
    pub fn new(max_sessions: usize) -> Self {
        Self::with_config(max_sessions, DEFAULT_SESSION_TIMEOUT, DEFAULT_CLEANUP_INTERVAL)
    }

    pub fn with_config(max_sessions: usize, session_timeout: Duration, cleanup_interval: Duration) -> Self {
        Self { sessions: RwLock::new(HashMap::new()), max_sessions, session_timeout, cleanup_interval }
    }

    pub async fn create(&self, deps: SessionDependencies) -> Result<Arc<Session>, ServerError> {
        let mut sessions = self.sessions.write().await;
        if sessions.len() >= self.max_sessions {
            self.evict_expired_locked(&mut sessions);
            if sessions.len() >= self.max_sessions {
                return Err(ServerError::Overloaded("max sessions reached".into()));
            }
        }

        let id = new_session_id();
        let session = Arc::new(Session::new(id.clone(), deps));
        sessions.insert(id, session.clone());
        Ok(session)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let removed = self.sessions.write().await.remove(id);
        if let Some(session) = &removed {
            session.close();
        }
        removed
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    fn evict_expired_locked(&self, sessions: &mut HashMap<SessionId, Arc<Session>>) {
        let timeout = self.session_timeout;
        sessions.retain(|_, session| {
            let expired = session.is_idle_expired(timeout);
            if expired {
                session.close();
            }
            !expired
        });
    }

    pub async fn cleanup_expired(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        self.evict_expired_locked(&mut sessions);
        before - sessions.len()
    }

    /// Spawns the background eviction loop. Grounded on the teacher's
    /// `start_cleanup_task`: a `tokio::select!` between an interval tick
    /// (skipping missed ticks rather than bursting) and a `watch` shutdown
    /// signal. Dropping the returned sender (or sending `true`) stops it.
    pub fn start_cleanup_task(self: &Arc<Self>) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let manager = self.clone();
        let interval = manager.cleanup_interval;

        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        let removed = manager.cleanup_expired().await;
                        if removed > 0 {
                            tracing::info!(removed, "evicted idle sessions");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use eloquence_core::{AudioFrame, CancellationHandle as CoreCancellationHandle, Emotion, Result, SpeechSegment, SynthesizedAudio, Transcript};
    use eloquence_llm::{GenerationResult, FinishReason};

    fn profile() -> AgentProfile {
        AgentProfile::from_toml_str(
            r#"
            id = "coach-fr-01"
            display_name = "Claire"
            system_prompt_template = "Tu es Claire. {scenario_prompt}"
            voice_id = "fr-FR-Standard-A"
            "#,
        )
        .unwrap()
    }

    fn scenario() -> ScenarioTemplate {
        ScenarioTemplate::from_toml_str(
            r#"
            id = "intro-call"
            title = "Cold open"
            first_step_id = "greet"

            [[steps]]
            id = "greet"
            name = "Greeting"
            prompt_template = "Greet the learner."
            terminal = true
            "#,
        )
        .unwrap()
    }

    struct NoopVad;
    #[async_trait]
    impl VadModel for NoopVad {
        async fn speech_probability(&self, _frame: &AudioFrame) -> Result<f32> {
            Ok(0.0)
        }
        fn name(&self) -> &str {
            "noop"
        }
    }

    struct NoopAsr;
    #[async_trait]
    impl Transcribe for NoopAsr {
        async fn transcribe(&self, _s: &SpeechSegment, _l: &str, _c: CoreCancellationHandle) -> Result<Transcript> {
            unimplemented!()
        }
        fn name(&self) -> &str {
            "noop"
        }
    }

    struct NoopTts;
    #[async_trait]
    impl Synthesize for NoopTts {
        async fn synthesize(&self, _t: &str, _l: &str, _v: &str, _e: Emotion, _c: CoreCancellationHandle) -> Result<SynthesizedAudio> {
            unimplemented!()
        }
        fn name(&self) -> &str {
            "noop"
        }
    }

    struct NoopLlm;
    #[async_trait]
    impl LlmBackend for NoopLlm {
        async fn generate(&self, _m: &[eloquence_llm::Message], _c: CoreCancellationHandle) -> std::result::Result<GenerationResult, eloquence_llm::LlmError> {
            Ok(GenerationResult { text: "ok".into(), tokens: 1, time_to_first_token_ms: 1, total_time_ms: 1, finish_reason: FinishReason::Stop })
        }
        async fn generate_stream(&self, _m: &[eloquence_llm::Message], tx: tokio::sync::mpsc::Sender<String>, _c: CoreCancellationHandle) -> std::result::Result<GenerationResult, eloquence_llm::LlmError> {
            let _ = tx.send("ok".to_string()).await;
            Ok(GenerationResult { text: "ok".into(), tokens: 1, time_to_first_token_ms: 1, total_time_ms: 1, finish_reason: FinishReason::Stop })
        }
        async fn is_available(&self) -> bool {
            true
        }
        fn model_name(&self) -> &str {
            "noop"
        }
    }

    fn deps() -> SessionDependencies {
        SessionDependencies {
            language: "fr".into(),
            agent_profile: profile(),
            scenario_template: scenario(),
            vad_model: Arc::new(NoopVad),
            asr_model: Arc::new(NoopAsr),
            tts_model: Arc::new(NoopTts),
            llm_backend: Arc::new(NoopLlm),
            tts_cache: None,
            vad_config: GateConfig::default(),
        }
    }

    #[tokio::test]
    async fn creates_and_retrieves_a_session() {
        let manager = SessionManager::new(10);
        let session = manager.create(deps()).await.unwrap();
        assert!(manager.get(&session.id).await.is_some());
        assert_eq!(manager.count().await, 1);
    }

    #[tokio::test]
    async fn rejects_creation_once_max_sessions_reached() {
        let manager = SessionManager::new(1);
        manager.create(deps()).await.unwrap();
        assert!(manager.create(deps()).await.is_err());
    }

    #[tokio::test]
    async fn remove_closes_and_drops_the_session() {
        let manager = SessionManager::new(10);
        let session = manager.create(deps()).await.unwrap();
        let id = session.id.clone();
        drop(session);
        let removed = manager.remove(&id).await.unwrap();
        assert!(removed.is_ended());
        assert!(manager.get(&id).await.is_none());
    }

    #[tokio::test]
    async fn cleanup_expired_evicts_idle_sessions() {
        let manager = SessionManager::with_config(10, Duration::from_millis(0), Duration::from_secs(30));
        manager.create(deps()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let removed = manager.cleanup_expired().await;
        assert_eq!(removed, 1);
        assert_eq!(manager.count().await, 0);
    }
}
