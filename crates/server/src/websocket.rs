//! WebSocket control-frame protocol: the duplex transport that carries
//! inbound PCM audio and session control messages, and outbound transcript/
//! audio/control frames, for one learner connection (spec §4.1, §6).
//!
//! Grounded on the teacher's `WebSocketHandler::handle_socket` split-sender
//! idiom (`socket.split()` plus an `Arc<Mutex<...>>` sender shared across
//! tasks), generalized from its `WsMessage` enum to this orchestrator's
//! `{type, epoch, payload}` control-frame envelope, and with turn processing
//! moved onto a per-turn spawned task so the frame-reading loop never blocks
//! on ASR/LLM/TTS round trips.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;

use eloquence_agent::ArbiterDecision;
use eloquence_core::{AudioFrame, Channels, Error as CoreError, PhaseEvent, SampleRate, SpeechSegment, Turn};
use eloquence_persistence::FeedbackArtifact;
use eloquence_pipeline::{GateEvent, TtsChunk};

use crate::session::Session;
use crate::state::AppState;

/// Outbound/inbound control frame envelope (spec §6 "every control frame is
/// `{type, epoch, payload}`").
#[derive(Debug, Clone, Serialize)]
struct ControlFrame<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    epoch: u64,
    payload: serde_json::Value,
}

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(60);

type Outbound = Arc<Mutex<futures::stream::SplitSink<WebSocket, Message>>>;

async fn send_frame(sender: &Outbound, kind: &str, epoch: u64, payload: serde_json::Value) {
    let frame = ControlFrame { kind, epoch, payload };
    let text = serde_json::to_string(&frame).expect("control frame always serializes");
    let _ = sender.lock().await.send(Message::Text(text)).await;
}

async fn send_error(sender: &Outbound, epoch: u64, error: &CoreError) {
    send_frame(sender, "error", epoch, json!({ "code": error.code(), "message": error.to_string() })).await;
}

/// Entry point wired from `http.rs`'s `/ws/:session_id` upgrade.
pub async fn websocket_handler(socket: WebSocket, session: Arc<Session>, state: AppState, _addr: SocketAddr) {
    let (sink, mut receiver) = socket.split();
    let sender: Outbound = Arc::new(Mutex::new(sink));

    session.touch();
    session.apply_phase_event(PhaseEvent::StartStream);
    send_frame(&sender, "stream_started", session.current_epoch().0, json!({ "session_id": session.id })).await;

    let heartbeat_task = spawn_heartbeat(sender.clone(), session.clone());
    let mut last_inbound = Instant::now();
    let mut accumulator = SegmentAccumulator::new(session.vad_gate_pad_frames());
    let mut frame_sequence: u64 = 0;

    while let Some(message) = receiver.next().await {
        let Ok(message) = message else { break };
        last_inbound = Instant::now();
        session.touch();

        match message {
            Message::Binary(pcm) => {
                frame_sequence += 1;
                handle_pcm_frame(&session, &state, &sender, &mut accumulator, pcm, frame_sequence).await;
            }
            Message::Text(text) => {
                if !handle_control_message(&session, &sender, &text).await {
                    break;
                }
            }
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => break,
        }

        if last_inbound.elapsed() > HEARTBEAT_TIMEOUT {
            send_error(&sender, session.current_epoch().0, &CoreError::Transport("inbound heartbeat timeout".into())).await;
            break;
        }
    }

    heartbeat_task.abort();
    finalize_session(&session, &state).await;
}

fn spawn_heartbeat(sender: Outbound, session: Arc<Session>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if session.is_ended() {
                break;
            }
            send_frame(&sender, "heartbeat", session.current_epoch().0, json!({})).await;
        }
    })
}

/// Handles one inbound JSON control frame. Returns `false` when the
/// connection should close.
async fn handle_control_message(session: &Arc<Session>, sender: &Outbound, text: &str) -> bool {
    let Ok(parsed) = serde_json::from_str::<serde_json::Value>(text) else {
        return true;
    };
    let kind = parsed.get("type").and_then(|v| v.as_str()).unwrap_or_default();

    match kind {
        "stop_stream" => {
            session.apply_phase_event(PhaseEvent::StopStream);
            false
        }
        "cancel" => {
            session.cancel_current();
            true
        }
        "ping" => {
            send_frame(sender, "heartbeat", session.current_epoch().0, json!({})).await;
            true
        }
        _ => true,
    }
}

/// Rolling preroll + active-speech byte accumulator sitting in front of the
/// ASR client. [`eloquence_pipeline::VadGate`] only classifies frames; it
/// keeps no audio of its own (spec §4.2 padding requirement), so the
/// transport layer owns the byte buffer the VAD hysteresis drives.
struct SegmentAccumulator {
    pad_frames: usize,
    preroll: std::collections::VecDeque<Vec<u8>>,
    active: Vec<u8>,
    trailing_pad: std::collections::VecDeque<Vec<u8>>,
}

impl SegmentAccumulator {
    fn new(pad_frames: usize) -> Self {
        let pad_frames = pad_frames.max(1);
        Self {
            pad_frames,
            preroll: std::collections::VecDeque::with_capacity(pad_frames),
            active: Vec::new(),
            trailing_pad: std::collections::VecDeque::with_capacity(pad_frames),
        }
    }

    fn push_preroll(&mut self, bytes: &[u8]) {
        if self.preroll.len() == self.pad_frames {
            self.preroll.pop_front();
        }
        self.preroll.push_back(bytes.to_vec());
    }

    fn begin(&mut self) {
        self.active.clear();
        self.trailing_pad.clear();
        for frame in &self.preroll {
            self.active.extend_from_slice(frame);
        }
    }

    fn push_speech(&mut self, bytes: &[u8]) {
        for padded in self.trailing_pad.drain(..) {
            self.active.extend_from_slice(&padded);
        }
        self.active.extend_from_slice(bytes);
    }

    fn push_trailing(&mut self, bytes: &[u8]) {
        if self.trailing_pad.len() == self.pad_frames {
            self.trailing_pad.pop_front();
        }
        self.trailing_pad.push_back(bytes.to_vec());
    }

    /// Finalizes the segment with up to `pad_frames` of trailing silence
    /// appended (spec §4.2 `speech_pad_ms` on both edges), discarding the
    /// remainder of the hysteresis's `min_silence_frames` trailing window.
    fn finish(&mut self) -> Vec<u8> {
        for padded in self.trailing_pad.drain(..) {
            self.active.extend_from_slice(&padded);
        }
        std::mem::take(&mut self.active)
    }
}

async fn handle_pcm_frame(
    session: &Arc<Session>,
    state: &AppState,
    sender: &Outbound,
    accumulator: &mut SegmentAccumulator,
    pcm: Vec<u8>,
    sequence: u64,
) {
    let frame = AudioFrame::from_pcm16(&pcm, SampleRate::Hz16000, Channels::Mono, sequence);
    let Ok((_, _, event, degraded)) = session.vad_gate.process_frame(&frame).await else { return };
    if degraded {
        send_frame(
            sender,
            "error",
            session.current_epoch().0,
            json!({ "code": "vad_degraded", "message": "vad model unavailable, using energy fallback" }),
        )
        .await;
    }

    match event {
        GateEvent::Silence => {
            accumulator.push_preroll(&pcm);
        }
        GateEvent::PotentialSpeechStart => {
            maybe_barge_in(session, sender).await;
            accumulator.push_preroll(&pcm);
        }
        GateEvent::SpeechConfirmed => {
            accumulator.begin();
            accumulator.push_speech(&pcm);
        }
        GateEvent::SpeechContinue => {
            accumulator.push_speech(&pcm);
        }
        GateEvent::PotentialSpeechEnd => {
            accumulator.push_trailing(&pcm);
        }
        GateEvent::SpeechEnd => {
            accumulator.push_trailing(&pcm);
            let pcm16 = accumulator.finish();
            let segment = SpeechSegment {
                duration: Duration::from_secs_f64(pcm16.len() as f64 / 2.0 / SampleRate::Hz16000.as_u32() as f64),
                pcm16,
                sample_rate: SampleRate::Hz16000,
                channels: Channels::Mono,
                encoding: eloquence_core::AudioEncoding::Pcm16,
                rms_energy_db: frame.energy_db,
            };
            spawn_turn(session.clone(), state.clone(), sender.clone(), segment);
        }
    }
}

/// Fires the Interruption Arbiter on a confirmed speech onset if the
/// session's current phase is interruptible, completing epoch-bump +
/// cancel + `tts_stop` within the 200ms budget (spec §4.8).
async fn maybe_barge_in(session: &Arc<Session>, sender: &Outbound) {
    let phase = session.fsm.lock().phase();
    if let ArbiterDecision::Interrupt { new_epoch } = session.arbiter.on_speech_onset(phase) {
        session.cancel_current();
        send_frame(sender, "tts_stop", new_epoch.0, json!({})).await;
        session.apply_phase_event(PhaseEvent::BargeIn);
    }
}

/// Runs the ASR -> Dialogue -> Emotion -> TTS pipeline for one finalized
/// speech segment on a dedicated task, so the frame-reading loop stays free
/// to observe the next barge-in immediately (spec §5 suspension points).
fn spawn_turn(session: Arc<Session>, state: AppState, sender: Outbound, segment: SpeechSegment) {
    tokio::spawn(async move {
        if segment.is_too_small() {
            // spec §4.3/§8 scenario c: silently drop, no transition, no error.
            return;
        }

        let epoch_at_spawn = session.current_epoch();
        let speech_end = chrono::Utc::now();
        let speech_start =
            speech_end - chrono::Duration::from_std(segment.duration).unwrap_or_else(|_| chrono::Duration::zero());

        session.apply_phase_event(PhaseEvent::SpeechEnd);
        let cancellation = session.cancellation_handle();

        let transcript = match session.asr_client.transcribe(&segment, cancellation.clone()).await {
            Ok(t) => t,
            Err(eloquence_pipeline::PipelineError::Cancelled) => return,
            Err(e) => {
                session.apply_phase_event(PhaseEvent::AsrFailOrCancel);
                send_error(&sender, epoch_at_spawn.0, &CoreError::from(e)).await;
                return;
            }
        };

        if !session.arbiter.is_result_current(epoch_at_spawn) {
            return;
        }

        session.apply_phase_event(PhaseEvent::AsrSuccess);
        send_frame(
            &sender,
            "asr_final",
            epoch_at_spawn.0,
            json!({ "text": transcript.text, "confidence": transcript.confidence, "language": transcript.detected_language }),
        )
        .await;

        let learner_turn = Turn::learner(transcript.text.clone(), speech_start, speech_end);
        session.history.lock().push(learner_turn);

        let scenario_snapshot = session.scenario.lock().clone();
        let history_window = windowed_history(&session.history.lock());

        let (partial_tx, mut partial_rx) = tokio::sync::mpsc::channel::<String>(32);
        let forward_sender = sender.clone();
        let forward_session = session.clone();
        let forward_epoch = epoch_at_spawn;
        let forward_task = tokio::spawn(async move {
            while let Some(text) = partial_rx.recv().await {
                if !forward_session.arbiter.is_result_current(forward_epoch) {
                    break;
                }
                send_frame(&forward_sender, "agent_text_partial", forward_epoch.0, json!({ "text": text })).await;
            }
        });

        let response = session
            .dialogue
            .respond_streaming(&scenario_snapshot, &history_window, &transcript.text, cancellation.clone(), Some(partial_tx))
            .await;
        let _ = forward_task.await;

        if cancellation.is_cancelled() || !session.arbiter.is_result_current(epoch_at_spawn) {
            // spec §7: Cancelled is never surfaced to the client.
            return;
        }

        {
            // Each step's expected variables are filled from the learner's
            // raw answer to that step (spec §4.4 step 2): one free-text slot
            // per expected variable, no separate NLU extraction component.
            let mut scenario = session.scenario.lock();
            let expected: Vec<String> = scenario.current_step().expected_variables.clone();
            for variable in expected {
                scenario.bind(&variable, eloquence_agent::VariableValue::Text(transcript.text.clone()));
            }
            if scenario.current_step_satisfied() {
                scenario.advance();
            }
        }

        session.apply_phase_event(PhaseEvent::LlmFinal);
        send_frame(
            &sender,
            "agent_text_final",
            epoch_at_spawn.0,
            json!({ "text": response.text, "emotion": response.emotion.to_string(), "degraded": response.degraded }),
        )
        .await;

        let scenario_step_id = Some(session.scenario.lock().current_step().id.clone());
        let mut agent_turn = Turn::agent(response.text.clone(), response.emotion, scenario_step_id.clone());
        if response.degraded {
            agent_turn = agent_turn.degraded();
        }
        session.history.lock().push(agent_turn);

        let chunks = match session
            .tts_pipeline
            .synthesize(&response.text, &session.language, &session.voice_id, response.emotion, cancellation.clone())
            .await
        {
            Ok(chunks) => chunks,
            Err(_) => {
                // spec §4.7: a complete-utterance synthesis failure degrades
                // the turn rather than surfacing a terminal error.
                send_frame(&sender, "tts_fallback", epoch_at_spawn.0, json!({})).await;
                session.apply_phase_event(PhaseEvent::TtsDone);
                return;
            }
        };

        for chunk in chunks {
            if !session.arbiter.is_result_current(epoch_at_spawn) {
                // Stale epoch: drop rather than buffer (spec §5).
                break;
            }
            dispatch_tts_chunk(&sender, epoch_at_spawn.0, &chunk).await;
        }

        if session.arbiter.is_result_current(epoch_at_spawn) {
            session.apply_phase_event(PhaseEvent::TtsDone);
            send_frame(&sender, "turn_emotion", epoch_at_spawn.0, json!({ "label": response.emotion.to_string() })).await;
        }

        let artifact = FeedbackArtifact {
            session_id: session.id.clone(),
            turn_index: session.next_turn_index(),
            pcm16: segment.pcm16,
            sample_rate: segment.sample_rate.as_u32(),
            channels: segment.channels.count() as u16,
            reference_text: transcript.text,
            scenario_step_id,
            emotion: Some(response.emotion),
            recorded_at: speech_end,
        };
        state.feedback_sink.submit(artifact).await;
    });
}

/// spec §4.4 sliding window: last 8 turns or 4000 tokens (approximated as
/// characters/4, a conservative proxy with no tokenizer in scope), whole
/// turns discarded oldest-first.
fn windowed_history(history: &[Turn]) -> Vec<Turn> {
    const MAX_TURNS: usize = 8;
    const MAX_CHARS: usize = 4000 * 4;

    let mut window: Vec<Turn> = Vec::new();
    let mut chars = 0usize;
    for turn in history.iter().rev() {
        let turn_chars = turn.text.len();
        if window.len() >= MAX_TURNS || chars + turn_chars > MAX_CHARS {
            break;
        }
        chars += turn_chars;
        window.push(turn.clone());
    }
    window.reverse();
    window
}

/// Sends one `tts_chunk` as a small JSON descriptor frame immediately
/// followed by the raw audio as a binary frame, so the binary payload
/// carries no encoding/parsing overhead on the hot path (spec §4.1
/// `tts_chunk (binary)`).
async fn dispatch_tts_chunk(sender: &Outbound, epoch: u64, chunk: &TtsChunk) {
    send_frame(
        sender,
        "tts_chunk",
        epoch,
        json!({
            "chunk_index": chunk.chunk_index,
            "is_final": chunk.is_final,
            "from_cache": chunk.from_cache,
            "byte_len": chunk.audio.pcm16.len(),
        }),
    )
    .await;
    let _ = sender.lock().await.send(Message::Binary(chunk.audio.pcm16.clone())).await;
}

/// Runs on transport close (spec §4.9 "any -> transport close -> Ended,
/// hand all finalized turns to Feedback Sink").
async fn finalize_session(session: &Arc<Session>, state: &AppState) {
    session.close();
    state.sessions.remove(&session.id).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use eloquence_core::{Emotion as E, TurnRole};

    fn turn(role: TurnRole, text: &str) -> Turn {
        match role {
            TurnRole::Learner => Turn::learner(text, chrono::Utc::now(), chrono::Utc::now()),
            TurnRole::Agent => Turn::agent(text, E::Neutre, None),
        }
    }

    #[test]
    fn windowed_history_keeps_at_most_eight_turns() {
        let history: Vec<Turn> = (0..20).map(|i| turn(TurnRole::Learner, &format!("turn {i}"))).collect();
        let window = windowed_history(&history);
        assert_eq!(window.len(), 8);
        assert_eq!(window.last().unwrap().text, "turn 19");
    }

    #[test]
    fn segment_accumulator_seeds_active_buffer_from_preroll() {
        let mut accumulator = SegmentAccumulator::new(2);
        accumulator.push_preroll(&[1, 2]);
        accumulator.push_preroll(&[3, 4]);
        accumulator.begin();
        accumulator.push_speech(&[5, 6]);
        accumulator.push_trailing(&[7, 8]);
        let segment = accumulator.finish();
        assert_eq!(segment, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn segment_accumulator_trims_excess_trailing_silence() {
        let mut accumulator = SegmentAccumulator::new(1);
        accumulator.begin();
        accumulator.push_speech(&[9]);
        // More trailing frames than pad_frames=1: only the last is kept.
        accumulator.push_trailing(&[1]);
        accumulator.push_trailing(&[2]);
        let segment = accumulator.finish();
        assert_eq!(segment, vec![9, 2]);
    }
}
