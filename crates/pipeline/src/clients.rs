//! Thin HTTP adapters binding the external VAD, ASR and TTS RPCs to the
//! `eloquence_core` capability traits (spec §4.2/§4.3/§4.7: "Model is
//! external"). Grounded on `eloquence_llm::backend::OpenAIBackend`'s
//! reqwest-client-plus-JSON-envelope idiom, trimmed of streaming/retry
//! since each caller (`VadGate`, `AsrClient`, `TtsPipeline`) already owns
//! its own retry/degrade policy around these calls.

use std::time::Duration;

use async_trait::async_trait;
use eloquence_core::{
    AudioFrame, CancellationHandle, Emotion, Error, Result, SpeechSegment, Synthesize,
    SynthesizedAudio, Transcribe, Transcript, VadModel, WordTiming,
};
use serde::{Deserialize, Serialize};

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .expect("reqwest client with static TLS config always builds")
}

/// Calls an externally-hosted Silero-class speech-probability model.
pub struct VadHttpClient {
    endpoint: String,
    client: reqwest::Client,
}

impl VadHttpClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into(), client: http_client(Duration::from_millis(200)) }
    }
}

#[derive(Serialize)]
struct VadRequest<'a> {
    samples: &'a [f32],
    sample_rate: u32,
}

#[derive(Deserialize)]
struct VadResponse {
    probability: f32,
}

#[async_trait]
impl VadModel for VadHttpClient {
    async fn speech_probability(&self, frame: &AudioFrame) -> Result<f32> {
        let request = VadRequest { samples: &frame.samples, sample_rate: frame.sample_rate.as_u32() };
        let response = self
            .client
            .post(format!("{}/probability", self.endpoint.trim_end_matches('/')))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("vad rpc: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::Upstream(format!("vad rpc status {}", response.status())));
        }
        let body: VadResponse =
            response.json().await.map_err(|e| Error::Upstream(format!("vad rpc decode: {e}")))?;
        Ok(body.probability)
    }

    fn name(&self) -> &str {
        "vad-http"
    }
}

/// Calls an externally-hosted transcription model.
pub struct AsrHttpClient {
    endpoint: String,
    client: reqwest::Client,
}

impl AsrHttpClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self { endpoint: endpoint.into(), client: http_client(timeout) }
    }
}

#[derive(Serialize)]
struct TranscribeRequest<'a> {
    pcm16: &'a [u8],
    sample_rate: u32,
    channels: u8,
    language: &'a str,
}

#[derive(Deserialize)]
struct TranscribeResponse {
    text: String,
    #[serde(default)]
    words: Vec<WordTiming>,
    detected_language: String,
    confidence: f32,
}

#[async_trait]
impl Transcribe for AsrHttpClient {
    async fn transcribe(
        &self,
        segment: &SpeechSegment,
        language: &str,
        _cancellation: CancellationHandle,
    ) -> Result<Transcript> {
        let request = TranscribeRequest {
            pcm16: &segment.pcm16,
            sample_rate: segment.sample_rate.as_u32(),
            channels: segment.channels.count() as u8,
            language,
        };
        let response = self
            .client
            .post(format!("{}/transcribe", self.endpoint.trim_end_matches('/')))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("asr rpc: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::Upstream(format!("asr rpc status {}", response.status())));
        }
        let body: TranscribeResponse =
            response.json().await.map_err(|e| Error::Upstream(format!("asr rpc decode: {e}")))?;
        Ok(Transcript {
            text: body.text,
            words: body.words,
            detected_language: body.detected_language,
            confidence: body.confidence,
        })
    }

    fn name(&self) -> &str {
        "asr-http"
    }
}

/// Calls an externally-hosted speech-synthesis model.
pub struct TtsHttpClient {
    endpoint: String,
    client: reqwest::Client,
}

impl TtsHttpClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self { endpoint: endpoint.into(), client: http_client(timeout) }
    }
}

#[derive(Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
    language: &'a str,
    voice_id: &'a str,
    emotion: String,
}

#[derive(Deserialize)]
struct SynthesizeResponse {
    pcm16: Vec<u8>,
    sample_rate: u32,
    channels: u8,
}

#[async_trait]
impl Synthesize for TtsHttpClient {
    async fn synthesize(
        &self,
        text: &str,
        language: &str,
        voice_id: &str,
        emotion: Emotion,
        _cancellation: CancellationHandle,
    ) -> Result<SynthesizedAudio> {
        let request = SynthesizeRequest { text, language, voice_id, emotion: emotion.to_string() };
        let response = self
            .client
            .post(format!("{}/synthesize", self.endpoint.trim_end_matches('/')))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Upstream(format!("tts rpc: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::Upstream(format!("tts rpc status {}", response.status())));
        }
        let body: SynthesizeResponse =
            response.json().await.map_err(|e| Error::Upstream(format!("tts rpc decode: {e}")))?;
        Ok(SynthesizedAudio { pcm16: body.pcm16, sample_rate: body.sample_rate, channels: body.channels })
    }

    fn name(&self) -> &str {
        "tts-http"
    }
}
