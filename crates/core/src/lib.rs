//! Shared types and capability contracts for the Eloquence voice-coaching
//! orchestrator: audio frames, speech segments, turns, session phases, the
//! interruption epoch, cancellation handles, and the closed error set.

pub mod audio;
pub mod cancellation;
pub mod epoch;
pub mod error;
pub mod segment;
pub mod session;
pub mod traits;
pub mod turn;

pub use audio::{AudioBuffer, AudioEncoding, AudioFrame, Channels, SampleRate};
pub use cancellation::{CancellationHandle, CancellationSource};
pub use epoch::{Epoch, EpochCounter};
pub use error::{Error, Result};
pub use segment::SpeechSegment;
pub use session::{new_session_id, transition, Phase, PhaseEvent, SessionId};
pub use traits::{Synthesize, SynthesizedAudio, Transcribe, Transcript, VadModel, WordTiming};
pub use turn::{Emotion, Turn, TurnRole, TurnTimings};
