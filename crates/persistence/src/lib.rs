//! Persistence layer for the Eloquence voice-coaching orchestrator: the
//! process-wide TTS cache and the Feedback Sink (spec §3, §4.7, §4.10, §6).

pub mod cache;
pub mod error;
pub mod feedback;

pub use cache::InMemoryTtsCache;
pub use error::PersistenceError;
pub use feedback::{FeedbackArtifact, FeedbackSink, FilesystemFeedbackSink};
