//! uttercut - real-time utterance segmentation and pronunciation scoring.
//!
//! Watches a live microphone, cuts speech into utterance segments on
//! sustained silence or time ceilings, and scores each segment against a
//! fixed phrase or its own transcription — without letting any downstream
//! failure lose the session.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
pub mod error;
pub mod scoring;
pub mod session;

// Core traits (acquire → segment → score)
pub use audio::capture::{AudioStream, Microphone};
pub use scoring::pronunciation::PronunciationScorer;
pub use scoring::transcription::TranscriptionService;

// Session pipeline
pub use config::{Config, GroundTruth, SessionConfig};
pub use scoring::adapter::{GroundTruthSource, ScoringPipeline};
pub use scoring::pronunciation::PronunciationScore;
pub use scoring::transcription::Transcript;
pub use session::orchestrator::{AudioSession, SessionHandle, SessionHooks};
pub use session::types::{AudioBlob, AudioSegment, EndReason, SessionEvent, SessionState};

// Error handling
pub use error::{Result, UttercutError};
