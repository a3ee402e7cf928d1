//! Per-segment scoring pipeline.
//!
//! For every speech-bearing segment: resolve the reference text, submit the
//! audio for pronunciation scoring, and package the result. Best-effort by
//! design — a failed transcription or scoring call leaves the corresponding
//! field absent and the segment is kept, because partial data beats no data
//! in a live practice session. Nothing here ever propagates an error back
//! into the session state machine.

use crate::scoring::pronunciation::PronunciationScorer;
use crate::scoring::transcription::TranscriptionService;
use crate::session::report::{ErrorReporter, LogReporter, SessionError};
use crate::session::types::{AudioBlob, AudioSegment};
use std::sync::Arc;

/// Where the reference text for scoring comes from.
///
/// Encodes the wiring invariant directly: fixed mode carries its phrase and
/// no transcription service, so the service cannot be called by construction.
pub enum GroundTruthSource {
    /// Use this phrase as the reference for every segment.
    Fixed(String),
    /// Transcribe each segment and score it against its own transcription.
    Transcribed(Arc<dyn TranscriptionService>),
}

/// Scoring pipeline shared by all segments of a session.
pub struct ScoringPipeline {
    ground_truth: GroundTruthSource,
    language: String,
    dialect: String,
    scorer: Arc<dyn PronunciationScorer>,
    reporter: Arc<dyn ErrorReporter>,
}

impl ScoringPipeline {
    pub fn new(
        ground_truth: GroundTruthSource,
        language: &str,
        dialect: &str,
        scorer: Arc<dyn PronunciationScorer>,
    ) -> Self {
        Self {
            ground_truth,
            language: language.to_string(),
            dialect: dialect.to_string(),
            scorer,
            reporter: Arc::new(LogReporter),
        }
    }

    /// Sets a custom error reporter.
    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Scores one finalized segment.
    ///
    /// Infallible: downstream failures are reported and converted into
    /// absent fields on the returned segment.
    pub async fn process(&self, audio: AudioBlob, sequence: u64, offset_ms: u64) -> AudioSegment {
        let mut segment = AudioSegment::new(sequence, audio, offset_ms);

        let reference = match &self.ground_truth {
            GroundTruthSource::Fixed(phrase) => Some(phrase.clone()),
            GroundTruthSource::Transcribed(service) => {
                match service.transcribe(&segment.audio, &self.language).await {
                    Ok(transcript) => {
                        segment.transcription = Some(transcript.text.clone());
                        segment.validated_transcription = Some(transcript.text.clone());
                        Some(transcript.text)
                    }
                    Err(e) => {
                        self.reporter.report(
                            "transcription",
                            &SessionError::Recoverable(format!(
                                "segment {}: {}",
                                sequence, e
                            )),
                        );
                        None
                    }
                }
            }
        };

        // No reference text means nothing to score against; the segment is
        // still kept.
        if let Some(reference) = reference {
            let tag = format!("segment_{}", sequence);
            match self
                .scorer
                .score(&segment.audio, &reference, &self.dialect, &tag)
                .await
            {
                Ok(score) => segment.score = Some(score),
                Err(e) => {
                    self.reporter.report(
                        "scoring",
                        &SessionError::Recoverable(format!("segment {}: {}", sequence, e)),
                    );
                }
            }
        }

        segment
    }
}
