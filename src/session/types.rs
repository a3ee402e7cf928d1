//! Data types for recording sessions.

use crate::audio::wav;
use crate::error::Result;
use crate::scoring::pronunciation::PronunciationScore;
use serde::Serialize;

/// Finalized audio for one segment: an opaque encoded payload.
///
/// Owned by its segment once finalized; nothing mutates it afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBlob {
    /// Encoded audio bytes (WAV).
    pub bytes: Vec<u8>,
    /// Duration of the recorded audio in milliseconds.
    pub duration_ms: u32,
}

impl AudioBlob {
    pub fn new(bytes: Vec<u8>, duration_ms: u32) -> Self {
        Self { bytes, duration_ms }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// One scored utterance cut from the session.
#[derive(Debug, Clone)]
pub struct AudioSegment {
    /// Monotone recording-order sequence number (1-based). Segments are
    /// appended in completion order; sort by this for chronological order.
    pub sequence: u64,
    /// The segment's finalized audio.
    pub audio: AudioBlob,
    /// Raw transcription, populated only in transcribed ground-truth mode.
    pub transcription: Option<String>,
    /// Validated transcription, populated only in transcribed mode.
    pub validated_transcription: Option<String>,
    /// Pronunciation score. Absent means scoring failed; the segment is
    /// kept regardless.
    pub score: Option<PronunciationScore>,
    /// Segment start time relative to session start, in milliseconds.
    pub offset_ms: u64,
}

impl AudioSegment {
    /// Creates an unscored segment for the adapter to fill in.
    pub fn new(sequence: u64, audio: AudioBlob, offset_ms: u64) -> Self {
        Self {
            sequence,
            audio,
            transcription: None,
            validated_transcription: None,
            score: None,
            offset_ms,
        }
    }
}

/// Lifecycle state of a recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// Created but not yet recording.
    Idle,
    /// A segment recorder and silence watcher are live.
    Recording,
    /// The active segment was told to stop; its finalize is in flight.
    EndingSegment,
    /// No further segment will start. Completion fires once in-flight
    /// finalize and scoring settle.
    Finished,
}

/// Why a segment stopped recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EndReason {
    /// Sustained silence was detected.
    Silence,
    /// The per-segment ceiling elapsed.
    SegmentTimeout,
    /// The total-session ceiling elapsed.
    TotalTimeout,
    /// The caller stopped the session.
    Stopped,
}

/// Diagnostic events streamed to an optional observer channel.
#[derive(Debug, Clone, Serialize)]
pub enum SessionEvent {
    SpeechStart { sequence: u64 },
    SpeechStop { sequence: u64 },
    SustainedSilence { sequence: u64 },
    SegmentEnded { sequence: u64, reason: EndReason },
    SegmentDiscarded { sequence: u64 },
    SegmentScored { sequence: u64, overall: Option<f32> },
    Completed { segments: usize },
}

/// Joins the non-empty validated transcriptions of all segments.
///
/// Segments are taken in the order given (completion order unless the caller
/// re-sorted them).
pub fn combined_transcription(segments: &[AudioSegment]) -> String {
    segments
        .iter()
        .filter_map(|segment| segment.validated_transcription.as_deref())
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Concatenates all segment audio into a single blob.
pub fn combined_audio(segments: &[AudioSegment]) -> Result<Option<AudioBlob>> {
    if segments.is_empty() {
        return Ok(None);
    }

    let blobs: Vec<&[u8]> = segments
        .iter()
        .map(|segment| segment.audio.bytes.as_slice())
        .collect();
    let bytes = wav::combine(&blobs)?;
    let duration_ms = segments.iter().map(|s| s.audio.duration_ms).sum();

    Ok(Some(AudioBlob::new(bytes, duration_ms)))
}
