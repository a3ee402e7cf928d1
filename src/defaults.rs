//! Default configuration constants for uttercut.
//!
//! This module provides shared constants used across different configuration
//! types to ensure consistency and eliminate duplication.

/// Default audio sample rate in Hz.
///
/// 16kHz is the standard for speech scoring services and provides a good
/// balance between quality and upload size for short utterances.
pub const SAMPLE_RATE: u32 = 16000;

/// Number of time-domain samples inspected per detector tick.
///
/// Matches the analyser window the envelope detector was tuned against.
/// At 16kHz a 256-sample window covers one 16ms capture tick.
pub const WINDOW_SIZE: usize = 256;

/// Capture poll interval in milliseconds (~60Hz).
pub const TICK_MS: u64 = 16;

/// Default normalized amplitude below which a tick counts as silence.
///
/// 0.01 is deliberately sensitive: halting, quiet speech is exactly the
/// input a pronunciation-practice session must not miss.
pub const SILENCE_THRESHOLD: f32 = 0.01;

/// Default duration of continuous sub-threshold audio before sustained
/// silence is declared, in milliseconds.
///
/// One second rides out stutters and breaths that are part of natural
/// speech without cutting the utterance.
pub const SILENCE_DELAY_MS: u64 = 1000;

/// Default per-segment recording ceiling in milliseconds.
///
/// Bounds a single runaway utterance so scoring stays responsive.
pub const MAX_SEGMENT_MS: u64 = 12_000;

/// Default total-session ceiling in milliseconds.
///
/// Bounds the whole practice turn regardless of how many utterances the
/// speaker produces.
pub const MAX_TOTAL_MS: u64 = 60_000;

/// Delay before acquiring a fresh stream for the next segment,
/// in milliseconds. Gives the platform time to release the previous one.
pub const RESTART_DELAY_MS: u64 = 100;

/// Consecutive capture read failures tolerated before a recorder stops
/// polling its stream.
pub const MAX_CONSECUTIVE_READ_ERRORS: u32 = 10;

/// Capacity of the frame channel feeding the silence watcher.
///
/// Frames are dropped (not awaited) when the watcher falls behind, so the
/// capture loop can never stall on detection.
pub const VAD_TAP_CAPACITY: usize = 64;

/// Capacity of the orchestrator's internal event and result channels.
pub const CHANNEL_CAPACITY: usize = 64;

/// Default per-request timeout for downstream service calls, in seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default interval between transcription job polls, in milliseconds.
pub const POLL_INTERVAL_MS: u64 = 1000;

/// Default maximum number of transcription job polls before giving up.
pub const MAX_POLL_ATTEMPTS: u32 = 60;

/// Default language code for transcription.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Default dialect code for pronunciation scoring.
pub const DEFAULT_DIALECT: &str = "en-us";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_covers_one_tick() {
        // 256 samples at 16kHz = 16ms, one capture tick.
        let window_ms = WINDOW_SIZE as u64 * 1000 / SAMPLE_RATE as u64;
        assert_eq!(window_ms, TICK_MS);
    }

    #[test]
    fn test_threshold_is_normalized() {
        assert!(SILENCE_THRESHOLD > 0.0);
        assert!(SILENCE_THRESHOLD <= 1.0);
    }

    #[test]
    fn test_total_ceiling_allows_multiple_segments() {
        assert!(MAX_TOTAL_MS >= MAX_SEGMENT_MS);
    }
}
