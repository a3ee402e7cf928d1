//! Voice activity detection.
//!
//! A debounced peak-envelope detector: each capture tick classifies a window
//! of time-domain samples as sound or silence against a normalized amplitude
//! threshold, and sustained silence is only declared after the configured
//! delay of continuous sub-threshold input. The debounce exists so brief
//! pauses — stutters, breaths — don't cut a segment mid-utterance; halting
//! speech is the very thing a practice session is listening to.

use crate::audio::recorder::AudioFrame;
use crate::defaults;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};

/// Trait for time operations, allowing mock time in tests.
pub trait Clock: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Instant;
}

/// Real system clock using `std::time::Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Configuration for voice activity detection.
#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    /// Minimum normalized amplitude (0.0 to 1.0) considered sound.
    pub silence_threshold: f32,
    /// Continuous sub-threshold duration before sustained silence fires.
    pub silence_delay: Duration,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            silence_threshold: defaults::SILENCE_THRESHOLD,
            silence_delay: Duration::from_millis(defaults::SILENCE_DELAY_MS),
        }
    }
}

/// Events emitted by the detector. At most one per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    /// Amplitude crossed above the threshold after silence.
    SpeechStart,
    /// Amplitude dropped below the threshold while speaking.
    SpeechStop,
    /// Amplitude stayed below the threshold for the full silence delay.
    /// Fires once per continuous silence run.
    SustainedSilence,
}

/// Debounced threshold detector over an amplitude envelope.
pub struct Vad {
    config: VadConfig,
    is_speaking: bool,
    silence_start: Option<Instant>,
    last_level: f32,
    clock: Arc<dyn Clock>,
}

impl Vad {
    /// Creates a detector using the system clock.
    pub fn new(config: VadConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a detector with an injected clock (for deterministic tests).
    pub fn with_clock(config: VadConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            is_speaking: false,
            silence_start: None,
            last_level: 0.0,
            clock,
        }
    }

    /// Processes one window of samples and returns the event it produced,
    /// if any.
    pub fn process(&mut self, samples: &[i16]) -> Option<VadEvent> {
        let level = peak_level(samples);
        self.last_level = level;
        let now = self.clock.now();

        if level < self.config.silence_threshold {
            if self.is_speaking {
                self.is_speaking = false;
                if self.silence_start.is_none() {
                    self.silence_start = Some(now);
                }
                return Some(VadEvent::SpeechStop);
            }

            match self.silence_start {
                None => {
                    self.silence_start = Some(now);
                    None
                }
                Some(start) => {
                    if now.duration_since(start) >= self.config.silence_delay {
                        // Clear so the event can't repeat until silence
                        // restarts accumulating.
                        self.silence_start = None;
                        Some(VadEvent::SustainedSilence)
                    } else {
                        None
                    }
                }
            }
        } else {
            self.silence_start = None;
            if !self.is_speaking {
                self.is_speaking = true;
                Some(VadEvent::SpeechStart)
            } else {
                None
            }
        }
    }

    /// Latest normalized amplitude seen, for diagnostics.
    pub fn current_level(&self) -> f32 {
        self.last_level
    }

    /// Returns true while the detector considers the speaker active.
    pub fn is_speaking(&self) -> bool {
        self.is_speaking
    }

    /// Resets the detector to its initial state.
    pub fn reset(&mut self) {
        self.is_speaking = false;
        self.silence_start = None;
        self.last_level = 0.0;
    }
}

/// Peak amplitude of a sample window, normalized to 0.0..1.0.
pub fn peak_level(samples: &[i16]) -> f32 {
    let max = samples.iter().map(|&s| (s as i32).abs()).max().unwrap_or(0);
    (max as f32 / i16::MAX as f32).min(1.0)
}

/// Runs a [`Vad`] over a segment's frame stream.
///
/// Consumes frames tapped off the segment recorder, forwards detector events
/// tagged with the segment's sequence number, and publishes the live level.
/// Terminates when the frame channel closes (the recorder finalized) or the
/// event receiver is gone.
pub struct SilenceWatcher;

impl SilenceWatcher {
    pub fn spawn(
        config: VadConfig,
        sequence: u64,
        mut frames: mpsc::Receiver<AudioFrame>,
        events: mpsc::Sender<(u64, VadEvent)>,
        level: watch::Sender<f32>,
        clock: Arc<dyn Clock>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut vad = Vad::with_clock(config, clock);
            while let Some(frame) = frames.recv().await {
                let event = vad.process(&frame.samples);
                level.send_replace(vad.current_level());
                if let Some(event) = event
                    && events.send((sequence, event)).await.is_err()
                {
                    break;
                }
            }
            level.send_replace(0.0);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Mock clock for testing that allows manual time advancement.
    #[derive(Debug, Clone)]
    struct MockClock {
        current: Arc<Mutex<Instant>>,
    }

    impl MockClock {
        fn new() -> Self {
            Self {
                current: Arc::new(Mutex::new(Instant::now())),
            }
        }

        fn advance(&self, duration: Duration) {
            let mut current = self.current.lock().unwrap();
            *current += duration;
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> Instant {
            *self.current.lock().unwrap()
        }
    }

    fn make_silence(count: usize) -> Vec<i16> {
        vec![0i16; count]
    }

    fn make_speech(count: usize, amplitude: i16) -> Vec<i16> {
        vec![amplitude; count]
    }

    fn test_config() -> VadConfig {
        VadConfig {
            silence_threshold: 0.01,
            silence_delay: Duration::from_millis(100),
        }
    }

    #[test]
    fn test_peak_level_silence_is_zero() {
        assert_eq!(peak_level(&make_silence(256)), 0.0);
    }

    #[test]
    fn test_peak_level_empty_is_zero() {
        assert_eq!(peak_level(&[]), 0.0);
    }

    #[test]
    fn test_peak_level_max_amplitude() {
        let level = peak_level(&make_speech(256, i16::MAX));
        assert!((level - 1.0).abs() < 0.001, "expected ~1.0, got {}", level);
    }

    #[test]
    fn test_peak_level_clamps_i16_min() {
        // |i16::MIN| exceeds i16::MAX by one; the level must still be <= 1.0.
        let level = peak_level(&[i16::MIN]);
        assert_eq!(level, 1.0);
    }

    #[test]
    fn test_peak_level_uses_maximum_not_average() {
        let mut samples = make_silence(255);
        samples.push(3277); // single spike ~0.1
        let level = peak_level(&samples);
        assert!(level > 0.09 && level < 0.11, "got {}", level);
    }

    #[test]
    fn test_speech_start_fires_on_threshold_crossing() {
        let mut vad = Vad::new(test_config());

        assert_eq!(vad.process(&make_silence(256)), None);
        assert!(!vad.is_speaking());

        let event = vad.process(&make_speech(256, 3000));
        assert_eq!(event, Some(VadEvent::SpeechStart));
        assert!(vad.is_speaking());
    }

    #[test]
    fn test_no_event_during_continuous_speech() {
        let mut vad = Vad::new(test_config());

        vad.process(&make_speech(256, 3000));
        assert_eq!(vad.process(&make_speech(256, 3000)), None);
        assert_eq!(vad.process(&make_speech(256, 3000)), None);
    }

    #[test]
    fn test_speech_stop_fires_when_amplitude_drops() {
        let mut vad = Vad::new(test_config());

        vad.process(&make_speech(256, 3000));
        let event = vad.process(&make_silence(256));
        assert_eq!(event, Some(VadEvent::SpeechStop));
        assert!(!vad.is_speaking());
    }

    #[test]
    fn test_brief_dip_does_not_fire_sustained_silence() {
        // P1: silence shorter than the delay, then speech again — no
        // sustained-silence event anywhere in the run.
        let clock = Arc::new(MockClock::new());
        let mut vad = Vad::with_clock(test_config(), clock.clone());

        vad.process(&make_speech(256, 3000));
        assert_eq!(vad.process(&make_silence(256)), Some(VadEvent::SpeechStop));

        clock.advance(Duration::from_millis(60));
        assert_eq!(vad.process(&make_silence(256)), None);

        // Speech resumes before the 100ms delay elapses.
        assert_eq!(vad.process(&make_speech(256, 3000)), Some(VadEvent::SpeechStart));

        // And a fresh dip starts the debounce from zero.
        assert_eq!(vad.process(&make_silence(256)), Some(VadEvent::SpeechStop));
        clock.advance(Duration::from_millis(60));
        assert_eq!(vad.process(&make_silence(256)), None);
    }

    #[test]
    fn test_sustained_silence_fires_after_delay() {
        let clock = Arc::new(MockClock::new());
        let mut vad = Vad::with_clock(test_config(), clock.clone());

        vad.process(&make_speech(256, 3000));
        vad.process(&make_silence(256)); // SpeechStop, silence timer starts

        clock.advance(Duration::from_millis(120));
        let event = vad.process(&make_silence(256));
        assert_eq!(event, Some(VadEvent::SustainedSilence));
    }

    #[test]
    fn test_sustained_silence_fires_once_per_run() {
        let clock = Arc::new(MockClock::new());
        let mut vad = Vad::with_clock(test_config(), clock.clone());

        vad.process(&make_speech(256, 3000));
        vad.process(&make_silence(256));

        clock.advance(Duration::from_millis(120));
        assert_eq!(
            vad.process(&make_silence(256)),
            Some(VadEvent::SustainedSilence)
        );

        // Immediately after firing the timer restarts: nothing until another
        // full delay elapses.
        assert_eq!(vad.process(&make_silence(256)), None);
        clock.advance(Duration::from_millis(60));
        assert_eq!(vad.process(&make_silence(256)), None);
        clock.advance(Duration::from_millis(60));
        assert_eq!(
            vad.process(&make_silence(256)),
            Some(VadEvent::SustainedSilence)
        );
    }

    #[test]
    fn test_sustained_silence_without_prior_speech() {
        // Pre-speech silence still trips the detector; the orchestrator
        // discards the resulting speechless segment.
        let clock = Arc::new(MockClock::new());
        let mut vad = Vad::with_clock(test_config(), clock.clone());

        assert_eq!(vad.process(&make_silence(256)), None);
        clock.advance(Duration::from_millis(120));
        assert_eq!(
            vad.process(&make_silence(256)),
            Some(VadEvent::SustainedSilence)
        );
    }

    #[test]
    fn test_current_level_tracks_last_window() {
        let mut vad = Vad::new(test_config());
        vad.process(&make_speech(256, i16::MAX));
        assert!(vad.current_level() > 0.99);
        vad.process(&make_silence(256));
        assert_eq!(vad.current_level(), 0.0);
    }

    #[test]
    fn test_reset_returns_to_idle() {
        let mut vad = Vad::new(test_config());
        vad.process(&make_speech(256, 3000));
        assert!(vad.is_speaking());

        vad.reset();
        assert!(!vad.is_speaking());
        assert_eq!(
            vad.process(&make_speech(256, 3000)),
            Some(VadEvent::SpeechStart)
        );
    }

    #[tokio::test]
    async fn test_watcher_tags_events_with_sequence() {
        let (frame_tx, frame_rx) = mpsc::channel(8);
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let (level_tx, level_rx) = watch::channel(0.0f32);

        SilenceWatcher::spawn(
            test_config(),
            7,
            frame_rx,
            event_tx,
            level_tx,
            Arc::new(SystemClock),
        );

        frame_tx
            .send(AudioFrame::new(0, make_speech(256, 3000)))
            .await
            .unwrap();

        let (sequence, event) = event_rx.recv().await.unwrap();
        assert_eq!(sequence, 7);
        assert_eq!(event, VadEvent::SpeechStart);
        assert!(*level_rx.borrow() > 0.05);

        drop(frame_tx);
    }

    #[tokio::test]
    async fn test_watcher_stops_when_frames_close() {
        let (frame_tx, frame_rx) = mpsc::channel::<AudioFrame>(8);
        let (event_tx, _event_rx) = mpsc::channel(8);
        let (level_tx, _level_rx) = watch::channel(0.0f32);

        let handle = SilenceWatcher::spawn(
            test_config(),
            0,
            frame_rx,
            event_tx,
            level_tx,
            Arc::new(SystemClock),
        );

        drop(frame_tx);
        handle.await.unwrap();
    }
}
