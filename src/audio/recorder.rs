//! Per-segment audio recording.
//!
//! A [`SegmentRecorder`] owns one freshly acquired stream for the lifetime of
//! one segment: it polls the stream on a capture tick, buffers chunks in
//! arrival order, and taps a copy of each chunk to the silence watcher. On
//! stop the buffered chunks are concatenated — byte order matches arrival
//! order — encoded to WAV, and delivered asynchronously on the finalize
//! channel. The recorder releases the stream's hardware tracks itself;
//! callers never touch the stream again after handing it over.

use crate::audio::capture::AudioStream;
use crate::audio::wav;
use crate::defaults;
use crate::session::report::{ErrorReporter, SessionError};
use crate::session::types::AudioBlob;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

/// A chunk of captured audio with metadata for the watcher tap.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Sequence number of this frame within its segment.
    pub sequence: u64,
    /// Timestamp when the frame was captured.
    pub timestamp: Instant,
    /// Audio samples as 16-bit PCM.
    pub samples: Vec<i16>,
}

impl AudioFrame {
    pub fn new(sequence: u64, samples: Vec<i16>) -> Self {
        Self {
            sequence,
            timestamp: Instant::now(),
            samples,
        }
    }

    /// Duration of this frame in milliseconds.
    pub fn duration_ms(&self, sample_rate: u32) -> u32 {
        (self.samples.len() as u32 * 1000) / sample_rate
    }
}

/// Configuration for one segment recording.
#[derive(Debug, Clone, Copy)]
pub struct RecorderConfig {
    /// Segment sequence number, echoed in the finalized result.
    pub sequence: u64,
    /// Segment start relative to session start, in milliseconds.
    pub offset_ms: u64,
    /// Capture poll interval.
    pub tick: Duration,
    /// Sample rate of the stream.
    pub sample_rate: u32,
}

impl RecorderConfig {
    pub fn new(sequence: u64, offset_ms: u64, sample_rate: u32) -> Self {
        Self {
            sequence,
            offset_ms,
            tick: Duration::from_millis(defaults::TICK_MS),
            sample_rate,
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }
}

/// A segment delivered on the finalize channel after its recorder stopped.
#[derive(Debug)]
pub struct FinalizedSegment {
    pub sequence: u64,
    pub offset_ms: u64,
    /// `None` when nothing was buffered or encoding failed; such segments
    /// carry no data and are discarded upstream.
    pub audio: Option<AudioBlob>,
}

/// Handle to a running segment recorder.
pub struct RecorderHandle {
    stop_tx: oneshot::Sender<()>,
}

impl RecorderHandle {
    /// Requests finalization. The blob is NOT available synchronously; it
    /// arrives later on the finalize channel the recorder was spawned with.
    pub fn stop(self) {
        let _ = self.stop_tx.send(());
    }
}

/// Spawns recording tasks, one per segment.
pub struct SegmentRecorder;

impl SegmentRecorder {
    /// Starts buffering from an already-acquired stream.
    ///
    /// Frames are tapped to `tap` with `try_send` so a slow watcher can never
    /// stall capture; the watcher channel closing is not an error. When the
    /// handle is stopped (or dropped), the task finalizes the buffer, releases
    /// the stream, and sends one [`FinalizedSegment`] on `finalized`.
    pub fn spawn(
        mut stream: Box<dyn AudioStream>,
        config: RecorderConfig,
        tap: mpsc::Sender<AudioFrame>,
        finalized: mpsc::Sender<FinalizedSegment>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> RecorderHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        tokio::spawn(async move {
            let mut chunks: Vec<Vec<i16>> = Vec::new();
            let mut interval = tokio::time::interval(config.tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut consecutive_errors: u32 = 0;
            let mut polling = true;
            let mut frame_sequence: u64 = 0;

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = interval.tick(), if polling => {
                        match stream.read_samples() {
                            Ok(samples) => {
                                consecutive_errors = 0;
                                if samples.is_empty() {
                                    // Normal while the device initializes.
                                    continue;
                                }
                                let _ = tap.try_send(AudioFrame::new(
                                    frame_sequence,
                                    samples.clone(),
                                ));
                                frame_sequence += 1;
                                chunks.push(samples);
                            }
                            Err(e) => {
                                consecutive_errors += 1;
                                if consecutive_errors >= defaults::MAX_CONSECUTIVE_READ_ERRORS {
                                    reporter.report(
                                        "recorder",
                                        &SessionError::Fatal(format!(
                                            "capture failed {} times in a row, \
                                             stopped polling: {}",
                                            consecutive_errors, e
                                        )),
                                    );
                                    polling = false;
                                }
                            }
                        }
                    }
                }
            }

            // Closing the tap ends the silence watcher for this segment.
            drop(tap);

            let audio = finalize(chunks, config.sample_rate, reporter.as_ref());

            if let Err(e) = stream.release() {
                reporter.report(
                    "recorder",
                    &SessionError::Recoverable(format!("failed to release stream: {}", e)),
                );
            }

            let _ = finalized
                .send(FinalizedSegment {
                    sequence: config.sequence,
                    offset_ms: config.offset_ms,
                    audio,
                })
                .await;
        });

        RecorderHandle { stop_tx }
    }
}

/// Concatenates buffered chunks in arrival order and encodes them.
fn finalize(
    chunks: Vec<Vec<i16>>,
    sample_rate: u32,
    reporter: &dyn ErrorReporter,
) -> Option<AudioBlob> {
    if chunks.is_empty() {
        return None;
    }

    let total: usize = chunks.iter().map(Vec::len).sum();
    let mut samples = Vec::with_capacity(total);
    for chunk in &chunks {
        samples.extend_from_slice(chunk);
    }

    let duration_ms = (samples.len() as u64 * 1000 / sample_rate as u64) as u32;

    match wav::encode(&samples, sample_rate) {
        Ok(bytes) => Some(AudioBlob::new(bytes, duration_ms)),
        Err(e) => {
            reporter.report(
                "recorder",
                &SessionError::Recoverable(format!("failed to encode segment: {}", e)),
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capture::ScriptedStream;
    use crate::error::Result;
    use crate::session::report::LogReporter;
    use std::sync::atomic::Ordering;

    fn fast_config(sequence: u64) -> RecorderConfig {
        RecorderConfig::new(sequence, 0, defaults::SAMPLE_RATE)
            .with_tick(Duration::from_millis(2))
    }

    async fn run_and_stop(
        stream: Box<dyn AudioStream>,
        config: RecorderConfig,
        run_for: Duration,
    ) -> (FinalizedSegment, mpsc::Receiver<AudioFrame>) {
        let (tap_tx, tap_rx) = mpsc::channel(256);
        let (finalized_tx, mut finalized_rx) = mpsc::channel(1);

        let handle =
            SegmentRecorder::spawn(stream, config, tap_tx, finalized_tx, Arc::new(LogReporter));

        tokio::time::sleep(run_for).await;
        handle.stop();

        let finalized = finalized_rx.recv().await.expect("finalize never arrived");
        (finalized, tap_rx)
    }

    #[tokio::test]
    async fn test_finalized_blob_preserves_chunk_order() {
        let stream = ScriptedStream::silent().speech_ms(48, 1000);

        let (finalized, _tap) = run_and_stop(
            Box::new(stream),
            fast_config(3),
            Duration::from_millis(100),
        )
        .await;

        assert_eq!(finalized.sequence, 3);
        let blob = finalized.audio.expect("expected audio");
        let (samples, rate) = wav::decode(&blob.bytes).unwrap();
        assert_eq!(rate, defaults::SAMPLE_RATE);

        // Script: 3 frames at amplitude 1000 and silence after. The scripted
        // frames arrive first, in order.
        let window = defaults::WINDOW_SIZE;
        assert!(samples.len() >= 3 * window);
        assert!(samples[..3 * window].iter().all(|&s| s == 1000));
        assert!(samples[3 * window..].iter().all(|&s| s == 0));
    }

    #[tokio::test]
    async fn test_tap_receives_frames_in_sequence() {
        let stream = ScriptedStream::silent().speech_ms(48, 500);

        let (_finalized, mut tap) = run_and_stop(
            Box::new(stream),
            fast_config(0),
            Duration::from_millis(40),
        )
        .await;

        let first = tap.recv().await.expect("no frames tapped");
        assert_eq!(first.sequence, 0);
        assert_eq!(first.samples.len(), defaults::WINDOW_SIZE);

        let second = tap.recv().await.expect("only one frame tapped");
        assert_eq!(second.sequence, 1);
    }

    #[tokio::test]
    async fn test_stream_released_on_finalize() {
        let stream = ScriptedStream::silent();
        let released = stream.release_flag();

        let (_finalized, _tap) = run_and_stop(
            Box::new(stream),
            fast_config(0),
            Duration::from_millis(20),
        )
        .await;

        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_empty_buffer_finalizes_without_audio() {
        /// Stream whose reads always come back empty (device never warmed up).
        struct EmptyStream;

        impl AudioStream for EmptyStream {
            fn read_samples(&mut self) -> Result<Vec<i16>> {
                Ok(Vec::new())
            }
            fn release(&mut self) -> Result<()> {
                Ok(())
            }
            fn sample_rate(&self) -> u32 {
                defaults::SAMPLE_RATE
            }
        }

        let (finalized, _tap) = run_and_stop(
            Box::new(EmptyStream),
            fast_config(1),
            Duration::from_millis(20),
        )
        .await;

        assert!(finalized.audio.is_none());
    }

    #[tokio::test]
    async fn test_persistent_read_errors_stop_polling_but_still_finalize() {
        let stream = ScriptedStream::silent().with_read_failure();

        let (finalized, _tap) = run_and_stop(
            Box::new(stream),
            fast_config(2),
            Duration::from_millis(60),
        )
        .await;

        // Nothing was ever buffered; the finalize still arrives.
        assert_eq!(finalized.sequence, 2);
        assert!(finalized.audio.is_none());
    }

    #[tokio::test]
    async fn test_dropping_handle_finalizes() {
        let (tap_tx, _tap_rx) = mpsc::channel(16);
        let (finalized_tx, mut finalized_rx) = mpsc::channel(1);

        let handle = SegmentRecorder::spawn(
            Box::new(ScriptedStream::silent()),
            fast_config(5),
            tap_tx,
            finalized_tx,
            Arc::new(LogReporter),
        );

        drop(handle);
        let finalized = finalized_rx.recv().await.expect("finalize never arrived");
        assert_eq!(finalized.sequence, 5);
    }
}
