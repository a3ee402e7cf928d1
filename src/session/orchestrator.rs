//! Recording-session orchestration.
//!
//! One [`AudioSession`] owns one end-to-end recording session: it acquires a
//! fresh microphone stream per segment, runs a segment recorder and silence
//! watcher on it, reacts to sustained silence and the per-segment/total time
//! ceilings by cutting segments, hands every speech-bearing segment to the
//! scoring pipeline, and collects results until the session ends.
//!
//! The state machine (`Idle → Recording ⇄ EndingSegment → Finished`) runs as
//! a single event-loop task. That task is the only writer of the segment
//! list, so "append in completion order" holds without locking even though
//! scoring tasks finish in any order. Timer expiry, finalize callbacks, and
//! explicit stop all funnel through guarded transitions; an already-stopping
//! session cannot double-start a new segment.

use crate::audio::capture::{AudioStream, Microphone};
use crate::audio::recorder::{
    FinalizedSegment, RecorderConfig, RecorderHandle, SegmentRecorder,
};
use crate::audio::vad::{Clock, SilenceWatcher, SystemClock, VadConfig, VadEvent};
use crate::config::SessionConfig;
use crate::defaults;
use crate::error::Result;
use crate::scoring::adapter::ScoringPipeline;
use crate::session::report::{ErrorReporter, LogReporter, SessionError};
use crate::session::types::{AudioSegment, EndReason, SessionEvent, SessionState};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

/// Callbacks fired by the session.
///
/// `on_segment` fires once per completed segment (success or partial
/// failure), in completion order. `on_complete` fires exactly once, after the
/// session is finished AND every in-flight finalize/scoring call has settled
/// — callers are never told "done" while a segment is still outstanding.
#[derive(Default)]
pub struct SessionHooks {
    segment_cb: Option<Box<dyn FnMut(&AudioSegment) + Send>>,
    complete_cb: Option<Box<dyn FnOnce(&[AudioSegment]) + Send>>,
}

impl SessionHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the per-segment callback.
    pub fn on_segment(mut self, callback: impl FnMut(&AudioSegment) + Send + 'static) -> Self {
        self.segment_cb = Some(Box::new(callback));
        self
    }

    /// Registers the completion callback.
    pub fn on_complete(
        mut self,
        callback: impl FnOnce(&[AudioSegment]) + Send + 'static,
    ) -> Self {
        self.complete_cb = Some(Box::new(callback));
        self
    }
}

/// Handle to a running session.
pub struct SessionHandle {
    stop_tx: watch::Sender<bool>,
    done_rx: oneshot::Receiver<Vec<AudioSegment>>,
    state_rx: watch::Receiver<SessionState>,
    level_rx: watch::Receiver<f32>,
}

impl SessionHandle {
    /// Requests the session to stop. Idempotent and non-blocking.
    ///
    /// The current segment is still finalized and scored as usual; no
    /// further segment will start.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Waits for completion and returns every collected segment, in
    /// completion order. Resolves on explicit stop or when the total ceiling
    /// elapses — whichever comes first — once all scoring has settled.
    pub async fn wait(self) -> Vec<AudioSegment> {
        self.done_rx.await.unwrap_or_default()
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// Watch channel following state transitions.
    pub fn state_watch(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Latest normalized microphone level, for diagnostics/UI.
    pub fn current_level(&self) -> f32 {
        *self.level_rx.borrow()
    }

    /// Watch channel following the live level.
    pub fn level_watch(&self) -> watch::Receiver<f32> {
        self.level_rx.clone()
    }
}

/// A configured, not-yet-started recording session.
pub struct AudioSession {
    config: SessionConfig,
    microphone: Arc<dyn Microphone>,
    scoring: Arc<ScoringPipeline>,
    reporter: Arc<dyn ErrorReporter>,
    clock: Arc<dyn Clock>,
    event_tx: Option<crossbeam_channel::Sender<SessionEvent>>,
}

impl AudioSession {
    pub fn new(
        config: SessionConfig,
        microphone: Arc<dyn Microphone>,
        scoring: Arc<ScoringPipeline>,
    ) -> Self {
        Self {
            config,
            microphone,
            scoring,
            reporter: Arc::new(LogReporter),
            clock: Arc::new(SystemClock),
            event_tx: None,
        }
    }

    /// Sets a custom error reporter.
    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Sets a custom clock for the silence watchers (deterministic testing).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Attaches a non-blocking diagnostic event stream.
    pub fn with_event_sender(mut self, tx: crossbeam_channel::Sender<SessionEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Starts recording.
    ///
    /// The only error surfaced here is a failed initial microphone
    /// acquisition (or invalid configuration); everything downstream is
    /// recoverable per segment and never aborts the session.
    pub async fn start(self, hooks: SessionHooks) -> Result<SessionHandle> {
        self.config.validate()?;

        // Fatal to session start; all later acquisitions fail soft.
        let first_stream = self.microphone.acquire()?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);
        let (level_tx, level_rx) = watch::channel(0.0f32);
        let (done_tx, done_rx) = oneshot::channel();

        let (vad_event_tx, vad_event_rx) = mpsc::channel(defaults::CHANNEL_CAPACITY);
        let (finalized_tx, finalized_rx) = mpsc::channel(defaults::CHANNEL_CAPACITY);
        let (scored_tx, scored_rx) = mpsc::channel(defaults::CHANNEL_CAPACITY);

        let runtime = SessionRuntime {
            config: self.config,
            microphone: self.microphone,
            scoring: self.scoring,
            reporter: self.reporter,
            clock: self.clock,
            event_tx: self.event_tx,
            state: SessionState::Idle,
            state_tx,
            level_tx,
            session_start: Instant::now(),
            total_deadline: None,
            segment_deadline: None,
            restart_at: None,
            current_seq: 0,
            next_seq: 1,
            has_speech: false,
            speech_flags: HashMap::new(),
            recorder: None,
            vad_event_tx,
            finalized_tx,
            scored_tx,
            pending_finalize: 0,
            in_flight: 0,
            segments: Vec::new(),
            stopped: false,
            segment_cb: hooks.segment_cb,
            complete_cb: hooks.complete_cb,
            done_tx: Some(done_tx),
        };

        tokio::spawn(runtime.run(first_stream, vad_event_rx, finalized_rx, scored_rx, stop_rx));

        Ok(SessionHandle {
            stop_tx,
            done_rx,
            state_rx,
            level_rx,
        })
    }
}

/// Sleeps until the given deadline, or forever when there is none.
async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

struct SessionRuntime {
    config: SessionConfig,
    microphone: Arc<dyn Microphone>,
    scoring: Arc<ScoringPipeline>,
    reporter: Arc<dyn ErrorReporter>,
    clock: Arc<dyn Clock>,
    event_tx: Option<crossbeam_channel::Sender<SessionEvent>>,

    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    level_tx: watch::Sender<f32>,

    session_start: Instant,
    total_deadline: Option<Instant>,
    segment_deadline: Option<Instant>,
    restart_at: Option<Instant>,

    current_seq: u64,
    next_seq: u64,
    has_speech: bool,
    /// Speech flags of segments told to stop but not yet finalized.
    speech_flags: HashMap<u64, bool>,
    recorder: Option<RecorderHandle>,

    vad_event_tx: mpsc::Sender<(u64, VadEvent)>,
    finalized_tx: mpsc::Sender<FinalizedSegment>,
    scored_tx: mpsc::Sender<AudioSegment>,

    pending_finalize: usize,
    in_flight: usize,
    segments: Vec<AudioSegment>,
    stopped: bool,

    segment_cb: Option<Box<dyn FnMut(&AudioSegment) + Send>>,
    complete_cb: Option<Box<dyn FnOnce(&[AudioSegment]) + Send>>,
    done_tx: Option<oneshot::Sender<Vec<AudioSegment>>>,
}

impl SessionRuntime {
    async fn run(
        mut self,
        first_stream: Box<dyn AudioStream>,
        mut vad_event_rx: mpsc::Receiver<(u64, VadEvent)>,
        mut finalized_rx: mpsc::Receiver<FinalizedSegment>,
        mut scored_rx: mpsc::Receiver<AudioSegment>,
        mut stop_rx: watch::Receiver<bool>,
    ) {
        self.session_start = Instant::now();
        self.total_deadline = Some(self.session_start + self.config.max_total_duration);
        self.begin_segment(first_stream);

        let mut stop_open = true;

        loop {
            tokio::select! {
                biased;

                changed = stop_rx.changed(), if stop_open && !self.stopped => {
                    match changed {
                        Ok(()) => {
                            if *stop_rx.borrow() {
                                self.handle_stop(EndReason::Stopped);
                            }
                        }
                        // Handle dropped without stopping; run to the ceiling.
                        Err(_) => stop_open = false,
                    }
                }

                _ = deadline(self.total_deadline) => {
                    self.total_deadline = None;
                    self.handle_stop(EndReason::TotalTimeout);
                }

                _ = deadline(self.segment_deadline),
                    if self.state == SessionState::Recording =>
                {
                    self.end_segment(EndReason::SegmentTimeout);
                }

                _ = deadline(self.restart_at) => {
                    self.restart_at = None;
                    self.start_next_segment();
                }

                Some((sequence, event)) = vad_event_rx.recv() => {
                    self.handle_vad_event(sequence, event);
                }

                Some(finalized) = finalized_rx.recv() => {
                    self.handle_finalized(finalized);
                }

                Some(segment) = scored_rx.recv() => {
                    self.handle_scored(segment);
                }
            }

            if self.try_complete() {
                break;
            }
        }
    }

    fn set_state(&mut self, state: SessionState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }

    fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.try_send(event);
        }
    }

    /// Starts recording a fresh segment on the given stream.
    fn begin_segment(&mut self, stream: Box<dyn AudioStream>) {
        let sequence = self.next_seq;
        self.next_seq += 1;
        self.current_seq = sequence;
        self.has_speech = false;
        self.set_state(SessionState::Recording);

        let now = Instant::now();
        let elapsed = now - self.session_start;
        // The last segment never overruns the session ceiling.
        let remaining = self.config.max_total_duration.saturating_sub(elapsed);
        let budget = self.config.max_segment_duration.min(remaining);
        self.segment_deadline = Some(now + budget);

        let vad_config = VadConfig {
            silence_threshold: self.config.silence_threshold,
            silence_delay: self.config.silence_delay,
        };
        let (tap_tx, tap_rx) = mpsc::channel(defaults::VAD_TAP_CAPACITY);
        SilenceWatcher::spawn(
            vad_config,
            sequence,
            tap_rx,
            self.vad_event_tx.clone(),
            self.level_tx.clone(),
            self.clock.clone(),
        );

        let recorder_config =
            RecorderConfig::new(sequence, elapsed.as_millis() as u64, self.config.sample_rate);
        self.recorder = Some(SegmentRecorder::spawn(
            stream,
            recorder_config,
            tap_tx,
            self.finalized_tx.clone(),
            self.reporter.clone(),
        ));
    }

    /// Stops the active segment. The finalize arrives asynchronously.
    fn end_segment(&mut self, reason: EndReason) {
        if self.state != SessionState::Recording {
            return;
        }
        self.set_state(SessionState::EndingSegment);
        self.segment_deadline = None;
        self.speech_flags.insert(self.current_seq, self.has_speech);

        if let Some(recorder) = self.recorder.take() {
            recorder.stop();
            self.pending_finalize += 1;
        }
        self.emit(SessionEvent::SegmentEnded {
            sequence: self.current_seq,
            reason,
        });

        match reason {
            EndReason::Silence | EndReason::SegmentTimeout if !self.stopped => {
                let elapsed = Instant::now() - self.session_start;
                if elapsed < self.config.max_total_duration {
                    // Let the platform fully release the previous stream
                    // before acquiring the next one.
                    self.restart_at =
                        Some(Instant::now() + Duration::from_millis(defaults::RESTART_DELAY_MS));
                } else {
                    self.finish();
                }
            }
            _ => self.finish(),
        }
    }

    /// Explicit stop or total-session timeout: end the current segment (if
    /// any) and prevent any further one from starting.
    fn handle_stop(&mut self, reason: EndReason) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        match self.state {
            SessionState::Recording => self.end_segment(reason),
            SessionState::EndingSegment => {
                self.restart_at = None;
                self.finish();
            }
            SessionState::Idle | SessionState::Finished => {}
        }
    }

    /// Acquires a fresh stream for the next segment. Failure here is
    /// deliberately soft: the session quietly stops producing segments.
    fn start_next_segment(&mut self) {
        if self.stopped || self.state != SessionState::EndingSegment {
            return;
        }
        match self.microphone.acquire() {
            Ok(stream) => self.begin_segment(stream),
            Err(e) => {
                self.reporter.report(
                    "session",
                    &SessionError::Recoverable(format!(
                        "could not start next segment: {}",
                        e
                    )),
                );
                self.finish();
            }
        }
    }

    fn finish(&mut self) {
        if self.state != SessionState::Finished {
            self.set_state(SessionState::Finished);
            self.segment_deadline = None;
            self.restart_at = None;
            self.total_deadline = None;
        }
    }

    fn handle_vad_event(&mut self, sequence: u64, event: VadEvent) {
        // Stale events from a watcher that outlived its segment are ignored.
        if sequence != self.current_seq || self.state != SessionState::Recording {
            return;
        }

        match event {
            VadEvent::SpeechStart => {
                self.has_speech = true;
                self.emit(SessionEvent::SpeechStart { sequence });
            }
            VadEvent::SpeechStop => {
                self.emit(SessionEvent::SpeechStop { sequence });
            }
            VadEvent::SustainedSilence => {
                self.emit(SessionEvent::SustainedSilence { sequence });
                self.end_segment(EndReason::Silence);
            }
        }
    }

    /// A recorder delivered its finalized audio. Decoupled from the state
    /// transition that triggered the stop.
    fn handle_finalized(&mut self, finalized: FinalizedSegment) {
        self.pending_finalize = self.pending_finalize.saturating_sub(1);
        let had_speech = self
            .speech_flags
            .remove(&finalized.sequence)
            .unwrap_or(false);

        match finalized.audio {
            Some(audio) if had_speech => {
                self.in_flight += 1;
                let scoring = self.scoring.clone();
                let scored_tx = self.scored_tx.clone();
                let sequence = finalized.sequence;
                let offset_ms = finalized.offset_ms;
                tokio::spawn(async move {
                    let segment = scoring.process(audio, sequence, offset_ms).await;
                    let _ = scored_tx.send(segment).await;
                });
            }
            // Silence-only segments are noise, not data: no scoring, no
            // append, no notification.
            _ => self.emit(SessionEvent::SegmentDiscarded {
                sequence: finalized.sequence,
            }),
        }
    }

    /// Single-writer append path: completion order, not start order.
    fn handle_scored(&mut self, segment: AudioSegment) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.emit(SessionEvent::SegmentScored {
            sequence: segment.sequence,
            overall: segment.score.as_ref().map(|s| s.overall),
        });

        if let Some(callback) = self.segment_cb.as_mut() {
            callback(&segment);
        }
        self.segments.push(segment);
    }

    /// Fires completion once the session is finished and nothing is
    /// outstanding. Returns true when the event loop should exit.
    fn try_complete(&mut self) -> bool {
        if self.state != SessionState::Finished
            || self.pending_finalize > 0
            || self.in_flight > 0
        {
            return false;
        }

        if let Some(callback) = self.complete_cb.take() {
            callback(&self.segments);
        }
        self.emit(SessionEvent::Completed {
            segments: self.segments.len(),
        });
        if let Some(done_tx) = self.done_tx.take() {
            let _ = done_tx.send(std::mem::take(&mut self.segments));
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::capture::{MockMicrophone, ScriptedStream};
    use crate::config::GroundTruth;
    use crate::scoring::adapter::GroundTruthSource;
    use crate::scoring::pronunciation::MockPronunciationScorer;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_config() -> SessionConfig {
        SessionConfig {
            ground_truth: GroundTruth::Fixed("test phrase".to_string()),
            silence_threshold: 0.01,
            silence_delay: Duration::from_millis(80),
            max_segment_duration: Duration::from_millis(400),
            max_total_duration: Duration::from_millis(2000),
            ..Default::default()
        }
    }

    fn fixed_pipeline(scorer: Arc<MockPronunciationScorer>) -> Arc<ScoringPipeline> {
        Arc::new(ScoringPipeline::new(
            GroundTruthSource::Fixed("test phrase".to_string()),
            "en",
            "en-us",
            scorer,
        ))
    }

    #[tokio::test]
    async fn test_start_fails_when_microphone_unavailable() {
        let session = AudioSession::new(
            test_config(),
            Arc::new(MockMicrophone::new().with_acquire_failure()),
            fixed_pipeline(Arc::new(MockPronunciationScorer::new())),
        );

        assert!(session.start(SessionHooks::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_start_fails_on_invalid_config() {
        let config = SessionConfig {
            silence_threshold: 0.0,
            ..test_config()
        };
        let microphone = Arc::new(MockMicrophone::new());
        let session = AudioSession::new(
            config,
            microphone.clone(),
            fixed_pipeline(Arc::new(MockPronunciationScorer::new())),
        );

        assert!(session.start(SessionHooks::new()).await.is_err());
        // Validation happens before any acquisition.
        assert_eq!(microphone.acquires(), 0);
    }

    #[tokio::test]
    async fn test_explicit_stop_on_silent_session_completes_empty() {
        let scorer = Arc::new(MockPronunciationScorer::new());
        let session = AudioSession::new(
            test_config(),
            Arc::new(MockMicrophone::new()),
            fixed_pipeline(scorer.clone()),
        );

        let handle = session.start(SessionHooks::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop();

        let segments = handle.wait().await;
        assert!(segments.is_empty());
        assert_eq!(scorer.calls(), 0);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let session = AudioSession::new(
            test_config(),
            Arc::new(MockMicrophone::new()),
            fixed_pipeline(Arc::new(MockPronunciationScorer::new())),
        );

        let handle = session.start(SessionHooks::new()).await.unwrap();
        handle.stop();
        handle.stop();
        let segments = handle.wait().await;
        assert!(segments.is_empty());
    }

    #[tokio::test]
    async fn test_speech_segment_is_scored_and_callbacks_fire() {
        let scorer = Arc::new(MockPronunciationScorer::new());
        let microphone = Arc::new(
            MockMicrophone::new()
                .with_stream(ScriptedStream::silent().speech_ms(160, 3000).silence_ms(2000)),
        );

        let segment_calls = Arc::new(AtomicUsize::new(0));
        let calls = segment_calls.clone();
        let complete_calls = Arc::new(AtomicUsize::new(0));
        let completes = complete_calls.clone();

        let session = AudioSession::new(test_config(), microphone, fixed_pipeline(scorer.clone()));
        let handle = session
            .start(
                SessionHooks::new()
                    .on_segment(move |segment| {
                        assert_eq!(segment.sequence, 1);
                        calls.fetch_add(1, Ordering::SeqCst);
                    })
                    .on_complete(move |segments| {
                        assert_eq!(segments.len(), 1);
                        completes.fetch_add(1, Ordering::SeqCst);
                    }),
            )
            .await
            .unwrap();

        // Speech ends by sustained silence well before this stop.
        tokio::time::sleep(Duration::from_millis(500)).await;
        handle.stop();
        let segments = handle.wait().await;

        assert_eq!(segments.len(), 1);
        assert!(segments[0].score.is_some());
        assert_eq!(segment_calls.load(Ordering::SeqCst), 1);
        assert_eq!(complete_calls.load(Ordering::SeqCst), 1);
        assert_eq!(scorer.calls(), 1);
    }

    #[tokio::test]
    async fn test_state_transitions_to_finished() {
        let session = AudioSession::new(
            test_config(),
            Arc::new(MockMicrophone::new()),
            fixed_pipeline(Arc::new(MockPronunciationScorer::new())),
        );

        let handle = session.start(SessionHooks::new()).await.unwrap();
        assert!(matches!(
            handle.state(),
            SessionState::Idle | SessionState::Recording
        ));

        handle.stop();
        let mut state_rx = handle.state_watch();
        let segments = handle.wait().await;
        assert!(segments.is_empty());
        assert_eq!(*state_rx.borrow_and_update(), SessionState::Finished);
    }

    #[tokio::test]
    async fn test_reacquire_failure_quietly_ends_session() {
        let scorer = Arc::new(MockPronunciationScorer::new());
        // First acquisition succeeds with speech; every later one fails.
        let microphone = Arc::new(
            MockMicrophone::new()
                .with_stream(ScriptedStream::silent().speech_ms(160, 3000).silence_ms(2000))
                .with_acquire_failure_after(1),
        );

        let session = AudioSession::new(
            test_config(),
            microphone.clone(),
            fixed_pipeline(scorer.clone()),
        );
        let handle = session.start(SessionHooks::new()).await.unwrap();

        // No explicit stop: the failed re-acquisition ends the session.
        let segments = handle.wait().await;
        assert_eq!(segments.len(), 1);
        assert!(segments[0].score.is_some());
        assert_eq!(microphone.acquires(), 2);
    }
}
