//! Microphone acquisition and audio streams.
//!
//! Each segment records from a freshly acquired stream — acquisition and
//! release are scoped to the segment so the platform recorder always starts
//! from a clean state and the hardware indicator goes dark between segments.
//! The real implementation captures through CPAL; scripted mocks drive the
//! tests.

use crate::defaults;
use crate::error::Result;

/// A live audio input stream, exclusively owned by one segment's
/// recorder/watcher pair.
pub trait AudioStream: Send {
    /// Drains the samples captured since the last read.
    ///
    /// An empty result is normal while the device warms up.
    fn read_samples(&mut self) -> Result<Vec<i16>>;

    /// Stops capture and releases the underlying hardware tracks.
    ///
    /// Mandatory before dropping the stream: an unreleased stream leaves the
    /// microphone indicator active and can exhaust device handles across
    /// repeated segments.
    fn release(&mut self) -> Result<()>;

    /// Sample rate of the captured audio in Hz.
    fn sample_rate(&self) -> u32;
}

/// Source of fresh audio streams, one per segment.
pub trait Microphone: Send + Sync {
    /// Acquires a new stream and starts capture on it.
    fn acquire(&self) -> Result<Box<dyn AudioStream>>;
}

#[cfg(feature = "cpal-audio")]
pub use cpal_impl::{CpalMicrophone, list_devices};

#[cfg(feature = "cpal-audio")]
mod cpal_impl {
    use super::{AudioStream, Microphone};
    use crate::audio::wav::resample;
    use crate::defaults;
    use crate::error::{Result, UttercutError};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};

    /// Run a closure with stderr temporarily redirected to /dev/null.
    ///
    /// This suppresses noisy ALSA/JACK/PipeWire messages that CPAL triggers
    /// when probing audio backends. The messages are harmless but confusing
    /// to users.
    ///
    /// # Safety
    /// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2
    /// (stderr). Safe as long as no other thread is concurrently manipulating
    /// fd 2.
    fn with_suppressed_stderr<F, R>(f: F) -> R
    where
        F: FnOnce() -> R,
    {
        unsafe {
            let saved_fd = libc::dup(2);
            let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
            if saved_fd >= 0 && devnull >= 0 {
                libc::dup2(devnull, 2);
                libc::close(devnull);
            }

            let result = f();

            if saved_fd >= 0 {
                libc::dup2(saved_fd, 2);
                libc::close(saved_fd);
            }

            result
        }
    }

    /// Preferred device names for GNOME/PipeWire environments.
    const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

    /// Device name patterns to filter out (not useful for voice input).
    const FILTERED_PATTERNS: &[&str] = &[
        "surround",
        "front:",
        "rear:",
        "center:",
        "side:",
        "Digital Output",
        "HDMI",
        "S/PDIF",
    ];

    fn should_filter_device(name: &str) -> bool {
        let lower = name.to_lowercase();
        FILTERED_PATTERNS
            .iter()
            .any(|pattern| lower.contains(&pattern.to_lowercase()))
    }

    fn is_preferred_device(name: &str) -> bool {
        let lower = name.to_lowercase();
        PREFERRED_DEVICES
            .iter()
            .any(|pref| lower.contains(&pref.to_lowercase()))
    }

    /// List all available audio input devices with filtering and
    /// recommendations.
    ///
    /// Preferred devices are marked with "\[recommended\]"; obviously
    /// unusable ones (surround channels, HDMI, etc.) are dropped.
    pub fn list_devices() -> Result<Vec<String>> {
        let (host, devices) = with_suppressed_stderr(|| {
            let host = cpal::default_host();
            let devices = host.input_devices();
            (host, devices)
        });
        let _ = host; // keep host alive while iterating devices
        let devices = devices.map_err(|e| UttercutError::AudioCapture {
            message: format!("Failed to enumerate input devices: {}", e),
        })?;

        let mut device_names = Vec::new();
        for device in devices {
            if let Ok(name) = device.name() {
                if should_filter_device(&name) {
                    continue;
                }

                if is_preferred_device(&name) {
                    device_names.push(format!("{} [recommended]", name));
                } else {
                    device_names.push(name);
                }
            }
        }

        Ok(device_names)
    }

    /// Get the best default input device, preferring PipeWire/PulseAudio
    /// so GNOME's device selection is respected.
    fn get_best_default_device() -> Result<cpal::Device> {
        with_suppressed_stderr(|| {
            let host = cpal::default_host();

            if let Ok(devices) = host.input_devices() {
                for device in devices {
                    if let Ok(name) = device.name()
                        && is_preferred_device(&name)
                    {
                        return Ok(device);
                    }
                }
            }

            host.default_input_device()
                .ok_or_else(|| UttercutError::AudioDeviceNotFound {
                    device: "default".to_string(),
                })
        })
    }

    fn find_device(device_name: Option<&str>) -> Result<cpal::Device> {
        with_suppressed_stderr(|| {
            if let Some(name) = device_name {
                let host = cpal::default_host();
                let devices = host
                    .input_devices()
                    .map_err(|e| UttercutError::AudioCapture {
                        message: format!("Failed to enumerate devices: {}", e),
                    })?;

                for device in devices {
                    if let Ok(dev_name) = device.name()
                        && dev_name == name
                    {
                        return Ok(device);
                    }
                }

                Err(UttercutError::AudioDeviceNotFound {
                    device: name.to_string(),
                })
            } else {
                get_best_default_device()
            }
        })
    }

    /// Wrapper for cpal::Stream to make it Send.
    ///
    /// SAFETY: The stream is only accessed by the single recorder task that
    /// owns its CpalStream; methods are called synchronously and never cross
    /// thread boundaries concurrently.
    struct SendableStream(cpal::Stream);

    unsafe impl Send for SendableStream {}

    /// Microphone backed by CPAL, yielding a fresh capture stream per
    /// acquisition.
    pub struct CpalMicrophone {
        device_name: Option<String>,
        sample_rate: u32,
    }

    impl CpalMicrophone {
        /// Creates a microphone using the named device, or the best default
        /// input device when `device_name` is `None`.
        pub fn new(device_name: Option<&str>) -> Self {
            Self {
                device_name: device_name.map(str::to_string),
                sample_rate: defaults::SAMPLE_RATE,
            }
        }

        pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
            self.sample_rate = sample_rate;
            self
        }
    }

    impl Microphone for CpalMicrophone {
        fn acquire(&self) -> Result<Box<dyn AudioStream>> {
            let device = find_device(self.device_name.as_deref()).map_err(|e| {
                UttercutError::MicrophoneUnavailable {
                    message: e.to_string(),
                }
            })?;

            let buffer = Arc::new(Mutex::new(Vec::new()));
            let callback_count = Arc::new(AtomicU64::new(0));

            let stream = build_stream(&device, self.sample_rate, &buffer, &callback_count)?;
            stream.play().map_err(|e| UttercutError::AudioCapture {
                message: format!("Failed to start audio stream: {}", e),
            })?;

            // Wait briefly to check the CPAL callback actually fires. Some
            // PipeWire-ALSA setups accept non-native configs but never
            // deliver data.
            std::thread::sleep(std::time::Duration::from_millis(200));

            let final_stream = if callback_count.load(Ordering::Relaxed) == 0 {
                drop(stream);
                if let Ok(mut buf) = buffer.lock() {
                    buf.clear();
                }

                let native =
                    build_stream_native(&device, self.sample_rate, &buffer, &callback_count)?;
                native.play().map_err(|e| UttercutError::AudioCapture {
                    message: format!("Failed to start native audio stream: {}", e),
                })?;
                native
            } else {
                stream
            };

            Ok(Box::new(CpalStream {
                stream: Some(SendableStream(final_stream)),
                buffer,
                sample_rate: self.sample_rate,
            }))
        }
    }

    /// One live CPAL capture stream.
    struct CpalStream {
        stream: Option<SendableStream>,
        buffer: Arc<Mutex<Vec<i16>>>,
        sample_rate: u32,
    }

    impl AudioStream for CpalStream {
        fn read_samples(&mut self) -> Result<Vec<i16>> {
            let mut buffer = self.buffer.lock().map_err(|e| UttercutError::AudioCapture {
                message: format!("Failed to lock audio buffer: {}", e),
            })?;
            Ok(std::mem::take(&mut *buffer))
        }

        fn release(&mut self) -> Result<()> {
            if let Some(sendable) = self.stream.take() {
                sendable.0.pause().map_err(|e| UttercutError::AudioCapture {
                    message: format!("Failed to stop audio stream: {}", e),
                })?;
                // Dropping the stream closes the device handle.
            }
            if let Ok(mut buffer) = self.buffer.lock() {
                buffer.clear();
            }
            Ok(())
        }

        fn sample_rate(&self) -> u32 {
            self.sample_rate
        }
    }

    impl Drop for CpalStream {
        fn drop(&mut self) {
            let _released = self.release();
        }
    }

    /// Build the audio stream with the configured format.
    ///
    /// Tries i16/mono at the target rate first (PipeWire/PulseAudio convert
    /// transparently), then f32/mono for devices that only expose float
    /// formats.
    fn build_stream(
        device: &cpal::Device,
        sample_rate: u32,
        buffer: &Arc<Mutex<Vec<i16>>>,
        callback_count: &Arc<AtomicU64>,
    ) -> Result<cpal::Stream> {
        let preferred_config = cpal::StreamConfig {
            channels: 1,
            sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        let err_callback = |err| {
            eprintln!("Audio stream error: {}", err);
        };

        let buf = Arc::clone(buffer);
        let counter = Arc::clone(callback_count);
        if let Ok(stream) = device.build_input_stream(
            &preferred_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                counter.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut buf) = buf.lock() {
                    buf.extend_from_slice(data);
                }
            },
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        let buf = Arc::clone(buffer);
        let counter = Arc::clone(callback_count);
        if let Ok(stream) = device.build_input_stream(
            &preferred_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                counter.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut buf) = buf.lock() {
                    buf.extend(
                        data.iter()
                            .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16),
                    );
                }
            },
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        build_stream_native(device, sample_rate, buffer, callback_count)
    }

    /// Build a stream using the device's default/native config, with software
    /// channel mixing (stereo→mono) and resampling (native rate→target).
    fn build_stream_native(
        device: &cpal::Device,
        target_rate: u32,
        buffer: &Arc<Mutex<Vec<i16>>>,
        callback_count: &Arc<AtomicU64>,
    ) -> Result<cpal::Stream> {
        use cpal::SampleFormat;

        let default_config =
            device
                .default_input_config()
                .map_err(|e| UttercutError::AudioCapture {
                    message: format!("Failed to query default input config: {}", e),
                })?;

        let native_rate = default_config.sample_rate();
        let native_channels = default_config.channels() as usize;
        let stream_config: cpal::StreamConfig = default_config.clone().into();

        eprintln!(
            "uttercut: using native audio format ({}ch/{}Hz/{:?}), converting in software",
            native_channels,
            native_rate,
            default_config.sample_format(),
        );

        let err_callback = |err| {
            eprintln!("Audio stream error: {}", err);
        };

        let buf = Arc::clone(buffer);
        let counter = Arc::clone(callback_count);

        match default_config.sample_format() {
            SampleFormat::I16 => device
                .build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        counter.fetch_add(1, Ordering::Relaxed);
                        let converted =
                            convert_to_mono(data, native_channels, native_rate, target_rate);
                        if let Ok(mut buf) = buf.lock() {
                            buf.extend_from_slice(&converted);
                        }
                    },
                    err_callback,
                    None,
                )
                .map_err(|e| UttercutError::AudioCapture {
                    message: format!("Failed to build native i16 stream: {}", e),
                }),
            SampleFormat::F32 => device
                .build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        counter.fetch_add(1, Ordering::Relaxed);
                        let i16_data: Vec<i16> = data
                            .iter()
                            .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                            .collect();
                        let converted =
                            convert_to_mono(&i16_data, native_channels, native_rate, target_rate);
                        if let Ok(mut buf) = buf.lock() {
                            buf.extend_from_slice(&converted);
                        }
                    },
                    err_callback,
                    None,
                )
                .map_err(|e| UttercutError::AudioCapture {
                    message: format!("Failed to build native f32 stream: {}", e),
                }),
            fmt => Err(UttercutError::AudioCapture {
                message: format!(
                    "Unsupported native sample format: {:?}. \
                     Try specifying a device explicitly.",
                    fmt
                ),
            }),
        }
    }

    /// Mix multi-channel audio to mono and resample to the target rate.
    fn convert_to_mono(
        samples: &[i16],
        channels: usize,
        source_rate: u32,
        target_rate: u32,
    ) -> Vec<i16> {
        let mono: Vec<i16> = if channels == 1 {
            samples.to_vec()
        } else {
            samples
                .chunks_exact(channels)
                .map(|frame| {
                    let sum: i32 = frame.iter().map(|&s| s as i32).sum();
                    (sum / channels as i32) as i16
                })
                .collect()
        };

        if source_rate == target_rate {
            mono
        } else {
            resample(&mono, source_rate, target_rate)
        }
    }

}

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Scripted stream for testing: yields one frame of the scripted amplitude
/// per read, then silence once the script is exhausted.
pub struct ScriptedStream {
    amplitudes: Vec<i16>,
    position: usize,
    window: usize,
    sample_rate: u32,
    fail_reads: bool,
    released: Arc<AtomicBool>,
}

impl ScriptedStream {
    /// Creates a stream that yields silence forever.
    pub fn silent() -> Self {
        Self {
            amplitudes: Vec::new(),
            position: 0,
            window: defaults::WINDOW_SIZE,
            sample_rate: defaults::SAMPLE_RATE,
            fail_reads: false,
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Appends `ms` of frames at the given amplitude.
    pub fn speech_ms(mut self, ms: u64, amplitude: i16) -> Self {
        let frames = (ms / defaults::TICK_MS).max(1) as usize;
        self.amplitudes.extend(std::iter::repeat_n(amplitude, frames));
        self
    }

    /// Appends `ms` of silent frames.
    pub fn silence_ms(self, ms: u64) -> Self {
        self.speech_ms(ms, 0)
    }

    /// Configure every read to fail.
    pub fn with_read_failure(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    /// Flag that flips to true once `release` is called.
    pub fn release_flag(&self) -> Arc<AtomicBool> {
        self.released.clone()
    }
}

impl AudioStream for ScriptedStream {
    fn read_samples(&mut self) -> Result<Vec<i16>> {
        if self.fail_reads {
            return Err(crate::error::UttercutError::AudioCapture {
                message: "scripted read failure".to_string(),
            });
        }

        let amplitude = self.amplitudes.get(self.position).copied().unwrap_or(0);
        self.position += 1;
        Ok(vec![amplitude; self.window])
    }

    fn release(&mut self) -> Result<()> {
        self.released.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Mock microphone that hands out scripted streams in order, then silent
/// streams; optionally fails from a configured acquisition onwards.
pub struct MockMicrophone {
    streams: Mutex<VecDeque<ScriptedStream>>,
    fail_from: Option<usize>,
    acquires: AtomicUsize,
}

impl MockMicrophone {
    pub fn new() -> Self {
        Self {
            streams: Mutex::new(VecDeque::new()),
            fail_from: None,
            acquires: AtomicUsize::new(0),
        }
    }

    /// Queues a scripted stream for the next acquisition.
    pub fn with_stream(self, stream: ScriptedStream) -> Self {
        if let Ok(mut streams) = self.streams.lock() {
            streams.push_back(stream);
        }
        self
    }

    /// Every acquisition fails.
    pub fn with_acquire_failure(mut self) -> Self {
        self.fail_from = Some(0);
        self
    }

    /// Acquisitions fail starting at the zero-based index `n`.
    pub fn with_acquire_failure_after(mut self, n: usize) -> Self {
        self.fail_from = Some(n);
        self
    }

    /// Number of acquisitions attempted so far.
    pub fn acquires(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }
}

impl Default for MockMicrophone {
    fn default() -> Self {
        Self::new()
    }
}

impl Microphone for MockMicrophone {
    fn acquire(&self) -> Result<Box<dyn AudioStream>> {
        let index = self.acquires.fetch_add(1, Ordering::SeqCst);

        if let Some(fail_from) = self.fail_from
            && index >= fail_from
        {
            return Err(crate::error::UttercutError::MicrophoneUnavailable {
                message: "mock acquisition failure".to_string(),
            });
        }

        let stream = self
            .streams
            .lock()
            .ok()
            .and_then(|mut streams| streams.pop_front())
            .unwrap_or_else(ScriptedStream::silent);
        Ok(Box::new(stream))
    }
}
