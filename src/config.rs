//! Configuration for uttercut.
//!
//! Two layers: the file-backed [`Config`] (TOML + environment overrides) used
//! by the CLI, and the explicit [`SessionConfig`] handed to
//! [`AudioSession::start`](crate::session::orchestrator::AudioSession::start).
//! Everything a session needs — tuning values included — travels in the
//! struct; the core never reads ambient process state.

use crate::defaults;
use crate::error::{Result, UttercutError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Where a segment's reference text comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroundTruth {
    /// Score every segment against this caller-provided phrase.
    /// The transcription service is never invoked in this mode.
    Fixed(String),
    /// Transcribe each segment and score it against its own transcription.
    Transcribed,
}

/// Immutable per-session configuration.
///
/// Supplied by the caller at session start and never read from ambient state.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Reference-text source for scoring.
    pub ground_truth: GroundTruth,
    /// Minimum normalized amplitude (0, 1] considered sound.
    pub silence_threshold: f32,
    /// Continuous sub-threshold duration before silence is declared.
    pub silence_delay: Duration,
    /// Ceiling for a single segment.
    pub max_segment_duration: Duration,
    /// Ceiling for the whole session.
    pub max_total_duration: Duration,
    /// Language code passed to the transcription service.
    pub language: String,
    /// Dialect code passed to the pronunciation scorer.
    pub dialect: String,
    /// Capture sample rate in Hz.
    pub sample_rate: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ground_truth: GroundTruth::Transcribed,
            silence_threshold: defaults::SILENCE_THRESHOLD,
            silence_delay: Duration::from_millis(defaults::SILENCE_DELAY_MS),
            max_segment_duration: Duration::from_millis(defaults::MAX_SEGMENT_MS),
            max_total_duration: Duration::from_millis(defaults::MAX_TOTAL_MS),
            language: defaults::DEFAULT_LANGUAGE.to_string(),
            dialect: defaults::DEFAULT_DIALECT.to_string(),
            sample_rate: defaults::SAMPLE_RATE,
        }
    }
}

impl SessionConfig {
    /// Validates all tuning values, returning the first violation found.
    pub fn validate(&self) -> Result<()> {
        if !(self.silence_threshold > 0.0 && self.silence_threshold <= 1.0) {
            return Err(UttercutError::ConfigInvalidValue {
                key: "silence_threshold".to_string(),
                message: "must be in (0, 1]".to_string(),
            });
        }
        if self.max_segment_duration.is_zero() {
            return Err(UttercutError::ConfigInvalidValue {
                key: "max_segment_duration".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.max_total_duration.is_zero() {
            return Err(UttercutError::ConfigInvalidValue {
                key: "max_total_duration".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.sample_rate == 0 {
            return Err(UttercutError::ConfigInvalidValue {
                key: "sample_rate".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if let GroundTruth::Fixed(phrase) = &self.ground_truth
            && phrase.trim().is_empty()
        {
            return Err(UttercutError::ConfigInvalidValue {
                key: "ground_truth".to_string(),
                message: "fixed phrase must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Root configuration structure (TOML file).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub session: SessionSection,
    pub services: ServicesConfig,
}

/// Audio capture and segmentation tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub device: Option<String>,
    pub sample_rate: u32,
    pub silence_threshold: f32,
    pub silence_delay_ms: u64,
    pub max_segment_ms: u64,
    pub max_total_ms: u64,
}

/// Session-level defaults (ground truth, language, dialect).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionSection {
    pub mode: GroundTruthMode,
    pub fixed_phrase: Option<String>,
    pub language: String,
    pub dialect: String,
}

/// Ground-truth mode as it appears in the config file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GroundTruthMode {
    Fixed,
    #[default]
    Transcribed,
}

/// Downstream service endpoints and credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServicesConfig {
    pub transcription_url: String,
    pub transcription_api_key: String,
    pub scoring_url: String,
    pub scoring_api_key: String,
    pub scoring_user_id: String,
    pub request_timeout_secs: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: defaults::SAMPLE_RATE,
            silence_threshold: defaults::SILENCE_THRESHOLD,
            silence_delay_ms: defaults::SILENCE_DELAY_MS,
            max_segment_ms: defaults::MAX_SEGMENT_MS,
            max_total_ms: defaults::MAX_TOTAL_MS,
        }
    }
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            mode: GroundTruthMode::Transcribed,
            fixed_phrase: None,
            language: defaults::DEFAULT_LANGUAGE.to_string(),
            dialect: defaults::DEFAULT_DIALECT.to_string(),
        }
    }
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            transcription_url: String::new(),
            transcription_api_key: String::new(),
            scoring_url: String::new(),
            scoring_api_key: String::new(),
            scoring_user_id: String::new(),
            request_timeout_secs: defaults::REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file is missing.
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(UttercutError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Apply environment variable overrides.
    ///
    /// Supported environment variables:
    /// - UTTERCUT_TRANSCRIPTION_API_KEY → services.transcription_api_key
    /// - UTTERCUT_SCORING_API_KEY → services.scoring_api_key
    /// - UTTERCUT_AUDIO_DEVICE → audio.device
    /// - UTTERCUT_LANGUAGE → session.language
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var("UTTERCUT_TRANSCRIPTION_API_KEY")
            && !key.is_empty()
        {
            self.services.transcription_api_key = key;
        }

        if let Ok(key) = std::env::var("UTTERCUT_SCORING_API_KEY")
            && !key.is_empty()
        {
            self.services.scoring_api_key = key;
        }

        if let Ok(device) = std::env::var("UTTERCUT_AUDIO_DEVICE")
            && !device.is_empty()
        {
            self.audio.device = Some(device);
        }

        if let Ok(language) = std::env::var("UTTERCUT_LANGUAGE")
            && !language.is_empty()
        {
            self.session.language = language;
        }

        self
    }

    /// Get the default configuration file path.
    ///
    /// Returns ~/.config/uttercut/config.toml on Linux.
    #[cfg(feature = "cli")]
    pub fn default_path() -> std::path::PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| std::path::PathBuf::from("."))
            .join("uttercut")
            .join("config.toml")
    }

    /// Build a validated [`SessionConfig`] from this file-level config.
    pub fn session_config(&self) -> Result<SessionConfig> {
        let ground_truth = match self.session.mode {
            GroundTruthMode::Fixed => {
                let phrase = self.session.fixed_phrase.clone().ok_or_else(|| {
                    UttercutError::ConfigInvalidValue {
                        key: "session.fixed_phrase".to_string(),
                        message: "required when mode = \"fixed\"".to_string(),
                    }
                })?;
                GroundTruth::Fixed(phrase)
            }
            GroundTruthMode::Transcribed => GroundTruth::Transcribed,
        };

        let config = SessionConfig {
            ground_truth,
            silence_threshold: self.audio.silence_threshold,
            silence_delay: Duration::from_millis(self.audio.silence_delay_ms),
            max_segment_duration: Duration::from_millis(self.audio.max_segment_ms),
            max_total_duration: Duration::from_millis(self.audio.max_total_ms),
            language: self.session.language.clone(),
            dialect: self.session.dialect.clone(),
            sample_rate: self.audio.sample_rate,
        };
        config.validate()?;
        Ok(config)
    }
}
