//! Error types for uttercut.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum UttercutError {
    // Configuration errors
    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Microphone / capture errors
    #[error("Microphone unavailable: {message}")]
    MicrophoneUnavailable { message: String },

    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    #[error("Audio encoding failed: {message}")]
    AudioEncode { message: String },

    // Downstream service errors
    #[error("Transcription failed: {message}")]
    Transcription { message: String },

    #[error("Pronunciation scoring failed: {message}")]
    Scoring { message: String },

    // Session lifecycle errors
    #[error("Session error: {message}")]
    Session { message: String },

    #[cfg(feature = "http-services")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, UttercutError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_invalid_value_display() {
        let error = UttercutError::ConfigInvalidValue {
            key: "silence_threshold".to_string(),
            message: "must be in (0, 1]".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for silence_threshold: must be in (0, 1]"
        );
    }

    #[test]
    fn test_microphone_unavailable_display() {
        let error = UttercutError::MicrophoneUnavailable {
            message: "permission denied".to_string(),
        };
        assert_eq!(error.to_string(), "Microphone unavailable: permission denied");
    }

    #[test]
    fn test_audio_device_not_found_display() {
        let error = UttercutError::AudioDeviceNotFound {
            device: "default".to_string(),
        };
        assert_eq!(error.to_string(), "Audio device not found: default");
    }

    #[test]
    fn test_audio_capture_display() {
        let error = UttercutError::AudioCapture {
            message: "buffer overflow".to_string(),
        };
        assert_eq!(error.to_string(), "Audio capture failed: buffer overflow");
    }

    #[test]
    fn test_transcription_display() {
        let error = UttercutError::Transcription {
            message: "job timed out".to_string(),
        };
        assert_eq!(error.to_string(), "Transcription failed: job timed out");
    }

    #[test]
    fn test_scoring_display() {
        let error = UttercutError::Scoring {
            message: "malformed response".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Pronunciation scoring failed: malformed response"
        );
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: UttercutError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_str = "invalid = toml = syntax";
        let toml_error = toml::from_str::<toml::Value>(toml_str).unwrap_err();
        let error: UttercutError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<UttercutError>();
        assert_sync::<UttercutError>();
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_result() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(returns_result().unwrap(), 42);
    }
}
