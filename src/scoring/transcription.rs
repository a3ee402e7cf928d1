//! Speech-to-text transcription service.
//!
//! Used only in transcribed ground-truth mode: the segment's own
//! transcription becomes the reference text it is scored against. The HTTP
//! client follows the provider's job protocol — upload the audio, submit a
//! transcription job, poll until it settles.

use crate::error::Result;
use crate::session::types::AudioBlob;
use async_trait::async_trait;
use std::sync::Arc;

/// A completed transcription.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    /// Recognized text.
    pub text: String,
    /// Provider confidence, 0.0 to 1.0.
    pub confidence: f32,
    /// Duration of the transcribed audio in seconds.
    pub audio_duration_secs: f32,
}

/// Trait for transcription services.
///
/// This trait allows swapping implementations (real HTTP client vs mock).
#[async_trait]
pub trait TranscriptionService: Send + Sync {
    /// Transcribe an audio blob.
    ///
    /// # Arguments
    /// * `audio` - Encoded segment audio
    /// * `language` - Language code (e.g., "en", "es")
    async fn transcribe(&self, audio: &AudioBlob, language: &str) -> Result<Transcript>;
}

/// Implement TranscriptionService for Arc<T> to allow sharing across sessions.
#[async_trait]
impl<T: TranscriptionService> TranscriptionService for Arc<T> {
    async fn transcribe(&self, audio: &AudioBlob, language: &str) -> Result<Transcript> {
        (**self).transcribe(audio, language).await
    }
}

/// Mock transcription service for testing.
#[derive(Debug)]
pub struct MockTranscriptionService {
    response: String,
    confidence: f32,
    should_fail: bool,
    delay: Option<std::time::Duration>,
    calls: std::sync::atomic::AtomicUsize,
}

impl MockTranscriptionService {
    /// Create a new mock with default settings.
    pub fn new() -> Self {
        Self {
            response: "mock transcription".to_string(),
            confidence: 0.95,
            should_fail: false,
            delay: None,
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Configure the mock to return a specific text.
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    /// Configure the mock to fail every call.
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Configure an artificial latency before each response.
    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of transcribe calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl Default for MockTranscriptionService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TranscriptionService for MockTranscriptionService {
    async fn transcribe(&self, audio: &AudioBlob, _language: &str) -> Result<Transcript> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.should_fail {
            return Err(crate::error::UttercutError::Transcription {
                message: "mock transcription failure".to_string(),
            });
        }

        Ok(Transcript {
            text: self.response.clone(),
            confidence: self.confidence,
            audio_duration_secs: audio.duration_ms as f32 / 1000.0,
        })
    }
}

#[cfg(feature = "http-services")]
pub use http::{HttpTranscriptionClient, TranscriptionClientConfig};

#[cfg(feature = "http-services")]
mod http {
    use super::{Transcript, TranscriptionService};
    use crate::defaults;
    use crate::error::{Result, UttercutError};
    use crate::session::types::AudioBlob;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    /// Configuration for the HTTP transcription client.
    #[derive(Debug, Clone)]
    pub struct TranscriptionClientConfig {
        /// Service base URL.
        pub base_url: String,
        /// API key sent in the `authorization` header.
        pub api_key: String,
        /// Per-request timeout.
        pub request_timeout: Duration,
        /// Interval between job polls.
        pub poll_interval: Duration,
        /// Maximum job polls before giving up.
        pub max_poll_attempts: u32,
    }

    impl TranscriptionClientConfig {
        pub fn new(base_url: &str, api_key: &str) -> Self {
            Self {
                base_url: base_url.trim_end_matches('/').to_string(),
                api_key: api_key.to_string(),
                request_timeout: Duration::from_secs(defaults::REQUEST_TIMEOUT_SECS),
                poll_interval: Duration::from_millis(defaults::POLL_INTERVAL_MS),
                max_poll_attempts: defaults::MAX_POLL_ATTEMPTS,
            }
        }
    }

    #[derive(Debug, Deserialize)]
    struct UploadResponse {
        upload_url: String,
    }

    #[derive(Debug, Serialize)]
    struct JobRequest<'a> {
        audio_url: &'a str,
        language_code: &'a str,
        punctuate: bool,
        format_text: bool,
    }

    #[derive(Debug, Deserialize)]
    struct JobResponse {
        id: String,
        status: JobStatus,
        text: Option<String>,
        confidence: Option<f32>,
        audio_duration: Option<f32>,
        error: Option<String>,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
    #[serde(rename_all = "lowercase")]
    enum JobStatus {
        Queued,
        Processing,
        Completed,
        Error,
    }

    /// Transcription client speaking the provider's upload/submit/poll
    /// protocol.
    pub struct HttpTranscriptionClient {
        config: TranscriptionClientConfig,
        client: reqwest::Client,
    }

    impl HttpTranscriptionClient {
        pub fn new(config: TranscriptionClientConfig) -> Result<Self> {
            let client = reqwest::Client::builder()
                .timeout(config.request_timeout)
                .build()?;
            Ok(Self { config, client })
        }

        async fn upload(&self, audio: &AudioBlob) -> Result<String> {
            let response: UploadResponse = self
                .client
                .post(format!("{}/upload", self.config.base_url))
                .header("authorization", &self.config.api_key)
                .header("content-type", "application/octet-stream")
                .body(audio.bytes.clone())
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            Ok(response.upload_url)
        }

        async fn submit(&self, audio_url: &str, language: &str) -> Result<JobResponse> {
            let request = JobRequest {
                audio_url,
                language_code: language,
                punctuate: true,
                format_text: true,
            };

            let job: JobResponse = self
                .client
                .post(format!("{}/transcript", self.config.base_url))
                .header("authorization", &self.config.api_key)
                .json(&request)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            Ok(job)
        }

        async fn poll(&self, id: &str) -> Result<JobResponse> {
            let job: JobResponse = self
                .client
                .get(format!("{}/transcript/{}", self.config.base_url, id))
                .header("authorization", &self.config.api_key)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            Ok(job)
        }
    }

    #[async_trait]
    impl TranscriptionService for HttpTranscriptionClient {
        async fn transcribe(&self, audio: &AudioBlob, language: &str) -> Result<Transcript> {
            let audio_url = self.upload(audio).await?;
            let mut job = self.submit(&audio_url, language).await?;

            let mut attempts: u32 = 0;
            loop {
                match job.status {
                    JobStatus::Completed => {
                        return Ok(Transcript {
                            text: job.text.unwrap_or_default(),
                            confidence: job.confidence.unwrap_or(0.0),
                            audio_duration_secs: job.audio_duration.unwrap_or(0.0),
                        });
                    }
                    JobStatus::Error => {
                        return Err(UttercutError::Transcription {
                            message: job
                                .error
                                .unwrap_or_else(|| "unknown provider error".to_string()),
                        });
                    }
                    JobStatus::Queued | JobStatus::Processing => {
                        attempts += 1;
                        if attempts >= self.config.max_poll_attempts {
                            return Err(UttercutError::Transcription {
                                message: format!(
                                    "job {} still pending after {} polls",
                                    job.id, attempts
                                ),
                            });
                        }
                        tokio::time::sleep(self.config.poll_interval).await;
                        job = self.poll(&job.id).await?;
                    }
                }
            }
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_config_trims_trailing_slash() {
            let config = TranscriptionClientConfig::new("https://api.example.com/", "key");
            assert_eq!(config.base_url, "https://api.example.com");
        }

        #[test]
        fn test_job_response_deserializes_provider_payload() {
            let payload = r#"{
                "id": "job-1",
                "status": "completed",
                "text": "the quick brown fox",
                "confidence": 0.97,
                "audio_duration": 2.4
            }"#;

            let job: JobResponse = serde_json::from_str(payload).unwrap();
            assert_eq!(job.status, JobStatus::Completed);
            assert_eq!(job.text.as_deref(), Some("the quick brown fox"));
        }

        #[test]
        fn test_job_response_pending_states() {
            let queued: JobResponse =
                serde_json::from_str(r#"{"id": "j", "status": "queued"}"#).unwrap();
            assert_eq!(queued.status, JobStatus::Queued);

            let processing: JobResponse =
                serde_json::from_str(r#"{"id": "j", "status": "processing"}"#).unwrap();
            assert_eq!(processing.status, JobStatus::Processing);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob() -> AudioBlob {
        AudioBlob::new(vec![0u8; 64], 2000)
    }

    #[tokio::test]
    async fn test_mock_returns_response() {
        let service = MockTranscriptionService::new().with_response("hello there");

        let transcript = service.transcribe(&blob(), "en").await.unwrap();
        assert_eq!(transcript.text, "hello there");
        assert_eq!(transcript.audio_duration_secs, 2.0);
        assert_eq!(service.calls(), 1);
    }

    #[tokio::test]
    async fn test_mock_failure() {
        let service = MockTranscriptionService::new().with_failure();
        assert!(service.transcribe(&blob(), "en").await.is_err());
        assert_eq!(service.calls(), 1);
    }

    #[tokio::test]
    async fn test_mock_delay_applies() {
        let service =
            MockTranscriptionService::new().with_delay(std::time::Duration::from_millis(50));

        let started = std::time::Instant::now();
        service.transcribe(&blob(), "en").await.unwrap();
        assert!(started.elapsed() >= std::time::Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_service_trait_is_object_safe() {
        let service: Box<dyn TranscriptionService> =
            Box::new(MockTranscriptionService::new().with_response("boxed"));
        let transcript = service.transcribe(&blob(), "en").await.unwrap();
        assert_eq!(transcript.text, "boxed");
    }
}
