//! Pronunciation scoring service.
//!
//! Each speech-bearing segment is scored against its reference text. The
//! provider returns a structured payload — overall score, per-word scores,
//! per-phone scores — which is modeled here with the raw JSON kept alongside
//! for callers that need unmapped fields.

use crate::error::Result;
use crate::session::types::AudioBlob;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Phone quality scores at or above this count as accurate when computing
/// the phoneme accuracy rate.
pub const ACCURATE_PHONE_THRESHOLD: f32 = 70.0;

/// Supported scoring dialects.
pub mod dialects {
    pub const EN_US: &str = "en-us";
    pub const EN_GB: &str = "en-gb";
    pub const ES_ES: &str = "es-es";
    pub const FR_FR: &str = "fr-fr";

    pub fn supported() -> &'static [&'static str] {
        &[EN_US, EN_GB, ES_ES, FR_FR]
    }
}

/// Quality score for a single phone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhoneScore {
    pub phone: String,
    pub quality_score: f32,
}

/// Quality score for a single word, with its phone breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordScore {
    pub word: String,
    pub quality_score: f32,
    #[serde(default)]
    pub phones: Vec<PhoneScore>,
}

/// A pronunciation scoring result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PronunciationScore {
    /// Overall pronunciation quality, 0 to 100.
    pub overall: f32,
    /// Fluency score, when the provider reports one.
    pub fluency: Option<f32>,
    /// Per-word scores.
    #[serde(default)]
    pub words: Vec<WordScore>,
    /// Flat per-phone scores.
    #[serde(default)]
    pub phones: Vec<PhoneScore>,
    /// The provider's raw payload, kept opaque.
    #[serde(default)]
    pub raw: serde_json::Value,
}

impl PronunciationScore {
    /// Minimal score carrying only an overall value (used by mocks/tests).
    pub fn from_overall(overall: f32) -> Self {
        Self {
            overall,
            fluency: None,
            words: Vec::new(),
            phones: Vec::new(),
            raw: serde_json::Value::Null,
        }
    }

    /// Mean of the per-word quality scores, if any.
    pub fn average_word_score(&self) -> Option<f32> {
        if self.words.is_empty() {
            return None;
        }
        let sum: f32 = self.words.iter().map(|w| w.quality_score).sum();
        Some(sum / self.words.len() as f32)
    }

    /// Percentage of phones scoring at or above
    /// [`ACCURATE_PHONE_THRESHOLD`], if any phones were reported.
    pub fn phoneme_accuracy_rate(&self) -> Option<f32> {
        if self.phones.is_empty() {
            return None;
        }
        let accurate = self
            .phones
            .iter()
            .filter(|p| p.quality_score >= ACCURATE_PHONE_THRESHOLD)
            .count();
        Some(accurate as f32 / self.phones.len() as f32 * 100.0)
    }
}

/// Trait for pronunciation scoring services.
#[async_trait]
pub trait PronunciationScorer: Send + Sync {
    /// Score an audio blob against reference text.
    ///
    /// # Arguments
    /// * `audio` - Encoded segment audio
    /// * `reference_text` - Ground truth the audio is scored against
    /// * `dialect` - Dialect code (see [`dialects`])
    /// * `tag` - Opaque sequential segment identifier for provider-side
    ///   bookkeeping
    async fn score(
        &self,
        audio: &AudioBlob,
        reference_text: &str,
        dialect: &str,
        tag: &str,
    ) -> Result<PronunciationScore>;
}

/// Implement PronunciationScorer for Arc<T> to allow sharing across sessions.
#[async_trait]
impl<T: PronunciationScorer> PronunciationScorer for Arc<T> {
    async fn score(
        &self,
        audio: &AudioBlob,
        reference_text: &str,
        dialect: &str,
        tag: &str,
    ) -> Result<PronunciationScore> {
        (**self).score(audio, reference_text, dialect, tag).await
    }
}

/// One recorded call to a [`MockPronunciationScorer`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRequest {
    pub reference_text: String,
    pub dialect: String,
    pub tag: String,
}

/// Mock scorer for testing.
#[derive(Debug)]
pub struct MockPronunciationScorer {
    score: PronunciationScore,
    should_fail: bool,
    delay: Option<std::time::Duration>,
    per_call_delays: std::sync::Mutex<std::collections::VecDeque<std::time::Duration>>,
    requests: std::sync::Mutex<Vec<ScoreRequest>>,
}

impl MockPronunciationScorer {
    /// Create a new mock returning a fixed score.
    pub fn new() -> Self {
        Self {
            score: PronunciationScore::from_overall(87.5),
            should_fail: false,
            delay: None,
            per_call_delays: std::sync::Mutex::new(std::collections::VecDeque::new()),
            requests: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Configure the score returned on success.
    pub fn with_score(mut self, score: PronunciationScore) -> Self {
        self.score = score;
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

    /// Configure per-call latencies, consumed in call order. Calls beyond
    /// the list fall back to the uniform delay (if any).
    pub fn with_call_delays(self, delays: impl IntoIterator<Item = std::time::Duration>) -> Self {
        if let Ok(mut queue) = self.per_call_delays.lock() {
            queue.extend(delays);
        }
        self
    }

    /// Number of score calls received.
    pub fn calls(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// All recorded calls, in arrival order.
    pub fn requests(&self) -> Vec<ScoreRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl Default for MockPronunciationScorer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PronunciationScorer for MockPronunciationScorer {
    async fn score(
        &self,
        _audio: &AudioBlob,
        reference_text: &str,
        dialect: &str,
        tag: &str,
    ) -> Result<PronunciationScore> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(ScoreRequest {
                reference_text: reference_text.to_string(),
                dialect: dialect.to_string(),
                tag: tag.to_string(),
            });
        }

        let delay = self
            .per_call_delays
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front())
            .or(self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.should_fail {
            return Err(crate::error::UttercutError::Scoring {
                message: "mock scoring failure".to_string(),
            });
        }

        Ok(self.score.clone())
    }
}

#[cfg(feature = "http-services")]
pub use http::{HttpPronunciationClient, PronunciationClientConfig};

#[cfg(feature = "http-services")]
mod http {
    use super::{PhoneScore, PronunciationScore, PronunciationScorer, WordScore};
    use crate::defaults;
    use crate::error::{Result, UttercutError};
    use crate::session::types::AudioBlob;
    use async_trait::async_trait;
    use serde::Deserialize;
    use std::time::Duration;

    /// Configuration for the HTTP pronunciation-scoring client.
    #[derive(Debug, Clone)]
    pub struct PronunciationClientConfig {
        /// Service base URL.
        pub base_url: String,
        /// API key passed as the `key` query parameter.
        pub api_key: String,
        /// Provider-side user identifier.
        pub user_id: String,
        /// Per-request timeout.
        pub request_timeout: Duration,
    }

    impl PronunciationClientConfig {
        pub fn new(base_url: &str, api_key: &str, user_id: &str) -> Self {
            Self {
                base_url: base_url.trim_end_matches('/').to_string(),
                api_key: api_key.to_string(),
                user_id: user_id.to_string(),
                request_timeout: Duration::from_secs(defaults::REQUEST_TIMEOUT_SECS),
            }
        }
    }

    #[derive(Debug, Deserialize)]
    struct ScoreSummary {
        pronunciation: f32,
        fluency: Option<f32>,
    }

    #[derive(Debug, Deserialize)]
    struct WirePhone {
        phone: String,
        quality_score: f32,
    }

    #[derive(Debug, Deserialize)]
    struct WireWord {
        word: String,
        quality_score: f32,
        #[serde(default)]
        phone_score_list: Vec<WirePhone>,
    }

    #[derive(Debug, Deserialize)]
    struct ScoreResponse {
        quality_score: ScoreSummary,
        #[serde(default)]
        word_score_list: Vec<WireWord>,
        #[serde(default)]
        phone_score_list: Vec<WirePhone>,
    }

    /// Pronunciation-scoring client posting multipart scoring requests.
    pub struct HttpPronunciationClient {
        config: PronunciationClientConfig,
        client: reqwest::Client,
    }

    impl HttpPronunciationClient {
        pub fn new(config: PronunciationClientConfig) -> Result<Self> {
            let client = reqwest::Client::builder()
                .timeout(config.request_timeout)
                .build()?;
            Ok(Self { config, client })
        }
    }

    fn convert_phone(wire: WirePhone) -> PhoneScore {
        PhoneScore {
            phone: wire.phone,
            quality_score: wire.quality_score,
        }
    }

    fn parse_score(raw: serde_json::Value) -> Result<PronunciationScore> {
        let wire: ScoreResponse =
            serde_json::from_value(raw.clone()).map_err(|e| UttercutError::Scoring {
                message: format!("malformed score payload: {}", e),
            })?;

        Ok(PronunciationScore {
            overall: wire.quality_score.pronunciation,
            fluency: wire.quality_score.fluency,
            words: wire
                .word_score_list
                .into_iter()
                .map(|w| WordScore {
                    word: w.word,
                    quality_score: w.quality_score,
                    phones: w.phone_score_list.into_iter().map(convert_phone).collect(),
                })
                .collect(),
            phones: wire
                .phone_score_list
                .into_iter()
                .map(convert_phone)
                .collect(),
            raw,
        })
    }

    #[async_trait]
    impl PronunciationScorer for HttpPronunciationClient {
        async fn score(
            &self,
            audio: &AudioBlob,
            reference_text: &str,
            dialect: &str,
            tag: &str,
        ) -> Result<PronunciationScore> {
            let part = reqwest::multipart::Part::bytes(audio.bytes.clone())
                .file_name("segment.wav")
                .mime_str("audio/wav")?;

            let form = reqwest::multipart::Form::new()
                .text("text", reference_text.to_string())
                .text("dialect", dialect.to_string())
                .text("question_info", tag.to_string())
                .part("user_audio_file", part);

            let raw: serde_json::Value = self
                .client
                .post(format!("{}/scoring/text", self.config.base_url))
                .query(&[
                    ("key", self.config.api_key.as_str()),
                    ("user_id", self.config.user_id.as_str()),
                ])
                .multipart(form)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;

            parse_score(raw)
        }
    }

}
