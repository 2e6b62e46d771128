//! Local TTS using the Kokoro HTTP API
//!
//! Kokoro-FastAPI and Kokorox expose an OpenAI-compatible
//! `/v1/audio/speech` endpoint. WAV is requested and parsed in-process;
//! streamed responses carry `0xFFFFFFFF` chunk sizes, which the audio
//! module handles.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use super::audio::AudioBuffer;
use super::synthesis::SpeechSynthesizer;
use crate::agent::llm::truncate_chars;
use crate::config::SynthesisConfig;
use crate::error::{PipelineError, Result};

const STAGE: &str = "synthesis";

/// Kokoro TTS client
pub struct KokoroSynthesizer {
    base_url: String,
    speed: f32,
    client: Client,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
    speed: f32,
    lang_code: &'a str,
}

impl KokoroSynthesizer {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            speed: 1.0,
            client: Client::new(),
        }
    }

    pub fn from_config(config: &SynthesisConfig) -> Self {
        Self::new(&config.tts_url).with_speed(config.speed)
    }

    pub fn with_speed(mut self, speed: f32) -> Self {
        self.speed = speed;
        self
    }

    /// Check if the TTS server answers at all
    pub async fn is_available(&self) -> bool {
        self.client
            .get(format!("{}/v1/audio/speech", self.base_url))
            .send()
            .await
            .is_ok()
    }
}

#[async_trait]
impl SpeechSynthesizer for KokoroSynthesizer {
    async fn synthesize(&self, segment: &str, voice: &str, locale: &str) -> Result<AudioBuffer> {
        debug!("TTS synthesizing: \"{}\"", truncate_chars(segment, 80));

        let request = SpeechRequest {
            model: "kokoro",
            input: segment,
            voice,
            response_format: "wav",
            speed: self.speed,
            lang_code: locale,
        };

        let response = self
            .client
            .post(format!("{}/v1/audio/speech", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::unavailable("kokoro", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::backend(STAGE, format!("Kokoro TTS error ({}): {}", status, body)));
        }

        let wav_bytes = response
            .bytes()
            .await
            .map_err(|e| PipelineError::backend(STAGE, format!("failed to read TTS response: {}", e)))?;

        let buffer = AudioBuffer::from_wav_bytes(&wav_bytes)?;
        debug!(
            "TTS produced {:.1}s of audio at {}Hz",
            buffer.duration_secs(),
            buffer.sample_rate()
        );
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kokoro_creation() {
        let tts = KokoroSynthesizer::new("http://localhost:8880/");
        assert_eq!(tts.base_url, "http://localhost:8880");
        assert_eq!(tts.speed, 1.0);
    }

    #[test]
    fn test_request_shape() {
        let request = SpeechRequest {
            model: "kokoro",
            input: "Hello.",
            voice: "af_heart",
            response_format: "wav",
            speed: 1.0,
            lang_code: "a",
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["response_format"], "wav");
        assert_eq!(value["voice"], "af_heart");
        assert_eq!(value["lang_code"], "a");
    }

    #[tokio::test]
    async fn test_unreachable_server() {
        let tts = KokoroSynthesizer::new("http://127.0.0.1:9");
        let err = tts.synthesize("Hello.", "af_heart", "a").await.unwrap_err();
        assert!(matches!(err, PipelineError::BackendUnavailable { .. }));
    }
}
