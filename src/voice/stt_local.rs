//! Speech recognizer backends
//!
//! - `HttpRecognizer`: OpenAI-compatible `/v1/audio/transcriptions` server
//!   (faster-whisper-server, whisper.cpp server, vLLM)
//! - `WhisperProcessRecognizer`: a local script that reads base64 WAV on
//!   stdin and prints `{"text": ...}`

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::audio::AudioBuffer;
use super::transcribe::SpeechRecognizer;
use crate::config::{RecognizerBackend, TranscriptionConfig};
use crate::error::{PipelineError, Result};

const STAGE: &str = "transcription";

/// Encode mono samples at `sample_rate` as WAV bytes
fn chunk_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    AudioBuffer::from_samples(samples.to_vec(), sample_rate, 1).to_wav_bytes()
}

/// Pull the text out of a `{"text": ...}` reply, surfacing `{"error": ...}`
fn text_from_json(value: &serde_json::Value) -> Result<String> {
    if let Some(error) = value.get("error").and_then(|e| e.as_str()) {
        if !error.is_empty() {
            return Err(PipelineError::backend(STAGE, error));
        }
    }
    Ok(value
        .get("text")
        .and_then(|t| t.as_str())
        .unwrap_or("")
        .trim()
        .to_string())
}

/// Recognizer behind an OpenAI-compatible transcription endpoint
pub struct HttpRecognizer {
    client: Client,
    base_url: String,
    model: String,
    sample_rate: u32,
}

impl HttpRecognizer {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            sample_rate: super::audio::RECOGNIZER_SAMPLE_RATE,
        }
    }

    pub fn from_config(config: &TranscriptionConfig) -> Self {
        let mut recognizer = Self::new(&config.recognizer_url, &config.model);
        recognizer.sample_rate = config.sample_rate;
        recognizer
    }
}

#[async_trait]
impl SpeechRecognizer for HttpRecognizer {
    async fn transcribe_chunk(&self, samples: &[f32]) -> Result<String> {
        if samples.is_empty() {
            return Ok(String::new());
        }
        let wav = chunk_to_wav(samples, self.sample_rate)?;
        debug!("Uploading {} bytes of audio to {}", wav.len(), self.base_url);

        let part = reqwest::multipart::Part::bytes(wav)
            .file_name("chunk.wav")
            .mime_str("audio/wav")
            .map_err(|e| PipelineError::backend(STAGE, e))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "json");

        let response = self
            .client
            .post(format!("{}/v1/audio/transcriptions", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| PipelineError::unavailable("speech recognizer", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(PipelineError::backend(
                STAGE,
                format!("recognizer error ({}): {}", status, body),
            ));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| PipelineError::backend(STAGE, format!("invalid recognizer reply: {}", e)))?;
        text_from_json(&value)
    }
}

/// Recognizer that runs a whisper script once per chunk
pub struct WhisperProcessRecognizer {
    /// Program and leading arguments; `-` and the model name are appended
    command: Vec<String>,
    model: String,
    timeout: Duration,
    sample_rate: u32,
}

impl WhisperProcessRecognizer {
    pub fn new(command: Vec<String>, model: &str) -> Self {
        Self {
            command,
            model: model.to_string(),
            timeout: Duration::from_secs(120),
            sample_rate: super::audio::RECOGNIZER_SAMPLE_RATE,
        }
    }

    pub fn from_config(config: &TranscriptionConfig) -> Self {
        let mut recognizer = Self::new(config.process_command.clone(), &config.model);
        recognizer.sample_rate = config.sample_rate;
        recognizer
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run_whisper(&self, audio_b64: String) -> Result<String> {
        use tokio::io::AsyncWriteExt;

        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| PipelineError::InvalidInput("recognizer command is empty".into()))?;

        debug!("Running {}: b64 len={}, model={}", program, audio_b64.len(), self.model);

        let mut child = tokio::process::Command::new(program)
            .args(args)
            .arg("-")
            .arg(&self.model)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PipelineError::unavailable(program.as_str(), e))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| PipelineError::backend(STAGE, "recognizer has no stdin"))?;
        tokio::spawn(async move {
            let _ = stdin.write_all(audio_b64.as_bytes()).await;
            let _ = stdin.shutdown().await;
        });

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                PipelineError::backend(STAGE, format!("recognizer timed out after {}s", self.timeout.as_secs()))
            })??;

        if !output.status.success() {
            return Err(PipelineError::backend(
                STAGE,
                format!("{} failed: {}", program, String::from_utf8_lossy(&output.stderr).trim()),
            ));
        }

        let value: serde_json::Value = serde_json::from_slice(&output.stdout)
            .map_err(|e| PipelineError::backend(STAGE, format!("invalid recognizer output: {}", e)))?;
        text_from_json(&value)
    }
}

#[async_trait]
impl SpeechRecognizer for WhisperProcessRecognizer {
    async fn transcribe_chunk(&self, samples: &[f32]) -> Result<String> {
        if samples.is_empty() {
            return Ok(String::new());
        }
        let wav = chunk_to_wav(samples, self.sample_rate)?;
        let audio_b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, &wav);
        let text = self.run_whisper(audio_b64).await?;
        info!("Chunk transcribed: {} chars", text.len());
        Ok(text)
    }
}

/// Recognizer selected by the configuration
pub fn build_recognizer(config: &TranscriptionConfig) -> Arc<dyn SpeechRecognizer> {
    match config.recognizer {
        RecognizerBackend::Http => Arc::new(HttpRecognizer::from_config(config)),
        RecognizerBackend::Process => Arc::new(WhisperProcessRecognizer::from_config(config)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_chunk_to_wav() {
        let wav = chunk_to_wav(&[0.0; 16000], 16000).unwrap();
        assert_eq!(wav.len(), 44 + 32000);
        assert_eq!(&wav[0..4], b"RIFF");
    }

    #[test]
    fn test_text_from_json() {
        assert_eq!(text_from_json(&json!({"text": "  hello there "})).unwrap(), "hello there");
        assert_eq!(text_from_json(&json!({"error": ""})).unwrap(), "");
        assert!(text_from_json(&json!({"error": "CUDA out of memory"})).is_err());
    }

    #[test]
    fn test_http_url_trailing_slash() {
        let recognizer = HttpRecognizer::new("http://localhost:8000/", "openai/whisper-tiny");
        assert_eq!(recognizer.base_url, "http://localhost:8000");
    }

    #[tokio::test]
    async fn test_missing_program_is_unavailable() {
        let recognizer = WhisperProcessRecognizer::new(vec!["/nonexistent/whisper".into()], "tiny");
        let err = recognizer.transcribe_chunk(&[0.1; 160]).await.unwrap_err();
        assert!(matches!(err, PipelineError::BackendUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_empty_chunk_skips_backend() {
        let recognizer = WhisperProcessRecognizer::new(Vec::new(), "tiny");
        assert_eq!(recognizer.transcribe_chunk(&[]).await.unwrap(), "");
    }
}
