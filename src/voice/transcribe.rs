//! Chunked transcription
//!
//! Audio is mixed to mono, resampled to the recognizer rate and cut into
//! fixed-length chunks (the last one may be shorter). Chunks go to the
//! recognizer in batches; inside a batch they run concurrently and finish
//! in any order. Every result carries its chunk index and the texts are
//! re-sorted before joining, so output order is always chunk order.
//!
//! One failed chunk aborts the whole transcription. There is no retry.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info};

use super::audio::AudioBuffer;
use super::encode;
use crate::config::TranscriptionConfig;
use crate::error::{PipelineError, Result};

/// Turns one chunk of mono samples into text
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    async fn transcribe_chunk(&self, samples: &[f32]) -> Result<String>;
}

pub struct Transcriber {
    recognizer: Arc<dyn SpeechRecognizer>,
    sample_rate: u32,
    chunk_secs: u32,
    batch_size: usize,
}

impl Transcriber {
    pub fn new(recognizer: Arc<dyn SpeechRecognizer>) -> Self {
        Self {
            recognizer,
            sample_rate: super::audio::RECOGNIZER_SAMPLE_RATE,
            chunk_secs: 30,
            batch_size: 8,
        }
    }

    pub fn from_config(recognizer: Arc<dyn SpeechRecognizer>, config: &TranscriptionConfig) -> Self {
        Self {
            recognizer,
            sample_rate: config.sample_rate,
            chunk_secs: config.chunk_secs,
            batch_size: config.batch_size,
        }
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_chunk_secs(mut self, chunk_secs: u32) -> Self {
        self.chunk_secs = chunk_secs;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Samples per chunk at the recognizer rate
    pub fn chunk_len(&self) -> usize {
        self.chunk_secs as usize * self.sample_rate as usize
    }

    /// Transcript, or `None` when any chunk failed
    pub async fn transcribe(&self, audio: &AudioBuffer) -> Option<String> {
        match self.try_transcribe(audio).await {
            Ok(text) => Some(text),
            Err(e) => {
                error!("Transcription failed, discarding partial output: {}", e);
                None
            }
        }
    }

    pub async fn try_transcribe(&self, audio: &AudioBuffer) -> Result<String> {
        let chunk_len = self.chunk_len();
        if chunk_len == 0 || self.batch_size == 0 {
            return Err(PipelineError::InvalidInput(
                "chunk length and batch size must be positive".into(),
            ));
        }

        let prepared = audio.to_mono().resample(self.sample_rate);
        let chunks: Vec<&[f32]> = prepared.samples().chunks(chunk_len).collect();
        if chunks.is_empty() {
            debug!("No audio to transcribe");
            return Ok(String::new());
        }
        info!(
            "Transcribing {:.1}s of audio in {} chunks",
            prepared.duration_secs(),
            chunks.len()
        );

        let mut texts: Vec<(usize, String)> = Vec::with_capacity(chunks.len());
        for (batch_no, batch) in chunks.chunks(self.batch_size).enumerate() {
            let base = batch_no * self.batch_size;
            let results: Vec<(usize, Result<String>)> = stream::iter(batch.iter().enumerate())
                .map(|(offset, chunk)| {
                    let recognizer = self.recognizer.clone();
                    async move { (base + offset, recognizer.transcribe_chunk(chunk).await) }
                })
                .buffer_unordered(self.batch_size)
                .collect()
                .await;

            for (index, result) in results {
                let text = result.map_err(|e| {
                    PipelineError::TranscriptionAborted(format!("chunk {}: {}", index, e))
                })?;
                texts.push((index, text));
            }
            debug!("Batch {} done", batch_no);
        }

        texts.sort_by_key(|(index, _)| *index);
        Ok(texts
            .into_iter()
            .map(|(_, text)| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" "))
    }

    /// Load a recording and transcribe it
    pub async fn transcribe_file(&self, path: &Path, ffmpeg: &str) -> Result<String> {
        let audio = encode::load_audio_file(path, ffmpeg).await?;
        self.try_transcribe(&audio).await
    }
}
