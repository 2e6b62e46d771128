//! Narration assembly
//!
//! Text is split into segments, each segment is synthesized to one
//! buffer, and the buffers are written as `0.wav`, `1.wav`, ... in a
//! session-scoped scratch directory. The merge step then loads indices
//! from 0 upward, stopping at the first missing index, and exports the
//! concatenation. The scratch directory is cleared before and removed
//! after every run.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::audio::{self, AudioBuffer};
use super::encode;
use crate::config::SynthesisConfig;
use crate::error::Result;

static SEGMENT_BREAK: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n+").expect("segment regex"));

/// Non-blank segments of `text`, split on runs of newlines
pub fn split_segments(text: &str) -> Vec<&str> {
    SEGMENT_BREAK
        .split(text)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Text-to-speech backend
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// One buffer for one segment of text
    async fn synthesize(&self, segment: &str, voice: &str, locale: &str) -> Result<AudioBuffer>;

    /// One buffer per non-blank segment, in segment order
    async fn synthesize_segments(&self, text: &str, voice: &str, locale: &str) -> Result<Vec<AudioBuffer>> {
        let mut buffers = Vec::new();
        for segment in split_segments(text) {
            buffers.push(self.synthesize(segment, voice, locale).await?);
        }
        Ok(buffers)
    }
}

/// Outcome of merging a chunk directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged { path: PathBuf, chunks: usize },
    /// No `0.wav` was present; nothing was written
    NothingToMerge,
}

impl MergeOutcome {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Merged { path, .. } => Some(path),
            Self::NothingToMerge => None,
        }
    }
}

pub fn chunk_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("{}.wav", index))
}

/// Concatenate `0.wav`, `1.wav`, ... from `dir` into `output`.
///
/// Loading stops at the first missing index, so chunks after a gap are
/// ignored. A missing `0.wav` is `NothingToMerge`.
pub async fn merge_chunks(dir: &Path, output: &Path, ffmpeg: &str) -> Result<MergeOutcome> {
    let mut merged: Option<AudioBuffer> = None;
    let mut chunks = 0;

    loop {
        let path = chunk_path(dir, chunks);
        if !path.is_file() {
            break;
        }
        let buffer = audio::load_wav(&path)?;
        match merged.as_mut() {
            Some(all) => all.append(&buffer)?,
            None => merged = Some(buffer),
        }
        chunks += 1;
    }

    let Some(buffer) = merged else {
        info!("No audio chunks in {:?}, nothing to merge", dir);
        return Ok(MergeOutcome::NothingToMerge);
    };

    let path = encode::export_audio(&buffer, output, ffmpeg).await?;
    info!("Merged {} chunks into {:?}", chunks, path);
    Ok(MergeOutcome::Merged { path, chunks })
}

/// Turns a block of text into one audio file
pub struct AudioSynthesisAssembler {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    scratch_root: PathBuf,
    ffmpeg: String,
}

impl AudioSynthesisAssembler {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>, scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            synthesizer,
            scratch_root: scratch_root.into(),
            ffmpeg: "ffmpeg".to_string(),
        }
    }

    pub fn from_config(synthesizer: Arc<dyn SpeechSynthesizer>, config: &SynthesisConfig) -> Self {
        Self::new(synthesizer, config.scratch_root()).with_ffmpeg(&config.ffmpeg)
    }

    pub fn with_ffmpeg(mut self, ffmpeg: &str) -> Self {
        self.ffmpeg = ffmpeg.to_string();
        self
    }

    /// Scratch directory owned by one session
    pub fn chunk_dir(&self, session_id: &str) -> PathBuf {
        self.scratch_root.join(session_id).join("chunks")
    }

    /// Synthesize `text` and write the merged audio to `output`
    pub async fn synthesize(
        &self,
        session_id: &str,
        text: &str,
        voice: &str,
        locale: &str,
        output: &Path,
    ) -> Result<MergeOutcome> {
        let dir = self.chunk_dir(session_id);
        reset_dir(&dir).await?;

        let result = self.generate_and_merge(&dir, text, voice, locale, output).await;

        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            warn!("Could not remove scratch directory {:?}: {}", dir, e);
        }
        if let Some(session_dir) = dir.parent() {
            // Only succeeds when nothing else lives there
            let _ = tokio::fs::remove_dir(session_dir).await;
        }
        result
    }

    async fn generate_and_merge(
        &self,
        dir: &Path,
        text: &str,
        voice: &str,
        locale: &str,
        output: &Path,
    ) -> Result<MergeOutcome> {
        let buffers = self.synthesizer.synthesize_segments(text, voice, locale).await?;
        debug!("Synthesized {} segments", buffers.len());

        for (index, buffer) in buffers.iter().enumerate() {
            audio::save_wav(buffer, &chunk_path(dir, index))?;
        }
        merge_chunks(dir, output, &self.ffmpeg).await
    }
}

/// Remove any leftovers and recreate the directory
async fn reset_dir(dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!("Cleared {:?}", dir),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    tokio::fs::create_dir_all(dir).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use std::sync::Mutex;

    /// One 10-sample buffer per segment
    #[derive(Default)]
    struct RecordingSynth {
        segments: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SpeechSynthesizer for RecordingSynth {
        async fn synthesize(&self, segment: &str, _voice: &str, _locale: &str) -> Result<AudioBuffer> {
            self.segments.lock().unwrap().push(segment.to_string());
            Ok(AudioBuffer::from_samples(vec![0.25; 10], 24000, 1))
        }
    }

    struct BrokenSynth;

    #[async_trait]
    impl SpeechSynthesizer for BrokenSynth {
        async fn synthesize(&self, _segment: &str, _voice: &str, _locale: &str) -> Result<AudioBuffer> {
            Err(PipelineError::unavailable("kokoro", "connection refused"))
        }
    }

    fn write_chunk(dir: &Path, index: usize) {
        audio::save_wav(&AudioBuffer::from_samples(vec![0.5; 4], 24000, 1), &chunk_path(dir, index)).unwrap();
    }

    #[test]
    fn test_split_segments() {
        assert_eq!(
            split_segments("First para.\n\n\nSecond.\n  \nThird."),
            vec!["First para.", "Second.", "Third."]
        );
        assert!(split_segments("\n\n").is_empty());
    }

    #[tokio::test]
    async fn test_merge_stops_at_gap() {
        let dir = tempfile::tempdir().unwrap();
        write_chunk(dir.path(), 0);
        write_chunk(dir.path(), 1);
        write_chunk(dir.path(), 3);
        let output = dir.path().join("out.wav");

        let outcome = merge_chunks(dir.path(), &output, "ffmpeg").await.unwrap();
        assert_eq!(outcome, MergeOutcome::Merged { path: output.clone(), chunks: 2 });
        assert_eq!(audio::load_wav(&output).unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_merge_without_first_chunk() {
        let dir = tempfile::tempdir().unwrap();
        write_chunk(dir.path(), 1);
        let output = dir.path().join("out.wav");

        let outcome = merge_chunks(dir.path(), &output, "ffmpeg").await.unwrap();
        assert_eq!(outcome, MergeOutcome::NothingToMerge);
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_assembler_writes_and_cleans_up() {
        let scratch = tempfile::tempdir().unwrap();
        let out_dir = tempfile::tempdir().unwrap();
        let output = out_dir.path().join("lesson.wav");
        let synth = Arc::new(RecordingSynth::default());
        let assembler = AudioSynthesisAssembler::new(synth.clone(), scratch.path());

        // Leftovers from an earlier run must not leak into this one
        let dir = assembler.chunk_dir("s1");
        std::fs::create_dir_all(&dir).unwrap();
        write_chunk(&dir, 0);
        write_chunk(&dir, 1);
        write_chunk(&dir, 2);

        let outcome = assembler
            .synthesize("s1", "Para one.\n\nPara two.", "af_heart", "a", &output)
            .await
            .unwrap();

        assert_eq!(outcome, MergeOutcome::Merged { path: output.clone(), chunks: 2 });
        assert_eq!(audio::load_wav(&output).unwrap().len(), 20);
        assert_eq!(*synth.segments.lock().unwrap(), vec!["Para one.", "Para two."]);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_assembler_blank_text_is_nothing_to_merge() {
        let scratch = tempfile::tempdir().unwrap();
        let output = scratch.path().join("lesson.mp3");
        let assembler = AudioSynthesisAssembler::new(Arc::new(RecordingSynth::default()), scratch.path());

        let outcome = assembler.synthesize("s2", "\n\n", "af_heart", "a", &output).await.unwrap();
        assert_eq!(outcome, MergeOutcome::NothingToMerge);
        assert!(outcome.path().is_none());
    }

    #[test]
    fn test_sessions_use_separate_scratch() {
        let assembler = AudioSynthesisAssembler::new(Arc::new(BrokenSynth), "/tmp/scratch");
        assert_ne!(assembler.chunk_dir("a"), assembler.chunk_dir("b"));
    }

    #[tokio::test]
    async fn test_backend_failure_cleans_up() {
        let scratch = tempfile::tempdir().unwrap();
        let assembler = AudioSynthesisAssembler::new(Arc::new(BrokenSynth), scratch.path());
        let err = assembler
            .synthesize("s3", "Hello.", "af_heart", "a", &scratch.path().join("x.wav"))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::BackendUnavailable { .. }));
        assert!(!assembler.chunk_dir("s3").exists());
    }
}
