//! Container formats and the ffmpeg bridge
//!
//! WAV is read and written in-process. Everything else goes through an
//! `ffmpeg` subprocess: decoding pipes a 16-bit WAV to stdout, encoding
//! reads a temporary WAV written next to the output.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, info};

use super::audio::{self, AudioBuffer};
use crate::error::{PipelineError, Result};

/// Export formats selectable by output extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Wav,
    Mp3,
    Ogg,
    Flac,
}

impl ExportFormat {
    /// Used when the output extension is missing or unknown
    pub const FALLBACK: ExportFormat = ExportFormat::Mp3;

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "wav" => Some(Self::Wav),
            "mp3" => Some(Self::Mp3),
            "ogg" => Some(Self::Ogg),
            "flac" => Some(Self::Flac),
            _ => None,
        }
    }

    /// Format implied by the path, falling back to mp3
    pub fn for_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()).and_then(Self::from_extension) {
            Some(format) => format,
            None => {
                debug!("No known audio extension on {:?}, exporting as mp3", path);
                Self::FALLBACK
            }
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
            Self::Ogg => "ogg",
            Self::Flac => "flac",
        }
    }

    /// ffmpeg `-f` muxer name
    fn muxer(&self) -> &'static str {
        self.extension()
    }
}

/// Write a buffer to `path` in the format its extension implies
pub async fn export_audio(buffer: &AudioBuffer, path: &Path, ffmpeg: &str) -> Result<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let format = ExportFormat::for_path(path);
    if format == ExportFormat::Wav {
        audio::save_wav(buffer, path)?;
    } else {
        let temp = path.with_extension("partial.wav");
        audio::save_wav(buffer, &temp)?;
        let result = encode_with_ffmpeg(ffmpeg, &temp, path, format).await;
        if let Err(e) = tokio::fs::remove_file(&temp).await {
            debug!("Could not remove {:?}: {}", temp, e);
        }
        result?;
    }

    info!("Exported {:.1}s of audio to {:?}", buffer.duration_secs(), path);
    Ok(path.to_path_buf())
}

async fn encode_with_ffmpeg(ffmpeg: &str, input: &Path, output: &Path, format: ExportFormat) -> Result<()> {
    let status = tokio::process::Command::new(ffmpeg)
        .args(["-nostdin", "-y", "-loglevel", "error", "-i"])
        .arg(input)
        .args(["-f", format.muxer()])
        .arg(output)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| PipelineError::unavailable(ffmpeg, e))?;

    if !status.status.success() {
        return Err(PipelineError::Audio(format!(
            "{} could not encode {}: {}",
            ffmpeg,
            format.extension(),
            String::from_utf8_lossy(&status.stderr).trim()
        )));
    }
    Ok(())
}

/// Decode any container ffmpeg understands to mono audio at `sample_rate`
pub async fn decode_with_ffmpeg(ffmpeg: &str, input: &Path, sample_rate: u32) -> Result<AudioBuffer> {
    let rate = sample_rate.to_string();
    let output = tokio::process::Command::new(ffmpeg)
        .args(["-nostdin", "-loglevel", "error", "-i"])
        .arg(input)
        .args(["-ac", "1", "-ar", rate.as_str(), "-f", "wav", "-"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| PipelineError::unavailable(ffmpeg, e))?;

    if !output.status.success() {
        return Err(PipelineError::Audio(format!(
            "{} could not decode {:?}: {}",
            ffmpeg,
            input,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    // Piped WAV carries placeholder sizes
    AudioBuffer::from_wav_bytes(&output.stdout)
}

/// Load an input recording; WAV directly, anything else through ffmpeg
pub async fn load_audio_file(path: &Path, ffmpeg: &str) -> Result<AudioBuffer> {
    if !path.exists() {
        return Err(PipelineError::InvalidInput(format!("audio file not found: {}", path.display())));
    }
    match path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()) {
        Some(ext) if ext == "wav" => audio::load_wav(path),
        _ => decode_with_ffmpeg(ffmpeg, path, audio::RECOGNIZER_SAMPLE_RATE).await,
    }
}
