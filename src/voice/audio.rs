//! Audio buffers and WAV handling
//!
//! ```text
//! capture / ffmpeg / WAV file ─→ AudioBuffer ─→ mono, resample ─→ recognizer
//! synthesizer ─→ AudioBuffer ─→ chunk files ─→ merge ─→ export
//! ```
//!
//! Samples are interleaved f32 in `[-1.0, 1.0]`. WAV output is 16-bit PCM.

use std::io::Cursor;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};

/// Sample rate the recognizers expect
pub const RECOGNIZER_SAMPLE_RATE: u32 = 16000;

/// Placeholder size written by streaming WAV encoders
const STREAMING_SIZE: u32 = 0xFFFF_FFFF;

/// Owned block of interleaved samples
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl AudioBuffer {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: Vec::new(),
            sample_rate,
            channels,
        }
    }

    pub fn from_samples(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    pub fn push(&mut self, samples: &[f32]) {
        self.samples.extend_from_slice(samples);
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    /// Samples as i16 (for WAV export)
    pub fn samples_i16(&self) -> Vec<i16> {
        self.samples
            .iter()
            .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
            .collect()
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / (self.sample_rate as f64 * self.channels as f64)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Append another buffer with the same format
    pub fn append(&mut self, other: &AudioBuffer) -> Result<()> {
        if other.sample_rate != self.sample_rate || other.channels != self.channels {
            return Err(PipelineError::Audio(format!(
                "cannot join {}Hz/{}ch audio onto {}Hz/{}ch",
                other.sample_rate, other.channels, self.sample_rate, self.channels
            )));
        }
        self.samples.extend_from_slice(&other.samples);
        Ok(())
    }

    /// Average all channels into one
    pub fn to_mono(&self) -> Self {
        if self.channels <= 1 {
            return self.clone();
        }
        let channels = self.channels as usize;
        let samples = self
            .samples
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect();
        Self {
            samples,
            sample_rate: self.sample_rate,
            channels: 1,
        }
    }

    /// Resample to a different rate (linear interpolation, mono or
    /// interleaved frames)
    pub fn resample(&self, target_rate: u32) -> Self {
        if self.sample_rate == target_rate || self.samples.is_empty() || self.sample_rate == 0 {
            return Self {
                samples: self.samples.clone(),
                sample_rate: target_rate,
                channels: self.channels,
            };
        }

        let channels = self.channels.max(1) as usize;
        let frames = self.samples.len() / channels;
        let ratio = target_rate as f64 / self.sample_rate as f64;
        let new_frames = (frames as u64 * target_rate as u64 / self.sample_rate as u64) as usize;
        let mut new_samples = Vec::with_capacity(new_frames * channels);

        for i in 0..new_frames {
            let src_idx = i as f64 / ratio;
            let idx_floor = (src_idx.floor() as usize).min(frames - 1);
            let idx_ceil = (idx_floor + 1).min(frames - 1);
            let frac = (src_idx - idx_floor as f64) as f32;

            for ch in 0..channels {
                let a = self.samples[idx_floor * channels + ch];
                let b = self.samples[idx_ceil * channels + ch];
                new_samples.push(a * (1.0 - frac) + b * frac);
            }
        }

        Self {
            samples: new_samples,
            sample_rate: target_rate,
            channels: self.channels,
        }
    }

    /// Scale so the loudest sample sits at full scale. Silence is left alone.
    pub fn normalize_peak(mut self) -> Self {
        let peak = self.samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        if peak > f32::EPSILON {
            for s in &mut self.samples {
                *s /= peak;
            }
        }
        self
    }

    /// Encode as 16-bit PCM WAV in memory
    pub fn to_wav_bytes(&self) -> Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, self.wav_spec())?;
            for sample in self.samples_i16() {
                writer.write_sample(sample)?;
            }
            writer.finalize()?;
        }
        Ok(cursor.into_inner())
    }

    /// Decode WAV bytes, including streaming output with placeholder sizes
    pub fn from_wav_bytes(bytes: &[u8]) -> Result<Self> {
        match hound::WavReader::new(Cursor::new(bytes)).map_err(PipelineError::from).and_then(read_wav) {
            Ok(buffer) => Ok(buffer),
            Err(e) => {
                debug!("Regular WAV decode failed ({}), trying streaming layout", e);
                parse_streaming_wav(bytes)
            }
        }
    }

    fn wav_spec(&self) -> hound::WavSpec {
        hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        }
    }
}

fn read_wav<R: std::io::Read>(mut reader: hound::WavReader<R>) -> Result<AudioBuffer> {
    let spec = reader.spec();
    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };
    Ok(AudioBuffer::from_samples(samples, spec.sample_rate, spec.channels))
}

/// Save as 16-bit PCM WAV
pub fn save_wav(buffer: &AudioBuffer, path: &Path) -> Result<()> {
    let mut writer = hound::WavWriter::create(path, buffer.wav_spec())?;
    for sample in buffer.samples_i16() {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    debug!("Saved {} samples to {:?}", buffer.len(), path);
    Ok(())
}

pub fn load_wav(path: &Path) -> Result<AudioBuffer> {
    let reader = hound::WavReader::open(path)?;
    let buffer = read_wav(reader)?;
    info!("Loaded {:.1}s of audio from {:?}", buffer.duration_secs(), path);
    Ok(buffer)
}

/// Parse a WAV whose RIFF or chunk sizes are `0xFFFFFFFF`, as written by
/// encoders that stream to a pipe. Data runs to the end of the bytes.
pub fn parse_streaming_wav(bytes: &[u8]) -> Result<AudioBuffer> {
    if bytes.len() < 44 {
        return Err(PipelineError::Audio(format!("WAV data too short: {} bytes", bytes.len())));
    }
    if &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(PipelineError::Audio("not a WAV file".into()));
    }

    let read_u16 = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);
    let read_u32 = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);

    let mut pos = 12;
    let mut format = None;
    let mut data = None;

    while pos + 8 <= bytes.len() {
        let chunk_id = &bytes[pos..pos + 4];
        let chunk_size = read_u32(pos + 4);

        if chunk_id == b"fmt " {
            if pos + 24 > bytes.len() {
                break;
            }
            // (format tag, channels, sample rate, bits per sample)
            format = Some((read_u16(pos + 8), read_u16(pos + 10), read_u32(pos + 12), read_u16(pos + 22)));
            let size = if chunk_size == STREAMING_SIZE { 16 } else { chunk_size as usize };
            pos += 8 + size + (size & 1);
        } else if chunk_id == b"data" {
            let start = pos + 8;
            let end = if chunk_size == STREAMING_SIZE {
                bytes.len()
            } else {
                (start + chunk_size as usize).min(bytes.len())
            };
            data = Some(&bytes[start..end]);
            break;
        } else {
            if chunk_size == STREAMING_SIZE {
                break;
            }
            let size = chunk_size as usize;
            pos += 8 + size + (size & 1);
        }
    }

    let (tag, channels, sample_rate, bits) =
        format.ok_or_else(|| PipelineError::Audio("WAV has no fmt chunk".into()))?;
    let data = data.ok_or_else(|| PipelineError::Audio("WAV has no data chunk".into()))?;

    let samples: Vec<f32> = match (tag, bits) {
        (3, 32) => data
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
        (1, 16) => data
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]) as f32 / 32768.0)
            .collect(),
        (1, 32) => data
            .chunks_exact(4)
            .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f32 / 2_147_483_648.0)
            .collect(),
        _ => {
            return Err(PipelineError::Audio(format!(
                "unsupported WAV encoding: format {} at {} bits",
                tag, bits
            )))
        }
    };

    Ok(AudioBuffer::from_samples(samples, sample_rate, channels))
}
