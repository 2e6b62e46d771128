//! Audio capture
//!
//! A single writer (a background thread pulling from an `AudioSource`, or
//! the microphone callback) sends sample blocks over a bounded channel.
//! The handle is the only reader. Stopping keeps collecting for a short
//! grace period, then raises the stop flag and drains the channel until
//! the writer hangs up.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use super::audio::{self, AudioBuffer};
use crate::config::CaptureConfig;
use crate::error::{PipelineError, Result};

/// Blocking producer of interleaved sample blocks
pub trait AudioSource: Send + 'static {
    fn sample_rate(&self) -> u32;
    fn channels(&self) -> u16;
    /// Next block, or `None` once the source is exhausted
    fn read_block(&mut self) -> Result<Option<Vec<f32>>>;
}

/// Replays a buffer in fixed-size blocks
pub struct BufferSource {
    buffer: AudioBuffer,
    block_len: usize,
    position: usize,
}

impl BufferSource {
    pub fn new(buffer: AudioBuffer, block_len: usize) -> Self {
        Self {
            buffer,
            block_len: block_len.max(1),
            position: 0,
        }
    }
}

impl AudioSource for BufferSource {
    fn sample_rate(&self) -> u32 {
        self.buffer.sample_rate()
    }

    fn channels(&self) -> u16 {
        self.buffer.channels()
    }

    fn read_block(&mut self) -> Result<Option<Vec<f32>>> {
        let samples = self.buffer.samples();
        if self.position >= samples.len() {
            return Ok(None);
        }
        let end = (self.position + self.block_len).min(samples.len());
        let block = samples[self.position..end].to_vec();
        self.position = end;
        Ok(Some(block))
    }
}

/// A running capture
pub struct CaptureHandle {
    stop: Arc<AtomicBool>,
    rx: Receiver<Vec<f32>>,
    writer: Option<JoinHandle<Result<()>>>,
    collected: Vec<f32>,
    sample_rate: u32,
    channels: u16,
    grace: Duration,
    /// Output format when it differs from the device format
    target: Option<(u32, u16)>,
}

impl CaptureHandle {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Move whatever has arrived so far off the channel without blocking
    pub fn poll(&mut self) -> usize {
        let before = self.collected.len();
        for block in self.rx.try_iter() {
            self.collected.extend_from_slice(&block);
        }
        self.collected.len() - before
    }

    /// Seconds captured so far (as of the last poll)
    pub fn captured_secs(&self) -> f64 {
        self.collected.len() as f64 / (self.sample_rate.max(1) as f64 * self.channels.max(1) as f64)
    }

    /// Stop the writer and return everything captured, peak-normalized.
    ///
    /// Blocks that arrive within the grace window are still collected; the
    /// stop flag goes up once the window closes or the writer hangs up.
    pub fn stop(mut self) -> Result<AudioBuffer> {
        let deadline = Instant::now() + self.grace;
        loop {
            match self.rx.recv_deadline(deadline) {
                Ok(block) => self.collected.extend_from_slice(&block),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        self.stop.store(true, Ordering::SeqCst);
        self.finish()
    }

    /// Collect until the writer hangs up on its own (a finite source ran
    /// dry, or the stop flag was already raised), then join it
    pub fn finish(mut self) -> Result<AudioBuffer> {
        for block in self.rx.iter() {
            self.collected.extend_from_slice(&block);
        }

        if let Some(writer) = self.writer.take() {
            writer
                .join()
                .map_err(|_| PipelineError::Audio("capture thread panicked".into()))??;
        }

        let mut buffer =
            AudioBuffer::from_samples(std::mem::take(&mut self.collected), self.sample_rate, self.channels);
        if let Some((rate, channels)) = self.target {
            if channels == 1 {
                buffer = buffer.to_mono();
            }
            buffer = buffer.resample(rate);
        }
        info!("Captured {:.1}s of audio", buffer.duration_secs());
        Ok(buffer.normalize_peak())
    }

    /// Stop and save the capture as WAV
    pub fn record_to_file(self, path: &Path) -> Result<AudioBuffer> {
        let buffer = self.stop()?;
        audio::save_wav(&buffer, path)?;
        Ok(buffer)
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Start a writer thread pulling from `source`
pub fn start_capture<S: AudioSource>(mut source: S, config: &CaptureConfig) -> Result<CaptureHandle> {
    let (tx, rx) = bounded::<Vec<f32>>(config.channel_capacity.max(1));
    let stop = Arc::new(AtomicBool::new(false));
    let sample_rate = source.sample_rate();
    let channels = source.channels();

    let writer_stop = stop.clone();
    let writer = std::thread::Builder::new()
        .name("audio-capture".into())
        .spawn(move || pump(&mut source, &tx, &writer_stop))?;

    debug!("Capture started at {}Hz, {} channels", sample_rate, channels);
    Ok(CaptureHandle {
        stop,
        rx,
        writer: Some(writer),
        collected: Vec::new(),
        sample_rate,
        channels,
        grace: Duration::from_millis(config.grace_ms),
        target: None,
    })
}

fn pump<S: AudioSource>(source: &mut S, tx: &Sender<Vec<f32>>, stop: &AtomicBool) -> Result<()> {
    // The flag is checked after each block, so the first read always happens
    loop {
        match source.read_block() {
            Ok(Some(block)) => {
                if tx.send(block).is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                error!("Audio source failed: {}", e);
                return Err(e);
            }
        }
        if stop.load(Ordering::SeqCst) {
            break;
        }
    }
    Ok(())
}

/// Capture from the default input device.
///
/// The cpal stream lives on the writer thread; dropping it there closes
/// the channel once the stop flag is raised.
#[cfg(feature = "voice")]
pub fn start_microphone(config: &CaptureConfig) -> Result<CaptureHandle> {
    let (tx, rx) = bounded::<Vec<f32>>(config.channel_capacity.max(1));
    let (ready_tx, ready_rx) = bounded::<Result<(u32, u16)>>(1);
    let stop = Arc::new(AtomicBool::new(false));

    let writer_stop = stop.clone();
    let writer = std::thread::Builder::new()
        .name("microphone".into())
        .spawn(move || -> Result<()> {
            let stream = match microphone::open(tx) {
                Ok((stream, rate, channels)) => {
                    let _ = ready_tx.send(Ok((rate, channels)));
                    stream
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return Ok(());
                }
            };
            while !writer_stop.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(10));
            }
            drop(stream);
            Ok(())
        })?;

    let (sample_rate, channels) = ready_rx
        .recv()
        .map_err(|_| PipelineError::Audio("microphone thread exited early".into()))??;

    info!("Recording from microphone at {}Hz, {} channels", sample_rate, channels);
    Ok(CaptureHandle {
        stop,
        rx,
        writer: Some(writer),
        collected: Vec::new(),
        sample_rate,
        channels,
        grace: Duration::from_millis(config.grace_ms),
        target: Some((config.sample_rate, config.channels)),
    })
}

#[cfg(feature = "voice")]
mod microphone {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use crossbeam_channel::Sender;
    use tracing::{error, info, warn};

    use crate::error::{PipelineError, Result};

    fn audio_err(e: impl std::fmt::Display) -> PipelineError {
        PipelineError::Audio(e.to_string())
    }

    pub(super) fn open(tx: Sender<Vec<f32>>) -> Result<(cpal::Stream, u32, u16)> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| audio_err("no input device available (microphone not found)"))?;
        info!("Using input device: {}", device.name().unwrap_or_else(|_| "Unknown".to_string()));

        let supported = device.default_input_config().map_err(audio_err)?;
        let stream_config = supported.config();
        let rate = stream_config.sample_rate.0;
        let channels = stream_config.channels;
        let err_fn = |err| error!("Audio input error: {}", err);

        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| forward(&tx, data.to_vec()),
                err_fn,
                None,
            ),
            cpal::SampleFormat::I16 => device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    forward(&tx, data.iter().map(|&s| s as f32 / i16::MAX as f32).collect())
                },
                err_fn,
                None,
            ),
            cpal::SampleFormat::U16 => device.build_input_stream(
                &stream_config,
                move |data: &[u16], _: &cpal::InputCallbackInfo| {
                    forward(&tx, data.iter().map(|&s| (s as f32 - 32768.0) / 32768.0).collect())
                },
                err_fn,
                None,
            ),
            format => return Err(audio_err(format!("unsupported sample format: {:?}", format))),
        }
        .map_err(audio_err)?;

        stream.play().map_err(audio_err)?;
        Ok((stream, rate, channels))
    }

    fn forward(tx: &Sender<Vec<f32>>, block: Vec<f32>) {
        if tx.try_send(block).is_err() {
            warn!("Capture channel full, dropping samples");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Never runs dry; pauses briefly between blocks
    struct EndlessTone;

    impl AudioSource for EndlessTone {
        fn sample_rate(&self) -> u32 {
            8000
        }

        fn channels(&self) -> u16 {
            1
        }

        fn read_block(&mut self) -> Result<Option<Vec<f32>>> {
            std::thread::sleep(Duration::from_millis(1));
            Ok(Some(vec![0.25; 80]))
        }
    }

    struct FailingSource;

    impl AudioSource for FailingSource {
        fn sample_rate(&self) -> u32 {
            8000
        }

        fn channels(&self) -> u16 {
            1
        }

        fn read_block(&mut self) -> Result<Option<Vec<f32>>> {
            Err(PipelineError::Audio("device unplugged".into()))
        }
    }

    /// Produces one block after a delay, then runs dry
    struct LateBlock {
        delay: Duration,
        sent: bool,
    }

    impl AudioSource for LateBlock {
        fn sample_rate(&self) -> u32 {
            8000
        }

        fn channels(&self) -> u16 {
            1
        }

        fn read_block(&mut self) -> Result<Option<Vec<f32>>> {
            if self.sent {
                return Ok(None);
            }
            std::thread::sleep(self.delay);
            self.sent = true;
            Ok(Some(vec![0.5; 40]))
        }
    }

    fn config(capacity: usize, grace_ms: u64) -> CaptureConfig {
        CaptureConfig {
            channel_capacity: capacity,
            grace_ms,
            ..CaptureConfig::default()
        }
    }

    #[test]
    fn test_replayed_source_fully_collected() {
        let samples: Vec<f32> = (0..1000).map(|i| (i as f32 / 1000.0) * 0.5).collect();
        let source = BufferSource::new(AudioBuffer::from_samples(samples.clone(), 16000, 1), 64);

        // Capacity far below the block count: the writer blocks until drained
        let handle = start_capture(source, &config(2, 5)).unwrap();
        let buffer = handle.finish().unwrap();

        assert_eq!(buffer.len(), 1000);
        assert_eq!(buffer.sample_rate(), 16000);
        let peak = buffer.samples().iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!((peak - 1.0).abs() < 1e-6);
        assert!((buffer.samples()[500] - 500.0 / 999.0).abs() < 1e-4);
    }

    #[test]
    fn test_stop_ends_endless_source() {
        let mut handle = start_capture(EndlessTone, &config(4, 5)).unwrap();
        std::thread::sleep(Duration::from_millis(30));
        handle.poll();
        let buffer = handle.stop().unwrap();
        assert!(!buffer.is_empty());
        assert_eq!(buffer.len() % 80, 0);
    }

    #[test]
    fn test_block_within_grace_window_is_kept() {
        let source = LateBlock {
            delay: Duration::from_millis(20),
            sent: false,
        };
        // Stop right away; the block lands inside the grace window
        let handle = start_capture(source, &config(4, 2000)).unwrap();
        let buffer = handle.stop().unwrap();
        assert_eq!(buffer.len(), 40);
    }

    #[test]
    fn test_source_error_surfaces_on_stop() {
        let handle = start_capture(FailingSource, &config(4, 5)).unwrap();
        assert!(matches!(handle.stop(), Err(PipelineError::Audio(_))));
    }

    #[test]
    fn test_record_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        let source = BufferSource::new(AudioBuffer::from_samples(vec![0.1; 320], 16000, 1), 32);

        // The writer hangs up when the source runs dry, ending the grace window early
        let handle = start_capture(source, &config(64, 2000)).unwrap();
        handle.record_to_file(&path).unwrap();
        assert_eq!(audio::load_wav(&path).unwrap().len(), 320);
    }
}
