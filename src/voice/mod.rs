//! Voice I/O
//!
//! - `audio`: sample buffers and WAV handling
//! - `encode`: ffmpeg bridge for compressed formats
//! - `capture`: single-writer recording (microphone under the `voice` feature)
//! - `transcribe`: chunked, batched transcription with ordered reassembly
//! - `stt_local`: HTTP and subprocess speech recognizers
//! - `tts_local`: Kokoro speech synthesizer
//! - `synthesis`: narration assembly and chunk merging

pub mod audio;
pub mod capture;
pub mod encode;
pub mod stt_local;
pub mod synthesis;
pub mod transcribe;
pub mod tts_local;

pub use audio::AudioBuffer;
pub use capture::{start_capture, AudioSource, BufferSource, CaptureHandle};
#[cfg(feature = "voice")]
pub use capture::start_microphone;
pub use encode::{export_audio, load_audio_file, ExportFormat};
pub use stt_local::{build_recognizer, HttpRecognizer, WhisperProcessRecognizer};
pub use synthesis::{merge_chunks, AudioSynthesisAssembler, MergeOutcome, SpeechSynthesizer};
pub use transcribe::{SpeechRecognizer, Transcriber};
pub use tts_local::KokoroSynthesizer;
