//! Configuration management
//!
//! Backend endpoints, token budgets, chunking parameters and scratch paths.
//! Loaded from `config.toml` in the platform config directory; a default
//! file is written on first run.

use anyhow::{Result, Context};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable that overrides any configured API key
pub const API_KEY_ENV: &str = "RECALL_COACH_API_KEY";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Generation backend selection
    #[serde(default)]
    pub generation: GenerationConfig,
    /// Document conversion and token budget
    #[serde(default)]
    pub ingest: IngestConfig,
    /// Speech recognition adapter
    #[serde(default)]
    pub transcription: TranscriptionConfig,
    /// Speech synthesis and audio assembly
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    /// Microphone capture
    #[serde(default)]
    pub capture: CaptureConfig,
    /// Stage gating behaviour
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// Which wire protocol the generation backend speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationBackend {
    /// Hosted or self-hosted `/chat/completions` API
    #[serde(rename = "openai_compatible", alias = "openai")]
    OpenAiCompatible,
    /// Local Ollama daemon
    Ollama,
    /// llama.cpp HTTP server
    LlamaCpp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_backend")]
    pub backend: GenerationBackend,
    /// Provider preset for OpenAI-compatible backends
    /// (openrouter, nvidia_nim, google, custom)
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Overrides the preset or local default URL
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_generation_model")]
    pub model: String,
    /// Name of the environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Request timeout; enforced by the HTTP client, not the pipeline
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

fn default_backend() -> GenerationBackend {
    GenerationBackend::Ollama
}

fn default_provider() -> String {
    "openrouter".to_string()
}

fn default_generation_model() -> String {
    "llama3.2".to_string()
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_generation_timeout() -> u64 {
    300
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            provider: default_provider(),
            base_url: None,
            model: default_generation_model(),
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
            temperature: None,
            timeout_secs: default_generation_timeout(),
        }
    }
}

impl GenerationConfig {
    /// API key from `RECALL_COACH_API_KEY`, then from `api_key_env`
    pub fn api_key(&self) -> Option<String> {
        std::env::var(API_KEY_ENV)
            .ok()
            .or_else(|| std::env::var(&self.api_key_env).ok())
            .filter(|k| !k.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// At or below this many tokens the document is used as-is
    #[serde(default = "default_low_tokens")]
    pub low_tokens: usize,
    /// Above this many tokens the document is rejected
    #[serde(default = "default_high_tokens")]
    pub high_tokens: usize,
    /// External converter for pdf/docx; `{input}` is replaced by the path
    #[serde(default = "default_converter_command")]
    pub converter_command: Vec<String>,
    /// HF `tokenizer.json` (requires the `hf-tokenizer` feature)
    #[serde(default)]
    pub tokenizer_file: Option<PathBuf>,
}

fn default_low_tokens() -> usize {
    2000
}

fn default_high_tokens() -> usize {
    5000
}

fn default_converter_command() -> Vec<String> {
    vec!["markitdown".to_string(), "{input}".to_string()]
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            low_tokens: default_low_tokens(),
            high_tokens: default_high_tokens(),
            converter_command: default_converter_command(),
            tokenizer_file: None,
        }
    }
}

/// Which speech recognizer to call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognizerBackend {
    /// OpenAI-compatible `/v1/audio/transcriptions`
    Http,
    /// Whisper script reading base64 WAV on stdin
    Process,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    #[serde(default = "default_recognizer")]
    pub recognizer: RecognizerBackend,
    #[serde(default = "default_recognizer_url")]
    pub recognizer_url: String,
    #[serde(default = "default_whisper_model")]
    pub model: String,
    /// Interpreter and script for the process backend
    #[serde(default = "default_whisper_command")]
    pub process_command: Vec<String>,
    #[serde(default = "default_target_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_chunk_secs")]
    pub chunk_secs: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_recognizer() -> RecognizerBackend {
    RecognizerBackend::Http
}

fn default_recognizer_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_whisper_model() -> String {
    "openai/whisper-tiny".to_string()
}

fn default_whisper_command() -> Vec<String> {
    vec!["python3".to_string(), "whisper_chunk.py".to_string()]
}

fn default_target_rate() -> u32 {
    16000
}

fn default_chunk_secs() -> u32 {
    30
}

fn default_batch_size() -> usize {
    8
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            recognizer: default_recognizer(),
            recognizer_url: default_recognizer_url(),
            model: default_whisper_model(),
            process_command: default_whisper_command(),
            sample_rate: default_target_rate(),
            chunk_secs: default_chunk_secs(),
            batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Kokoro server exposing `/v1/audio/speech`
    #[serde(default = "default_tts_url")]
    pub tts_url: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    /// Kokoro language code ('a' = American English, 'b' = British English)
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default = "default_output_rate")]
    pub sample_rate: u32,
    /// Parent of the per-session chunk directories
    #[serde(default)]
    pub scratch_root: Option<PathBuf>,
    /// Used when the output path has no recognised extension
    #[serde(default = "default_output_format")]
    pub default_format: String,
    /// Encoder used for compressed output formats
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
}

fn default_tts_url() -> String {
    "http://localhost:8880".to_string()
}

fn default_voice() -> String {
    "af_heart".to_string()
}

fn default_locale() -> String {
    "a".to_string()
}

fn default_speed() -> f32 {
    1.0
}

fn default_output_rate() -> u32 {
    24000
}

fn default_output_format() -> String {
    "mp3".to_string()
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            tts_url: default_tts_url(),
            voice: default_voice(),
            locale: default_locale(),
            speed: default_speed(),
            sample_rate: default_output_rate(),
            scratch_root: None,
            default_format: default_output_format(),
            ffmpeg: default_ffmpeg(),
        }
    }
}

impl SynthesisConfig {
    /// Configured scratch root, or `<data_dir>/scratch`, or the system temp dir
    pub fn scratch_root(&self) -> PathBuf {
        self.scratch_root
            .clone()
            .or_else(|| data_dir().ok().map(|d| d.join("scratch")))
            .unwrap_or_else(|| std::env::temp_dir().join("recall-coach"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_capture_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_capture_channels")]
    pub channels: u16,
    /// Delay between raising the stop flag and reading the captured audio
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
    /// Blocks buffered between the capture thread and the reader
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_capture_rate() -> u32 {
    44100
}

fn default_capture_channels() -> u16 {
    1
}

fn default_grace_ms() -> u64 {
    50
}

fn default_channel_capacity() -> usize {
    256
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_capture_rate(),
            channels: default_capture_channels(),
            grace_ms: default_grace_ms(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// What happens to downstream artifacts when an upstream one is rewritten
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationPolicy {
    /// Mark every transitively dependent artifact invalid
    #[default]
    Transitive,
    /// Leave downstream artifacts untouched
    Off,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub invalidation: InvalidationPolicy,
    /// Questions requested from the question generation stage
    #[serde(default = "default_question_count")]
    pub question_count: usize,
    /// Pairs requested from the supplementary Q&A stage
    #[serde(default = "default_supplementary_count")]
    pub supplementary_count: usize,
}

fn default_question_count() -> usize {
    5
}

fn default_supplementary_count() -> usize {
    10
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            invalidation: InvalidationPolicy::default(),
            question_count: default_question_count(),
            supplementary_count: default_supplementary_count(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        let config_path = config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config: Config = toml::from_str(&contents)
            .context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = config_path()?;
        let parent = config_path.parent()
            .context("Config path has no parent")?;

        std::fs::create_dir_all(parent)
            .context("Failed to create config directory")?;

        let contents = toml::to_string_pretty(self)
            .context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .context("Failed to write config file")?;

        Ok(())
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.ingest.low_tokens > self.ingest.high_tokens {
            anyhow::bail!(
                "ingest.low_tokens ({}) must not exceed ingest.high_tokens ({})",
                self.ingest.low_tokens,
                self.ingest.high_tokens
            );
        }
        if self.transcription.chunk_secs == 0 || self.transcription.batch_size == 0 {
            anyhow::bail!("transcription.chunk_secs and transcription.batch_size must be positive");
        }
        if self.transcription.sample_rate == 0 || self.capture.sample_rate == 0 {
            anyhow::bail!("sample rates must be positive");
        }
        if self.ingest.converter_command.is_empty() {
            anyhow::bail!("ingest.converter_command must name a program");
        }
        Ok(())
    }
}

/// Get the configuration file path
pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "recall-coach", "recall-coach")
        .context("Failed to get project directories")?;
    Ok(base.config_dir().join("config.toml"))
}

/// Get the data directory path
pub fn data_dir() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "recall-coach", "recall-coach")
        .context("Failed to get project directories")?;
    Ok(base.data_dir().to_path_buf())
}

/// Default configuration rendered as TOML
pub fn default_config_toml() -> String {
    toml::to_string_pretty(&Config::default()).unwrap_or_default()
}
