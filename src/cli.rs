//! CLI interface for recall-coach
//!
//! Every command loads the session snapshot, acts on it, and writes it
//! back, so a run can be continued across invocations.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{self, Config};
use crate::document::{self, CommandConverter, DefaultConverter, DocumentIngestor, TokenBudget};
use crate::export;
use crate::materials;
use crate::orchestrator::{ArtifactKey, PipelineController, Session, StageId};
use crate::voice::{self, AudioSynthesisAssembler, KokoroSynthesizer, MergeOutcome, Transcriber};

#[derive(Parser)]
#[command(name = "recall-coach")]
#[command(about = "Explain a topic aloud, find the gaps, and get personalized revision material", long_about = None)]
#[command(version)]
struct Cli {
    /// Session snapshot file (default: <data dir>/session.json)
    #[arg(long, global = true, env = "RECALL_COACH_SESSION")]
    session: Option<PathBuf>,

    /// Config file (default: platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest the reference document (pdf, md or docx)
    Ingest {
        file: PathBuf,
    },
    /// Transcribe a recording of the learner's explanation
    Transcribe {
        audio: PathBuf,
    },
    /// Record the learner's explanation from the microphone
    #[cfg(feature = "voice")]
    Record {
        /// Maximum recording length (Ctrl-C stops early)
        #[arg(long, default_value = "120")]
        seconds: u64,
        /// Where to save the WAV
        #[arg(long)]
        out: PathBuf,
        /// Transcribe the recording into the session afterwards
        #[arg(long)]
        transcribe: bool,
    },
    /// Submit answers to the generated questions, one per line
    Answer {
        file: PathBuf,
    },
    /// Run one stage
    Run {
        /// gap_analysis, question_generation, evaluation, narration_transcript,
        /// summary_notes, key_vocabulary or supplementary_qa
        stage: String,
    },
    /// Synthesize a text artifact to audio
    Narrate {
        /// Output file; the extension picks the format (wav, mp3, ogg, flac)
        #[arg(long)]
        out: PathBuf,
        /// Text artifact to read out
        #[arg(long, default_value = "narration_transcript")]
        key: String,
        #[arg(long)]
        voice: Option<String>,
        #[arg(long)]
        locale: Option<String>,
    },
    /// Write finished artifacts as files
    Export {
        #[arg(long)]
        dir: PathBuf,
        /// Export only this artifact
        #[arg(long)]
        key: Option<String>,
    },
    /// Show which stages are done, stale, or blocked
    Status,
    /// Discard every artifact in the session
    Reset,
    /// Show the effective configuration
    Config {
        /// Print only the config file path
        #[arg(long)]
        path: bool,
    },
}

/// Run the CLI
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let session_path = match cli.session {
        Some(path) => path,
        None => config::data_dir()?.join("session.json"),
    };

    match cli.command {
        Commands::Ingest { file } => ingest(&config, &session_path, &file).await,
        Commands::Transcribe { audio } => transcribe(&config, &session_path, &audio).await,
        #[cfg(feature = "voice")]
        Commands::Record { seconds, out, transcribe: then_transcribe } => {
            record(&config, seconds, &out).await?;
            if then_transcribe {
                transcribe(&config, &session_path, &out).await?;
            }
            Ok(())
        }
        Commands::Answer { file } => answer(&config, &session_path, &file),
        Commands::Run { stage } => run_stage(&config, &session_path, &stage).await,
        Commands::Narrate { out, key, voice, locale } => {
            narrate(&config, &session_path, &out, &key, voice, locale).await
        }
        Commands::Export { dir, key } => export_files(&session_path, &dir, key.as_deref()),
        Commands::Status => status(&config, &session_path),
        Commands::Reset => {
            let mut session = Session::load_or_new(&session_path)?;
            session.reset();
            session.save(&session_path)?;
            println!("Session {} reset.", session.id);
            Ok(())
        }
        Commands::Config { path } => {
            match &cli.config {
                Some(explicit) => println!("Config file: {}", explicit.display()),
                None => println!("Config file: {}", config::config_path()?.display()),
            }
            if !path {
                println!();
                println!("{}", toml::to_string_pretty(&config).context("Failed to render config")?);
            }
            Ok(())
        }
    }
}

fn controller(config: &Config) -> Result<PipelineController> {
    let service = crate::agent::build_service(&config.generation)?;
    Ok(PipelineController::new(materials::standard_graph(&config.pipeline), service)
        .with_invalidation(config.pipeline.invalidation))
}

fn load_session(path: &Path) -> Result<Session> {
    Session::load_or_new(path).with_context(|| format!("Failed to load session {:?}", path))
}

async fn ingest(config: &Config, session_path: &Path, file: &Path) -> Result<()> {
    let controller = controller(config)?;
    let converter = DefaultConverter::new(CommandConverter::new(config.ingest.converter_command.clone()));
    let tokenizer = document::tokenizer::from_config(&config.ingest)?;
    let ingestor = DocumentIngestor::new(Arc::new(converter), tokenizer, controller.service().clone())
        .with_budget(TokenBudget::from(&config.ingest));

    let doc = ingestor.ingest_file(file).await?;
    let mut session = load_session(session_path)?;
    controller.set_document(&mut session, doc.text);
    session.save(session_path)?;

    if doc.compressed {
        println!("Ingested {:?} ({} tokens, compressed).", file, doc.original_tokens);
    } else {
        println!("Ingested {:?} ({} tokens).", file, doc.original_tokens);
    }
    Ok(())
}

async fn transcribe(config: &Config, session_path: &Path, audio: &Path) -> Result<()> {
    let controller = controller(config)?;
    let recognizer = voice::build_recognizer(&config.transcription);
    let transcriber = Transcriber::from_config(recognizer, &config.transcription);

    let text = transcriber.transcribe_file(audio, &config.synthesis.ffmpeg).await?;
    if text.is_empty() {
        anyhow::bail!("No speech recognized in {:?}", audio);
    }

    let mut session = load_session(session_path)?;
    controller.set_transcript(&mut session, text.as_str());
    session.save(session_path)?;
    println!("Transcript ({} words):\n\n{}", text.split_whitespace().count(), text);
    Ok(())
}

#[cfg(feature = "voice")]
async fn record(config: &Config, seconds: u64, out: &Path) -> Result<()> {
    use std::time::Duration;

    let mut handle = voice::start_microphone(&config.capture)?;
    println!("Recording for up to {}s, press Ctrl-C to stop...", seconds);

    let deadline = tokio::time::sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);
    let mut tick = tokio::time::interval(Duration::from_millis(100));
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => break,
            _ = tick.tick() => {
                handle.poll();
            }
        }
    }

    let out_path = out.to_path_buf();
    let buffer = tokio::task::spawn_blocking(move || handle.record_to_file(&out_path))
        .await
        .context("Recording task failed")??;
    println!("Saved {:.1}s of audio to {:?}", buffer.duration_secs(), out);
    Ok(())
}

fn answer(config: &Config, session_path: &Path, file: &Path) -> Result<()> {
    let controller = controller(config)?;
    let contents = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read answers from {:?}", file))?;
    let answers: Vec<String> = contents.lines().map(|l| l.trim().to_string()).collect();

    let mut session = load_session(session_path)?;
    controller.submit_answers(&mut session, &answers)?;
    session.save(session_path)?;
    println!("Stored {} answers.", answers.len());
    Ok(())
}

async fn run_stage(config: &Config, session_path: &Path, stage: &str) -> Result<()> {
    let stage: StageId = stage.parse()?;
    let controller = controller(config)?;
    let mut session = load_session(session_path)?;

    let rendered = {
        let artifact = controller.run_stage(stage, &mut session).await?;
        export::render(&artifact.value)
    };
    session.save(session_path)?;

    println!("{}", rendered);
    if stage == StageId::QuestionGeneration {
        println!("\nWrite one answer per line and run `recall-coach answer <file>`.");
    }
    Ok(())
}

async fn narrate(
    config: &Config,
    session_path: &Path,
    out: &Path,
    key: &str,
    voice: Option<String>,
    locale: Option<String>,
) -> Result<()> {
    let key: ArtifactKey = key.parse()?;
    let controller = controller(config)?;
    let mut session = load_session(session_path)?;

    let text = session
        .value(key)
        .and_then(|v| v.as_text())
        .map(str::to_string)
        .ok_or(crate::error::PipelineError::MissingDependency {
            stage: "audio_synthesis".to_string(),
            missing: vec![key],
        })?;

    let synthesizer = Arc::new(KokoroSynthesizer::from_config(&config.synthesis));
    let assembler = AudioSynthesisAssembler::from_config(synthesizer, &config.synthesis);
    let voice = voice.unwrap_or_else(|| config.synthesis.voice.clone());
    let locale = locale.unwrap_or_else(|| config.synthesis.locale.clone());

    match assembler
        .synthesize(&session.id.to_string(), &text, &voice, &locale, out)
        .await?
    {
        MergeOutcome::Merged { path, chunks } => {
            if should_attach(key) {
                controller.attach_audio(&mut session, path.clone());
                session.save(session_path)?;
            }
            println!("Wrote {} segments to {:?}", chunks, path);
        }
        MergeOutcome::NothingToMerge => println!("Nothing to merge: '{}' has no speakable text.", key),
    }
    Ok(())
}

/// Only narration audio is tracked in the session, where rewriting the
/// narration transcript invalidates it
fn should_attach(key: ArtifactKey) -> bool {
    key == ArtifactKey::NarrationTranscript
}

fn export_files(session_path: &Path, dir: &Path, key: Option<&str>) -> Result<()> {
    let session = load_session(session_path)?;
    let paths = match key {
        Some(key) => vec![export::export_artifact(&session, key.parse()?, dir)?],
        None => export::export_all(&session, dir)?,
    };
    if paths.is_empty() {
        println!("Nothing to export yet.");
    }
    for path in paths {
        println!("{}", path.display());
    }
    Ok(())
}

fn status(config: &Config, session_path: &Path) -> Result<()> {
    let controller = controller(config)?;
    let session = load_session(session_path)?;

    println!("Session {} (created {})", session.id, session.created_at.format("%Y-%m-%d %H:%M"));
    for key in [ArtifactKey::DocumentText, ArtifactKey::LearnerTranscript, ArtifactKey::Answers] {
        let state = if session.is_available(key) { "ready" } else { "-" };
        println!("  {:<22} {}", key.as_str(), state);
    }
    println!();
    for status in controller.status(&session) {
        let state = if status.complete {
            "done".to_string()
        } else if status.stale {
            "stale".to_string()
        } else if status.runnable() {
            "ready to run".to_string()
        } else {
            format!(
                "needs {}",
                status.missing.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(", ")
            )
        };
        println!("  {:<22} {}", status.stage.as_str(), state);
    }
    Ok(())
}
