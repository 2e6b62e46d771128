//! Recall Coach - staged learning pipeline
//!
//! A learner explains a topic aloud, supplies a reference document, and is
//! taken through gap analysis, probing questions, answer evaluation and
//! personalized revision material (notes, vocabulary, practice Q&A and a
//! narrated lesson).
//!
//! # Example
//!
//! ```ignore
//! use recall_coach::{materials, Config, PipelineController, Session, StageId};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let service = recall_coach::agent::build_service(&config.generation)?;
//!     let controller = PipelineController::new(materials::standard_graph(&config.pipeline), service);
//!
//!     let mut session = Session::new();
//!     controller.set_document(&mut session, "Cells divide by mitosis...");
//!     controller.set_transcript(&mut session, "So cells kind of split...");
//!     let gaps = controller.run_stage(StageId::GapAnalysis, &mut session).await?;
//!     println!("{}", gaps.value.as_prompt_text());
//!     Ok(())
//! }
//! ```

// Core modules
pub mod error;
pub mod types;
pub mod config;
pub mod extract;
pub mod agent;
pub mod orchestrator;
pub mod materials;

// Collaborators
pub mod document;
pub mod voice;
pub mod export;
pub mod cli;

pub use config::Config;
pub use error::{PipelineError, Result};
pub use orchestrator::{
    Artifact, ArtifactKey, ArtifactValue, PipelineController, Session, StageGraph, StageId,
};
pub use types::{CategoryScore, EvaluationReport, QaItem};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Get the library info
pub fn info() -> String {
    format!("{} v{} - staged learning pipeline", NAME, VERSION)
}
