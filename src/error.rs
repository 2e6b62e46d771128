//! Error taxonomy for the learning pipeline
//!
//! Every failure a learner can see carries enough context (stage id plus
//! missing keys or raw backend text) to decide between retrying, fixing
//! the input, or abandoning the run.

use thiserror::Error;

use crate::orchestrator::session::ArtifactKey;

/// Pipeline error
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A stage was triggered before its upstream artifacts were produced
    #[error("stage '{stage}' is missing required artifacts: {}", join_keys(.missing))]
    MissingDependency {
        stage: String,
        missing: Vec<ArtifactKey>,
    },

    /// The normalized document exceeds the hard token ceiling
    #[error("document too large: {0} tokens (reduce the document and try again)")]
    DocumentTooLarge(usize),

    /// Generative output could not be recovered into the expected shape
    #[error("stage '{stage}' produced no usable output; regenerate to try again")]
    ExtractionEmpty { stage: String },

    /// A backend answered with an error
    #[error("backend error in '{stage}': {message}")]
    Backend { stage: String, message: String },

    /// A backend could not be reached at all
    #[error("backend '{backend}' unavailable{}: {message}", in_stage(.stage))]
    BackendUnavailable {
        backend: String,
        message: String,
        /// Set once the failure crosses a stage boundary
        stage: Option<String>,
    },

    /// Any chunk failure discards the whole transcription attempt
    #[error("transcription aborted: {0}")]
    TranscriptionAborted(String),

    #[error("unsupported document format: '{0}' (expected pdf, md or docx)")]
    UnsupportedDocument(String),

    #[error("unknown stage: {0}")]
    UnknownStage(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("audio error: {0}")]
    Audio(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

fn join_keys(keys: &[ArtifactKey]) -> String {
    keys.iter()
        .map(|k| k.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn in_stage(stage: &Option<String>) -> String {
    stage.as_ref().map(|s| format!(" in '{}'", s)).unwrap_or_default()
}

impl PipelineError {
    /// Wrap a backend failure for the given stage, keeping the raw text
    pub fn backend(stage: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Backend {
            stage: stage.into(),
            message: err.to_string(),
        }
    }

    pub fn unavailable(backend: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::BackendUnavailable {
            backend: backend.into(),
            message: err.to_string(),
            stage: None,
        }
    }

    /// Attribute a failure raised below a stage boundary to that stage
    pub fn with_stage(self, stage: &str) -> Self {
        match self {
            Self::Backend { message, .. } => Self::backend(stage, message),
            Self::ExtractionEmpty { .. } => Self::ExtractionEmpty { stage: stage.to_string() },
            Self::BackendUnavailable { backend, message, .. } => Self::BackendUnavailable {
                backend,
                message,
                stage: Some(stage.to_string()),
            },
            other => other,
        }
    }

    /// Stage id the failure belongs to, when there is one
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::MissingDependency { stage, .. }
            | Self::ExtractionEmpty { stage }
            | Self::Backend { stage, .. } => Some(stage),
            Self::BackendUnavailable { stage, .. } => stage.as_deref(),
            _ => None,
        }
    }

    /// Whether triggering the same operation again may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ExtractionEmpty { .. }
                | Self::Backend { .. }
                | Self::BackendUnavailable { .. }
                | Self::TranscriptionAborted(_)
        )
    }
}

impl From<hound::Error> for PipelineError {
    fn from(err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(io) => Self::Io(io),
            other => Self::Audio(other.to_string()),
        }
    }
}
