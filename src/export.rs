//! Export of finished artifacts as downloadable files

use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::orchestrator::session::{ArtifactKey, ArtifactValue, Session};
use crate::types::render_qna_markdown;

/// Artifacts that have an export file, with the file name
pub const EXPORTS: &[(ArtifactKey, &str)] = &[
    (ArtifactKey::GapAnalysis, "gap_analysis.md"),
    (ArtifactKey::Answers, "qna.md"),
    (ArtifactKey::Evaluation, "evaluation.md"),
    (ArtifactKey::NarrationTranscript, "narration_transcript.txt"),
    (ArtifactKey::SummaryNotes, "summary_notes.md"),
    (ArtifactKey::KeyVocabulary, "key_vocabulary.md"),
    (ArtifactKey::SupplementaryQa, "supplementary_qa.md"),
];

pub fn file_name(key: ArtifactKey) -> Option<&'static str> {
    EXPORTS.iter().find(|(k, _)| *k == key).map(|(_, name)| *name)
}

/// File contents for one artifact value
pub fn render(value: &ArtifactValue) -> String {
    match value {
        ArtifactValue::QaPairs(items) => render_qna_markdown(items),
        ArtifactValue::Evaluation(report) => report.body.clone(),
        other => other.as_prompt_text(),
    }
}

/// Write one artifact into `dir`
pub fn export_artifact(session: &Session, key: ArtifactKey, dir: &Path) -> Result<PathBuf> {
    let name = file_name(key)
        .ok_or_else(|| PipelineError::InvalidInput(format!("'{}' has no export file", key)))?;
    let value = session.value(key).ok_or_else(|| PipelineError::MissingDependency {
        stage: "export".to_string(),
        missing: vec![key],
    })?;

    std::fs::create_dir_all(dir)?;
    let path = dir.join(name);
    std::fs::write(&path, render(value))?;
    info!("Exported {} to {:?}", key, path);
    Ok(path)
}

/// Write every exportable artifact the session currently holds
pub fn export_all(session: &Session, dir: &Path) -> Result<Vec<PathBuf>> {
    EXPORTS
        .iter()
        .filter(|(key, _)| session.is_available(*key))
        .map(|(key, _)| export_artifact(session, *key, dir))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::QaItem;

    #[test]
    fn test_export_qna_markdown() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new();
        session.put(
            ArtifactKey::Answers,
            ArtifactValue::QaPairs(vec![QaItem::new("What is mitosis?", "Cell division.")]),
            "answer_submission",
        );

        let path = export_artifact(&session, ArtifactKey::Answers, dir.path()).unwrap();
        assert_eq!(path.file_name().unwrap(), "qna.md");
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.starts_with("### Q1: What is mitosis?\n**Answer:** Cell division."));
    }

    #[test]
    fn test_export_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let err = export_artifact(&Session::new(), ArtifactKey::SummaryNotes, dir.path()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MissingDependency { ref missing, .. } if missing == &[ArtifactKey::SummaryNotes]
        ));
    }

    #[test]
    fn test_export_all_skips_absent() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new();
        session.put(ArtifactKey::GapAnalysis, ArtifactValue::Text("## Gaps".into()), "gap_analysis");
        session.put(ArtifactKey::NarrationTranscript, ArtifactValue::Text("Hello.".into()), "narration_transcript");

        let paths = export_all(&session, dir.path()).unwrap();
        assert_eq!(paths.len(), 2);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("narration_transcript.txt")).unwrap(),
            "Hello."
        );
    }

    #[test]
    fn test_document_has_no_export() {
        assert!(file_name(ArtifactKey::DocumentText).is_none());
    }
}
