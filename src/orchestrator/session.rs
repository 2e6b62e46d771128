//! Session aggregate
//!
//! One learner run: every artifact produced so far, keyed by
//! [`ArtifactKey`], at most one current value per key. The session is
//! passed by `&mut` into every stage call, so there is a single writer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::types::{EvaluationReport, QaItem};

/// Names of everything a session can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKey {
    DocumentText,
    LearnerTranscript,
    GapAnalysis,
    Questions,
    Answers,
    Evaluation,
    NarrationTranscript,
    SummaryNotes,
    KeyVocabulary,
    SupplementaryQa,
    NarrationAudio,
}

impl ArtifactKey {
    pub const ALL: [ArtifactKey; 11] = [
        ArtifactKey::DocumentText,
        ArtifactKey::LearnerTranscript,
        ArtifactKey::GapAnalysis,
        ArtifactKey::Questions,
        ArtifactKey::Answers,
        ArtifactKey::Evaluation,
        ArtifactKey::NarrationTranscript,
        ArtifactKey::SummaryNotes,
        ArtifactKey::KeyVocabulary,
        ArtifactKey::SupplementaryQa,
        ArtifactKey::NarrationAudio,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKey::DocumentText => "document_text",
            ArtifactKey::LearnerTranscript => "learner_transcript",
            ArtifactKey::GapAnalysis => "gap_analysis",
            ArtifactKey::Questions => "questions",
            ArtifactKey::Answers => "answers",
            ArtifactKey::Evaluation => "evaluation",
            ArtifactKey::NarrationTranscript => "narration_transcript",
            ArtifactKey::SummaryNotes => "summary_notes",
            ArtifactKey::KeyVocabulary => "key_vocabulary",
            ArtifactKey::SupplementaryQa => "supplementary_qa",
            ArtifactKey::NarrationAudio => "narration_audio",
        }
    }
}

impl std::fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactKey {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        ArtifactKey::ALL
            .iter()
            .copied()
            .find(|k| k.as_str() == normalized)
            .ok_or_else(|| PipelineError::InvalidInput(format!("unknown artifact key: {}", s)))
    }
}

/// Typed artifact payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ArtifactValue {
    Text(String),
    List(Vec<String>),
    QaPairs(Vec<QaItem>),
    Evaluation(EvaluationReport),
    AudioFile(PathBuf),
}

impl ArtifactValue {
    /// Render the value as prompt-ready text
    pub fn as_prompt_text(&self) -> String {
        match self {
            ArtifactValue::Text(text) => text.clone(),
            ArtifactValue::List(items) => items
                .iter()
                .enumerate()
                .map(|(i, item)| format!("{}. {}", i + 1, item))
                .collect::<Vec<_>>()
                .join("\n"),
            ArtifactValue::QaPairs(items) => crate::types::render_qna_for_prompt(items),
            ArtifactValue::Evaluation(report) => report.body.clone(),
            ArtifactValue::AudioFile(path) => path.display().to_string(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ArtifactValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            ArtifactValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_qa_pairs(&self) -> Option<&[QaItem]> {
        match self {
            ArtifactValue::QaPairs(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_evaluation(&self) -> Option<&EvaluationReport> {
        match self {
            ArtifactValue::Evaluation(report) => Some(report),
            _ => None,
        }
    }
}

/// A stored value plus provenance and validity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub value: ArtifactValue,
    /// Stage id (or input source) that produced the value
    pub produced_by: String,
    pub valid: bool,
    pub produced_at: DateTime<Utc>,
}

/// Everything produced during one learner run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    artifacts: BTreeMap<ArtifactKey, Artifact>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            artifacts: BTreeMap::new(),
        }
    }

    /// Current artifact for a key, valid or not
    pub fn artifact(&self, key: ArtifactKey) -> Option<&Artifact> {
        self.artifacts.get(&key)
    }

    /// Current value for a key, only if it is still valid
    pub fn value(&self, key: ArtifactKey) -> Option<&ArtifactValue> {
        self.artifacts
            .get(&key)
            .filter(|a| a.valid)
            .map(|a| &a.value)
    }

    pub fn is_available(&self, key: ArtifactKey) -> bool {
        self.value(key).is_some()
    }

    /// Keys from `required` that are absent or invalid, in the given order
    pub fn missing(&self, required: &[ArtifactKey]) -> Vec<ArtifactKey> {
        required
            .iter()
            .copied()
            .filter(|k| !self.is_available(*k))
            .collect()
    }

    /// Store a value, replacing any prior one for the key
    pub fn put(&mut self, key: ArtifactKey, value: ArtifactValue, produced_by: impl Into<String>) {
        let produced_by = produced_by.into();
        debug!("Session {}: storing {} (from {})", self.id, key, produced_by);
        self.artifacts.insert(
            key,
            Artifact {
                value,
                produced_by,
                valid: true,
                produced_at: Utc::now(),
            },
        );
    }

    /// Mark artifacts invalid without discarding them. Returns the keys
    /// that actually changed state.
    pub fn invalidate(&mut self, keys: &[ArtifactKey]) -> Vec<ArtifactKey> {
        let mut changed = Vec::new();
        for key in keys {
            if let Some(artifact) = self.artifacts.get_mut(key) {
                if artifact.valid {
                    artifact.valid = false;
                    changed.push(*key);
                }
            }
        }
        changed
    }

    pub fn remove(&mut self, key: ArtifactKey) -> Option<Artifact> {
        self.artifacts.remove(&key)
    }

    /// Stored keys in canonical order
    pub fn keys(&self) -> Vec<ArtifactKey> {
        self.artifacts.keys().copied().collect()
    }

    /// Generated questions, if present and valid
    pub fn questions(&self) -> Option<&[String]> {
        self.value(ArtifactKey::Questions).and_then(|v| v.as_list())
    }

    /// Pair each generated question with its answer.
    ///
    /// The answer count must match the question count; missing answers
    /// should be passed as empty strings.
    pub fn pair_answers(&self, answers: &[String]) -> Result<Vec<QaItem>> {
        let questions = self.questions().ok_or_else(|| PipelineError::MissingDependency {
            stage: "answer_submission".to_string(),
            missing: vec![ArtifactKey::Questions],
        })?;

        if questions.len() != answers.len() {
            return Err(PipelineError::InvalidInput(format!(
                "expected {} answers, got {}",
                questions.len(),
                answers.len()
            )));
        }

        Ok(questions
            .iter()
            .zip(answers)
            .map(|(q, a)| QaItem::new(q.clone(), a.trim()))
            .collect())
    }

    /// Discard every artifact, keeping the session identity
    pub fn reset(&mut self) {
        info!("Resetting session {} ({} artifacts)", self.id, self.artifacts.len());
        self.artifacts.clear();
    }

    /// Snapshot to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| PipelineError::InvalidInput(format!("session serialization failed: {}", e)))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Restore from a JSON snapshot
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| PipelineError::InvalidInput(format!("corrupt session file {:?}: {}", path, e)))
    }

    /// Load the snapshot if it exists, otherwise start a new session
    pub fn load_or_new(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_key_round_trip_names() {
        for key in ArtifactKey::ALL {
            assert_eq!(key.as_str().parse::<ArtifactKey>().unwrap(), key);
        }
        assert_eq!("Key-Vocabulary".parse::<ArtifactKey>().unwrap(), ArtifactKey::KeyVocabulary);
        assert!("nope".parse::<ArtifactKey>().is_err());
    }

    #[test]
    fn test_put_overwrites() {
        let mut session = Session::new();
        session.put(ArtifactKey::GapAnalysis, ArtifactValue::Text("first".into()), "gap_analysis");
        session.put(ArtifactKey::GapAnalysis, ArtifactValue::Text("second".into()), "gap_analysis");
        assert_eq!(session.keys(), vec![ArtifactKey::GapAnalysis]);
        assert_eq!(
            session.value(ArtifactKey::GapAnalysis).and_then(|v| v.as_text()),
            Some("second")
        );
    }

    #[test]
    fn test_invalid_counts_as_missing() {
        let mut session = Session::new();
        session.put(ArtifactKey::DocumentText, ArtifactValue::Text("doc".into()), "ingest");
        session.put(ArtifactKey::LearnerTranscript, ArtifactValue::Text("me".into()), "transcribe");

        let changed = session.invalidate(&[ArtifactKey::LearnerTranscript, ArtifactKey::GapAnalysis]);
        assert_eq!(changed, vec![ArtifactKey::LearnerTranscript]);

        let missing = session.missing(&[ArtifactKey::DocumentText, ArtifactKey::LearnerTranscript]);
        assert_eq!(missing, vec![ArtifactKey::LearnerTranscript]);
        assert!(session.artifact(ArtifactKey::LearnerTranscript).is_some());
    }

    #[test]
    fn test_pair_answers_requires_matching_count() {
        let mut session = Session::new();
        assert!(matches!(
            session.pair_answers(&[]),
            Err(PipelineError::MissingDependency { .. })
        ));

        session.put(
            ArtifactKey::Questions,
            ArtifactValue::List(vec!["Q1?".into(), "Q2?".into()]),
            "question_generation",
        );
        assert!(matches!(
            session.pair_answers(&["only one".into()]),
            Err(PipelineError::InvalidInput(_))
        ));

        let pairs = session.pair_answers(&[" a1 ".into(), String::new()]).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[0], QaItem::new("Q1?", "a1"));
        assert!(!pairs[1].is_answered());
    }

    #[test]
    fn test_reset_keeps_identity() {
        let mut session = Session::new();
        let id = session.id;
        session.put(ArtifactKey::DocumentText, ArtifactValue::Text("doc".into()), "ingest");
        session.reset();
        assert!(session.keys().is_empty());
        assert_eq!(session.id, id);
    }

    #[test]
    fn test_save_and_load_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        let mut session = Session::new();
        session.put(
            ArtifactKey::Answers,
            ArtifactValue::QaPairs(vec![QaItem::new("Why?", "Because.")]),
            "answer_submission",
        );
        session.invalidate(&[ArtifactKey::Answers]);
        session.save(&path).unwrap();

        let restored = Session::load(&path).unwrap();
        assert_eq!(restored.id, session.id);
        let artifact = restored.artifact(ArtifactKey::Answers).unwrap();
        assert!(!artifact.valid);
        assert_eq!(artifact.value.as_qa_pairs().unwrap()[0].answer, "Because.");
    }

    #[test]
    fn test_load_or_new_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::load_or_new(&dir.path().join("absent.json")).unwrap();
        assert!(session.keys().is_empty());
    }

    #[test]
    fn test_prompt_text_rendering() {
        let list = ArtifactValue::List(vec!["a".into(), "b".into()]);
        assert_eq!(list.as_prompt_text(), "1. a\n2. b");
        let qa = ArtifactValue::QaPairs(vec![QaItem::new("Q", "A")]);
        assert_eq!(qa.as_prompt_text(), "Q1. Q\nAns: A\n");
    }
}
