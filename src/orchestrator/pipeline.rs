//! Stage graph and pipeline controller
//!
//! The topology is fixed: two root inputs (document text and the learner's
//! transcript), one question/answer round, an evaluation, and four
//! revision materials. Each stage is a transform from a bound set of
//! upstream artifacts to exactly one new artifact. Stages run one at a
//! time, only when triggered, and only when every required input is
//! present and valid.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::agent::generation::GenerationService;
use crate::config::InvalidationPolicy;
use crate::error::{PipelineError, Result};
use crate::orchestrator::session::{Artifact, ArtifactKey, ArtifactValue, Session};

/// Generative stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    GapAnalysis,
    QuestionGeneration,
    Evaluation,
    NarrationTranscript,
    SummaryNotes,
    KeyVocabulary,
    SupplementaryQa,
}

impl StageId {
    /// All stages in pipeline order
    pub const ALL: [StageId; 7] = [
        StageId::GapAnalysis,
        StageId::QuestionGeneration,
        StageId::Evaluation,
        StageId::NarrationTranscript,
        StageId::SummaryNotes,
        StageId::KeyVocabulary,
        StageId::SupplementaryQa,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::GapAnalysis => "gap_analysis",
            StageId::QuestionGeneration => "question_generation",
            StageId::Evaluation => "evaluation",
            StageId::NarrationTranscript => "narration_transcript",
            StageId::SummaryNotes => "summary_notes",
            StageId::KeyVocabulary => "key_vocabulary",
            StageId::SupplementaryQa => "supplementary_qa",
        }
    }

    /// Artifact the stage writes
    pub fn produces(&self) -> ArtifactKey {
        match self {
            StageId::GapAnalysis => ArtifactKey::GapAnalysis,
            StageId::QuestionGeneration => ArtifactKey::Questions,
            StageId::Evaluation => ArtifactKey::Evaluation,
            StageId::NarrationTranscript => ArtifactKey::NarrationTranscript,
            StageId::SummaryNotes => ArtifactKey::SummaryNotes,
            StageId::KeyVocabulary => ArtifactKey::KeyVocabulary,
            StageId::SupplementaryQa => ArtifactKey::SupplementaryQa,
        }
    }

    /// Artifacts that must be present and valid, in binding order
    pub fn requires(&self) -> &'static [ArtifactKey] {
        use ArtifactKey::*;
        match self {
            StageId::GapAnalysis => &[DocumentText, LearnerTranscript],
            StageId::QuestionGeneration => &[DocumentText, LearnerTranscript, GapAnalysis],
            StageId::Evaluation => &[DocumentText, LearnerTranscript, GapAnalysis, Answers],
            StageId::NarrationTranscript
            | StageId::SummaryNotes
            | StageId::KeyVocabulary
            | StageId::SupplementaryQa => {
                &[Evaluation, Answers, GapAnalysis, DocumentText, LearnerTranscript]
            }
        }
    }
}

impl std::fmt::Display for StageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageId {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        let aliases: &[(&str, StageId)] = &[
            ("gap", StageId::GapAnalysis),
            ("questions", StageId::QuestionGeneration),
            ("narration", StageId::NarrationTranscript),
            ("summary", StageId::SummaryNotes),
            ("vocab", StageId::KeyVocabulary),
            ("vocabulary", StageId::KeyVocabulary),
            ("supplementary", StageId::SupplementaryQa),
        ];
        StageId::ALL
            .iter()
            .copied()
            .find(|id| id.as_str() == normalized)
            .or_else(|| aliases.iter().find(|(a, _)| *a == normalized).map(|(_, id)| *id))
            .ok_or_else(|| PipelineError::UnknownStage(s.to_string()))
    }
}

/// Artifacts derived outside the generative stages, and what they derive from
pub const DERIVED_EDGES: &[(ArtifactKey, ArtifactKey)] = &[
    // Submitted answers are paired with the generated questions
    (ArtifactKey::Questions, ArtifactKey::Answers),
    // Narration audio is synthesized from the narration transcript
    (ArtifactKey::NarrationTranscript, ArtifactKey::NarrationAudio),
];

/// Upstream values bound for one stage invocation
#[derive(Debug, Clone, Default)]
pub struct StageInputs {
    values: BTreeMap<ArtifactKey, ArtifactValue>,
}

impl StageInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: ArtifactKey, value: ArtifactValue) -> Self {
        self.values.insert(key, value);
        self
    }

    pub fn get(&self, key: ArtifactKey) -> Option<&ArtifactValue> {
        self.values.get(&key)
    }

    /// Prompt-ready text for a bound key
    pub fn text(&self, key: ArtifactKey) -> Result<String> {
        self.values
            .get(&key)
            .map(|v| v.as_prompt_text())
            .ok_or_else(|| PipelineError::InvalidInput(format!("input '{}' was not bound", key)))
    }

    pub fn keys(&self) -> Vec<ArtifactKey> {
        self.values.keys().copied().collect()
    }
}

/// Generation function for one stage
#[async_trait]
pub trait StageHandler: Send + Sync {
    async fn run(&self, inputs: &StageInputs, service: &dyn GenerationService) -> Result<ArtifactValue>;
}

/// Stage id, inputs and the function that produces its artifact
#[derive(Clone)]
pub struct StageDefinition {
    pub id: StageId,
    pub requires: Vec<ArtifactKey>,
    pub produces: ArtifactKey,
    pub handler: Arc<dyn StageHandler>,
}

impl std::fmt::Debug for StageDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageDefinition")
            .field("id", &self.id)
            .field("requires", &self.requires)
            .field("produces", &self.produces)
            .finish()
    }
}

impl StageDefinition {
    pub fn new(id: StageId, handler: Arc<dyn StageHandler>) -> Self {
        Self {
            id,
            requires: id.requires().to_vec(),
            produces: id.produces(),
            handler,
        }
    }
}

/// The fixed set of stages
#[derive(Debug, Clone, Default)]
pub struct StageGraph {
    stages: HashMap<StageId, StageDefinition>,
}

impl StageGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a stage
    pub fn with_stage(mut self, definition: StageDefinition) -> Self {
        self.stages.insert(definition.id, definition);
        self
    }

    pub fn stage(&self, id: StageId) -> Option<&StageDefinition> {
        self.stages.get(&id)
    }

    /// Registered stages in pipeline order
    pub fn stages(&self) -> Vec<&StageDefinition> {
        StageId::ALL.iter().filter_map(|id| self.stages.get(id)).collect()
    }

    /// Keys that directly consume `key`
    fn direct_dependents(&self, key: ArtifactKey) -> Vec<ArtifactKey> {
        let mut out: Vec<ArtifactKey> = self
            .stages
            .values()
            .filter(|s| s.requires.contains(&key))
            .map(|s| s.produces)
            .collect();
        out.extend(
            DERIVED_EDGES
                .iter()
                .filter(|(from, _)| *from == key)
                .map(|(_, to)| *to),
        );
        out
    }

    /// Every artifact that transitively depends on `key`, in canonical order
    pub fn downstream_of(&self, key: ArtifactKey) -> Vec<ArtifactKey> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<ArtifactKey> = self.direct_dependents(key).into();
        while let Some(next) = queue.pop_front() {
            if next != key && seen.insert(next) {
                queue.extend(self.direct_dependents(next));
            }
        }
        seen.into_iter().collect()
    }
}

/// Where a stage stands for a given session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageStatus {
    pub stage: StageId,
    /// Output exists and is valid
    pub complete: bool,
    /// Output exists but an upstream artifact changed since
    pub stale: bool,
    /// Required inputs not yet available
    pub missing: Vec<ArtifactKey>,
}

impl StageStatus {
    pub fn runnable(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Owns the stage graph and the generation backend; drives a [`Session`]
pub struct PipelineController {
    graph: StageGraph,
    service: Arc<dyn GenerationService>,
    invalidation: InvalidationPolicy,
}

impl PipelineController {
    pub fn new(graph: StageGraph, service: Arc<dyn GenerationService>) -> Self {
        Self {
            graph,
            service,
            invalidation: InvalidationPolicy::default(),
        }
    }

    pub fn with_invalidation(mut self, policy: InvalidationPolicy) -> Self {
        self.invalidation = policy;
        self
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    pub fn service(&self) -> &Arc<dyn GenerationService> {
        &self.service
    }

    /// Run one stage against the session.
    ///
    /// Fails with `MissingDependency` naming every absent or invalid input.
    /// On success the stage's artifact is replaced (never appended). On
    /// failure the error propagates as-is and nothing is written.
    pub async fn run_stage<'s>(&self, stage: StageId, session: &'s mut Session) -> Result<&'s Artifact> {
        let definition = self
            .graph
            .stage(stage)
            .ok_or_else(|| PipelineError::UnknownStage(stage.to_string()))?;

        let missing = session.missing(&definition.requires);
        if !missing.is_empty() {
            warn!("Stage '{}' blocked, missing: {:?}", stage, missing);
            return Err(PipelineError::MissingDependency {
                stage: stage.to_string(),
                missing,
            });
        }

        let mut inputs = StageInputs::new();
        for key in &definition.requires {
            if let Some(value) = session.value(*key) {
                inputs = inputs.with(*key, value.clone());
            }
        }

        info!("Running stage '{}' with {}", stage, self.service.backend_name());
        let start = std::time::Instant::now();
        let value = definition
            .handler
            .run(&inputs, self.service.as_ref())
            .await
            .map_err(|e| e.with_stage(stage.as_str()))?;
        debug!("Stage '{}' finished in {:.2}s", stage, start.elapsed().as_secs_f64());

        self.store(session, definition.produces, value, stage.as_str());
        session
            .artifact(definition.produces)
            .ok_or_else(|| PipelineError::InvalidInput(format!("stage '{}' output was not stored", stage)))
    }

    /// Store the reference document text
    pub fn set_document(&self, session: &mut Session, text: impl Into<String>) {
        self.store(session, ArtifactKey::DocumentText, ArtifactValue::Text(text.into()), "document_ingest");
    }

    /// Store the learner's transcribed self-explanation
    pub fn set_transcript(&self, session: &mut Session, text: impl Into<String>) {
        self.store(session, ArtifactKey::LearnerTranscript, ArtifactValue::Text(text.into()), "transcription");
    }

    /// Pair answers with the generated questions and store them
    pub fn submit_answers(&self, session: &mut Session, answers: &[String]) -> Result<()> {
        let pairs = session.pair_answers(answers)?;
        self.store(session, ArtifactKey::Answers, ArtifactValue::QaPairs(pairs), "answer_submission");
        Ok(())
    }

    /// Record the path of synthesized narration audio
    pub fn attach_audio(&self, session: &mut Session, path: PathBuf) {
        self.store(session, ArtifactKey::NarrationAudio, ArtifactValue::AudioFile(path), "audio_synthesis");
    }

    /// Gating status of every registered stage
    pub fn status(&self, session: &Session) -> Vec<StageStatus> {
        self.graph
            .stages()
            .into_iter()
            .map(|def| {
                let artifact = session.artifact(def.produces);
                StageStatus {
                    stage: def.id,
                    complete: artifact.map(|a| a.valid).unwrap_or(false),
                    stale: artifact.map(|a| !a.valid).unwrap_or(false),
                    missing: session.missing(&def.requires),
                }
            })
            .collect()
    }

    fn store(&self, session: &mut Session, key: ArtifactKey, value: ArtifactValue, produced_by: &str) {
        session.put(key, value, produced_by);
        if self.invalidation == InvalidationPolicy::Transitive {
            let downstream = self.graph.downstream_of(key);
            let changed = session.invalidate(&downstream);
            if !changed.is_empty() {
                info!("Rewriting '{}' invalidated: {:?}", key, changed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::generation::{PromptTemplate, ScriptedGenerationService, Variables};

    /// Echoes the bound keys through the generation service
    struct EchoHandler;

    #[async_trait]
    impl StageHandler for EchoHandler {
        async fn run(&self, inputs: &StageInputs, service: &dyn GenerationService) -> Result<ArtifactValue> {
            let template = PromptTemplate::new_static("echo", "{keys}");
            let keys = inputs.keys().iter().map(|k| k.as_str()).collect::<Vec<_>>().join(",");
            let vars = Variables::new().with("keys", keys);
            Ok(ArtifactValue::Text(service.generate(&template, &vars).await?))
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl StageHandler for FailingHandler {
        async fn run(&self, _inputs: &StageInputs, _service: &dyn GenerationService) -> Result<ArtifactValue> {
            Err(PipelineError::backend("generation", "HTTP 500: boom"))
        }
    }

    /// Backend that cannot be reached
    struct OfflineService;

    #[async_trait]
    impl GenerationService for OfflineService {
        async fn generate(&self, _template: &PromptTemplate, _vars: &Variables) -> Result<String> {
            Err(PipelineError::unavailable("ollama", "connection refused"))
        }

        fn backend_name(&self) -> &str {
            "ollama"
        }
    }

    fn echo_graph() -> StageGraph {
        StageId::ALL.iter().fold(StageGraph::new(), |graph, id| {
            graph.with_stage(StageDefinition::new(*id, Arc::new(EchoHandler)))
        })
    }

    fn controller() -> PipelineController {
        let service = Arc::new(ScriptedGenerationService::new().respond("echo", "out"));
        PipelineController::new(echo_graph(), service)
    }

    #[test]
    fn test_stage_id_parsing() {
        for id in StageId::ALL {
            assert_eq!(id.as_str().parse::<StageId>().unwrap(), id);
        }
        assert_eq!("vocab".parse::<StageId>().unwrap(), StageId::KeyVocabulary);
        assert!(matches!("bogus".parse::<StageId>(), Err(PipelineError::UnknownStage(_))));
    }

    #[test]
    fn test_downstream_of_document_covers_everything_generated() {
        let graph = echo_graph();
        let downstream = graph.downstream_of(ArtifactKey::DocumentText);
        for key in [
            ArtifactKey::GapAnalysis,
            ArtifactKey::Questions,
            ArtifactKey::Answers,
            ArtifactKey::Evaluation,
            ArtifactKey::NarrationTranscript,
            ArtifactKey::NarrationAudio,
            ArtifactKey::SupplementaryQa,
        ] {
            assert!(downstream.contains(&key), "missing {:?}", key);
        }
        assert!(!downstream.contains(&ArtifactKey::DocumentText));
        assert!(!downstream.contains(&ArtifactKey::LearnerTranscript));
    }

    #[test]
    fn test_downstream_of_leaf_is_empty() {
        let graph = echo_graph();
        assert!(graph.downstream_of(ArtifactKey::KeyVocabulary).is_empty());
        assert_eq!(
            graph.downstream_of(ArtifactKey::NarrationTranscript),
            vec![ArtifactKey::NarrationAudio]
        );
    }

    #[tokio::test]
    async fn test_run_stage_missing_dependency() {
        let controller = controller();
        let mut session = Session::new();
        controller.set_document(&mut session, "doc");

        let err = controller
            .run_stage(StageId::GapAnalysis, &mut session)
            .await
            .unwrap_err();
        match err {
            PipelineError::MissingDependency { stage, missing } => {
                assert_eq!(stage, "gap_analysis");
                assert_eq!(missing, vec![ArtifactKey::LearnerTranscript]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(session.artifact(ArtifactKey::GapAnalysis).is_none());
    }

    #[tokio::test]
    async fn test_run_stage_binds_required_inputs_only() {
        let service = Arc::new(ScriptedGenerationService::new().respond("echo", "gap"));
        let controller = PipelineController::new(echo_graph(), service.clone());
        let mut session = Session::new();
        controller.set_document(&mut session, "doc");
        controller.set_transcript(&mut session, "me");

        let artifact = controller.run_stage(StageId::GapAnalysis, &mut session).await.unwrap();
        assert_eq!(artifact.produced_by, "gap_analysis");
        assert_eq!(service.calls()[0].1, "document_text,learner_transcript");
    }

    #[tokio::test]
    async fn test_failure_leaves_target_unset_and_tags_stage() {
        let graph = echo_graph().with_stage(StageDefinition::new(StageId::GapAnalysis, Arc::new(FailingHandler)));
        let controller = PipelineController::new(graph, Arc::new(ScriptedGenerationService::new()));
        let mut session = Session::new();
        controller.set_document(&mut session, "doc");
        controller.set_transcript(&mut session, "me");

        let err = controller.run_stage(StageId::GapAnalysis, &mut session).await.unwrap_err();
        assert_eq!(err.stage(), Some("gap_analysis"));
        assert!(err.to_string().contains("HTTP 500: boom"));
        assert!(session.artifact(ArtifactKey::GapAnalysis).is_none());
    }

    #[tokio::test]
    async fn test_unreachable_backend_reports_stage() {
        let controller = PipelineController::new(echo_graph(), Arc::new(OfflineService));
        let mut session = Session::new();
        controller.set_document(&mut session, "doc");
        controller.set_transcript(&mut session, "me");

        let err = controller.run_stage(StageId::GapAnalysis, &mut session).await.unwrap_err();
        assert!(matches!(err, PipelineError::BackendUnavailable { .. }));
        assert_eq!(err.stage(), Some("gap_analysis"));
        assert!(err.to_string().contains("connection refused"));
        assert!(session.artifact(ArtifactKey::GapAnalysis).is_none());
    }

    #[tokio::test]
    async fn test_transitive_invalidation_on_rewrite() {
        let controller = controller();
        let mut session = Session::new();
        controller.set_document(&mut session, "doc");
        controller.set_transcript(&mut session, "me");
        controller.run_stage(StageId::GapAnalysis, &mut session).await.unwrap();
        controller.run_stage(StageId::QuestionGeneration, &mut session).await.unwrap();

        controller.set_transcript(&mut session, "me, again");

        let status = controller.status(&session);
        let gap = status.iter().find(|s| s.stage == StageId::GapAnalysis).unwrap();
        assert!(gap.stale);
        assert!(!gap.complete);

        let err = controller.run_stage(StageId::QuestionGeneration, &mut session).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::MissingDependency { ref missing, .. } if missing == &vec![ArtifactKey::GapAnalysis]
        ));
    }

    #[tokio::test]
    async fn test_invalidation_off_keeps_downstream() {
        let controller = controller().with_invalidation(InvalidationPolicy::Off);
        let mut session = Session::new();
        controller.set_document(&mut session, "doc");
        controller.set_transcript(&mut session, "me");
        controller.run_stage(StageId::GapAnalysis, &mut session).await.unwrap();

        controller.set_document(&mut session, "doc v2");
        assert!(session.is_available(ArtifactKey::GapAnalysis));
    }

    #[tokio::test]
    async fn test_unknown_stage_when_not_registered() {
        let controller = PipelineController::new(StageGraph::new(), Arc::new(ScriptedGenerationService::new()));
        let mut session = Session::new();
        assert!(matches!(
            controller.run_stage(StageId::SummaryNotes, &mut session).await,
            Err(PipelineError::UnknownStage(_))
        ));
    }
}
