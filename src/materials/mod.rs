//! Stage handlers
//!
//! One handler per generative stage. Each binds its upstream artifacts to
//! template variables, calls the generation service once, and recovers the
//! expected shape from the reply. A reply that yields nothing usable is
//! `ExtractionEmpty`; partially malformed list entries are dropped.

pub mod prompts;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::agent::generation::{GenerationService, PromptTemplate, Variables};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::extract;
use crate::orchestrator::pipeline::{StageDefinition, StageGraph, StageHandler, StageId, StageInputs};
use crate::orchestrator::session::{ArtifactKey, ArtifactValue};

/// Build the full stage graph with the standard handlers
pub fn standard_graph(config: &PipelineConfig) -> StageGraph {
    StageGraph::new()
        .with_stage(StageDefinition::new(StageId::GapAnalysis, Arc::new(GapAnalysis)))
        .with_stage(StageDefinition::new(
            StageId::QuestionGeneration,
            Arc::new(QuestionGeneration { count: config.question_count }),
        ))
        .with_stage(StageDefinition::new(StageId::Evaluation, Arc::new(Evaluation)))
        .with_stage(StageDefinition::new(StageId::NarrationTranscript, Arc::new(NarrationTranscript)))
        .with_stage(StageDefinition::new(StageId::SummaryNotes, Arc::new(SummaryNotes)))
        .with_stage(StageDefinition::new(StageId::KeyVocabulary, Arc::new(KeyVocabulary)))
        .with_stage(StageDefinition::new(
            StageId::SupplementaryQa,
            Arc::new(SupplementaryQa { count: config.supplementary_count }),
        ))
}

/// Template variable name for each artifact
fn variable_name(key: ArtifactKey) -> &'static str {
    match key {
        ArtifactKey::DocumentText => "document",
        ArtifactKey::LearnerTranscript => "transcript",
        ArtifactKey::GapAnalysis => "gap_analysis",
        ArtifactKey::Answers => "qna",
        ArtifactKey::Evaluation => "evaluation",
        other => other.as_str(),
    }
}

/// Bind every input to its variable name
fn bind(inputs: &StageInputs) -> Result<Variables> {
    let mut vars = Variables::new();
    for key in inputs.keys() {
        vars.set(variable_name(key), inputs.text(key)?);
    }
    Ok(vars)
}

async fn generate(
    service: &dyn GenerationService,
    template: &PromptTemplate,
    vars: &Variables,
) -> Result<String> {
    let output = service.generate(template, vars).await?;
    debug!("'{}' returned {} chars", template.name, output.len());
    Ok(output)
}

fn non_empty(text: String, stage: StageId) -> Result<String> {
    if text.trim().is_empty() {
        Err(PipelineError::ExtractionEmpty { stage: stage.to_string() })
    } else {
        Ok(text)
    }
}

/// Mismatches between the reference document and the learner's explanation
pub struct GapAnalysis;

#[async_trait]
impl StageHandler for GapAnalysis {
    async fn run(&self, inputs: &StageInputs, service: &dyn GenerationService) -> Result<ArtifactValue> {
        let output = generate(service, &prompts::GAP_ANALYSIS, &bind(inputs)?).await?;
        let text = non_empty(extract::markdown_or_raw(&output), StageId::GapAnalysis)?;
        Ok(ArtifactValue::Text(text))
    }
}

/// Probing questions targeting the identified gaps
pub struct QuestionGeneration {
    pub count: usize,
}

#[async_trait]
impl StageHandler for QuestionGeneration {
    async fn run(&self, inputs: &StageInputs, service: &dyn GenerationService) -> Result<ArtifactValue> {
        let vars = bind(inputs)?.with("count", self.count.to_string());
        let output = generate(service, &prompts::QUESTION_GENERATION, &vars).await?;

        let mut questions: Vec<String> = extract::extract_string_list(&output)
            .into_iter()
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect();
        if questions.is_empty() {
            return Err(PipelineError::ExtractionEmpty {
                stage: StageId::QuestionGeneration.to_string(),
            });
        }
        if questions.len() > self.count {
            debug!("Keeping {} of {} generated questions", self.count, questions.len());
            questions.truncate(self.count);
        }
        Ok(ArtifactValue::List(questions))
    }
}

/// Rubric scoring of the submitted answers
pub struct Evaluation;

#[async_trait]
impl StageHandler for Evaluation {
    async fn run(&self, inputs: &StageInputs, service: &dyn GenerationService) -> Result<ArtifactValue> {
        let output = generate(service, &prompts::EVALUATION, &bind(inputs)?).await?;
        let body = non_empty(extract::markdown_or_raw(&output), StageId::Evaluation)?;

        let report = extract::parse_evaluation(&body);
        if report.categories.is_empty() {
            warn!("Evaluation has no parsable score table; keeping the report text only");
        }
        Ok(ArtifactValue::Evaluation(report))
    }
}

/// Lesson script written to be spoken by the synthesizer
pub struct NarrationTranscript;

#[async_trait]
impl StageHandler for NarrationTranscript {
    async fn run(&self, inputs: &StageInputs, service: &dyn GenerationService) -> Result<ArtifactValue> {
        let output = generate(service, &prompts::NARRATION_TRANSCRIPT, &bind(inputs)?).await?;
        let speakable = extract::sanitize_for_speech(&extract::markdown_or_raw(&output));
        Ok(ArtifactValue::Text(non_empty(speakable, StageId::NarrationTranscript)?))
    }
}

/// Markdown revision notes
pub struct SummaryNotes;

#[async_trait]
impl StageHandler for SummaryNotes {
    async fn run(&self, inputs: &StageInputs, service: &dyn GenerationService) -> Result<ArtifactValue> {
        let output = generate(service, &prompts::SUMMARY_NOTES, &bind(inputs)?).await?;
        let notes = non_empty(extract::markdown_or_raw(&output), StageId::SummaryNotes)?;
        Ok(ArtifactValue::Text(notes))
    }
}

/// Glossary of key terms as a bold-term markdown list
pub struct KeyVocabulary;

#[async_trait]
impl StageHandler for KeyVocabulary {
    async fn run(&self, inputs: &StageInputs, service: &dyn GenerationService) -> Result<ArtifactValue> {
        let output = generate(service, &prompts::KEY_VOCABULARY, &bind(inputs)?).await?;
        let terms = extract::format_vocabulary(&extract::markdown_or_raw(&output));
        Ok(ArtifactValue::Text(non_empty(terms, StageId::KeyVocabulary)?))
    }
}

/// Practice questions with model answers
pub struct SupplementaryQa {
    pub count: usize,
}

#[async_trait]
impl StageHandler for SupplementaryQa {
    async fn run(&self, inputs: &StageInputs, service: &dyn GenerationService) -> Result<ArtifactValue> {
        let vars = bind(inputs)?.with("count", self.count.to_string());
        let output = generate(service, &prompts::SUPPLEMENTARY_QA, &vars).await?;

        let pairs = extract::extract_qa_pairs(&output);
        if pairs.is_empty() {
            return Err(PipelineError::ExtractionEmpty {
                stage: StageId::SupplementaryQa.to_string(),
            });
        }
        Ok(ArtifactValue::QaPairs(pairs))
    }
}
