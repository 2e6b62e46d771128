//! Session state and stage orchestration

pub mod pipeline;
pub mod session;

pub use pipeline::{
    PipelineController, StageDefinition, StageGraph, StageHandler, StageId, StageInputs, StageStatus,
    DERIVED_EDGES,
};
pub use session::{Artifact, ArtifactKey, ArtifactValue, Session};
