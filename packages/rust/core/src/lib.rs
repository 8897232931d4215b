//! Orchestration engine for the style guide pipeline.
//!
//! Resolves guidance, runs the shared prefix stages, fans out one bounded
//! revise loop per declared field and aggregates the results into a
//! [`StyleGuideDocument`](styleguide_shared::StyleGuideDocument).

pub mod aggregate;
pub mod capability;
pub mod contract;
pub mod executor;
pub mod graph;
pub mod knowledge;
pub mod pipeline;
pub mod render;
pub mod revise;
pub mod stages;

#[cfg(test)]
mod testing;

pub use aggregate::{DocumentSink, aggregate};
pub use capability::{GenerativeCapability, Payload, StageRequest};
pub use contract::{FieldKind, OutputField, StageContract};
pub use executor::{StageExecutor, StageResult};
pub use graph::{FieldSubflow, PipelineGraph, PrefixNode};
pub use knowledge::{
    Guidance, GuidanceBundle, InMemoryKnowledge, KnowledgeResolver, KnowledgeStore, MatchLevel,
};
pub use pipeline::{Pipeline, ProgressReporter, RunRequest, SilentProgress};
pub use revise::{FieldTask, ReviseLoop, Verdict};
