//! Orchestration: the per-article state machine and outbound events

mod events;
mod orchestrator;

pub use events::{EventSink, LogSink, PipelineEvent, RelationshipSummary};
pub use orchestrator::{
    AnalysisOutcome, AnalysisState, Orchestrator, PipelineError, PipelineResult,
};
