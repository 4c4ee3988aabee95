//! Authentication and disconnect pipelines
//!
//! A pipeline is an ordered list of step addresses. Steps are resolved through
//! a [`StepRegistry`] and run by the [`PipelineExecutor`] against a shared
//! [`PipelineContext`]. A step may halt the run (usually with a redirect); the
//! run can then be resumed later from a [`PartialPipeline`].

pub mod context;
pub mod errors;
pub mod executor;
pub mod partial;
pub mod registry;
pub mod step;
pub mod steps;

pub use context::PipelineContext;
pub use errors::{PipelineError, StepError};
pub use executor::{PipelineExecutor, PipelineOutcome};
pub use partial::{
    InMemoryPartialPipelineStore, PartialPipeline, PartialPipelineError, PartialPipelineStore,
    SealedTokenPartialPipelineStore,
};
pub use registry::{is_valid_address, StepRegistry};
pub use step::{Halt, Step, StepOutcome};
pub use steps::{DEFAULT_AUTH_PIPELINE, DEFAULT_DISCONNECT_PIPELINE};

/// Owned copy of a static pipeline definition
#[must_use]
pub fn to_addresses(pipeline: &[&str]) -> Vec<String> {
    pipeline.iter().map(ToString::to_string).collect()
}
