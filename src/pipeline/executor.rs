//! Pipeline execution engine
//!
//! Runs configured step addresses strictly in order against one mutable
//! context. A `Continue` result is merged into the context, a `Halt` result
//! ends the run and becomes its value. A run that reaches the end clears any
//! persisted partial pipeline so a later request cannot resume it by accident.

use crate::pipeline::{Halt, PipelineContext, PipelineError, StepOutcome, StepRegistry};
use crate::utils::logging::LoggingHelper;
use serde_json::Value;

/// Result of a pipeline run
#[derive(Debug)]
pub enum PipelineOutcome<'a> {
    /// Every step ran; this is the accumulated context
    Completed(PipelineContext<'a>),
    /// A step short-circuited the run with this value
    Halted(Halt),
}

impl<'a> PipelineOutcome<'a> {
    #[must_use]
    pub fn is_halted(&self) -> bool {
        matches!(self, PipelineOutcome::Halted(_))
    }

    #[must_use]
    pub fn context(&self) -> Option<&PipelineContext<'a>> {
        match self {
            PipelineOutcome::Completed(ctx) => Some(ctx),
            PipelineOutcome::Halted(_) => None,
        }
    }

    #[must_use]
    pub fn into_context(self) -> Option<PipelineContext<'a>> {
        match self {
            PipelineOutcome::Completed(ctx) => Some(ctx),
            PipelineOutcome::Halted(_) => None,
        }
    }

    #[must_use]
    pub fn into_halt(self) -> Option<Halt> {
        match self {
            PipelineOutcome::Halted(halt) => Some(halt),
            PipelineOutcome::Completed(_) => None,
        }
    }
}

/// Runs step sequences resolved through a [`StepRegistry`]
#[derive(Debug, Clone, Copy)]
pub struct PipelineExecutor<'r> {
    registry: &'r StepRegistry,
}

impl<'r> PipelineExecutor<'r> {
    #[must_use]
    pub fn new(registry: &'r StepRegistry) -> Self {
        Self { registry }
    }

    /// Run `steps` against `ctx`
    ///
    /// `start_index` is the absolute position of `steps[0]` in the configured
    /// pipeline; `ctx.pipeline_index()` always reports the absolute index of
    /// the step about to run so an interrupted run can be resumed there.
    ///
    /// # Errors
    ///
    /// Returns an error if an address does not resolve or a step fails. The
    /// partial pipeline state is left untouched in both cases.
    pub fn run<'a>(
        &self,
        steps: &[String],
        start_index: usize,
        args: &[Value],
        mut ctx: PipelineContext<'a>,
    ) -> Result<PipelineOutcome<'a>, PipelineError> {
        LoggingHelper::log_pipeline_start(ctx.backend().name(), steps.len(), start_index);

        for (offset, address) in steps.iter().enumerate() {
            let index = start_index + offset;
            ctx.set_pipeline_index(index);

            let step = self.registry.resolve(address)?;
            LoggingHelper::log_pipeline_step(address, index);

            match step.run(args, &ctx)? {
                StepOutcome::Continue(updates) => ctx.merge(updates),
                StepOutcome::Halt(halt) => {
                    LoggingHelper::log_pipeline_halted(address, index);
                    return Ok(PipelineOutcome::Halted(halt));
                }
            }
        }

        ctx.strategy().clean_partial_pipeline();
        LoggingHelper::log_pipeline_completed(ctx.backend().name(), ctx.pipeline_index());
        Ok(PipelineOutcome::Completed(ctx))
    }
}
