//! Step contract and step results

use crate::pipeline::{PipelineContext, StepError};
use serde::Serialize;
use serde_json::{Map, Value};

/// Terminal value of a short-circuited pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum Halt {
    /// Send the user agent to `location` (consent screens, extra forms)
    Redirect(String),
    /// Render this HTML document
    Html(String),
    /// Any other value the caller knows how to handle
    Value(Value),
}

/// What a step hands back to the executor
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Merge these entries into the context and run the next step
    Continue(Map<String, Value>),
    /// Stop here; the value becomes the pipeline result
    Halt(Halt),
}

impl StepOutcome {
    /// No contribution
    #[must_use]
    pub fn empty() -> Self {
        StepOutcome::Continue(Map::new())
    }

    /// Contribute a single entry
    #[must_use]
    pub fn set(key: &str, value: impl Into<Value>) -> Self {
        Self::empty().with(key, value)
    }

    /// Add an entry to a `Continue` outcome; a `Halt` is returned unchanged
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        if let StepOutcome::Continue(updates) = &mut self {
            updates.insert(key.to_string(), value.into());
        }
        self
    }

    /// Add a serializable entry to a `Continue` outcome
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be represented as JSON
    pub fn with_serialized<T: Serialize>(self, key: &str, value: &T) -> Result<Self, StepError> {
        let value = serde_json::to_value(value).map_err(|source| StepError::InvalidValue {
            key: key.to_string(),
            source,
        })?;
        Ok(self.with(key, value))
    }

    #[must_use]
    pub fn redirect(location: &str) -> Self {
        StepOutcome::Halt(Halt::Redirect(location.to_string()))
    }

    #[must_use]
    pub fn is_halt(&self) -> bool {
        matches!(self, StepOutcome::Halt(_))
    }
}

impl From<Map<String, Value>> for StepOutcome {
    fn from(updates: Map<String, Value>) -> Self {
        StepOutcome::Continue(updates)
    }
}

impl From<Halt> for StepOutcome {
    fn from(halt: Halt) -> Self {
        StepOutcome::Halt(halt)
    }
}

/// A unit of pipeline work
///
/// Steps read the running context and the positional arguments of the call.
/// They must tolerate context entries they do not know about.
pub trait Step: Send + Sync {
    /// Run the step against the current context
    ///
    /// # Errors
    ///
    /// Any error is propagated unchanged to the caller of the pipeline
    fn run(&self, args: &[Value], ctx: &PipelineContext<'_>) -> Result<StepOutcome, StepError>;
}

impl<F> Step for F
where
    F: Fn(&[Value], &PipelineContext<'_>) -> Result<StepOutcome, StepError> + Send + Sync,
{
    fn run(&self, args: &[Value], ctx: &PipelineContext<'_>) -> Result<StepOutcome, StepError> {
        self(args, ctx)
    }
}
