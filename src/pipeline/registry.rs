//! Step resolution
//!
//! Steps are registered under a stable address at startup and looked up by
//! that address when a configured pipeline runs. There is no path-based
//! discovery: an address that was never registered is a configuration error.

use crate::pipeline::{PipelineContext, PipelineError, Step, StepError, StepOutcome};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Dotted (`social.user`) or path (`social::user`) identifiers
static STEP_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(?:(?:\.|::)[A-Za-z_][A-Za-z0-9_]*)*$")
        .expect("step address pattern is valid")
});

/// Check that `address` is a well-formed step address
#[must_use]
pub fn is_valid_address(address: &str) -> bool {
    STEP_ADDRESS.is_match(address)
}

/// Address → step lookup table
#[derive(Clone, Default)]
pub struct StepRegistry {
    steps: HashMap<String, Arc<dyn Step>>,
}

impl StepRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the built-in `social.*` steps
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        crate::pipeline::steps::register_defaults(&mut registry);
        registry
    }

    /// Register a function or closure as a step
    ///
    /// Re-registering an address replaces the previous step.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidAddress`] if the address is malformed
    pub fn register<F>(&mut self, address: &str, step: F) -> Result<&mut Self, PipelineError>
    where
        F: Fn(&[Value], &PipelineContext<'_>) -> Result<StepOutcome, StepError>
            + Send
            + Sync
            + 'static,
    {
        self.register_step(address, Arc::new(step))
    }

    /// Register a shared step object
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidAddress`] if the address is malformed
    pub fn register_step(
        &mut self,
        address: &str,
        step: Arc<dyn Step>,
    ) -> Result<&mut Self, PipelineError> {
        if !is_valid_address(address) {
            return Err(PipelineError::InvalidAddress {
                address: address.to_string(),
            });
        }
        self.steps.insert(address.to_string(), step);
        Ok(self)
    }

    /// Look up the step registered under `address`
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Resolution`] if nothing is registered there
    pub fn resolve(&self, address: &str) -> Result<Arc<dyn Step>, PipelineError> {
        self.steps
            .get(address)
            .cloned()
            .ok_or_else(|| PipelineError::Resolution {
                address: address.to_string(),
            })
    }

    /// Check that every address of a configured pipeline resolves
    ///
    /// # Errors
    ///
    /// Returns the error for the first address that does not resolve
    pub fn validate(&self, pipeline: &[String]) -> Result<(), PipelineError> {
        for address in pipeline {
            if !is_valid_address(address) {
                return Err(PipelineError::InvalidAddress {
                    address: address.clone(),
                });
            }
            self.resolve(address)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn contains(&self, address: &str) -> bool {
        self.steps.contains_key(address)
    }

    /// Registered addresses, sorted
    #[must_use]
    pub fn addresses(&self) -> Vec<&str> {
        let mut addresses: Vec<&str> = self.steps.keys().map(String::as_str).collect();
        addresses.sort_unstable();
        addresses
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepRegistry")
            .field("addresses", &self.addresses())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_args: &[Value], _ctx: &PipelineContext<'_>) -> Result<StepOutcome, StepError> {
        Ok(StepOutcome::empty())
    }

    #[test]
    fn test_address_grammar() {
        assert!(is_valid_address("social.details"));
        assert!(is_valid_address("social::pipeline::user"));
        assert!(is_valid_address("load_user"));
        assert!(!is_valid_address(""));
        assert!(!is_valid_address("social..user"));
        assert!(!is_valid_address("1social.user"));
        assert!(!is_valid_address("social.user "));
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = StepRegistry::new();
        registry.register("custom.noop", noop).unwrap();

        assert!(registry.contains("custom.noop"));
        assert!(registry.resolve("custom.noop").is_ok());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_resolve_unknown_address() {
        let registry = StepRegistry::new();
        let err = registry.resolve("custom.missing").err().unwrap();
        assert!(matches!(
            err,
            PipelineError::Resolution { ref address } if address == "custom.missing"
        ));
    }

    #[test]
    fn test_register_rejects_malformed_address() {
        let mut registry = StepRegistry::new();
        let err = registry.register("not a path", noop).err().unwrap();
        assert!(matches!(err, PipelineError::InvalidAddress { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_validate_pipeline() {
        let registry = StepRegistry::with_defaults();
        let pipeline = vec!["social.details".to_string(), "social.uid".to_string()];
        assert!(registry.validate(&pipeline).is_ok());

        let pipeline = vec!["social.details".to_string(), "social.nope".to_string()];
        assert!(matches!(
            registry.validate(&pipeline),
            Err(PipelineError::Resolution { .. })
        ));
    }

    #[test]
    fn test_defaults_are_sorted_and_registered() {
        let registry = StepRegistry::with_defaults();
        let addresses = registry.addresses();
        let mut sorted = addresses.clone();
        sorted.sort_unstable();
        assert_eq!(addresses, sorted);
        assert!(addresses.contains(&"social.user"));
        assert!(addresses.contains(&"social.disconnect.disconnect"));
    }
}
