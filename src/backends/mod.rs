//! Provider backends
//!
//! [`AuthBackend`] is the provider contract, [`AuthSession`] binds a backend
//! to one request, and [`BackendRegistry`] maps provider names to backends.

pub mod errors;
pub mod http;
pub mod session;
pub mod traits;

pub use errors::BackendError;
pub use http::RequestOptions;
pub use session::AuthSession;
pub use traits::AuthBackend;

use crate::models::auth::{AuthOutcome, AuthRequest};
use crate::pipeline::PipelineError;
use crate::strategy::Strategy;
use crate::utils::logging::LoggingHelper;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Name → backend lookup table
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Arc<dyn AuthBackend>>,
}

impl BackendRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend under its own name, replacing any previous one
    pub fn register(&mut self, backend: Arc<dyn AuthBackend>) -> &mut Self {
        let name = backend.name().to_string();
        LoggingHelper::log_backend_registered(&name);
        self.backends.insert(name, backend);
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&dyn AuthBackend> {
        self.backends.get(name).map(|backend| backend.as_ref())
    }

    /// Bind the named backend to the current request
    #[must_use]
    pub fn session<'a>(
        &'a self,
        name: &str,
        strategy: &'a dyn Strategy,
        redirect_uri: Option<&str>,
    ) -> Option<AuthSession<'a>> {
        self.get(name)
            .map(|backend| AuthSession::new(backend, strategy, redirect_uri))
    }

    /// Offer `request` to every backend until one accepts it
    ///
    /// # Errors
    ///
    /// Returns the first pipeline error raised by the accepting backend
    pub fn authenticate(
        &self,
        strategy: &dyn Strategy,
        request: &AuthRequest,
    ) -> Result<AuthOutcome, PipelineError> {
        for backend in self.backends.values() {
            let session = AuthSession::new(backend.as_ref(), strategy, None);
            match session.authenticate(request.clone())? {
                AuthOutcome::NotApplicable => continue,
                outcome => return Ok(outcome),
            }
        }
        Ok(AuthOutcome::NotApplicable)
    }

    /// Registered names, sorted
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.backends.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mock::DummyBackend;
    use crate::testing::TestFixtures;
    use serde_json::json;

    fn registry() -> BackendRegistry {
        let mut registry = BackendRegistry::new();
        registry
            .register(Arc::new(DummyBackend::named("github")))
            .register(Arc::new(DummyBackend::named("gitlab")));
        registry
    }

    #[test]
    fn test_lookup() {
        let registry = registry();
        assert_eq!(registry.names(), vec!["github", "gitlab"]);
        assert!(registry.get("github").is_some());
        assert!(registry.get("bitbucket").is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_session_binds_backend() {
        let registry = registry();
        let strategy = TestFixtures::strategy();
        let session = registry.session("gitlab", &strategy, None).unwrap();
        assert_eq!(session.name(), "gitlab");
        assert!(registry.session("bitbucket", &strategy, None).is_none());
    }

    #[test]
    fn test_authenticate_probes_backends() {
        let registry = registry();
        let strategy = TestFixtures::strategy();

        let outcome = registry
            .authenticate(
                &strategy,
                &AuthRequest::new("gitlab", json!({ "id": 5, "username": "gl" })),
            )
            .unwrap();
        let resolved = outcome.into_user().unwrap();
        assert_eq!(resolved.social_identity().unwrap().unwrap().provider, "gitlab");

        let outcome = registry
            .authenticate(&strategy, &AuthRequest::new("bitbucket", json!({ "id": 5 })))
            .unwrap();
        assert_eq!(outcome, AuthOutcome::NotApplicable);
    }
}
