//! Framework collaborator seam
//!
//! A [`Strategy`] gives backends and pipeline steps everything they need from
//! the hosting application: configuration, request data, user storage, the
//! step registry and partial pipeline persistence.

pub mod configured;
pub mod storage;

pub use configured::ConfiguredStrategy;
pub use storage::{InMemoryUserStorage, StorageError, UserStorage};

use crate::backends::{AuthBackend, AuthSession};
use crate::models::auth::{AuthOutcome, AuthRequest};
use crate::models::UserRecord;
use crate::pipeline::{PartialPipelineStore, PipelineError, StepRegistry};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Request parameters (query string and form fields) of the current request
pub type RequestData = Map<String, Value>;

/// Minimal description of the inbound request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestInfo {
    pub method: String,
    pub path: String,
    pub host: Option<String>,
}

impl RequestInfo {
    #[must_use]
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            host: None,
        }
    }

    #[must_use]
    pub fn with_host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }
}

/// Hosting application seen from a backend or a pipeline step
pub trait Strategy: Send + Sync {
    /// Parameters of the current request
    fn request_data(&self) -> RequestData;

    /// The current request, when running inside one
    fn request(&self) -> Option<RequestInfo>;

    /// Turn an application path into an absolute URI
    fn absolute_uri(&self, path: &str) -> String;

    /// Raw configuration lookup
    ///
    /// `None` means the key is not configured. Any stored value, including
    /// `""`, `0` or `false`, is returned as is.
    fn setting(&self, name: &str) -> Option<Value>;

    /// Configured authentication pipeline
    fn get_pipeline(&self) -> Vec<String>;

    /// Configured disconnect pipeline
    fn get_disconnect_pipeline(&self) -> Vec<String>;

    /// Registry the configured pipelines are resolved against
    fn steps(&self) -> &StepRegistry;

    fn user_storage(&self) -> &dyn UserStorage;

    fn partial_pipeline(&self) -> &dyn PartialPipelineStore;

    /// Forget any persisted partial pipeline
    fn clean_partial_pipeline(&self) {
        self.partial_pipeline().clear();
    }

    /// # Errors
    ///
    /// Returns an error if the storage backend fails
    fn get_user(&self, id: &str) -> Result<Option<UserRecord>, StorageError> {
        self.user_storage().get_user(id)
    }

    /// Run `backend`'s authentication pipeline for the current request
    ///
    /// # Errors
    ///
    /// Returns an error if a configured step does not resolve or fails
    fn authenticate(
        &self,
        backend: &dyn AuthBackend,
        request: AuthRequest,
    ) -> Result<AuthOutcome, PipelineError>
    where
        Self: Sized,
    {
        AuthSession::new(backend, self, None).authenticate(request)
    }
}
