//! Common authentication data types
//!
//! This module provides the request and outcome types exchanged between callers,
//! backends and the authentication pipeline, plus the unified error type.

use crate::backends::BackendError;
use crate::models::{SocialIdentity, UserRecord};
use crate::pipeline::{Halt, PipelineError};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Common error type for authentication operations
///
/// Unifies backend (transport, provider contract) and pipeline failures so that
/// `auth_complete` implementations can use `?` on both.
#[derive(Debug)]
pub enum SocialAuthError {
    /// Provider backend errors
    Backend(BackendError),
    /// Pipeline resolution or step errors
    Pipeline(PipelineError),
}

impl fmt::Display for SocialAuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocialAuthError::Backend(err) => write!(f, "Backend error: {err}"),
            SocialAuthError::Pipeline(err) => write!(f, "Pipeline error: {err}"),
        }
    }
}

impl std::error::Error for SocialAuthError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SocialAuthError::Backend(err) => Some(err),
            SocialAuthError::Pipeline(err) => Some(err),
        }
    }
}

impl From<BackendError> for SocialAuthError {
    fn from(err: BackendError) -> Self {
        SocialAuthError::Backend(err)
    }
}

impl From<PipelineError> for SocialAuthError {
    fn from(err: PipelineError) -> Self {
        SocialAuthError::Pipeline(err)
    }
}

/// Arguments of an `authenticate` call
///
/// `backend` and `response` must both be present and `backend` must name the
/// backend being asked, otherwise the call is answered with
/// [`AuthOutcome::NotApplicable`].
#[derive(Debug, Clone, Default)]
pub struct AuthRequest {
    pub backend: Option<String>,
    pub response: Option<Value>,
    pub pipeline_index: Option<usize>,
    pub is_new: Option<bool>,
    /// Positional arguments forwarded to every step
    pub args: Vec<Value>,
    /// Extra keyword values seeded into the pipeline context
    pub values: Map<String, Value>,
}

impl AuthRequest {
    /// Request addressed to `backend` carrying the provider `response`
    #[must_use]
    pub fn new(backend: &str, response: Value) -> Self {
        Self {
            backend: Some(backend.to_string()),
            response: Some(response),
            ..Default::default()
        }
    }

    /// Resume the pipeline from an absolute step index
    #[must_use]
    pub fn with_pipeline_index(mut self, index: usize) -> Self {
        self.pipeline_index = Some(index);
        self
    }

    #[must_use]
    pub fn with_is_new(mut self, is_new: bool) -> Self {
        self.is_new = Some(is_new);
        self
    }

    /// Append a positional argument
    #[must_use]
    pub fn with_arg(mut self, arg: Value) -> Self {
        self.args.push(arg);
        self
    }

    /// Seed a keyword value into the pipeline context
    #[must_use]
    pub fn with_value(mut self, key: &str, value: Value) -> Self {
        self.values.insert(key.to_string(), value);
        self
    }
}

/// Arguments of a `disconnect` call
#[derive(Debug, Clone, Default)]
pub struct DisconnectRequest {
    pub pipeline_index: Option<usize>,
    pub args: Vec<Value>,
    pub values: Map<String, Value>,
}

impl DisconnectRequest {
    /// Disconnect request for `user`
    ///
    /// # Errors
    ///
    /// Returns an error if the user record cannot be serialized
    pub fn for_user(user: &UserRecord) -> Result<Self, serde_json::Error> {
        let mut request = Self::default();
        request
            .values
            .insert("user".to_string(), serde_json::to_value(user)?);
        Ok(request)
    }

    /// Restrict the disconnect to a single association
    #[must_use]
    pub fn with_association_id(mut self, association_id: Uuid) -> Self {
        self.values.insert(
            "association_id".to_string(),
            Value::String(association_id.to_string()),
        );
        self
    }

    #[must_use]
    pub fn with_pipeline_index(mut self, index: usize) -> Self {
        self.pipeline_index = Some(index);
        self
    }

    #[must_use]
    pub fn with_value(mut self, key: &str, value: Value) -> Self {
        self.values.insert(key.to_string(), value);
        self
    }
}

/// User resolved by a completed authentication pipeline
///
/// The `user` value is moved out of the final context together with the
/// social identity it was linked through and the novelty flag.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedUser {
    pub user: Value,
    pub social_user: Option<Value>,
    pub is_new: bool,
}

impl ResolvedUser {
    /// Deserialize the user as a [`UserRecord`]
    ///
    /// # Errors
    ///
    /// Returns an error if the pipeline produced a user of a different shape
    pub fn user_record(&self) -> Result<UserRecord, serde_json::Error> {
        serde_json::from_value(self.user.clone())
    }

    /// Deserialize the linked social identity, if any
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value is not a [`SocialIdentity`]
    pub fn social_identity(&self) -> Result<Option<SocialIdentity>, serde_json::Error> {
        self.social_user
            .clone()
            .map(serde_json::from_value)
            .transpose()
    }
}

/// Result of an `authenticate` call
#[derive(Debug, Clone, PartialEq)]
pub enum AuthOutcome {
    /// The request was not addressed to this backend; try another one
    NotApplicable,
    /// The pipeline completed and resolved a user
    Authenticated(ResolvedUser),
    /// The pipeline completed without producing a user
    Unresolved,
    /// A step halted the pipeline; the value is handed back unchanged
    Halted(Halt),
}

impl AuthOutcome {
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthOutcome::Authenticated(_))
    }

    /// The resolved user, if the pipeline produced one
    #[must_use]
    pub fn into_user(self) -> Option<ResolvedUser> {
        match self {
            AuthOutcome::Authenticated(user) => Some(user),
            _ => None,
        }
    }

    /// The halt value, if a step short-circuited the pipeline
    #[must_use]
    pub fn into_halt(self) -> Option<Halt> {
        match self {
            AuthOutcome::Halted(halt) => Some(halt),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_auth_request_builder() {
        let request = AuthRequest::new("github", json!({ "id": 7 }))
            .with_pipeline_index(2)
            .with_arg(json!("positional"))
            .with_value("uid", json!("7"));

        assert_eq!(request.backend.as_deref(), Some("github"));
        assert_eq!(request.response, Some(json!({ "id": 7 })));
        assert_eq!(request.pipeline_index, Some(2));
        assert_eq!(request.is_new, None);
        assert_eq!(request.args, vec![json!("positional")]);
        assert_eq!(request.values.get("uid"), Some(&json!("7")));
    }

    #[test]
    fn test_disconnect_request_for_user() {
        let user = UserRecord {
            id: "1".to_string(),
            username: "dave".to_string(),
            email: None,
            is_active: true,
            has_usable_password: true,
        };
        let association = Uuid::new_v4();
        let request = DisconnectRequest::for_user(&user)
            .unwrap()
            .with_association_id(association);

        assert_eq!(request.values["user"]["username"], "dave");
        assert_eq!(request.values["association_id"], json!(association.to_string()));
    }

    #[test]
    fn test_resolved_user_accessors() {
        let resolved = ResolvedUser {
            user: json!({ "id": "9", "username": "erin", "email": "erin@example.com" }),
            social_user: None,
            is_new: true,
        };
        let record = resolved.user_record().unwrap();
        assert_eq!(record.username, "erin");
        assert!(resolved.social_identity().unwrap().is_none());
    }

    #[test]
    fn test_auth_outcome_accessors() {
        let halted = AuthOutcome::Halted(Halt::Redirect("/consent".to_string()));
        assert!(!halted.is_authenticated());
        assert_eq!(
            halted.into_halt(),
            Some(Halt::Redirect("/consent".to_string()))
        );
        assert_eq!(AuthOutcome::Unresolved.into_user(), None);
    }

    #[test]
    fn test_error_display() {
        let err = SocialAuthError::from(BackendError::NotImplemented("auth_html"));
        assert_eq!(
            err.to_string(),
            "Backend error: auth_html must be implemented by the provider backend"
        );
    }
}
