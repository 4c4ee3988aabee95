//! Provider backend contract
//!
//! A provider implements [`AuthBackend`]. Everything that only depends on
//! configuration or the current request (settings, allow-lists, pipelines,
//! HTTP) lives on [`AuthSession`] and is shared by all providers.

use crate::backends::{AuthSession, BackendError};
use crate::models::auth::{AuthOutcome, SocialAuthError};
use crate::models::UserDetails;
use crate::strategy::RequestData;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// One authentication provider
///
/// Implementations are stateless; per-request state is carried by the
/// [`AuthSession`] passed to each call.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Stable provider key, used for settings namespacing and routing
    fn name(&self) -> &str;

    /// Field of the provider response holding the user id
    fn id_key(&self) -> &str {
        "id"
    }

    /// Whether inactive application users may still authenticate
    fn supports_inactive_user(&self) -> bool {
        false
    }

    /// Whether the email must be verified before the user is accepted
    fn requires_email_validation(&self) -> bool {
        false
    }

    /// `true` when the flow starts with a redirect to [`Self::auth_url`],
    /// `false` when it starts by rendering [`Self::auth_html`]
    fn uses_redirect(&self) -> bool {
        true
    }

    /// URL that starts the provider flow
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be built from the configuration
    fn auth_url(&self, session: &AuthSession<'_>) -> Result<String, BackendError>;

    /// HTML document that starts the provider flow
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::NotImplemented`] unless the provider renders
    /// its own start page
    fn auth_html(&self, _session: &AuthSession<'_>) -> Result<String, BackendError> {
        Err(BackendError::NotImplemented("auth_html"))
    }

    /// Finish the provider flow and run the authentication pipeline
    ///
    /// Typical implementations exchange the callback data for a provider
    /// response and hand it to [`AuthSession::authenticate`].
    ///
    /// # Errors
    ///
    /// Returns an error if the provider exchange or the pipeline fails
    async fn auth_complete(&self, session: &AuthSession<'_>)
        -> Result<AuthOutcome, SocialAuthError>;

    /// Inspect callback data for a provider-reported error
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Provider`] when the callback carries an error
    fn process_error(&self, _data: &RequestData) -> Result<(), BackendError> {
        Ok(())
    }

    /// Normalize the provider response into [`UserDetails`]
    ///
    /// # Errors
    ///
    /// Returns an error if the response does not have the expected shape
    fn get_user_details(&self, response: &Value) -> Result<UserDetails, BackendError>;

    /// Provider-stable user id, read from [`Self::id_key`] by default
    fn get_user_id(&self, _details: &UserDetails, response: &Value) -> Option<String> {
        match response.get(self.id_key())? {
            Value::String(id) => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }

    /// Provider-specific values stored on the association
    fn extra_data(
        &self,
        _user: &Value,
        _uid: &str,
        _response: &Value,
        _details: &UserDetails,
    ) -> Map<String, Value> {
        Map::new()
    }
}
