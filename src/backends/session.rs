//! Per-request backend binding
//!
//! [`AuthSession`] pairs a provider backend with the strategy of the current
//! request and supplies the behavior every provider shares.

use crate::backends::{AuthBackend, BackendError};
use crate::models::auth::{
    AuthOutcome, AuthRequest, DisconnectRequest, ResolvedUser, SocialAuthError,
};
use crate::models::{UserDetails, UserRecord};
use crate::pipeline::{
    Halt, PartialPipeline, PipelineContext, PipelineError, PipelineExecutor, PipelineOutcome,
};
use crate::settings::setting_name;
use crate::strategy::{RequestData, StorageError, Strategy};
use crate::utils::logging::LoggingHelper;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::LazyLock;

/// Connection pool shared by every session without its own client
static SHARED_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(reqwest::Client::new);

/// A backend bound to the strategy, redirect URI and data of one request
pub struct AuthSession<'a> {
    backend: &'a dyn AuthBackend,
    strategy: &'a dyn Strategy,
    redirect_uri: Option<String>,
    data: RequestData,
    http: Option<reqwest::Client>,
}

impl<'a> AuthSession<'a> {
    /// Bind `backend` to the current request
    ///
    /// A relative `redirect_uri` is made absolute through the strategy.
    #[must_use]
    pub fn new(
        backend: &'a dyn AuthBackend,
        strategy: &'a dyn Strategy,
        redirect_uri: Option<&str>,
    ) -> Self {
        Self {
            backend,
            strategy,
            redirect_uri: redirect_uri.map(|uri| strategy.absolute_uri(uri)),
            data: strategy.request_data(),
            http: None,
        }
    }

    /// Use a preconfigured HTTP client for provider calls
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    #[must_use]
    pub fn name(&self) -> &'a str {
        self.backend.name()
    }

    #[must_use]
    pub fn provider(&self) -> &'a dyn AuthBackend {
        self.backend
    }

    #[must_use]
    pub fn strategy(&self) -> &'a dyn Strategy {
        self.strategy
    }

    #[must_use]
    pub fn redirect_uri(&self) -> Option<&str> {
        self.redirect_uri.as_deref()
    }

    /// Request data captured when the session was created
    #[must_use]
    pub fn data(&self) -> &RequestData {
        &self.data
    }

    /// The client given to [`Self::with_http_client`], else the process-wide one
    pub(crate) fn http_client(&self) -> &reqwest::Client {
        self.http.as_ref().unwrap_or(&SHARED_CLIENT)
    }

    /// Setting for this provider: `<PROVIDER>_<NAME>`, then bare `<NAME>`
    ///
    /// Only a missing key falls back; stored `""`, `0` or `false` are returned.
    #[must_use]
    pub fn setting(&self, name: &str) -> Option<Value> {
        self.strategy
            .setting(&setting_name(&[self.name(), name]))
            .or_else(|| self.strategy.setting(name))
    }

    /// [`Self::setting`] with a caller-supplied default
    #[must_use]
    pub fn setting_or(&self, name: &str, default: Value) -> Value {
        self.setting(name).unwrap_or(default)
    }

    /// Setting as a list of strings; non-string entries are skipped
    #[must_use]
    pub fn setting_list(&self, name: &str) -> Vec<String> {
        match self.setting(name) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect(),
            Some(Value::String(item)) => vec![item],
            _ => Vec::new(),
        }
    }

    /// Check the user against the configured email and domain allow-lists
    ///
    /// With no allow-list configured, or no email in `details`, everyone is
    /// allowed. Entries are matched exactly.
    #[must_use]
    pub fn auth_allowed(&self, _response: &Value, details: &UserDetails) -> bool {
        let emails = self.setting_list("WHITELISTED_EMAILS");
        let domains = self.setting_list("WHITELISTED_DOMAINS");

        let Some(email) = details.email.as_deref().filter(|email| !email.is_empty()) else {
            return true;
        };
        if emails.is_empty() && domains.is_empty() {
            return true;
        }

        let allowed = emails.iter().any(|allowed| allowed == email)
            || details
                .email_domain()
                .is_some_and(|domain| domains.iter().any(|allowed| allowed == domain));
        if !allowed {
            LoggingHelper::log_auth_denied(self.name(), Some(email));
        }
        allowed
    }

    /// `AUTH_EXTRA_ARGUMENTS`, with values overridden from the request data
    #[must_use]
    pub fn auth_extra_arguments(&self) -> Map<String, Value> {
        self.extra_arguments("AUTH_EXTRA_ARGUMENTS")
    }

    /// `REQUEST_TOKEN_EXTRA_ARGUMENTS`, with values overridden from the request data
    #[must_use]
    pub fn request_token_extra_arguments(&self) -> Map<String, Value> {
        self.extra_arguments("REQUEST_TOKEN_EXTRA_ARGUMENTS")
    }

    /// Configured keys only; a request value replaces the configured one
    fn extra_arguments(&self, setting: &str) -> Map<String, Value> {
        let Some(Value::Object(mut arguments)) = self.setting(setting) else {
            return Map::new();
        };
        for (key, value) in &mut arguments {
            if let Some(requested) = self.data.get(key) {
                value.clone_from(requested);
            }
        }
        arguments
    }

    /// Consumer key and secret (`KEY` / `SECRET` settings)
    #[must_use]
    pub fn get_key_and_secret(&self) -> (Option<String>, Option<String>) {
        let as_string = |value: Value| match value {
            Value::String(value) => Some(value),
            Value::Null => None,
            other => Some(other.to_string()),
        };
        (
            self.setting("KEY").and_then(as_string),
            self.setting("SECRET").and_then(as_string),
        )
    }

    /// # Errors
    ///
    /// Propagates the provider's error
    pub fn auth_url(&self) -> Result<String, BackendError> {
        self.backend.auth_url(self)
    }

    /// # Errors
    ///
    /// Propagates the provider's error
    pub fn auth_html(&self) -> Result<String, BackendError> {
        self.backend.auth_html(self)
    }

    /// First response of the provider flow: a redirect or a rendered page
    ///
    /// # Errors
    ///
    /// Propagates the provider's error
    pub fn start(&self) -> Result<Halt, BackendError> {
        if self.backend.uses_redirect() {
            Ok(Halt::Redirect(self.auth_url()?))
        } else {
            Ok(Halt::Html(self.auth_html()?))
        }
    }

    /// Finish the provider flow
    ///
    /// # Errors
    ///
    /// Returns an error if the callback carries a provider error, or the
    /// provider exchange or the pipeline fails
    pub async fn auth_complete(&self) -> Result<AuthOutcome, SocialAuthError> {
        self.backend.process_error(&self.data)?;
        self.backend.auth_complete(self).await
    }

    /// Run the authentication pipeline for `request`
    ///
    /// Answers [`AuthOutcome::NotApplicable`] when the request is not
    /// addressed to this backend or carries no provider response.
    ///
    /// # Errors
    ///
    /// Returns an error if a step does not resolve or fails
    pub fn authenticate(&self, request: AuthRequest) -> Result<AuthOutcome, PipelineError> {
        let AuthRequest {
            backend,
            response,
            pipeline_index,
            is_new,
            args,
            mut values,
        } = request;

        let Some(response) = response.filter(|_| backend.as_deref() == Some(self.name())) else {
            LoggingHelper::log_backend_not_applicable(self.name(), backend.as_deref());
            return Ok(AuthOutcome::NotApplicable);
        };

        values.insert("response".to_string(), response);
        match is_new {
            Some(is_new) => {
                values.insert("is_new".to_string(), Value::Bool(is_new));
            }
            None => {
                values
                    .entry("is_new".to_string())
                    .or_insert(Value::Bool(false));
            }
        }

        let pipeline = self.strategy.get_pipeline();
        let start_index = pipeline_index.unwrap_or(0);
        let steps = pipeline.get(start_index..).unwrap_or_default();

        match self.run_pipeline(steps, start_index, &args, values)? {
            PipelineOutcome::Halted(halt) => Ok(AuthOutcome::Halted(halt)),
            PipelineOutcome::Completed(ctx) => Ok(self.resolve_user(ctx.into_values())),
        }
    }

    fn resolve_user(&self, mut values: Map<String, Value>) -> AuthOutcome {
        let Some(user) = values.remove("user").filter(|user| !user.is_null()) else {
            return AuthOutcome::Unresolved;
        };
        let is_new = values
            .get("is_new")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        LoggingHelper::log_user_resolved(self.name(), is_new);
        AuthOutcome::Authenticated(ResolvedUser {
            user,
            social_user: values.remove("social").filter(|social| !social.is_null()),
            is_new,
        })
    }

    /// Run the disconnect pipeline
    ///
    /// The backend name is available to the steps as `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if a step does not resolve or fails
    pub fn disconnect(
        &self,
        request: DisconnectRequest,
    ) -> Result<PipelineOutcome<'_>, PipelineError> {
        let DisconnectRequest {
            pipeline_index,
            args,
            mut values,
        } = request;
        values.insert("name".to_string(), Value::String(self.name().to_string()));

        let pipeline = self.strategy.get_disconnect_pipeline();
        let start_index = pipeline_index.unwrap_or(0);
        let steps = pipeline.get(start_index..).unwrap_or_default();
        self.run_pipeline(steps, start_index, &args, values)
    }

    /// Run `steps` with this session as the backend
    ///
    /// `start_index` is the absolute position of `steps[0]` in the configured
    /// pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if a step does not resolve or fails
    pub fn run_pipeline(
        &self,
        steps: &[String],
        start_index: usize,
        args: &[Value],
        values: Map<String, Value>,
    ) -> Result<PipelineOutcome<'_>, PipelineError> {
        let ctx = PipelineContext::new(
            self.strategy,
            self,
            self.strategy.request(),
            start_index,
            values,
        );
        PipelineExecutor::new(self.strategy.steps()).run(steps, start_index, args, ctx)
    }

    /// Re-enter the authentication pipeline after an external redirect
    ///
    /// # Errors
    ///
    /// Returns an error if a step does not resolve or fails
    pub fn continue_pipeline(&self, request: AuthRequest) -> Result<AuthOutcome, PipelineError> {
        self.authenticate(AuthRequest {
            backend: Some(self.name().to_string()),
            ..request
        })
    }

    /// Resume a halted pipeline from its persisted state
    ///
    /// State saved for another backend is [`AuthOutcome::NotApplicable`].
    ///
    /// # Errors
    ///
    /// Returns an error if a step does not resolve or fails
    pub fn resume(&self, partial: PartialPipeline) -> Result<AuthOutcome, PipelineError> {
        if partial.backend != self.name() {
            LoggingHelper::log_backend_not_applicable(self.name(), Some(&partial.backend));
            return Ok(AuthOutcome::NotApplicable);
        }
        LoggingHelper::log_pipeline_resumed(self.name(), partial.next_index);

        let PartialPipeline {
            next_index,
            args,
            mut values,
            ..
        } = partial;
        let response = values.remove("response").unwrap_or(Value::Null);
        let is_new = values.get("is_new").and_then(Value::as_bool);

        self.continue_pipeline(AuthRequest {
            backend: None,
            response: Some(response),
            pipeline_index: Some(next_index),
            is_new,
            args,
            values,
        })
    }

    /// # Errors
    ///
    /// Returns an error if the storage backend fails
    pub fn get_user(&self, id: &str) -> Result<Option<UserRecord>, StorageError> {
        self.strategy.get_user(id)
    }

    /// Provider extra data plus the fields named in the `EXTRA_DATA` setting
    ///
    /// `EXTRA_DATA` entries are either a response field name or a
    /// `[field, alias]` pair.
    #[must_use]
    pub fn extra_data(
        &self,
        user: &Value,
        uid: &str,
        response: &Value,
        details: &UserDetails,
    ) -> Map<String, Value> {
        let mut data = Map::new();
        if let Some(Value::Array(names)) = self.setting("EXTRA_DATA") {
            for entry in names {
                let (field, alias) = match &entry {
                    Value::String(field) => (field.as_str(), field.as_str()),
                    Value::Array(pair) => match (pair.first(), pair.get(1)) {
                        (Some(Value::String(field)), Some(Value::String(alias))) => {
                            (field.as_str(), alias.as_str())
                        }
                        _ => continue,
                    },
                    _ => continue,
                };
                if let Some(value) = response.get(field) {
                    data.insert(alias.to_string(), value.clone());
                }
            }
        }
        data.extend(self.backend.extra_data(user, uid, response, details));
        data
    }
}

impl fmt::Debug for AuthSession<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("backend", &self.name())
            .field("redirect_uri", &self.redirect_uri)
            .field("data", &self.data)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{StepOutcome, StepRegistry};
    use crate::testing::mock::DummyBackend;
    use crate::testing::TestFixtures;
    use serde_json::json;

    #[test]
    fn test_setting_prefers_provider_namespace() {
        let strategy = TestFixtures::strategy();
        strategy.set_setting("SCOPE", json!(["bare"]));
        let backend = DummyBackend::new();
        let session = TestFixtures::session(&backend, &strategy);
        assert_eq!(session.setting("SCOPE"), Some(json!(["bare"])));

        strategy.set_setting("DUMMY_SCOPE", json!(["namespaced"]));
        assert_eq!(session.setting("SCOPE"), Some(json!(["namespaced"])));
        assert_eq!(session.setting("MISSING"), None);
        assert_eq!(session.setting_or("MISSING", json!(5)), json!(5));
    }

    #[test]
    fn test_falsy_values_do_not_fall_back() {
        let strategy = TestFixtures::strategy();
        strategy.set_setting("TIMEOUT", json!(30));
        strategy.set_setting("DUMMY_TIMEOUT", json!(0));
        strategy.set_setting("LABEL", json!("bare"));
        strategy.set_setting("DUMMY_LABEL", json!(""));
        let backend = DummyBackend::new();
        let session = TestFixtures::session(&backend, &strategy);

        assert_eq!(session.setting("TIMEOUT"), Some(json!(0)));
        assert_eq!(session.setting_or("LABEL", json!("default")), json!(""));
    }

    #[test]
    fn test_auth_allowed_without_lists() {
        let strategy = TestFixtures::strategy();
        let backend = DummyBackend::new();
        let session = TestFixtures::session(&backend, &strategy);

        assert!(session.auth_allowed(&json!({}), &UserDetails::with_email("anyone@x.com")));
        assert!(session.auth_allowed(&json!({}), &UserDetails::default()));
    }

    #[test]
    fn test_auth_allowed_with_lists() {
        let strategy = TestFixtures::strategy();
        let backend = DummyBackend::new();
        let session = TestFixtures::session(&backend, &strategy);

        strategy.set_setting("WHITELISTED_EMAILS", json!(["a@x.com"]));
        assert!(!session.auth_allowed(&json!({}), &UserDetails::with_email("b@x.com")));
        assert!(session.auth_allowed(&json!({}), &UserDetails::with_email("a@x.com")));
        assert!(!session.auth_allowed(&json!({}), &UserDetails::with_email("A@X.COM")));
        // No email, nothing to check
        assert!(session.auth_allowed(&json!({}), &UserDetails::default()));

        strategy.set_setting("WHITELISTED_DOMAINS", json!(["x.com"]));
        assert!(session.auth_allowed(&json!({}), &UserDetails::with_email("b@x.com")));
        assert!(!session.auth_allowed(&json!({}), &UserDetails::with_email("b@y.com")));
        assert!(!session.auth_allowed(&json!({}), &UserDetails::with_email("b@X.com")));
        assert!(!session.auth_allowed(&json!({}), &UserDetails::with_email("no-at-sign")));
    }

    #[test]
    fn test_extra_arguments_only_override_configured_keys() {
        let strategy = TestFixtures::strategy();
        strategy.set_setting(
            "DUMMY_AUTH_EXTRA_ARGUMENTS",
            json!({ "prompt": "consent", "access_type": "offline" }),
        );
        strategy.set_request_value("prompt", json!("none"));
        strategy.set_request_value("unrelated", json!("ignored"));
        let backend = DummyBackend::new();
        let session = TestFixtures::session(&backend, &strategy);

        let arguments = session.auth_extra_arguments();
        assert_eq!(arguments.len(), 2);
        assert_eq!(arguments["prompt"], json!("none"));
        assert_eq!(arguments["access_type"], json!("offline"));
        assert!(session.request_token_extra_arguments().is_empty());
    }

    #[test]
    fn test_key_and_secret() {
        let strategy = TestFixtures::strategy();
        strategy.set_setting("DUMMY_KEY", json!("client-id"));
        strategy.set_setting("DUMMY_SECRET", json!(""));
        let backend = DummyBackend::new();
        let session = TestFixtures::session(&backend, &strategy);

        assert_eq!(
            session.get_key_and_secret(),
            (Some("client-id".to_string()), Some(String::new()))
        );
    }

    #[test]
    fn test_sessions_share_one_http_client() {
        let strategy = TestFixtures::strategy();
        let backend = DummyBackend::new();
        let other = DummyBackend::named("github");
        let first = TestFixtures::session(&backend, &strategy);
        let second = TestFixtures::session(&other, &strategy);
        assert!(std::ptr::eq(first.http_client(), second.http_client()));

        let custom = TestFixtures::session(&backend, &strategy)
            .with_http_client(reqwest::Client::new());
        assert!(!std::ptr::eq(first.http_client(), custom.http_client()));
    }

    #[test]
    fn test_redirect_uri_is_absolute() {
        let strategy = TestFixtures::strategy();
        let backend = DummyBackend::new();
        let session = AuthSession::new(&backend, &strategy, Some("/complete/dummy/"));
        assert_eq!(
            session.redirect_uri(),
            Some("https://app.example.com/complete/dummy/")
        );
    }

    #[test]
    fn test_start_redirects_or_renders() {
        let strategy = TestFixtures::strategy();
        let backend = DummyBackend::new();
        let session = TestFixtures::session(&backend, &strategy);
        assert_eq!(
            session.start().unwrap(),
            Halt::Redirect("https://provider.example.com/authorize".to_string())
        );

        let html_backend = DummyBackend::new().without_redirect();
        let session = TestFixtures::session(&html_backend, &strategy);
        assert!(matches!(
            session.start(),
            Err(BackendError::NotImplemented("auth_html"))
        ));
    }

    #[test]
    fn test_authenticate_requires_matching_backend_and_response() {
        let strategy = TestFixtures::strategy();
        let backend = DummyBackend::new();
        let session = TestFixtures::session(&backend, &strategy);

        let other = AuthRequest::new("github", json!({ "id": 1 }));
        assert_eq!(session.authenticate(other).unwrap(), AuthOutcome::NotApplicable);

        let no_response = AuthRequest {
            backend: Some("dummy".to_string()),
            ..Default::default()
        };
        assert_eq!(
            session.authenticate(no_response).unwrap(),
            AuthOutcome::NotApplicable
        );

        let no_backend = AuthRequest {
            response: Some(json!({ "id": 1 })),
            ..Default::default()
        };
        assert_eq!(
            session.authenticate(no_backend).unwrap(),
            AuthOutcome::NotApplicable
        );
        assert_eq!(strategy.storage().user_count(), 0);
    }

    #[test]
    fn test_authenticate_defaults_is_new() {
        let mut registry = StepRegistry::new();
        registry
            .register("t.user", |_args: &[Value], _ctx: &PipelineContext<'_>| {
                Ok(StepOutcome::set("user", json!({ "id": "1" })))
            })
            .unwrap();
        let strategy = TestFixtures::strategy_with_registry(registry);
        strategy.set_pipeline(&["t.user"]);
        let backend = DummyBackend::new();
        let session = TestFixtures::session(&backend, &strategy);

        let resolved = session
            .authenticate(AuthRequest::new("dummy", json!({ "id": 1 })))
            .unwrap()
            .into_user()
            .unwrap();
        assert!(!resolved.is_new);
        assert_eq!(resolved.social_user, None);

        let resolved = session
            .authenticate(AuthRequest::new("dummy", json!({ "id": 1 })).with_is_new(true))
            .unwrap()
            .into_user()
            .unwrap();
        assert!(resolved.is_new);
    }

    #[test]
    fn test_authenticate_without_user_is_unresolved() {
        let mut registry = StepRegistry::new();
        registry
            .register("t.noop", |_args: &[Value], _ctx: &PipelineContext<'_>| {
                Ok(StepOutcome::set("user", Value::Null))
            })
            .unwrap();
        let strategy = TestFixtures::strategy_with_registry(registry);
        strategy.set_pipeline(&["t.noop"]);
        let backend = DummyBackend::new();
        let session = TestFixtures::session(&backend, &strategy);

        let outcome = session
            .authenticate(AuthRequest::new("dummy", json!({ "id": 1 })))
            .unwrap();
        assert_eq!(outcome, AuthOutcome::Unresolved);
    }

    #[test]
    fn test_authenticate_resumes_from_index() {
        let mut registry = StepRegistry::new();
        for name in ["t.zero", "t.one", "t.two"] {
            let key = name.to_string();
            registry
                .register(name, move |_args: &[Value], ctx: &PipelineContext<'_>| {
                    Ok(StepOutcome::set(&key, ctx.pipeline_index()))
                })
                .unwrap();
        }
        registry
            .register("t.user", |_args: &[Value], ctx: &PipelineContext<'_>| {
                Ok(StepOutcome::set("user", json!({ "id": "1", "ran": ctx.values().clone() })))
            })
            .unwrap();
        let strategy = TestFixtures::strategy_with_registry(registry);
        strategy.set_pipeline(&["t.zero", "t.one", "t.two", "t.user"]);
        let backend = DummyBackend::new();
        let session = TestFixtures::session(&backend, &strategy);

        let resolved = session
            .authenticate(AuthRequest::new("dummy", json!({})).with_pipeline_index(2))
            .unwrap()
            .into_user()
            .unwrap();
        let ran = &resolved.user["ran"];
        assert!(ran.get("t.zero").is_none());
        assert!(ran.get("t.one").is_none());
        assert_eq!(ran["t.two"], json!(2));
        assert!(!resolved.is_new);
    }

    #[test]
    fn test_out_of_range_index_runs_nothing() {
        let strategy = TestFixtures::strategy();
        let backend = DummyBackend::new();
        let session = TestFixtures::session(&backend, &strategy);

        let outcome = session
            .authenticate(AuthRequest::new("dummy", json!({ "id": 1 })).with_pipeline_index(99))
            .unwrap();
        assert_eq!(outcome, AuthOutcome::Unresolved);
        assert_eq!(strategy.partial_store().clear_count(), 1);
    }

    #[test]
    fn test_resume_rejects_other_backend() {
        let strategy = TestFixtures::strategy();
        let backend = DummyBackend::new();
        let session = TestFixtures::session(&backend, &strategy);

        let partial = PartialPipeline {
            backend: "github".to_string(),
            next_index: 1,
            args: Vec::new(),
            values: Map::new(),
            saved_at: chrono::Utc::now(),
        };
        assert_eq!(session.resume(partial).unwrap(), AuthOutcome::NotApplicable);
    }

    #[test]
    fn test_extra_data_setting() {
        let strategy = TestFixtures::strategy();
        strategy.set_setting("DUMMY_EXTRA_DATA", json!(["login", ["avatar_url", "avatar"], 7]));
        let backend = DummyBackend::new();
        let session = TestFixtures::session(&backend, &strategy);

        let data = session.extra_data(
            &Value::Null,
            "1",
            &json!({ "id": 1, "login": "octo", "avatar_url": "https://a/1.png" }),
            &UserDetails::default(),
        );
        assert_eq!(data["login"], json!("octo"));
        assert_eq!(data["avatar"], json!("https://a/1.png"));
        assert_eq!(data["id"], json!(1));
    }
}
