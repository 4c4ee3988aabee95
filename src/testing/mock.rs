//! Mock objects and fake implementations for testing
//!
//! This module provides mock implementations of the provider backend, the
//! strategy collaborator and the partial pipeline store for isolated testing.

use crate::backends::{AuthBackend, AuthSession, BackendError, RequestOptions};
use crate::models::auth::{AuthOutcome, AuthRequest, SocialAuthError};
use crate::models::UserDetails;
use crate::pipeline::{
    InMemoryPartialPipelineStore, PartialPipeline, PartialPipelineError, PartialPipelineStore,
    PipelineContext, StepError, StepOutcome, StepRegistry,
};
use crate::strategy::{InMemoryUserStorage, RequestData, RequestInfo, Strategy, UserStorage};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use url::Url;

use super::constants::{TEST_AUTHORIZE_URL, TEST_BASE_URL, TEST_PROVIDER};

/// Configurable provider backend
///
/// `auth_complete` reads the provider response from the `USER_URL` setting
/// when configured (sending the callback `code` as bearer token), otherwise
/// from the callback data itself.
#[derive(Debug, Clone)]
pub struct DummyBackend {
    name: String,
    id_key: String,
    redirect: bool,
}

impl DummyBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::named(TEST_PROVIDER)
    }

    #[must_use]
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            id_key: "id".to_string(),
            redirect: true,
        }
    }

    #[must_use]
    pub fn with_id_key(mut self, id_key: &str) -> Self {
        self.id_key = id_key.to_string();
        self
    }

    /// Start the flow with a rendered page instead of a redirect
    #[must_use]
    pub fn without_redirect(mut self) -> Self {
        self.redirect = false;
        self
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn string_field(response: &Value, key: &str) -> Option<String> {
    response.get(key).and_then(Value::as_str).map(ToString::to_string)
}

#[async_trait]
impl AuthBackend for DummyBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn id_key(&self) -> &str {
        &self.id_key
    }

    fn uses_redirect(&self) -> bool {
        self.redirect
    }

    fn auth_url(&self, session: &AuthSession<'_>) -> Result<String, BackendError> {
        let mut url = Url::parse(TEST_AUTHORIZE_URL)?;
        if let Some(redirect_uri) = session.redirect_uri() {
            url.query_pairs_mut().append_pair("redirect_uri", redirect_uri);
        }
        for (key, value) in session.auth_extra_arguments() {
            let value = value.as_str().map_or_else(|| value.to_string(), ToString::to_string);
            url.query_pairs_mut().append_pair(&key, &value);
        }
        Ok(url.to_string())
    }

    async fn auth_complete(
        &self,
        session: &AuthSession<'_>,
    ) -> Result<AuthOutcome, SocialAuthError> {
        let response = match session.setting("USER_URL") {
            Some(Value::String(user_url)) => {
                let code = session
                    .data()
                    .get("code")
                    .and_then(Value::as_str)
                    .ok_or_else(|| BackendError::Provider("missing code".to_string()))?;
                session
                    .get_json(&user_url, RequestOptions::get().bearer(code))
                    .await?
            }
            _ => Value::Object(session.data().clone()),
        };
        Ok(session.authenticate(AuthRequest::new(&self.name, response))?)
    }

    fn process_error(&self, data: &RequestData) -> Result<(), BackendError> {
        match data.get("error").and_then(Value::as_str) {
            Some(error) => Err(BackendError::Provider(error.to_string())),
            None => Ok(()),
        }
    }

    fn get_user_details(&self, response: &Value) -> Result<UserDetails, BackendError> {
        if !response.is_object() {
            return Err(BackendError::InvalidResponse(
                "expected a JSON object".to_string(),
            ));
        }
        Ok(UserDetails {
            username: string_field(response, "username"),
            email: string_field(response, "email"),
            fullname: string_field(response, "fullname"),
            first_name: string_field(response, "first_name"),
            last_name: string_field(response, "last_name"),
        })
    }

    fn extra_data(
        &self,
        _user: &Value,
        _uid: &str,
        response: &Value,
        _details: &UserDetails,
    ) -> Map<String, Value> {
        let mut extra = Map::new();
        if let Some(id) = response.get(&self.id_key) {
            extra.insert(self.id_key.clone(), id.clone());
        }
        extra
    }
}

/// Registers steps that record their invocation order
#[derive(Debug, Clone, Default)]
pub struct StepRecorder {
    calls: Arc<Mutex<Vec<String>>>,
}

impl StepRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, name: &str) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(name.to_string());
    }

    /// Register a step that contributes nothing
    ///
    /// # Panics
    ///
    /// Panics if `name` is not a valid step address
    pub fn register_empty(&self, registry: &mut StepRegistry, name: &str) {
        let recorder = self.clone();
        let address = name.to_string();
        registry
            .register(name, move |_args: &[Value], _ctx: &PipelineContext<'_>| {
                recorder.record(&address);
                Ok(StepOutcome::empty())
            })
            .expect("valid test step address");
    }

    /// Register a step that sets `key` to `value`
    ///
    /// # Panics
    ///
    /// Panics if `name` is not a valid step address
    pub fn register_setting(
        &self,
        registry: &mut StepRegistry,
        name: &str,
        key: &str,
        value: Value,
    ) {
        let recorder = self.clone();
        let address = name.to_string();
        let key = key.to_string();
        registry
            .register(name, move |_args: &[Value], _ctx: &PipelineContext<'_>| {
                recorder.record(&address);
                Ok(StepOutcome::set(&key, value.clone()))
            })
            .expect("valid test step address");
    }

    /// Register a step that saves the partial pipeline and redirects
    ///
    /// # Panics
    ///
    /// Panics if `name` is not a valid step address
    pub fn register_redirect(&self, registry: &mut StepRegistry, name: &str, location: &str) {
        let recorder = self.clone();
        let address = name.to_string();
        let location = location.to_string();
        registry
            .register(name, move |args: &[Value], ctx: &PipelineContext<'_>| {
                recorder.record(&address);
                ctx.strategy()
                    .partial_pipeline()
                    .save(PartialPipeline::from_context(ctx, args).skip_current())
                    .map_err(|err| StepError::Other(err.into()))?;
                Ok(StepOutcome::redirect(&location))
            })
            .expect("valid test step address");
    }

    /// Step addresses in invocation order
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// In-memory partial pipeline store that counts `clear` calls
#[derive(Debug, Default)]
pub struct CountingPartialStore {
    inner: InMemoryPartialPipelineStore,
    clears: AtomicUsize,
}

impl CountingPartialStore {
    #[must_use]
    pub fn clear_count(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

impl PartialPipelineStore for CountingPartialStore {
    fn save(&self, partial: PartialPipeline) -> Result<(), PartialPipelineError> {
        self.inner.save(partial)
    }

    fn load(&self) -> Result<Option<PartialPipeline>, PartialPipelineError> {
        self.inner.load()
    }

    fn clear(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.inner.clear();
    }
}

/// Strategy with mutable settings, request data and pipelines
pub struct MockStrategy {
    settings: RwLock<HashMap<String, Value>>,
    request_data: RwLock<RequestData>,
    pipeline: RwLock<Vec<String>>,
    disconnect_pipeline: RwLock<Vec<String>>,
    steps: StepRegistry,
    storage: InMemoryUserStorage,
    partial: CountingPartialStore,
    request: Option<RequestInfo>,
}

impl MockStrategy {
    /// Strategy running the built-in pipelines against `steps`
    #[must_use]
    pub fn new(steps: StepRegistry) -> Self {
        Self {
            settings: RwLock::new(HashMap::new()),
            request_data: RwLock::new(RequestData::new()),
            pipeline: RwLock::new(crate::pipeline::to_addresses(
                crate::pipeline::DEFAULT_AUTH_PIPELINE,
            )),
            disconnect_pipeline: RwLock::new(crate::pipeline::to_addresses(
                crate::pipeline::DEFAULT_DISCONNECT_PIPELINE,
            )),
            steps,
            storage: InMemoryUserStorage::new(),
            partial: CountingPartialStore::default(),
            request: Some(RequestInfo::new("GET", "/complete/dummy/")),
        }
    }

    pub fn set_setting(&self, name: &str, value: Value) {
        self.settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), value);
    }

    /// Add a parameter to the request data seen by new sessions
    pub fn set_request_value(&self, key: &str, value: Value) {
        self.request_data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
    }

    pub fn set_pipeline(&self, steps: &[&str]) {
        *self.pipeline.write().unwrap_or_else(PoisonError::into_inner) =
            crate::pipeline::to_addresses(steps);
    }

    pub fn set_disconnect_pipeline(&self, steps: &[&str]) {
        *self
            .disconnect_pipeline
            .write()
            .unwrap_or_else(PoisonError::into_inner) = crate::pipeline::to_addresses(steps);
    }

    #[must_use]
    pub fn storage(&self) -> &InMemoryUserStorage {
        &self.storage
    }

    #[must_use]
    pub fn partial_store(&self) -> &CountingPartialStore {
        &self.partial
    }
}

impl Strategy for MockStrategy {
    fn request_data(&self) -> RequestData {
        self.request_data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn request(&self) -> Option<RequestInfo> {
        self.request.clone()
    }

    fn absolute_uri(&self, path: &str) -> String {
        Url::parse(TEST_BASE_URL)
            .and_then(|base| base.join(path))
            .map_or_else(|_| path.to_string(), |uri| uri.to_string())
    }

    fn setting(&self, name: &str) -> Option<Value> {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    fn get_pipeline(&self) -> Vec<String> {
        self.pipeline
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn get_disconnect_pipeline(&self) -> Vec<String> {
        self.disconnect_pipeline
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn steps(&self) -> &StepRegistry {
        &self.steps
    }

    fn user_storage(&self) -> &dyn UserStorage {
        &self.storage
    }

    fn partial_pipeline(&self) -> &dyn PartialPipelineStore {
        &self.partial
    }
}
