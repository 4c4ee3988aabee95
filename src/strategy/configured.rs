//! Settings-backed strategy
//!
//! Serves configuration from [`SocialSettings`], keeps the request data of
//! the request it was built for and delegates persistence to the user and
//! partial pipeline stores it was given.

use crate::pipeline::{PartialPipelineStore, SealedTokenPartialPipelineStore, StepRegistry};
use crate::settings::SocialSettings;
use crate::strategy::{InMemoryUserStorage, RequestData, RequestInfo, Strategy, UserStorage};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use url::Url;

pub struct ConfiguredStrategy {
    settings: SocialSettings,
    values: HashMap<String, Value>,
    steps: Arc<StepRegistry>,
    storage: Arc<dyn UserStorage>,
    partial: Arc<dyn PartialPipelineStore>,
    request: Option<RequestInfo>,
    request_data: RequestData,
}

impl ConfiguredStrategy {
    /// Strategy with the built-in steps, in-memory user storage and a sealed
    /// token partial pipeline store keyed with the configured secret
    #[must_use]
    pub fn new(settings: SocialSettings) -> Self {
        let partial = sealed_store(&settings, None);
        Self {
            values: settings.to_setting_map(),
            settings,
            steps: Arc::new(StepRegistry::with_defaults()),
            storage: Arc::new(InMemoryUserStorage::new()),
            partial: Arc::new(partial),
            request: None,
            request_data: RequestData::new(),
        }
    }

    #[must_use]
    pub fn with_steps(mut self, steps: Arc<StepRegistry>) -> Self {
        self.steps = steps;
        self
    }

    #[must_use]
    pub fn with_user_storage(mut self, storage: Arc<dyn UserStorage>) -> Self {
        self.storage = storage;
        self
    }

    #[must_use]
    pub fn with_partial_store(mut self, partial: Arc<dyn PartialPipelineStore>) -> Self {
        self.partial = partial;
        self
    }

    /// Resume from the partial pipeline token the client sent back
    #[must_use]
    pub fn with_partial_token(mut self, token: Option<String>) -> Self {
        self.partial = Arc::new(sealed_store(&self.settings, token));
        self
    }

    /// Bind to an inbound request
    #[must_use]
    pub fn with_request(mut self, request: RequestInfo, data: RequestData) -> Self {
        self.request = Some(request);
        self.request_data = data;
        self
    }

    #[must_use]
    pub fn settings(&self) -> &SocialSettings {
        &self.settings
    }
}

fn sealed_store(
    settings: &SocialSettings,
    token: Option<String>,
) -> SealedTokenPartialPipelineStore {
    let store = SealedTokenPartialPipelineStore::from_token(
        settings.pipeline.partial_pipeline_secret.as_bytes(),
        token,
    );
    match max_age(settings.pipeline.partial_pipeline_max_age) {
        Some(max_age) => store.with_max_age(max_age),
        None => store,
    }
}

/// Zero disables the limit
fn max_age(seconds: u64) -> Option<chrono::Duration> {
    i64::try_from(seconds)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .filter(|max_age| !max_age.is_zero())
}

impl Strategy for ConfiguredStrategy {
    fn request_data(&self) -> RequestData {
        self.request_data.clone()
    }

    fn request(&self) -> Option<RequestInfo> {
        self.request.clone()
    }

    /// Join `path` onto `redirect_base_url`; absolute URIs pass through
    fn absolute_uri(&self, path: &str) -> String {
        if Url::parse(path).is_ok() {
            return path.to_string();
        }
        match Url::parse(&self.settings.application.redirect_base_url)
            .and_then(|base| base.join(path))
        {
            Ok(uri) => uri.to_string(),
            Err(err) => {
                log::warn!(
                    "Cannot build absolute URI for {} from {}: {}",
                    path,
                    self.settings.application.redirect_base_url,
                    err
                );
                path.to_string()
            }
        }
    }

    fn setting(&self, name: &str) -> Option<Value> {
        self.values.get(name).cloned()
    }

    fn get_pipeline(&self) -> Vec<String> {
        self.settings.pipeline.authentication.clone()
    }

    fn get_disconnect_pipeline(&self) -> Vec<String> {
        self.settings.pipeline.disconnect.clone()
    }

    fn steps(&self) -> &StepRegistry {
        &self.steps
    }

    fn user_storage(&self) -> &dyn UserStorage {
        self.storage.as_ref()
    }

    fn partial_pipeline(&self) -> &dyn PartialPipelineStore {
        self.partial.as_ref()
    }
}
