//! Test fixtures providing pre-built test objects
//!
//! Strategies, sessions and settings shared by unit and integration tests.

use crate::backends::AuthSession;
use crate::pipeline::{PartialPipeline, StepRegistry};
use crate::settings::{ProviderSettings, SocialSettings};
use crate::strategy::{ConfiguredStrategy, UserStorage};
use serde_json::{json, Map, Value};
use std::sync::OnceLock;

use super::constants::{
    TEST_BASE_URL, TEST_EMAIL, TEST_PARTIAL_SECRET, TEST_PROVIDER, TEST_UID, TEST_USERNAME,
};
use super::mock::{DummyBackend, MockStrategy};

/// Central fixture provider for all test data
pub struct TestFixtures;

impl TestFixtures {
    /// Mock strategy with the built-in steps registered
    #[must_use]
    pub fn strategy() -> MockStrategy {
        MockStrategy::new(StepRegistry::with_defaults())
    }

    /// Mock strategy resolving steps from `registry` only
    #[must_use]
    pub fn strategy_with_registry(registry: StepRegistry) -> MockStrategy {
        MockStrategy::new(registry)
    }

    /// Session without a redirect URI
    #[must_use]
    pub fn session<'a>(backend: &'a DummyBackend, strategy: &'a MockStrategy) -> AuthSession<'a> {
        AuthSession::new(backend, strategy, None)
    }

    /// Provider response for the default test user
    #[must_use]
    pub fn provider_response() -> Value {
        json!({
            "id": TEST_UID,
            "username": TEST_USERNAME,
            "email": TEST_EMAIL,
            "first_name": "Test",
            "last_name": "User",
            "fullname": "Test User",
        })
    }

    /// Settings with one enabled `dummy` provider
    #[must_use]
    pub fn settings() -> SocialSettings {
        static SETTINGS: OnceLock<SocialSettings> = OnceLock::new();
        SETTINGS
            .get_or_init(|| {
                let mut settings = SocialSettings::default();
                settings.application.redirect_base_url = TEST_BASE_URL.to_string();
                settings.pipeline.partial_pipeline_secret =
                    String::from_utf8_lossy(TEST_PARTIAL_SECRET).into_owned();
                settings.providers.push(ProviderSettings {
                    name: TEST_PROVIDER.to_string(),
                    enabled: true,
                    key: Some("test-client-id".to_string()),
                    secret: Some("test-client-secret".to_string()),
                    ..Default::default()
                });
                settings
            })
            .clone()
    }

    /// Settings-backed strategy built from [`Self::settings`]
    #[must_use]
    pub fn configured_strategy() -> ConfiguredStrategy {
        ConfiguredStrategy::new(Self::settings())
    }

    /// Store a user with one `dummy` association and return its JSON form
    ///
    /// # Panics
    ///
    /// Panics if the storage rejects the user
    #[must_use]
    pub fn associated_user(storage: &dyn UserStorage, username: &str, uid: &str) -> Value {
        let user = storage
            .create_user(username, Some(TEST_EMAIL))
            .expect("create test user");
        storage
            .create_social_auth(&user, uid, TEST_PROVIDER)
            .expect("associate test user");
        serde_json::to_value(&user).expect("serialize test user")
    }

    /// Partial pipeline for the `dummy` backend
    #[must_use]
    pub fn partial_pipeline(next_index: usize, values: Map<String, Value>) -> PartialPipeline {
        PartialPipeline {
            backend: TEST_PROVIDER.to_string(),
            next_index,
            args: Vec::new(),
            values,
            saved_at: chrono::Utc::now(),
        }
    }
}
