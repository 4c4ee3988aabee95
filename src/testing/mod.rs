//! Testing utilities for socialrs
//!
//! Shared fixtures and mocks for the unit tests and, behind the `testing`
//! feature, for integration tests.
//!
//! ## Organization
//!
//! - [`fixtures`] - Pre-built strategies, sessions, settings and users
//! - [`mock`] - Mock backend, strategy and partial pipeline store
//!
//! ## Usage
//!
//! ```ignore
//! use socialrs::models::auth::AuthRequest;
//! use socialrs::testing::{mock::DummyBackend, TestFixtures};
//!
//! let strategy = TestFixtures::strategy();
//! let backend = DummyBackend::new();
//! let session = TestFixtures::session(&backend, &strategy);
//!
//! let outcome = session
//!     .authenticate(AuthRequest::new("dummy", TestFixtures::provider_response()))
//!     .unwrap();
//! assert!(outcome.into_user().is_some());
//! ```

pub mod fixtures;
pub mod mock;

pub use fixtures::TestFixtures;

/// Common test constants
pub mod constants {
    /// Default test email address
    pub const TEST_EMAIL: &str = "test@example.com";

    /// Default test username
    pub const TEST_USERNAME: &str = "testuser";

    /// Default provider-side user id
    pub const TEST_UID: &str = "123456789";

    /// Name of the mock provider backend
    pub const TEST_PROVIDER: &str = "dummy";

    /// Base URL the mock strategy builds absolute URIs from
    pub const TEST_BASE_URL: &str = "https://app.example.com";

    /// Authorization endpoint of the mock provider
    pub const TEST_AUTHORIZE_URL: &str = "https://provider.example.com/authorize";

    /// Partial pipeline token secret (256 bits)
    pub const TEST_PARTIAL_SECRET: &[u8] = b"test_key_32_bytes_long_for_test_";
}
