#![warn(clippy::pedantic)]
#![warn(clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Pluggable third-party authentication backends driven by a configurable,
//! resumable authentication pipeline.
//!
//! A provider [`AuthBackend`] completes the provider handshake and hands the
//! response to its [`AuthSession`], which runs the configured pipeline of
//! steps to resolve a local user. Configuration, request data, storage and
//! partial pipeline persistence come from the hosting application through a
//! [`Strategy`].

/// Version of the socialrs library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod backends;
pub mod models;
pub mod pipeline;
pub mod settings;
pub mod strategy;
pub mod utils;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

/// Re-export commonly used items
pub use backends::{AuthBackend, AuthSession, BackendError, BackendRegistry};
pub use models::auth::{AuthOutcome, AuthRequest, DisconnectRequest, SocialAuthError};
pub use pipeline::{PipelineContext, PipelineError, StepError, StepOutcome, StepRegistry};
pub use settings::SocialSettings;
pub use strategy::{ConfiguredStrategy, Strategy};
