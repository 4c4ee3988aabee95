//! Partial pipeline state
//!
//! A pipeline halted by a step (typically a redirect to a consent screen or
//! an extra form) is persisted here and resumed on a later request by running
//! the configured pipeline again from `next_index`, seeded with the saved
//! values.

use crate::pipeline::PipelineContext;
use crate::utils::crypto::{
    decrypt_data, derive_encryption_key, encrypt_data, ENCRYPTION_KEY_SIZE,
};
use crate::utils::logging::LoggingHelper;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PartialPipelineError {
    #[error("Partial pipeline sealing failed: {0}")]
    Sealing(String),

    #[error("Partial pipeline token is invalid")]
    InvalidToken,

    #[error("Partial pipeline saved at {saved_at} has expired")]
    Expired { saved_at: DateTime<Utc> },
}

/// Resumption point of a halted pipeline
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PartialPipeline {
    /// Name of the backend whose pipeline was halted
    pub backend: String,
    /// Absolute index of the first step to run on resume
    pub next_index: usize,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub values: Map<String, Value>,
    pub saved_at: DateTime<Utc>,
}

impl PartialPipeline {
    /// Snapshot `ctx` so the current step runs again on resume
    ///
    /// Re-entering the halting step lets it pick up the data the user
    /// submitted on the next request. Call [`Self::skip_current`] when the
    /// step already finished its work before halting.
    #[must_use]
    pub fn from_context(ctx: &PipelineContext<'_>, args: &[Value]) -> Self {
        Self {
            backend: ctx.backend().name().to_string(),
            next_index: ctx.pipeline_index(),
            args: args.to_vec(),
            values: ctx.values().clone(),
            saved_at: Utc::now(),
        }
    }

    /// Resume after the step that was running when the snapshot was taken
    #[must_use]
    pub fn skip_current(mut self) -> Self {
        self.next_index += 1;
        self
    }

    /// Reject state saved more than `max_age` ago
    ///
    /// # Errors
    ///
    /// Returns [`PartialPipelineError::Expired`] when the state is too old
    pub fn check_age(&self, max_age: Duration) -> Result<(), PartialPipelineError> {
        if Utc::now() - self.saved_at > max_age {
            return Err(PartialPipelineError::Expired {
                saved_at: self.saved_at,
            });
        }
        Ok(())
    }

    /// Encrypt into an opaque, URL-safe token (AES-256-GCM)
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or encryption fails
    pub fn seal(&self, key: &[u8; ENCRYPTION_KEY_SIZE]) -> Result<String, PartialPipelineError> {
        encrypt_data(self, key).map_err(|e| PartialPipelineError::Sealing(e.to_string()))
    }

    /// Decrypt a token produced by [`Self::seal`]
    ///
    /// # Errors
    ///
    /// Returns [`PartialPipelineError::InvalidToken`] if the token is
    /// malformed, was sealed with another key or was tampered with
    pub fn open(
        token: &str,
        key: &[u8; ENCRYPTION_KEY_SIZE],
    ) -> Result<Self, PartialPipelineError> {
        decrypt_data(token, key).map_err(|_| PartialPipelineError::InvalidToken)
    }
}

/// Storage for the partial pipeline of the current user agent
///
/// Implementations are responsible for their own locking.
pub trait PartialPipelineStore: Send + Sync {
    /// Persist the resumption point, replacing any previous one
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be persisted
    fn save(&self, partial: PartialPipeline) -> Result<(), PartialPipelineError>;

    /// Load the persisted resumption point, if any
    ///
    /// # Errors
    ///
    /// Returns an error if persisted state exists but cannot be read back
    fn load(&self) -> Result<Option<PartialPipeline>, PartialPipelineError>;

    /// Forget the persisted resumption point
    fn clear(&self);
}

/// Process-local store, one slot
#[derive(Debug, Default)]
pub struct InMemoryPartialPipelineStore {
    slot: Mutex<Option<PartialPipeline>>,
}

impl InMemoryPartialPipelineStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PartialPipelineStore for InMemoryPartialPipelineStore {
    fn save(&self, partial: PartialPipeline) -> Result<(), PartialPipelineError> {
        LoggingHelper::log_partial_pipeline_saved(&partial.backend, partial.next_index);
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(partial);
        Ok(())
    }

    fn load(&self) -> Result<Option<PartialPipeline>, PartialPipelineError> {
        Ok(self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn clear(&self) {
        if self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            LoggingHelper::log_partial_pipeline_cleared();
        }
    }
}

/// Store that keeps the state as an encrypted token
///
/// Suited to cookie or session transport: hand [`Self::token`] to the client
/// and rebuild the store with [`Self::from_token`] on the next request. The
/// client can neither read nor alter the saved values.
#[derive(Debug)]
pub struct SealedTokenPartialPipelineStore {
    key: [u8; ENCRYPTION_KEY_SIZE],
    max_age: Option<Duration>,
    token: Mutex<Option<String>>,
}

impl SealedTokenPartialPipelineStore {
    /// Empty store keyed with `secret`
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        Self::from_token(secret, None)
    }

    /// Store seeded with a token received from the client
    #[must_use]
    pub fn from_token(secret: &[u8], token: Option<String>) -> Self {
        Self {
            key: derive_encryption_key(secret),
            max_age: None,
            token: Mutex::new(token),
        }
    }

    /// Refuse to load state older than `max_age`
    #[must_use]
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Current token, if a pipeline is waiting to be resumed
    #[must_use]
    pub fn token(&self) -> Option<String> {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl PartialPipelineStore for SealedTokenPartialPipelineStore {
    fn save(&self, partial: PartialPipeline) -> Result<(), PartialPipelineError> {
        let token = partial.seal(&self.key)?;
        LoggingHelper::log_partial_pipeline_saved(&partial.backend, partial.next_index);
        *self.token.lock().unwrap_or_else(PoisonError::into_inner) = Some(token);
        Ok(())
    }

    fn load(&self) -> Result<Option<PartialPipeline>, PartialPipelineError> {
        let Some(token) = self.token() else {
            return Ok(None);
        };
        let partial = PartialPipeline::open(&token, &self.key)?;
        if let Some(max_age) = self.max_age {
            partial.check_age(max_age)?;
        }
        Ok(Some(partial))
    }

    fn clear(&self) {
        if self
            .token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            LoggingHelper::log_partial_pipeline_cleared();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    use serde_json::json;

    const SECRET: &[u8] = b"test_key_32_bytes_long_for_test_";

    fn sample() -> PartialPipeline {
        let mut values = Map::new();
        values.insert("uid".to_string(), json!("1001"));
        values.insert(
            "response".to_string(),
            json!({ "access_token": "gho_secret_access_token" }),
        );
        PartialPipeline {
            backend: "github".to_string(),
            next_index: 3,
            args: vec![json!("arg")],
            values,
            saved_at: Utc::now(),
        }
    }

    #[test]
    fn test_skip_current_advances_index() {
        assert_eq!(sample().skip_current().next_index, 4);
    }

    #[test]
    fn test_sealed_token_round_trip() {
        let key = derive_encryption_key(SECRET);
        let partial = sample();
        let token = partial.seal(&key).unwrap();
        assert!(!token.contains('='));
        assert_eq!(PartialPipeline::open(&token, &key).unwrap(), partial);
    }

    #[test]
    fn test_sealed_token_hides_values() {
        let token = sample().seal(&derive_encryption_key(SECRET)).unwrap();
        let raw = URL_SAFE_NO_PAD.decode(&token).unwrap();
        let raw = String::from_utf8_lossy(&raw);
        assert!(!raw.contains("gho_secret_access_token"));
        assert!(!raw.contains("github"));
    }

    #[test]
    fn test_token_sealed_with_other_secret_is_rejected() {
        let token = sample().seal(&derive_encryption_key(SECRET)).unwrap();
        let err = PartialPipeline::open(&token, &derive_encryption_key(b"another_secret"))
            .unwrap_err();
        assert!(matches!(err, PartialPipelineError::InvalidToken));
    }

    #[test]
    fn test_tampered_token_is_rejected() {
        let key = derive_encryption_key(SECRET);
        let token = sample().seal(&key).unwrap();
        let mut raw = URL_SAFE_NO_PAD.decode(&token).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let forged = URL_SAFE_NO_PAD.encode(raw);

        assert!(matches!(
            PartialPipeline::open(&forged, &key),
            Err(PartialPipelineError::InvalidToken)
        ));
    }

    #[test]
    fn test_malformed_token_is_rejected() {
        let key = derive_encryption_key(SECRET);
        for token in ["", "not base64!", "c2hvcnQ"] {
            assert!(matches!(
                PartialPipeline::open(token, &key),
                Err(PartialPipelineError::InvalidToken)
            ));
        }
    }

    #[test]
    fn test_check_age() {
        let mut partial = sample();
        assert!(partial.check_age(Duration::minutes(5)).is_ok());

        partial.saved_at = Utc::now() - Duration::minutes(10);
        assert!(matches!(
            partial.check_age(Duration::minutes(5)),
            Err(PartialPipelineError::Expired { .. })
        ));
    }

    #[test]
    fn test_in_memory_store() {
        let store = InMemoryPartialPipelineStore::new();
        assert!(store.load().unwrap().is_none());

        store.save(sample()).unwrap();
        assert_eq!(store.load().unwrap().unwrap().next_index, 3);

        store.clear();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_sealed_token_store_transport() {
        let store = SealedTokenPartialPipelineStore::new(SECRET);
        store.save(sample()).unwrap();
        let token = store.token().unwrap();

        let next_request = SealedTokenPartialPipelineStore::from_token(SECRET, Some(token));
        assert_eq!(next_request.load().unwrap().unwrap().backend, "github");

        next_request.clear();
        assert!(next_request.token().is_none());
    }

    #[test]
    fn test_sealed_token_store_enforces_max_age() {
        let mut stale = sample();
        stale.saved_at = Utc::now() - Duration::hours(2);
        let token = stale.seal(&derive_encryption_key(SECRET)).unwrap();

        let lenient = SealedTokenPartialPipelineStore::from_token(SECRET, Some(token.clone()));
        assert!(lenient.load().unwrap().is_some());

        let strict = SealedTokenPartialPipelineStore::from_token(SECRET, Some(token))
            .with_max_age(Duration::hours(1));
        assert!(matches!(
            strict.load(),
            Err(PartialPipelineError::Expired { .. })
        ));
    }
}
