//! Pipeline context threaded through every step
//!
//! The context has a fixed core (strategy, backend, request, `pipeline_index`)
//! and an open set of step-contributed values. Well-known value keys:
//!
//! | key                | contributed by                  |
//! |--------------------|---------------------------------|
//! | `response`         | caller (`authenticate`)         |
//! | `is_new`           | caller, `social.user`, `social.create_user` |
//! | `details`          | `social.details`                |
//! | `uid`              | `social.uid`                    |
//! | `user`             | `social.user`, `social.create_user` |
//! | `social`           | `social.user`, `social.associate_user` |
//! | `new_association`  | `social.user`, `social.associate_user` |
//! | `name`             | `disconnect`                    |
//! | `entries`          | `social.disconnect.get_entries` |

use crate::backends::AuthSession;
use crate::pipeline::StepError;
use crate::strategy::{RequestData, RequestInfo, Strategy, UserStorage};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;

/// Mutable state shared by the steps of one pipeline run
pub struct PipelineContext<'a> {
    strategy: &'a dyn Strategy,
    backend: &'a AuthSession<'a>,
    request: Option<RequestInfo>,
    pipeline_index: usize,
    values: Map<String, Value>,
}

impl<'a> PipelineContext<'a> {
    pub(crate) fn new(
        strategy: &'a dyn Strategy,
        backend: &'a AuthSession<'a>,
        request: Option<RequestInfo>,
        pipeline_index: usize,
        values: Map<String, Value>,
    ) -> Self {
        Self {
            strategy,
            backend,
            request,
            pipeline_index,
            values,
        }
    }

    #[must_use]
    pub fn strategy(&self) -> &'a dyn Strategy {
        self.strategy
    }

    /// The backend session that started this pipeline
    #[must_use]
    pub fn backend(&self) -> &'a AuthSession<'a> {
        self.backend
    }

    #[must_use]
    pub fn request(&self) -> Option<&RequestInfo> {
        self.request.as_ref()
    }

    /// Request parameters captured by the backend session
    #[must_use]
    pub fn request_data(&self) -> &'a RequestData {
        self.backend.data()
    }

    #[must_use]
    pub fn user_storage(&self) -> &'a dyn UserStorage {
        self.strategy.user_storage()
    }

    /// Absolute index of the step currently running
    #[must_use]
    pub fn pipeline_index(&self) -> usize {
        self.pipeline_index
    }

    pub(crate) fn set_pipeline_index(&mut self, index: usize) {
        self.pipeline_index = index;
    }

    #[must_use]
    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    #[must_use]
    pub fn into_values(self) -> Map<String, Value> {
        self.values
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Value for `key`; an explicit `null` reads as absent
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).filter(|value| !value.is_null())
    }

    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(Value::as_bool)
    }

    /// Deserialize the value for `key`
    ///
    /// # Errors
    ///
    /// Returns [`StepError::InvalidValue`] if the value has the wrong shape
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StepError> {
        self.get(key)
            .map(|value| {
                serde_json::from_value(value.clone()).map_err(|source| StepError::InvalidValue {
                    key: key.to_string(),
                    source,
                })
            })
            .transpose()
    }

    /// Value for `key`, failing when it is absent
    ///
    /// # Errors
    ///
    /// Returns [`StepError::MissingValue`] if the key is absent or `null`
    pub fn require(&self, key: &str) -> Result<&Value, StepError> {
        self.get(key)
            .ok_or_else(|| StepError::MissingValue(key.to_string()))
    }

    /// Deserialize a required value
    ///
    /// # Errors
    ///
    /// Returns an error if the value is absent or has the wrong shape
    pub fn require_as<T: DeserializeOwned>(&self, key: &str) -> Result<T, StepError> {
        self.get_as(key)?
            .ok_or_else(|| StepError::MissingValue(key.to_string()))
    }

    pub fn insert(&mut self, key: &str, value: Value) {
        self.values.insert(key.to_string(), value);
    }

    /// Shallow merge: entries in `updates` overwrite existing keys
    pub fn merge(&mut self, updates: Map<String, Value>) {
        self.values.extend(updates);
    }
}

impl fmt::Debug for PipelineContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineContext")
            .field("backend", &self.backend.name())
            .field("request", &self.request)
            .field("pipeline_index", &self.pipeline_index)
            .field("values", &self.values)
            .finish_non_exhaustive()
    }
}
