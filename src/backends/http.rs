//! Outbound HTTP helpers for provider backends
//!
//! Every call applies the configured timeout (`REQUESTS_TIMEOUT`, falling
//! back to `URLOPEN_TIMEOUT`, in seconds) and turns non-success statuses into
//! errors.

use crate::backends::{AuthSession, BackendError};
use crate::utils::logging::LoggingHelper;
use reqwest::Method;
use serde_json::{Map, Value};
use std::time::Duration;

/// Options of a single provider request
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub params: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub form: Option<Vec<(String, String)>>,
    pub json: Option<Value>,
    pub bearer_token: Option<String>,
    /// Overrides the configured timeout
    pub timeout: Option<Duration>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            params: Vec::new(),
            headers: Vec::new(),
            form: None,
            json: None,
            bearer_token: None,
            timeout: None,
        }
    }
}

impl RequestOptions {
    #[must_use]
    pub fn get() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn post() -> Self {
        Self {
            method: Method::POST,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn param(mut self, key: &str, value: &str) -> Self {
        self.params.push((key.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.headers.push((key.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn form_field(mut self, key: &str, value: &str) -> Self {
        self.form
            .get_or_insert_with(Vec::new)
            .push((key.to_string(), value.to_string()));
        self
    }

    #[must_use]
    pub fn json(mut self, body: Value) -> Self {
        self.json = Some(body);
        self
    }

    #[must_use]
    pub fn bearer(mut self, token: &str) -> Self {
        self.bearer_token = Some(token.to_string());
        self
    }
}

/// Positive, finite seconds; anything else counts as unset
fn seconds(value: &Value) -> Option<Duration> {
    let secs = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    if secs > 0.0 {
        Duration::try_from_secs_f64(secs).ok()
    } else {
        None
    }
}

impl AuthSession<'_> {
    /// Configured outbound timeout; a zero or missing value means none
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.setting("REQUESTS_TIMEOUT")
            .as_ref()
            .and_then(seconds)
            .or_else(|| self.setting("URLOPEN_TIMEOUT").as_ref().and_then(seconds))
    }

    fn user_agent(&self) -> String {
        match self.setting("USER_AGENT") {
            Some(Value::String(agent)) if !agent.is_empty() => agent,
            _ => format!("socialrs-{}", crate::VERSION),
        }
    }

    /// Send a request to the provider
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Http`] on transport failure, timeout or a
    /// non-success status
    pub async fn request(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<reqwest::Response, BackendError> {
        let timeout = options.timeout.or_else(|| self.request_timeout());
        LoggingHelper::log_http_request(options.method.as_str(), url, timeout);

        let mut builder = self
            .http_client()
            .request(options.method, url)
            .header(reqwest::header::USER_AGENT, self.user_agent());
        if !options.params.is_empty() {
            builder = builder.query(&options.params);
        }
        for (key, value) in &options.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(token) = &options.bearer_token {
            builder = builder.bearer_auth(token);
        }
        if let Some(form) = &options.form {
            builder = builder.form(form);
        }
        if let Some(body) = &options.json {
            builder = builder.json(body);
        }
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await?;
        Ok(response.error_for_status()?)
    }

    /// Send a request and decode the JSON body
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body is not JSON
    pub async fn get_json(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<Value, BackendError> {
        let body = self.request(url, options).await?.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Send a request and decode an `application/x-www-form-urlencoded` body
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails
    pub async fn get_querystring(
        &self,
        url: &str,
        options: RequestOptions,
    ) -> Result<Map<String, Value>, BackendError> {
        let body = self.request(url, options).await?.text().await?;
        Ok(url::form_urlencoded::parse(body.as_bytes())
            .map(|(key, value)| (key.into_owned(), Value::String(value.into_owned())))
            .collect())
    }
}
