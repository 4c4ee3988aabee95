//! Backend error types

use thiserror::Error;

/// Errors raised by provider backends and their HTTP helpers
#[derive(Debug, Error)]
pub enum BackendError {
    /// A provider-specific operation that this backend does not supply
    #[error("{0} must be implemented by the provider backend")]
    NotImplemented(&'static str),

    /// Transport failure, timeout or non-success status
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with something we cannot interpret
    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The provider reported an error on the callback
    #[error("Provider error: {0}")]
    Provider(String),
}

impl From<serde_json::Error> for BackendError {
    fn from(error: serde_json::Error) -> Self {
        BackendError::InvalidResponse(error.to_string())
    }
}

impl From<url::ParseError> for BackendError {
    fn from(error: url::ParseError) -> Self {
        BackendError::Configuration(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            BackendError::NotImplemented("auth_url").to_string(),
            "auth_url must be implemented by the provider backend"
        );
        assert_eq!(
            BackendError::Provider("access_denied".to_string()).to_string(),
            "Provider error: access_denied"
        );
    }

    #[test]
    fn test_json_error_is_invalid_response() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(BackendError::from(err), BackendError::InvalidResponse(_)));
    }
}
