//! Provider error types.

use thiserror::Error;

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors that can occur during provider operations.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// HTTP request failed.
    #[error("Request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Invalid API response.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Model not found in the registry, with closest matches.
    #[error("Model not found: {provider}/{model}")]
    ModelNotFound {
        provider: String,
        model: String,
        suggestions: Vec<String>,
    },

    /// Backend driver construction failed; the provider is dropped.
    #[error("Provider init failed ({provider}): {cause}")]
    ProviderInit { provider: String, cause: String },

    /// Missing API key.
    #[error("Missing API key for provider: {0}")]
    MissingApiKey(String),

    /// Upstream returned an error status.
    #[error("Upstream HTTP {status}: {body}")]
    UpstreamHttp { status: u16, body: String },

    /// External cancellation signal fired.
    #[error("Request cancelled")]
    Cancelled,

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Internal provider error.
    #[error("Provider error: {message}")]
    Internal { message: String },
}

impl ProviderError {
    /// Create a model-not-found error.
    pub fn model_not_found(
        provider: impl Into<String>,
        model: impl Into<String>,
        suggestions: Vec<String>,
    ) -> Self {
        Self::ModelNotFound {
            provider: provider.into(),
            model: model.into(),
            suggestions,
        }
    }

    /// Create a provider-init error.
    pub fn provider_init(provider: impl Into<String>, cause: impl Into<String>) -> Self {
        Self::ProviderInit {
            provider: provider.into(),
            cause: cause.into(),
        }
    }

    /// Create an invalid response error.
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create an upstream HTTP error.
    pub fn upstream(status: u16, body: impl Into<String>) -> Self {
        Self::UpstreamHttp {
            status,
            body: body.into(),
        }
    }

    /// Whether a retry could succeed. Retry policy itself belongs to the
    /// caller; this only classifies.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::UpstreamHttp { status, .. } => *status >= 500 || *status == 429,
            ProviderError::RequestFailed(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability() {
        assert!(ProviderError::upstream(500, "oops").is_retryable());
        assert!(ProviderError::upstream(503, "oops").is_retryable());
        assert!(ProviderError::upstream(429, "slow down").is_retryable());
        assert!(!ProviderError::upstream(400, "bad").is_retryable());
        assert!(!ProviderError::upstream(401, "no").is_retryable());
        assert!(!ProviderError::Cancelled.is_retryable());
        assert!(!ProviderError::model_not_found("p", "m", vec![]).is_retryable());
    }

    #[test]
    fn test_display() {
        let err = ProviderError::model_not_found("ollama", "qwen", vec!["ollama/qwen2.5:latest".into()]);
        assert_eq!(err.to_string(), "Model not found: ollama/qwen");

        let err = ProviderError::provider_init("bedrock", "missing region");
        assert_eq!(err.to_string(), "Provider init failed (bedrock): missing region");
    }
}
