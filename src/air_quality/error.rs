use std::time::Duration;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("HTTP status {status} from {name}.")]
    HttpStatus { name: String, status: u16 },

    #[error("Request to {name} timed out after {timeout:?}.")]
    TimedOut { name: String, timeout: Duration },

    #[error("Failed to parse API response: {0}")]
    JsonParseFailed(#[from] serde_json::Error),

    #[error("Invalid data from API: missing field `{field}`.")]
    MissingField { field: String },

    #[error("API error: {message}")]
    ApiError { message: String },
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::RequestFailed(Box::new(e))
    }
}
