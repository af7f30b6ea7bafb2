use std::time::Duration;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DeliveryError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Message to {target} rejected (HTTP {status}): {description}")]
    Rejected {
        target: String,
        status: u16,
        description: String,
    },

    #[error("Delivery timed out after {0:?}.")]
    TimedOut(Duration),

    #[error("Failed to encode request: {0}")]
    EncodeFailed(#[from] serde_json::Error),
}

impl From<reqwest::Error> for DeliveryError {
    fn from(e: reqwest::Error) -> Self {
        DeliveryError::RequestFailed(Box::new(e))
    }
}
