use crate::air_quality::error::ProviderError;
use crate::entity::ThresholdParseError;
use crate::repository::error::DatabaseError;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ServiceError {
    #[error("Unexpected result: {message}")]
    UnexpectedResult { message: String },

    #[error("Invalid threshold: {0}")]
    InvalidThreshold(#[from] ThresholdParseError),

    #[error("No place found for \"{query}\".")]
    LocationNotFound { query: String },

    #[error("No air quality index available for {location}.")]
    AirQualityUnavailable { location: String },

    #[error("ProviderError: {0}")]
    ProviderError(#[from] ProviderError),

    #[error("DatabaseError: {0}")]
    DatabaseError(#[from] DatabaseError),
}

impl ServiceError {
    /// Short text safe to show to an end user.
    pub fn user_message(&self) -> String {
        match self {
            ServiceError::InvalidThreshold(e) => {
                format!("{} Please enter a whole number, 0 or more.", e)
            }
            ServiceError::LocationNotFound { .. } => {
                "Could not find that place. Try another name or share your location.".to_string()
            }
            ServiceError::AirQualityUnavailable { .. } | ServiceError::ProviderError(_) => {
                "Air quality data is unavailable right now. Please try again later.".to_string()
            }
            _ => "Something went wrong. Please try again later.".to_string(),
        }
    }
}
