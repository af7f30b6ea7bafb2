//! Domain records shared by the repository, the policy and the dispatcher.

use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// A point on the globe in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    /// Returns `None` when either component is out of range or not finite.
    pub fn new(latitude: f64, longitude: f64) -> Option<Self> {
        let coordinates = Self {
            latitude,
            longitude,
        };
        coordinates.is_valid().then_some(coordinates)
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}, {:.4}", self.latitude, self.longitude)
    }
}

/// What a subscriber wants to be alerted about.
///
/// Stored as a non-negative integer where `0` encodes [`AqiThreshold::AnyChange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AqiThreshold {
    /// Alert once the AQI reaches this value.
    Fixed(NonZeroU32),
    /// Alert on every significant change, regardless of level.
    AnyChange,
}

impl AqiThreshold {
    /// A fixed threshold; `None` for zero.
    pub fn fixed(value: u32) -> Option<Self> {
        NonZeroU32::new(value).map(Self::Fixed)
    }

    pub fn from_stored(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::AnyChange),
            v if v > 0 && v <= i32::MAX as i64 => Self::fixed(v as u32),
            _ => None,
        }
    }

    pub fn to_stored(self) -> i64 {
        match self {
            Self::Fixed(v) => v.get() as i64,
            Self::AnyChange => 0,
        }
    }
}

impl fmt::Display for AqiThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(v) => write!(f, "{v}"),
            Self::AnyChange => write!(f, "0"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ThresholdParseError {
    #[error("`{input}` is not a whole number.")]
    NotANumber { input: String },

    #[error("Threshold must not be negative (got {value}).")]
    Negative { value: i64 },

    #[error("Threshold {value} is too large.")]
    TooLarge { value: i64 },
}

/// Parses user input: a whole number, `0` meaning "any significant change".
impl FromStr for AqiThreshold {
    type Err = ThresholdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        let value = input
            .parse::<i64>()
            .map_err(|_| ThresholdParseError::NotANumber {
                input: input.to_string(),
            })?;
        if value < 0 {
            return Err(ThresholdParseError::Negative { value });
        }
        Self::from_stored(value).ok_or(ThresholdParseError::TooLarge { value })
    }
}

/// A notification that was claimed before sending and is not yet confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingNotification {
    pub aqi: i32,
    /// Unique per send attempt.
    pub key: String,
}

/// A subscriber's monitored location and alert preferences.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionModel {
    pub subscriber_id: i64,
    /// Chat the notifications are sent to.
    pub delivery_target: String,
    pub location: Coordinates,
    pub location_name: String,
    pub threshold: AqiThreshold,
    /// AQI included in the last delivered notification.
    pub last_notified_aqi: Option<i32>,
    pub pending: Option<PendingNotification>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SubscriptionModel {
    /// Human readable location used in logs and messages.
    pub fn location_label(&self) -> String {
        if self.location_name.trim().is_empty() {
            self.location.to_string()
        } else {
            self.location_name.clone()
        }
    }
}

/// Input for creating or replacing a subscription.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewSubscription {
    pub subscriber_id: i64,
    pub delivery_target: String,
    pub location: Coordinates,
    pub location_name: String,
    pub threshold: AqiThreshold,
}
