//! Chat-agnostic state machine for the interactive subscribe dialogue.
//!
//! ```text
//! AwaitingLocation --Location--> AwaitingThreshold --valid threshold--> Completed
//!        |                              |
//!        +-----------Cancel-------------+----------------------------> Cancelled
//! ```

use crate::entity::AqiThreshold;
use crate::entity::Coordinates;
use crate::entity::NewSubscription;
use crate::entity::ThresholdParseError;

#[derive(Debug, Clone, PartialEq)]
pub enum SubscribeState {
    AwaitingLocation,
    AwaitingThreshold {
        location: Coordinates,
        location_name: String,
    },
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubscribeEvent {
    /// A resolved location (shared pin or geocoded place).
    Location {
        coordinates: Coordinates,
        name: String,
    },
    /// Place lookup for the user's text found nothing.
    LocationNotFound,
    /// Raw threshold input.
    ThresholdText(String),
    Cancel,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Ask (again) for a location.
    AskLocation,
    AskThreshold { location_name: String },
    /// Threshold input was rejected; still awaiting a threshold.
    InvalidThreshold(ThresholdParseError),
    /// Dialogue finished; the subscription is ready to be stored.
    Completed(NewSubscription),
    Cancelled,
    /// Event does not apply to the current state.
    Ignored,
}

#[derive(Debug, Clone)]
pub struct SubscribeFlow {
    subscriber_id: i64,
    delivery_target: String,
    state: SubscribeState,
}

impl SubscribeFlow {
    pub fn new(subscriber_id: i64, delivery_target: impl Into<String>) -> Self {
        Self {
            subscriber_id,
            delivery_target: delivery_target.into(),
            state: SubscribeState::AwaitingLocation,
        }
    }

    pub fn subscriber_id(&self) -> i64 {
        self.subscriber_id
    }

    pub fn state(&self) -> &SubscribeState {
        &self.state
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.state,
            SubscribeState::Completed | SubscribeState::Cancelled
        )
    }

    pub fn handle(&mut self, event: SubscribeEvent) -> Transition {
        if self.is_finished() {
            return Transition::Ignored;
        }
        if event == SubscribeEvent::Cancel {
            self.state = SubscribeState::Cancelled;
            return Transition::Cancelled;
        }

        match (&self.state, event) {
            (SubscribeState::AwaitingLocation, SubscribeEvent::Location { coordinates, name }) => {
                let location_name = if name.trim().is_empty() {
                    coordinates.to_string()
                } else {
                    name
                };
                self.state = SubscribeState::AwaitingThreshold {
                    location: coordinates,
                    location_name: location_name.clone(),
                };
                Transition::AskThreshold { location_name }
            }
            (SubscribeState::AwaitingLocation, SubscribeEvent::LocationNotFound) => {
                Transition::AskLocation
            }
            (
                SubscribeState::AwaitingThreshold {
                    location,
                    location_name,
                },
                SubscribeEvent::ThresholdText(text),
            ) => match text.parse::<AqiThreshold>() {
                Ok(threshold) => {
                    let subscription = NewSubscription {
                        subscriber_id: self.subscriber_id,
                        delivery_target: self.delivery_target.clone(),
                        location: *location,
                        location_name: location_name.clone(),
                        threshold,
                    };
                    self.state = SubscribeState::Completed;
                    Transition::Completed(subscription)
                }
                Err(e) => Transition::InvalidThreshold(e),
            },
            _ => Transition::Ignored,
        }
    }
}
