//! Subscriber-facing actions: subscribe, unsubscribe, inspect, and on-demand reports.

use std::sync::Arc;

use log::debug;
use log::info;
use log::warn;

use crate::air_quality::AirQualityProvider;
use crate::air_quality::AirQualityReading;
use crate::conversation::SubscribeEvent;
use crate::conversation::SubscribeFlow;
use crate::conversation::SubscribeState;
use crate::conversation::Transition;
use crate::delivery::message_builder;
use crate::entity::AqiThreshold;
use crate::entity::Coordinates;
use crate::entity::NewSubscription;
use crate::entity::SubscriptionModel;
use crate::geocode::GeocodedPlace;
use crate::geocode::Geocoder;
use crate::repository::store::SubscriptionStore;
use crate::service::error::ServiceError;

#[derive(Debug, Clone, PartialEq)]
pub enum SubscribeResult {
    Created(SubscriptionModel),
    /// An existing subscription was replaced; its notification history is reset.
    Replaced(SubscriptionModel),
}

impl SubscribeResult {
    pub fn subscription(&self) -> &SubscriptionModel {
        match self {
            SubscribeResult::Created(s) | SubscribeResult::Replaced(s) => s,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsubscribeResult {
    Removed,
    NotSubscribed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlaceResolution {
    Resolved(GeocodedPlace),
    /// Several matches; the caller lets the user pick one.
    Ambiguous(Vec<GeocodedPlace>),
}

/// Input accepted while a subscribe dialogue is open.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscribeInput {
    /// A shared pin or a place chosen from a candidate list.
    Location {
        coordinates: Coordinates,
        name: Option<String>,
    },
    Text(String),
    Cancel,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubscribeStep {
    Continue(Transition),
    ChooseLocation(Vec<GeocodedPlace>),
    /// Location accepted. `current_aqi` is `None` when no reading was available.
    AskThreshold {
        location_name: String,
        current_aqi: Option<i32>,
    },
    Subscribed(SubscribeResult),
}

pub struct SubscriptionService {
    pub store: Arc<dyn SubscriptionStore>,
    pub provider: Arc<dyn AirQualityProvider>,
    pub geocoder: Arc<dyn Geocoder>,
}

impl SubscriptionService {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        provider: Arc<dyn AirQualityProvider>,
        geocoder: Arc<dyn Geocoder>,
    ) -> Self {
        Self {
            store,
            provider,
            geocoder,
        }
    }

    /// Creates or replaces the subscriber's subscription.
    ///
    /// # Performance
    /// * DB calls: 3
    pub async fn subscribe(
        &self,
        subscription: &NewSubscription,
    ) -> Result<SubscribeResult, ServiceError> {
        let existed = self.store.get(subscription.subscriber_id).await?.is_some();
        self.store.upsert(subscription).await?;

        let stored = self
            .store
            .get(subscription.subscriber_id)
            .await?
            .ok_or_else(|| ServiceError::UnexpectedResult {
                message: format!(
                    "Subscription {} missing right after upsert.",
                    subscription.subscriber_id
                ),
            })?;

        info!(
            "Subscriber {} subscribed to {} (threshold {})",
            stored.subscriber_id,
            stored.location_label(),
            stored.threshold
        );
        Ok(if existed {
            SubscribeResult::Replaced(stored)
        } else {
            SubscribeResult::Created(stored)
        })
    }

    /// Non-interactive subscribe from raw threshold text.
    pub async fn subscribe_with_threshold_text(
        &self,
        subscriber_id: i64,
        delivery_target: &str,
        location: Coordinates,
        location_name: &str,
        threshold: &str,
    ) -> Result<SubscribeResult, ServiceError> {
        let threshold: AqiThreshold = threshold.parse()?;
        self.subscribe(&NewSubscription {
            subscriber_id,
            delivery_target: delivery_target.to_string(),
            location,
            location_name: location_name.to_string(),
            threshold,
        })
        .await
    }

    /// # Performance
    /// * DB calls: 1
    pub async fn unsubscribe(&self, subscriber_id: i64) -> Result<UnsubscribeResult, ServiceError> {
        if self.store.remove(subscriber_id).await? {
            info!("Subscriber {} unsubscribed", subscriber_id);
            Ok(UnsubscribeResult::Removed)
        } else {
            Ok(UnsubscribeResult::NotSubscribed)
        }
    }

    pub async fn get_subscription(
        &self,
        subscriber_id: i64,
    ) -> Result<Option<SubscriptionModel>, ServiceError> {
        Ok(self.store.get(subscriber_id).await?)
    }

    /// Summary text for the "my subscription" view, `None` when not subscribed.
    pub async fn describe_subscription(
        &self,
        subscriber_id: i64,
    ) -> Result<Option<String>, ServiceError> {
        Ok(self
            .get_subscription(subscriber_id)
            .await?
            .map(|s| message_builder::subscription_summary(&s)))
    }

    /// Stops notifications without losing the subscription. `false` when not subscribed.
    pub async fn pause(&self, subscriber_id: i64) -> Result<bool, ServiceError> {
        Ok(self.store.set_active(subscriber_id, false).await?)
    }

    pub async fn resume(&self, subscriber_id: i64) -> Result<bool, ServiceError> {
        Ok(self.store.set_active(subscriber_id, true).await?)
    }

    pub async fn current_air_quality(
        &self,
        location: Coordinates,
    ) -> Result<AirQualityReading, ServiceError> {
        Ok(self.provider.fetch(location).await?)
    }

    /// Overall AQI only; fails when the station reports none.
    pub async fn current_aqi(&self, location: Coordinates) -> Result<i32, ServiceError> {
        let reading = self.current_air_quality(location).await?;
        reading
            .overall_aqi
            .ok_or_else(|| ServiceError::AirQualityUnavailable {
                location: location.to_string(),
            })
    }

    /// Formatted report for a location.
    pub async fn air_quality_report(
        &self,
        location: Coordinates,
        location_name: Option<&str>,
    ) -> Result<String, ServiceError> {
        let reading = self.current_air_quality(location).await?;
        let label = match location_name {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => reading.city_name.clone(),
        };
        let attribution = &self.provider.get_base().info.attribution;
        Ok(message_builder::report_message(
            &label,
            &reading,
            attribution,
        ))
    }

    /// Resolves a free-text place name.
    pub async fn resolve_place(&self, query: &str) -> Result<PlaceResolution, ServiceError> {
        let mut places = self.geocoder.geocode(query).await?;
        debug!("Geocoded \"{}\" to {} place(s)", query, places.len());
        match places.len() {
            0 => Err(ServiceError::LocationNotFound {
                query: query.to_string(),
            }),
            1 => Ok(PlaceResolution::Resolved(places.remove(0))),
            _ => Ok(PlaceResolution::Ambiguous(places)),
        }
    }

    /// Feeds one user input into an open subscribe dialogue. Stores the
    /// subscription once the dialogue completes.
    pub async fn advance_subscribe_flow(
        &self,
        flow: &mut SubscribeFlow,
        input: SubscribeInput,
    ) -> Result<SubscribeStep, ServiceError> {
        let event = match input {
            SubscribeInput::Cancel => SubscribeEvent::Cancel,
            SubscribeInput::Location { coordinates, name } => SubscribeEvent::Location {
                coordinates,
                name: name.unwrap_or_default(),
            },
            SubscribeInput::Text(text) if flow.state() == &SubscribeState::AwaitingLocation => {
                match self.resolve_place(&text).await {
                    Ok(PlaceResolution::Resolved(place)) => SubscribeEvent::Location {
                        coordinates: place.coordinates,
                        name: place.display_name,
                    },
                    Ok(PlaceResolution::Ambiguous(places)) => {
                        return Ok(SubscribeStep::ChooseLocation(places));
                    }
                    Err(ServiceError::LocationNotFound { .. }) => SubscribeEvent::LocationNotFound,
                    Err(e) => return Err(e),
                }
            }
            SubscribeInput::Text(text) => SubscribeEvent::ThresholdText(text),
        };

        match flow.handle(event) {
            Transition::Completed(subscription) => Ok(SubscribeStep::Subscribed(
                self.subscribe(&subscription).await?,
            )),
            Transition::AskThreshold { location_name } => {
                let current_aqi = match flow.state() {
                    SubscribeState::AwaitingThreshold { location, .. } => {
                        match self.current_aqi(*location).await {
                            Ok(aqi) => Some(aqi),
                            Err(e) => {
                                warn!("Current AQI unavailable for {}: {}", location_name, e);
                                None
                            }
                        }
                    }
                    _ => None,
                };
                Ok(SubscribeStep::AskThreshold {
                    location_name,
                    current_aqi,
                })
            }
            other => Ok(SubscribeStep::Continue(other)),
        }
    }
}
