use std::sync::Arc;

use crate::air_quality::AirQualityProvider;
use crate::air_quality::error::ProviderError;
use crate::config::Config;
use crate::geocode::Geocoder;
use crate::geocode::NominatimGeocoder;
use crate::repository::store::SubscriptionStore;
use crate::service::subscription_service::SubscriptionService;

pub mod error;
pub mod subscription_service;

pub struct Services {
    pub subscription: Arc<SubscriptionService>,
}

impl Services {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        provider: Arc<dyn AirQualityProvider>,
        geocoder: Arc<dyn Geocoder>,
    ) -> Self {
        Self {
            subscription: Arc::new(SubscriptionService::new(store, provider, geocoder)),
        }
    }

    /// Builds the services with a Nominatim geocoder configured from `config`.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn SubscriptionStore>,
        provider: Arc<dyn AirQualityProvider>,
    ) -> Result<Self, ProviderError> {
        let geocoder = NominatimGeocoder::new(
            &config.nominatim_url,
            config.geocode_region.clone(),
            &config.geocode_language,
            config.geocode_limit,
            config.request_timeout,
        )?;
        Ok(Self::new(store, provider, Arc::new(geocoder)))
    }
}
