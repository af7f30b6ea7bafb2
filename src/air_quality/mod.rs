//! Air quality data providers.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use crate::air_quality::error::ProviderError;
use crate::entity::Coordinates;

pub mod aqicn_provider;
pub mod category;
pub mod error;

/// Pollutants reported individually next to the overall index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Pollutant {
    Pm25,
    Pm10,
    O3,
    Co,
    So2,
    No2,
}

impl Pollutant {
    pub const ALL: [Pollutant; 6] = [
        Pollutant::Pm25,
        Pollutant::Pm10,
        Pollutant::O3,
        Pollutant::Co,
        Pollutant::So2,
        Pollutant::No2,
    ];

    /// Display code, e.g. "PM2.5".
    pub fn code(&self) -> &'static str {
        match self {
            Pollutant::Pm25 => "PM2.5",
            Pollutant::Pm10 => "PM10",
            Pollutant::O3 => "O3",
            Pollutant::Co => "CO",
            Pollutant::So2 => "SO2",
            Pollutant::No2 => "NO2",
        }
    }

    /// Key used by the aqicn.org `iaqi` object.
    pub fn api_key(&self) -> &'static str {
        match self {
            Pollutant::Pm25 => "pm25",
            Pollutant::Pm10 => "pm10",
            Pollutant::O3 => "o3",
            Pollutant::Co => "co",
            Pollutant::So2 => "so2",
            Pollutant::No2 => "no2",
        }
    }
}

impl fmt::Display for Pollutant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Current air quality near a location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AirQualityReading {
    /// Overall index. Stations sometimes report none.
    pub overall_aqi: Option<i32>,
    /// Name of the reporting station/city.
    pub city_name: String,
    /// Station-local timestamp label, as reported.
    pub local_time: String,
    pub pollutants: BTreeMap<Pollutant, f64>,
}

/// Static metadata about a provider.
#[derive(Clone, Debug)]
pub struct ProviderInfo {
    pub name: String,
    /// e.g. https://api.waqi.info
    pub api_url: String,
    /// Credit line shown under reports.
    pub attribution: String,
}

#[derive(Clone, Debug)]
pub struct BaseProvider {
    pub info: ProviderInfo,
}

impl BaseProvider {
    pub fn new(info: ProviderInfo) -> Self {
        Self { info }
    }
}

/// Source of air quality readings.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AirQualityProvider: Send + Sync {
    /// Fetches the current reading nearest to `location`.
    async fn fetch(&self, location: Coordinates) -> Result<AirQualityReading, ProviderError>;

    fn get_base(&self) -> &BaseProvider;
}
