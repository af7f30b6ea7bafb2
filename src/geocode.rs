//! Place name to coordinates lookup (OpenStreetMap Nominatim).

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use governor::Quota;
use governor::RateLimiter;
use governor::clock::QuantaClock;
use governor::state::InMemoryState;
use governor::state::direct::NotKeyed;
use log::debug;
use log::info;
use log::warn;
use serde_json::Value;
use reqwest::Client;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderValue;
use reqwest::header::USER_AGENT;

use crate::air_quality::BaseProvider;
use crate::air_quality::ProviderInfo;
use crate::air_quality::aqicn_provider::USER_AGENT_VALUE;
use crate::air_quality::error::ProviderError;
use crate::entity::Coordinates;

#[derive(Debug, Clone, PartialEq)]
pub struct GeocodedPlace {
    pub coordinates: Coordinates,
    pub display_name: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Ranked matches for a free-text place name. Empty when nothing matched.
    async fn geocode(&self, query: &str) -> Result<Vec<GeocodedPlace>, ProviderError>;
}

pub struct NominatimGeocoder {
    pub base: BaseProvider,
    client: reqwest::Client,
    region: Option<String>,
    language: String,
    limit: u32,
    timeout: Duration,
    limiter: RateLimiter<NotKeyed, InMemoryState, QuantaClock>,
}

impl NominatimGeocoder {
    pub fn new(
        api_url: &str,
        region: Option<String>,
        language: &str,
        limit: u32,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        // Nominatim rejects requests without an identifying User-Agent.
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        let client = Client::builder().default_headers(headers).build()?;

        let info = ProviderInfo {
            name: "Nominatim".to_string(),
            api_url: api_url.trim_end_matches('/').to_string(),
            attribution: "Data © OpenStreetMap contributors".to_string(),
        };

        // https://operations.osmfoundation.org/policies/nominatim/ allows 1 request per second
        let limiter = RateLimiter::direct(Quota::per_second(NonZeroU32::MIN));

        Ok(Self {
            base: BaseProvider::new(info),
            client,
            region,
            language: language.to_string(),
            limit: limit.max(1),
            timeout,
            limiter,
        })
    }

    fn build_query(&self, query: &str) -> String {
        match &self.region {
            Some(region) => format!("{}, {}", query, region),
            None => query.to_string(),
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, reqwest::Error> {
        if self.limiter.check().is_err() {
            info!("Provider {} is ratelimited. Waiting...", self.base.info.name);
        }
        self.limiter.until_ready().await;

        let req = request.build()?;
        debug!("Making request to: {}", req.url().path());
        self.client.execute(req).await
    }

    async fn send_get_json(&self, request: reqwest::RequestBuilder) -> Result<Value, ProviderError> {
        let response = self.send(request).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::HttpStatus {
                name: self.base.info.name.clone(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

/// Parses a `format=json` search response. Entries with unusable
/// coordinates are skipped.
pub fn parse_search_response(resp: &Value) -> Result<Vec<GeocodedPlace>, ProviderError> {
    let items = resp.as_array().ok_or_else(|| ProviderError::MissingField {
        field: "[]".to_string(),
    })?;

    let mut places = Vec::with_capacity(items.len());
    for item in items {
        let latitude = item.get("lat").and_then(parse_degrees);
        let longitude = item.get("lon").and_then(parse_degrees);
        let coordinates = match (latitude, longitude) {
            (Some(lat), Some(lon)) => Coordinates::new(lat, lon),
            _ => None,
        };
        let Some(coordinates) = coordinates else {
            warn!("Skipping geocoding result with invalid coordinates: {}", item);
            continue;
        };

        let display_name = item
            .get("display_name")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| coordinates.to_string());

        places.push(GeocodedPlace {
            coordinates,
            display_name,
        });
    }
    Ok(places)
}

fn parse_degrees(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn geocode(&self, query: &str) -> Result<Vec<GeocodedPlace>, ProviderError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let limit = self.limit.to_string();
        let q = self.build_query(query);
        let request = self
            .client
            .get(format!("{}/search", self.base.info.api_url))
            .query(&[
                ("q", q.as_str()),
                ("format", "json"),
                ("limit", limit.as_str()),
                ("addressdetails", "0"),
                ("accept-language", self.language.as_str()),
            ]);

        let resp = tokio::time::timeout(self.timeout, self.send_get_json(request))
            .await
            .map_err(|_| ProviderError::TimedOut {
                name: self.base.info.name.clone(),
                timeout: self.timeout,
            })??;

        let mut places = parse_search_response(&resp)?;
        places.truncate(self.limit as usize);
        if places.is_empty() {
            info!("No geocoding results for \"{}\"", query);
        }
        Ok(places)
    }
}
