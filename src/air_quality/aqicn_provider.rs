//! World Air Quality Index (aqicn.org) integration.

use std::collections::BTreeMap;
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
use serde_json::Value;
use reqwest::Client;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderValue;
use reqwest::header::USER_AGENT;

use crate::air_quality::AirQualityProvider;
use crate::air_quality::AirQualityReading;
use crate::air_quality::BaseProvider;
use crate::air_quality::Pollutant;
use crate::air_quality::ProviderInfo;
use crate::air_quality::error::ProviderError;
use crate::entity::Coordinates;

pub const USER_AGENT_VALUE: &str = "aqi-bot/0.1";

/// Geo feed client for `GET /feed/geo:{lat};{lon}/?token=...`.
pub struct AqicnProvider {
    pub base: BaseProvider,
    client: reqwest::Client,
    api_key: String,
    timeout: Duration,
    limiter: RateLimiter<NotKeyed, InMemoryState, QuantaClock>,
}

impl AqicnProvider {
    pub fn new(api_url: &str, api_key: &str, timeout: Duration) -> Result<Self, ProviderError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        let client = Client::builder().default_headers(headers).build()?;

        let info = ProviderInfo {
            name: "aqicn.org".to_string(),
            api_url: api_url.trim_end_matches('/').to_string(),
            attribution: "Data: World Air Quality Index Project (aqicn.org)".to_string(),
        };

        let limiter = RateLimiter::direct(Quota::per_second(
            NonZeroU32::new(10).unwrap_or(NonZeroU32::MIN),
        ));

        Ok(Self {
            base: BaseProvider::new(info),
            client,
            api_key: api_key.to_string(),
            timeout,
            limiter,
        })
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
        let resp: Value = serde_json::from_str(&body)?;
        Ok(resp)
    }
}

/// Converts a geo feed response body into a reading.
///
/// A `status` other than `"ok"` is an API error. A non-numeric `aqi`
/// (stations report `"-"` when offline) yields `overall_aqi: None`.
pub fn parse_feed_response(resp: &Value) -> Result<AirQualityReading, ProviderError> {
    let status = resp.get("status").and_then(|v| v.as_str()).unwrap_or("");
    if status != "ok" {
        let message = resp
            .get("data")
            .and_then(|v| v.as_str())
            .or_else(|| resp.get("message").and_then(|v| v.as_str()))
            .unwrap_or("Unknown API error")
            .to_string();
        return Err(ProviderError::ApiError { message });
    }

    let data = resp.get("data").ok_or_else(|| ProviderError::MissingField {
        field: "data".to_string(),
    })?;
    if !data.is_object() {
        return Err(ProviderError::MissingField {
            field: "data".to_string(),
        });
    }

    let overall_aqi = data.get("aqi").and_then(parse_index);

    let city_name = data
        .pointer("/city/name")
        .and_then(|v| v.as_str())
        .unwrap_or("Unknown")
        .to_string();
    let local_time = data
        .pointer("/time/s")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let mut pollutants = BTreeMap::new();
    for pollutant in Pollutant::ALL {
        let pointer = format!("/iaqi/{}/v", pollutant.api_key());
        if let Some(value) = data.pointer(&pointer).and_then(|v| v.as_f64()) {
            pollutants.insert(pollutant, value);
        }
    }

    Ok(AirQualityReading {
        overall_aqi,
        city_name,
        local_time,
        pollutants,
    })
}

fn parse_index(value: &Value) -> Option<i32> {
    let aqi = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }?;
    i32::try_from(aqi).ok().filter(|aqi| *aqi >= 0)
}

#[async_trait]
impl AirQualityProvider for AqicnProvider {
    async fn fetch(&self, location: Coordinates) -> Result<AirQualityReading, ProviderError> {
        let url = format!(
            "{}/feed/geo:{};{}/",
            self.base.info.api_url, location.latitude, location.longitude
        );
        let request = self
            .client
            .get(&url)
            .query(&[("token", self.api_key.as_str())]);

        let resp = tokio::time::timeout(self.timeout, self.send_get_json(request))
            .await
            .map_err(|_| ProviderError::TimedOut {
                name: self.base.info.name.clone(),
                timeout: self.timeout,
            })??;

        parse_feed_response(&resp)
    }

    fn get_base(&self) -> &BaseProvider {
        &self.base
    }
}
