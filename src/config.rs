//! Environment-based configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

pub const DEFAULT_AQICN_API_URL: &str = "https://api.waqi.info";
pub const DEFAULT_TELEGRAM_API_URL: &str = "https://api.telegram.org";
pub const DEFAULT_NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org";

#[derive(Clone, Debug)]
pub struct Config {
    pub telegram_token: String,
    pub aqicn_api_key: String,
    pub db_url: String,
    pub db_path: String,
    pub logs_path: PathBuf,
    /// Time between two notification cycles.
    pub poll_interval: Duration,
    /// Delay before the first cycle after startup.
    pub poll_initial_delay: Duration,
    /// Upper bound for a single provider or delivery call.
    pub request_timeout: Duration,
    pub max_concurrent_checks: usize,
    pub geocode_limit: u32,
    /// Appended to every geocoding query, e.g. "Bishkek".
    pub geocode_region: Option<String>,
    /// `accept-language` sent to the geocoder.
    pub geocode_language: String,
    pub aqicn_api_url: String,
    pub telegram_api_url: String,
    pub nominatim_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            telegram_token: String::new(),
            aqicn_api_key: String::new(),
            db_url: "sqlite://data/subscriptions.db".to_string(),
            db_path: "data/subscriptions.db".to_string(),
            logs_path: PathBuf::from("logs"),
            poll_interval: Duration::from_secs(1800),
            poll_initial_delay: Duration::from_secs(60),
            request_timeout: Duration::from_secs(10),
            max_concurrent_checks: 4,
            geocode_limit: 5,
            geocode_region: None,
            geocode_language: "en".to_string(),
            aqicn_api_url: DEFAULT_AQICN_API_URL.to_string(),
            telegram_api_url: DEFAULT_TELEGRAM_API_URL.to_string(),
            nominatim_url: DEFAULT_NOMINATIM_URL.to_string(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides defaults with values from the process environment.
    ///
    /// `TELEGRAM_BOT_TOKEN` and `AQICN_API_KEY` are required.
    pub fn load(&mut self) -> Result<(), AppError> {
        self.telegram_token = required("TELEGRAM_BOT_TOKEN")?;
        self.aqicn_api_key = required("AQICN_API_KEY")?;

        if let Some(v) = optional("DB_URL") {
            self.db_url = v;
        }
        if let Some(v) = optional("DB_PATH") {
            self.db_path = v;
        }
        if let Some(v) = optional("LOGS_PATH") {
            self.logs_path = PathBuf::from(v);
        }
        if let Some(secs) = parsed::<u64>("POLL_INTERVAL")? {
            self.poll_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = parsed::<u64>("POLL_INITIAL_DELAY")? {
            self.poll_initial_delay = Duration::from_secs(secs);
        }
        if let Some(secs) = parsed::<u64>("REQUEST_TIMEOUT")? {
            self.request_timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(n) = parsed::<usize>("MAX_CONCURRENT_CHECKS")? {
            self.max_concurrent_checks = n.max(1);
        }
        if let Some(n) = parsed::<u32>("GEOCODE_LIMIT")? {
            self.geocode_limit = n.clamp(1, 50);
        }
        self.geocode_region = optional("GEOCODE_REGION");
        if let Some(v) = optional("GEOCODE_LANGUAGE") {
            self.geocode_language = v;
        }
        if let Some(v) = optional("AQICN_API_URL") {
            self.aqicn_api_url = v;
        }
        if let Some(v) = optional("TELEGRAM_API_URL") {
            self.telegram_api_url = v;
        }
        if let Some(v) = optional("NOMINATIM_URL") {
            self.nominatim_url = v;
        }
        Ok(())
    }
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(key: &str) -> Result<String, AppError> {
    optional(key).ok_or_else(|| AppError::MissingConfig {
        key: key.to_string(),
    })
}

fn parsed<T: FromStr>(key: &str) -> Result<Option<T>, AppError> {
    match optional(key) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| AppError::InvalidConfig {
                key: key.to_string(),
                value,
            }),
        None => Ok(None),
    }
}
