//! Common test utilities and mock implementations.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::RwLock;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use aqi_bot::air_quality::AirQualityProvider;
use aqi_bot::air_quality::AirQualityReading;
use aqi_bot::air_quality::BaseProvider;
use aqi_bot::air_quality::Pollutant;
use aqi_bot::air_quality::ProviderInfo;
use aqi_bot::air_quality::error::ProviderError;
use aqi_bot::delivery::DeliveryChannel;
use aqi_bot::delivery::error::DeliveryError;
use aqi_bot::entity::AqiThreshold;
use aqi_bot::entity::Coordinates;
use aqi_bot::entity::NewSubscription;
use aqi_bot::entity::SubscriptionModel;
use aqi_bot::geocode::GeocodedPlace;
use aqi_bot::geocode::Geocoder;
use aqi_bot::repository::Repository;
use aqi_bot::repository::error::DatabaseError;
use aqi_bot::repository::store::SubscriptionStore;
use aqi_bot::repository::table::SubscriptionTable;
use aqi_bot::task::notification_publisher::PublisherSettings;
use async_trait::async_trait;
use uuid::Uuid;

/// Sets up a temporary test database.
pub async fn setup_db() -> (Arc<Repository>, PathBuf) {
    let uuid = Uuid::new_v4();
    let db_path = std::env::temp_dir().join(format!("aqi-bot-test-{}.db", uuid));
    let db_url = format!("sqlite://{}", db_path.to_str().unwrap());

    let db = Repository::new(&db_url, db_path.to_str().unwrap())
        .await
        .expect("Failed to create database");

    db.run_migrations().await.expect("Failed to run migrations");

    (Arc::new(db), db_path)
}

/// Cleans up the test database file.
pub async fn teardown_db(db_path: PathBuf) {
    if db_path.exists() {
        let _ = std::fs::remove_file(db_path);
    }
}

/// Distinct location per subscriber so mocks can tell them apart.
#[allow(dead_code)]
pub fn location_for(subscriber_id: i64) -> Coordinates {
    Coordinates::new(42.0 + subscriber_id as f64 * 0.01, 74.59).unwrap()
}

#[allow(dead_code)]
pub fn new_subscription(subscriber_id: i64, threshold: u32) -> NewSubscription {
    NewSubscription {
        subscriber_id,
        delivery_target: format!("chat-{}", subscriber_id),
        location: location_for(subscriber_id),
        location_name: format!("Place {}", subscriber_id),
        threshold: AqiThreshold::fixed(threshold).unwrap_or(AqiThreshold::AnyChange),
    }
}

#[allow(dead_code)]
pub fn publisher_settings() -> PublisherSettings {
    PublisherSettings {
        poll_interval: Duration::from_secs(3600),
        initial_delay: Duration::ZERO,
        request_timeout: Duration::from_secs(2),
        max_concurrent_checks: 3,
    }
}

/// Test helper: stores a subscription and sets its notification state directly.
#[allow(dead_code)]
pub async fn seed_subscription(
    store: &dyn SubscriptionStore,
    subscriber_id: i64,
    threshold: u32,
    last_notified: Option<i32>,
) -> SubscriptionModel {
    store
        .upsert(&new_subscription(subscriber_id, threshold))
        .await
        .expect("Failed to upsert");
    if let Some(aqi) = last_notified {
        store
            .record_notification(subscriber_id, aqi)
            .await
            .expect("Failed to record");
    }
    store
        .get(subscriber_id)
        .await
        .expect("Failed to get")
        .expect("Subscription missing")
}

// MOCK PROVIDER

fn location_key(location: &Coordinates) -> String {
    format!("{:.4},{:.4}", location.latitude, location.longitude)
}

#[derive(Clone)]
#[allow(dead_code)]
pub enum MockReading {
    Aqi(i32),
    NoIndex,
    Fail,
    Hang,
}

/// Air quality provider answering from a per-location table.
#[derive(Clone)]
#[allow(dead_code)]
pub struct MockProvider {
    pub base: BaseProvider,
    pub state: Arc<RwLock<HashMap<String, MockReading>>>,
    pub calls: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl MockProvider {
    pub fn new() -> Self {
        let info = ProviderInfo {
            name: "MockProvider".to_string(),
            api_url: "http://localhost".to_string(),
            attribution: "Data: mock".to_string(),
        };
        Self {
            base: BaseProvider::new(info),
            state: Arc::new(RwLock::new(HashMap::new())),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set(&self, location: Coordinates, reading: MockReading) {
        self.state
            .write()
            .unwrap()
            .insert(location_key(&location), reading);
    }

    pub fn set_aqi(&self, subscriber_id: i64, aqi: i32) {
        self.set(location_for(subscriber_id), MockReading::Aqi(aqi));
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AirQualityProvider for MockProvider {
    async fn fetch(&self, location: Coordinates) -> Result<AirQualityReading, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reading = self
            .state
            .read()
            .unwrap()
            .get(&location_key(&location))
            .cloned()
            .unwrap_or(MockReading::Fail);

        let overall_aqi = match reading {
            MockReading::Aqi(aqi) => Some(aqi),
            MockReading::NoIndex => None,
            MockReading::Fail => {
                return Err(ProviderError::ApiError {
                    message: "Unknown station".to_string(),
                });
            }
            MockReading::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                None
            }
        };

        let mut pollutants = BTreeMap::new();
        if let Some(aqi) = overall_aqi {
            pollutants.insert(Pollutant::Pm25, aqi as f64);
        }
        Ok(AirQualityReading {
            overall_aqi,
            city_name: "Mock City".to_string(),
            local_time: "2026-01-10 14:00:00".to_string(),
            pollutants,
        })
    }

    fn get_base(&self) -> &BaseProvider {
        &self.base
    }
}

// MOCK CHANNEL

/// Delivery channel that records accepted messages.
#[derive(Clone, Default)]
#[allow(dead_code)]
pub struct RecordingChannel {
    pub sent: Arc<RwLock<Vec<(String, String)>>>,
    pub rejected_targets: Arc<RwLock<HashSet<String>>>,
}

#[allow(dead_code)]
impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject(&self, target: &str) {
        self.rejected_targets
            .write()
            .unwrap()
            .insert(target.to_string());
    }

    pub fn accept_all(&self) {
        self.rejected_targets.write().unwrap().clear();
    }

    pub fn sent_to(&self, target: &str) -> Vec<String> {
        self.sent
            .read()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == target)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.read().unwrap().len()
    }
}

#[async_trait]
impl DeliveryChannel for RecordingChannel {
    async fn send(&self, target: &str, text: &str) -> Result<(), DeliveryError> {
        if self.rejected_targets.read().unwrap().contains(target) {
            return Err(DeliveryError::Rejected {
                target: target.to_string(),
                status: 403,
                description: "Forbidden: bot was blocked by the user".to_string(),
            });
        }
        self.sent
            .write()
            .unwrap()
            .push((target.to_string(), text.to_string()));
        Ok(())
    }
}

// MOCK GEOCODER

#[derive(Clone, Default)]
#[allow(dead_code)]
pub struct MockGeocoder {
    pub places: Arc<RwLock<HashMap<String, Vec<GeocodedPlace>>>>,
}

#[allow(dead_code)]
impl MockGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, query: &str, places: Vec<GeocodedPlace>) {
        self.places
            .write()
            .unwrap()
            .insert(query.to_string(), places);
    }
}

#[async_trait]
impl Geocoder for MockGeocoder {
    async fn geocode(&self, query: &str) -> Result<Vec<GeocodedPlace>, ProviderError> {
        Ok(self
            .places
            .read()
            .unwrap()
            .get(query)
            .cloned()
            .unwrap_or_default())
    }
}

// FLAKY STORE

fn backend_error() -> DatabaseError {
    DatabaseError::BackendError(sqlx::Error::PoolTimedOut)
}

/// Real SQLite store whose notification writes can be made to fail.
#[allow(dead_code)]
pub struct FlakyStore {
    pub inner: SubscriptionTable,
    pub fail_record: AtomicBool,
    pub fail_abort: AtomicBool,
    pub fail_begin_for: RwLock<HashSet<i64>>,
    pub record_calls: AtomicUsize,
}

#[allow(dead_code)]
impl FlakyStore {
    pub fn new(inner: SubscriptionTable) -> Self {
        Self {
            inner,
            fail_record: AtomicBool::new(false),
            fail_abort: AtomicBool::new(false),
            fail_begin_for: RwLock::new(HashSet::new()),
            record_calls: AtomicUsize::new(0),
        }
    }

    pub fn set_fail_record(&self, fail: bool) {
        self.fail_record.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_abort(&self, fail: bool) {
        self.fail_abort.store(fail, Ordering::SeqCst);
    }

    pub fn fail_begin_for(&self, subscriber_id: i64) {
        self.fail_begin_for.write().unwrap().insert(subscriber_id);
    }
}

#[async_trait]
impl SubscriptionStore for FlakyStore {
    async fn upsert(&self, subscription: &NewSubscription) -> Result<(), DatabaseError> {
        SubscriptionStore::upsert(&self.inner, subscription).await
    }

    async fn remove(&self, subscriber_id: i64) -> Result<bool, DatabaseError> {
        self.inner.remove(subscriber_id).await
    }

    async fn get(&self, subscriber_id: i64) -> Result<Option<SubscriptionModel>, DatabaseError> {
        self.inner.get(subscriber_id).await
    }

    async fn list_active(&self) -> Result<Vec<SubscriptionModel>, DatabaseError> {
        self.inner.list_active().await
    }

    async fn record_notification(
        &self,
        subscriber_id: i64,
        aqi: i32,
    ) -> Result<bool, DatabaseError> {
        self.record_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_record.load(Ordering::SeqCst) {
            return Err(backend_error());
        }
        self.inner.record_notification(subscriber_id, aqi).await
    }

    async fn begin_notification(
        &self,
        subscriber_id: i64,
        aqi: i32,
    ) -> Result<Option<String>, DatabaseError> {
        if self.fail_begin_for.read().unwrap().contains(&subscriber_id) {
            return Err(backend_error());
        }
        self.inner.begin_notification(subscriber_id, aqi).await
    }

    async fn abort_notification(
        &self,
        subscriber_id: i64,
        key: &str,
    ) -> Result<bool, DatabaseError> {
        if self.fail_abort.load(Ordering::SeqCst) {
            return Err(backend_error());
        }
        self.inner.abort_notification(subscriber_id, key).await
    }

    async fn set_active(&self, subscriber_id: i64, active: bool) -> Result<bool, DatabaseError> {
        self.inner.set_active(subscriber_id, active).await
    }
}
