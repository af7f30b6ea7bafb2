//! Background task that checks every active subscription and sends AQI alerts.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use futures::StreamExt;
use futures::stream;
use log::debug;
use log::error;
use log::info;
use log::warn;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::air_quality::AirQualityProvider;
use crate::config::Config;
use crate::delivery::DeliveryChannel;
use crate::delivery::message_builder::notification_message;
use crate::entity::PendingNotification;
use crate::entity::SubscriptionModel;
use crate::policy::NotificationDecision;
use crate::policy::decide;
use crate::repository::store::SubscriptionStore;

#[derive(Clone, Debug)]
pub struct PublisherSettings {
    pub poll_interval: Duration,
    pub initial_delay: Duration,
    /// Bound for each provider and delivery call.
    pub request_timeout: Duration,
    pub max_concurrent_checks: usize,
}

impl PublisherSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval,
            initial_delay: config.poll_initial_delay,
            request_timeout: config.request_timeout,
            max_concurrent_checks: config.max_concurrent_checks,
        }
    }
}

/// Per-cycle counters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub listed: usize,
    pub notified: usize,
    pub suppressed: usize,
    pub unavailable: usize,
    pub failed: usize,
    /// Claims from an earlier cycle confirmed without resending.
    pub recovered: usize,
    /// Not processed because shutdown was requested or the subscription vanished.
    pub skipped: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Outcome {
    Notified,
    Suppressed,
    Unavailable,
    Failed,
    Skipped,
}

struct Checked {
    outcome: Outcome,
    recovered: bool,
}

impl CycleReport {
    fn add(&mut self, checked: Checked) {
        match checked.outcome {
            Outcome::Notified => self.notified += 1,
            Outcome::Suppressed => self.suppressed += 1,
            Outcome::Unavailable => self.unavailable += 1,
            Outcome::Failed => self.failed += 1,
            Outcome::Skipped => self.skipped += 1,
        }
        if checked.recovered {
            self.recovered += 1;
        }
    }
}

/// Periodically evaluates all active subscriptions.
///
/// A notification is claimed in the store before it is sent and recorded
/// after the channel accepted it. When recording fails, the delivered claim
/// is kept in memory and recorded on the next cycle instead of resending.
pub struct NotificationPublisher {
    store: Arc<dyn SubscriptionStore>,
    provider: Arc<dyn AirQualityProvider>,
    channel: Arc<dyn DeliveryChannel>,
    settings: PublisherSettings,
    running: AtomicBool,
    stop_requested: AtomicBool,
    cancel_token: Mutex<CancellationToken>,
    handle: Mutex<Option<JoinHandle<()>>>,
    delivered: Mutex<HashMap<i64, PendingNotification>>,
}

impl NotificationPublisher {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        provider: Arc<dyn AirQualityProvider>,
        channel: Arc<dyn DeliveryChannel>,
        settings: PublisherSettings,
    ) -> Arc<Self> {
        info!(
            "Initializing NotificationPublisher with poll interval {:?}",
            settings.poll_interval
        );
        Arc::new(Self {
            store,
            provider,
            channel,
            settings,
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            cancel_token: Mutex::new(CancellationToken::new()),
            handle: Mutex::new(None),
            delivered: Mutex::new(HashMap::new()),
        })
    }

    /// Starts the polling loop. No-op when already running.
    ///
    /// Fails while a stopped loop is still finishing its cycle.
    pub fn start(self: Arc<Self>) -> anyhow::Result<()> {
        let mut handle = self
            .handle
            .lock()
            .map_err(|_| anyhow::anyhow!("Publisher handle lock poisoned"))?;
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            anyhow::bail!("Previous check loop is still stopping. Call shutdown() first.");
        }

        self.stop_requested.store(false, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        let token = CancellationToken::new();
        *self
            .cancel_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = token.clone();

        info!("Starting NotificationPublisher check loop.");
        *handle = Some(self.clone().spawn_check_loop(token));
        Ok(())
    }

    /// Requests the loop to stop. Checks already in flight still finish.
    pub fn stop(&self) -> anyhow::Result<()> {
        info!("Stopping NotificationPublisher check loop.");
        self.stop_requested.store(true, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
        self.cancel_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
        Ok(())
    }

    /// Stops the loop and waits for the current cycle to wind down.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.stop()?;
        let handle = self
            .handle
            .lock()
            .map_err(|_| anyhow::anyhow!("Publisher handle lock poisoned"))?
            .take();
        if let Some(handle) = handle {
            handle.await?;
        }
        info!("NotificationPublisher stopped.");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn spawn_check_loop(self: Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            if !self.settings.initial_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(self.settings.initial_delay) => {}
                    _ = token.cancelled() => {
                        info!("Stopping check loop.");
                        return;
                    }
                }
            }

            let mut interval = tokio::time::interval(self.settings.poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = token.cancelled() => break,
                }
                if token.is_cancelled() {
                    break;
                }
                if let Err(e) = self.run_cycle().await {
                    error!("Error running notification cycle: {}", e);
                }
            }
            info!("Stopping check loop.");
        })
    }

    /// Runs one full pass over the active subscriptions.
    ///
    /// Fails only when the subscriptions cannot be listed. Per-subscription
    /// faults are logged and counted.
    #[tracing::instrument(skip_all)]
    pub async fn run_cycle(&self) -> anyhow::Result<CycleReport> {
        debug!("Checking active subscriptions.");
        let subscriptions = self.store.list_active().await?;
        self.prune_delivered(&subscriptions).await;
        let mut report = CycleReport {
            listed: subscriptions.len(),
            ..Default::default()
        };
        info!("Found {} active subscriptions to check.", report.listed);

        let concurrency = self.settings.max_concurrent_checks.max(1);
        let results: Vec<Checked> = stream::iter(subscriptions)
            .map(|subscription| self.check_subscription(subscription))
            .buffer_unordered(concurrency)
            .collect()
            .await;

        for checked in results {
            report.add(checked);
        }

        info!(
            "Cycle finished: {} listed, {} notified, {} suppressed, {} unavailable, {} failed, {} recovered, {} skipped.",
            report.listed,
            report.notified,
            report.suppressed,
            report.unavailable,
            report.failed,
            report.recovered,
            report.skipped
        );
        Ok(report)
    }

    #[tracing::instrument(skip_all, fields(subscriber_id = subscription.subscriber_id))]
    async fn check_subscription(&self, subscription: SubscriptionModel) -> Checked {
        if self.stop_requested.load(Ordering::SeqCst) {
            return Checked {
                outcome: Outcome::Skipped,
                recovered: false,
            };
        }

        let desc = Self::get_subscription_desc(&subscription);
        let mut recovered = false;
        let outcome = match self.process(subscription, &mut recovered).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Error checking {}: {:?}", desc, e);
                Outcome::Failed
            }
        };
        Checked { outcome, recovered }
    }

    async fn process(
        &self,
        mut subscription: SubscriptionModel,
        recovered: &mut bool,
    ) -> anyhow::Result<Outcome> {
        let id = subscription.subscriber_id;
        *recovered = self.reconcile(&mut subscription).await?;

        let desc = Self::get_subscription_desc(&subscription);
        let fetched = tokio::time::timeout(
            self.settings.request_timeout,
            self.provider.fetch(subscription.location),
        )
        .await;
        let reading = match fetched {
            Ok(Ok(reading)) => reading,
            Ok(Err(e)) => {
                warn!("Air quality unavailable for {}: {}", desc, e);
                return Ok(Outcome::Unavailable);
            }
            Err(_) => {
                warn!(
                    "Air quality request for {} timed out after {:?}",
                    desc, self.settings.request_timeout
                );
                return Ok(Outcome::Unavailable);
            }
        };
        let Some(aqi) = reading.overall_aqi else {
            warn!("No overall AQI reported for {}", desc);
            return Ok(Outcome::Unavailable);
        };

        let decision = decide(subscription.threshold, subscription.last_notified_aqi, aqi);
        match decision {
            NotificationDecision::Notify => {}
            NotificationDecision::BelowThreshold => {
                debug!("AQI {} below threshold for {}", aqi, desc);
                return Ok(Outcome::Suppressed);
            }
            NotificationDecision::WithinHysteresis { last_notified } => {
                debug!(
                    "AQI {} too close to last notified {} for {}",
                    aqi, last_notified, desc
                );
                return Ok(Outcome::Suppressed);
            }
        }

        let Some(key) = self.store.begin_notification(id, aqi).await? else {
            debug!("{} disappeared before sending. Skipping.", desc);
            return Ok(Outcome::Skipped);
        };

        let text = notification_message(&subscription.location_label(), aqi, &reading.local_time);
        let sent = tokio::time::timeout(
            self.settings.request_timeout,
            self.channel.send(&subscription.delivery_target, &text),
        )
        .await;

        let send_error = match sent {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!(
                "timed out after {:?}",
                self.settings.request_timeout
            )),
        };
        if let Some(reason) = send_error {
            error!("Failed to deliver notification for {}: {}", desc, reason);
            if let Err(e) = self.store.abort_notification(id, &key).await {
                error!("Failed to release claim for {}: {}", desc, e);
            }
            return Ok(Outcome::Failed);
        }

        match self.store.record_notification(id, aqi).await {
            Ok(true) => {
                info!("Notified {} (AQI: {})", desc, aqi);
            }
            Ok(false) => {
                debug!("{} removed after its notification was sent.", desc);
            }
            Err(e) => {
                error!(
                    "Notification for {} was sent but could not be recorded: {}",
                    desc, e
                );
                self.remember_delivered(id, PendingNotification { aqi, key });
            }
        }
        Ok(Outcome::Notified)
    }

    /// Resolves a claim left over from an earlier cycle.
    ///
    /// Returns `true` when a delivered but unrecorded notification was recorded.
    async fn reconcile(&self, subscription: &mut SubscriptionModel) -> anyhow::Result<bool> {
        let id = subscription.subscriber_id;
        let delivered = self.take_delivered(id);
        let Some(pending) = subscription.pending.take() else {
            return Ok(false);
        };

        match delivered {
            Some(delivered) if delivered == pending => {
                if let Err(e) = self.store.record_notification(id, pending.aqi).await {
                    self.remember_delivered(id, delivered);
                    return Err(e.into());
                }
                info!(
                    "Recorded earlier delivery for {} (AQI: {})",
                    Self::get_subscription_desc(subscription),
                    pending.aqi
                );
                subscription.last_notified_aqi = Some(pending.aqi);
                Ok(true)
            }
            _ => {
                warn!(
                    "Dropping unconfirmed notification claim for {} (AQI: {})",
                    Self::get_subscription_desc(subscription),
                    pending.aqi
                );
                self.store.abort_notification(id, &pending.key).await?;
                Ok(false)
            }
        }
    }

    /// Forgets delivered claims whose subscription was removed or replaced.
    /// Paused subscriptions keep their entry until they are listed again.
    async fn prune_delivered(&self, listed: &[SubscriptionModel]) {
        let unlisted: Vec<(i64, PendingNotification)> = self
            .delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(id, _)| !listed.iter().any(|s| s.subscriber_id == **id))
            .map(|(id, pending)| (*id, pending.clone()))
            .collect();

        for (id, pending) in unlisted {
            let stale = match self.store.get(id).await {
                Ok(Some(subscription)) => subscription.pending.as_ref() != Some(&pending),
                Ok(None) => true,
                Err(e) => {
                    warn!("Could not check delivered claim of subscriber `{}`: {}", id, e);
                    false
                }
            };
            if stale {
                debug!("Forgetting delivered claim of subscriber `{}`.", id);
                let mut delivered = self
                    .delivered
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                if delivered.get(&id) == Some(&pending) {
                    delivered.remove(&id);
                }
            }
        }
    }

    pub fn delivered_count(&self) -> usize {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn take_delivered(&self, subscriber_id: i64) -> Option<PendingNotification> {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&subscriber_id)
    }

    fn remember_delivered(&self, subscriber_id: i64, pending: PendingNotification) {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(subscriber_id, pending);
    }

    fn get_subscription_desc(subscription: &SubscriptionModel) -> String {
        format!(
            "subscriber `{}` ({})",
            subscription.subscriber_id,
            subscription.location_label()
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use chrono::Utc;

    use super::*;
    use crate::air_quality::AirQualityReading;
    use crate::air_quality::MockAirQualityProvider;
    use crate::delivery::MockDeliveryChannel;
    use crate::delivery::error::DeliveryError;
    use crate::entity::AqiThreshold;
    use crate::entity::Coordinates;
    use crate::repository::error::DatabaseError;
    use crate::repository::store::MockSubscriptionStore;

    fn settings() -> PublisherSettings {
        PublisherSettings {
            poll_interval: Duration::from_secs(3600),
            initial_delay: Duration::ZERO,
            request_timeout: Duration::from_secs(5),
            max_concurrent_checks: 2,
        }
    }

    fn subscription(
        id: i64,
        last: Option<i32>,
        pending: Option<PendingNotification>,
    ) -> SubscriptionModel {
        SubscriptionModel {
            subscriber_id: id,
            delivery_target: id.to_string(),
            location: Coordinates::new(42.87, 74.59).unwrap(),
            location_name: "Bishkek".to_string(),
            threshold: AqiThreshold::fixed(100).unwrap(),
            last_notified_aqi: last,
            pending,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn provider_with(aqi: Option<i32>) -> MockAirQualityProvider {
        let mut provider = MockAirQualityProvider::new();
        provider.expect_fetch().returning(move |_| {
            Ok(AirQualityReading {
                overall_aqi: aqi,
                city_name: "Bishkek".to_string(),
                local_time: "2026-01-10 14:00:00".to_string(),
                pollutants: Default::default(),
            })
        });
        provider
    }

    fn publisher(
        store: MockSubscriptionStore,
        provider: MockAirQualityProvider,
        channel: MockDeliveryChannel,
    ) -> Arc<NotificationPublisher> {
        NotificationPublisher::new(
            Arc::new(store),
            Arc::new(provider),
            Arc::new(channel),
            settings(),
        )
    }

    #[tokio::test]
    async fn test_delivery_failure_releases_claim() {
        let mut store = MockSubscriptionStore::new();
        store
            .expect_list_active()
            .returning(|| Ok(vec![subscription(1, None, None)]));
        store
            .expect_begin_notification()
            .withf(|id, aqi| *id == 1 && *aqi == 150)
            .times(1)
            .returning(|_, _| Ok(Some("key-1".to_string())));
        store
            .expect_abort_notification()
            .withf(|id, key| *id == 1 && key == "key-1")
            .times(1)
            .returning(|_, _| Ok(true));
        store.expect_record_notification().never();

        let mut channel = MockDeliveryChannel::new();
        channel.expect_send().times(1).returning(|target, _| {
            Err(DeliveryError::Rejected {
                target: target.to_string(),
                status: 403,
                description: "Forbidden: bot was blocked by the user".to_string(),
            })
        });

        let publisher = publisher(store, provider_with(Some(150)), channel);
        let report = publisher.run_cycle().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.notified, 0);
    }

    #[tokio::test]
    async fn test_record_failure_is_recovered_without_resend() {
        let cycle = Arc::new(AtomicUsize::new(0));
        let mut store = MockSubscriptionStore::new();

        let list_cycle = cycle.clone();
        store.expect_list_active().returning(move || {
            let pending = (list_cycle.fetch_add(1, Ordering::SeqCst) > 0).then(|| {
                PendingNotification {
                    aqi: 150,
                    key: "key-1".to_string(),
                }
            });
            Ok(vec![subscription(1, None, pending)])
        });
        store
            .expect_begin_notification()
            .times(1)
            .returning(|_, _| Ok(Some("key-1".to_string())));

        let record_calls = Arc::new(AtomicUsize::new(0));
        let calls = record_calls.clone();
        store
            .expect_record_notification()
            .withf(|id, aqi| *id == 1 && *aqi == 150)
            .returning(move |_, _| {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(DatabaseError::BackendError(sqlx::Error::PoolTimedOut))
                } else {
                    Ok(true)
                }
            });
        store.expect_abort_notification().never();

        let mut channel = MockDeliveryChannel::new();
        channel.expect_send().times(1).returning(|_, _| Ok(()));

        let publisher = publisher(store, provider_with(Some(150)), channel);

        let first = publisher.run_cycle().await.unwrap();
        assert_eq!(first.notified, 1);

        // Same AQI again: recorded from memory, then suppressed by hysteresis.
        let second = publisher.run_cycle().await.unwrap();
        assert_eq!(second.recovered, 1);
        assert_eq!(second.suppressed, 1);
        assert_eq!(record_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_claim_is_aborted_and_reevaluated() {
        let mut store = MockSubscriptionStore::new();
        store.expect_list_active().returning(|| {
            Ok(vec![subscription(
                1,
                None,
                Some(PendingNotification {
                    aqi: 140,
                    key: "stale".to_string(),
                }),
            )])
        });
        store
            .expect_abort_notification()
            .withf(|_, key| key == "stale")
            .times(1)
            .returning(|_, _| Ok(true));
        store
            .expect_begin_notification()
            .times(1)
            .returning(|_, _| Ok(Some("fresh".to_string())));
        store
            .expect_record_notification()
            .times(1)
            .returning(|_, _| Ok(true));

        let mut channel = MockDeliveryChannel::new();
        channel.expect_send().times(1).returning(|_, _| Ok(()));

        let publisher = publisher(store, provider_with(Some(150)), channel);
        let report = publisher.run_cycle().await.unwrap();
        assert_eq!(report.notified, 1);
        assert_eq!(report.recovered, 0);
    }

    #[tokio::test]
    async fn test_vanished_subscription_is_skipped() {
        let mut store = MockSubscriptionStore::new();
        store
            .expect_list_active()
            .returning(|| Ok(vec![subscription(1, None, None)]));
        store
            .expect_begin_notification()
            .returning(|_, _| Ok(None));

        let mut channel = MockDeliveryChannel::new();
        channel.expect_send().never();

        let publisher = publisher(store, provider_with(Some(150)), channel);
        let report = publisher.run_cycle().await.unwrap();
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn test_missing_index_is_unavailable() {
        let mut store = MockSubscriptionStore::new();
        store
            .expect_list_active()
            .returning(|| Ok(vec![subscription(1, None, None)]));
        store.expect_begin_notification().never();

        let publisher = publisher(store, provider_with(None), MockDeliveryChannel::new());
        let report = publisher.run_cycle().await.unwrap();
        assert_eq!(report.unavailable, 1);
    }

    #[tokio::test]
    async fn test_listing_failure_fails_cycle() {
        let mut store = MockSubscriptionStore::new();
        store
            .expect_list_active()
            .returning(|| Err(DatabaseError::BackendError(sqlx::Error::PoolClosed)));

        let publisher = publisher(
            store,
            MockAirQualityProvider::new(),
            MockDeliveryChannel::new(),
        );
        assert!(publisher.run_cycle().await.is_err());
    }

    #[tokio::test]
    async fn test_stop_skips_remaining_subscriptions() {
        let mut store = MockSubscriptionStore::new();
        store
            .expect_list_active()
            .returning(|| Ok(vec![subscription(1, None, None), subscription(2, None, None)]));
        store.expect_begin_notification().never();

        let mut provider = MockAirQualityProvider::new();
        provider.expect_fetch().never();

        let publisher = publisher(store, provider, MockDeliveryChannel::new());
        publisher.stop().unwrap();
        let report = publisher.run_cycle().await.unwrap();
        assert_eq!(report.skipped, 2);
    }
}
