//! Subscription storage contract used by the dispatcher and the service layer.

use uuid::Uuid;

use crate::entity::NewSubscription;
use crate::entity::PendingNotification;
use crate::entity::SubscriptionModel;
use crate::repository::error::DatabaseError;
use crate::repository::table::SubscriptionTable;
use crate::repository::table::Table;

/// Durable mapping from subscriber to location and alert preferences.
///
/// Delivering a notification is a three step protocol:
/// [`begin_notification`](Self::begin_notification) claims it,
/// [`record_notification`](Self::record_notification) confirms it after the
/// message was accepted, [`abort_notification`](Self::abort_notification)
/// drops the claim when sending failed.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Creates or fully replaces the subscriber's record. Active by default.
    async fn upsert(&self, subscription: &NewSubscription) -> Result<(), DatabaseError>;

    /// Deletes the record. `false` when there was nothing to remove.
    async fn remove(&self, subscriber_id: i64) -> Result<bool, DatabaseError>;

    async fn get(&self, subscriber_id: i64) -> Result<Option<SubscriptionModel>, DatabaseError>;

    async fn list_active(&self) -> Result<Vec<SubscriptionModel>, DatabaseError>;

    /// Sets `last_notified_aqi` and clears any pending claim.
    async fn record_notification(&self, subscriber_id: i64, aqi: i32)
    -> Result<bool, DatabaseError>;

    /// Claims a notification about to be sent and returns its key, or `None`
    /// when the subscription no longer exists.
    async fn begin_notification(
        &self,
        subscriber_id: i64,
        aqi: i32,
    ) -> Result<Option<String>, DatabaseError>;

    /// Drops the claim with the given key.
    async fn abort_notification(&self, subscriber_id: i64, key: &str)
    -> Result<bool, DatabaseError>;

    /// Pauses or resumes notifications without deleting the subscription.
    async fn set_active(&self, subscriber_id: i64, active: bool) -> Result<bool, DatabaseError>;
}

#[async_trait::async_trait]
impl SubscriptionStore for SubscriptionTable {
    async fn upsert(&self, subscription: &NewSubscription) -> Result<(), DatabaseError> {
        SubscriptionTable::upsert(self, subscription).await
    }

    async fn remove(&self, subscriber_id: i64) -> Result<bool, DatabaseError> {
        self.delete_by_subscriber_id(subscriber_id).await
    }

    async fn get(&self, subscriber_id: i64) -> Result<Option<SubscriptionModel>, DatabaseError> {
        self.select(&subscriber_id).await
    }

    async fn list_active(&self) -> Result<Vec<SubscriptionModel>, DatabaseError> {
        self.select_all_active().await
    }

    async fn record_notification(
        &self,
        subscriber_id: i64,
        aqi: i32,
    ) -> Result<bool, DatabaseError> {
        self.update_last_notified(subscriber_id, aqi).await
    }

    async fn begin_notification(
        &self,
        subscriber_id: i64,
        aqi: i32,
    ) -> Result<Option<String>, DatabaseError> {
        let pending = PendingNotification {
            aqi,
            key: Uuid::new_v4().to_string(),
        };
        let claimed = self.update_pending(subscriber_id, &pending).await?;
        Ok(claimed.then_some(pending.key))
    }

    async fn abort_notification(
        &self,
        subscriber_id: i64,
        key: &str,
    ) -> Result<bool, DatabaseError> {
        self.clear_pending(subscriber_id, key).await
    }

    async fn set_active(&self, subscriber_id: i64, active: bool) -> Result<bool, DatabaseError> {
        self.update_active(subscriber_id, active).await
    }
}
