//! Database table operations and implementations.

use chrono::DateTime;
use chrono::Utc;
use log::error;
use sqlx::FromRow;
use sqlx::SqlitePool;

use crate::entity::AqiThreshold;
use crate::entity::Coordinates;
use crate::entity::NewSubscription;
use crate::entity::PendingNotification;
use crate::entity::SubscriptionModel;
use crate::repository::error::DatabaseError;

/// Base table struct providing database pool access.
#[derive(Clone)]
pub struct BaseTable {
    pub pool: SqlitePool,
}

impl BaseTable {
    /// Creates a new base table with the given pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Base trait for table operations.
#[async_trait::async_trait]
pub trait TableBase {
    /// Creates the table if it doesn't exist.
    async fn create_table(&self) -> Result<(), DatabaseError>;
    /// Drops the table.
    async fn drop_table(&self) -> Result<(), DatabaseError>;
    /// Deletes all rows from the table.
    async fn delete_all(&self) -> Result<(), DatabaseError>;
}

/// Trait for tables with CRUD operations.
#[async_trait::async_trait]
pub trait Table<T, ID>: TableBase {
    async fn select_all(&self) -> Result<Vec<T>, DatabaseError>;
    async fn insert(&self, model: &T) -> Result<ID, DatabaseError>;
    async fn select(&self, id: &ID) -> Result<Option<T>, DatabaseError>;
    async fn update(&self, model: &T) -> Result<(), DatabaseError>;
    async fn delete(&self, id: &ID) -> Result<(), DatabaseError>;
    async fn replace(&self, model: &T) -> Result<ID, DatabaseError>;
}

// ============================================================================
// SubscriptionTable
// ============================================================================

const CREATE_SUBSCRIPTIONS_SQL: &str = r#"CREATE TABLE IF NOT EXISTS subscriptions (
        subscriber_id INTEGER PRIMARY KEY,
        delivery_target TEXT NOT NULL,
        latitude REAL NOT NULL,
        longitude REAL NOT NULL,
        location_name TEXT NOT NULL DEFAULT '',
        aqi_threshold INTEGER NOT NULL,
        last_notified_aqi INTEGER DEFAULT NULL,
        pending_aqi INTEGER DEFAULT NULL,
        pending_key TEXT DEFAULT NULL,
        is_active INTEGER NOT NULL DEFAULT 1,
        created_at TIMESTAMP NOT NULL,
        updated_at TIMESTAMP NOT NULL
    )"#;

const SUBSCRIPTION_COLUMNS: &str = "subscriber_id, delivery_target, latitude, longitude, \
    location_name, aqi_threshold, last_notified_aqi, pending_aqi, pending_key, is_active, \
    created_at, updated_at";

/// Raw `subscriptions` row as stored by SQLite.
///
/// Converted into [`SubscriptionModel`] at the table boundary so malformed
/// rows never reach the dispatcher.
#[derive(FromRow, Debug, Clone)]
pub struct SubscriptionRow {
    pub subscriber_id: i64,
    pub delivery_target: String,
    pub latitude: f64,
    pub longitude: f64,
    pub location_name: String,
    pub aqi_threshold: i64,
    pub last_notified_aqi: Option<i64>,
    pub pending_aqi: Option<i64>,
    pub pending_key: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for SubscriptionModel {
    type Error = DatabaseError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        let subscriber_id = row.subscriber_id;
        let malformed = |reason: String| DatabaseError::MalformedRow {
            subscriber_id,
            reason,
        };

        let location = Coordinates::new(row.latitude, row.longitude).ok_or_else(|| {
            malformed(format!(
                "coordinates ({}, {}) are out of range",
                row.latitude, row.longitude
            ))
        })?;
        let threshold = AqiThreshold::from_stored(row.aqi_threshold)
            .ok_or_else(|| malformed(format!("invalid threshold {}", row.aqi_threshold)))?;
        let last_notified_aqi = row
            .last_notified_aqi
            .map(|v| aqi_from_stored(v).ok_or_else(|| malformed(format!("invalid AQI {v}"))))
            .transpose()?;
        let pending = match (row.pending_aqi, row.pending_key) {
            (None, None) => None,
            (Some(aqi), Some(key)) => Some(PendingNotification {
                aqi: aqi_from_stored(aqi)
                    .ok_or_else(|| malformed(format!("invalid pending AQI {aqi}")))?,
                key,
            }),
            _ => return Err(malformed("half-written pending notification".to_string())),
        };

        Ok(SubscriptionModel {
            subscriber_id,
            delivery_target: row.delivery_target,
            location,
            location_name: row.location_name,
            threshold,
            last_notified_aqi,
            pending,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn aqi_from_stored(value: i64) -> Option<i32> {
    i32::try_from(value).ok().filter(|v| *v >= 0)
}

#[derive(Clone)]
pub struct SubscriptionTable {
    base: BaseTable,
}

impl SubscriptionTable {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            base: BaseTable::new(pool),
        }
    }

    fn convert_all(rows: Vec<SubscriptionRow>) -> Result<Vec<SubscriptionModel>, DatabaseError> {
        rows.into_iter().map(SubscriptionModel::try_from).collect()
    }

    /// All active subscriptions. Malformed rows are logged and skipped.
    pub async fn select_all_active(&self) -> Result<Vec<SubscriptionModel>, DatabaseError> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            "SELECT * FROM subscriptions WHERE is_active = 1 ORDER BY subscriber_id",
        )
        .fetch_all(&self.base.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| match SubscriptionModel::try_from(row) {
                Ok(model) => Some(model),
                Err(e) => {
                    error!("Skipping subscription: {e}");
                    None
                }
            })
            .collect())
    }

    /// Creates the subscription or replaces every user-provided field of the
    /// existing one. Notification state is reset and the row is reactivated.
    pub async fn upsert(&self, sub: &NewSubscription) -> Result<(), DatabaseError> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO subscriptions
                (subscriber_id, delivery_target, latitude, longitude, location_name,
                 aqi_threshold, last_notified_aqi, pending_aqi, pending_key, is_active,
                 created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, NULL, NULL, NULL, 1, ?, ?)
            ON CONFLICT(subscriber_id) DO UPDATE SET
                delivery_target = excluded.delivery_target,
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                location_name = excluded.location_name,
                aqi_threshold = excluded.aqi_threshold,
                last_notified_aqi = NULL,
                pending_aqi = NULL,
                pending_key = NULL,
                is_active = 1,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(sub.subscriber_id)
        .bind(&sub.delivery_target)
        .bind(sub.location.latitude)
        .bind(sub.location.longitude)
        .bind(&sub.location_name)
        .bind(sub.threshold.to_stored())
        .bind(now)
        .bind(now)
        .execute(&self.base.pool)
        .await?;
        Ok(())
    }

    /// Deletes a subscription, returning whether there was one.
    pub async fn delete_by_subscriber_id(&self, subscriber_id: i64) -> Result<bool, DatabaseError> {
        let res = sqlx::query("DELETE FROM subscriptions WHERE subscriber_id = ?")
            .bind(subscriber_id)
            .execute(&self.base.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Stores a delivered notification and clears any pending claim.
    pub async fn update_last_notified(
        &self,
        subscriber_id: i64,
        aqi: i32,
    ) -> Result<bool, DatabaseError> {
        let res = sqlx::query(
            r#"UPDATE subscriptions
            SET last_notified_aqi = ?, pending_aqi = NULL, pending_key = NULL, updated_at = ?
            WHERE subscriber_id = ?"#,
        )
        .bind(aqi)
        .bind(Utc::now())
        .bind(subscriber_id)
        .execute(&self.base.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Marks a notification as claimed before it is sent.
    pub async fn update_pending(
        &self,
        subscriber_id: i64,
        pending: &PendingNotification,
    ) -> Result<bool, DatabaseError> {
        let res = sqlx::query(
            r#"UPDATE subscriptions
            SET pending_aqi = ?, pending_key = ?, updated_at = ?
            WHERE subscriber_id = ?"#,
        )
        .bind(pending.aqi)
        .bind(&pending.key)
        .bind(Utc::now())
        .bind(subscriber_id)
        .execute(&self.base.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Drops the claim identified by `key`. A newer claim is left alone.
    pub async fn clear_pending(&self, subscriber_id: i64, key: &str) -> Result<bool, DatabaseError> {
        let res = sqlx::query(
            r#"UPDATE subscriptions
            SET pending_aqi = NULL, pending_key = NULL, updated_at = ?
            WHERE subscriber_id = ? AND pending_key = ?"#,
        )
        .bind(Utc::now())
        .bind(subscriber_id)
        .bind(key)
        .execute(&self.base.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn update_active(&self, subscriber_id: i64, active: bool) -> Result<bool, DatabaseError> {
        let res = sqlx::query(
            "UPDATE subscriptions SET is_active = ?, updated_at = ? WHERE subscriber_id = ?",
        )
        .bind(active)
        .bind(Utc::now())
        .bind(subscriber_id)
        .execute(&self.base.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }
}

#[async_trait::async_trait]
impl TableBase for SubscriptionTable {
    async fn create_table(&self) -> Result<(), DatabaseError> {
        sqlx::query(CREATE_SUBSCRIPTIONS_SQL)
            .execute(&self.base.pool)
            .await?;
        Ok(())
    }

    async fn drop_table(&self) -> Result<(), DatabaseError> {
        sqlx::query("DROP TABLE IF EXISTS subscriptions")
            .execute(&self.base.pool)
            .await?;
        Ok(())
    }

    async fn delete_all(&self) -> Result<(), DatabaseError> {
        sqlx::query("DELETE FROM subscriptions")
            .execute(&self.base.pool)
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Table<SubscriptionModel, i64> for SubscriptionTable {
    async fn select_all(&self) -> Result<Vec<SubscriptionModel>, DatabaseError> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(
            "SELECT * FROM subscriptions ORDER BY subscriber_id",
        )
        .fetch_all(&self.base.pool)
        .await?;
        Self::convert_all(rows)
    }

    async fn insert(&self, model: &SubscriptionModel) -> Result<i64, DatabaseError> {
        write_model(&self.base.pool, "INSERT", model).await
    }

    async fn select(&self, id: &i64) -> Result<Option<SubscriptionModel>, DatabaseError> {
        sqlx::query_as::<_, SubscriptionRow>("SELECT * FROM subscriptions WHERE subscriber_id = ?")
            .bind(id)
            .fetch_optional(&self.base.pool)
            .await?
            .map(SubscriptionModel::try_from)
            .transpose()
    }

    async fn update(&self, model: &SubscriptionModel) -> Result<(), DatabaseError> {
        let (pending_aqi, pending_key) = split_pending(model);
        sqlx::query(
            r#"UPDATE subscriptions
            SET delivery_target = ?, latitude = ?, longitude = ?, location_name = ?,
                aqi_threshold = ?, last_notified_aqi = ?, pending_aqi = ?, pending_key = ?,
                is_active = ?, created_at = ?, updated_at = ?
            WHERE subscriber_id = ?"#,
        )
        .bind(&model.delivery_target)
        .bind(model.location.latitude)
        .bind(model.location.longitude)
        .bind(&model.location_name)
        .bind(model.threshold.to_stored())
        .bind(model.last_notified_aqi)
        .bind(pending_aqi)
        .bind(pending_key)
        .bind(model.is_active)
        .bind(model.created_at)
        .bind(model.updated_at)
        .bind(model.subscriber_id)
        .execute(&self.base.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: &i64) -> Result<(), DatabaseError> {
        self.delete_by_subscriber_id(*id).await?;
        Ok(())
    }

    async fn replace(&self, model: &SubscriptionModel) -> Result<i64, DatabaseError> {
        write_model(&self.base.pool, "REPLACE", model).await
    }
}

fn split_pending(model: &SubscriptionModel) -> (Option<i32>, Option<String>) {
    match &model.pending {
        Some(p) => (Some(p.aqi), Some(p.key.clone())),
        None => (None, None),
    }
}

async fn write_model(
    pool: &SqlitePool,
    verb: &str,
    model: &SubscriptionModel,
) -> Result<i64, DatabaseError> {
    let (pending_aqi, pending_key) = split_pending(model);
    let sql = format!(
        "{verb} INTO subscriptions ({SUBSCRIPTION_COLUMNS}) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING subscriber_id"
    );
    let row: (i64,) = sqlx::query_as(&sql)
        .bind(model.subscriber_id)
        .bind(&model.delivery_target)
        .bind(model.location.latitude)
        .bind(model.location.longitude)
        .bind(&model.location_name)
        .bind(model.threshold.to_stored())
        .bind(model.last_notified_aqi)
        .bind(pending_aqi)
        .bind(pending_key)
        .bind(model.is_active)
        .bind(model.created_at)
        .bind(model.updated_at)
        .fetch_one(pool)
        .await?;
    Ok(row.0)
}
