//! Database module with SQLite storage and SQLx.

use std::str::FromStr;

use log::debug;
use log::info;
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteConnectOptions;

use crate::repository::error::DatabaseError;
use crate::repository::table::SubscriptionTable;
use crate::repository::table::TableBase;

pub mod error;
pub mod store;
pub mod table;

/// Main database struct containing all table handlers.
pub struct Repository {
    pool: SqlitePool,
    pub subscriptions: SubscriptionTable,
}

impl Repository {
    /// Creates a new database connection pool and initializes table handlers.
    ///
    /// The database file is created when missing.
    pub async fn new(db_url: &str, db_path: &str) -> Result<Self, DatabaseError> {
        let path = std::path::Path::new(db_path);
        if !path.exists() {
            debug!("Database path {db_path} does not exist. Creating...");
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, "")?;
            info!("Created {db_path}");
        }

        debug!("Connecting to db...");
        let opts = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
        let pool = SqlitePool::connect_with(opts).await?;
        info!("Connected to db.");

        let subscriptions = SubscriptionTable::new(pool.clone());

        Ok(Self {
            pool,
            subscriptions,
        })
    }

    /// Runs database migrations from the migrations directory.
    pub async fn run_migrations(&self) -> Result<(), DatabaseError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Drops all tables. Use with caution!
    pub async fn drop_all_tables(&self) -> Result<(), DatabaseError> {
        self.subscriptions.drop_table().await?;
        Ok(())
    }

    /// Deletes all data from all tables. Use with caution!
    pub async fn delete_all_tables(&self) -> Result<(), DatabaseError> {
        self.subscriptions.delete_all().await?;
        Ok(())
    }

    /// Closes the pool, waiting for checked out connections to be returned.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
