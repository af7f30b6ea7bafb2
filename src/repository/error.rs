#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DatabaseError {
    #[error("Internal database error: {0}")]
    BackendError(#[from] sqlx::Error),

    #[error("Database migration failed: {0}")]
    MigrateError(#[from] sqlx::migrate::MigrateError),

    #[error("Failed to prepare database file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Malformed subscription row for subscriber {subscriber_id}: {reason}")]
    MalformedRow { subscriber_id: i64, reason: String },
}
