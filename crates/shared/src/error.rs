//! Tenant store errors

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} already exists: {key}")]
    AlreadyExists { entity: &'static str, key: String },

    #[error("Corrupt {entity} row: {reason}")]
    Corrupt { entity: &'static str, reason: String },
}

impl StoreError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }
}
