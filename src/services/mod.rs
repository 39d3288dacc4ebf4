//! Owner-scoped data access for every record type.
//!
//! Every operation takes its session handle explicitly: any
//! `sqlx::Acquire<'_, Database = Sqlite>`, i.e. a `&SqlitePool` or a caller's
//! `&mut Transaction`. Writes run inside `begin()`/`commit()`, so against a
//! pool each call is its own transaction, and inside a caller's transaction it
//! becomes a savepoint that commits or rolls back with the outer scope.

pub mod batch_job_bundles;
pub mod batch_jobs;
pub mod bundles;
pub mod endpoints;
pub mod scope;
pub mod triggers;

use crate::models::bundle::BundleValidationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    InvalidBundle(#[from] BundleValidationError),
    #[error("invalid {entity}: {reason}")]
    Invalid {
        entity: &'static str,
        reason: String,
    },
    #[error("{entity} `{name}` already exists")]
    Conflict { entity: &'static str, name: String },
    #[error("{entity} `{id}` is still referenced by another record")]
    InUse { entity: &'static str, id: String },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub(crate) fn invalid(entity: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            entity,
            reason: reason.into(),
        }
    }

    /// Turn a unique-constraint violation reported by storage into `Conflict`.
    pub(crate) fn from_insert(err: sqlx::Error, entity: &'static str, name: &str) -> Self {
        if is_unique_violation(&err) {
            Self::Conflict {
                entity,
                name: name.to_string(),
            }
        } else {
            Self::Sqlx(err)
        }
    }

    /// Turn a foreign-key violation on delete into `InUse`.
    pub(crate) fn from_delete(err: sqlx::Error, entity: &'static str, id: &str) -> Self {
        if is_foreign_key_violation(&err) {
            Self::InUse {
                entity,
                id: id.to_string(),
            }
        } else {
            Self::Sqlx(err)
        }
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

pub(crate) fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err)
            if db_err.message().to_ascii_lowercase().contains("foreign key")
    )
}

#[cfg(test)]
pub(crate) mod testing {
    use sqlx::SqlitePool;

    /// A fresh in-memory database with the schema applied.
    pub async fn pool() -> SqlitePool {
        crate::db::connect_in_memory()
            .await
            .expect("in-memory database")
    }
}
