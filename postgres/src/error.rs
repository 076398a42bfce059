//! Mapping of driver errors onto [`StoreError`].

use prizedraw_core::StoreError;

/// `PostgreSQL` error codes the engine reacts to.
mod sqlstate {
    pub const UNIQUE_VIOLATION: &str = "23505";
    pub const SERIALIZATION_FAILURE: &str = "40001";
    pub const DEADLOCK_DETECTED: &str = "40P01";
    pub const LOCK_NOT_AVAILABLE: &str = "55P03";
    pub const QUERY_CANCELED: &str = "57014";
}

/// Classify a driver error.
///
/// Lock and statement timeouts both surface as [`StoreError::LockTimeout`]:
/// under this workload a cancelled statement was waiting on a lock.
pub fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    let mapped = match &err {
        sqlx::Error::Database(db) => match db.code().as_deref() {
            Some(sqlstate::UNIQUE_VIOLATION) => StoreError::UniqueViolation {
                constraint: db.constraint().unwrap_or("unknown").to_string(),
            },
            Some(sqlstate::SERIALIZATION_FAILURE) => StoreError::SerializationFailure,
            Some(sqlstate::DEADLOCK_DETECTED) => StoreError::Deadlock,
            Some(sqlstate::LOCK_NOT_AVAILABLE | sqlstate::QUERY_CANCELED) => StoreError::LockTimeout,
            _ => StoreError::Database(db.to_string()),
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
            StoreError::Unavailable(err.to_string())
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) | sqlx::Error::ColumnNotFound(_) => {
            StoreError::Corrupt(err.to_string())
        }
        _ => StoreError::Database(err.to_string()),
    };

    if mapped.is_retryable() {
        tracing::warn!(error = %err, "Retryable database error");
        metrics::counter!("prizedraw_store_retryable_errors_total", "error" => retryable_label(&mapped))
            .increment(1);
    }
    mapped
}

const fn retryable_label(err: &StoreError) -> &'static str {
    match err {
        StoreError::LockTimeout => "lock_timeout",
        StoreError::Deadlock => "deadlock",
        StoreError::SerializationFailure => "serialization_failure",
        _ => "unavailable",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_timeout_is_unavailable() {
        assert!(matches!(
            map_sqlx_error(sqlx::Error::PoolTimedOut),
            StoreError::Unavailable(_)
        ));
    }

    #[test]
    fn missing_row_is_a_database_error() {
        let mapped = map_sqlx_error(sqlx::Error::RowNotFound);
        assert!(matches!(mapped, StoreError::Database(_)));
        assert!(!mapped.is_retryable());
    }
}
