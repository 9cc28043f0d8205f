//! Store operation errors and sqlx error mapping.

use larder_core::DomainError;
use thiserror::Error;

/// Storage-layer error.
///
/// These are **infrastructure errors** (locking, connectivity) plus the one
/// business failure that can only be detected transactionally:
/// insufficient stock.
///
/// ## Error Mapping
///
/// SQLx errors are mapped to `StoreError` as follows:
///
/// | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
/// |------------|----------------------|------------|----------|
/// | Database (lock not available) | `55P03` | `LockTimeout` | `lock_timeout` elapsed waiting on a row lock |
/// | Database (query canceled) | `57014` | `LockTimeout` | statement canceled while waiting |
/// | Database (other) | Any other | `Database` | Constraint violations, storage faults |
/// | PoolClosed / Io / other | N/A | `Database` | Connection failures, pool shutdown |
#[derive(Debug, Error)]
pub enum StoreError {
    /// Input rejected before any transaction was opened.
    #[error(transparent)]
    Invalid(#[from] DomainError),

    /// Requested consumption exceeds the locked total. Detected inside the
    /// consumption transaction; the transaction is rolled back, nothing is
    /// mutated.
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: f64, available: f64 },

    /// Bounded lock wait elapsed. Transient: the transaction was rolled
    /// back and the caller may retry. Never conflated with
    /// `InsufficientStock`.
    #[error("lock wait timed out in {operation}")]
    LockTimeout {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// Storage fault (connectivity, constraint, unexpected row shape). The
    /// enclosing transaction, if any, was rolled back.
    #[error("storage failure in {operation}")]
    Database {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },

    /// Non-SQL backend failure (in-memory store lock poisoning).
    #[error("storage backend failure: {0}")]
    Backend(String),
}

pub(crate) fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &err {
        if let Some(code) = db_err.code() {
            // 55P03 lock_not_available, 57014 query_canceled: both mean the
            // bounded lock wait was cut short.
            if code.as_ref() == "55P03" || code.as_ref() == "57014" {
                return StoreError::LockTimeout {
                    operation,
                    source: err,
                };
            }
        }
    }
    StoreError::Database {
        operation,
        source: err,
    }
}
