//! Public error taxonomy of the inventory engine.

use larder_core::DomainError;
use larder_store::StoreError;
use thiserror::Error;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// What a not-found error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Stock,
    Ingredient,
    Lot,
}

impl core::fmt::Display for Resource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Resource::Stock => "stock",
            Resource::Ingredient => "ingredient",
            Resource::Lot => "lot",
        };
        f.write_str(s)
    }
}

/// Service-level error.
///
/// Every kind stays distinguishable so the boundary layer can map them
/// individually; the suggested HTTP mapping is:
///
/// | ServiceError | HTTP status |
/// |--------------|-------------|
/// | `Validation` | 400 |
/// | `Forbidden` | 403 |
/// | `NotFound` | 404 |
/// | `InsufficientStock` | 409 |
/// | `Transient` | 503 |
///
/// `Validation`, `NotFound` and `Forbidden` are resolved synchronously
/// before any transaction is opened and mutate nothing. `InsufficientStock`
/// and `Transient` are resolved inside the consumption transaction and
/// always leave stored state unchanged; transient failures are not retried
/// here (callers decide).
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(Resource),

    #[error("no access to this stock")]
    Forbidden,

    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: f64, available: f64 },

    /// Lock-wait timeout or storage fault; the transaction was rolled back.
    #[error("transient storage failure")]
    Transient(#[source] StoreError),
}

impl ServiceError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Invalid(domain) => domain.into(),
            StoreError::InsufficientStock {
                requested,
                available,
            } => Self::InsufficientStock {
                requested,
                available,
            },
            other => Self::Transient(other),
        }
    }
}

impl From<DomainError> for ServiceError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::InsufficientStock {
                requested,
                available,
            } => Self::InsufficientStock {
                requested,
                available,
            },
            other => Self::Validation(other.to_string()),
        }
    }
}
