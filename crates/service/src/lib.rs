//! Orchestration/authorization layer.
//!
//! Ties stocks, lots and the ingredient catalog together: validates input,
//! checks existence and ownership, then delegates mutation to the store.
//! Access rules live here, never in the repositories.

pub mod error;
pub mod stock_service;

pub use error::{Resource, ServiceError, ServiceResult};
pub use stock_service::{ConsumeOutcome, StockService};
