//! Persistent inventory storage.
//!
//! The source of truth for stocks, ownership, ingredients and lots. The
//! repository traits in [`repository`] form the seam between orchestration
//! and storage; [`postgres`] is the durable implementation (row-locked FEFO
//! consumption), [`in_memory`] the tests/dev twin.

pub mod error;
pub mod in_memory;
pub mod postgres;
pub mod repository;

pub use error::StoreError;
pub use in_memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use repository::{IngredientCatalog, LotPatch, LotRepository, StockRecord, StockRepository};
