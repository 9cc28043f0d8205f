//! Inventory domain module.
//!
//! This crate contains the business model for perishable inventory: lots,
//! their deterministic FEFO ordering, and the in-memory stock read view.
//! Pure domain logic only (no IO, no HTTP, no storage).

pub mod ingredient;
pub mod lot;
pub mod view;

pub use ingredient::Ingredient;
pub use lot::{FefoKey, Lot};
pub use view::{StockView, ViewLot};
