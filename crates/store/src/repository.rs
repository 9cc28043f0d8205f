//! Repository traits: the seam between orchestration and storage.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use larder_core::{IngredientId, LotId, StockId, UserId};
use larder_inventory::{Ingredient, Lot};

use crate::error::StoreError;

/// A stock row (without its lots).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    pub id: StockId,
    pub name: String,
}

/// Partial update of a lot.
///
/// The outer `Option` means "leave unchanged". For the expiration date the
/// inner `Option` distinguishes setting a date from clearing it:
/// `Some(None)` writes NULL.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LotPatch {
    pub quantity: Option<f64>,
    pub expires_on: Option<Option<NaiveDate>>,
}

impl LotPatch {
    pub fn is_empty(&self) -> bool {
        self.quantity.is_none() && self.expires_on.is_none()
    }
}

/// Stocks and their ownership associations.
#[async_trait::async_trait]
pub trait StockRepository: Send + Sync {
    /// Create a stock and associate it to `owner`, atomically (one
    /// transaction; a failure between the two writes leaves no orphan
    /// stock).
    async fn create_stock_for_owner(
        &self,
        owner: UserId,
        name: &str,
    ) -> Result<StockId, StoreError>;

    /// Grow the ownership set. Returns `false` if the association already
    /// existed.
    async fn add_owner(&self, user_id: UserId, stock_id: StockId) -> Result<bool, StoreError>;

    async fn get_stock(&self, stock_id: StockId) -> Result<Option<StockRecord>, StoreError>;

    async fn stock_exists(&self, stock_id: StockId) -> Result<bool, StoreError>;

    /// Set-membership check: does `user_id` have access to `stock_id`?
    async fn user_owns_stock(
        &self,
        user_id: UserId,
        stock_id: StockId,
    ) -> Result<bool, StoreError>;

    /// Case-insensitive name lookup among the user's stocks.
    async fn find_stock_by_name(
        &self,
        user_id: UserId,
        name: &str,
    ) -> Result<Option<StockRecord>, StoreError>;
}

/// Lot CRUD plus the transactional FEFO consumption.
#[async_trait::async_trait]
pub trait LotRepository: Send + Sync {
    /// Create a lot. Rejects quantity ≤ 0 before writing.
    async fn create_lot(
        &self,
        stock_id: StockId,
        ingredient_id: IngredientId,
        quantity: f64,
        expires_on: Option<NaiveDate>,
    ) -> Result<LotId, StoreError>;

    async fn get_lot(&self, lot_id: LotId) -> Result<Option<Lot>, StoreError>;

    /// Lots of one stock in FEFO order, optionally filtered to one
    /// ingredient.
    async fn list_lots(
        &self,
        stock_id: StockId,
        ingredient_id: Option<IngredientId>,
    ) -> Result<Vec<Lot>, StoreError>;

    /// Apply a partial update. Rejects negative quantities. Returns the
    /// updated lot, or `None` if it does not exist.
    async fn update_lot(&self, lot_id: LotId, patch: LotPatch) -> Result<Option<Lot>, StoreError>;

    /// Returns whether a row was deleted.
    async fn delete_lot(&self, lot_id: LotId) -> Result<bool, StoreError>;

    /// Consume `amount` of one ingredient from one stock, FEFO, atomically.
    ///
    /// All lots of the pair are locked for the duration of the transaction;
    /// concurrent consumptions of the same pair serialize through those
    /// locks. Either the full amount is consumed or nothing is.
    async fn consume_quantity_fefo(
        &self,
        stock_id: StockId,
        ingredient_id: IngredientId,
        amount: f64,
    ) -> Result<(), StoreError>;
}

/// The ingredient catalog, as far as the engine needs it.
#[async_trait::async_trait]
pub trait IngredientCatalog: Send + Sync {
    async fn create_ingredient(&self, name: &str, unit: &str) -> Result<IngredientId, StoreError>;

    async fn get_ingredient(&self, id: IngredientId) -> Result<Option<Ingredient>, StoreError>;

    async fn ingredient_exists(&self, id: IngredientId) -> Result<bool, StoreError>;
}
