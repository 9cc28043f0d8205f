//! In-memory inventory store.
//!
//! Intended for tests/dev. Implements the same repository traits as the
//! Postgres store; the single `RwLock` write guard plays the role the row
//! locks play durably, so consumption is atomic and serialized here too.

use std::collections::{HashMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{NaiveDate, Utc};

use larder_core::{IngredientId, LotId, StockId, UserId};
use larder_inventory::lot::{ensure_non_negative_quantity, ensure_positive_quantity};
use larder_inventory::{Ingredient, Lot};

use crate::error::StoreError;
use crate::repository::{IngredientCatalog, LotPatch, LotRepository, StockRecord, StockRepository};

#[derive(Debug, Default)]
struct Inner {
    stocks: HashMap<StockId, String>,
    owners: HashSet<(UserId, StockId)>,
    ingredients: HashMap<IngredientId, Ingredient>,
    lots: HashMap<LotId, Lot>,
}

impl Inner {
    /// Lots of one (stock, ingredient) pair in FEFO order.
    fn fefo_lots(&self, stock_id: StockId, ingredient_id: IngredientId) -> Vec<Lot> {
        let mut lots: Vec<Lot> = self
            .lots
            .values()
            .filter(|l| l.stock_id == stock_id && l.ingredient_id == ingredient_id)
            .cloned()
            .collect();
        lots.sort_by_key(Lot::fefo_key);
        lots
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>, StoreError> {
        self.inner
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>, StoreError> {
        self.inner
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }
}

#[async_trait::async_trait]
impl StockRepository for InMemoryStore {
    async fn create_stock_for_owner(
        &self,
        owner: UserId,
        name: &str,
    ) -> Result<StockId, StoreError> {
        let mut inner = self.write()?;
        let stock_id = StockId::new();
        inner.stocks.insert(stock_id, name.to_string());
        inner.owners.insert((owner, stock_id));
        Ok(stock_id)
    }

    async fn add_owner(&self, user_id: UserId, stock_id: StockId) -> Result<bool, StoreError> {
        Ok(self.write()?.owners.insert((user_id, stock_id)))
    }

    async fn get_stock(&self, stock_id: StockId) -> Result<Option<StockRecord>, StoreError> {
        Ok(self.read()?.stocks.get(&stock_id).map(|name| StockRecord {
            id: stock_id,
            name: name.clone(),
        }))
    }

    async fn stock_exists(&self, stock_id: StockId) -> Result<bool, StoreError> {
        Ok(self.read()?.stocks.contains_key(&stock_id))
    }

    async fn user_owns_stock(
        &self,
        user_id: UserId,
        stock_id: StockId,
    ) -> Result<bool, StoreError> {
        Ok(self.read()?.owners.contains(&(user_id, stock_id)))
    }

    async fn find_stock_by_name(
        &self,
        user_id: UserId,
        name: &str,
    ) -> Result<Option<StockRecord>, StoreError> {
        let inner = self.read()?;
        let found = inner
            .stocks
            .iter()
            .find(|(id, stock_name)| {
                stock_name.eq_ignore_ascii_case(name) && inner.owners.contains(&(user_id, **id))
            })
            .map(|(id, stock_name)| StockRecord {
                id: *id,
                name: stock_name.clone(),
            });
        Ok(found)
    }
}

#[async_trait::async_trait]
impl LotRepository for InMemoryStore {
    async fn create_lot(
        &self,
        stock_id: StockId,
        ingredient_id: IngredientId,
        quantity: f64,
        expires_on: Option<NaiveDate>,
    ) -> Result<LotId, StoreError> {
        let lot = Lot::new(
            LotId::new(),
            stock_id,
            ingredient_id,
            quantity,
            expires_on,
            Utc::now(),
        )?;
        let lot_id = lot.id;
        self.write()?.lots.insert(lot_id, lot);
        Ok(lot_id)
    }

    async fn get_lot(&self, lot_id: LotId) -> Result<Option<Lot>, StoreError> {
        Ok(self.read()?.lots.get(&lot_id).cloned())
    }

    async fn list_lots(
        &self,
        stock_id: StockId,
        ingredient_id: Option<IngredientId>,
    ) -> Result<Vec<Lot>, StoreError> {
        let inner = self.read()?;
        let mut lots: Vec<Lot> = inner
            .lots
            .values()
            .filter(|l| {
                l.stock_id == stock_id
                    && ingredient_id.map(|i| l.ingredient_id == i).unwrap_or(true)
            })
            .cloned()
            .collect();
        lots.sort_by_key(Lot::fefo_key);
        Ok(lots)
    }

    async fn update_lot(&self, lot_id: LotId, patch: LotPatch) -> Result<Option<Lot>, StoreError> {
        if let Some(quantity) = patch.quantity {
            ensure_non_negative_quantity(quantity)?;
        }

        let mut inner = self.write()?;
        let Some(lot) = inner.lots.get_mut(&lot_id) else {
            return Ok(None);
        };
        if let Some(quantity) = patch.quantity {
            lot.quantity = quantity;
        }
        if let Some(expires_on) = patch.expires_on {
            lot.expires_on = expires_on;
        }
        Ok(Some(lot.clone()))
    }

    async fn delete_lot(&self, lot_id: LotId) -> Result<bool, StoreError> {
        Ok(self.write()?.lots.remove(&lot_id).is_some())
    }

    async fn consume_quantity_fefo(
        &self,
        stock_id: StockId,
        ingredient_id: IngredientId,
        amount: f64,
    ) -> Result<(), StoreError> {
        ensure_positive_quantity(amount)?;

        // One write guard for the whole decision + mutation: the in-memory
        // analog of "lock rows, decide, mutate, commit".
        let mut inner = self.write()?;
        let fefo = inner.fefo_lots(stock_id, ingredient_id);

        let available: f64 = fefo.iter().map(|l| l.quantity).sum();
        if amount > available {
            return Err(StoreError::InsufficientStock {
                requested: amount,
                available,
            });
        }

        let mut remaining = amount;
        for lot in fefo {
            if remaining <= 0.0 {
                break;
            }
            if lot.quantity > remaining {
                if let Some(stored) = inner.lots.get_mut(&lot.id) {
                    stored.quantity -= remaining;
                }
                remaining = 0.0;
            } else {
                inner.lots.remove(&lot.id);
                remaining -= lot.quantity;
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl IngredientCatalog for InMemoryStore {
    async fn create_ingredient(&self, name: &str, unit: &str) -> Result<IngredientId, StoreError> {
        let ingredient = Ingredient::new(IngredientId::new(), name, unit)?;
        let id = ingredient.id;
        self.write()?.ingredients.insert(id, ingredient);
        Ok(id)
    }

    async fn get_ingredient(&self, id: IngredientId) -> Result<Option<Ingredient>, StoreError> {
        Ok(self.read()?.ingredients.get(&id).cloned())
    }

    async fn ingredient_exists(&self, id: IngredientId) -> Result<bool, StoreError> {
        Ok(self.read()?.ingredients.contains_key(&id))
    }
}
