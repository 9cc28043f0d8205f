use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use larder_core::{DomainError, DomainResult, IngredientId, LotId, StockId};

use crate::lot::{ensure_positive_quantity, FefoKey, Lot};

/// One lot as seen through the read view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewLot {
    pub lot_id: LotId,
    pub quantity: f64,
    pub expires_on: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl ViewLot {
    fn fefo_key(&self) -> FefoKey {
        FefoKey::new(self.expires_on, self.created_at, self.lot_id)
    }
}

/// In-memory snapshot of one stock's lots, grouped by ingredient and kept in
/// FEFO order within each group.
///
/// This is a read model/DTO built from an already-loaded snapshot. It exists
/// for presentation and for testing parity with the persistent consumption
/// algorithm; it never arbitrates concurrent access. Only the persistent
/// store, under its row locks, decides what actually gets consumed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockView {
    pub stock_id: StockId,
    pub name: String,
    items: HashMap<IngredientId, Vec<ViewLot>>,
}

impl StockView {
    pub fn new(stock_id: StockId, name: impl Into<String>) -> Self {
        Self {
            stock_id,
            name: name.into(),
            items: HashMap::new(),
        }
    }

    /// Build a view from loaded lots. Lots belonging to other stocks are a
    /// caller bug and are skipped.
    pub fn from_lots<'a>(
        stock_id: StockId,
        name: impl Into<String>,
        lots: impl IntoIterator<Item = &'a Lot>,
    ) -> Self {
        let mut view = Self::new(stock_id, name);
        for lot in lots {
            if lot.stock_id != stock_id {
                continue;
            }
            // Loaded lots already satisfy quantity > 0.
            let _ = view.add_item(
                lot.ingredient_id,
                lot.id,
                lot.quantity,
                lot.expires_on,
                lot.created_at,
            );
        }
        view
    }

    /// Insert one lot into its ingredient group and re-sort the group so the
    /// next lot to expire is always at the front.
    pub fn add_item(
        &mut self,
        ingredient_id: IngredientId,
        lot_id: LotId,
        quantity: f64,
        expires_on: Option<NaiveDate>,
        created_at: DateTime<Utc>,
    ) -> DomainResult<()> {
        ensure_positive_quantity(quantity)?;

        let group = self.items.entry(ingredient_id).or_default();
        group.push(ViewLot {
            lot_id,
            quantity,
            expires_on,
            created_at,
        });
        group.sort_by_key(ViewLot::fefo_key);
        Ok(())
    }

    /// Total available quantity for one ingredient, all lots combined.
    /// Zero if the ingredient is absent.
    pub fn total_quantity(&self, ingredient_id: IngredientId) -> f64 {
        self.items
            .get(&ingredient_id)
            .map(|group| group.iter().map(|l| l.quantity).sum())
            .unwrap_or(0.0)
    }

    /// The FEFO-ordered lots of one ingredient group (empty if absent).
    pub fn lots(&self, ingredient_id: IngredientId) -> &[ViewLot] {
        self.items
            .get(&ingredient_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Ingredients present in the view.
    pub fn ingredient_ids(&self) -> impl Iterator<Item = IngredientId> + '_ {
        self.items.keys().copied()
    }

    /// Consume `amount` from one ingredient group, FEFO.
    ///
    /// Walks the sorted group from the front, decrementing the first lot that
    /// covers the remainder and dropping lots it fully drains. Rejects
    /// non-positive amounts and amounts exceeding the group total before
    /// touching anything.
    pub fn remove_quantity(&mut self, ingredient_id: IngredientId, amount: f64) -> DomainResult<()> {
        ensure_positive_quantity(amount)?;

        let total = self.total_quantity(ingredient_id);
        if amount > total {
            return Err(DomainError::insufficient(amount, total));
        }

        let group = self
            .items
            .get_mut(&ingredient_id)
            .ok_or_else(|| DomainError::insufficient(amount, 0.0))?;

        let mut remaining = amount;
        while remaining > 0.0 && !group.is_empty() {
            let front = &mut group[0];
            if front.quantity > remaining {
                front.quantity -= remaining;
                remaining = 0.0;
            } else {
                remaining -= front.quantity;
                group.remove(0);
            }
        }

        // No zero-quantity lots linger, and empty groups disappear.
        if group.is_empty() {
            self.items.remove(&ingredient_id);
        }
        Ok(())
    }
}
