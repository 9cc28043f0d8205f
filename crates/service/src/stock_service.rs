use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use larder_core::{IngredientId, LotId, StockId, UserId};
use larder_inventory::lot::ensure_positive_quantity;
use larder_inventory::{Lot, StockView};
use larder_store::{IngredientCatalog, LotPatch, LotRepository, StockRecord, StockRepository};

use crate::error::{Resource, ServiceError, ServiceResult};

/// Summary of a successful FEFO consumption. `consumed` always equals the
/// requested quantity: consumption is all-or-nothing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConsumeOutcome {
    pub stock_id: StockId,
    pub ingredient_id: IngredientId,
    pub consumed: f64,
}

/// Business service tying stocks, lots and ingredients together.
///
/// The repositories are injected at construction (no global state); the
/// service holds no mutable state of its own, so one instance can be shared
/// across concurrent operations. Correctness under concurrency comes from
/// the store's locking, not from this layer.
#[derive(Debug)]
pub struct StockService<S> {
    store: Arc<S>,
}

impl<S> Clone for StockService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S> StockService<S>
where
    S: StockRepository + LotRepository + IngredientCatalog,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    async fn require_stock_exists(&self, stock_id: StockId) -> ServiceResult<()> {
        if !self.store.stock_exists(stock_id).await? {
            return Err(ServiceError::NotFound(Resource::Stock));
        }
        Ok(())
    }

    async fn require_ownership(&self, user_id: UserId, stock_id: StockId) -> ServiceResult<()> {
        if !self.store.user_owns_stock(user_id, stock_id).await? {
            return Err(ServiceError::Forbidden);
        }
        Ok(())
    }

    async fn require_ingredient_exists(&self, ingredient_id: IngredientId) -> ServiceResult<()> {
        if !self.store.ingredient_exists(ingredient_id).await? {
            return Err(ServiceError::NotFound(Resource::Ingredient));
        }
        Ok(())
    }

    /// Create a stock and associate it to `user_id` in one transaction.
    #[instrument(skip(self), fields(user_id = %user_id), err)]
    pub async fn create_stock_for_owner(
        &self,
        user_id: UserId,
        name: &str,
    ) -> ServiceResult<StockId> {
        if name.trim().is_empty() {
            return Err(ServiceError::validation("stock name cannot be empty"));
        }
        Ok(self.store.create_stock_for_owner(user_id, name).await?)
    }

    /// Case-insensitive lookup of one of the user's stocks by name.
    pub async fn find_stock_by_name(
        &self,
        user_id: UserId,
        name: &str,
    ) -> ServiceResult<Option<StockRecord>> {
        Ok(self.store.find_stock_by_name(user_id, name).await?)
    }

    /// Add a lot to a stock the user owns.
    #[instrument(skip(self), fields(user_id = %user_id, stock_id = %stock_id), err)]
    pub async fn add_lot(
        &self,
        user_id: UserId,
        stock_id: StockId,
        ingredient_id: IngredientId,
        quantity: f64,
        expires_on: Option<NaiveDate>,
    ) -> ServiceResult<LotId> {
        ensure_positive_quantity(quantity)?;
        self.require_stock_exists(stock_id).await?;
        self.require_ownership(user_id, stock_id).await?;
        self.require_ingredient_exists(ingredient_id).await?;

        Ok(self
            .store
            .create_lot(stock_id, ingredient_id, quantity, expires_on)
            .await?)
    }

    /// Lots of a stock the user owns, FEFO-ordered, optionally filtered to
    /// one ingredient.
    pub async fn list_lots(
        &self,
        user_id: UserId,
        stock_id: StockId,
        ingredient_id: Option<IngredientId>,
    ) -> ServiceResult<Vec<Lot>> {
        self.require_stock_exists(stock_id).await?;
        self.require_ownership(user_id, stock_id).await?;

        Ok(self.store.list_lots(stock_id, ingredient_id).await?)
    }

    /// A read-model snapshot of the whole stock, grouped by ingredient.
    /// Built from a fresh load; never used to arbitrate concurrent access.
    pub async fn stock_view(&self, user_id: UserId, stock_id: StockId) -> ServiceResult<StockView> {
        let stock = self
            .store
            .get_stock(stock_id)
            .await?
            .ok_or(ServiceError::NotFound(Resource::Stock))?;
        self.require_ownership(user_id, stock_id).await?;

        let lots = self.store.list_lots(stock_id, None).await?;
        Ok(StockView::from_lots(stock_id, stock.name, &lots))
    }

    /// Patch a lot in a stock the user owns.
    #[instrument(skip(self, patch), fields(user_id = %user_id, lot_id = %lot_id), err)]
    pub async fn update_lot(
        &self,
        user_id: UserId,
        lot_id: LotId,
        patch: LotPatch,
    ) -> ServiceResult<Lot> {
        let lot = self
            .store
            .get_lot(lot_id)
            .await?
            .ok_or(ServiceError::NotFound(Resource::Lot))?;
        self.require_ownership(user_id, lot.stock_id).await?;

        self.store
            .update_lot(lot_id, patch)
            .await?
            .ok_or(ServiceError::NotFound(Resource::Lot))
    }

    /// Delete a lot if the user owns its stock. Returns whether deletion
    /// occurred.
    #[instrument(skip(self), fields(user_id = %user_id, lot_id = %lot_id), err)]
    pub async fn delete_lot(&self, user_id: UserId, lot_id: LotId) -> ServiceResult<bool> {
        let lot = self
            .store
            .get_lot(lot_id)
            .await?
            .ok_or(ServiceError::NotFound(Resource::Lot))?;
        self.require_ownership(user_id, lot.stock_id).await?;

        Ok(self.store.delete_lot(lot_id).await?)
    }

    /// Consume a quantity of one ingredient from a stock the user owns,
    /// FEFO, all-or-nothing.
    #[instrument(
        skip(self),
        fields(user_id = %user_id, stock_id = %stock_id, ingredient_id = %ingredient_id),
        err
    )]
    pub async fn consume_fefo(
        &self,
        user_id: UserId,
        stock_id: StockId,
        ingredient_id: IngredientId,
        quantity: f64,
    ) -> ServiceResult<ConsumeOutcome> {
        ensure_positive_quantity(quantity)?;
        self.require_stock_exists(stock_id).await?;
        self.require_ownership(user_id, stock_id).await?;
        self.require_ingredient_exists(ingredient_id).await?;

        self.store
            .consume_quantity_fefo(stock_id, ingredient_id, quantity)
            .await?;

        Ok(ConsumeOutcome {
            stock_id,
            ingredient_id,
            consumed: quantity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use larder_store::InMemoryStore;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, d).unwrap()
    }

    struct Fixture {
        service: StockService<InMemoryStore>,
        user: UserId,
        stock: StockId,
        ingredient: IngredientId,
    }

    async fn fixture() -> Fixture {
        larder_observability::init();
        let store = Arc::new(InMemoryStore::new());
        let service = StockService::new(Arc::clone(&store));
        let user = UserId::new();
        let stock = service
            .create_stock_for_owner(user, "pantry")
            .await
            .unwrap();
        let ingredient = store.create_ingredient("Butter", "g").await.unwrap();
        Fixture {
            service,
            user,
            stock,
            ingredient,
        }
    }

    #[tokio::test]
    async fn create_stock_rejects_blank_name() {
        let service = StockService::new(Arc::new(InMemoryStore::new()));
        let err = service
            .create_stock_for_owner(UserId::new(), "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn add_lot_with_zero_quantity_is_rejected_before_any_write() {
        // Scenario C.
        let f = fixture().await;
        let err = f
            .service
            .add_lot(f.user, f.stock, f.ingredient, 0.0, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        assert!(f
            .service
            .list_lots(f.user, f.stock, None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn add_lot_checks_stock_then_ownership_then_ingredient() {
        let f = fixture().await;

        let err = f
            .service
            .add_lot(f.user, StockId::new(), f.ingredient, 1.0, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(Resource::Stock)));

        let stranger = UserId::new();
        let err = f
            .service
            .add_lot(stranger, f.stock, f.ingredient, 1.0, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden));

        let err = f
            .service
            .add_lot(f.user, f.stock, IngredientId::new(), 1.0, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(Resource::Ingredient)));
    }

    #[tokio::test]
    async fn added_lot_round_trips_through_list() {
        let f = fixture().await;
        let lot_id = f
            .service
            .add_lot(f.user, f.stock, f.ingredient, 7.5, Some(day(12)))
            .await
            .unwrap();

        let lots = f
            .service
            .list_lots(f.user, f.stock, Some(f.ingredient))
            .await
            .unwrap();
        assert_eq!(lots.len(), 1);
        assert_eq!(lots[0].id, lot_id);
        assert_eq!(lots[0].ingredient_id, f.ingredient);
        assert_eq!(lots[0].quantity, 7.5);
        assert_eq!(lots[0].expires_on, Some(day(12)));
    }

    #[tokio::test]
    async fn list_lots_filters_by_ingredient() {
        let f = fixture().await;
        let other = f
            .service
            .store
            .create_ingredient("Salt", "g")
            .await
            .unwrap();
        f.service
            .add_lot(f.user, f.stock, f.ingredient, 1.0, None)
            .await
            .unwrap();
        f.service
            .add_lot(f.user, f.stock, other, 2.0, None)
            .await
            .unwrap();

        let filtered = f
            .service
            .list_lots(f.user, f.stock, Some(other))
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].ingredient_id, other);

        let all = f.service.list_lots(f.user, f.stock, None).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn consume_fefo_reports_the_requested_quantity() {
        let f = fixture().await;
        f.service
            .add_lot(f.user, f.stock, f.ingredient, 10.0, Some(day(2)))
            .await
            .unwrap();
        f.service
            .add_lot(f.user, f.stock, f.ingredient, 10.0, Some(day(10)))
            .await
            .unwrap();

        let outcome = f
            .service
            .consume_fefo(f.user, f.stock, f.ingredient, 12.0)
            .await
            .unwrap();
        assert_eq!(outcome.stock_id, f.stock);
        assert_eq!(outcome.ingredient_id, f.ingredient);
        assert_eq!(outcome.consumed, 12.0);

        let lots = f
            .service
            .list_lots(f.user, f.stock, Some(f.ingredient))
            .await
            .unwrap();
        assert_eq!(lots.len(), 1);
        assert_eq!(lots[0].quantity, 8.0);
    }

    #[tokio::test]
    async fn consume_without_ownership_is_forbidden_and_touches_nothing() {
        // Scenario E.
        let f = fixture().await;
        f.service
            .add_lot(f.user, f.stock, f.ingredient, 5.0, Some(day(3)))
            .await
            .unwrap();

        let stranger = UserId::new();
        let err = f
            .service
            .consume_fefo(stranger, f.stock, f.ingredient, 1.0)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden));

        let lots = f
            .service
            .list_lots(f.user, f.stock, Some(f.ingredient))
            .await
            .unwrap();
        assert_eq!(lots.len(), 1);
        assert_eq!(lots[0].quantity, 5.0);
    }

    #[tokio::test]
    async fn consume_more_than_available_maps_to_insufficient_stock() {
        let f = fixture().await;
        f.service
            .add_lot(f.user, f.stock, f.ingredient, 5.0, Some(day(1)))
            .await
            .unwrap();

        let err = f
            .service
            .consume_fefo(f.user, f.stock, f.ingredient, 10.0)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServiceError::InsufficientStock {
                requested,
                available
            } if requested == 10.0 && available == 5.0
        ));
    }

    #[tokio::test]
    async fn delete_lot_requires_ownership_of_the_owning_stock() {
        let f = fixture().await;
        let lot_id = f
            .service
            .add_lot(f.user, f.stock, f.ingredient, 1.0, None)
            .await
            .unwrap();

        let err = f
            .service
            .delete_lot(UserId::new(), lot_id)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden));

        assert!(f.service.delete_lot(f.user, lot_id).await.unwrap());
        let err = f.service.delete_lot(f.user, lot_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(Resource::Lot)));
    }

    #[tokio::test]
    async fn update_lot_goes_through_ownership_and_patches() {
        let f = fixture().await;
        let lot_id = f
            .service
            .add_lot(f.user, f.stock, f.ingredient, 4.0, Some(day(8)))
            .await
            .unwrap();

        let err = f
            .service
            .update_lot(UserId::new(), lot_id, LotPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden));

        let lot = f
            .service
            .update_lot(
                f.user,
                lot_id,
                LotPatch {
                    quantity: Some(2.0),
                    expires_on: Some(None),
                },
            )
            .await
            .unwrap();
        assert_eq!(lot.quantity, 2.0);
        assert_eq!(lot.expires_on, None);
    }

    #[tokio::test]
    async fn stock_view_snapshot_groups_and_orders_lots() {
        let f = fixture().await;
        f.service
            .add_lot(f.user, f.stock, f.ingredient, 2.0, None)
            .await
            .unwrap();
        f.service
            .add_lot(f.user, f.stock, f.ingredient, 3.0, Some(day(4)))
            .await
            .unwrap();

        let view = f.service.stock_view(f.user, f.stock).await.unwrap();
        assert_eq!(view.name, "pantry");
        assert_eq!(view.total_quantity(f.ingredient), 5.0);
        // Dated lot first, dateless last.
        assert_eq!(view.lots(f.ingredient)[0].expires_on, Some(day(4)));
        assert_eq!(view.lots(f.ingredient)[1].expires_on, None);

        let err = f
            .service
            .stock_view(UserId::new(), f.stock)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Forbidden));
    }

    #[tokio::test]
    async fn find_stock_by_name_is_scoped_to_the_user() {
        let f = fixture().await;
        let found = f
            .service
            .find_stock_by_name(f.user, "Pantry")
            .await
            .unwrap();
        assert_eq!(found.map(|s| s.id), Some(f.stock));
        assert!(f
            .service
            .find_stock_by_name(UserId::new(), "pantry")
            .await
            .unwrap()
            .is_none());
    }
}
