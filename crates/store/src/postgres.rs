//! Postgres-backed inventory store.
//!
//! The durable source of truth. Every multi-row mutation runs inside a
//! scoped `sqlx::Transaction`, which rolls back on drop: any early return
//! (error or insufficient stock) leaves stored state unchanged without
//! manual rollback calls on each exit path.
//!
//! ## Thread Safety
//!
//! Uses the SQLx connection pool, which is thread-safe (Arc + Send + Sync).
//!
//! ## Concurrency
//!
//! `consume_quantity_fefo` selects the lot rows of one (stock, ingredient)
//! pair `FOR UPDATE`, so two concurrent consumptions of the same pair
//! serialize: the second blocks until the first commits or aborts, then sees
//! the updated rows. The lock wait is bounded by `SET LOCAL lock_timeout`;
//! an elapsed wait surfaces as `StoreError::LockTimeout`, distinct from
//! `InsufficientStock`.

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{instrument, Span};
use uuid::Uuid;

use larder_core::{IngredientId, LotId, StockId, UserId};
use larder_inventory::lot::{ensure_non_negative_quantity, ensure_positive_quantity};
use larder_inventory::{Ingredient, Lot};

use crate::error::{map_sqlx_error, StoreError};
use crate::repository::{IngredientCatalog, LotPatch, LotRepository, StockRecord, StockRepository};

/// FEFO scan order; must match `larder_inventory::FefoKey` exactly.
const FEFO_ORDER: &str = "expiration_date ASC NULLS LAST, created_at ASC, id ASC";

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
    lock_timeout: Duration,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    /// Bound the row-lock wait of the consumption transaction.
    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }
}

fn lot_from_row(row: &PgRow) -> Result<Lot, sqlx::Error> {
    Ok(Lot {
        id: LotId::from_uuid(row.try_get("id")?),
        stock_id: StockId::from_uuid(row.try_get("stock_id")?),
        ingredient_id: IngredientId::from_uuid(row.try_get("ingredient_id")?),
        quantity: row.try_get("quantity")?,
        expires_on: row.try_get("expiration_date")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait::async_trait]
impl StockRepository for PostgresStore {
    #[instrument(skip(self), fields(owner = %owner), err)]
    async fn create_stock_for_owner(
        &self,
        owner: UserId,
        name: &str,
    ) -> Result<StockId, StoreError> {
        let stock_id = StockId::new();

        // One transaction for both writes: a failure between them must not
        // leave an ownerless stock behind.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("create_stock_begin", e))?;

        sqlx::query("INSERT INTO stock (id, name) VALUES ($1, $2)")
            .bind(stock_id.as_uuid())
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("create_stock_insert", e))?;

        sqlx::query("INSERT INTO user_stock (user_id, stock_id) VALUES ($1, $2)")
            .bind(owner.as_uuid())
            .bind(stock_id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("create_stock_owner_insert", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("create_stock_commit", e))?;

        Ok(stock_id)
    }

    #[instrument(skip(self), fields(user_id = %user_id, stock_id = %stock_id), err)]
    async fn add_owner(&self, user_id: UserId, stock_id: StockId) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO user_stock (user_id, stock_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id, stock_id) DO NOTHING
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(stock_id.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("add_owner", e))?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_stock(&self, stock_id: StockId) -> Result<Option<StockRecord>, StoreError> {
        let row = sqlx::query("SELECT id, name FROM stock WHERE id = $1")
            .bind(stock_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_stock", e))?;

        match row {
            Some(row) => {
                let id: Uuid = row
                    .try_get("id")
                    .map_err(|e| map_sqlx_error("get_stock", e))?;
                let name: String = row
                    .try_get("name")
                    .map_err(|e| map_sqlx_error("get_stock", e))?;
                Ok(Some(StockRecord {
                    id: StockId::from_uuid(id),
                    name,
                }))
            }
            None => Ok(None),
        }
    }

    async fn stock_exists(&self, stock_id: StockId) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM stock WHERE id = $1")
            .bind(stock_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("stock_exists", e))?;
        Ok(row.is_some())
    }

    async fn user_owns_stock(
        &self,
        user_id: UserId,
        stock_id: StockId,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT 1
            FROM user_stock
            WHERE user_id = $1 AND stock_id = $2
            LIMIT 1
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(stock_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("user_owns_stock", e))?;
        Ok(row.is_some())
    }

    async fn find_stock_by_name(
        &self,
        user_id: UserId,
        name: &str,
    ) -> Result<Option<StockRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT s.id, s.name
            FROM stock s
            JOIN user_stock us ON us.stock_id = s.id
            WHERE us.user_id = $1 AND lower(s.name) = lower($2)
            LIMIT 1
            "#,
        )
        .bind(user_id.as_uuid())
        .bind(name)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_stock_by_name", e))?;

        match row {
            Some(row) => {
                let id: Uuid = row
                    .try_get("id")
                    .map_err(|e| map_sqlx_error("find_stock_by_name", e))?;
                let name: String = row
                    .try_get("name")
                    .map_err(|e| map_sqlx_error("find_stock_by_name", e))?;
                Ok(Some(StockRecord {
                    id: StockId::from_uuid(id),
                    name,
                }))
            }
            None => Ok(None),
        }
    }
}

#[async_trait::async_trait]
impl LotRepository for PostgresStore {
    #[instrument(
        skip(self),
        fields(stock_id = %stock_id, ingredient_id = %ingredient_id),
        err
    )]
    async fn create_lot(
        &self,
        stock_id: StockId,
        ingredient_id: IngredientId,
        quantity: f64,
        expires_on: Option<chrono::NaiveDate>,
    ) -> Result<LotId, StoreError> {
        ensure_positive_quantity(quantity)?;

        let lot_id = LotId::new();
        sqlx::query(
            r#"
            INSERT INTO stock_item (id, stock_id, ingredient_id, quantity, expiration_date)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(lot_id.as_uuid())
        .bind(stock_id.as_uuid())
        .bind(ingredient_id.as_uuid())
        .bind(quantity)
        .bind(expires_on)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_lot", e))?;

        Ok(lot_id)
    }

    async fn get_lot(&self, lot_id: LotId) -> Result<Option<Lot>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, stock_id, ingredient_id, quantity, expiration_date, created_at
            FROM stock_item
            WHERE id = $1
            "#,
        )
        .bind(lot_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_lot", e))?;

        row.map(|r| lot_from_row(&r))
            .transpose()
            .map_err(|e| map_sqlx_error("get_lot", e))
    }

    #[instrument(
        skip(self),
        fields(stock_id = %stock_id, lot_count = tracing::field::Empty),
        err
    )]
    async fn list_lots(
        &self,
        stock_id: StockId,
        ingredient_id: Option<IngredientId>,
    ) -> Result<Vec<Lot>, StoreError> {
        let rows = match ingredient_id {
            Some(ingredient_id) => {
                sqlx::query(&format!(
                    r#"
                    SELECT id, stock_id, ingredient_id, quantity, expiration_date, created_at
                    FROM stock_item
                    WHERE stock_id = $1 AND ingredient_id = $2
                    ORDER BY {FEFO_ORDER}
                    "#
                ))
                .bind(stock_id.as_uuid())
                .bind(ingredient_id.as_uuid())
                .fetch_all(&*self.pool)
                .await
            }
            None => {
                sqlx::query(&format!(
                    r#"
                    SELECT id, stock_id, ingredient_id, quantity, expiration_date, created_at
                    FROM stock_item
                    WHERE stock_id = $1
                    ORDER BY {FEFO_ORDER}
                    "#
                ))
                .bind(stock_id.as_uuid())
                .fetch_all(&*self.pool)
                .await
            }
        }
        .map_err(|e| map_sqlx_error("list_lots", e))?;

        Span::current().record("lot_count", rows.len());

        let mut lots = Vec::with_capacity(rows.len());
        for row in &rows {
            lots.push(lot_from_row(row).map_err(|e| map_sqlx_error("list_lots", e))?);
        }
        Ok(lots)
    }

    #[instrument(skip(self, patch), fields(lot_id = %lot_id), err)]
    async fn update_lot(&self, lot_id: LotId, patch: LotPatch) -> Result<Option<Lot>, StoreError> {
        if let Some(quantity) = patch.quantity {
            ensure_non_negative_quantity(quantity)?;
        }
        if patch.is_empty() {
            return self.get_lot(lot_id).await;
        }

        // RETURNING hands back the row this statement wrote; a follow-up
        // read could see a concurrent later write instead.
        let row = match (patch.quantity, patch.expires_on) {
            (Some(quantity), Some(expires_on)) => {
                sqlx::query(
                    r#"
                    UPDATE stock_item SET quantity = $1, expiration_date = $2
                    WHERE id = $3
                    RETURNING id, stock_id, ingredient_id, quantity, expiration_date, created_at
                    "#,
                )
                .bind(quantity)
                .bind(expires_on)
                .bind(lot_id.as_uuid())
                .fetch_optional(&*self.pool)
                .await
            }
            (Some(quantity), None) => {
                sqlx::query(
                    r#"
                    UPDATE stock_item SET quantity = $1
                    WHERE id = $2
                    RETURNING id, stock_id, ingredient_id, quantity, expiration_date, created_at
                    "#,
                )
                .bind(quantity)
                .bind(lot_id.as_uuid())
                .fetch_optional(&*self.pool)
                .await
            }
            (None, Some(expires_on)) => {
                sqlx::query(
                    r#"
                    UPDATE stock_item SET expiration_date = $1
                    WHERE id = $2
                    RETURNING id, stock_id, ingredient_id, quantity, expiration_date, created_at
                    "#,
                )
                .bind(expires_on)
                .bind(lot_id.as_uuid())
                .fetch_optional(&*self.pool)
                .await
            }
            (None, None) => unreachable!("is_empty handled above"),
        }
        .map_err(|e| map_sqlx_error("update_lot", e))?;

        row.map(|r| lot_from_row(&r))
            .transpose()
            .map_err(|e| map_sqlx_error("update_lot", e))
    }

    #[instrument(skip(self), fields(lot_id = %lot_id), err)]
    async fn delete_lot(&self, lot_id: LotId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM stock_item WHERE id = $1")
            .bind(lot_id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_lot", e))?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(
        skip(self),
        fields(stock_id = %stock_id, ingredient_id = %ingredient_id),
        err
    )]
    async fn consume_quantity_fefo(
        &self,
        stock_id: StockId,
        ingredient_id: IngredientId,
        amount: f64,
    ) -> Result<(), StoreError> {
        // Cheap rejection: no transaction is opened for an invalid amount.
        ensure_positive_quantity(amount)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("consume_fefo_begin", e))?;

        // SET does not take bind parameters; the value is a trusted integer.
        let lock_timeout_ms = self.lock_timeout.as_millis();
        sqlx::query(&format!("SET LOCAL lock_timeout = '{lock_timeout_ms}ms'"))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("consume_fefo_set_timeout", e))?;

        // Lock every lot of the pair, in FEFO order, for the whole
        // transaction. Concurrent consumers of the same pair queue here.
        let rows = sqlx::query(&format!(
            r#"
            SELECT id, quantity
            FROM stock_item
            WHERE stock_id = $1 AND ingredient_id = $2
            ORDER BY {FEFO_ORDER}
            FOR UPDATE
            "#
        ))
        .bind(stock_id.as_uuid())
        .bind(ingredient_id.as_uuid())
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("consume_fefo_lock", e))?;

        let mut locked = Vec::with_capacity(rows.len());
        let mut available = 0.0f64;
        for row in &rows {
            let id: Uuid = row
                .try_get("id")
                .map_err(|e| map_sqlx_error("consume_fefo_lock", e))?;
            let quantity: f64 = row
                .try_get("quantity")
                .map_err(|e| map_sqlx_error("consume_fefo_lock", e))?;
            available += quantity;
            locked.push((id, quantity));
        }

        if amount > available {
            // Dropping `tx` would roll back too; be explicit about the
            // no-mutation exit.
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("consume_fefo_rollback", e))?;
            return Err(StoreError::InsufficientStock {
                requested: amount,
                available,
            });
        }

        let mut remaining = amount;
        for (lot_id, lot_quantity) in locked {
            if remaining <= 0.0 {
                break;
            }
            if lot_quantity > remaining {
                sqlx::query("UPDATE stock_item SET quantity = $1 WHERE id = $2")
                    .bind(lot_quantity - remaining)
                    .bind(lot_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error("consume_fefo_update", e))?;
                remaining = 0.0;
            } else {
                // Drained lots are removed; no zero-quantity rows persist.
                sqlx::query("DELETE FROM stock_item WHERE id = $1")
                    .bind(lot_id)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error("consume_fefo_delete", e))?;
                remaining -= lot_quantity;
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("consume_fefo_commit", e))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl IngredientCatalog for PostgresStore {
    #[instrument(skip(self), err)]
    async fn create_ingredient(&self, name: &str, unit: &str) -> Result<IngredientId, StoreError> {
        // Validate through the domain constructor before touching storage.
        let ingredient = Ingredient::new(IngredientId::new(), name, unit)?;

        sqlx::query("INSERT INTO ingredient (id, name, unit) VALUES ($1, $2, $3)")
            .bind(ingredient.id.as_uuid())
            .bind(&ingredient.name)
            .bind(&ingredient.unit)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_ingredient", e))?;

        Ok(ingredient.id)
    }

    async fn get_ingredient(&self, id: IngredientId) -> Result<Option<Ingredient>, StoreError> {
        let row = sqlx::query("SELECT id, name, unit FROM ingredient WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_ingredient", e))?;

        match row {
            Some(row) => {
                let id: Uuid = row
                    .try_get("id")
                    .map_err(|e| map_sqlx_error("get_ingredient", e))?;
                let name: String = row
                    .try_get("name")
                    .map_err(|e| map_sqlx_error("get_ingredient", e))?;
                let unit: String = row
                    .try_get("unit")
                    .map_err(|e| map_sqlx_error("get_ingredient", e))?;
                Ok(Some(Ingredient {
                    id: IngredientId::from_uuid(id),
                    name,
                    unit,
                }))
            }
            None => Ok(None),
        }
    }

    async fn ingredient_exists(&self, id: IngredientId) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM ingredient WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ingredient_exists", e))?;
        Ok(row.is_some())
    }
}
