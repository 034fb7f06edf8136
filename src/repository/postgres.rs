//! Postgres storage.
//!
//! Payments, orders, carts and wishlists are stored as JSONB documents next
//! to the columns they are looked up by. Product stock is a plain integer
//! column so that it can be decremented conditionally inside a transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use uuid::Uuid;

use super::{
    AdjustmentOutcome, CartRepository, CatalogRepository, OrderRepository, PaymentRepository, StockLedger, StockLine,
    WishlistRepository,
};
use crate::domain::aggregates::{Cart, Order, Payment, Product, ProductSnapshot, ProductStatus, Wishlist};
use crate::domain::value_objects::{Money, Sku};
use crate::{Result, StorefrontError};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    id: Uuid,
    sku: String,
    name: String,
    description: Option<String>,
    price: i64,
    currency: String,
    inventory_quantity: i32,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ProductRow {
    fn into_product(self) -> Result<Product> {
        Ok(Product::restore(
            self.id, Sku::new(self.sku)?, self.name, self.description.unwrap_or_default(),
            Money::new(self.price, &self.currency), self.inventory_quantity.max(0) as u32,
            ProductStatus::parse(&self.status), self.created_at, self.updated_at,
        ))
    }
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new().max_connections(10).connect(database_url).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    async fn product_row(&self, id: Uuid) -> Result<Option<ProductRow>> {
        let row = sqlx::query_as::<_, ProductRow>("SELECT id, sku, name, description, price, currency, inventory_quantity, status, created_at, updated_at FROM products WHERE id = $1")
            .bind(id).fetch_optional(&self.pool).await?;
        Ok(row)
    }

    async fn fetch_payment(&self, column: &str, value: &str) -> Result<Option<Payment>> {
        let sql = format!("SELECT doc, version FROM payments WHERE {column} = $1");
        let row = sqlx::query_as::<_, (Json<Payment>, i64)>(&sql).bind(value).fetch_optional(&self.pool).await?;
        Ok(row.map(|(Json(mut payment), version)| { payment.committed(version as u64); payment }))
    }
}

fn quantity_param(quantity: u32) -> Result<i32> {
    i32::try_from(quantity).map_err(|_| StorefrontError::validation(format!("quantity {quantity} out of range")))
}

#[async_trait]
impl PaymentRepository for PgStore {
    async fn save(&self, payment: &mut Payment) -> Result<()> {
        let expected = payment.version();
        let result = if expected == 0 {
            sqlx::query("INSERT INTO payments (id, reference_id, order_id, user_id, transaction_id, status, version, doc, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, 1, $7, NOW(), NOW()) ON CONFLICT DO NOTHING")
                .bind(payment.id()).bind(payment.reference_id().as_str()).bind(payment.order_id()).bind(payment.user_id())
                .bind(payment.transaction_id()).bind(payment.status().as_str()).bind(Json(&*payment))
                .execute(&self.pool).await?
        } else {
            sqlx::query("UPDATE payments SET transaction_id = $2, status = $3, doc = $4, version = version + 1, updated_at = NOW() WHERE id = $1 AND version = $5")
                .bind(payment.id()).bind(payment.transaction_id()).bind(payment.status().as_str()).bind(Json(&*payment))
                .bind(expected as i64)
                .execute(&self.pool).await?
        };
        if result.rows_affected() == 0 {
            return Err(StorefrontError::Conflict(format!("payment {}", payment.reference_id())));
        }
        payment.committed(expected + 1);
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Payment>> {
        let row = sqlx::query_as::<_, (Json<Payment>, i64)>("SELECT doc, version FROM payments WHERE id = $1")
            .bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(|(Json(mut payment), version)| { payment.committed(version as u64); payment }))
    }

    async fn find_by_reference(&self, reference_id: &str) -> Result<Option<Payment>> {
        self.fetch_payment("reference_id", reference_id).await
    }

    async fn find_by_transaction_id(&self, transaction_id: &str) -> Result<Option<Payment>> {
        self.fetch_payment("transaction_id", transaction_id).await
    }

    async fn find_by_order(&self, order_id: Uuid, user_id: Uuid) -> Result<Vec<Payment>> {
        let rows = sqlx::query_as::<_, (Json<Payment>, i64)>("SELECT doc, version FROM payments WHERE order_id = $1 AND user_id = $2 ORDER BY id")
            .bind(order_id).bind(user_id).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(Json(mut payment), version)| { payment.committed(version as u64); payment }).collect())
    }
}

#[async_trait]
impl OrderRepository for PgStore {
    async fn save(&self, order: &mut Order) -> Result<()> {
        let expected = order.version();
        let result = if expected == 0 {
            sqlx::query("INSERT INTO orders (id, order_number, user_id, status, version, doc, created_at, updated_at) VALUES ($1, $2, $3, $4, 1, $5, NOW(), NOW()) ON CONFLICT DO NOTHING")
                .bind(order.id()).bind(order.order_number()).bind(order.user_id()).bind(order.status().as_str()).bind(Json(&*order))
                .execute(&self.pool).await?
        } else {
            sqlx::query("UPDATE orders SET status = $2, doc = $3, version = version + 1, updated_at = NOW() WHERE id = $1 AND version = $4")
                .bind(order.id()).bind(order.status().as_str()).bind(Json(&*order)).bind(expected as i64)
                .execute(&self.pool).await?
        };
        if result.rows_affected() == 0 {
            return Err(StorefrontError::Conflict(format!("order {}", order.id())));
        }
        order.committed(expected + 1);
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Order>> {
        let row = sqlx::query_as::<_, (Json<Order>, i64)>("SELECT doc, version FROM orders WHERE id = $1")
            .bind(id).fetch_optional(&self.pool).await?;
        Ok(row.map(|(Json(mut order), version)| { order.committed(version as u64); order }))
    }
}

#[async_trait]
impl CatalogRepository for PgStore {
    async fn get_product(&self, id: Uuid) -> Result<Option<ProductSnapshot>> {
        match self.product_row(id).await? {
            Some(row) => Ok(Some(row.into_product()?.snapshot())),
            None => Ok(None),
        }
    }

    async fn save_product(&self, product: &Product) -> Result<()> {
        // Stock is owned by the ledger once the product exists.
        sqlx::query("INSERT INTO products (id, sku, name, description, price, currency, inventory_quantity, status, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
                     ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name, description = EXCLUDED.description, price = EXCLUDED.price, currency = EXCLUDED.currency, status = EXCLUDED.status, updated_at = EXCLUDED.updated_at")
            .bind(product.id()).bind(product.sku().as_str()).bind(product.name()).bind(product.description())
            .bind(product.price().amount()).bind(product.price().currency()).bind(quantity_param(product.stock().value())?)
            .bind(product.status().as_str()).bind(product.created_at()).bind(product.updated_at())
            .execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl StockLedger for PgStore {
    async fn decrement(&self, order_id: Uuid, lines: &[StockLine]) -> Result<AdjustmentOutcome> {
        let mut tx = self.pool.begin().await?;
        let marker = sqlx::query("INSERT INTO stock_reservations (order_id, lines, reserved_at) VALUES ($1, $2, NOW()) ON CONFLICT (order_id) DO NOTHING")
            .bind(order_id).bind(Json(lines)).execute(&mut *tx).await?;
        if marker.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(AdjustmentOutcome::AlreadyApplied);
        }

        // Fixed lock order across concurrent orders.
        let mut sorted = lines.to_vec();
        sorted.sort_by_key(|l| l.product_id);
        for line in &sorted {
            let quantity = quantity_param(line.quantity)?;
            let updated = sqlx::query("UPDATE products SET inventory_quantity = inventory_quantity - $2, updated_at = NOW() WHERE id = $1 AND inventory_quantity >= $2")
                .bind(line.product_id).bind(quantity).execute(&mut *tx).await?;
            if updated.rows_affected() == 0 {
                let available: Option<i32> = sqlx::query_scalar("SELECT inventory_quantity FROM products WHERE id = $1")
                    .bind(line.product_id).fetch_optional(&mut *tx).await?;
                tx.rollback().await?;
                return Err(match available {
                    Some(available) => StorefrontError::InsufficientStock { product_id: line.product_id, requested: line.quantity, available: available.max(0) as u32 },
                    None => StorefrontError::not_found(format!("product {}", line.product_id)),
                });
            }
        }
        tx.commit().await?;
        Ok(AdjustmentOutcome::Applied)
    }

    async fn restore(&self, order_id: Uuid) -> Result<AdjustmentOutcome> {
        let mut tx = self.pool.begin().await?;
        let reserved: Option<Json<Vec<StockLine>>> = sqlx::query_scalar("SELECT lines FROM stock_reservations WHERE order_id = $1 FOR UPDATE")
            .bind(order_id).fetch_optional(&mut *tx).await?;
        let Some(Json(mut lines)) = reserved else {
            tx.rollback().await?;
            return Ok(AdjustmentOutcome::NothingToRestore);
        };
        let marker = sqlx::query("INSERT INTO stock_restorations (order_id, restored_at) VALUES ($1, NOW()) ON CONFLICT (order_id) DO NOTHING")
            .bind(order_id).execute(&mut *tx).await?;
        if marker.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(AdjustmentOutcome::AlreadyApplied);
        }
        lines.sort_by_key(|l| l.product_id);
        for line in &lines {
            sqlx::query("UPDATE products SET inventory_quantity = inventory_quantity + $2, updated_at = NOW() WHERE id = $1")
                .bind(line.product_id).bind(quantity_param(line.quantity)?).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(AdjustmentOutcome::Applied)
    }
}

#[async_trait]
impl CartRepository for PgStore {
    async fn load(&self, user_id: Uuid) -> Result<Cart> {
        let doc: Option<Json<Cart>> = sqlx::query_scalar("SELECT doc FROM carts WHERE user_id = $1")
            .bind(user_id).fetch_optional(&self.pool).await?;
        Ok(doc.map(|Json(cart)| cart).unwrap_or_else(|| Cart::for_user(user_id)))
    }

    async fn save(&self, cart: &Cart) -> Result<()> {
        sqlx::query("INSERT INTO carts (user_id, doc, updated_at) VALUES ($1, $2, NOW()) ON CONFLICT (user_id) DO UPDATE SET doc = EXCLUDED.doc, updated_at = NOW()")
            .bind(cart.user_id()).bind(Json(cart)).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl WishlistRepository for PgStore {
    async fn load(&self, user_id: Uuid) -> Result<Wishlist> {
        let doc: Option<Json<Wishlist>> = sqlx::query_scalar("SELECT doc FROM wishlists WHERE user_id = $1")
            .bind(user_id).fetch_optional(&self.pool).await?;
        Ok(doc.map(|Json(list)| list).unwrap_or_else(|| Wishlist::for_user(user_id)))
    }

    async fn save(&self, wishlist: &Wishlist) -> Result<()> {
        sqlx::query("INSERT INTO wishlists (user_id, doc, updated_at) VALUES ($1, $2, NOW()) ON CONFLICT (user_id) DO UPDATE SET doc = EXCLUDED.doc, updated_at = NOW()")
            .bind(wishlist.user_id()).bind(Json(wishlist)).execute(&self.pool).await?;
        Ok(())
    }
}
