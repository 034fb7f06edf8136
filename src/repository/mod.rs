//! Storage ports.
//!
//! Services receive these as trait objects. Saves of payments and orders are
//! compare-and-swap on the aggregate's version: a save made from a stale copy
//! fails with [`StorefrontError::Conflict`](crate::StorefrontError::Conflict)
//! and the caller reloads and retries.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::aggregates::{Cart, Order, Payment, Product, ProductSnapshot, Wishlist};
use crate::Result;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Inserts a new payment or updates an existing one at its loaded version.
    /// On success the payment's version is advanced.
    async fn save(&self, payment: &mut Payment) -> Result<()>;

    async fn find(&self, id: Uuid) -> Result<Option<Payment>>;

    async fn find_by_reference(&self, reference_id: &str) -> Result<Option<Payment>>;

    async fn find_by_transaction_id(&self, transaction_id: &str) -> Result<Option<Payment>>;

    /// All payments of an order, oldest first.
    async fn find_by_order(&self, order_id: Uuid, user_id: Uuid) -> Result<Vec<Payment>>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn save(&self, order: &mut Order) -> Result<()>;

    async fn find(&self, id: Uuid) -> Result<Option<Order>>;
}

/// The catalog capability checkout reads prices and stock from.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn get_product(&self, id: Uuid) -> Result<Option<ProductSnapshot>>;

    async fn save_product(&self, product: &Product) -> Result<()>;
}

/// One stock change for one product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLine {
    pub product_id: Uuid,
    pub quantity: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustmentOutcome {
    Applied,
    /// This order's adjustment had already been made; nothing changed.
    AlreadyApplied,
    /// Nothing was ever reserved for this order.
    NothingToRestore,
}

/// Per-order stock changes against shared product counters.
#[async_trait]
pub trait StockLedger: Send + Sync {
    /// Takes every line's quantity out of stock, or changes nothing and fails
    /// with `InsufficientStock` if any product would go negative. Lines must
    /// name distinct products.
    async fn decrement(&self, order_id: Uuid, lines: &[StockLine]) -> Result<AdjustmentOutcome>;

    /// Puts back exactly what was reserved for the order, at most once.
    async fn restore(&self, order_id: Uuid) -> Result<AdjustmentOutcome>;
}

#[async_trait]
pub trait CartRepository: Send + Sync {
    /// Returns the user's cart, or an empty one.
    async fn load(&self, user_id: Uuid) -> Result<Cart>;

    async fn save(&self, cart: &Cart) -> Result<()>;
}

#[async_trait]
pub trait WishlistRepository: Send + Sync {
    async fn load(&self, user_id: Uuid) -> Result<Wishlist>;

    async fn save(&self, wishlist: &Wishlist) -> Result<()>;
}
