//! In-memory storage, used when no database is configured and in tests.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    AdjustmentOutcome, CartRepository, CatalogRepository, OrderRepository, PaymentRepository, StockLedger, StockLine,
    WishlistRepository,
};
use crate::domain::aggregates::{Cart, Order, Payment, Product, ProductSnapshot, Wishlist};
use crate::{Result, StorefrontError};

#[derive(Debug, Default)]
struct MemoryState {
    payments: HashMap<Uuid, Payment>,
    orders: HashMap<Uuid, Order>,
    products: HashMap<Uuid, Product>,
    reservations: HashMap<Uuid, Vec<StockLine>>,
    restored: HashSet<Uuid>,
    carts: HashMap<Uuid, Cart>,
    wishlists: HashMap<Uuid, Wishlist>,
}

/// Every repository port behind one mutex.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    /// Current stock of a product, for tests and diagnostics.
    pub async fn stock_of(&self, product_id: Uuid) -> Option<u32> {
        self.state.lock().await.products.get(&product_id).map(|p| p.stock().value())
    }
}

#[async_trait]
impl PaymentRepository for MemoryStore {
    async fn save(&self, payment: &mut Payment) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.payments.get(&payment.id()).map(Payment::version) {
            None if payment.version() == 0 => {
                if state.payments.values().any(|p| p.reference_id() == payment.reference_id()) {
                    return Err(StorefrontError::Conflict(format!("payment reference {}", payment.reference_id())));
                }
                if state.payments.values().any(|p| p.order_id() == payment.order_id() && p.status().blocks_new_payment()) {
                    return Err(StorefrontError::Conflict(format!("live payment for order {}", payment.order_id())));
                }
            }
            Some(stored) if stored == payment.version() => {}
            _ => return Err(StorefrontError::Conflict(format!("payment {}", payment.reference_id()))),
        }
        payment.committed(payment.version() + 1);
        let mut stored = payment.clone();
        stored.take_events();
        state.payments.insert(stored.id(), stored);
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Payment>> {
        Ok(self.state.lock().await.payments.get(&id).cloned())
    }

    async fn find_by_reference(&self, reference_id: &str) -> Result<Option<Payment>> {
        let state = self.state.lock().await;
        Ok(state.payments.values().find(|p| p.reference_id().as_str() == reference_id).cloned())
    }

    async fn find_by_transaction_id(&self, transaction_id: &str) -> Result<Option<Payment>> {
        let state = self.state.lock().await;
        Ok(state.payments.values().find(|p| p.transaction_id() == Some(transaction_id)).cloned())
    }

    async fn find_by_order(&self, order_id: Uuid, user_id: Uuid) -> Result<Vec<Payment>> {
        let state = self.state.lock().await;
        let mut found: Vec<Payment> = state.payments.values()
            .filter(|p| p.order_id() == order_id && p.user_id() == user_id)
            .cloned()
            .collect();
        found.sort_by_key(Payment::id);
        Ok(found)
    }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn save(&self, order: &mut Order) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.orders.get(&order.id()).map(Order::version) {
            None if order.version() == 0 => {}
            Some(stored) if stored == order.version() => {}
            _ => return Err(StorefrontError::Conflict(format!("order {}", order.id()))),
        }
        order.committed(order.version() + 1);
        let mut stored = order.clone();
        stored.take_events();
        state.orders.insert(stored.id(), stored);
        Ok(())
    }

    async fn find(&self, id: Uuid) -> Result<Option<Order>> {
        Ok(self.state.lock().await.orders.get(&id).cloned())
    }
}

#[async_trait]
impl CatalogRepository for MemoryStore {
    async fn get_product(&self, id: Uuid) -> Result<Option<ProductSnapshot>> {
        Ok(self.state.lock().await.products.get(&id).map(Product::snapshot))
    }

    async fn save_product(&self, product: &Product) -> Result<()> {
        self.state.lock().await.products.insert(product.id(), product.clone());
        Ok(())
    }
}

#[async_trait]
impl StockLedger for MemoryStore {
    async fn decrement(&self, order_id: Uuid, lines: &[StockLine]) -> Result<AdjustmentOutcome> {
        let mut state = self.state.lock().await;
        if state.reservations.contains_key(&order_id) {
            return Ok(AdjustmentOutcome::AlreadyApplied);
        }
        // Check every line before touching any product.
        for line in lines {
            let available = state.products.get(&line.product_id)
                .ok_or_else(|| StorefrontError::not_found(format!("product {}", line.product_id)))?
                .stock()
                .value();
            if available < line.quantity {
                return Err(StorefrontError::InsufficientStock { product_id: line.product_id, requested: line.quantity, available });
            }
        }
        for line in lines {
            if let Some(product) = state.products.get_mut(&line.product_id) {
                product.remove_stock(line.quantity)?;
            }
        }
        state.reservations.insert(order_id, lines.to_vec());
        Ok(AdjustmentOutcome::Applied)
    }

    async fn restore(&self, order_id: Uuid) -> Result<AdjustmentOutcome> {
        let mut state = self.state.lock().await;
        if state.restored.contains(&order_id) {
            return Ok(AdjustmentOutcome::AlreadyApplied);
        }
        let Some(lines) = state.reservations.get(&order_id).cloned() else {
            return Ok(AdjustmentOutcome::NothingToRestore);
        };
        for line in &lines {
            if let Some(product) = state.products.get_mut(&line.product_id) {
                product.add_stock(line.quantity);
            }
        }
        state.restored.insert(order_id);
        Ok(AdjustmentOutcome::Applied)
    }
}

#[async_trait]
impl CartRepository for MemoryStore {
    async fn load(&self, user_id: Uuid) -> Result<Cart> {
        Ok(self.state.lock().await.carts.get(&user_id).cloned().unwrap_or_else(|| Cart::for_user(user_id)))
    }

    async fn save(&self, cart: &Cart) -> Result<()> {
        self.state.lock().await.carts.insert(cart.user_id(), cart.clone());
        Ok(())
    }
}

#[async_trait]
impl WishlistRepository for MemoryStore {
    async fn load(&self, user_id: Uuid) -> Result<Wishlist> {
        Ok(self.state.lock().await.wishlists.get(&user_id).cloned().unwrap_or_else(|| Wishlist::for_user(user_id)))
    }

    async fn save(&self, wishlist: &Wishlist) -> Result<()> {
        self.state.lock().await.wishlists.insert(wishlist.user_id(), wishlist.clone());
        Ok(())
    }
}
