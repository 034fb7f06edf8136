//! Application services: checkout, inventory and refunds.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::aggregates::PaymentPolicy;
use crate::repository::{
    CartRepository, CatalogRepository, OrderRepository, PaymentRepository, StockLedger, WishlistRepository,
};

pub mod checkout;
pub mod events;
pub mod inventory;
pub mod refund;

pub use checkout::{CheckoutService, PaymentInitiation, PaymentResult, PlaceOrder, RedirectInfo};
pub use events::{EventBus, EventHandler, OrderPaymentProjector};
pub use inventory::InventoryAdjuster;
pub use refund::RefundWorkflow;

/// How many times a read-modify-write cycle is retried after a version conflict.
pub(crate) const MAX_CONFLICT_RETRIES: usize = 5;

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// The storage ports services are built from.
#[derive(Clone)]
pub struct Repositories {
    pub payments: Arc<dyn PaymentRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub catalog: Arc<dyn CatalogRepository>,
    pub stock: Arc<dyn StockLedger>,
    pub carts: Arc<dyn CartRepository>,
    pub wishlists: Arc<dyn WishlistRepository>,
}

impl Repositories {
    /// Uses one store for every port.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: PaymentRepository + OrderRepository + CatalogRepository + StockLedger + CartRepository + WishlistRepository + 'static,
    {
        Self {
            payments: store.clone(),
            orders: store.clone(),
            catalog: store.clone(),
            stock: store.clone(),
            carts: store.clone(),
            wishlists: store,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PaymentSettings {
    pub policy: PaymentPolicy,
    pub currency: String,
    pub gateway_timeout: Duration,
    /// Attempts allowed before a payment is marked failed; counts the first one.
    pub max_gateway_attempts: u32,
    pub retry_base_delay: Duration,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            policy: PaymentPolicy::default(),
            currency: "NGN".to_string(),
            gateway_timeout: Duration::from_secs(10),
            max_gateway_attempts: 3,
            retry_base_delay: Duration::from_millis(200),
        }
    }
}

/// Exponential backoff: `base`, `2 * base`, `4 * base`, ... capped at 30s.
pub(crate) fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(400));
        assert_eq!(backoff_delay(base, 40), MAX_BACKOFF);
    }
}
