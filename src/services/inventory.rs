//! Inventory adjuster: per-order stock reservation and restoration.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::aggregates::Order;
use crate::domain::events::{DomainEvent, InventoryEvent};
use crate::repository::{AdjustmentOutcome, StockLedger, StockLine};
use crate::Result;

pub struct InventoryAdjuster {
    ledger: Arc<dyn StockLedger>,
}

impl InventoryAdjuster {
    pub fn new(ledger: Arc<dyn StockLedger>) -> Self { Self { ledger } }

    /// Reserves every line of the order. Returns the outcome plus the event to
    /// dispatch once the order itself is committed.
    pub async fn reserve(&self, order: &Order) -> Result<(AdjustmentOutcome, Vec<DomainEvent>)> {
        let lines = stock_lines(order);
        let outcome = self.ledger.decrement(order.id(), &lines).await?;
        let mut events = Vec::new();
        match outcome {
            AdjustmentOutcome::Applied => {
                info!(order_id = %order.id(), lines = lines.len(), "stock reserved");
                events.push(DomainEvent::Inventory(InventoryEvent::Reserved { order_id: order.id(), lines: lines.len() }));
            }
            _ => warn!(order_id = %order.id(), "stock already reserved for order"),
        }
        Ok((outcome, events))
    }

    /// Puts back what was reserved for the order. Safe to call repeatedly.
    pub async fn restore(&self, order: &Order) -> Result<(AdjustmentOutcome, Vec<DomainEvent>)> {
        let outcome = self.ledger.restore(order.id()).await?;
        let mut events = Vec::new();
        match outcome {
            AdjustmentOutcome::Applied => {
                info!(order_id = %order.id(), "stock restored");
                events.push(DomainEvent::Inventory(InventoryEvent::Restored { order_id: order.id(), lines: stock_lines(order).len() }));
            }
            AdjustmentOutcome::AlreadyApplied => info!(order_id = %order.id(), "stock already restored"),
            AdjustmentOutcome::NothingToRestore => info!(order_id = %order.id(), "no reservation to restore"),
        }
        Ok((outcome, events))
    }
}

/// One line per product, quantities of repeated products summed.
pub fn stock_lines(order: &Order) -> Vec<StockLine> {
    let mut merged: BTreeMap<Uuid, u32> = BTreeMap::new();
    for item in order.items() {
        let entry = merged.entry(item.product_id).or_default();
        *entry = entry.saturating_add(item.quantity);
    }
    merged.into_iter().map(|(product_id, quantity)| StockLine { product_id, quantity }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{Discount, LineItem, Product};
    use crate::domain::value_objects::{Money, Sku};
    use crate::repository::{CatalogRepository, MemoryStore};
    use crate::StorefrontError;

    async fn product(store: &MemoryStore, sku: &str, stock: u32) -> Product {
        let mut p = Product::create(Sku::new(sku).unwrap(), sku, Money::new(1000, "NGN")).unwrap();
        p.add_stock(stock);
        store.save_product(&p).await.unwrap();
        p
    }

    fn order(lines: &[(&Product, u32)]) -> Order {
        let items = lines.iter().map(|(p, q)| LineItem::snapshot(&p.snapshot(), *q).unwrap()).collect();
        Order::place(Uuid::now_v7(), "buyer@example.com", items, Discount::None, Money::zero("NGN")).unwrap()
    }

    #[test]
    fn test_duplicate_lines_are_merged() {
        let p = Product::create(Sku::new("DUP").unwrap(), "Dup", Money::new(1000, "NGN")).unwrap();
        let o = order(&[(&p, 2), (&p, 3)]);
        assert_eq!(stock_lines(&o), vec![StockLine { product_id: p.id(), quantity: 5 }]);
    }

    #[tokio::test]
    async fn test_reserve_then_restore() {
        let store = Arc::new(MemoryStore::new());
        let a = product(&store, "A", 10).await;
        let adjuster = InventoryAdjuster::new(store.clone());
        let o = order(&[(&a, 4)]);

        let (outcome, events) = adjuster.reserve(&o).await.unwrap();
        assert_eq!(outcome, AdjustmentOutcome::Applied);
        assert_eq!(events.len(), 1);
        assert_eq!(store.stock_of(a.id()).await, Some(6));

        assert_eq!(adjuster.restore(&o).await.unwrap().0, AdjustmentOutcome::Applied);
        let (again, events) = adjuster.restore(&o).await.unwrap();
        assert_eq!(again, AdjustmentOutcome::AlreadyApplied);
        assert!(events.is_empty());
        assert_eq!(store.stock_of(a.id()).await, Some(10));
    }

    #[tokio::test]
    async fn test_insufficient_stock_changes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let a = product(&store, "A", 10).await;
        let b = product(&store, "B", 5).await;
        let adjuster = InventoryAdjuster::new(store.clone());

        let err = adjuster.reserve(&order(&[(&a, 3), (&b, 1000)])).await.unwrap_err();
        assert!(matches!(err, StorefrontError::InsufficientStock { product_id, requested: 1000, available: 5 } if product_id == b.id()));
        assert_eq!(store.stock_of(a.id()).await, Some(10));
        assert_eq!(store.stock_of(b.id()).await, Some(5));
    }
}
