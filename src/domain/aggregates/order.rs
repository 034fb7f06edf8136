//! Order Aggregate
//!
//! Totals are computed once, when the order is placed. Line items carry a
//! copy of the catalog price at that moment so later price changes never
//! alter a historical order.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::aggregates::product::ProductSnapshot;
use crate::domain::events::{DomainEvent, OrderEvent, PaymentEvent};
use crate::domain::value_objects::{Money, MoneyError, Sku};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: Uuid,
    order_number: String,
    user_id: Uuid,
    email: String,
    status: OrderStatus,
    fulfillment: FulfillmentStatus,
    items: Vec<LineItem>,
    subtotal: Money,
    discount: Discount,
    discount_total: Money,
    shipping: Money,
    total: Money,
    cancelled_by: Option<Uuid>,
    cancelled_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    version: u64,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem { pub product_id: Uuid, pub sku: Sku, pub name: String, pub quantity: u32, pub unit_price: Money, pub total: Money }

impl LineItem {
    /// Freezes the product's current price into a line item.
    pub fn snapshot(product: &ProductSnapshot, quantity: u32) -> Result<Self, OrderError> {
        if quantity == 0 { return Err(OrderError::InvalidQuantity(product.id)); }
        let total = product.price.multiply(quantity)?;
        Ok(Self { product_id: product.id, sku: product.sku.clone(), name: product.name.clone(), quantity, unit_price: product.price.clone(), total })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Discount {
    #[default]
    None,
    Fixed(i64),
    Percent(Decimal),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus { #[default] Pending, Paid, Processing, Shipped, Delivered, Cancelled, Refunded }

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentStatus { #[default] Unfulfilled, Partial, Fulfilled }

impl Order {
    pub fn place(user_id: Uuid, email: impl Into<String>, items: Vec<LineItem>, discount: Discount, shipping: Money) -> Result<Self, OrderError> {
        if items.is_empty() { return Err(OrderError::NoItems); }
        let currency = shipping.currency().to_string();
        let mut subtotal = Money::zero(&currency);
        for item in &items {
            if item.quantity == 0 { return Err(OrderError::InvalidQuantity(item.product_id)); }
            subtotal = subtotal.add(&item.total)?;
        }
        let discount_total = match &discount {
            Discount::None => Money::zero(&currency),
            Discount::Fixed(amount) if *amount < 0 => return Err(OrderError::InvalidDiscount),
            Discount::Fixed(amount) => Money::new((*amount).min(subtotal.amount()), &currency),
            Discount::Percent(pct) => subtotal.percentage(*pct).map_err(|_| OrderError::InvalidDiscount)?,
        };
        let total = subtotal.saturating_sub(&discount_total)?.add(&shipping)?;

        let id = Uuid::now_v7();
        let now = Utc::now();
        let mut order = Self {
            id, order_number: format!("ORD-{:08}", rand::random::<u32>() % 100_000_000), user_id, email: email.into(),
            status: OrderStatus::Pending, fulfillment: FulfillmentStatus::Unfulfilled,
            items, subtotal, discount, discount_total, shipping, total,
            cancelled_by: None, cancelled_at: None, created_at: now, updated_at: now,
            version: 0, events: vec![],
        };
        order.raise_event(DomainEvent::Order(OrderEvent::Placed { order_id: id, user_id, total: order.total.amount() }));
        Ok(order)
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn order_number(&self) -> &str { &self.order_number }
    pub fn user_id(&self) -> Uuid { self.user_id }
    pub fn email(&self) -> &str { &self.email }
    pub fn status(&self) -> OrderStatus { self.status }
    pub fn fulfillment(&self) -> FulfillmentStatus { self.fulfillment }
    pub fn items(&self) -> &[LineItem] { &self.items }
    pub fn subtotal(&self) -> &Money { &self.subtotal }
    pub fn discount_total(&self) -> &Money { &self.discount_total }
    pub fn total(&self) -> &Money { &self.total }
    pub fn cancelled_by(&self) -> Option<Uuid> { self.cancelled_by }
    pub fn version(&self) -> u64 { self.version }

    pub fn can_cancel(&self) -> bool {
        matches!(self.status, OrderStatus::Pending | OrderStatus::Paid) && self.fulfillment == FulfillmentStatus::Unfulfilled
    }

    pub fn cancel(&mut self, actor: Uuid, now: DateTime<Utc>) -> Result<(), OrderError> {
        if !self.can_cancel() { return Err(OrderError::CannotCancel(self.status)); }
        self.status = OrderStatus::Cancelled;
        self.cancelled_by = Some(actor);
        self.cancelled_at = Some(now);
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::Cancelled { order_id: self.id, actor }));
        Ok(())
    }

    pub fn start_fulfillment(&mut self) -> Result<(), OrderError> {
        if self.status != OrderStatus::Paid { return Err(OrderError::NotPaid(self.status)); }
        self.status = OrderStatus::Processing;
        self.fulfillment = FulfillmentStatus::Partial;
        self.touch();
        self.raise_event(DomainEvent::Order(OrderEvent::FulfillmentStarted { order_id: self.id }));
        Ok(())
    }

    /// Projects a payment event onto the order. Returns whether anything changed.
    pub fn apply_payment_event(&mut self, event: &PaymentEvent) -> bool {
        if event.order_id() != self.id { return false; }
        match event {
            PaymentEvent::Completed { .. } if self.status == OrderStatus::Pending => {
                self.status = OrderStatus::Paid;
                self.touch();
                self.raise_event(DomainEvent::Order(OrderEvent::Paid { order_id: self.id }));
                true
            }
            PaymentEvent::RefundRequested { .. } if !matches!(self.status, OrderStatus::Cancelled | OrderStatus::Refunded) => {
                self.status = OrderStatus::Refunded;
                self.touch();
                self.raise_event(DomainEvent::Order(OrderEvent::Refunded { order_id: self.id }));
                true
            }
            _ => false,
        }
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }

    pub(crate) fn committed(&mut self, version: u64) { self.version = version; }

    fn raise_event(&mut self, e: DomainEvent) { self.events.push(e); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderError {
    #[error("order has no items")]
    NoItems,
    #[error("invalid quantity for product {0}")]
    InvalidQuantity(Uuid),
    #[error("invalid discount")]
    InvalidDiscount,
    #[error("cannot cancel a {} order once fulfillment has started", .0.as_str())]
    CannotCancel(OrderStatus),
    #[error("order is {}, not paid", .0.as_str())]
    NotPaid(OrderStatus),
    #[error(transparent)]
    Amount(#[from] MoneyError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(price: i64) -> ProductSnapshot {
        ProductSnapshot { id: Uuid::now_v7(), sku: Sku::new("W001").unwrap(), name: "Widget".into(), price: Money::new(price, "NGN"), stock: 10 }
    }

    fn order_with(discount: Discount) -> Order {
        let item = LineItem::snapshot(&product(1000), 3).unwrap();
        Order::place(Uuid::now_v7(), "test@example.com", vec![item], discount, Money::new(500, "NGN")).unwrap()
    }

    #[test]
    fn test_totals_with_discounts() {
        let plain = order_with(Discount::None);
        assert_eq!(plain.subtotal().amount(), 3000);
        assert_eq!(plain.total().amount(), 3500);

        let fixed = order_with(Discount::Fixed(200));
        assert_eq!(fixed.total().amount(), 3300);

        let percent = order_with(Discount::Percent(Decimal::new(10, 0)));
        assert_eq!(percent.discount_total().amount(), 300);
        assert_eq!(percent.total().amount(), 3200);

        let capped = order_with(Discount::Fixed(10_000));
        assert_eq!(capped.total().amount(), 500);
    }

    #[test]
    fn test_price_is_frozen_at_order_time() {
        let mut p = product(1000);
        let order = Order::place(Uuid::now_v7(), "a@b.c", vec![LineItem::snapshot(&p, 2).unwrap()], Discount::None, Money::zero("NGN")).unwrap();
        p.price = Money::new(9999, "NGN");
        assert_eq!(order.items()[0].unit_price.amount(), 1000);
        assert_eq!(order.total().amount(), 2000);
    }

    #[test]
    fn test_empty_order_rejected() {
        assert_eq!(Order::place(Uuid::now_v7(), "a@b.c", vec![], Discount::None, Money::zero("NGN")).unwrap_err(), OrderError::NoItems);
        assert!(LineItem::snapshot(&product(10), 0).is_err());
    }

    #[test]
    fn test_cancel_only_before_fulfillment() {
        let mut order = order_with(Discount::None);
        let actor = Uuid::now_v7();
        let completed = PaymentEvent::Completed { payment_id: Uuid::now_v7(), order_id: order.id(), transaction_id: "TX".into() };
        assert!(order.apply_payment_event(&completed));
        assert_eq!(order.status(), OrderStatus::Paid);
        order.start_fulfillment().unwrap();
        assert_eq!(order.cancel(actor, Utc::now()).unwrap_err(), OrderError::CannotCancel(OrderStatus::Processing));

        let mut fresh = order_with(Discount::None);
        fresh.cancel(actor, Utc::now()).unwrap();
        assert_eq!(fresh.status(), OrderStatus::Cancelled);
        assert_eq!(fresh.cancelled_by(), Some(actor));
    }

    #[test]
    fn test_payment_events_are_idempotent() {
        let mut order = order_with(Discount::None);
        let refund = PaymentEvent::RefundRequested { payment_id: Uuid::now_v7(), order_id: order.id(), amount: 100, actor: Uuid::now_v7() };
        assert!(order.apply_payment_event(&refund));
        assert!(!order.apply_payment_event(&refund));
        assert_eq!(order.status(), OrderStatus::Refunded);

        let other = PaymentEvent::Completed { payment_id: Uuid::now_v7(), order_id: Uuid::now_v7(), transaction_id: "TX".into() };
        assert!(!order.apply_payment_event(&other));
    }
}
