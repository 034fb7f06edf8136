//! Domain events
//!
//! Aggregates record events as they change; services drain them with
//! `take_events` once the aggregate has been committed and hand them to the
//! event bus.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "aggregate", content = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    Payment(PaymentEvent),
    Order(OrderEvent),
    Inventory(InventoryEvent),
}

impl DomainEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Payment(e) => match e {
                PaymentEvent::Created { .. } => "payment.created",
                PaymentEvent::Processing { .. } => "payment.processing",
                PaymentEvent::Completed { .. } => "payment.completed",
                PaymentEvent::Failed { .. } => "payment.failed",
                PaymentEvent::Cancelled { .. } => "payment.cancelled",
                PaymentEvent::RefundRequested { .. } => "payment.refund_requested",
                PaymentEvent::RefundCompleted { .. } => "payment.refund_completed",
            },
            Self::Order(e) => match e {
                OrderEvent::Placed { .. } => "order.placed",
                OrderEvent::Paid { .. } => "order.paid",
                OrderEvent::FulfillmentStarted { .. } => "order.fulfillment_started",
                OrderEvent::Cancelled { .. } => "order.cancelled",
                OrderEvent::Refunded { .. } => "order.refunded",
            },
            Self::Inventory(e) => match e {
                InventoryEvent::Reserved { .. } => "inventory.reserved",
                InventoryEvent::Restored { .. } => "inventory.restored",
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentEvent {
    Created { payment_id: Uuid, order_id: Uuid, reference_id: String, amount: i64 },
    Processing { payment_id: Uuid, order_id: Uuid, gateway_ref: String },
    Completed { payment_id: Uuid, order_id: Uuid, transaction_id: String },
    Failed { payment_id: Uuid, order_id: Uuid, reason: String },
    Cancelled { payment_id: Uuid, order_id: Uuid },
    RefundRequested { payment_id: Uuid, order_id: Uuid, amount: i64, actor: Uuid },
    RefundCompleted { payment_id: Uuid, order_id: Uuid, transaction_id: String },
}

impl PaymentEvent {
    pub fn order_id(&self) -> Uuid {
        match self {
            Self::Created { order_id, .. }
            | Self::Processing { order_id, .. }
            | Self::Completed { order_id, .. }
            | Self::Failed { order_id, .. }
            | Self::Cancelled { order_id, .. }
            | Self::RefundRequested { order_id, .. }
            | Self::RefundCompleted { order_id, .. } => *order_id,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderEvent {
    Placed { order_id: Uuid, user_id: Uuid, total: i64 },
    Paid { order_id: Uuid },
    FulfillmentStarted { order_id: Uuid },
    Cancelled { order_id: Uuid, actor: Uuid },
    Refunded { order_id: Uuid },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InventoryEvent {
    Reserved { order_id: Uuid, lines: usize },
    Restored { order_id: Uuid, lines: usize },
}
