//! Post-commit event dispatch.
//!
//! Services call [`EventBus::dispatch`] with the events an aggregate raised,
//! after that aggregate has been saved. Handlers run in registration order;
//! events are also published to NATS when a client is configured. Events a
//! handler raises while reacting are dispatched the same way, after the
//! batch that caused them.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use super::MAX_CONFLICT_RETRIES;
use crate::domain::events::{DomainEvent, PaymentEvent};
use crate::repository::OrderRepository;
use crate::{Result, StorefrontError};

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Reacts to one event. Returns the events raised by aggregates the
    /// handler saved.
    async fn handle(&self, event: &DomainEvent) -> Result<Vec<DomainEvent>>;
}

#[derive(Default)]
pub struct EventBus {
    handlers: Vec<Arc<dyn EventHandler>>,
    nats: Option<async_nats::Client>,
}

impl EventBus {
    pub fn new() -> Self { Self::default() }

    pub fn with_nats(mut self, client: Option<async_nats::Client>) -> Self {
        self.nats = client;
        self
    }

    pub fn register(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Runs every handler for every event. A failing handler does not stop
    /// the others; the first failure is returned once all have run.
    pub async fn dispatch(&self, events: Vec<DomainEvent>) -> Result<()> {
        let mut queue = VecDeque::from(events);
        let mut first_error = None;
        while let Some(event) = queue.pop_front() {
            debug!(event_type = event.event_type(), "dispatching event");
            for handler in &self.handlers {
                match handler.handle(&event).await {
                    Ok(raised) => queue.extend(raised),
                    Err(e) => {
                        error!(handler = handler.name(), event_type = event.event_type(), error = %e, "event handler failed");
                        first_error.get_or_insert(e);
                    }
                }
            }
            self.publish(&event).await;
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn publish(&self, event: &DomainEvent) {
        let Some(client) = &self.nats else { return };
        let subject = format!("storefront.{}", event.event_type());
        match serde_json::to_vec(event) {
            Ok(payload) => {
                if let Err(e) = client.publish(subject, payload.into()).await {
                    warn!(event_type = event.event_type(), error = %e, "failed to publish event to NATS");
                }
            }
            Err(e) => warn!(event_type = event.event_type(), error = %e, "failed to encode event"),
        }
    }
}

/// Moves orders along when their payment completes or is refunded.
pub struct OrderPaymentProjector {
    orders: Arc<dyn OrderRepository>,
}

impl OrderPaymentProjector {
    pub fn new(orders: Arc<dyn OrderRepository>) -> Self { Self { orders } }
}

#[async_trait]
impl EventHandler for OrderPaymentProjector {
    fn name(&self) -> &'static str { "order_payment_projector" }

    async fn handle(&self, event: &DomainEvent) -> Result<Vec<DomainEvent>> {
        let DomainEvent::Payment(payment_event) = event else { return Ok(vec![]) };
        if !matches!(payment_event, PaymentEvent::Completed { .. } | PaymentEvent::RefundRequested { .. }) {
            return Ok(vec![]);
        }
        let order_id = payment_event.order_id();
        for _ in 0..MAX_CONFLICT_RETRIES {
            let Some(mut order) = self.orders.find(order_id).await? else {
                warn!(%order_id, "payment event for unknown order");
                return Ok(vec![]);
            };
            if !order.apply_payment_event(payment_event) {
                return Ok(vec![]);
            }
            match self.orders.save(&mut order).await {
                Ok(()) => {
                    info!(%order_id, status = order.status().as_str(), "order updated from payment");
                    return Ok(order.take_events());
                }
                Err(StorefrontError::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(StorefrontError::Conflict(format!("order {order_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::{Discount, LineItem, Order, OrderStatus, ProductSnapshot};
    use crate::domain::value_objects::{Money, Sku};
    use crate::repository::MemoryStore;
    use tokio::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<&'static str>>);

    #[async_trait]
    impl EventHandler for Recorder {
        fn name(&self) -> &'static str { "recorder" }

        async fn handle(&self, event: &DomainEvent) -> Result<Vec<DomainEvent>> {
            self.0.lock().await.push(event.event_type());
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_projected_order_events_are_dispatched() {
        let store = Arc::new(MemoryStore::new());
        let snapshot = ProductSnapshot { id: Uuid::now_v7(), sku: Sku::new("CAP").unwrap(), name: "Cap".into(), price: Money::new(3000, "NGN"), stock: 5 };
        let mut order = Order::place(Uuid::now_v7(), "p@example.com", vec![LineItem::snapshot(&snapshot, 1).unwrap()], Discount::None, Money::zero("NGN")).unwrap();
        OrderRepository::save(store.as_ref(), &mut order).await.unwrap();

        let recorder = Arc::new(Recorder::default());
        let bus = EventBus::new()
            .register(Arc::new(OrderPaymentProjector::new(store.clone())))
            .register(recorder.clone());
        let (payment_id, order_id) = (Uuid::now_v7(), order.id());
        bus.dispatch(vec![
            DomainEvent::Payment(PaymentEvent::Completed { payment_id, order_id, transaction_id: "GTX-7".into() }),
            DomainEvent::Payment(PaymentEvent::RefundRequested { payment_id, order_id, amount: 3000, actor: Uuid::now_v7() }),
        ]).await.unwrap();

        assert_eq!(
            *recorder.0.lock().await,
            ["payment.completed", "payment.refund_requested", "order.paid", "order.refunded"]
        );
        let stored = OrderRepository::find(store.as_ref(), order_id).await.unwrap().unwrap();
        assert_eq!(stored.status(), OrderStatus::Refunded);
    }
}
