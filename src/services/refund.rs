//! Refund workflow: refunds and order cancellation.
//!
//! A refund is recorded on the payment first. Stock is restored afterwards;
//! if that step fails the payment keeps its pending refund and
//! [`RefundWorkflow::resume_refund`] finishes the job.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{EventBus, InventoryAdjuster, Repositories, MAX_CONFLICT_RETRIES};
use crate::domain::aggregates::{Order, OrderError, OrderStatus, Payment, PaymentError, PaymentPolicy, PaymentStatus};
use crate::repository::{OrderRepository, PaymentRepository};
use crate::{Result, StorefrontError};

const CANCELLATION_REASON: &str = "order cancelled";

pub struct RefundWorkflow {
    payments: Arc<dyn PaymentRepository>,
    orders: Arc<dyn OrderRepository>,
    inventory: InventoryAdjuster,
    events: Arc<EventBus>,
    policy: PaymentPolicy,
}

impl RefundWorkflow {
    pub fn new(repos: &Repositories, events: Arc<EventBus>, policy: PaymentPolicy) -> Self {
        Self {
            payments: repos.payments.clone(),
            orders: repos.orders.clone(),
            inventory: InventoryAdjuster::new(repos.stock.clone()),
            events,
            policy,
        }
    }

    /// Refunds a completed payment, in full when `amount` is `None`.
    ///
    /// Of two concurrent requests for one payment, the second reloads after
    /// its version conflict, finds the payment refunded and is refused.
    pub async fn request_refund(&self, reference_id: &str, amount: Option<i64>, reason: &str, actor: Uuid) -> Result<Payment> {
        let mut payment = self.mutate_payment(reference_id, |payment, now| {
            let amount = amount.unwrap_or_else(|| payment.amount().amount());
            payment.process_refund(amount, reason, actor, now, &self.policy)
        }).await?;
        info!(reference_id, order_id = %payment.order_id(), %actor, "refund requested");

        let dispatched = self.events.dispatch(payment.take_events()).await;
        self.restore_stock(&payment).await?;
        dispatched?;
        Ok(payment)
    }

    /// Re-runs stock restoration for a payment whose refund is still pending.
    pub async fn resume_refund(&self, reference_id: &str) -> Result<Payment> {
        let payment = self.payment(reference_id).await?;
        if !payment.has_pending_refund() {
            return Err(PaymentError::NoPendingRefund.into());
        }
        info!(reference_id, "resuming refund restoration");
        self.restore_stock(&payment).await?;
        Ok(payment)
    }

    /// Marks a pending refund as paid out, once the gateway confirms it.
    pub async fn complete_refund(&self, reference_id: &str, transaction_id: &str) -> Result<Payment> {
        let mut payment = self.mutate_payment(reference_id, |payment, now| payment.complete_refund(transaction_id, now)).await?;
        info!(reference_id, transaction_id, "refund completed");
        self.events.dispatch(payment.take_events()).await?;
        Ok(payment)
    }

    /// Cancels an order before fulfillment.
    ///
    /// A completed payment is refunded in full and pending payments are
    /// cancelled. Payments still processing must be reconciled first. Calling
    /// this again on a cancelled order finishes whatever the first call left
    /// undone: the refund first, then the stock restoration.
    pub async fn cancel_order(&self, order_id: Uuid, actor: Uuid) -> Result<Order> {
        for _ in 0..MAX_CONFLICT_RETRIES {
            let mut order = self.order(order_id).await?;
            if order.status() == OrderStatus::Cancelled {
                self.settle_cancelled(&order, actor).await?;
                return Ok(order);
            }
            if !order.can_cancel() {
                return Err(OrderError::CannotCancel(order.status()).into());
            }

            let payments = self.payments.find_by_order(order_id, order.user_id()).await?;
            if let Some(processing) = payments.iter().find(|p| p.status() == PaymentStatus::Processing) {
                return Err(StorefrontError::invalid_state(format!(
                    "payment {} is still processing, reconcile it before cancelling",
                    processing.reference_id()
                )));
            }
            let completed = payments.iter().find(|p| p.is_successful());
            if let Some(payment) = completed {
                payment.refund_eligibility(Utc::now(), &self.policy).map_err(StorefrontError::RefundNotAllowed)?;
            }

            order.cancel(actor, Utc::now())?;
            match self.orders.save(&mut order).await {
                Ok(()) => {}
                Err(StorefrontError::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
            info!(%order_id, %actor, "order cancelled");
            let mut events = order.take_events();

            if let Some(payment) = completed {
                self.events.dispatch(events).await?;
                self.request_refund(payment.reference_id().as_str(), None, CANCELLATION_REASON, actor).await?;
                return Ok(order);
            }

            for pending in payments.iter().filter(|p| p.status() == PaymentStatus::Pending) {
                let mut cancelled = self.mutate_payment(pending.reference_id().as_str(), |payment, _| match payment.status() {
                    PaymentStatus::Pending => payment.cancel(),
                    PaymentStatus::Failed | PaymentStatus::Cancelled => Ok(()),
                    from => Err(PaymentError::InvalidTransition { from, action: "cancel" }),
                }).await?;
                events.extend(cancelled.take_events());
            }
            let (_, restored) = self.inventory.restore(&order).await?;
            events.extend(restored);
            self.events.dispatch(events).await?;
            return Ok(order);
        }
        Err(StorefrontError::Conflict(format!("order {order_id}")))
    }

    /// Brings a cancelled order's payments and stock in line with it. A
    /// completed payment is refunded before any stock goes back.
    pub(crate) async fn settle_cancelled(&self, order: &Order, actor: Uuid) -> Result<()> {
        let payments = self.payments.find_by_order(order.id(), order.user_id()).await?;
        if let Some(paid) = payments.iter().find(|p| p.is_successful()) {
            warn!(order_id = %order.id(), reference_id = %paid.reference_id(), "cancelled order still has a completed payment, refunding");
            self.request_refund(paid.reference_id().as_str(), None, CANCELLATION_REASON, actor).await?;
            return Ok(());
        }
        let (_, events) = self.inventory.restore(order).await?;
        self.events.dispatch(events).await
    }

    async fn payment(&self, reference_id: &str) -> Result<Payment> {
        self.payments.find_by_reference(reference_id).await?
            .ok_or_else(|| StorefrontError::not_found(format!("payment {reference_id}")))
    }

    async fn order(&self, order_id: Uuid) -> Result<Order> {
        self.orders.find(order_id).await?.ok_or_else(|| StorefrontError::not_found(format!("order {order_id}")))
    }

    /// Read-modify-write on a payment, retried on version conflicts.
    async fn mutate_payment<F>(&self, reference_id: &str, change: F) -> Result<Payment>
    where
        F: Fn(&mut Payment, DateTime<Utc>) -> std::result::Result<(), PaymentError> + Send + Sync,
    {
        for attempt in 1..=MAX_CONFLICT_RETRIES {
            let mut payment = self.payment(reference_id).await?;
            change(&mut payment, Utc::now())?;
            match self.payments.save(&mut payment).await {
                Ok(()) => return Ok(payment),
                Err(StorefrontError::Conflict(_)) => {
                    warn!(reference_id, attempt, "payment changed concurrently, reloading");
                }
                Err(e) => return Err(e),
            }
        }
        Err(StorefrontError::Conflict(format!("payment {reference_id}")))
    }

    async fn restore_stock(&self, payment: &Payment) -> Result<()> {
        let restored = match self.order(payment.order_id()).await {
            Ok(order) => self.inventory.restore(&order).await,
            Err(e) => Err(e),
        };
        match restored {
            Ok((_, events)) => self.events.dispatch(events).await,
            Err(e) => {
                error!(reference_id = %payment.reference_id(), order_id = %payment.order_id(), error = %e, "stock restoration lagging behind refund");
                Err(StorefrontError::RestorationPending { reference_id: payment.reference_id().to_string(), cause: e.to_string() })
            }
        }
    }
}
