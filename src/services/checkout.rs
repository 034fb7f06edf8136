//! Checkout: orders from carts, payment initiation and gateway verification.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{backoff_delay, EventBus, InventoryAdjuster, PaymentSettings, RefundWorkflow, Repositories, MAX_CONFLICT_RETRIES};
use crate::domain::aggregates::{AttemptMetadata, Discount, LineItem, Order, OrderStatus, Payment, PaymentMethod, PaymentStatus};
use crate::domain::value_objects::Money;
use crate::gateway::{GatewayError, GatewayVerification, PaymentGateway};
use crate::repository::{CartRepository, CatalogRepository, OrderRepository, PaymentRepository};
use crate::{Result, StorefrontError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub user_id: Uuid,
    pub email: String,
    #[serde(default)]
    pub discount: Discount,
    /// Shipping charge in minor units of the store currency.
    #[serde(default)]
    pub shipping: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectInfo {
    pub transaction_ref: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInitiation {
    pub reference_id: String,
    pub redirect: RedirectInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PaymentResult {
    Completed { reference_id: String, transaction_id: String },
    /// Still processing; reconcile later.
    Pending { reference_id: String, reason: String },
}

pub struct CheckoutService {
    orders: Arc<dyn OrderRepository>,
    payments: Arc<dyn PaymentRepository>,
    catalog: Arc<dyn CatalogRepository>,
    carts: Arc<dyn CartRepository>,
    inventory: InventoryAdjuster,
    refunds: RefundWorkflow,
    gateway: Arc<dyn PaymentGateway>,
    events: Arc<EventBus>,
    settings: PaymentSettings,
}

impl CheckoutService {
    pub fn new(repos: &Repositories, gateway: Arc<dyn PaymentGateway>, events: Arc<EventBus>, settings: PaymentSettings) -> Self {
        Self {
            orders: repos.orders.clone(),
            payments: repos.payments.clone(),
            catalog: repos.catalog.clone(),
            carts: repos.carts.clone(),
            inventory: InventoryAdjuster::new(repos.stock.clone()),
            refunds: RefundWorkflow::new(repos, events.clone(), settings.policy.clone()),
            gateway,
            events,
            settings,
        }
    }

    pub fn settings(&self) -> &PaymentSettings { &self.settings }

    /// Turns the user's cart into a pending order and reserves its stock.
    pub async fn place_order(&self, request: PlaceOrder) -> Result<Order> {
        if request.shipping < 0 {
            return Err(StorefrontError::validation("shipping must not be negative"));
        }
        let mut cart = self.carts.load(request.user_id).await?;
        if cart.is_empty() {
            return Err(StorefrontError::validation("cart is empty"));
        }

        let mut items = Vec::with_capacity(cart.item_count());
        for entry in cart.items() {
            let product = self.catalog.get_product(entry.product_id).await?
                .ok_or_else(|| StorefrontError::not_found(format!("product {}", entry.product_id)))?;
            if product.price.currency() != self.settings.currency {
                return Err(StorefrontError::validation(format!("product {} is priced in {}", product.id, product.price.currency())));
            }
            items.push(LineItem::snapshot(&product, entry.quantity)?);
        }

        let shipping = Money::new(request.shipping, &self.settings.currency);
        let mut order = Order::place(request.user_id, request.email, items, request.discount, shipping)?;
        let (_, reserved) = self.inventory.reserve(&order).await?;

        if let Err(e) = self.orders.save(&mut order).await {
            error!(order_id = %order.id(), error = %e, "order save failed, releasing stock");
            self.inventory.restore(&order).await?;
            return Err(e);
        }
        info!(order_id = %order.id(), order_number = order.order_number(), total = order.total().amount(), "order placed");

        cart.clear();
        if let Err(e) = self.carts.save(&cart).await {
            warn!(user_id = %request.user_id, error = %e, "failed to clear cart after checkout");
        }

        let mut events = order.take_events();
        events.extend(reserved);
        self.events.dispatch(events).await?;
        Ok(order)
    }

    pub async fn order(&self, order_id: Uuid) -> Result<Order> {
        self.orders.find(order_id).await?.ok_or_else(|| StorefrontError::not_found(format!("order {order_id}")))
    }

    pub async fn payment(&self, reference_id: &str) -> Result<Payment> {
        self.payments.find_by_reference(reference_id).await?
            .ok_or_else(|| StorefrontError::not_found(format!("payment {reference_id}")))
    }

    /// Opens a payment for a pending order and hands it to the gateway.
    ///
    /// Transient gateway failures are retried with backoff while the payment
    /// has attempts left; after that, or on an outright rejection, the payment
    /// is marked failed and the gateway error is returned.
    pub async fn initiate_payment(&self, order_id: Uuid, user_id: Uuid, method: PaymentMethod, client: AttemptMetadata) -> Result<PaymentInitiation> {
        let order = self.order(order_id).await?;
        if order.user_id() != user_id {
            return Err(StorefrontError::not_found(format!("order {order_id}")));
        }
        if order.status() != OrderStatus::Pending {
            return Err(StorefrontError::invalid_state(format!("order {} is {}", order.order_number(), order.status().as_str())));
        }
        let existing = self.payments.find_by_order(order_id, user_id).await?;
        if let Some(live) = existing.iter().find(|p| p.status().blocks_new_payment()) {
            return Err(StorefrontError::invalid_state(format!("order already has {} payment {}", live.status(), live.reference_id())));
        }

        let mut payment = Payment::create(order_id, user_id, order.total().clone(), method, &self.settings.policy)?;
        payment.record_client(client.clone());
        self.payments.save(&mut payment).await?;
        let mut events = payment.take_events();

        // The order may have been cancelled since it was read above.
        let current = self.order(order_id).await?;
        if current.status() != OrderStatus::Pending {
            warn!(reference_id = %payment.reference_id(), %order_id, status = current.status().as_str(), "order changed while opening payment, withdrawing it");
            payment.cancel()?;
            match self.payments.save(&mut payment).await {
                Ok(()) => events.extend(payment.take_events()),
                Err(StorefrontError::Conflict(_)) => {}
                Err(e) => return Err(e),
            }
            self.events.dispatch(events).await?;
            return Err(StorefrontError::invalid_state(format!("order {} is {}", current.order_number(), current.status().as_str())));
        }
        info!(reference_id = %payment.reference_id(), %order_id, amount = payment.amount().amount(), "payment created");

        let description = format!("Order {}", order.order_number());
        loop {
            let outcome = match timeout(self.settings.gateway_timeout, self.gateway.initiate(payment.amount(), &description)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(GatewayError::Timeout(self.settings.gateway_timeout)),
            };
            match outcome {
                Ok(tx) => {
                    payment.mark_processing(tx.transaction_ref.clone())?;
                    self.payments.save(&mut payment).await?;
                    events.extend(payment.take_events());
                    info!(reference_id = %payment.reference_id(), gateway = self.gateway.name(), attempt = payment.attempts(), "payment handed to gateway");
                    self.events.dispatch(events).await?;
                    return Ok(PaymentInitiation {
                        reference_id: payment.reference_id().to_string(),
                        redirect: RedirectInfo { transaction_ref: tx.transaction_ref, url: tx.redirect_url },
                    });
                }
                Err(e) if e.is_retryable() && payment.attempts() < self.settings.max_gateway_attempts => {
                    let delay = backoff_delay(self.settings.retry_base_delay, payment.attempts());
                    warn!(reference_id = %payment.reference_id(), attempt = payment.attempts(), error = %e, ?delay, "gateway initiate failed, retrying");
                    payment.log_attempt(client.clone());
                    self.payments.save(&mut payment).await?;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(reference_id = %payment.reference_id(), attempt = payment.attempts(), error = %e, "gateway initiate failed, giving up");
                    payment.mark_failed(e.to_string())?;
                    self.payments.save(&mut payment).await?;
                    events.extend(payment.take_events());
                    if let Err(dispatch_error) = self.events.dispatch(events).await {
                        error!(reference_id = %payment.reference_id(), error = %dispatch_error, "failed to dispatch payment failure");
                    }
                    return Err(e.into());
                }
            }
        }
    }

    /// Gateway callback. The token must be the transaction reference the
    /// gateway issued for this payment.
    pub async fn verify_payment(&self, reference_id: &str, gateway_token: &str) -> Result<PaymentResult> {
        let payment = self.payment(reference_id).await?;
        if payment.gateway_ref() != Some(gateway_token) {
            return Err(StorefrontError::validation("gateway token does not match payment"));
        }
        self.confirm_with_gateway(payment).await
    }

    /// Re-queries the gateway for a payment left processing.
    pub async fn reconcile(&self, reference_id: &str) -> Result<PaymentResult> {
        let payment = self.payment(reference_id).await?;
        info!(reference_id, status = %payment.status(), "reconciling payment");
        self.confirm_with_gateway(payment).await
    }

    pub async fn start_fulfillment(&self, order_id: Uuid) -> Result<Order> {
        for _ in 0..MAX_CONFLICT_RETRIES {
            let mut order = self.order(order_id).await?;
            order.start_fulfillment()?;
            match self.orders.save(&mut order).await {
                Ok(()) => {
                    info!(%order_id, "fulfillment started");
                    self.events.dispatch(order.take_events()).await?;
                    return Ok(order);
                }
                Err(StorefrontError::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(StorefrontError::Conflict(format!("order {order_id}")))
    }

    async fn confirm_with_gateway(&self, mut payment: Payment) -> Result<PaymentResult> {
        let reference_id = payment.reference_id().to_string();
        if let (PaymentStatus::Completed, Some(tx)) = (payment.status(), payment.transaction_id()) {
            return Ok(PaymentResult::Completed { reference_id, transaction_id: tx.to_string() });
        }
        if payment.status() != PaymentStatus::Processing {
            return Err(StorefrontError::invalid_state(format!("payment {reference_id} is {}", payment.status())));
        }
        let transaction_ref = payment.gateway_ref().map(str::to_owned)
            .ok_or_else(|| StorefrontError::invalid_state(format!("payment {reference_id} has no gateway transaction")))?;

        let verification = match timeout(self.settings.gateway_timeout, self.gateway.verify(&transaction_ref)).await {
            Ok(Ok(verification)) => verification,
            Ok(Err(e)) => {
                warn!(%reference_id, error = %e, "gateway verification failed, payment left processing");
                return Ok(PaymentResult::Pending { reference_id, reason: e.to_string() });
            }
            Err(_) => {
                warn!(%reference_id, timeout = ?self.settings.gateway_timeout, "gateway verification timed out, payment left processing");
                return Ok(PaymentResult::Pending { reference_id, reason: GatewayError::Timeout(self.settings.gateway_timeout).to_string() });
            }
        };
        let GatewayVerification { success: true, gateway_transaction_id } = verification else {
            warn!(%reference_id, "gateway did not confirm payment, left processing");
            return Ok(PaymentResult::Pending { reference_id, reason: "gateway did not confirm the payment".to_string() });
        };
        let transaction_id = gateway_transaction_id.unwrap_or(transaction_ref);

        if let Some(other) = self.payments.find_by_transaction_id(&transaction_id).await? {
            if other.id() != payment.id() {
                return Err(StorefrontError::Conflict(format!("transaction {transaction_id} already belongs to {}", other.reference_id())));
            }
        }

        for _ in 0..MAX_CONFLICT_RETRIES {
            if let (PaymentStatus::Completed, Some(tx)) = (payment.status(), payment.transaction_id()) {
                return Ok(PaymentResult::Completed { reference_id, transaction_id: tx.to_string() });
            }
            payment.mark_completed(transaction_id.clone(), Utc::now())?;
            match self.payments.save(&mut payment).await {
                Ok(()) => {
                    info!(%reference_id, %transaction_id, "payment completed");
                    let dispatched = self.events.dispatch(payment.take_events()).await;
                    self.refund_if_cancelled(&payment).await?;
                    dispatched?;
                    return Ok(PaymentResult::Completed { reference_id, transaction_id });
                }
                Err(StorefrontError::Conflict(_)) => {
                    payment = self.payment(&reference_id).await?;
                }
                Err(e) => return Err(e),
            }
        }
        Err(StorefrontError::Conflict(format!("payment {reference_id}")))
    }

    /// A charge that lands after its order was cancelled goes straight back.
    async fn refund_if_cancelled(&self, payment: &Payment) -> Result<()> {
        let order = self.order(payment.order_id()).await?;
        if order.status() != OrderStatus::Cancelled {
            return Ok(());
        }
        let actor = order.cancelled_by().unwrap_or(order.user_id());
        self.refunds.settle_cancelled(&order, actor).await
    }
}
