//! End-to-end checkout, payment and refund flows over in-memory storage and
//! the mock gateway.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tokio::sync::Barrier;
use tower::ServiceExt;
use uuid::Uuid;

use storefront_checkout::api::{self, AppState};
use storefront_checkout::domain::aggregates::{
    AttemptMetadata, Order, OrderStatus, Payment, PaymentMethod, PaymentStatus, Product, RefundDenial,
};
use storefront_checkout::domain::value_objects::{Money, Sku};
use storefront_checkout::gateway::mock::{MockBehavior, MockGateway};
use storefront_checkout::gateway::GatewayError;
use storefront_checkout::repository::{CartRepository, CatalogRepository, MemoryStore, PaymentRepository};
use storefront_checkout::services::{PaymentResult, PaymentSettings, PlaceOrder, Repositories};
use storefront_checkout::StorefrontError;

struct Harness {
    store: Arc<MemoryStore>,
    gateway: Arc<MockGateway>,
    state: AppState,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let repos = Repositories::from_store(store.clone());
    harness_over(store, repos)
}

fn harness_over(store: Arc<MemoryStore>, repos: Repositories) -> Harness {
    let gateway = Arc::new(MockGateway::new("http://pay.test"));
    let settings = PaymentSettings {
        gateway_timeout: Duration::from_millis(50),
        retry_base_delay: Duration::from_millis(1),
        ..PaymentSettings::default()
    };
    let state = AppState::build(repos, gateway.clone(), None, settings);
    Harness { store, gateway, state }
}

impl Harness {
    async fn product(&self, sku: &str, price: i64, stock: u32) -> Uuid {
        let mut product = Product::create(Sku::new(sku).unwrap(), sku, Money::new(price, "NGN")).unwrap();
        product.add_stock(stock);
        product.publish().unwrap();
        self.store.save_product(&product).await.unwrap();
        product.id()
    }

    async fn fill_cart(&self, user_id: Uuid, lines: &[(Uuid, u32)]) {
        let mut cart = CartRepository::load(self.store.as_ref(), user_id).await.unwrap();
        for (product_id, quantity) in lines {
            cart.add_item(*product_id, *quantity).unwrap();
        }
        CartRepository::save(self.store.as_ref(), &cart).await.unwrap();
    }

    async fn place(&self, lines: &[(Uuid, u32)]) -> Result<Order, StorefrontError> {
        let user_id = Uuid::now_v7();
        self.fill_cart(user_id, lines).await;
        self.state.checkout.place_order(PlaceOrder { user_id, email: "shopper@example.com".into(), ..PlaceOrder::default() }).await
    }

    /// Places, pays and verifies an order; returns it with its payment reference.
    async fn paid_order(&self, product_id: Uuid, quantity: u32) -> (Order, String) {
        let order = self.place(&[(product_id, quantity)]).await.unwrap();
        let init = self.state.checkout
            .initiate_payment(order.id(), order.user_id(), PaymentMethod::Card, AttemptMetadata::default())
            .await
            .unwrap();
        let result = self.state.checkout.verify_payment(&init.reference_id, &init.redirect.transaction_ref).await.unwrap();
        assert!(matches!(result, PaymentResult::Completed { .. }));
        (order, init.reference_id)
    }
}

#[tokio::test]
async fn test_full_checkout_flow() {
    let h = harness();
    let tee = h.product("TEE-01", 2500, 10).await;
    let (order, reference) = h.paid_order(tee, 2).await;

    assert_eq!(order.total().amount(), 5000);
    assert_eq!(h.store.stock_of(tee).await, Some(8));
    assert!(CartRepository::load(h.store.as_ref(), order.user_id()).await.unwrap().is_empty());

    let payment = h.state.checkout.payment(&reference).await.unwrap();
    assert_eq!(payment.status(), PaymentStatus::Completed);
    assert!(payment.paid_at().is_some());
    assert_eq!(h.state.checkout.order(order.id()).await.unwrap().status(), OrderStatus::Paid);

    let fulfilling = h.state.checkout.start_fulfillment(order.id()).await.unwrap();
    assert_eq!(fulfilling.status(), OrderStatus::Processing);
    let err = h.state.refunds.cancel_order(order.id(), Uuid::now_v7()).await.unwrap_err();
    assert!(matches!(err, StorefrontError::InvalidState(_)));
}

/// Holds the next `gated` payment saves until that many callers have
/// loaded and are ready to write, so their compare-and-swap saves collide.
struct LockstepSaves {
    store: Arc<MemoryStore>,
    gate: Barrier,
    gated: AtomicUsize,
    conflicts: AtomicUsize,
}

#[async_trait]
impl PaymentRepository for LockstepSaves {
    async fn save(&self, payment: &mut Payment) -> storefront_checkout::Result<()> {
        if self.gated.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok() {
            self.gate.wait().await;
        }
        let saved = PaymentRepository::save(self.store.as_ref(), payment).await;
        if matches!(saved, Err(StorefrontError::Conflict(_))) {
            self.conflicts.fetch_add(1, Ordering::SeqCst);
        }
        saved
    }

    async fn find(&self, id: Uuid) -> storefront_checkout::Result<Option<Payment>> {
        PaymentRepository::find(self.store.as_ref(), id).await
    }

    async fn find_by_reference(&self, reference_id: &str) -> storefront_checkout::Result<Option<Payment>> {
        self.store.find_by_reference(reference_id).await
    }

    async fn find_by_transaction_id(&self, transaction_id: &str) -> storefront_checkout::Result<Option<Payment>> {
        self.store.find_by_transaction_id(transaction_id).await
    }

    async fn find_by_order(&self, order_id: Uuid, user_id: Uuid) -> storefront_checkout::Result<Vec<Payment>> {
        self.store.find_by_order(order_id, user_id).await
    }
}

#[tokio::test]
async fn test_concurrent_refunds_only_one_succeeds() {
    let store = Arc::new(MemoryStore::new());
    let payments = Arc::new(LockstepSaves {
        store: store.clone(),
        gate: Barrier::new(2),
        gated: AtomicUsize::new(0),
        conflicts: AtomicUsize::new(0),
    });
    let mut repos = Repositories::from_store(store.clone());
    repos.payments = payments.clone();
    let h = harness_over(store, repos);
    let tee = h.product("TEE-02", 2500, 10).await;
    let (_, reference) = h.paid_order(tee, 2).await;
    let actor = Uuid::now_v7();

    // Both requests load the completed payment before either one saves.
    payments.gated.store(2, Ordering::SeqCst);
    let (first, second) = tokio::join!(
        h.state.refunds.request_refund(&reference, None, "duplicate click", actor),
        h.state.refunds.request_refund(&reference, None, "duplicate click", actor),
    );
    assert_eq!(payments.conflicts.load(Ordering::SeqCst), 1);
    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes.iter().any(|r| matches!(
        r,
        Err(StorefrontError::RefundNotAllowed(RefundDenial::NotCompleted(PaymentStatus::Refunded)))
    )));
    assert_eq!(h.state.checkout.payment(&reference).await.unwrap().status(), PaymentStatus::Refunded);
    assert_eq!(h.store.stock_of(tee).await, Some(10));
}

#[tokio::test]
async fn test_insufficient_stock_leaves_everything_unchanged() {
    let h = harness();
    let a = h.product("A-1", 1500, 10).await;
    let b = h.product("B-1", 1500, 5).await;
    let user_id = Uuid::now_v7();
    h.fill_cart(user_id, &[(a, 3), (b, 6)]).await;

    let err = h.state.checkout
        .place_order(PlaceOrder { user_id, email: "s@example.com".into(), ..PlaceOrder::default() })
        .await
        .unwrap_err();
    assert!(matches!(err, StorefrontError::InsufficientStock { product_id, requested: 6, available: 5 } if product_id == b));
    assert_eq!(h.store.stock_of(a).await, Some(10));
    assert_eq!(h.store.stock_of(b).await, Some(5));
    assert_eq!(CartRepository::load(h.store.as_ref(), user_id).await.unwrap().item_count(), 2);
}

#[tokio::test]
async fn test_cancel_paid_order_refunds_and_restores_once() {
    let h = harness();
    let mug = h.product("MUG-01", 2000, 4).await;
    let (order, reference) = h.paid_order(mug, 3).await;
    assert_eq!(h.store.stock_of(mug).await, Some(1));

    let cancelled = h.state.refunds.cancel_order(order.id(), Uuid::now_v7()).await.unwrap();
    assert_eq!(cancelled.status(), OrderStatus::Cancelled);

    let payment = h.state.checkout.payment(&reference).await.unwrap();
    assert_eq!(payment.status(), PaymentStatus::Refunded);
    let refund = payment.refund().unwrap();
    assert_eq!(refund.amount.amount(), 6000);
    assert_eq!(refund.reason, "order cancelled");
    assert_eq!(h.store.stock_of(mug).await, Some(4));

    h.state.refunds.resume_refund(&reference).await.unwrap();
    h.state.refunds.cancel_order(order.id(), Uuid::now_v7()).await.unwrap();
    assert_eq!(h.store.stock_of(mug).await, Some(4));
    assert_eq!(h.state.checkout.order(order.id()).await.unwrap().status(), OrderStatus::Cancelled);
}

#[tokio::test]
async fn test_verify_timeout_leaves_payment_processing() {
    let h = harness();
    let tee = h.product("TEE-03", 2500, 10).await;
    let order = h.place(&[(tee, 1)]).await.unwrap();
    let init = h.state.checkout
        .initiate_payment(order.id(), order.user_id(), PaymentMethod::BankTransfer, AttemptMetadata::default())
        .await
        .unwrap();

    h.gateway.script_verify([MockBehavior::Hang(Duration::from_millis(500))]).await;
    let result = h.state.checkout.verify_payment(&init.reference_id, &init.redirect.transaction_ref).await.unwrap();
    assert!(matches!(result, PaymentResult::Pending { .. }));
    assert_eq!(h.state.checkout.payment(&init.reference_id).await.unwrap().status(), PaymentStatus::Processing);

    let reconciled = h.state.checkout.reconcile(&init.reference_id).await.unwrap();
    assert!(matches!(reconciled, PaymentResult::Completed { .. }));
    assert_eq!(h.state.checkout.order(order.id()).await.unwrap().status(), OrderStatus::Paid);
}

#[tokio::test]
async fn test_transient_initiate_failures_exhaust_attempts() {
    let h = harness();
    let tee = h.product("TEE-04", 2500, 10).await;
    let order = h.place(&[(tee, 1)]).await.unwrap();
    h.gateway.script_initiate([MockBehavior::FailTransient, MockBehavior::FailTransient, MockBehavior::FailTransient]).await;

    let client = AttemptMetadata { ip: Some("198.51.100.4".into()), user_agent: Some("ios-app".into()) };
    let err = h.state.checkout
        .initiate_payment(order.id(), order.user_id(), PaymentMethod::Card, client)
        .await
        .unwrap_err();
    assert!(matches!(err, StorefrontError::Gateway(GatewayError::Transient(_))));
    assert_eq!(h.gateway.initiate_calls().await, 3);

    let payments = h.store.find_by_order(order.id(), order.user_id()).await.unwrap();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].status(), PaymentStatus::Failed);
    assert_eq!(payments[0].attempts(), 3);
    assert!(payments[0].failure_reason().is_some());
    assert_eq!(payments[0].last_attempt().and_then(|a| a.user_agent.as_deref()), Some("ios-app"));

    // A failed payment is terminal; the retry is a new payment.
    let retry = h.state.checkout
        .initiate_payment(order.id(), order.user_id(), PaymentMethod::Card, AttemptMetadata::default())
        .await
        .unwrap();
    assert_ne!(retry.reference_id, payments[0].reference_id().as_str());
}

#[tokio::test]
async fn test_payment_below_minimum_is_rejected() {
    let h = harness();
    let sticker = h.product("STK-01", 500, 10).await;
    let order = h.place(&[(sticker, 1)]).await.unwrap();

    let err = h.state.checkout
        .initiate_payment(order.id(), order.user_id(), PaymentMethod::Wallet, AttemptMetadata::default())
        .await
        .unwrap_err();
    assert!(matches!(err, StorefrontError::Validation(_)));
    assert!(h.store.find_by_order(order.id(), order.user_id()).await.unwrap().is_empty());
    assert_eq!(h.gateway.initiate_calls().await, 0);
}

async fn send(state: &AppState, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
        .unwrap();
    let response = api::router(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, value)
}

#[tokio::test]
async fn test_router_checkout_and_errors() {
    let h = harness();
    let (status, _) = send(&h.state, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, product) = send(&h.state, "POST", "/api/v1/products", Some(json!({"sku": "hat-1", "name": "Hat", "price": 3000, "stock": 4}))).await;
    assert_eq!(status, StatusCode::CREATED);
    let product_id = product["id"].as_str().unwrap().to_string();

    let user_id = Uuid::now_v7();
    let (status, _) = send(&h.state, "POST", &format!("/api/v1/cart/{user_id}"), Some(json!({"product_id": product_id, "quantity": 2}))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&h.state, "POST", "/api/v1/checkout", Some(json!({"user_id": user_id, "email": "not-an-email"}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, order) = send(&h.state, "POST", "/api/v1/checkout", Some(json!({"user_id": user_id, "email": "hat@example.com"}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["total"]["amount"], 6000);

    let (status, snapshot) = send(&h.state, "GET", &format!("/api/v1/products/{product_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["stock"], 2);

    let (status, init) = send(&h.state, "POST", "/api/v1/payments", Some(json!({"order_id": order["id"], "user_id": user_id, "method": "card"}))).await;
    assert_eq!(status, StatusCode::CREATED);
    let reference = init["reference_id"].as_str().unwrap().to_string();

    let (status, result) = send(&h.state, "POST", "/api/v1/payments/verify", Some(json!({"reference_id": reference, "gateway_token": init["redirect"]["transaction_ref"]}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(result["status"], "completed");

    let (status, body) = send(&h.state, "POST", &format!("/api/v1/payments/{reference}/refund"), Some(json!({"reason": "", "actor": user_id}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");

    let (status, _) = send(&h.state, "POST", &format!("/api/v1/payments/{reference}/refund"), Some(json!({"reason": "wrong size", "actor": user_id}))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send(&h.state, "POST", &format!("/api/v1/payments/{reference}/refund"), Some(json!({"reason": "again", "actor": user_id}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "refund_not_allowed");

    let (status, body) = send(&h.state, "GET", &format!("/api/v1/orders/{}", Uuid::now_v7()), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}
