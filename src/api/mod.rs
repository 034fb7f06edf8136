//! HTTP surface.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;
use validator::Validate;

use crate::domain::aggregates::{
    AttemptMetadata, Cart, Discount, Order, Payment, PaymentMethod, Product, ProductSnapshot, Wishlist, WishlistItem,
    WishlistPreferences,
};
use crate::domain::value_objects::{Money, Sku};
use crate::gateway::PaymentGateway;
use crate::services::{
    CheckoutService, EventBus, OrderPaymentProjector, PaymentInitiation, PaymentResult, PaymentSettings, PlaceOrder,
    RefundWorkflow, Repositories,
};
use crate::StorefrontError;

#[derive(Clone)]
pub struct AppState {
    pub checkout: Arc<CheckoutService>,
    pub refunds: Arc<RefundWorkflow>,
    pub repos: Repositories,
}

impl AppState {
    /// Wires services over the given storage, with payment events projected
    /// onto orders and optionally published to NATS.
    pub fn build(repos: Repositories, gateway: Arc<dyn PaymentGateway>, nats: Option<async_nats::Client>, settings: PaymentSettings) -> Self {
        let events = Arc::new(
            EventBus::new()
                .with_nats(nats)
                .register(Arc::new(OrderPaymentProjector::new(repos.orders.clone()))),
        );
        let refunds = RefundWorkflow::new(&repos, events.clone(), settings.policy.clone());
        let checkout = CheckoutService::new(&repos, gateway, events, settings);
        Self { checkout: Arc::new(checkout), refunds: Arc::new(refunds), repos }
    }

    fn currency(&self) -> &str { &self.checkout.settings().currency }
}

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug)]
pub struct ApiError(pub StorefrontError);

impl<E: Into<StorefrontError>> From<E> for ApiError {
    fn from(e: E) -> Self { Self(e.into()) }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            StorefrontError::Validation(_) | StorefrontError::Serialization(_) => StatusCode::BAD_REQUEST,
            StorefrontError::InvalidState(_) | StorefrontError::Conflict(_) | StorefrontError::InsufficientStock { .. } => StatusCode::CONFLICT,
            StorefrontError::RefundNotAllowed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            StorefrontError::NotFound(_) => StatusCode::NOT_FOUND,
            StorefrontError::Gateway(_) => StatusCode::BAD_GATEWAY,
            StorefrontError::RestorationPending { .. } => StatusCode::SERVICE_UNAVAILABLE,
            StorefrontError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        (status, Json(json!({ "error": self.0.code(), "message": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// =============================================================================
// Router
// =============================================================================

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(json!({"status": "healthy", "service": "storefront-checkout"})) }))
        .route("/api/v1/products", post(create_product))
        .route("/api/v1/products/:id", get(get_product))
        .route("/api/v1/cart/:user_id", get(get_cart).post(add_to_cart))
        .route("/api/v1/cart/:user_id/items/:product_id", put(update_cart_item).delete(remove_from_cart))
        .route("/api/v1/wishlist/:user_id", get(get_wishlist).post(upsert_wishlist))
        .route("/api/v1/wishlist/:user_id/items/:product_id", delete(remove_from_wishlist))
        .route("/api/v1/wishlist/:user_id/alerts", get(wishlist_alerts))
        .route("/api/v1/checkout", post(checkout))
        .route("/api/v1/orders/:id", get(get_order))
        .route("/api/v1/orders/:id/cancel", post(cancel_order))
        .route("/api/v1/orders/:id/fulfillment", post(start_fulfillment))
        .route("/api/v1/payments", post(initiate_payment))
        .route("/api/v1/payments/verify", post(verify_payment))
        .route("/api/v1/payments/:reference", get(get_payment))
        .route("/api/v1/payments/:reference/reconcile", post(reconcile_payment))
        .route("/api/v1/payments/:reference/refund", post(request_refund))
        .route("/api/v1/payments/:reference/refund/resume", post(resume_refund))
        .route("/api/v1/payments/:reference/refund/complete", post(complete_refund))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// =============================================================================
// Catalog
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateProductRequest {
    #[validate(length(min = 1, max = 50))]
    pub sku: String,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub description: Option<String>,
    #[validate(range(min = 1))]
    pub price: i64,
    #[serde(default)]
    pub stock: u32,
    #[serde(default = "default_true")]
    pub publish: bool,
}

fn default_true() -> bool { true }

async fn create_product(State(s): State<AppState>, Json(r): Json<CreateProductRequest>) -> ApiResult<(StatusCode, Json<Product>)> {
    r.validate()?;
    let mut product = Product::create(Sku::new(r.sku)?, r.name, Money::new(r.price, s.currency()))?;
    if let Some(description) = r.description { product.describe(description); }
    product.add_stock(r.stock);
    if r.publish { product.publish()?; }
    s.repos.catalog.save_product(&product).await?;
    tracing::info!(product_id = %product.id(), sku = %product.sku().as_str(), "product created");
    Ok((StatusCode::CREATED, Json(product)))
}

async fn get_product(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<ProductSnapshot>> {
    let product = s.repos.catalog.get_product(id).await?.ok_or_else(|| StorefrontError::not_found(format!("product {id}")))?;
    Ok(Json(product))
}

// =============================================================================
// Cart & wishlist
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct AddToCartRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, max = 999))]
    pub quantity: u32,
}

async fn get_cart(State(s): State<AppState>, Path(user_id): Path<Uuid>) -> ApiResult<Json<Cart>> {
    Ok(Json(s.repos.carts.load(user_id).await?))
}

async fn add_to_cart(State(s): State<AppState>, Path(user_id): Path<Uuid>, Json(r): Json<AddToCartRequest>) -> ApiResult<(StatusCode, Json<Cart>)> {
    r.validate()?;
    if s.repos.catalog.get_product(r.product_id).await?.is_none() {
        return Err(StorefrontError::not_found(format!("product {}", r.product_id)).into());
    }
    let mut cart = s.repos.carts.load(user_id).await?;
    cart.add_item(r.product_id, r.quantity)?;
    s.repos.carts.save(&cart).await?;
    Ok((StatusCode::CREATED, Json(cart)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateCartItemRequest {
    /// Zero removes the line.
    #[validate(range(max = 999))]
    pub quantity: u32,
}

async fn update_cart_item(State(s): State<AppState>, Path((user_id, product_id)): Path<(Uuid, Uuid)>, Json(r): Json<UpdateCartItemRequest>) -> ApiResult<Json<Cart>> {
    r.validate()?;
    let mut cart = s.repos.carts.load(user_id).await?;
    cart.update_quantity(product_id, r.quantity)?;
    s.repos.carts.save(&cart).await?;
    Ok(Json(cart))
}

async fn remove_from_cart(State(s): State<AppState>, Path((user_id, product_id)): Path<(Uuid, Uuid)>) -> ApiResult<Json<Cart>> {
    let mut cart = s.repos.carts.load(user_id).await?;
    cart.remove_item(product_id)?;
    s.repos.carts.save(&cart).await?;
    Ok(Json(cart))
}

#[derive(Debug, Deserialize, Validate)]
pub struct WishlistRequest {
    pub product_id: Uuid,
    #[validate(range(min = 0))]
    pub target_price: Option<i64>,
    pub notify_on_price_drop: Option<bool>,
    pub notify_on_restock: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct WishlistAlert {
    pub item: WishlistItem,
    pub product: ProductSnapshot,
}

async fn get_wishlist(State(s): State<AppState>, Path(user_id): Path<Uuid>) -> ApiResult<Json<Wishlist>> {
    Ok(Json(s.repos.wishlists.load(user_id).await?))
}

async fn upsert_wishlist(State(s): State<AppState>, Path(user_id): Path<Uuid>, Json(r): Json<WishlistRequest>) -> ApiResult<Json<Wishlist>> {
    r.validate()?;
    if s.repos.catalog.get_product(r.product_id).await?.is_none() {
        return Err(StorefrontError::not_found(format!("product {}", r.product_id)).into());
    }
    let mut wishlist = s.repos.wishlists.load(user_id).await?;
    wishlist.upsert(r.product_id, WishlistPreferences {
        target_price: r.target_price.map(|amount| Money::new(amount, s.currency())),
        notify_on_price_drop: r.notify_on_price_drop,
        notify_on_restock: r.notify_on_restock,
    });
    s.repos.wishlists.save(&wishlist).await?;
    Ok(Json(wishlist))
}

async fn remove_from_wishlist(State(s): State<AppState>, Path((user_id, product_id)): Path<(Uuid, Uuid)>) -> ApiResult<Json<Wishlist>> {
    let mut wishlist = s.repos.wishlists.load(user_id).await?;
    if !wishlist.remove(product_id) {
        return Err(StorefrontError::not_found(format!("wishlist item {product_id}")).into());
    }
    s.repos.wishlists.save(&wishlist).await?;
    Ok(Json(wishlist))
}

async fn wishlist_alerts(State(s): State<AppState>, Path(user_id): Path<Uuid>) -> ApiResult<Json<Vec<WishlistAlert>>> {
    let wishlist = s.repos.wishlists.load(user_id).await?;
    let mut alerts = Vec::new();
    for item in wishlist.items() {
        // Products removed from the catalog simply stop alerting.
        let Some(product) = s.repos.catalog.get_product(item.product_id).await? else { continue };
        if item.wants_alert(&product) {
            alerts.push(WishlistAlert { item: item.clone(), product });
        }
    }
    Ok(Json(alerts))
}

// =============================================================================
// Orders
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CheckoutRequest {
    pub user_id: Uuid,
    #[validate(email)]
    pub email: String,
    #[serde(default)]
    pub discount: Discount,
    #[serde(default)]
    #[validate(range(min = 0))]
    pub shipping: i64,
}

#[derive(Debug, Deserialize)]
pub struct ActorRequest {
    pub actor: Uuid,
}

async fn checkout(State(s): State<AppState>, Json(r): Json<CheckoutRequest>) -> ApiResult<(StatusCode, Json<Order>)> {
    r.validate()?;
    let order = s.checkout.place_order(PlaceOrder { user_id: r.user_id, email: r.email, discount: r.discount, shipping: r.shipping }).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

async fn get_order(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Order>> {
    Ok(Json(s.checkout.order(id).await?))
}

async fn cancel_order(State(s): State<AppState>, Path(id): Path<Uuid>, Json(r): Json<ActorRequest>) -> ApiResult<Json<Order>> {
    Ok(Json(s.refunds.cancel_order(id, r.actor).await?))
}

async fn start_fulfillment(State(s): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<Json<Order>> {
    Ok(Json(s.checkout.start_fulfillment(id).await?))
}

// =============================================================================
// Payments
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub method: PaymentMethod,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyPaymentRequest {
    #[validate(length(min = 1))]
    pub reference_id: String,
    #[validate(length(min = 1))]
    pub gateway_token: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RefundRequest {
    #[validate(range(min = 1))]
    pub amount: Option<i64>,
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
    pub actor: Uuid,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CompleteRefundRequest {
    #[validate(length(min = 1))]
    pub transaction_id: String,
}

/// Caller address and agent, as seen behind the proxy.
fn client_metadata(headers: &HeaderMap) -> AttemptMetadata {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_owned);
    AttemptMetadata {
        ip: header("x-forwarded-for").and_then(|v| v.split(',').next().map(|ip| ip.trim().to_string())),
        user_agent: header("user-agent"),
    }
}

async fn initiate_payment(State(s): State<AppState>, headers: HeaderMap, Json(r): Json<InitiatePaymentRequest>) -> ApiResult<(StatusCode, Json<PaymentInitiation>)> {
    let initiation = s.checkout.initiate_payment(r.order_id, r.user_id, r.method, client_metadata(&headers)).await?;
    Ok((StatusCode::CREATED, Json(initiation)))
}

async fn verify_payment(State(s): State<AppState>, Json(r): Json<VerifyPaymentRequest>) -> ApiResult<Json<PaymentResult>> {
    r.validate()?;
    Ok(Json(s.checkout.verify_payment(&r.reference_id, &r.gateway_token).await?))
}

async fn get_payment(State(s): State<AppState>, Path(reference): Path<String>) -> ApiResult<Json<Payment>> {
    Ok(Json(s.checkout.payment(&reference).await?))
}

async fn reconcile_payment(State(s): State<AppState>, Path(reference): Path<String>) -> ApiResult<Json<PaymentResult>> {
    Ok(Json(s.checkout.reconcile(&reference).await?))
}

async fn request_refund(State(s): State<AppState>, Path(reference): Path<String>, Json(r): Json<RefundRequest>) -> ApiResult<Json<Payment>> {
    r.validate()?;
    Ok(Json(s.refunds.request_refund(&reference, r.amount, &r.reason, r.actor).await?))
}

async fn resume_refund(State(s): State<AppState>, Path(reference): Path<String>) -> ApiResult<Json<Payment>> {
    Ok(Json(s.refunds.resume_refund(&reference).await?))
}

async fn complete_refund(State(s): State<AppState>, Path(reference): Path<String>, Json(r): Json<CompleteRefundRequest>) -> ApiResult<Json<Payment>> {
    r.validate()?;
    Ok(Json(s.refunds.complete_refund(&reference, &r.transaction_id).await?))
}
