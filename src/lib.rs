//! Storefront checkout core
//!
//! Order, payment and inventory consistency for the storefront.
//!
//! ## Features
//! - Cart and wishlist with one entry per product
//! - Orders with frozen line-item prices
//! - Payment lifecycle with gateway initiate/verify, retries and reconciliation
//! - All-or-nothing stock reservation with idempotent restoration
//! - Refunds serialized per payment, inside a fixed refund window

pub mod api;
pub mod config;
pub mod domain;
pub mod gateway;
pub mod repository;
pub mod services;

use thiserror::Error;
use uuid::Uuid;

use crate::domain::aggregates::{CartError, OrderError, PaymentError, ProductError, RefundDenial};
use crate::domain::value_objects::{MoneyError, SkuError};
use crate::gateway::GatewayError;

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum StorefrontError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("refund not allowed: {0}")]
    RefundNotAllowed(RefundDenial),

    #[error("insufficient stock for product {product_id}: requested {requested}, available {available}")]
    InsufficientStock { product_id: Uuid, requested: u32, available: u32 },

    #[error("{0} not found")]
    NotFound(String),

    #[error("concurrent update conflict on {0}")]
    Conflict(String),

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("refund recorded for payment {reference_id} but inventory restoration is pending: {cause}")]
    RestorationPending { reference_id: String, cause: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorefrontError {
    pub fn not_found(what: impl Into<String>) -> Self { Self::NotFound(what.into()) }
    pub fn validation(msg: impl Into<String>) -> Self { Self::Validation(msg.into()) }
    pub fn invalid_state(msg: impl Into<String>) -> Self { Self::InvalidState(msg.into()) }

    /// Short machine-readable code, used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::Serialization(_) => "validation_error",
            Self::InvalidState(_) => "invalid_state",
            Self::RefundNotAllowed(_) => "refund_not_allowed",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Gateway(_) => "gateway_error",
            Self::RestorationPending { .. } => "restoration_pending",
            Self::Storage(_) => "storage_error",
        }
    }
}

impl From<PaymentError> for StorefrontError {
    fn from(e: PaymentError) -> Self {
        match e {
            PaymentError::RefundNotAllowed(denial) => Self::RefundNotAllowed(denial),
            PaymentError::InvalidTransition { .. } => Self::InvalidState(e.to_string()),
            PaymentError::NoPendingRefund => Self::NotFound("pending refund".to_string()),
            PaymentError::UnknownStatus(_) => Self::Storage(e.to_string()),
            PaymentError::Amount(_)
            | PaymentError::RefundExceedsAmount { .. }
            | PaymentError::InvalidRefundAmount(_)
            | PaymentError::MissingRefundReason
            | PaymentError::MalformedReference(_) => Self::Validation(e.to_string()),
        }
    }
}

impl From<OrderError> for StorefrontError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::CannotCancel(_) | OrderError::NotPaid(_) => Self::InvalidState(e.to_string()),
            OrderError::NoItems | OrderError::InvalidQuantity(_) | OrderError::InvalidDiscount | OrderError::Amount(_) => Self::Validation(e.to_string()),
        }
    }
}

impl From<ProductError> for StorefrontError {
    fn from(e: ProductError) -> Self { Self::Validation(e.to_string()) }
}

impl From<CartError> for StorefrontError {
    fn from(e: CartError) -> Self {
        match e {
            CartError::ItemNotFound => Self::NotFound("cart item".to_string()),
            CartError::InvalidQuantity => Self::Validation(e.to_string()),
        }
    }
}

impl From<MoneyError> for StorefrontError {
    fn from(e: MoneyError) -> Self { Self::Validation(e.to_string()) }
}

impl From<SkuError> for StorefrontError {
    fn from(e: SkuError) -> Self { Self::Validation(e.to_string()) }
}

impl From<validator::ValidationErrors> for StorefrontError {
    fn from(e: validator::ValidationErrors) -> Self { Self::Validation(e.to_string()) }
}

impl From<sqlx::Error> for StorefrontError {
    fn from(e: sqlx::Error) -> Self { Self::Storage(e.to_string()) }
}

impl From<sqlx::migrate::MigrateError> for StorefrontError {
    fn from(e: sqlx::migrate::MigrateError) -> Self { Self::Storage(e.to_string()) }
}

pub type Result<T> = std::result::Result<T, StorefrontError>;
