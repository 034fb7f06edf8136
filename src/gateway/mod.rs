//! Payment gateway collaborator.
//!
//! Provider-specific redirect flows live outside this crate. The checkout
//! core only needs two capabilities: start a transaction and ask whether it
//! succeeded.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::value_objects::Money;

pub mod mock;

pub use mock::MockGateway;

/// A transaction opened at the gateway, with where to send the shopper.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayTransaction {
    pub transaction_ref: String,
    pub redirect_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayVerification {
    pub success: bool,
    pub gateway_transaction_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Network trouble or provider hiccup; safe to retry.
    #[error("transient gateway failure: {0}")]
    Transient(String),
    /// The provider refused the request outright.
    #[error("gateway rejected the request: {0}")]
    Rejected(String),
    #[error("gateway did not answer within {0:?}")]
    Timeout(std::time::Duration),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool { !matches!(self, Self::Rejected(_)) }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn name(&self) -> &'static str;

    async fn initiate(&self, amount: &Money, description: &str) -> Result<GatewayTransaction, GatewayError>;

    async fn verify(&self, transaction_ref: &str) -> Result<GatewayVerification, GatewayError>;
}
