//! In-process gateway used for local runs and tests.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{GatewayError, GatewayTransaction, GatewayVerification, PaymentGateway};
use crate::domain::value_objects::Money;

/// Scripted outcome for the next gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockBehavior {
    Succeed,
    Decline,
    FailTransient,
    Reject,
    Hang(Duration),
}

#[derive(Debug, Default)]
struct MockState {
    initiate_script: VecDeque<MockBehavior>,
    verify_script: VecDeque<MockBehavior>,
    transactions: HashMap<String, i64>,
    initiate_calls: u32,
}

/// Approves everything unless scripted otherwise.
#[derive(Debug)]
pub struct MockGateway {
    base_url: String,
    state: Mutex<MockState>,
}

impl MockGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), state: Mutex::new(MockState::default()) }
    }

    pub async fn script_initiate(&self, behaviors: impl IntoIterator<Item = MockBehavior>) {
        self.state.lock().await.initiate_script.extend(behaviors);
    }

    pub async fn script_verify(&self, behaviors: impl IntoIterator<Item = MockBehavior>) {
        self.state.lock().await.verify_script.extend(behaviors);
    }

    pub async fn initiate_calls(&self) -> u32 { self.state.lock().await.initiate_calls }

    async fn next(&self, verify: bool) -> MockBehavior {
        let mut state = self.state.lock().await;
        let script = if verify { &mut state.verify_script } else { &mut state.initiate_script };
        script.pop_front().unwrap_or(MockBehavior::Succeed)
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    fn name(&self) -> &'static str { "mock" }

    async fn initiate(&self, amount: &Money, description: &str) -> Result<GatewayTransaction, GatewayError> {
        let behavior = self.next(false).await;
        self.state.lock().await.initiate_calls += 1;
        match behavior {
            MockBehavior::Hang(d) => { tokio::time::sleep(d).await; }
            MockBehavior::FailTransient => return Err(GatewayError::Transient("connection reset".into())),
            MockBehavior::Reject | MockBehavior::Decline => return Err(GatewayError::Rejected(format!("merchant refused {description}"))),
            MockBehavior::Succeed => {}
        }
        let transaction_ref = format!("MOCK-{}", Uuid::new_v4().simple());
        self.state.lock().await.transactions.insert(transaction_ref.clone(), amount.amount());
        Ok(GatewayTransaction { redirect_url: format!("{}/{}", self.base_url, transaction_ref), transaction_ref })
    }

    async fn verify(&self, transaction_ref: &str) -> Result<GatewayVerification, GatewayError> {
        let behavior = self.next(true).await;
        match behavior {
            MockBehavior::Hang(d) => { tokio::time::sleep(d).await; }
            MockBehavior::FailTransient => return Err(GatewayError::Transient("upstream 503".into())),
            MockBehavior::Reject => return Err(GatewayError::Rejected("unknown transaction".into())),
            MockBehavior::Decline => return Ok(GatewayVerification { success: false, gateway_transaction_id: None }),
            MockBehavior::Succeed => {}
        }
        if !self.state.lock().await.transactions.contains_key(transaction_ref) {
            return Ok(GatewayVerification { success: false, gateway_transaction_id: None });
        }
        Ok(GatewayVerification { success: true, gateway_transaction_id: Some(format!("GTX-{}", transaction_ref.trim_start_matches("MOCK-"))) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_initiate_then_verify() {
        let gateway = MockGateway::new("http://pay.test");
        let tx = gateway.initiate(&Money::new(1500, "NGN"), "order ORD-1").await.unwrap();
        assert!(tx.redirect_url.ends_with(&tx.transaction_ref));
        let v = gateway.verify(&tx.transaction_ref).await.unwrap();
        assert!(v.success);
        assert!(!gateway.verify("MOCK-unknown").await.unwrap().success);
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let gateway = MockGateway::new("http://pay.test");
        gateway.script_initiate([MockBehavior::FailTransient, MockBehavior::Reject]).await;
        assert!(gateway.initiate(&Money::new(1, "NGN"), "x").await.unwrap_err().is_retryable());
        assert!(!gateway.initiate(&Money::new(1, "NGN"), "x").await.unwrap_err().is_retryable());
        assert!(gateway.initiate(&Money::new(1, "NGN"), "x").await.is_ok());
        assert_eq!(gateway.initiate_calls().await, 3);
    }
}
