//! Payment Aggregate
//!
//! A payment belongs to exactly one order and one user. Its status only moves
//! forward:
//!
//! ```text
//! pending -> processing -> completed -> refunded (refund pending -> refund completed)
//! pending | processing -> failed | cancelled
//! ```
//!
//! Failed and cancelled payments are terminal; a retry creates a new payment.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::events::{DomainEvent, PaymentEvent};
use crate::domain::value_objects::{Money, MoneyError};

const REFERENCE_PREFIX: &str = "PAY";
const REFERENCE_SUFFIX_LEN: usize = 5;
const BASE36: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

static LAST_REFERENCE_STAMP: AtomicU64 = AtomicU64::new(0);

/// Rules every payment is created and refunded under.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaymentPolicy {
    pub minimum_amount: i64,
    pub refund_window: Duration,
}

impl Default for PaymentPolicy {
    fn default() -> Self {
        Self { minimum_amount: 1000, refund_window: Duration::days(30) }
    }
}

/// Public payment reference, `PAY-<millis base36>-<5 base36 chars>`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReferenceId(String);

impl ReferenceId {
    /// Generates a fresh reference.
    ///
    /// The timestamp component never repeats within a process, so two
    /// references generated here can not collide even within one millisecond.
    pub fn generate() -> Self {
        let now = Utc::now().timestamp_millis().max(0) as u64;
        let stamp = match LAST_REFERENCE_STAMP.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(if now > last { now } else { last + 1 })
        }) {
            Ok(last) | Err(last) => if now > last { now } else { last + 1 },
        };
        let mut rng = rand::thread_rng();
        let suffix: String = (0..REFERENCE_SUFFIX_LEN)
            .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
            .collect();
        Self(format!("{}-{}-{}", REFERENCE_PREFIX, to_base36(stamp), suffix))
    }

    pub fn parse(value: &str) -> Result<Self, PaymentError> {
        let mut parts = value.split('-');
        let valid = parts.next() == Some(REFERENCE_PREFIX)
            && parts.next().is_some_and(|stamp| !stamp.is_empty() && stamp.bytes().all(is_base36))
            && parts.next().is_some_and(|sfx| sfx.len() == REFERENCE_SUFFIX_LEN && sfx.bytes().all(is_base36))
            && parts.next().is_none();
        if !valid {
            return Err(PaymentError::MalformedReference(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

fn is_base36(b: u8) -> bool { b.is_ascii_digit() || b.is_ascii_uppercase() }

fn to_base36(mut value: u64) -> String {
    if value == 0 { return "0".to_string(); }
    let mut out = Vec::new();
    while value > 0 {
        out.push(BASE36[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod { Card, BankTransfer, Wallet, OnlineGateway }

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }

    pub fn is_terminal(&self) -> bool { matches!(self, Self::Failed | Self::Cancelled) }

    /// True while a payment still blocks a new one for the same order.
    pub fn blocks_new_payment(&self) -> bool { !self.is_terminal() }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for PaymentStatus {
    type Err = PaymentError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "pending" => Self::Pending,
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            "refunded" => Self::Refunded,
            other => return Err(PaymentError::UnknownStatus(other.to_string())),
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus { Pending, Completed }

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refund {
    pub status: RefundStatus,
    pub amount: Money,
    pub reason: String,
    pub requested_at: DateTime<Utc>,
    pub requested_by: Uuid,
    pub transaction_id: Option<String>,
    pub refunded_at: Option<DateTime<Utc>>,
}

/// Caller metadata captured for each payment attempt.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptMetadata {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub at: DateTime<Utc>,
}

/// Why a refund was refused.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RefundDenial {
    #[error("payment is {0}, only completed payments can be refunded")]
    NotCompleted(PaymentStatus),
    #[error("payment has already been refunded")]
    AlreadyRefunded,
    #[error("refund window closed at {0}")]
    WindowExpired(DateTime<Utc>),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    id: Uuid,
    order_id: Uuid,
    user_id: Uuid,
    amount: Money,
    method: PaymentMethod,
    status: PaymentStatus,
    reference_id: ReferenceId,
    gateway_ref: Option<String>,
    transaction_id: Option<String>,
    attempts: u32,
    last_attempt: Option<AttemptRecord>,
    failure_reason: Option<String>,
    paid_at: Option<DateTime<Utc>>,
    refund: Option<Refund>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(skip)]
    version: u64,
    #[serde(skip)]
    events: Vec<DomainEvent>,
}

impl Payment {
    pub fn create(order_id: Uuid, user_id: Uuid, amount: Money, method: PaymentMethod, policy: &PaymentPolicy) -> Result<Self, PaymentError> {
        amount.ensure_at_least(policy.minimum_amount)?;
        let now = Utc::now();
        let mut payment = Self {
            id: Uuid::now_v7(), order_id, user_id, amount, method,
            status: PaymentStatus::Pending, reference_id: ReferenceId::generate(),
            gateway_ref: None, transaction_id: None, attempts: 1, last_attempt: None,
            failure_reason: None, paid_at: None, refund: None,
            created_at: now, updated_at: now, version: 0, events: vec![],
        };
        payment.raise_event(PaymentEvent::Created {
            payment_id: payment.id, order_id, reference_id: payment.reference_id.to_string(), amount: payment.amount.amount(),
        });
        Ok(payment)
    }

    pub fn id(&self) -> Uuid { self.id }
    pub fn order_id(&self) -> Uuid { self.order_id }
    pub fn user_id(&self) -> Uuid { self.user_id }
    pub fn amount(&self) -> &Money { &self.amount }
    pub fn method(&self) -> PaymentMethod { self.method }
    pub fn status(&self) -> PaymentStatus { self.status }
    pub fn reference_id(&self) -> &ReferenceId { &self.reference_id }
    pub fn gateway_ref(&self) -> Option<&str> { self.gateway_ref.as_deref() }
    pub fn transaction_id(&self) -> Option<&str> { self.transaction_id.as_deref() }
    pub fn attempts(&self) -> u32 { self.attempts }
    pub fn last_attempt(&self) -> Option<&AttemptRecord> { self.last_attempt.as_ref() }
    pub fn failure_reason(&self) -> Option<&str> { self.failure_reason.as_deref() }
    pub fn paid_at(&self) -> Option<DateTime<Utc>> { self.paid_at }
    pub fn refund(&self) -> Option<&Refund> { self.refund.as_ref() }
    pub fn version(&self) -> u64 { self.version }

    pub fn is_successful(&self) -> bool { self.status == PaymentStatus::Completed }

    pub fn has_pending_refund(&self) -> bool {
        self.refund.as_ref().is_some_and(|r| r.status == RefundStatus::Pending)
    }

    /// Checks whether a refund may start at `now`.
    pub fn refund_eligibility(&self, now: DateTime<Utc>, policy: &PaymentPolicy) -> Result<(), RefundDenial> {
        if self.refund.as_ref().is_some_and(|r| r.status == RefundStatus::Completed) {
            return Err(RefundDenial::AlreadyRefunded);
        }
        if self.status != PaymentStatus::Completed {
            return Err(RefundDenial::NotCompleted(self.status));
        }
        // A completed payment without paid_at can only come from a corrupt record.
        let paid_at = self.paid_at.unwrap_or(self.updated_at);
        let closes_at = paid_at + policy.refund_window;
        if now > closes_at {
            return Err(RefundDenial::WindowExpired(closes_at));
        }
        Ok(())
    }

    pub fn can_refund(&self, now: DateTime<Utc>, policy: &PaymentPolicy) -> bool {
        self.refund_eligibility(now, policy).is_ok()
    }

    /// Records who opened the payment without counting another attempt.
    pub fn record_client(&mut self, meta: AttemptMetadata) {
        self.last_attempt = Some(AttemptRecord { ip: meta.ip, user_agent: meta.user_agent, at: Utc::now() });
        self.touch();
    }

    /// Records another attempt by the caller. Status is left untouched.
    pub fn log_attempt(&mut self, meta: AttemptMetadata) {
        self.attempts = self.attempts.saturating_add(1);
        self.record_client(meta);
    }

    pub fn mark_processing(&mut self, gateway_ref: impl Into<String>) -> Result<(), PaymentError> {
        self.ensure_status(&[PaymentStatus::Pending], "mark processing")?;
        let gateway_ref = gateway_ref.into();
        self.status = PaymentStatus::Processing;
        self.gateway_ref = Some(gateway_ref.clone());
        self.touch();
        self.raise_event(PaymentEvent::Processing { payment_id: self.id, order_id: self.order_id, gateway_ref });
        Ok(())
    }

    pub fn mark_completed(&mut self, transaction_id: impl Into<String>, paid_at: DateTime<Utc>) -> Result<(), PaymentError> {
        self.ensure_status(&[PaymentStatus::Pending, PaymentStatus::Processing], "complete")?;
        let transaction_id = transaction_id.into();
        self.status = PaymentStatus::Completed;
        self.transaction_id = Some(transaction_id.clone());
        self.paid_at = Some(paid_at);
        self.touch();
        self.raise_event(PaymentEvent::Completed { payment_id: self.id, order_id: self.order_id, transaction_id });
        Ok(())
    }

    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<(), PaymentError> {
        self.ensure_status(&[PaymentStatus::Pending, PaymentStatus::Processing], "fail")?;
        let reason = reason.into();
        self.status = PaymentStatus::Failed;
        self.failure_reason = Some(reason.clone());
        self.touch();
        self.raise_event(PaymentEvent::Failed { payment_id: self.id, order_id: self.order_id, reason });
        Ok(())
    }

    pub fn cancel(&mut self) -> Result<(), PaymentError> {
        self.ensure_status(&[PaymentStatus::Pending, PaymentStatus::Processing], "cancel")?;
        self.status = PaymentStatus::Cancelled;
        self.touch();
        self.raise_event(PaymentEvent::Cancelled { payment_id: self.id, order_id: self.order_id });
        Ok(())
    }

    pub fn process_refund(&mut self, amount: i64, reason: &str, actor: Uuid, now: DateTime<Utc>, policy: &PaymentPolicy) -> Result<(), PaymentError> {
        self.refund_eligibility(now, policy)?;
        if amount <= 0 {
            return Err(PaymentError::InvalidRefundAmount(amount));
        }
        if amount > self.amount.amount() {
            return Err(PaymentError::RefundExceedsAmount { requested: amount, paid: self.amount.amount() });
        }
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(PaymentError::MissingRefundReason);
        }
        self.refund = Some(Refund {
            status: RefundStatus::Pending,
            amount: Money::new(amount, self.amount.currency()),
            reason: reason.to_string(),
            requested_at: now,
            requested_by: actor,
            transaction_id: None,
            refunded_at: None,
        });
        self.status = PaymentStatus::Refunded;
        self.touch();
        self.raise_event(PaymentEvent::RefundRequested { payment_id: self.id, order_id: self.order_id, amount, actor });
        Ok(())
    }

    pub fn complete_refund(&mut self, transaction_id: impl Into<String>, now: DateTime<Utc>) -> Result<(), PaymentError> {
        let refund = self.refund.as_mut()
            .filter(|r| r.status == RefundStatus::Pending)
            .ok_or(PaymentError::NoPendingRefund)?;
        let transaction_id = transaction_id.into();
        refund.status = RefundStatus::Completed;
        refund.transaction_id = Some(transaction_id.clone());
        refund.refunded_at = Some(now);
        self.touch();
        self.raise_event(PaymentEvent::RefundCompleted { payment_id: self.id, order_id: self.order_id, transaction_id });
        Ok(())
    }

    pub fn take_events(&mut self) -> Vec<DomainEvent> { std::mem::take(&mut self.events) }

    /// Called by repositories once a save has been committed at `version`.
    pub(crate) fn committed(&mut self, version: u64) { self.version = version; }

    fn ensure_status(&self, allowed: &[PaymentStatus], action: &'static str) -> Result<(), PaymentError> {
        if !allowed.contains(&self.status) {
            return Err(PaymentError::InvalidTransition { from: self.status, action });
        }
        Ok(())
    }

    fn raise_event(&mut self, e: PaymentEvent) { self.events.push(DomainEvent::Payment(e)); }
    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
    #[error(transparent)]
    Amount(#[from] MoneyError),
    #[error("cannot {action} a {from} payment")]
    InvalidTransition { from: PaymentStatus, action: &'static str },
    #[error("refund not allowed: {0}")]
    RefundNotAllowed(#[from] RefundDenial),
    #[error("refund amount {requested} exceeds paid amount {paid}")]
    RefundExceedsAmount { requested: i64, paid: i64 },
    #[error("refund amount must be positive, got {0}")]
    InvalidRefundAmount(i64),
    #[error("refund reason is required")]
    MissingRefundReason,
    #[error("no pending refund")]
    NoPendingRefund,
    #[error("malformed payment reference {0}")]
    MalformedReference(String),
    #[error("unknown payment status {0}")]
    UnknownStatus(String),
}
