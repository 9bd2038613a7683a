use super::money::Amount;
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Canonical lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Refunded,
    Cancelled,
    Expired,
}

impl TransactionStatus {
    pub const ALL: [TransactionStatus; 7] = [
        TransactionStatus::Pending,
        TransactionStatus::Processing,
        TransactionStatus::Completed,
        TransactionStatus::Failed,
        TransactionStatus::Refunded,
        TransactionStatus::Cancelled,
        TransactionStatus::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Processing => "PROCESSING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
            TransactionStatus::Refunded => "REFUNDED",
            TransactionStatus::Cancelled => "CANCELLED",
            TransactionStatus::Expired => "EXPIRED",
        }
    }

    /// The forward-only transition table.
    ///
    /// Same-state is not a transition and returns `false`.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        match (self, next) {
            (Pending, Processing | Completed | Failed | Cancelled | Expired) => true,
            (Processing, Completed | Failed | Cancelled | Expired) => true,
            (Completed, Refunded) => true,
            _ => false,
        }
    }

    /// True for states that accept no further transition except COMPLETED -> REFUNDED.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending | TransactionStatus::Processing)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self> {
        TransactionStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| PaymentError::Validation(format!("unknown transaction status '{s}'")))
    }
}

/// Bookkeeping for a refund, from request to provider confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundRecord {
    pub amount: Decimal,
    pub reason: String,
    pub reference: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RefundRecord {
    pub fn is_in_flight(&self) -> bool {
        self.completed_at.is_none()
    }
}

/// Side effects owed once a transaction reaches COMPLETED or REFUNDED.
///
/// Steps are stamped as they finish, so a run cut short by a collaborator
/// error is resumed by the next caller rather than repeated. `claimed_at`
/// marks a run in progress; a claim older than the lease may be taken over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    pub status: TransactionStatus,
    pub claimed_at: Option<DateTime<Utc>>,
    pub invoice_synced_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Settlement {
    pub fn owed(status: TransactionStatus) -> Self {
        Self {
            status,
            claimed_at: None,
            invoice_synced_at: None,
            finished_at: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn is_claimable(&self, now: DateTime<Utc>, lease: Duration) -> bool {
        !self.is_finished() && self.claimed_at.is_none_or(|at| now - at >= lease)
    }
}

/// A payment attempt and its full lifecycle.
///
/// Only the orchestrator mutates transactions, and only through
/// [`Transaction::transition_to`] for status changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: Uuid,
    pub payer_id: u64,
    pub invoice_id: Option<u64>,
    /// Charged amount, surcharge included.
    pub amount: Amount,
    /// Amount requested by the payer before the method surcharge.
    pub base_amount: Amount,
    pub currency: String,
    pub description: String,
    pub status: TransactionStatus,
    pub gateway_id: Uuid,
    pub method_id: Uuid,
    pub payment_data: Value,
    pub metadata: Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub gateway_reference: Option<String>,
    pub payment_url: Option<String>,
    pub gateway_response: Option<Value>,
    pub receipt_id: Option<String>,
    pub receipt_url: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub attempts: u32,
    pub refund: Option<RefundRecord>,
    #[serde(default)]
    pub settlement: Option<Settlement>,
    /// Optimistic-concurrency token, bumped by the store on every successful update.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Moves to `next` if the transition table allows it.
    ///
    /// Returns `Ok(false)` when already in `next`. `completed_at` is stamped
    /// the first time the transaction reaches COMPLETED and never again.
    pub fn transition_to(&mut self, next: TransactionStatus, now: DateTime<Utc>) -> Result<bool> {
        if self.status == next {
            return Ok(false);
        }
        if !self.status.can_transition_to(next) {
            return Err(PaymentError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next == TransactionStatus::Completed && self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
        if matches!(next, TransactionStatus::Completed | TransactionStatus::Refunded) {
            self.settlement = Some(Settlement::owed(next));
        }
        self.updated_at = now;
        Ok(true)
    }

    /// Sets the provider reference. Once set it can only be "re-set" to the same value.
    pub fn assign_gateway_reference(&mut self, reference: &str) -> Result<()> {
        match &self.gateway_reference {
            Some(existing) if existing != reference => Err(PaymentError::Conflict(format!(
                "transaction {} already has gateway reference {existing}",
                self.id
            ))),
            Some(_) => Ok(()),
            None => {
                self.gateway_reference = Some(reference.to_string());
                Ok(())
            }
        }
    }

    /// True while the side effects of the current status have not all run.
    pub fn owes_settlement(&self) -> bool {
        self.settlement
            .as_ref()
            .is_some_and(|s| s.status == self.status && !s.is_finished())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == TransactionStatus::Pending && self.expires_at <= now
    }
}

/// Input of `create_transaction`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransaction {
    pub payer_id: u64,
    pub invoice_id: Option<u64>,
    pub amount: Decimal,
    pub currency: Option<String>,
    pub description: Option<String>,
    pub gateway_id: Uuid,
    pub method_id: Uuid,
    #[serde(default)]
    pub payment_data: Option<Value>,
    #[serde(default)]
    pub metadata: Option<Value>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Input of `process_payment`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessPayment {
    pub transaction_id: Uuid,
    pub payment_data: Value,
    #[serde(default)]
    pub save_payment_method: bool,
}
