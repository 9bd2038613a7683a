use super::gateway::{GatewayConfig, PaymentMethod};
use super::token::PaymentToken;
use super::transaction::{Transaction, TransactionStatus};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Stores a new transaction; fails with `Conflict` if the id is taken.
    async fn insert(&self, tx: Transaction) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<Transaction>>;
    async fn find_by_reference(&self, gateway_reference: &str) -> Result<Option<Transaction>>;
    /// Compare-and-set on `tx.version`.
    ///
    /// Persists `tx` with `version + 1` and returns the stored copy only if the
    /// currently stored version still equals `tx.version`; `None` otherwise.
    async fn update(&self, tx: Transaction) -> Result<Option<Transaction>>;
    async fn list_by_payer(&self, payer_id: u64) -> Result<Vec<Transaction>>;
    /// Inclusive on both ends.
    async fn list_created_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Transaction>>;
    async fn list_by_status(&self, status: TransactionStatus) -> Result<Vec<Transaction>>;
}

#[async_trait]
pub trait GatewayStore: Send + Sync {
    /// Inserts or replaces by id.
    async fn save(&self, gateway: GatewayConfig) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<GatewayConfig>>;
    /// Case-insensitive lookup by provider name.
    async fn find_by_name(&self, name: &str) -> Result<Option<GatewayConfig>>;
}

#[async_trait]
pub trait MethodStore: Send + Sync {
    /// Inserts or replaces by id.
    async fn save(&self, method: PaymentMethod) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<PaymentMethod>>;
    /// Case-insensitive lookup by method code.
    async fn find_by_code(&self, code: &str) -> Result<Option<PaymentMethod>>;
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Stores a new token. When `token.is_default`, clears the flag on every
    /// other token of the same payer in the same atomic step.
    async fn insert(&self, token: PaymentToken) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<PaymentToken>>;
    async fn update(&self, token: PaymentToken) -> Result<()>;
    /// Active tokens only.
    async fn list_active_by_payer(&self, payer_id: u64) -> Result<Vec<PaymentToken>>;
}

pub type TransactionStoreBox = Box<dyn TransactionStore>;
pub type GatewayStoreBox = Box<dyn GatewayStore>;
pub type MethodStoreBox = Box<dyn MethodStore>;
pub type TokenStoreBox = Box<dyn TokenStore>;

/// The four persistence boundaries the orchestrator writes through.
pub struct Stores {
    pub transactions: TransactionStoreBox,
    pub gateways: GatewayStoreBox,
    pub methods: MethodStoreBox,
    pub tokens: TokenStoreBox,
}

/// Encrypts stored credentials and vendor tokens.
pub trait CredentialCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String>;
    fn decrypt(&self, ciphertext: &str) -> Result<String>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub payer_id: u64,
    pub title: String,
    pub body: String,
    pub action_url: Option<String>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub action: String,
    pub payer_id: u64,
    pub entity_type: String,
    pub entity_id: String,
    pub details: Value,
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(&self, event: AuditEvent) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    pub id: String,
    pub url: String,
}

#[async_trait]
pub trait ReceiptIssuer: Send + Sync {
    async fn issue(&self, tx: &Transaction) -> Result<Receipt>;
}

/// Settlement side of the invoicing subsystem.
#[async_trait]
pub trait InvoiceLedger: Send + Sync {
    async fn mark_paid(&self, invoice_id: u64, amount: Decimal, paid_at: DateTime<Utc>)
    -> Result<()>;
    async fn mark_unpaid(&self, invoice_id: u64) -> Result<()>;
}

/// External collaborators, shared across concurrent calls.
#[derive(Clone)]
pub struct Collaborators {
    pub cipher: Arc<dyn CredentialCipher>,
    pub notifier: Arc<dyn Notifier>,
    pub audit: Arc<dyn AuditLog>,
    pub receipts: Arc<dyn ReceiptIssuer>,
    pub invoices: Arc<dyn InvoiceLedger>,
}
