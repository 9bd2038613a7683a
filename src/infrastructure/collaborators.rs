//! Default collaborators for standalone runs.
//!
//! Notifications, audit events and invoice settlements are written to the
//! structured log; receipts are numbered locally.

use crate::domain::ports::{
    AuditEvent, AuditLog, InvoiceLedger, Notification, Notifier, Receipt, ReceiptIssuer,
};
use crate::domain::transaction::Transaction;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::info;

#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        info!(
            target: "paygate::notifications",
            payer_id = notification.payer_id,
            title = %notification.title,
            action_url = ?notification.action_url,
            "{}",
            notification.body
        );
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct LogAuditLog;

#[async_trait]
impl AuditLog for LogAuditLog {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        info!(
            target: "paygate::audit",
            action = %event.action,
            payer_id = event.payer_id,
            entity_type = %event.entity_type,
            entity_id = %event.entity_id,
            details = %event.details,
            "audit"
        );
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct LogInvoiceLedger;

#[async_trait]
impl InvoiceLedger for LogInvoiceLedger {
    async fn mark_paid(&self, invoice_id: u64, amount: Decimal, paid_at: DateTime<Utc>) -> Result<()> {
        info!(target: "paygate::invoices", invoice_id, %amount, %paid_at, "Invoice marked as paid");
        Ok(())
    }

    async fn mark_unpaid(&self, invoice_id: u64) -> Result<()> {
        info!(target: "paygate::invoices", invoice_id, "Invoice reopened after refund");
        Ok(())
    }
}

/// Numbers receipts as `REC-<completion date>-<transaction prefix>`.
///
/// The number is derived from the transaction, so issuing twice for the same
/// transaction yields the same receipt.
#[derive(Debug, Clone)]
pub struct LocalReceiptIssuer {
    base_url: String,
}

impl LocalReceiptIssuer {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl Default for LocalReceiptIssuer {
    fn default() -> Self {
        Self::new("")
    }
}

#[async_trait]
impl ReceiptIssuer for LocalReceiptIssuer {
    async fn issue(&self, tx: &Transaction) -> Result<Receipt> {
        let issued = tx.completed_at.unwrap_or(tx.updated_at);
        let prefix: String = tx.id.simple().to_string().chars().take(8).collect();
        let id = format!("REC-{}-{}", issued.format("%Y%m%d"), prefix.to_uppercase());
        let url = format!("{}/receipts/{id}.pdf", self.base_url);
        Ok(Receipt { id, url })
    }
}
