use crate::domain::transaction::Transaction;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct TransactionRow<'a> {
    id: String,
    payer: u64,
    invoice: Option<u64>,
    amount: String,
    currency: &'a str,
    status: &'static str,
    gateway_reference: Option<&'a str>,
    payment_url: Option<&'a str>,
    error: Option<&'a str>,
}

/// Writes transaction outcomes as CSV, one row per transaction.
pub struct TransactionWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> TransactionWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write(&mut self, tx: &Transaction) -> Result<()> {
        self.writer.serialize(TransactionRow {
            id: tx.id.to_string(),
            payer: tx.payer_id,
            invoice: tx.invoice_id,
            amount: format!("{:.2}", tx.amount.value()),
            currency: &tx.currency,
            status: tx.status.as_str(),
            gateway_reference: tx.gateway_reference.as_deref(),
            payment_url: tx.payment_url.as_deref(),
            error: tx.error_message.as_deref(),
        })?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
