use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

/// One payment request from a batch file.
///
/// Gateways and methods are referenced by provider name and method code so
/// batch files survive a re-configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PaymentRequestRow {
    pub payer: u64,
    pub invoice: Option<u64>,
    pub amount: Decimal,
    pub currency: Option<String>,
    pub description: Option<String>,
    pub gateway: String,
    pub method: String,
}

/// Reads payment requests from a CSV source.
///
/// Whitespace around fields is trimmed and short records are accepted, so
/// trailing optional columns may be omitted.
pub struct PaymentRequestReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> PaymentRequestReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes rows; a bad row does not stop the stream.
    pub fn requests(self) -> impl Iterator<Item = Result<PaymentRequestRow>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(PaymentError::from))
    }
}
