use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A saved, reusable instrument.
///
/// `encrypted_token` is ciphertext; it is never part of any value returned
/// to callers (see [`PaymentTokenView`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentToken {
    pub id: Uuid,
    pub payer_id: u64,
    pub gateway_id: Uuid,
    pub kind: String,
    pub encrypted_token: String,
    pub last_four: Option<String>,
    pub brand: Option<String>,
    pub expiry_month: Option<u8>,
    pub expiry_year: Option<u16>,
    pub holder_name: Option<String>,
    pub is_default: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentToken {
    pub fn view(&self, gateway: Option<String>) -> PaymentTokenView {
        PaymentTokenView {
            id: self.id,
            kind: self.kind.clone(),
            last_four: self.last_four.clone(),
            brand: self.brand.clone(),
            expiry_month: self.expiry_month,
            expiry_year: self.expiry_year,
            holder_name: self.holder_name.clone(),
            is_default: self.is_default,
            gateway,
            created_at: self.created_at,
        }
    }
}

/// Display-safe projection of a [`PaymentToken`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentTokenView {
    pub id: Uuid,
    pub kind: String,
    pub last_four: Option<String>,
    pub brand: Option<String>,
    pub expiry_month: Option<u8>,
    pub expiry_year: Option<u16>,
    pub holder_name: Option<String>,
    pub is_default: bool,
    pub gateway: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input of `save_payment_token`. Not `Debug`: `token` is the raw vendor token.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavePaymentToken {
    pub payer_id: u64,
    pub gateway_id: Uuid,
    pub token: String,
    pub kind: String,
    pub last_four: Option<String>,
    pub brand: Option<String>,
    pub expiry_month: Option<u8>,
    pub expiry_year: Option<u16>,
    pub holder_name: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

impl SavePaymentToken {
    pub fn validate(&self) -> Result<()> {
        if self.token.trim().is_empty() {
            return Err(PaymentError::Validation("payment token is required".into()));
        }
        if self.kind.trim().is_empty() {
            return Err(PaymentError::Validation("payment token type is required".into()));
        }
        if let Some(last_four) = &self.last_four
            && (last_four.len() != 4 || !last_four.chars().all(|c| c.is_ascii_digit()))
        {
            return Err(PaymentError::Validation(
                "lastFour must be exactly four digits".into(),
            ));
        }
        if let Some(month) = self.expiry_month
            && !(1..=12).contains(&month)
        {
            return Err(PaymentError::Validation(format!(
                "expiry month must be between 1 and 12, got {month}"
            )));
        }
        Ok(())
    }
}
