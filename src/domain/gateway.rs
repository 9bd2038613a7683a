use super::money::{Amount, Surcharge};
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// One provider integration.
///
/// `api_key`, `api_secret` and `webhook_secret` hold ciphertext produced by
/// the configured [`CredentialCipher`](super::ports::CredentialCipher).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    pub id: Uuid,
    pub name: String,
    pub api_key: String,
    pub api_secret: String,
    pub merchant_id: Option<String>,
    pub account_id: Option<String>,
    pub test_mode: bool,
    pub supported_methods: Vec<String>,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub config: Value,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GatewayConfig {
    pub fn summary(&self) -> GatewaySummary {
        GatewaySummary {
            id: self.id,
            name: self.name.clone(),
            supported_methods: self.supported_methods.clone(),
            test_mode: self.test_mode,
            is_active: self.is_active,
        }
    }
}

/// Plaintext gateway configuration as submitted by an administrator.
///
/// Deliberately not `Debug`: it carries live credentials.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfigInput {
    pub name: String,
    pub api_key: String,
    pub api_secret: String,
    pub merchant_id: Option<String>,
    pub account_id: Option<String>,
    pub test_mode: Option<bool>,
    #[serde(default)]
    pub supported_methods: Vec<String>,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub config: Option<Value>,
}

impl GatewayConfigInput {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(PaymentError::Validation("gateway name is required".into()));
        }
        if self.api_key.trim().is_empty() || self.api_secret.trim().is_empty() {
            return Err(PaymentError::Validation(format!(
                "gateway {} requires an API key and secret",
                self.name
            )));
        }
        Ok(())
    }
}

/// What configuration callers get back; never includes credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySummary {
    pub id: Uuid,
    pub name: String,
    pub supported_methods: Vec<String>,
    pub test_mode: bool,
    pub is_active: bool,
}

/// A payable instrument class, e.g. card or bank transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethod {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    pub icon: Option<String>,
    /// Provider name -> provider-native method code.
    pub gateway_methods: BTreeMap<String, String>,
    pub surcharge: Surcharge,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub instructions: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentMethod {
    /// Checks the requested (pre-surcharge) amount against the method limits.
    pub fn check_bounds(&self, amount: Amount) -> Result<()> {
        if let Some(min) = self.min_amount
            && amount.value() < min
        {
            return Err(PaymentError::Validation(format!(
                "the minimum amount for {} is {min}",
                self.name
            )));
        }
        if let Some(max) = self.max_amount
            && amount.value() > max
        {
            return Err(PaymentError::Validation(format!(
                "the maximum amount for {} is {max}",
                self.name
            )));
        }
        Ok(())
    }

    pub fn native_code(&self, provider: &str) -> Option<&str> {
        self.gateway_methods
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(provider))
            .map(|(_, code)| code.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethodInput {
    pub name: String,
    pub code: String,
    pub icon: Option<String>,
    pub gateway_methods: BTreeMap<String, String>,
    pub surcharge: Option<Decimal>,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub instructions: Option<String>,
}

impl PaymentMethodInput {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() || self.code.trim().is_empty() {
            return Err(PaymentError::Validation(
                "payment method name and code are required".into(),
            ));
        }
        if self.gateway_methods.is_empty() {
            return Err(PaymentError::Validation(format!(
                "payment method {} must map to at least one gateway method",
                self.code
            )));
        }
        for bound in [self.min_amount, self.max_amount].into_iter().flatten() {
            if bound <= Decimal::ZERO {
                return Err(PaymentError::Validation(format!(
                    "amount bounds must be positive, got {bound}"
                )));
            }
        }
        if let (Some(min), Some(max)) = (self.min_amount, self.max_amount)
            && min > max
        {
            return Err(PaymentError::Validation(format!(
                "minimum amount {min} exceeds maximum amount {max}"
            )));
        }
        if let Some(percent) = self.surcharge {
            Surcharge::new(percent)?;
        }
        Ok(())
    }
}
