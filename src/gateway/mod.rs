//! Provider adapters behind one capability contract.
//!
//! Each adapter wraps one provider's request/response shapes and reports
//! statuses in that provider's own vocabulary; normalization happens in
//! [`crate::domain::status`].

pub mod factory;
pub mod payu;
pub mod signature;
pub mod webhook;
pub mod wompi;

use crate::domain::money::Amount;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Provider HTTP timeout when the gateway config does not set `timeoutSecs`.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Decrypted credentials handed to [`GatewayAdapter::initialize`].
#[derive(Clone, Default)]
pub struct GatewayCredentials {
    pub api_key: String,
    pub api_secret: String,
    pub merchant_id: Option<String>,
    pub account_id: Option<String>,
    pub test_mode: bool,
    pub webhook_secret: Option<String>,
    /// Free-form provider options (`baseUrl`, `checkoutUrl`, `timeoutSecs`, ...).
    pub config: Value,
}

impl GatewayCredentials {
    pub fn option(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    pub fn timeout(&self) -> Duration {
        self.config
            .get("timeoutSecs")
            .and_then(Value::as_u64)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT)
    }

    /// Secret used for webhook signatures, falling back to the API secret.
    pub fn webhook_key(&self) -> &str {
        self.webhook_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.api_secret)
    }

    pub(crate) fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.timeout())
            .build()
            .map_err(|e| PaymentError::Configuration(format!("cannot build HTTP client: {e}")))
    }
}

impl fmt::Debug for GatewayCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayCredentials")
            .field("api_key", &"***")
            .field("api_secret", &"***")
            .field("merchant_id", &self.merchant_id)
            .field("account_id", &self.account_id)
            .field("test_mode", &self.test_mode)
            .field("webhook_secret", &self.webhook_secret.as_ref().map(|_| "***"))
            .finish()
    }
}

/// What an adapter needs to know about a charge.
#[derive(Debug, Clone)]
pub struct ChargeRequest {
    pub transaction_id: Uuid,
    pub amount: Amount,
    pub currency: String,
    pub description: String,
    pub payer_id: u64,
    pub invoice_id: Option<u64>,
    /// Provider-native method code from the payment method mapping.
    pub method_code: Option<String>,
    pub payment_data: Value,
}

/// Result of create/process/verify calls. `status` is provider vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayResponse {
    pub success: bool,
    pub payment_url: Option<String>,
    pub gateway_reference: Option<String>,
    pub status: String,
    pub response: Value,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

impl GatewayResponse {
    pub fn rejected(error_code: Option<String>, error_message: String, response: Value) -> Self {
        Self {
            success: false,
            payment_url: None,
            gateway_reference: None,
            status: "ERROR".to_string(),
            response,
            error_code,
            error_message: Some(error_message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundResponse {
    pub success: bool,
    pub refund_reference: Option<String>,
    pub status: String,
    pub amount: Decimal,
    pub response: Value,
    pub error_message: Option<String>,
}

/// The capability contract every provider implements.
///
/// Adapters are built fresh per call by the factory and initialized with
/// explicit credentials; none of them keeps process-wide state.
#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    fn provider(&self) -> &'static str;

    /// Validates and stores credentials and mode flags.
    async fn initialize(&mut self, credentials: GatewayCredentials) -> Result<()>;

    /// Opens a charge the payer completes out of band (redirect, bank flow).
    async fn create_payment(&self, charge: &ChargeRequest) -> Result<GatewayResponse>;

    /// Completes a charge synchronously, e.g. with a saved card token in
    /// `charge.payment_data`.
    async fn process_payment(&self, charge: &ChargeRequest) -> Result<GatewayResponse>;

    async fn verify_payment(&self, gateway_reference: &str) -> Result<GatewayResponse>;

    async fn refund_payment(&self, gateway_reference: &str, amount: Amount)
    -> Result<RefundResponse>;

    /// Pure signature check. Malformed input yields `false`, never a panic.
    fn validate_webhook(&self, payload: &[u8], signature: &str) -> bool;
}

pub type GatewayAdapterBox = Box<dyn GatewayAdapter>;

/// Error for calls made before `initialize`.
pub(crate) fn not_initialized(provider: &str) -> PaymentError {
    PaymentError::Configuration(format!("{provider} adapter used before initialization"))
}

/// Reads a JSON value that providers send either as a string or a number.
pub(crate) fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
