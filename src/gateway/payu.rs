//! PayU Latam: hosted WebCheckout plus the JSON payments and reports APIs.

use super::signature::{sha256_hex, verify_hmac_sha256};
use super::{
    ChargeRequest, GatewayAdapter, GatewayCredentials, GatewayResponse, RefundResponse,
    not_initialized, text,
};
use crate::domain::money::Amount;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::{Value, json};
use tracing::debug;

const PROVIDER: &str = "payu";

pub const PRODUCTION_API_URL: &str = "https://api.payulatam.com";
pub const SANDBOX_API_URL: &str = "https://sandbox.api.payulatam.com";
pub const PRODUCTION_CHECKOUT_URL: &str = "https://checkout.payulatam.com/ppp-web-gateway-payu/";
pub const SANDBOX_CHECKOUT_URL: &str =
    "https://sandbox.checkout.payulatam.com/ppp-web-gateway-payu/";

const PAYMENTS_PATH: &str = "/payments-api/4.0/service.cgi";
const REPORTS_PATH: &str = "/reports-api/4.0/service.cgi";

struct Session {
    credentials: GatewayCredentials,
    merchant_id: String,
    api_url: String,
    checkout_url: String,
    client: Client,
}

#[derive(Default)]
pub struct PayUAdapter {
    session: Option<Session>,
}

impl PayUAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn session(&self) -> Result<&Session> {
        self.session.as_ref().ok_or_else(|| not_initialized(PROVIDER))
    }

    /// Reference sent to PayU as `referenceCode`.
    pub fn reference_for(charge: &ChargeRequest) -> String {
        format!("PAYU-{}", charge.transaction_id)
    }
}

impl Session {
    fn merchant(&self) -> Value {
        json!({
            "apiLogin": self.credentials.api_key,
            "apiKey": self.credentials.api_secret,
        })
    }

    fn account_id(&self) -> &str {
        self.credentials
            .account_id
            .as_deref()
            .unwrap_or(&self.merchant_id)
    }

    async fn command(&self, path: &str, body: Value) -> Result<Value> {
        let url = format!("{}{path}", self.api_url);
        debug!(%url, command = %body["command"], "PayU request");
        let response = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        let payload: Value = response.json().await?;
        if !status.is_success() {
            return Err(PaymentError::Gateway(format!(
                "PayU API error ({status}): {}",
                text(&payload["error"]).unwrap_or_else(|| payload.to_string())
            )));
        }
        Ok(payload)
    }

    /// Latest PayU order and transaction for `reference`.
    async fn order_by_reference(&self, reference: &str) -> Result<OrderLookup> {
        let payload = self
            .command(
                REPORTS_PATH,
                json!({
                    "test": self.credentials.test_mode,
                    "language": "es",
                    "command": "ORDER_DETAIL_BY_REFERENCE_CODE",
                    "merchant": self.merchant(),
                    "details": { "referenceCode": reference },
                }),
            )
            .await?;
        let order = &payload["result"]["payload"][0];
        let last_tx = order["transactions"]
            .as_array()
            .and_then(|txs| txs.last())
            .cloned()
            .unwrap_or(Value::Null);
        Ok(OrderLookup {
            order_id: text(&order["id"]),
            transaction_id: text(&last_tx["id"]),
            state: text(&last_tx["transactionResponse"]["state"]),
            payload,
        })
    }
}

struct OrderLookup {
    payload: Value,
    order_id: Option<String>,
    transaction_id: Option<String>,
    state: Option<String>,
}

fn api_error(payload: &Value) -> Option<String> {
    if payload["code"].as_str() == Some("SUCCESS") {
        None
    } else {
        Some(text(&payload["error"]).unwrap_or_else(|| "PayU rejected the request".to_string()))
    }
}

#[async_trait]
impl GatewayAdapter for PayUAdapter {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    async fn initialize(&mut self, credentials: GatewayCredentials) -> Result<()> {
        if credentials.api_key.is_empty() || credentials.api_secret.is_empty() {
            return Err(PaymentError::Configuration(
                "PayU requires an API login and API key".into(),
            ));
        }
        let merchant_id = credentials
            .merchant_id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| PaymentError::Configuration("PayU requires a merchant id".into()))?;
        let (api_default, checkout_default) = if credentials.test_mode {
            (SANDBOX_API_URL, SANDBOX_CHECKOUT_URL)
        } else {
            (PRODUCTION_API_URL, PRODUCTION_CHECKOUT_URL)
        };
        let api_url = credentials
            .option("baseUrl")
            .unwrap_or(api_default)
            .trim_end_matches('/')
            .to_string();
        let checkout_url = credentials
            .option("checkoutUrl")
            .unwrap_or(checkout_default)
            .to_string();
        let client = credentials.http_client()?;
        self.session = Some(Session {
            credentials,
            merchant_id,
            api_url,
            checkout_url,
            client,
        });
        Ok(())
    }

    async fn create_payment(&self, charge: &ChargeRequest) -> Result<GatewayResponse> {
        let session = self.session()?;
        let reference = Self::reference_for(charge);
        let amount = charge.amount.to_string();
        // SHA256 WebCheckout signature: apiKey~merchantId~referenceCode~amount~currency
        let signature = sha256_hex(
            format!(
                "{}~{}~{reference}~{amount}~{}",
                session.credentials.api_secret, session.merchant_id, charge.currency
            )
            .as_bytes(),
        );
        let url = Url::parse_with_params(
            &session.checkout_url,
            &[
                ("merchantId", session.merchant_id.as_str()),
                ("accountId", session.account_id()),
                ("referenceCode", reference.as_str()),
                ("description", charge.description.as_str()),
                ("amount", amount.as_str()),
                ("currency", charge.currency.as_str()),
                ("algorithmSignature", "SHA256"),
                ("signature", signature.as_str()),
                ("test", if session.credentials.test_mode { "1" } else { "0" }),
            ],
        )
        .map_err(|e| PaymentError::Configuration(format!("invalid PayU checkout URL: {e}")))?;

        Ok(GatewayResponse {
            success: true,
            payment_url: Some(url.to_string()),
            gateway_reference: Some(reference.clone()),
            status: "PENDING".to_string(),
            response: json!({ "referenceCode": reference, "checkoutUrl": url.as_str() }),
            error_code: None,
            error_message: None,
        })
    }

    async fn process_payment(&self, charge: &ChargeRequest) -> Result<GatewayResponse> {
        let session = self.session()?;
        let Some(token) = text(&charge.payment_data["token"]) else {
            return Err(PaymentError::Validation(
                "PayU payments require a credit card token".into(),
            ));
        };
        let reference = Self::reference_for(charge);
        let payment_method = charge
            .method_code
            .clone()
            .or_else(|| text(&charge.payment_data["paymentMethod"]))
            .unwrap_or_else(|| "VISA".to_string());
        let body = json!({
            "language": "es",
            "command": "SUBMIT_TRANSACTION",
            "merchant": session.merchant(),
            "test": session.credentials.test_mode,
            "transaction": {
                "order": {
                    "accountId": session.account_id(),
                    "referenceCode": reference,
                    "description": charge.description,
                    "language": "es",
                    "additionalValues": {
                        "TX_VALUE": { "value": charge.amount.value(), "currency": charge.currency }
                    },
                    "buyer": { "merchantBuyerId": charge.payer_id.to_string() },
                },
                "creditCardTokenId": token,
                "type": "AUTHORIZATION_AND_CAPTURE",
                "paymentMethod": payment_method,
                "paymentCountry": charge.payment_data["country"].as_str().unwrap_or("CO"),
            },
        });
        let payload = session.command(PAYMENTS_PATH, body).await?;
        if let Some(message) = api_error(&payload) {
            return Ok(GatewayResponse::rejected(None, message, payload));
        }
        let tx_response = &payload["transactionResponse"];
        let status = text(&tx_response["state"]).unwrap_or_else(|| "PENDING".to_string());
        let error_code = text(&tx_response["responseCode"]).filter(|code| code != "APPROVED");
        let error_message = text(&tx_response["responseMessage"]).filter(|_| error_code.is_some());
        Ok(GatewayResponse {
            success: true,
            payment_url: None,
            gateway_reference: Some(reference),
            status,
            response: payload,
            error_code,
            error_message,
        })
    }

    async fn verify_payment(&self, gateway_reference: &str) -> Result<GatewayResponse> {
        let session = self.session()?;
        let lookup = session.order_by_reference(gateway_reference).await?;
        if let Some(message) = api_error(&lookup.payload) {
            return Ok(GatewayResponse::rejected(None, message, lookup.payload));
        }
        Ok(GatewayResponse {
            success: true,
            payment_url: None,
            gateway_reference: Some(gateway_reference.to_string()),
            status: lookup.state.unwrap_or_else(|| "PENDING".to_string()),
            response: lookup.payload,
            error_code: None,
            error_message: None,
        })
    }

    async fn refund_payment(&self, gateway_reference: &str, amount: Amount) -> Result<RefundResponse> {
        let session = self.session()?;
        let lookup = session.order_by_reference(gateway_reference).await?;
        let (Some(order_id), Some(transaction_id)) = (lookup.order_id, lookup.transaction_id)
        else {
            return Ok(RefundResponse {
                success: false,
                refund_reference: None,
                status: "ERROR".to_string(),
                amount: amount.value(),
                response: lookup.payload,
                error_message: Some(format!("PayU order {gateway_reference} not found")),
            });
        };
        let body = json!({
            "language": "es",
            "command": "SUBMIT_TRANSACTION",
            "merchant": session.merchant(),
            "test": session.credentials.test_mode,
            "transaction": {
                "order": { "id": order_id },
                "type": "REFUND",
                "reason": "Refund requested by merchant",
                "parentTransactionId": transaction_id,
                "additionalValues": { "TX_VALUE": { "value": amount.value() } },
            },
        });
        let payload = session.command(PAYMENTS_PATH, body).await?;
        let error_message = api_error(&payload);
        let tx_response = &payload["transactionResponse"];
        Ok(RefundResponse {
            success: error_message.is_none(),
            refund_reference: text(&tx_response["transactionId"]),
            status: text(&tx_response["state"]).unwrap_or_else(|| "ERROR".to_string()),
            amount: amount.value(),
            response: payload,
            error_message,
        })
    }

    fn validate_webhook(&self, payload: &[u8], signature: &str) -> bool {
        let Some(session) = &self.session else {
            return false;
        };
        verify_hmac_sha256(
            payload,
            signature,
            session.credentials.webhook_key().as_bytes(),
        )
    }
}
