//! Wompi: bearer-authenticated REST API and checksum-signed events.

use super::signature::{hex_digest_eq, sha256_hex};
use super::{
    ChargeRequest, GatewayAdapter, GatewayCredentials, GatewayResponse, RefundResponse,
    not_initialized, text,
};
use crate::domain::money::Amount;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{Value, json};
use tracing::debug;

const PROVIDER: &str = "wompi";

pub const PRODUCTION_API_URL: &str = "https://production.wompi.co/v1";
pub const SANDBOX_API_URL: &str = "https://sandbox.wompi.co/v1";

struct Session {
    credentials: GatewayCredentials,
    api_url: String,
    client: Client,
}

#[derive(Default)]
pub struct WompiAdapter {
    session: Option<Session>,
}

impl WompiAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    fn session(&self) -> Result<&Session> {
        self.session.as_ref().ok_or_else(|| not_initialized(PROVIDER))
    }
}

impl Session {
    async fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value> {
        let url = format!("{}{path}", self.api_url);
        debug!(%url, %method, "Wompi request");
        let mut request = self
            .client
            .request(method, &url)
            .bearer_auth(&self.credentials.api_secret);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;
        let status = response.status();
        let payload: Value = response.json().await?;
        if status.is_server_error() {
            return Err(PaymentError::Gateway(format!(
                "Wompi API error ({status}): {}",
                error_reason(&payload)
            )));
        }
        Ok(payload)
    }

    fn transaction_response(&self, payload: Value) -> GatewayResponse {
        if payload.get("error").is_some() {
            let code = text(&payload["error"]["type"]);
            return GatewayResponse::rejected(code, error_reason(&payload), payload);
        }
        let data = &payload["data"];
        GatewayResponse {
            success: true,
            payment_url: text(&data["payment_method"]["extra"]["async_payment_url"])
                .or_else(|| text(&data["redirect_url"])),
            gateway_reference: text(&data["id"]),
            status: text(&data["status"]).unwrap_or_else(|| "PENDING".to_string()),
            error_code: None,
            error_message: text(&data["status_message"]),
            response: payload,
        }
    }

    fn transaction_body(&self, charge: &ChargeRequest, payment_method: Value) -> Result<Value> {
        let data = &charge.payment_data;
        let mut body = json!({
            "amount_in_cents": charge.amount.minor_units()?,
            "currency": charge.currency,
            "reference": charge.transaction_id.to_string(),
            "payment_method": payment_method,
        });
        for (field, key) in [
            ("customer_email", "customerEmail"),
            ("acceptance_token", "acceptanceToken"),
            ("redirect_url", "redirectUrl"),
        ] {
            if let Some(value) = text(&data[key]) {
                body[field] = Value::String(value);
            }
        }
        Ok(body)
    }
}

fn error_reason(payload: &Value) -> String {
    text(&payload["error"]["reason"])
        .or_else(|| {
            payload["error"]["messages"]
                .as_object()
                .map(|messages| Value::Object(messages.clone()).to_string())
        })
        .unwrap_or_else(|| "Wompi rejected the request".to_string())
}

/// Expected event checksum: SHA-256 over the `signature.properties` values
/// (resolved under `data`), the `timestamp` and the events secret.
pub fn event_checksum(event: &Value, secret: &str) -> Option<String> {
    let properties = event["signature"]["properties"].as_array()?;
    let mut message = String::new();
    for property in properties {
        let mut value = &event["data"];
        for segment in property.as_str()?.split('.') {
            value = value.get(segment)?;
        }
        message.push_str(&text(value).or_else(|| value.as_bool().map(|b| b.to_string()))?);
    }
    message.push_str(&text(&event["timestamp"])?);
    message.push_str(secret);
    Some(sha256_hex(message.as_bytes()))
}

#[async_trait]
impl GatewayAdapter for WompiAdapter {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    async fn initialize(&mut self, credentials: GatewayCredentials) -> Result<()> {
        if credentials.api_key.is_empty() || credentials.api_secret.is_empty() {
            return Err(PaymentError::Configuration(
                "Wompi requires a public and a private key".into(),
            ));
        }
        let default_url = if credentials.test_mode {
            SANDBOX_API_URL
        } else {
            PRODUCTION_API_URL
        };
        let api_url = credentials
            .option("baseUrl")
            .unwrap_or(default_url)
            .trim_end_matches('/')
            .to_string();
        let client = credentials.http_client()?;
        self.session = Some(Session {
            credentials,
            api_url,
            client,
        });
        Ok(())
    }

    async fn create_payment(&self, charge: &ChargeRequest) -> Result<GatewayResponse> {
        let session = self.session()?;
        let payment_method = match charge.payment_data.get("paymentMethod") {
            Some(method @ Value::Object(_)) => method.clone(),
            _ => json!({ "type": charge.method_code.as_deref().unwrap_or("PSE") }),
        };
        let body = session.transaction_body(charge, payment_method)?;
        let payload = session
            .request(Method::POST, "/transactions", Some(body))
            .await?;
        Ok(session.transaction_response(payload))
    }

    async fn process_payment(&self, charge: &ChargeRequest) -> Result<GatewayResponse> {
        let session = self.session()?;
        let Some(token) = text(&charge.payment_data["token"]) else {
            return Err(PaymentError::Validation(
                "Wompi card payments require a card token".into(),
            ));
        };
        let installments = charge.payment_data["installments"].as_u64().unwrap_or(1);
        let payment_method = json!({
            "type": "CARD",
            "token": token,
            "installments": installments,
        });
        let body = session.transaction_body(charge, payment_method)?;
        let payload = session
            .request(Method::POST, "/transactions", Some(body))
            .await?;
        Ok(session.transaction_response(payload))
    }

    async fn verify_payment(&self, gateway_reference: &str) -> Result<GatewayResponse> {
        let session = self.session()?;
        let payload = session
            .request(Method::GET, &format!("/transactions/{gateway_reference}"), None)
            .await?;
        Ok(session.transaction_response(payload))
    }

    async fn refund_payment(&self, gateway_reference: &str, amount: Amount) -> Result<RefundResponse> {
        let session = self.session()?;
        let payload = session
            .request(
                Method::POST,
                &format!("/transactions/{gateway_reference}/void"),
                Some(json!({ "amount_in_cents": amount.minor_units()? })),
            )
            .await?;
        if payload.get("error").is_some() {
            return Ok(RefundResponse {
                success: false,
                refund_reference: None,
                status: "ERROR".to_string(),
                amount: amount.value(),
                error_message: Some(error_reason(&payload)),
                response: payload,
            });
        }
        let data = &payload["data"];
        Ok(RefundResponse {
            success: true,
            refund_reference: text(&data["id"]).or_else(|| text(&data["transaction"]["id"])),
            status: text(&data["transaction"]["status"])
                .or_else(|| text(&data["status"]))
                .unwrap_or_else(|| "PENDING".to_string()),
            amount: amount.value(),
            error_message: None,
            response: payload,
        })
    }

    fn validate_webhook(&self, payload: &[u8], signature: &str) -> bool {
        let Some(session) = &self.session else {
            return false;
        };
        let Ok(event) = serde_json::from_slice::<Value>(payload) else {
            return false;
        };
        let Some(expected) = event_checksum(&event, session.credentials.webhook_key()) else {
            return false;
        };
        let provided = if signature.trim().is_empty() {
            event["signature"]["checksum"].as_str().unwrap_or_default()
        } else {
            signature
        };
        hex_digest_eq(&expected, provided)
    }
}
