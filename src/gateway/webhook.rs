//! Per-provider webhook field extraction.
//!
//! Each parser pulls the provider reference and the provider-native status
//! out of an already signature-checked payload. They are plain functions so
//! the factory can key them by provider name.

use super::text;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookEvent {
    pub reference: String,
    /// Provider vocabulary; absent status fields read as "PENDING".
    pub status: String,
}

pub type WebhookParser = fn(&Value) -> Option<WebhookEvent>;

/// PayU confirmation page payload.
///
/// `state_pol` is numeric; it is translated to the PayU state names the
/// normalization table understands.
pub fn payu(payload: &Value) -> Option<WebhookEvent> {
    let reference = text(&payload["reference_sale"]).or_else(|| text(&payload["referenceCode"]))?;
    let status = match text(&payload["state_pol"]) {
        Some(code) => payu_state_name(&code).to_string(),
        None => text(&payload["transactionState"]).unwrap_or_else(|| "PENDING".to_string()),
    };
    Some(WebhookEvent { reference, status })
}

fn payu_state_name(code: &str) -> &str {
    match code {
        "4" => "APPROVED",
        "5" => "EXPIRED",
        "6" => "DECLINED",
        "7" => "PENDING",
        "104" => "ERROR",
        other => other,
    }
}

/// Wompi event payload (`transaction.updated`).
pub fn wompi(payload: &Value) -> Option<WebhookEvent> {
    let data = &payload["data"];
    let reference = text(&data["transaction"]["id"]).or_else(|| text(&data["reference"]))?;
    let status = text(&data["transaction"]["status"])
        .or_else(|| text(&data["status"]))
        .unwrap_or_else(|| "PENDING".to_string());
    Some(WebhookEvent { reference, status })
}
