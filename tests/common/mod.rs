#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use paygate::application::PaymentOrchestrator;
use paygate::config::EngineConfig;
use paygate::domain::gateway::{GatewayConfigInput, GatewaySummary, PaymentMethod, PaymentMethodInput};
use paygate::domain::money::Amount;
use paygate::domain::ports::{
    AuditEvent, AuditLog, Collaborators, InvoiceLedger, Notification, Notifier, Receipt,
    ReceiptIssuer,
};
use paygate::domain::transaction::{CreateTransaction, Transaction};
use paygate::error::{PaymentError, Result};
use paygate::gateway::factory::GatewayAdapterFactory;
use paygate::gateway::signature::{hmac_sha256_hex, verify_hmac_sha256};
use paygate::gateway::webhook::WebhookEvent;
use paygate::gateway::{
    ChargeRequest, GatewayAdapter, GatewayAdapterBox, GatewayCredentials, GatewayResponse,
    RefundResponse,
};
use paygate::infrastructure::cipher::AesGcmCipher;
use paygate::infrastructure::in_memory;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub const PROVIDER: &str = "scripted";
pub const WEBHOOK_SECRET: &str = "scripted-webhook-secret";

/// Provider behaviour shared by every adapter instance the factory builds.
pub struct Script {
    create_status: Mutex<String>,
    process_status: Mutex<String>,
    verify_status: Mutex<String>,
    pub fail_create: AtomicBool,
    pub reject_refund: AtomicBool,
    calls: Mutex<Vec<&'static str>>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            create_status: Mutex::new("PENDING".into()),
            process_status: Mutex::new("APPROVED".into()),
            verify_status: Mutex::new("PENDING".into()),
            fail_create: AtomicBool::new(false),
            reject_refund: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl Script {
    pub fn set_create_status(&self, status: &str) {
        *self.create_status.lock().unwrap() = status.to_string();
    }

    pub fn set_process_status(&self, status: &str) {
        *self.process_status.lock().unwrap() = status.to_string();
    }

    pub fn set_verify_status(&self, status: &str) {
        *self.verify_status.lock().unwrap() = status.to_string();
    }

    pub fn calls(&self, operation: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == operation).count()
    }

    fn record(&self, operation: &'static str) {
        self.calls.lock().unwrap().push(operation);
    }

    fn status(slot: &Mutex<String>) -> String {
        slot.lock().unwrap().clone()
    }
}

pub fn reference_for(id: Uuid) -> String {
    format!("SCR-{id}")
}

fn response(reference: Option<String>, status: String) -> GatewayResponse {
    GatewayResponse {
        success: true,
        payment_url: reference.as_ref().map(|r| format!("https://pay.example/{r}")),
        gateway_reference: reference,
        status: status.clone(),
        response: json!({ "state": status }),
        error_code: None,
        error_message: None,
    }
}

pub struct ScriptedAdapter {
    script: Arc<Script>,
    webhook_key: Option<String>,
}

impl ScriptedAdapter {
    pub fn new(script: Arc<Script>) -> Self {
        Self {
            script,
            webhook_key: None,
        }
    }
}

#[async_trait]
impl GatewayAdapter for ScriptedAdapter {
    fn provider(&self) -> &'static str {
        PROVIDER
    }

    async fn initialize(&mut self, credentials: GatewayCredentials) -> Result<()> {
        if credentials.api_key == "rejected-key" {
            return Err(PaymentError::Configuration("credentials rejected".into()));
        }
        self.webhook_key = Some(credentials.webhook_key().to_string());
        Ok(())
    }

    async fn create_payment(&self, charge: &ChargeRequest) -> Result<GatewayResponse> {
        self.script.record("create");
        if self.script.fail_create.load(Ordering::SeqCst) {
            return Err(PaymentError::Gateway("connection reset by provider".into()));
        }
        Ok(response(
            Some(reference_for(charge.transaction_id)),
            Script::status(&self.script.create_status),
        ))
    }

    async fn process_payment(&self, charge: &ChargeRequest) -> Result<GatewayResponse> {
        self.script.record("process");
        if charge.payment_data["token"].as_str().is_none() {
            return Ok(GatewayResponse::rejected(
                Some("MISSING_TOKEN".into()),
                "a card token is required".into(),
                json!({}),
            ));
        }
        Ok(response(
            Some(reference_for(charge.transaction_id)),
            Script::status(&self.script.process_status),
        ))
    }

    async fn verify_payment(&self, gateway_reference: &str) -> Result<GatewayResponse> {
        self.script.record("verify");
        Ok(response(
            Some(gateway_reference.to_string()),
            Script::status(&self.script.verify_status),
        ))
    }

    async fn refund_payment(&self, gateway_reference: &str, amount: Amount) -> Result<RefundResponse> {
        self.script.record("refund");
        let success = !self.script.reject_refund.load(Ordering::SeqCst);
        Ok(RefundResponse {
            success,
            refund_reference: success.then(|| format!("RF-{gateway_reference}")),
            status: if success { "APPROVED" } else { "DECLINED" }.into(),
            amount: amount.value(),
            response: json!({}),
            error_message: (!success).then(|| "refund window closed".to_string()),
        })
    }

    fn validate_webhook(&self, payload: &[u8], signature: &str) -> bool {
        self.webhook_key
            .as_deref()
            .is_some_and(|key| verify_hmac_sha256(payload, signature, key.as_bytes()))
    }
}

pub fn scripted_webhook(payload: &Value) -> Option<WebhookEvent> {
    Some(WebhookEvent {
        reference: payload["reference"].as_str()?.to_string(),
        status: payload["status"].as_str().unwrap_or("PENDING").to_string(),
    })
}

/// Captures everything the orchestrator hands to its collaborators.
#[derive(Default)]
pub struct Recorder {
    pub notifications: Mutex<Vec<Notification>>,
    pub audits: Mutex<Vec<AuditEvent>>,
    pub receipts: Mutex<Vec<Uuid>>,
    pub paid: Mutex<Vec<(u64, Decimal)>>,
    pub unpaid: Mutex<Vec<u64>>,
    /// While set, receipt issuance fails.
    pub fail_receipts: AtomicBool,
    /// While set, invoice settlement and reopening fail.
    pub fail_invoices: AtomicBool,
}

impl Recorder {
    pub fn audit_count(&self, action: &str) -> usize {
        self.audits.lock().unwrap().iter().filter(|a| a.action == action).count()
    }

    pub fn notification_count(&self, title: &str) -> usize {
        self.notifications
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.title == title)
            .count()
    }

    pub fn receipt_count(&self, id: Uuid) -> usize {
        self.receipts.lock().unwrap().iter().filter(|r| **r == id).count()
    }
}

#[async_trait]
impl Notifier for Recorder {
    async fn notify(&self, notification: Notification) -> Result<()> {
        self.notifications.lock().unwrap().push(notification);
        Ok(())
    }
}

#[async_trait]
impl AuditLog for Recorder {
    async fn record(&self, event: AuditEvent) -> Result<()> {
        self.audits.lock().unwrap().push(event);
        Ok(())
    }
}

#[async_trait]
impl ReceiptIssuer for Recorder {
    async fn issue(&self, tx: &Transaction) -> Result<Receipt> {
        if self.fail_receipts.load(Ordering::SeqCst) {
            return Err(PaymentError::Storage("receipt service down".into()));
        }
        let mut receipts = self.receipts.lock().unwrap();
        receipts.push(tx.id);
        let id = format!("REC-{}", receipts.len());
        Ok(Receipt {
            url: format!("https://receipts.example/{id}.pdf"),
            id,
        })
    }
}

#[async_trait]
impl InvoiceLedger for Recorder {
    async fn mark_paid(&self, invoice_id: u64, amount: Decimal, _paid_at: DateTime<Utc>) -> Result<()> {
        if self.fail_invoices.load(Ordering::SeqCst) {
            return Err(PaymentError::Storage("invoice ledger unavailable".into()));
        }
        self.paid.lock().unwrap().push((invoice_id, amount));
        Ok(())
    }

    async fn mark_unpaid(&self, invoice_id: u64) -> Result<()> {
        if self.fail_invoices.load(Ordering::SeqCst) {
            return Err(PaymentError::Storage("invoice ledger unavailable".into()));
        }
        self.unpaid.lock().unwrap().push(invoice_id);
        Ok(())
    }
}

pub fn gateway_input() -> GatewayConfigInput {
    GatewayConfigInput {
        name: PROVIDER.into(),
        api_key: "pk_test_scripted".into(),
        api_secret: "sk_test_scripted".into(),
        merchant_id: Some("500238".into()),
        account_id: None,
        test_mode: Some(true),
        supported_methods: vec!["card".into(), "pse".into()],
        webhook_url: None,
        webhook_secret: Some(WEBHOOK_SECRET.into()),
        config: None,
    }
}

pub fn method_input(name: &str, code: &str, surcharge: Option<Decimal>) -> PaymentMethodInput {
    PaymentMethodInput {
        name: name.into(),
        code: code.into(),
        icon: None,
        gateway_methods: BTreeMap::from([(PROVIDER.to_string(), code.to_uppercase())]),
        surcharge,
        min_amount: Some(dec!(1000)),
        max_amount: Some(dec!(10000000)),
        instructions: None,
    }
}

pub struct Harness {
    pub orchestrator: PaymentOrchestrator,
    pub script: Arc<Script>,
    pub recorder: Arc<Recorder>,
    pub gateway: GatewaySummary,
    /// 3% surcharge.
    pub card: PaymentMethod,
    /// No surcharge.
    pub pse: PaymentMethod,
}

/// In-memory orchestrator reporting to `recorder`.
pub fn orchestrator(
    factory: GatewayAdapterFactory,
    recorder: Arc<Recorder>,
    config: EngineConfig,
) -> PaymentOrchestrator {
    PaymentOrchestrator::new(
        in_memory::stores(),
        factory,
        Collaborators {
            cipher: Arc::new(AesGcmCipher::generate()),
            notifier: recorder.clone(),
            audit: recorder.clone(),
            receipts: recorder.clone(),
            invoices: recorder,
        },
        config,
    )
}

pub async fn harness() -> Harness {
    harness_with(EngineConfig::default()).await
}

pub async fn harness_with(config: EngineConfig) -> Harness {
    let script = Arc::new(Script::default());
    let shared = script.clone();
    let mut factory = GatewayAdapterFactory::with_defaults();
    factory.register(
        PROVIDER,
        Arc::new(move || Box::new(ScriptedAdapter::new(shared.clone())) as GatewayAdapterBox),
        scripted_webhook,
    );
    let recorder = Arc::new(Recorder::default());
    let orchestrator = orchestrator(factory, recorder.clone(), config);
    let gateway = orchestrator.configure_gateway(gateway_input()).await.unwrap();
    let card = orchestrator
        .configure_payment_method(method_input("Card", "card", Some(dec!(3))))
        .await
        .unwrap();
    let pse = orchestrator
        .configure_payment_method(method_input("PSE", "pse", None))
        .await
        .unwrap();
    Harness {
        orchestrator,
        script,
        recorder,
        gateway,
        card,
        pse,
    }
}

impl Harness {
    pub fn request(&self, payer_id: u64, amount: Decimal, method: &PaymentMethod) -> CreateTransaction {
        CreateTransaction {
            payer_id,
            invoice_id: Some(1000 + payer_id),
            amount,
            currency: None,
            description: None,
            gateway_id: self.gateway.id,
            method_id: method.id,
            payment_data: None,
            metadata: None,
            ip_address: None,
            user_agent: None,
        }
    }

    /// A PENDING transaction with a provider reference.
    pub async fn create(&self, payer_id: u64, amount: Decimal) -> Transaction {
        self.orchestrator
            .create_transaction(self.request(payer_id, amount, &self.pse))
            .await
            .unwrap()
    }

    /// A transaction driven to COMPLETED through verification.
    pub async fn completed(&self, payer_id: u64, amount: Decimal) -> Transaction {
        let tx = self.create(payer_id, amount).await;
        self.script.set_verify_status("APPROVED");
        let tx = self.orchestrator.verify_transaction(tx.id).await.unwrap();
        self.script.set_verify_status("PENDING");
        tx
    }

    /// A signed webhook body for the scripted provider.
    pub fn webhook(&self, reference: &str, status: &str) -> (Vec<u8>, String) {
        let body = serde_json::to_vec(&json!({ "reference": reference, "status": status })).unwrap();
        let signature = hmac_sha256_hex(WEBHOOK_SECRET.as_bytes(), &body).unwrap();
        (body, signature)
    }
}
