use crate::config::EngineConfig;
use crate::domain::gateway::{GatewayConfig, PaymentMethod};
use crate::domain::money::Amount;
use crate::domain::ports::{
    AuditEvent, Collaborators, GatewayStoreBox, MethodStoreBox, Notification, Stores,
    TokenStoreBox, TransactionStoreBox,
};
use crate::domain::status::normalize;
use crate::domain::token::SavePaymentToken;
use crate::domain::transaction::{
    CreateTransaction, ProcessPayment, RefundRecord, Settlement, Transaction, TransactionStatus,
};
use crate::error::{PaymentError, Result};
use crate::gateway::factory::GatewayAdapterFactory;
use crate::gateway::{ChargeRequest, GatewayAdapterBox, GatewayCredentials, GatewayResponse, text};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Acknowledgement returned to the provider after a webhook is applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub success: bool,
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
}

/// Provider-reported facts to fold into a stored transaction.
#[derive(Debug, Default)]
struct GatewayUpdate {
    status: Option<TransactionStatus>,
    reference: Option<String>,
    payment_url: Option<String>,
    response: Option<Value>,
    error_code: Option<String>,
    error_message: Option<String>,
    /// Raw webhook body, kept under `metadata.lastWebhook` even when nothing else changes.
    webhook: Option<Value>,
}

impl GatewayUpdate {
    fn from_response(response: &GatewayResponse) -> Self {
        Self {
            status: Some(normalize(&response.status)),
            reference: response.gateway_reference.clone(),
            payment_url: response.payment_url.clone(),
            response: Some(response.response.clone()),
            error_code: response.error_code.clone(),
            error_message: response.error_message.clone(),
            webhook: None,
        }
    }
}

/// The core service: sole writer of transactions and payment tokens.
///
/// Every status change goes through [`PaymentOrchestrator::apply_update`],
/// a compare-and-set on the transaction version. The side effects of
/// COMPLETED and REFUNDED are tracked in a persisted [`Settlement`]: one
/// caller at a time claims it, each step is stamped when done, and a run
/// that fails part-way is resumed by the next verification or webhook.
pub struct PaymentOrchestrator {
    pub(super) transactions: TransactionStoreBox,
    pub(super) gateways: GatewayStoreBox,
    pub(super) methods: MethodStoreBox,
    pub(super) tokens: TokenStoreBox,
    pub(super) factory: GatewayAdapterFactory,
    pub(super) collaborators: Collaborators,
    pub(super) config: EngineConfig,
}

impl PaymentOrchestrator {
    pub fn new(
        stores: Stores,
        factory: GatewayAdapterFactory,
        collaborators: Collaborators,
        config: EngineConfig,
    ) -> Self {
        Self {
            transactions: stores.transactions,
            gateways: stores.gateways,
            methods: stores.methods,
            tokens: stores.tokens,
            factory,
            collaborators,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn transaction(&self, id: Uuid) -> Result<Transaction> {
        self.transactions
            .get(id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("transaction {id}")))
    }

    pub async fn gateway_by_name(&self, name: &str) -> Result<GatewayConfig> {
        self.gateways
            .find_by_name(name)
            .await?
            .ok_or_else(|| PaymentError::Configuration(format!("payment gateway {name} is not configured")))
    }

    pub async fn method_by_code(&self, code: &str) -> Result<PaymentMethod> {
        self.methods
            .find_by_code(code)
            .await?
            .ok_or_else(|| PaymentError::Configuration(format!("payment method {code} is not configured")))
    }

    pub(super) async fn active_gateway(&self, id: Uuid) -> Result<GatewayConfig> {
        match self.gateways.get(id).await? {
            Some(gateway) if gateway.is_active => Ok(gateway),
            Some(gateway) => Err(PaymentError::Configuration(format!(
                "payment gateway {} is inactive",
                gateway.name
            ))),
            None => Err(PaymentError::Configuration(format!("payment gateway {id} not found"))),
        }
    }

    async fn active_method(&self, id: Uuid) -> Result<PaymentMethod> {
        match self.methods.get(id).await? {
            Some(method) if method.is_active => Ok(method),
            Some(method) => Err(PaymentError::Configuration(format!(
                "payment method {} is inactive",
                method.code
            ))),
            None => Err(PaymentError::Configuration(format!("payment method {id} not found"))),
        }
    }

    /// The gateway a stored transaction was created against, active or not.
    async fn transaction_gateway(&self, tx: &Transaction) -> Result<GatewayConfig> {
        self.gateways.get(tx.gateway_id).await?.ok_or_else(|| {
            PaymentError::Configuration(format!("payment gateway {} not found", tx.gateway_id))
        })
    }

    pub(super) fn credentials(&self, gateway: &GatewayConfig) -> Result<GatewayCredentials> {
        let cipher = &self.collaborators.cipher;
        Ok(GatewayCredentials {
            api_key: cipher.decrypt(&gateway.api_key)?,
            api_secret: cipher.decrypt(&gateway.api_secret)?,
            merchant_id: gateway.merchant_id.clone(),
            account_id: gateway.account_id.clone(),
            test_mode: gateway.test_mode,
            webhook_secret: gateway
                .webhook_secret
                .as_deref()
                .map(|secret| cipher.decrypt(secret))
                .transpose()?,
            config: gateway.config.clone(),
        })
    }

    /// A fresh adapter for `gateway`, initialized with its decrypted credentials.
    pub(super) async fn adapter_for(&self, gateway: &GatewayConfig) -> Result<GatewayAdapterBox> {
        let mut adapter = self.factory.create_adapter(&gateway.name).ok_or_else(|| {
            PaymentError::Configuration(format!("unsupported payment gateway {}", gateway.name))
        })?;
        adapter.initialize(self.credentials(gateway)?).await?;
        Ok(adapter)
    }

    pub async fn create_transaction(&self, input: CreateTransaction) -> Result<Transaction> {
        let requested = Amount::new(input.amount)?;
        let gateway = self.active_gateway(input.gateway_id).await?;
        let method = self.active_method(input.method_id).await?;
        method.check_bounds(requested)?;
        let charged = method.surcharge.apply(requested);
        let currency = input
            .currency
            .as_deref()
            .map(|c| c.trim().to_uppercase())
            .unwrap_or_else(|| self.config.default_currency.clone());
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(PaymentError::Validation(format!("invalid currency code '{currency}'")));
        }
        // Resolve the adapter before persisting so configuration errors leave no trace.
        let adapter = self.adapter_for(&gateway).await?;

        let now = Utc::now();
        let tx = Transaction {
            id: Uuid::new_v4(),
            payer_id: input.payer_id,
            invoice_id: input.invoice_id,
            amount: charged,
            base_amount: requested,
            currency,
            description: input
                .description
                .unwrap_or_else(|| format!("Payment via {}", method.name)),
            status: TransactionStatus::Pending,
            gateway_id: gateway.id,
            method_id: method.id,
            payment_data: input.payment_data.unwrap_or_else(|| json!({})),
            metadata: input.metadata.unwrap_or_else(|| json!({})),
            ip_address: input.ip_address,
            user_agent: input.user_agent,
            gateway_reference: None,
            payment_url: None,
            gateway_response: None,
            receipt_id: None,
            receipt_url: None,
            error_code: None,
            error_message: None,
            attempts: 0,
            refund: None,
            settlement: None,
            version: 0,
            created_at: now,
            updated_at: now,
            expires_at: now + self.config.transaction_ttl(),
            completed_at: None,
        };
        self.transactions.insert(tx.clone()).await?;
        info!(
            transaction_id = %tx.id,
            provider = %gateway.name,
            amount = %tx.amount,
            currency = %tx.currency,
            "Transaction created"
        );
        self.audit(
            "payment.transaction.create",
            &tx,
            json!({ "amount": tx.amount, "currency": tx.currency }),
        )
        .await;

        let charge = charge_request(&tx, &method, &gateway.name, tx.payment_data.clone());
        let response = match adapter.create_payment(&charge).await {
            Ok(response) => response,
            Err(err) => return Err(self.record_gateway_error(tx.id, err).await),
        };
        if !response.success {
            return Err(self.record_rejection(tx.id, &response).await);
        }
        self.apply_update(tx.id, GatewayUpdate::from_response(&response))
            .await
    }

    /// Charges a PENDING transaction synchronously, e.g. with a saved card token.
    pub async fn process_payment(&self, input: ProcessPayment) -> Result<Transaction> {
        let tx = self.transaction(input.transaction_id).await?;
        let now = Utc::now();
        if tx.status != TransactionStatus::Pending {
            return Err(PaymentError::Validation(format!(
                "only PENDING transactions can be processed, transaction {} is {}",
                tx.id, tx.status
            )));
        }
        if tx.is_expired(now) {
            return Err(PaymentError::Validation(format!("transaction {} has expired", tx.id)));
        }
        let gateway = self.transaction_gateway(&tx).await?;
        let method = self.active_method(tx.method_id).await?;
        let adapter = self.adapter_for(&gateway).await?;

        // Claim the transaction: only one attempt can move it out of PENDING.
        let stored_data = without_secrets(&input.payment_data);
        let (claimed, _) = self
            .modify(tx.id, |t| {
                if t.status != TransactionStatus::Pending {
                    return Err(PaymentError::Conflict(format!(
                        "transaction {} is already being processed",
                        t.id
                    )));
                }
                t.transition_to(TransactionStatus::Processing, now)?;
                t.attempts += 1;
                t.payment_data = stored_data.clone();
                Ok(true)
            })
            .await?;
        info!(transaction_id = %claimed.id, attempt = claimed.attempts, "Processing payment");

        let charge = charge_request(&claimed, &method, &gateway.name, input.payment_data.clone());
        let response = match adapter.process_payment(&charge).await {
            Ok(response) => response,
            Err(err) => return Err(self.record_gateway_error(claimed.id, err).await),
        };
        if !response.success {
            return Err(self.record_rejection(claimed.id, &response).await);
        }
        let mut update = GatewayUpdate::from_response(&response);
        if let (Some(existing), Some(charged)) = (&claimed.gateway_reference, &update.reference)
            && existing != charged
        {
            // The reference from checkout stays authoritative.
            warn!(
                transaction_id = %claimed.id,
                reference = %existing,
                charge_reference = %charged,
                "Provider opened a new charge for an already referenced transaction"
            );
            update.reference = None;
        }
        let updated = self.apply_update(claimed.id, update).await?;

        if updated.status == TransactionStatus::Completed && input.save_payment_method {
            self.save_instrument(&updated, &input.payment_data).await;
        }
        Ok(updated)
    }

    /// Polls the provider and reconciles the stored status.
    ///
    /// Calling it again without a provider-side change returns the stored
    /// record untouched.
    pub async fn verify_transaction(&self, id: Uuid) -> Result<Transaction> {
        let tx = self.transaction(id).await?;
        let Some(reference) = tx.gateway_reference.clone() else {
            return Err(PaymentError::Validation(format!(
                "transaction {id} has no gateway reference"
            )));
        };
        let gateway = self.transaction_gateway(&tx).await?;
        let adapter = self.adapter_for(&gateway).await?;
        let response = adapter.verify_payment(&reference).await?;
        if !response.success {
            let message = response
                .error_message
                .clone()
                .unwrap_or_else(|| format!("{} could not verify {reference}", gateway.name));
            warn!(transaction_id = %id, provider = %gateway.name, %message, "Verification rejected");
            return Err(PaymentError::Gateway(message));
        }
        let update = GatewayUpdate {
            status: Some(normalize(&response.status)),
            response: Some(response.response),
            ..Default::default()
        };
        self.apply_update(id, update).await
    }

    /// Applies an asynchronous provider notification.
    ///
    /// The signature is checked before the payload is even parsed. Delivery
    /// is at-least-once: a duplicate with an unchanged status is a no-op.
    pub async fn process_webhook(
        &self,
        provider: &str,
        payload: &[u8],
        signature: &str,
    ) -> Result<WebhookAck> {
        let gateway = self.gateway_by_name(provider).await?;
        if !gateway.is_active {
            return Err(PaymentError::Configuration(format!(
                "payment gateway {} is inactive",
                gateway.name
            )));
        }
        let adapter = self.adapter_for(&gateway).await?;
        if !adapter.validate_webhook(payload, signature) {
            warn!(provider = %gateway.name, "Rejected webhook with invalid signature");
            return Err(PaymentError::InvalidSignature);
        }
        let body: Value = serde_json::from_slice(payload).map_err(|e| {
            PaymentError::Validation(format!("webhook payload is not valid JSON: {e}"))
        })?;
        let parse = self.factory.webhook_parser(&gateway.name).ok_or_else(|| {
            PaymentError::Configuration(format!("no webhook parser for {}", gateway.name))
        })?;
        let event = parse(&body).ok_or_else(|| {
            PaymentError::Validation(format!(
                "{} webhook carries no transaction reference",
                gateway.name
            ))
        })?;
        let tx = self
            .transactions
            .find_by_reference(&event.reference)
            .await?
            .ok_or_else(|| {
                PaymentError::NotFound(format!("transaction with gateway reference {}", event.reference))
            })?;
        debug!(transaction_id = %tx.id, native_status = %event.status, "Webhook received");

        let update = GatewayUpdate {
            status: Some(normalize(&event.status)),
            response: Some(body.clone()),
            webhook: Some(body),
            ..Default::default()
        };
        let updated = self.apply_update(tx.id, update).await?;
        Ok(WebhookAck {
            success: true,
            transaction_id: updated.id,
            status: updated.status,
        })
    }

    /// Refunds a COMPLETED transaction, fully or partially.
    pub async fn refund_transaction(
        &self,
        id: Uuid,
        amount: Option<Decimal>,
        reason: Option<String>,
    ) -> Result<Transaction> {
        // Finish an interrupted completion first; the invoice must be paid before it is reopened.
        let tx = self.settle(self.transaction(id).await?).await?;
        if tx.status != TransactionStatus::Completed {
            return Err(PaymentError::Validation(format!(
                "only COMPLETED transactions can be refunded, transaction {id} is {}",
                tx.status
            )));
        }
        let Some(reference) = tx.gateway_reference.clone() else {
            return Err(PaymentError::Validation(format!(
                "transaction {id} has no gateway reference"
            )));
        };
        let refund_amount = amount.map(Amount::new).transpose()?.unwrap_or(tx.amount);
        if refund_amount > tx.amount {
            return Err(PaymentError::Validation(format!(
                "refund amount {refund_amount} exceeds the charged amount {}",
                tx.amount
            )));
        }
        let reason = reason.unwrap_or_else(|| "Refund requested".to_string());
        let gateway = self.transaction_gateway(&tx).await?;
        let adapter = self.adapter_for(&gateway).await?;

        // Record the request first so a concurrent refund cannot reach the provider.
        let requested_at = Utc::now();
        self.modify(id, |t| {
            if t.status != TransactionStatus::Completed {
                return Err(PaymentError::Validation(format!(
                    "only COMPLETED transactions can be refunded, transaction {id} is {}",
                    t.status
                )));
            }
            if t.refund.as_ref().is_some_and(RefundRecord::is_in_flight) {
                return Err(PaymentError::Conflict(format!(
                    "a refund for transaction {id} is already in progress"
                )));
            }
            if t.owes_settlement() {
                return Err(PaymentError::Conflict(format!(
                    "completion of transaction {id} is still being settled"
                )));
            }
            t.refund = Some(RefundRecord {
                amount: refund_amount.value(),
                reason: reason.clone(),
                reference: None,
                requested_at,
                completed_at: None,
            });
            Ok(true)
        })
        .await?;

        let outcome = adapter.refund_payment(&reference, refund_amount).await;
        let response = match outcome {
            Ok(response) if response.success => response,
            Ok(response) => {
                let message = response
                    .error_message
                    .unwrap_or_else(|| format!("{} rejected the refund", gateway.name));
                self.abandon_refund(id, &message).await;
                return Err(PaymentError::Gateway(message));
            }
            Err(err) => {
                self.abandon_refund(id, &err.to_string()).await;
                return Err(err);
            }
        };

        let now = Utc::now();
        let (refunded, _) = self
            .modify(id, |t| {
                t.transition_to(TransactionStatus::Refunded, now)?;
                if let Some(record) = t.refund.as_mut() {
                    record.reference = response.refund_reference.clone();
                    record.completed_at = Some(now);
                }
                t.gateway_response = Some(response.response.clone());
                Ok(true)
            })
            .await?;
        info!(transaction_id = %id, amount = %refund_amount, "Transaction refunded");
        self.settle(refunded).await
    }

    /// Moves PENDING transactions past their expiry to EXPIRED.
    pub async fn expire_stale_transactions(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut expired = 0;
        for tx in self.transactions.list_by_status(TransactionStatus::Pending).await? {
            if !tx.is_expired(now) {
                continue;
            }
            let mut moved = false;
            self.modify(tx.id, |t| {
                moved = t.is_expired(now) && t.transition_to(TransactionStatus::Expired, now)?;
                Ok(moved)
            })
            .await?;
            if moved {
                info!(transaction_id = %tx.id, "Transaction expired");
                expired += 1;
            }
        }
        Ok(expired)
    }

    /// Folds provider facts into the stored record, then runs whatever side
    /// effects the stored status still owes.
    ///
    /// A status that is not a legal move from the stored one is logged and
    /// dropped; the rest of the update still applies.
    async fn apply_update(&self, id: Uuid, update: GatewayUpdate) -> Result<Transaction> {
        let now = Utc::now();
        let mut transition = None;
        let (tx, written) = self
            .modify(id, |t| {
                transition = None;
                let mut changed = false;
                if let Some(reference) = &update.reference
                    && t.gateway_reference.as_deref() != Some(reference.as_str())
                {
                    t.assign_gateway_reference(reference)?;
                    changed = true;
                }
                if update.payment_url.is_some() && t.payment_url != update.payment_url {
                    t.payment_url = update.payment_url.clone();
                    changed = true;
                }
                if let Some(next) = update.status
                    && next != t.status
                {
                    let from = t.status;
                    if from.can_transition_to(next) {
                        t.transition_to(next, now)?;
                        transition = Some((from, next));
                        changed = true;
                    } else {
                        warn!(
                            transaction_id = %t.id,
                            from = %from,
                            to = %next,
                            "Ignoring provider status that is not a legal transition"
                        );
                    }
                }
                if changed {
                    if update.response.is_some() {
                        t.gateway_response = update.response.clone();
                    }
                    if update.error_code.is_some() || update.error_message.is_some() {
                        t.error_code = update.error_code.clone();
                        t.error_message = update.error_message.clone();
                    }
                }
                let recorded = match &update.webhook {
                    Some(body) if t.metadata.get("lastWebhook") != Some(body) => {
                        match t.metadata.as_object_mut() {
                            Some(map) => {
                                map.insert("lastWebhook".to_string(), body.clone());
                            }
                            None => t.metadata = json!({ "lastWebhook": body }),
                        }
                        true
                    }
                    _ => false,
                };
                Ok(changed || recorded)
            })
            .await?;

        if let Some((from, to)) = transition.filter(|_| written) {
            info!(transaction_id = %tx.id, %from, %to, "Transaction status changed");
            if to == TransactionStatus::Failed {
                self.on_failed(&tx).await;
            }
        }
        self.settle(tx).await
    }

    /// Load, mutate, compare-and-set; retried on version conflicts.
    ///
    /// `change` returns whether the record needs writing. Returns the stored
    /// record and whether this call wrote it.
    async fn modify<F>(&self, id: Uuid, mut change: F) -> Result<(Transaction, bool)>
    where
        F: FnMut(&mut Transaction) -> Result<bool> + Send,
    {
        for attempt in 0..=self.config.conflict_retries {
            let stored = self.transaction(id).await?;
            let mut candidate = stored.clone();
            if !change(&mut candidate)? {
                return Ok((stored, false));
            }
            candidate.updated_at = Utc::now();
            match self.transactions.update(candidate).await? {
                Some(saved) => return Ok((saved, true)),
                None => debug!(transaction_id = %id, attempt, "Version conflict, reloading"),
            }
        }
        Err(PaymentError::Conflict(format!(
            "transaction {id} kept changing concurrently"
        )))
    }

    /// Runs the side effects owed by the stored status, if this caller can
    /// claim them. Invoice and receipt errors propagate and release the claim
    /// so the next caller resumes from the first unfinished step.
    async fn settle(&self, tx: Transaction) -> Result<Transaction> {
        if !tx.owes_settlement() {
            return Ok(tx);
        }
        let now = Utc::now();
        let lease = self.config.settlement_lease();
        let (tx, claimed) = self
            .modify(tx.id, |t| {
                let status = t.status;
                match t.settlement.as_mut() {
                    Some(s) if s.status == status && s.is_claimable(now, lease) => {
                        s.claimed_at = Some(now);
                        Ok(true)
                    }
                    _ => Ok(false),
                }
            })
            .await?;
        if !claimed {
            debug!(transaction_id = %tx.id, "Settlement finished or claimed elsewhere");
            return Ok(tx);
        }
        let id = tx.id;
        match self.run_settlement(tx).await {
            Ok(tx) => Ok(tx),
            Err(err) => {
                warn!(transaction_id = %id, error = %err, "Settlement interrupted");
                self.release_settlement(id).await;
                Err(err)
            }
        }
    }

    async fn run_settlement(&self, mut tx: Transaction) -> Result<Transaction> {
        let status = tx.status;
        let synced = tx
            .settlement
            .as_ref()
            .is_some_and(|s| s.invoice_synced_at.is_some());
        if let Some(invoice_id) = tx.invoice_id
            && !synced
        {
            let invoices = &self.collaborators.invoices;
            match status {
                TransactionStatus::Completed => {
                    let paid_at = tx.completed_at.unwrap_or(tx.updated_at);
                    invoices.mark_paid(invoice_id, tx.amount.value(), paid_at).await?;
                }
                TransactionStatus::Refunded => invoices.mark_unpaid(invoice_id).await?,
                _ => {}
            }
            let now = Utc::now();
            tx = self
                .mark_settlement(tx.id, status, move |s| s.invoice_synced_at = Some(now))
                .await?;
        }
        if status == TransactionStatus::Completed && tx.receipt_id.is_none() {
            let receipt = self.collaborators.receipts.issue(&tx).await?;
            tx = self
                .modify(tx.id, |t| {
                    if t.receipt_id.is_some() {
                        return Ok(false);
                    }
                    t.receipt_id = Some(receipt.id.clone());
                    t.receipt_url = Some(receipt.url.clone());
                    Ok(true)
                })
                .await?
                .0;
        }
        let now = Utc::now();
        let tx = self
            .mark_settlement(tx.id, status, move |s| {
                s.finished_at = Some(now);
                s.claimed_at = None;
            })
            .await?;
        match status {
            TransactionStatus::Completed => self.announce_completed(&tx).await,
            TransactionStatus::Refunded => self.announce_refunded(&tx).await,
            _ => {}
        }
        Ok(tx)
    }

    /// Stamps a step on the settlement of `status`; a no-op once the
    /// transaction has moved on to another settlement.
    async fn mark_settlement<F>(&self, id: Uuid, status: TransactionStatus, step: F) -> Result<Transaction>
    where
        F: Fn(&mut Settlement) + Send + Sync,
    {
        let (tx, _) = self
            .modify(id, |t| match t.settlement.as_mut() {
                Some(s) if s.status == status => {
                    step(s);
                    Ok(true)
                }
                _ => Ok(false),
            })
            .await?;
        Ok(tx)
    }

    async fn release_settlement(&self, id: Uuid) {
        let released = self
            .modify(id, |t| match t.settlement.as_mut() {
                Some(s) if s.claimed_at.is_some() && !s.is_finished() => {
                    s.claimed_at = None;
                    Ok(true)
                }
                _ => Ok(false),
            })
            .await;
        if let Err(err) = released {
            warn!(transaction_id = %id, error = %err, "Could not release settlement claim");
        }
    }

    async fn announce_completed(&self, tx: &Transaction) {
        self.notify(
            tx,
            "Payment completed",
            format!(
                "Your payment of {} {} was completed successfully.",
                tx.amount, tx.currency
            ),
            tx.receipt_url.clone(),
        )
        .await;
        self.audit(
            "payment.transaction.completed",
            tx,
            json!({ "amount": tx.amount, "receiptId": tx.receipt_id }),
        )
        .await;
    }

    async fn on_failed(&self, tx: &Transaction) {
        let reason = tx
            .error_message
            .clone()
            .unwrap_or_else(|| "the payment provider declined it".to_string());
        self.notify(
            tx,
            "Payment failed",
            format!(
                "Your payment of {} {} could not be completed: {reason}.",
                tx.amount, tx.currency
            ),
            tx.payment_url.clone(),
        )
        .await;
        self.audit(
            "payment.transaction.failed",
            tx,
            json!({ "errorCode": tx.error_code, "errorMessage": tx.error_message }),
        )
        .await;
    }

    async fn announce_refunded(&self, tx: &Transaction) {
        let amount = tx
            .refund
            .as_ref()
            .map(|r| r.amount)
            .unwrap_or_else(|| tx.amount.value());
        self.notify(
            tx,
            "Payment refunded",
            format!("A refund of {amount} {} has been processed.", tx.currency),
            None,
        )
        .await;
        self.audit(
            "payment.transaction.refunded",
            tx,
            json!({ "amount": amount, "reason": tx.refund.as_ref().map(|r| r.reason.clone()) }),
        )
        .await;
    }

    async fn abandon_refund(&self, id: Uuid, message: &str) {
        let cleared = self
            .modify(id, |t| {
                if !t.refund.as_ref().is_some_and(RefundRecord::is_in_flight) {
                    return Ok(false);
                }
                t.refund = None;
                t.error_message = Some(message.to_string());
                Ok(true)
            })
            .await;
        if let Err(err) = cleared {
            warn!(transaction_id = %id, error = %err, "Could not clear failed refund");
        }
    }

    /// Keeps the transaction where it is and remembers why the call failed.
    async fn record_gateway_error(&self, id: Uuid, err: PaymentError) -> PaymentError {
        warn!(transaction_id = %id, error = %err, "Gateway call failed");
        let message = err.to_string();
        let recorded = self
            .modify(id, |t| {
                t.error_message = Some(message.clone());
                Ok(true)
            })
            .await;
        if let Err(record_err) = recorded {
            warn!(transaction_id = %id, error = %record_err, "Could not record gateway error");
        }
        err
    }

    async fn record_rejection(&self, id: Uuid, response: &GatewayResponse) -> PaymentError {
        let message = response
            .error_message
            .clone()
            .unwrap_or_else(|| "the payment provider rejected the request".to_string());
        warn!(transaction_id = %id, error_code = ?response.error_code, %message, "Gateway rejected request");
        let recorded = self
            .modify(id, |t| {
                t.error_code = response.error_code.clone();
                t.error_message = Some(message.clone());
                t.gateway_response = Some(response.response.clone());
                Ok(true)
            })
            .await;
        if let Err(err) = recorded {
            warn!(transaction_id = %id, error = %err, "Could not record gateway rejection");
        }
        PaymentError::Gateway(message)
    }

    async fn save_instrument(&self, tx: &Transaction, payment_data: &Value) {
        let Some(token) = text(&payment_data["token"]) else {
            debug!(transaction_id = %tx.id, "No token to save");
            return;
        };
        let request = SavePaymentToken {
            payer_id: tx.payer_id,
            gateway_id: tx.gateway_id,
            token,
            kind: text(&payment_data["type"]).unwrap_or_else(|| "CARD".to_string()),
            last_four: text(&payment_data["lastFour"]),
            brand: text(&payment_data["brand"]),
            expiry_month: payment_data["expiryMonth"].as_u64().and_then(|m| u8::try_from(m).ok()),
            expiry_year: payment_data["expiryYear"].as_u64().and_then(|y| u16::try_from(y).ok()),
            holder_name: text(&payment_data["holderName"]),
            is_default: payment_data["isDefault"].as_bool().unwrap_or(false),
        };
        if let Err(err) = self.save_payment_token(request).await {
            warn!(transaction_id = %tx.id, error = %err, "Could not save payment method");
        }
    }

    pub(super) async fn notify(
        &self,
        tx: &Transaction,
        title: &str,
        body: String,
        action_url: Option<String>,
    ) {
        let notification = Notification {
            payer_id: tx.payer_id,
            title: title.to_string(),
            body,
            action_url,
        };
        if let Err(err) = self.collaborators.notifier.notify(notification).await {
            warn!(transaction_id = %tx.id, error = %err, "Notification failed");
        }
    }

    async fn audit(&self, action: &str, tx: &Transaction, details: Value) {
        self.record_audit(AuditEvent {
            action: action.to_string(),
            payer_id: tx.payer_id,
            entity_type: "transaction".to_string(),
            entity_id: tx.id.to_string(),
            details,
        })
        .await;
    }

    pub(super) async fn record_audit(&self, event: AuditEvent) {
        let action = event.action.clone();
        if let Err(err) = self.collaborators.audit.record(event).await {
            warn!(%action, error = %err, "Audit record failed");
        }
    }
}

fn charge_request(
    tx: &Transaction,
    method: &PaymentMethod,
    provider: &str,
    payment_data: Value,
) -> ChargeRequest {
    ChargeRequest {
        transaction_id: tx.id,
        amount: tx.amount,
        currency: tx.currency.clone(),
        description: tx.description.clone(),
        payer_id: tx.payer_id,
        invoice_id: tx.invoice_id,
        method_code: method.native_code(provider).map(str::to_string),
        payment_data,
    }
}

/// Payment data as persisted: raw instrument tokens and card numbers dropped.
fn without_secrets(payment_data: &Value) -> Value {
    match payment_data {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !matches!(key.as_str(), "token" | "cardNumber" | "cvc" | "cvv"))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        ),
        other => other.clone(),
    }
}
