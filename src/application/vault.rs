//! Saved payment instruments.

use super::orchestrator::PaymentOrchestrator;
use crate::domain::ports::AuditEvent;
use crate::domain::token::{PaymentToken, PaymentTokenView, SavePaymentToken};
use crate::error::{PaymentError, Result};
use chrono::Utc;
use serde_json::json;
use std::cmp::Reverse;
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

impl PaymentOrchestrator {
    /// Encrypts and stores a vendor token.
    ///
    /// A default token replaces the payer's previous default in the same
    /// store write. The raw token never leaves this function.
    pub async fn save_payment_token(&self, input: SavePaymentToken) -> Result<PaymentTokenView> {
        input.validate()?;
        let gateway = self.gateways.get(input.gateway_id).await?.ok_or_else(|| {
            PaymentError::Configuration(format!("payment gateway {} not found", input.gateway_id))
        })?;
        let now = Utc::now();
        let token = PaymentToken {
            id: Uuid::new_v4(),
            payer_id: input.payer_id,
            gateway_id: gateway.id,
            kind: input.kind.trim().to_uppercase(),
            encrypted_token: self.collaborators.cipher.encrypt(&input.token)?,
            last_four: input.last_four,
            brand: input.brand,
            expiry_month: input.expiry_month,
            expiry_year: input.expiry_year,
            holder_name: input.holder_name,
            is_default: input.is_default,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.tokens.insert(token.clone()).await?;
        info!(token_id = %token.id, payer_id = token.payer_id, default = token.is_default, "Payment token saved");
        self.record_audit(AuditEvent {
            action: "payment.token.create".to_string(),
            payer_id: token.payer_id,
            entity_type: "paymentToken".to_string(),
            entity_id: token.id.to_string(),
            details: json!({ "type": token.kind, "brand": token.brand, "lastFour": token.last_four }),
        })
        .await;
        Ok(token.view(Some(gateway.name)))
    }

    /// Active tokens, default first, then newest first.
    pub async fn get_user_payment_tokens(&self, payer_id: u64) -> Result<Vec<PaymentTokenView>> {
        let mut tokens = self.tokens.list_active_by_payer(payer_id).await?;
        tokens.sort_by_key(|t| (Reverse(t.is_default), Reverse(t.created_at)));

        let mut names: HashMap<Uuid, Option<String>> = HashMap::new();
        let mut views = Vec::with_capacity(tokens.len());
        for token in &tokens {
            if !names.contains_key(&token.gateway_id) {
                let name = self.gateways.get(token.gateway_id).await?.map(|g| g.name);
                names.insert(token.gateway_id, name);
            }
            let gateway = names.get(&token.gateway_id).cloned().flatten();
            views.push(token.view(gateway));
        }
        Ok(views)
    }

    /// Soft delete. Only the owning payer can remove a token.
    pub async fn delete_payment_token(&self, token_id: Uuid, payer_id: u64) -> Result<()> {
        let mut token = match self.tokens.get(token_id).await? {
            Some(token) if token.payer_id == payer_id => token,
            _ => return Err(PaymentError::NotFound(format!("payment token {token_id}"))),
        };
        if !token.is_active {
            return Ok(());
        }
        token.is_active = false;
        token.is_default = false;
        token.updated_at = Utc::now();
        self.tokens.update(token.clone()).await?;
        info!(%token_id, payer_id, "Payment token deactivated");
        self.record_audit(AuditEvent {
            action: "payment.token.delete".to_string(),
            payer_id,
            entity_type: "paymentToken".to_string(),
            entity_id: token_id.to_string(),
            details: json!({ "type": token.kind, "brand": token.brand, "lastFour": token.last_four }),
        })
        .await;
        Ok(())
    }
}
