//! Gateway and payment-method configuration.

use super::orchestrator::PaymentOrchestrator;
use crate::domain::gateway::{
    GatewayConfig, GatewayConfigInput, GatewaySummary, PaymentMethod, PaymentMethodInput,
};
use crate::domain::money::Surcharge;
use crate::error::{PaymentError, Result};
use crate::gateway::GatewayCredentials;
use chrono::Utc;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

impl PaymentOrchestrator {
    /// Upserts a gateway by provider name.
    ///
    /// The plaintext credentials must initialize a live adapter before
    /// anything is stored; only ciphertext is persisted.
    pub async fn configure_gateway(&self, input: GatewayConfigInput) -> Result<GatewaySummary> {
        input.validate()?;
        let name = input.name.trim().to_lowercase();
        let mut adapter = self.factory.create_adapter(&name).ok_or_else(|| {
            PaymentError::Configuration(format!(
                "unsupported payment gateway {name} (supported: {})",
                self.factory.providers().join(", ")
            ))
        })?;
        let existing = self.gateways.find_by_name(&name).await?;
        let test_mode = input
            .test_mode
            .or(existing.as_ref().map(|g| g.test_mode))
            .unwrap_or(true);
        let config = input.config.clone().unwrap_or_else(|| json!({}));

        adapter
            .initialize(GatewayCredentials {
                api_key: input.api_key.clone(),
                api_secret: input.api_secret.clone(),
                merchant_id: input.merchant_id.clone(),
                account_id: input.account_id.clone(),
                test_mode,
                webhook_secret: input.webhook_secret.clone(),
                config: config.clone(),
            })
            .await
            .map_err(|e| {
                PaymentError::Configuration(format!("invalid configuration for {name}: {e}"))
            })?;

        let cipher = &self.collaborators.cipher;
        let now = Utc::now();
        let gateway = GatewayConfig {
            id: existing.as_ref().map_or_else(Uuid::new_v4, |g| g.id),
            name,
            api_key: cipher.encrypt(&input.api_key)?,
            api_secret: cipher.encrypt(&input.api_secret)?,
            merchant_id: input.merchant_id,
            account_id: input.account_id,
            test_mode,
            supported_methods: input.supported_methods,
            webhook_url: input.webhook_url,
            webhook_secret: input
                .webhook_secret
                .as_deref()
                .map(|secret| cipher.encrypt(secret))
                .transpose()?,
            config,
            is_active: true,
            created_at: existing.as_ref().map_or(now, |g| g.created_at),
            updated_at: now,
        };
        self.gateways.save(gateway.clone()).await?;
        info!(
            gateway_id = %gateway.id,
            provider = %gateway.name,
            test_mode,
            updated = existing.is_some(),
            "Payment gateway configured"
        );
        Ok(gateway.summary())
    }

    /// Upserts a payment method by code.
    ///
    /// Every provider in the method mapping must be supported, and those
    /// already configured must still initialize.
    pub async fn configure_payment_method(&self, input: PaymentMethodInput) -> Result<PaymentMethod> {
        input.validate()?;
        for provider in input.gateway_methods.keys() {
            if !self.factory.supports(provider) {
                return Err(PaymentError::Configuration(format!(
                    "payment method {} maps to unsupported gateway {provider}",
                    input.code
                )));
            }
            if let Some(gateway) = self.gateways.find_by_name(provider).await? {
                self.adapter_for(&gateway).await?;
            }
        }
        let code = input.code.trim().to_lowercase();
        let existing = self.methods.find_by_code(&code).await?;
        let surcharge = match input.surcharge {
            Some(percent) => Surcharge::new(percent)?,
            None => existing.as_ref().map_or(Surcharge::NONE, |m| m.surcharge),
        };
        let now = Utc::now();
        let method = PaymentMethod {
            id: existing.as_ref().map_or_else(Uuid::new_v4, |m| m.id),
            name: input.name,
            code,
            icon: input.icon,
            gateway_methods: input.gateway_methods,
            surcharge,
            min_amount: input.min_amount,
            max_amount: input.max_amount,
            instructions: input.instructions,
            is_active: true,
            created_at: existing.as_ref().map_or(now, |m| m.created_at),
            updated_at: now,
        };
        self.methods.save(method.clone()).await?;
        info!(
            method_id = %method.id,
            code = %method.code,
            surcharge = %method.surcharge.percent(),
            "Payment method configured"
        );
        Ok(method)
    }
}
