use crate::domain::gateway::{GatewayConfigInput, PaymentMethodInput};
use crate::error::{PaymentError, Result};
use chrono::Duration;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Engine-wide tunables.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Used when a create request omits the currency.
    pub default_currency: String,
    pub transaction_ttl_hours: i64,
    /// Reporting window when the caller gives no start date.
    pub stats_window_days: i64,
    pub max_page_size: usize,
    /// How often a transition is re-evaluated after losing a version race.
    pub conflict_retries: u32,
    /// After this long an unfinished settlement run may be taken over by another caller.
    pub settlement_lease_secs: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_currency: "COP".to_string(),
            transaction_ttl_hours: 24,
            stats_window_days: 30,
            max_page_size: 100,
            conflict_retries: 3,
            settlement_lease_secs: 300,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.default_currency.trim().len() != 3 {
            return Err(PaymentError::Configuration(format!(
                "default currency must be a 3-letter code, got '{}'",
                self.default_currency
            )));
        }
        if self.transaction_ttl_hours <= 0
            || self.stats_window_days <= 0
            || self.settlement_lease_secs <= 0
        {
            return Err(PaymentError::Configuration(
                "transaction TTL, stats window and settlement lease must be positive".into(),
            ));
        }
        if self.max_page_size == 0 {
            return Err(PaymentError::Configuration("max page size must be positive".into()));
        }
        Ok(())
    }

    pub fn transaction_ttl(&self) -> Duration {
        Duration::hours(self.transaction_ttl_hours)
    }

    pub fn stats_window(&self) -> Duration {
        Duration::days(self.stats_window_days)
    }

    pub fn settlement_lease(&self) -> Duration {
        Duration::seconds(self.settlement_lease_secs)
    }
}

/// Bootstrap file: engine tunables plus gateways and methods to configure at start-up.
#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub engine: EngineConfig,
    pub gateways: Vec<GatewayConfigInput>,
    pub methods: Vec<PaymentMethodInput>,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let settings: Settings = serde_json::from_str(raw)?;
        settings.engine.validate()?;
        Ok(settings)
    }
}
