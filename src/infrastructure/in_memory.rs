use crate::domain::gateway::{GatewayConfig, PaymentMethod};
use crate::domain::ports::{GatewayStore, MethodStore, Stores, TokenStore, TransactionStore};
use crate::domain::token::PaymentToken;
use crate::domain::transaction::{Transaction, TransactionStatus};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A fresh, empty set of in-memory stores.
pub fn stores() -> Stores {
    Stores {
        transactions: Box::new(InMemoryTransactionStore::new()),
        gateways: Box::new(InMemoryGatewayStore::new()),
        methods: Box::new(InMemoryMethodStore::new()),
        tokens: Box::new(InMemoryTokenStore::new()),
    }
}

#[derive(Default)]
struct TransactionTable {
    rows: HashMap<Uuid, Transaction>,
    by_reference: HashMap<String, Uuid>,
}

impl TransactionTable {
    fn index_reference(&mut self, tx: &Transaction) -> Result<()> {
        if let Some(reference) = &tx.gateway_reference {
            match self.by_reference.get(reference) {
                Some(owner) if *owner != tx.id => {
                    return Err(PaymentError::Conflict(format!(
                        "gateway reference {reference} already belongs to transaction {owner}"
                    )));
                }
                Some(_) => {}
                None => {
                    self.by_reference.insert(reference.clone(), tx.id);
                }
            }
        }
        Ok(())
    }
}

/// A thread-safe in-memory transaction store.
///
/// A single `RwLock` guards both the rows and the gateway-reference index, so
/// the version check and the write in [`TransactionStore::update`] are atomic.
#[derive(Default, Clone)]
pub struct InMemoryTransactionStore {
    table: Arc<RwLock<TransactionTable>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn insert(&self, tx: Transaction) -> Result<()> {
        let mut table = self.table.write().await;
        if table.rows.contains_key(&tx.id) {
            return Err(PaymentError::Conflict(format!("transaction {} already exists", tx.id)));
        }
        table.index_reference(&tx)?;
        table.rows.insert(tx.id, tx);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Transaction>> {
        let table = self.table.read().await;
        Ok(table.rows.get(&id).cloned())
    }

    async fn find_by_reference(&self, gateway_reference: &str) -> Result<Option<Transaction>> {
        let table = self.table.read().await;
        Ok(table
            .by_reference
            .get(gateway_reference)
            .and_then(|id| table.rows.get(id))
            .cloned())
    }

    async fn update(&self, mut tx: Transaction) -> Result<Option<Transaction>> {
        let mut table = self.table.write().await;
        match table.rows.get(&tx.id) {
            None => return Err(PaymentError::NotFound(format!("transaction {}", tx.id))),
            Some(stored) if stored.version != tx.version => return Ok(None),
            Some(_) => {}
        }
        table.index_reference(&tx)?;
        tx.version += 1;
        table.rows.insert(tx.id, tx.clone());
        Ok(Some(tx))
    }

    async fn list_by_payer(&self, payer_id: u64) -> Result<Vec<Transaction>> {
        let table = self.table.read().await;
        Ok(table
            .rows
            .values()
            .filter(|tx| tx.payer_id == payer_id)
            .cloned()
            .collect())
    }

    async fn list_created_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Transaction>> {
        let table = self.table.read().await;
        Ok(table
            .rows
            .values()
            .filter(|tx| tx.created_at >= from && tx.created_at <= to)
            .cloned()
            .collect())
    }

    async fn list_by_status(&self, status: TransactionStatus) -> Result<Vec<Transaction>> {
        let table = self.table.read().await;
        Ok(table
            .rows
            .values()
            .filter(|tx| tx.status == status)
            .cloned()
            .collect())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryGatewayStore {
    gateways: Arc<RwLock<HashMap<Uuid, GatewayConfig>>>,
}

impl InMemoryGatewayStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GatewayStore for InMemoryGatewayStore {
    async fn save(&self, gateway: GatewayConfig) -> Result<()> {
        let mut gateways = self.gateways.write().await;
        gateways.insert(gateway.id, gateway);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<GatewayConfig>> {
        let gateways = self.gateways.read().await;
        Ok(gateways.get(&id).cloned())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<GatewayConfig>> {
        let gateways = self.gateways.read().await;
        Ok(gateways
            .values()
            .find(|g| g.name.eq_ignore_ascii_case(name))
            .cloned())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryMethodStore {
    methods: Arc<RwLock<HashMap<Uuid, PaymentMethod>>>,
}

impl InMemoryMethodStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MethodStore for InMemoryMethodStore {
    async fn save(&self, method: PaymentMethod) -> Result<()> {
        let mut methods = self.methods.write().await;
        methods.insert(method.id, method);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<PaymentMethod>> {
        let methods = self.methods.read().await;
        Ok(methods.get(&id).cloned())
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<PaymentMethod>> {
        let methods = self.methods.read().await;
        Ok(methods
            .values()
            .find(|m| m.code.eq_ignore_ascii_case(code))
            .cloned())
    }
}

#[derive(Default, Clone)]
pub struct InMemoryTokenStore {
    tokens: Arc<RwLock<HashMap<Uuid, PaymentToken>>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn insert(&self, token: PaymentToken) -> Result<()> {
        let mut tokens = self.tokens.write().await;
        if token.is_default {
            for other in tokens
                .values_mut()
                .filter(|t| t.payer_id == token.payer_id && t.is_default)
            {
                other.is_default = false;
                other.updated_at = token.created_at;
            }
        }
        tokens.insert(token.id, token);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<PaymentToken>> {
        let tokens = self.tokens.read().await;
        Ok(tokens.get(&id).cloned())
    }

    async fn update(&self, token: PaymentToken) -> Result<()> {
        let mut tokens = self.tokens.write().await;
        if !tokens.contains_key(&token.id) {
            return Err(PaymentError::NotFound(format!("payment token {}", token.id)));
        }
        tokens.insert(token.id, token);
        Ok(())
    }

    async fn list_active_by_payer(&self, payer_id: u64) -> Result<Vec<PaymentToken>> {
        let tokens = self.tokens.read().await;
        Ok(tokens
            .values()
            .filter(|t| t.payer_id == payer_id && t.is_active)
            .cloned()
            .collect())
    }
}
