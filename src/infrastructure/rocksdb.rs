use crate::domain::gateway::{GatewayConfig, PaymentMethod};
use crate::domain::ports::{GatewayStore, MethodStore, TokenStore, TransactionStore};
use crate::domain::token::PaymentToken;
use crate::domain::transaction::{Transaction, TransactionStatus};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

pub const CF_TRANSACTIONS: &str = "transactions";
pub const CF_GATEWAY_REFS: &str = "gateway_refs";
pub const CF_GATEWAYS: &str = "gateways";
pub const CF_METHODS: &str = "methods";
pub const CF_TOKENS: &str = "tokens";

const COLUMN_FAMILIES: [&str; 5] = [CF_TRANSACTIONS, CF_GATEWAY_REFS, CF_GATEWAYS, CF_METHODS, CF_TOKENS];

/// A persistent store implementation using RocksDB.
///
/// Every entity lives in its own column family as JSON keyed by its UUID;
/// `gateway_refs` maps provider references to transaction ids.
///
/// Read-modify-write sequences (version checks, default-token clearing) are
/// serialized by `write_lock` and committed as one `WriteBatch`. `Clone`
/// shares both the database and the lock.
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at `path`, creating any missing
    /// column family.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()));
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| PaymentError::Storage(format!("{name} column family not found")))
    }

    fn read<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_pinned_cf(cf, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put<T: Serialize>(&self, batch: &mut WriteBatch, cf_name: &str, key: &[u8], value: &T) -> Result<()> {
        let cf = self.cf(cf_name)?;
        batch.put_cf(cf, key, serde_json::to_vec(value)?);
        Ok(())
    }

    fn scan<T: DeserializeOwned>(&self, cf_name: &str) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut items = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_key, value) = item?;
            items.push(serde_json::from_slice(&value)?);
        }
        Ok(items)
    }

    fn reference_owner(&self, reference: &str) -> Result<Option<Uuid>> {
        let cf = self.cf(CF_GATEWAY_REFS)?;
        match self.db.get_pinned_cf(cf, reference.as_bytes())? {
            Some(bytes) => Uuid::from_slice(&bytes)
                .map(Some)
                .map_err(|e| PaymentError::Storage(format!("corrupt reference index: {e}"))),
            None => Ok(None),
        }
    }

    /// Adds `tx`'s reference to the index in `batch`, rejecting a reference
    /// that already belongs to another transaction.
    fn index_reference(&self, batch: &mut WriteBatch, tx: &Transaction) -> Result<()> {
        let Some(reference) = &tx.gateway_reference else {
            return Ok(());
        };
        match self.reference_owner(reference)? {
            Some(owner) if owner != tx.id => Err(PaymentError::Conflict(format!(
                "gateway reference {reference} already belongs to transaction {owner}"
            ))),
            Some(_) => Ok(()),
            None => {
                batch.put_cf(self.cf(CF_GATEWAY_REFS)?, reference.as_bytes(), tx.id.as_bytes());
                Ok(())
            }
        }
    }

    fn transactions_where(&self, keep: impl Fn(&Transaction) -> bool) -> Result<Vec<Transaction>> {
        Ok(self
            .scan::<Transaction>(CF_TRANSACTIONS)?
            .into_iter()
            .filter(|tx| keep(tx))
            .collect())
    }
}

#[async_trait]
impl TransactionStore for RocksDBStore {
    async fn insert(&self, tx: Transaction) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if self.read::<Transaction>(CF_TRANSACTIONS, tx.id.as_bytes())?.is_some() {
            return Err(PaymentError::Conflict(format!("transaction {} already exists", tx.id)));
        }
        let mut batch = WriteBatch::default();
        self.index_reference(&mut batch, &tx)?;
        self.put(&mut batch, CF_TRANSACTIONS, tx.id.as_bytes(), &tx)?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Transaction>> {
        self.read(CF_TRANSACTIONS, id.as_bytes())
    }

    async fn find_by_reference(&self, gateway_reference: &str) -> Result<Option<Transaction>> {
        match self.reference_owner(gateway_reference)? {
            Some(id) => self.read(CF_TRANSACTIONS, id.as_bytes()),
            None => Ok(None),
        }
    }

    async fn update(&self, mut tx: Transaction) -> Result<Option<Transaction>> {
        let _guard = self.write_lock.lock().await;
        let Some(stored) = self.read::<Transaction>(CF_TRANSACTIONS, tx.id.as_bytes())? else {
            return Err(PaymentError::NotFound(format!("transaction {}", tx.id)));
        };
        if stored.version != tx.version {
            return Ok(None);
        }
        tx.version += 1;
        let mut batch = WriteBatch::default();
        self.index_reference(&mut batch, &tx)?;
        self.put(&mut batch, CF_TRANSACTIONS, tx.id.as_bytes(), &tx)?;
        self.db.write(batch)?;
        Ok(Some(tx))
    }

    async fn list_by_payer(&self, payer_id: u64) -> Result<Vec<Transaction>> {
        self.transactions_where(|tx| tx.payer_id == payer_id)
    }

    async fn list_created_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Transaction>> {
        self.transactions_where(|tx| tx.created_at >= from && tx.created_at <= to)
    }

    async fn list_by_status(&self, status: TransactionStatus) -> Result<Vec<Transaction>> {
        self.transactions_where(|tx| tx.status == status)
    }
}

#[async_trait]
impl GatewayStore for RocksDBStore {
    async fn save(&self, gateway: GatewayConfig) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.put(&mut batch, CF_GATEWAYS, gateway.id.as_bytes(), &gateway)?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<GatewayConfig>> {
        self.read(CF_GATEWAYS, id.as_bytes())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<GatewayConfig>> {
        Ok(self
            .scan::<GatewayConfig>(CF_GATEWAYS)?
            .into_iter()
            .find(|g| g.name.eq_ignore_ascii_case(name)))
    }
}

#[async_trait]
impl MethodStore for RocksDBStore {
    async fn save(&self, method: PaymentMethod) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.put(&mut batch, CF_METHODS, method.id.as_bytes(), &method)?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<PaymentMethod>> {
        self.read(CF_METHODS, id.as_bytes())
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<PaymentMethod>> {
        Ok(self
            .scan::<PaymentMethod>(CF_METHODS)?
            .into_iter()
            .find(|m| m.code.eq_ignore_ascii_case(code)))
    }
}

#[async_trait]
impl TokenStore for RocksDBStore {
    async fn insert(&self, token: PaymentToken) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut batch = WriteBatch::default();
        if token.is_default {
            for mut other in self.scan::<PaymentToken>(CF_TOKENS)? {
                if other.payer_id == token.payer_id && other.is_default {
                    other.is_default = false;
                    other.updated_at = token.created_at;
                    self.put(&mut batch, CF_TOKENS, other.id.as_bytes(), &other)?;
                }
            }
        }
        self.put(&mut batch, CF_TOKENS, token.id.as_bytes(), &token)?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<PaymentToken>> {
        self.read(CF_TOKENS, id.as_bytes())
    }

    async fn update(&self, token: PaymentToken) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if self.read::<PaymentToken>(CF_TOKENS, token.id.as_bytes())?.is_none() {
            return Err(PaymentError::NotFound(format!("payment token {}", token.id)));
        }
        let mut batch = WriteBatch::default();
        self.put(&mut batch, CF_TOKENS, token.id.as_bytes(), &token)?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn list_active_by_payer(&self, payer_id: u64) -> Result<Vec<PaymentToken>> {
        Ok(self
            .scan::<PaymentToken>(CF_TOKENS)?
            .into_iter()
            .filter(|t| t.payer_id == payer_id && t.is_active)
            .collect())
    }
}
