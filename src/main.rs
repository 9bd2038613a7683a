use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result, miette};
use paygate::application::PaymentOrchestrator;
use paygate::config::Settings;
use paygate::domain::ports::{Collaborators, Stores};
use paygate::domain::transaction::{CreateTransaction, ProcessPayment, TransactionStatus};
use paygate::gateway::factory::GatewayAdapterFactory;
use paygate::infrastructure::cipher::AesGcmCipher;
use paygate::infrastructure::collaborators::{
    LocalReceiptIssuer, LogAuditLog, LogInvoiceLedger, LogNotifier,
};
use paygate::infrastructure::in_memory;
use paygate::interfaces::csv::request_reader::PaymentRequestReader;
use paygate::interfaces::csv::transaction_writer::TransactionWriter;
use paygate::observability::{self, LogFormat};
use rust_decimal::Decimal;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "paygate", author, version, about, long_about = None)]
struct Cli {
    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// JSON settings file: engine tunables plus gateways and methods to configure.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Base64 AES-256 key for stored credentials and tokens.
    #[arg(long, global = true, env = "PAYGATE_ENCRYPTION_KEY", hide_env_values = true)]
    encryption_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Configure a gateway from a JSON file
    ConfigureGateway { file: PathBuf },
    /// Configure a payment method from a JSON file
    ConfigureMethod { file: PathBuf },
    /// Create transactions from a CSV batch and print the outcomes as CSV
    Create { input: PathBuf },
    /// Submit payment data for a pending transaction
    Process {
        transaction_id: Uuid,
        /// Payment data as a JSON object
        #[arg(long, default_value = "{}")]
        data: String,
        #[arg(long)]
        save_method: bool,
    },
    /// Ask the provider for the current status of a transaction
    Verify { transaction_id: Uuid },
    /// Feed a provider callback payload from a file
    Webhook {
        provider: String,
        payload: PathBuf,
        #[arg(long, default_value = "")]
        signature: String,
    },
    /// Refund a completed transaction
    Refund {
        transaction_id: Uuid,
        #[arg(long)]
        amount: Option<Decimal>,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Save a payment token from a JSON file
    SaveToken { file: PathBuf },
    /// List a payer's saved payment tokens
    Tokens { payer: u64 },
    /// Deactivate a payer's saved payment token
    DeleteToken { token_id: Uuid, payer: u64 },
    /// List a payer's transactions
    Transactions {
        payer: u64,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        status: Option<TransactionStatus>,
    },
    /// Aggregate statistics over a period
    Stats {
        #[arg(long)]
        from: Option<DateTime<Utc>>,
        #[arg(long)]
        to: Option<DateTime<Utc>>,
    },
    /// Expire pending transactions past their deadline
    Expire,
}

#[tokio::main]
async fn main() -> Result<()> {
    observability::init(LogFormat::from_env());
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => Settings::load(path).into_diagnostic()?,
        None => Settings::default(),
    };
    let (stores, persistent) = open_stores(cli.db_path.as_deref())?;
    let cipher = cipher(cli.encryption_key.as_deref(), persistent)?;
    let orchestrator = PaymentOrchestrator::new(
        stores,
        GatewayAdapterFactory::with_defaults(),
        Collaborators {
            cipher: Arc::new(cipher),
            notifier: Arc::new(LogNotifier),
            audit: Arc::new(LogAuditLog),
            receipts: Arc::new(LocalReceiptIssuer::default()),
            invoices: Arc::new(LogInvoiceLedger),
        },
        settings.engine.clone(),
    );
    apply_settings(&orchestrator, settings).await?;

    match cli.command {
        Command::ConfigureGateway { file } => {
            let summary = orchestrator
                .configure_gateway(read_json(&file)?)
                .await
                .into_diagnostic()?;
            print_json(&summary)
        }
        Command::ConfigureMethod { file } => {
            let method = orchestrator
                .configure_payment_method(read_json(&file)?)
                .await
                .into_diagnostic()?;
            print_json(&method)
        }
        Command::Create { input } => create_batch(&orchestrator, &input).await,
        Command::Process {
            transaction_id,
            data,
            save_method,
        } => {
            let tx = orchestrator
                .process_payment(ProcessPayment {
                    transaction_id,
                    payment_data: serde_json::from_str(&data).into_diagnostic()?,
                    save_payment_method: save_method,
                })
                .await
                .into_diagnostic()?;
            print_json(&tx)
        }
        Command::Verify { transaction_id } => {
            let tx = orchestrator
                .verify_transaction(transaction_id)
                .await
                .into_diagnostic()?;
            print_json(&tx)
        }
        Command::Webhook {
            provider,
            payload,
            signature,
        } => {
            let body = fs::read(&payload).into_diagnostic()?;
            let ack = orchestrator
                .process_webhook(&provider, &body, &signature)
                .await
                .into_diagnostic()?;
            print_json(&ack)
        }
        Command::Refund {
            transaction_id,
            amount,
            reason,
        } => {
            let tx = orchestrator
                .refund_transaction(transaction_id, amount, reason)
                .await
                .into_diagnostic()?;
            print_json(&tx)
        }
        Command::SaveToken { file } => {
            let token = orchestrator
                .save_payment_token(read_json(&file)?)
                .await
                .into_diagnostic()?;
            print_json(&token)
        }
        Command::Tokens { payer } => {
            let tokens = orchestrator
                .get_user_payment_tokens(payer)
                .await
                .into_diagnostic()?;
            print_json(&tokens)
        }
        Command::DeleteToken { token_id, payer } => {
            orchestrator
                .delete_payment_token(token_id, payer)
                .await
                .into_diagnostic()?;
            info!(%token_id, payer, "Payment token removed");
            Ok(())
        }
        Command::Transactions {
            payer,
            page,
            limit,
            status,
        } => {
            let page = orchestrator
                .get_user_transactions(payer, page, limit, status)
                .await
                .into_diagnostic()?;
            print_json(&page)
        }
        Command::Stats { from, to } => {
            let stats = orchestrator
                .get_payment_stats(from, to)
                .await
                .into_diagnostic()?;
            print_json(&stats)
        }
        Command::Expire => {
            let expired = orchestrator
                .expire_stale_transactions(Utc::now())
                .await
                .into_diagnostic()?;
            print_json(&serde_json::json!({ "expired": expired }))
        }
    }
}

#[cfg(feature = "storage-rocksdb")]
fn open_stores(db_path: Option<&Path>) -> Result<(Stores, bool)> {
    use paygate::infrastructure::rocksdb::RocksDBStore;

    let Some(path) = db_path else {
        return Ok((in_memory::stores(), false));
    };
    let store = RocksDBStore::open(path).into_diagnostic()?;
    let stores = Stores {
        transactions: Box::new(store.clone()),
        gateways: Box::new(store.clone()),
        methods: Box::new(store.clone()),
        tokens: Box::new(store),
    };
    Ok((stores, true))
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_stores(db_path: Option<&Path>) -> Result<(Stores, bool)> {
    if db_path.is_some() {
        warn!(
            "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok((in_memory::stores(), false))
}

fn cipher(key: Option<&str>, persistent: bool) -> Result<AesGcmCipher> {
    match key {
        Some(key) => AesGcmCipher::from_base64_key(key).into_diagnostic(),
        None if persistent => Err(miette!(
            "persistent storage needs --encryption-key or PAYGATE_ENCRYPTION_KEY"
        )),
        None => {
            warn!("No encryption key configured; using an ephemeral key for this run");
            Ok(AesGcmCipher::generate())
        }
    }
}

async fn apply_settings(orchestrator: &PaymentOrchestrator, settings: Settings) -> Result<()> {
    for gateway in settings.gateways {
        orchestrator
            .configure_gateway(gateway)
            .await
            .into_diagnostic()?;
    }
    for method in settings.methods {
        orchestrator
            .configure_payment_method(method)
            .await
            .into_diagnostic()?;
    }
    Ok(())
}

async fn create_batch(orchestrator: &PaymentOrchestrator, input: &Path) -> Result<()> {
    let file = File::open(input).into_diagnostic()?;
    let reader = PaymentRequestReader::new(file);
    let stdout = io::stdout();
    let mut writer = TransactionWriter::new(stdout.lock());

    for row in reader.requests() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                error!(error = %e, "Error reading payment request");
                continue;
            }
        };
        let created = async {
            let gateway = orchestrator.gateway_by_name(&row.gateway).await?;
            let method = orchestrator.method_by_code(&row.method).await?;
            orchestrator
                .create_transaction(CreateTransaction {
                    payer_id: row.payer,
                    invoice_id: row.invoice,
                    amount: row.amount,
                    currency: row.currency.clone(),
                    description: row.description.clone(),
                    gateway_id: gateway.id,
                    method_id: method.id,
                    payment_data: None,
                    metadata: None,
                    ip_address: None,
                    user_agent: None,
                })
                .await
        }
        .await;
        match created {
            Ok(tx) => writer.write(&tx).into_diagnostic()?,
            Err(e) => error!(payer = row.payer, error = %e, "Error creating transaction"),
        }
    }
    writer.flush().into_diagnostic()
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read_to_string(path).into_diagnostic()?;
    serde_json::from_str(&raw).into_diagnostic()
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).into_diagnostic()?;
    println!("{rendered}");
    Ok(())
}
