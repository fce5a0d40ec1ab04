use clap::Parser;
use miette::{IntoDiagnostic, Result};
use plaquepay::application::engine::ReconciliationEngine;
use plaquepay::application::report::summarize;
use plaquepay::config::AppConfig;
use plaquepay::domain::payment::PaymentChannel;
use plaquepay::domain::ports::{AuditLogRef, NotifierRef, PaymentStoreRef, VerificationStoreRef};
use plaquepay::domain::signal::RedirectReturn;
use plaquepay::infrastructure::in_memory::{
    InMemoryAuditLog, InMemoryPaymentStore, InMemoryVerificationStore,
};
use plaquepay::infrastructure::notifier::LogNotifier;
use plaquepay::infrastructure::replay_gateway::ReplayGateway;
use plaquepay::interfaces::csv::event_reader::{EventReader, EventType, PaymentEvent};
use plaquepay::interfaces::csv::payment_writer::PaymentWriter;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input payment events CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long, env = "PLAQUEPAY_DB_PATH")]
    db_path: Option<PathBuf>,

    /// TOML configuration file
    #[arg(long, env = "PLAQUEPAY_CONFIG")]
    config: Option<PathBuf>,

    /// After the replay, flag payments still open after this many seconds
    #[arg(long)]
    sweep_overdue_secs: Option<u64>,
}

struct Stores {
    payments: PaymentStoreRef,
    audit: AuditLogRef,
    verifications: VerificationStoreRef,
}

fn in_memory_stores() -> Stores {
    Stores {
        payments: Arc::new(InMemoryPaymentStore::new()),
        audit: Arc::new(InMemoryAuditLog::new()),
        verifications: Arc::new(InMemoryVerificationStore::new()),
    }
}

#[cfg(feature = "storage-rocksdb")]
fn open_stores(db_path: Option<PathBuf>) -> Result<Stores> {
    use plaquepay::infrastructure::rocksdb::RocksDBStore;

    let Some(db_path) = db_path else {
        return Ok(in_memory_stores());
    };
    let store = RocksDBStore::open(db_path).into_diagnostic()?;
    Ok(Stores {
        payments: Arc::new(store.clone()),
        audit: Arc::new(store.clone()),
        verifications: Arc::new(store),
    })
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_stores(db_path: Option<PathBuf>) -> Result<Stores> {
    if db_path.is_some() {
        tracing::warn!(
            "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(in_memory_stores())
}

/// Drives the engine from event rows, scripting the replay gateway as it goes.
struct Replay {
    engine: ReconciliationEngine,
    gateway: Arc<ReplayGateway>,
    /// Cash payments by the label their creation row gave them.
    cash_labels: HashMap<String, Uuid>,
}

impl Replay {
    async fn apply(&mut self, event: PaymentEvent) -> plaquepay::error::Result<()> {
        match event.event_type {
            EventType::Seamless | EventType::Redirect => {
                let request = event.new_payment()?;
                let channel = if event.event_type == EventType::Seamless {
                    PaymentChannel::Seamless
                } else {
                    PaymentChannel::Redirect
                };
                // Script the gateway only for rows the engine will submit.
                request.clone().validate(channel)?;
                if let Some(reference) = event.reference.as_deref() {
                    self.gateway.expect_reference(reference);
                }
                if let Some(status) = event.status.as_deref() {
                    self.gateway.respond_with_status(status);
                }
                let created = match channel {
                    PaymentChannel::Seamless => self.engine.create_seamless_payment(request).await,
                    _ => self.engine.initiate_redirect_payment(request).await,
                };
                // A failed row must not hand its reference or status to the next one.
                if created.is_err() {
                    self.gateway.clear_script();
                }
                let receipt = created?;
                info!(payment_id = %receipt.payment.id, "{}", receipt.message);
            }
            EventType::Cash => {
                let receipt = self.engine.create_cash_payment(event.new_payment()?).await?;
                if let Some(label) = event.reference {
                    self.cash_labels.insert(label, receipt.payment.id);
                }
            }
            EventType::Poll => {
                let reference = event.require_reference()?;
                if let Some(status) = event.status.as_deref() {
                    self.gateway.set_status(reference, status);
                }
                self.engine.poll_status(reference).await?;
            }
            EventType::Return => {
                self.engine
                    .handle_return(RedirectReturn {
                        reference_number: Some(event.require_reference()?.to_string()),
                        transaction_status: event.status.clone(),
                    })
                    .await?;
            }
            EventType::Result => {
                let body = json!({
                    "referenceNumber": event.require_reference()?,
                    "transactionStatus": event.status,
                });
                self.engine.handle_result(&body.to_string()).await?;
            }
            EventType::CashStatus => {
                let label = event.require_reference()?;
                let payment_id = match self.cash_labels.get(label) {
                    Some(id) => *id,
                    None => self.engine.find_by_reference(label).await?.id,
                };
                let status = event.status.as_deref().unwrap_or_default();
                self.engine
                    .update_cash_status(payment_id, status, "replay", "")
                    .await?;
            }
            EventType::Verify => {
                let receipt = self
                    .engine
                    .flag_for_verification(event.require_reference()?, None)
                    .await?;
                info!(payment_id = %receipt.flag.payment_id, "{}", receipt.message);
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load(path).into_diagnostic()?,
        None => AppConfig::default(),
    };
    let stores = open_stores(cli.db_path)?;
    let gateway = Arc::new(ReplayGateway::new(config.gateway.clone()));
    let notifier: NotifierRef = Arc::new(LogNotifier::new(&config.notifications));

    let engine = ReconciliationEngine::new(
        stores.payments,
        stores.audit,
        stores.verifications,
        gateway.clone(),
        notifier,
        &config.gateway,
    );
    let mut replay = Replay {
        engine,
        gateway,
        cash_labels: HashMap::new(),
    };

    // Process events
    let file = File::open(cli.input).into_diagnostic()?;
    for event in EventReader::new(file).events() {
        match event {
            Ok(event) => {
                if let Err(e) = replay.apply(event).await {
                    eprintln!("Error processing event: {}", e);
                }
            }
            Err(e) => {
                eprintln!("Error reading event: {}", e);
            }
        }
    }

    let engine = &replay.engine;
    if let Some(secs) = cli.sweep_overdue_secs {
        let overdue = engine
            .watchdog()
            .check_overdue(Duration::from_secs(secs))
            .await
            .into_diagnostic()?;
        info!(overdue = overdue.len(), "Overdue sweep finished");
    }

    let payments = engine.payments().await.into_diagnostic()?;
    let flagged: HashSet<Uuid> = engine
        .watchdog()
        .flags()
        .await
        .into_diagnostic()?
        .into_iter()
        .map(|flag| flag.payment_id)
        .collect();
    let stats = summarize(&payments);
    info!(
        total = stats.total,
        succeeded = stats.succeeded,
        pending = stats.pending,
        failed = stats.failed,
        plaques = stats.plaques,
        "Replay finished"
    );

    // Output final state
    let stdout = io::stdout();
    let mut writer = PaymentWriter::new(stdout.lock());
    writer.write_payments(&payments, &flagged).into_diagnostic()?;

    Ok(())
}
