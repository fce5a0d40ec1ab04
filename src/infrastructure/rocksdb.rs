use crate::domain::audit::AuditEntry;
use crate::domain::payment::PaymentRecord;
use crate::domain::ports::{AuditLog, PaymentStore, VerificationStore};
use crate::domain::verification::VerificationFlag;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, IteratorMode, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use uuid::Uuid;

/// Column Family for payment records, keyed by payment id.
pub const CF_PAYMENTS: &str = "payments";
/// Column Family mapping reference numbers to payment ids.
pub const CF_REFERENCES: &str = "references";
/// Column Family for audit entries, keyed by payment id followed by a sequence number.
pub const CF_AUDIT: &str = "audit";
/// Column Family for verification flags, keyed by payment id.
pub const CF_VERIFICATIONS: &str = "verifications";

/// A persistent store implementation using RocksDB.
///
/// Handles payment records, the reference index, the audit trail and verification
/// flags in separate Column Families. Read-modify-write operations run under a
/// single writer lock; the record and its reference index entry are written in one
/// `WriteBatch`.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    writer: Arc<Mutex<()>>,
    audit_sequence: Arc<AtomicU64>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path.
    ///
    /// Ensures that the required column families exist.
    ///
    /// # Arguments
    ///
    /// * `path` - The filesystem path where the database will be stored.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = [CF_PAYMENTS, CF_REFERENCES, CF_AUDIT, CF_VERIFICATIONS]
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect::<Vec<_>>();

        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        // Seeded from the wall clock so entries appended after a reopen sort last.
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();

        Ok(Self {
            db: Arc::new(db),
            writer: Arc::new(Mutex::new(())),
            audit_sequence: Arc::new(AtomicU64::new(seed)),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db.cf_handle(name).ok_or_else(|| {
            PaymentError::StorageError(format!("{} column family not found", name))
        })
    }

    fn read<T: DeserializeOwned>(&self, cf_name: &str, key: &[u8]) -> Result<Option<T>> {
        let cf = self.cf(cf_name)?;
        match self.db.get_pinned_cf(cf, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, cf_name: &str, mode: IteratorMode) -> Result<Vec<T>> {
        let cf = self.cf(cf_name)?;
        let mut values = Vec::new();
        for item in self.db.iterator_cf(cf, mode) {
            let (_key, value) = item?;
            values.push(serde_json::from_slice(&value)?);
        }
        Ok(values)
    }

    fn reference_owner(&self, reference: &str) -> Result<Option<Uuid>> {
        let cf = self.cf(CF_REFERENCES)?;
        match self.db.get_pinned_cf(cf, reference.as_bytes())? {
            Some(bytes) => Uuid::from_slice(&bytes)
                .map(Some)
                .map_err(|e| PaymentError::StorageError(format!("Corrupt reference index: {}", e))),
            None => Ok(None),
        }
    }

    /// Writes the record and its reference index entry together.
    fn write_payment(&self, payment: &PaymentRecord) -> Result<()> {
        if let Some(reference) = payment.reference_number.as_deref()
            && let Some(owner) = self.reference_owner(reference)?
            && owner != payment.id
        {
            return Err(PaymentError::Conflict(format!(
                "Reference number {} already in use",
                reference
            )));
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(CF_PAYMENTS)?, payment.id.as_bytes(), to_json(payment)?);
        if let Some(reference) = payment.reference_number.as_deref() {
            batch.put_cf(self.cf(CF_REFERENCES)?, reference.as_bytes(), payment.id.as_bytes());
        }
        self.db.write(batch)?;
        Ok(())
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

#[async_trait]
impl PaymentStore for RocksDBStore {
    async fn insert(&self, payment: PaymentRecord) -> Result<()> {
        let _guard = self.writer.lock().await;
        if self
            .read::<PaymentRecord>(CF_PAYMENTS, payment.id.as_bytes())?
            .is_some()
        {
            return Err(PaymentError::Conflict(format!(
                "Payment {} already exists",
                payment.id
            )));
        }
        self.write_payment(&payment)
    }

    async fn get(&self, id: Uuid) -> Result<Option<PaymentRecord>> {
        self.read(CF_PAYMENTS, id.as_bytes())
    }

    async fn find_by_reference(&self, reference_number: &str) -> Result<Option<PaymentRecord>> {
        match self.reference_owner(reference_number)? {
            Some(id) => self.read(CF_PAYMENTS, id.as_bytes()),
            None => Ok(None),
        }
    }

    async fn compare_and_swap(
        &self,
        mut payment: PaymentRecord,
        expected_version: u64,
    ) -> Result<Option<PaymentRecord>> {
        let _guard = self.writer.lock().await;
        let current: PaymentRecord = self
            .read(CF_PAYMENTS, payment.id.as_bytes())?
            .ok_or_else(|| PaymentError::NotFound(format!("Payment {}", payment.id)))?;
        if current.version != expected_version {
            return Ok(None);
        }
        payment.version = expected_version + 1;
        self.write_payment(&payment)?;
        Ok(Some(payment))
    }

    async fn get_all(&self) -> Result<Vec<PaymentRecord>> {
        let mut payments: Vec<PaymentRecord> = self.scan(CF_PAYMENTS, IteratorMode::Start)?;
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }
}

#[async_trait]
impl AuditLog for RocksDBStore {
    async fn append(&self, entry: AuditEntry) -> Result<()> {
        let sequence = self.audit_sequence.fetch_add(1, Ordering::SeqCst);
        let mut key = entry.payment_id.as_bytes().to_vec();
        key.extend_from_slice(&sequence.to_be_bytes());
        self.db.put_cf(self.cf(CF_AUDIT)?, key, to_json(&entry)?)?;
        Ok(())
    }

    async fn entries_for(&self, payment_id: Uuid) -> Result<Vec<AuditEntry>> {
        let cf = self.cf(CF_AUDIT)?;
        let prefix: &[u8] = payment_id.as_bytes();
        let mut trail = Vec::new();
        let mode = IteratorMode::From(prefix, rocksdb::Direction::Forward);
        for item in self.db.iterator_cf(cf, mode) {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            trail.push(serde_json::from_slice::<AuditEntry>(&value)?);
        }
        trail.sort_by_key(|e| e.timestamp);
        Ok(trail)
    }
}

#[async_trait]
impl VerificationStore for RocksDBStore {
    async fn get_or_create(&self, flag: VerificationFlag) -> Result<(VerificationFlag, bool)> {
        let _guard = self.writer.lock().await;
        if let Some(existing) = self.read(CF_VERIFICATIONS, flag.payment_id.as_bytes())? {
            return Ok((existing, false));
        }
        self.db.put_cf(
            self.cf(CF_VERIFICATIONS)?,
            flag.payment_id.as_bytes(),
            to_json(&flag)?,
        )?;
        Ok((flag, true))
    }

    async fn get(&self, payment_id: Uuid) -> Result<Option<VerificationFlag>> {
        self.read(CF_VERIFICATIONS, payment_id.as_bytes())
    }

    async fn get_all(&self) -> Result<Vec<VerificationFlag>> {
        self.scan(CF_VERIFICATIONS, IteratorMode::Start)
    }
}
