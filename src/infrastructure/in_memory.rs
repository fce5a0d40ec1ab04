use crate::domain::audit::AuditEntry;
use crate::domain::payment::PaymentRecord;
use crate::domain::ports::{AuditLog, PaymentStore, VerificationStore};
use crate::domain::verification::VerificationFlag;
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct PaymentTable {
    payments: HashMap<Uuid, PaymentRecord>,
    references: HashMap<String, Uuid>,
}

impl PaymentTable {
    /// Fails if `reference` already belongs to a different payment.
    fn check_reference(&self, id: Uuid, reference: Option<&str>) -> Result<()> {
        if let Some(reference) = reference
            && let Some(owner) = self.references.get(reference)
            && *owner != id
        {
            return Err(PaymentError::Conflict(format!(
                "Reference number {} already in use",
                reference
            )));
        }
        Ok(())
    }
}

/// A thread-safe in-memory store for payment records.
///
/// Uses `Arc<RwLock<..>>` so clones share state. Compare-and-swap holds the write
/// lock across the version check and the write.
#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    table: Arc<RwLock<PaymentTable>>,
}

impl InMemoryPaymentStore {
    /// Creates a new, empty in-memory payment store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn insert(&self, payment: PaymentRecord) -> Result<()> {
        let mut table = self.table.write().await;
        if table.payments.contains_key(&payment.id) {
            return Err(PaymentError::Conflict(format!(
                "Payment {} already exists",
                payment.id
            )));
        }
        table.check_reference(payment.id, payment.reference_number.as_deref())?;
        if let Some(reference) = &payment.reference_number {
            table.references.insert(reference.clone(), payment.id);
        }
        table.payments.insert(payment.id, payment);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<PaymentRecord>> {
        let table = self.table.read().await;
        Ok(table.payments.get(&id).cloned())
    }

    async fn find_by_reference(&self, reference_number: &str) -> Result<Option<PaymentRecord>> {
        let table = self.table.read().await;
        Ok(table
            .references
            .get(reference_number)
            .and_then(|id| table.payments.get(id))
            .cloned())
    }

    async fn compare_and_swap(
        &self,
        mut payment: PaymentRecord,
        expected_version: u64,
    ) -> Result<Option<PaymentRecord>> {
        let mut table = self.table.write().await;
        let current_version = match table.payments.get(&payment.id) {
            Some(current) => current.version,
            None => {
                return Err(PaymentError::NotFound(format!("Payment {}", payment.id)));
            }
        };
        if current_version != expected_version {
            return Ok(None);
        }
        table.check_reference(payment.id, payment.reference_number.as_deref())?;
        if let Some(reference) = &payment.reference_number {
            table.references.insert(reference.clone(), payment.id);
        }
        payment.version = expected_version + 1;
        table.payments.insert(payment.id, payment.clone());
        Ok(Some(payment))
    }

    async fn get_all(&self) -> Result<Vec<PaymentRecord>> {
        let table = self.table.read().await;
        let mut payments: Vec<_> = table.payments.values().cloned().collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }
}

/// A thread-safe in-memory audit trail, grouped by payment.
#[derive(Default, Clone)]
pub struct InMemoryAuditLog {
    entries: Arc<RwLock<HashMap<Uuid, Vec<AuditEntry>>>>,
}

impl InMemoryAuditLog {
    /// Creates a new, empty in-memory audit log.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn append(&self, entry: AuditEntry) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.entry(entry.payment_id).or_default().push(entry);
        Ok(())
    }

    async fn entries_for(&self, payment_id: Uuid) -> Result<Vec<AuditEntry>> {
        let entries = self.entries.read().await;
        let mut trail = entries.get(&payment_id).cloned().unwrap_or_default();
        // Stable: entries sharing a timestamp keep append order.
        trail.sort_by_key(|e| e.timestamp);
        Ok(trail)
    }
}

/// A thread-safe in-memory store for verification flags.
#[derive(Default, Clone)]
pub struct InMemoryVerificationStore {
    flags: Arc<RwLock<HashMap<Uuid, VerificationFlag>>>,
}

impl InMemoryVerificationStore {
    /// Creates a new, empty in-memory verification store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VerificationStore for InMemoryVerificationStore {
    async fn get_or_create(&self, flag: VerificationFlag) -> Result<(VerificationFlag, bool)> {
        let mut flags = self.flags.write().await;
        match flags.entry(flag.payment_id) {
            Entry::Occupied(existing) => Ok((existing.get().clone(), false)),
            Entry::Vacant(slot) => Ok((slot.insert(flag).clone(), true)),
        }
    }

    async fn get(&self, payment_id: Uuid) -> Result<Option<VerificationFlag>> {
        let flags = self.flags.read().await;
        Ok(flags.get(&payment_id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<VerificationFlag>> {
        let flags = self.flags.read().await;
        Ok(flags.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::audit::AuditEvent;
    use crate::domain::payment::{CustomerInfo, NewPayment, PaymentChannel};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn record() -> PaymentRecord {
        let valid = NewPayment {
            amount: dec!(100.0),
            currency: "USD".to_string(),
            payment_method: "PZW211".to_string(),
            reason: "Album Support".to_string(),
            customer: CustomerInfo {
                email: "fan@example.com".to_string(),
                ..Default::default()
            },
            required_fields: BTreeMap::new(),
        }
        .validate(PaymentChannel::Seamless)
        .unwrap();
        PaymentRecord::new(Uuid::new_v4(), PaymentChannel::Seamless, valid, Utc::now())
    }

    #[tokio::test]
    async fn test_in_memory_payment_store() {
        let store = InMemoryPaymentStore::new();
        let payment = record();

        store.insert(payment.clone()).await.unwrap();
        let retrieved = store.get(payment.id).await.unwrap().unwrap();
        assert_eq!(retrieved, payment);

        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
        assert!(matches!(
            store.insert(payment).await,
            Err(PaymentError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_compare_and_swap_versions() {
        let store = InMemoryPaymentStore::new();
        let payment = record();
        store.insert(payment.clone()).await.unwrap();

        let mut next = payment.clone();
        next.reference_number = Some("REF-1".to_string());
        let stored = store.compare_and_swap(next.clone(), 0).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);

        // A writer still holding version 0 loses.
        assert!(store.compare_and_swap(next, 0).await.unwrap().is_none());

        let found = store.find_by_reference("REF-1").await.unwrap().unwrap();
        assert_eq!(found.id, payment.id);
    }

    #[tokio::test]
    async fn test_reference_numbers_are_unique() {
        let store = InMemoryPaymentStore::new();
        let first = record();
        let second = record();
        store.insert(first.clone()).await.unwrap();
        store.insert(second.clone()).await.unwrap();

        let mut next = first.clone();
        next.reference_number = Some("REF-1".to_string());
        store.compare_and_swap(next, 0).await.unwrap().unwrap();

        let mut clash = second.clone();
        clash.reference_number = Some("REF-1".to_string());
        assert!(matches!(
            store.compare_and_swap(clash, 0).await,
            Err(PaymentError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_audit_log_keeps_order_per_payment() {
        let log = InMemoryAuditLog::new();
        let id = Uuid::new_v4();
        log.append(AuditEntry::new(id, AuditEvent::Created, "created", json!({})))
            .await
            .unwrap();
        log.append(AuditEntry::new(id, AuditEvent::StatusUpdate, "updated", json!({})))
            .await
            .unwrap();
        log.append(AuditEntry::new(Uuid::new_v4(), AuditEvent::Created, "other", json!({})))
            .await
            .unwrap();

        let trail = log.entries_for(id).await.unwrap();
        assert_eq!(trail.len(), 2);
        assert_eq!(trail[0].event, AuditEvent::Created);
        assert_eq!(trail[1].event, AuditEvent::StatusUpdate);
    }

    #[tokio::test]
    async fn test_verification_get_or_create() {
        let store = InMemoryVerificationStore::new();
        let id = Uuid::new_v4();

        let (flag, created) = store
            .get_or_create(VerificationFlag::new(id, "first"))
            .await
            .unwrap();
        assert!(created);
        let (again, created) = store
            .get_or_create(VerificationFlag::new(id, "second"))
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(again, flag);
        assert_eq!(store.get_all().await.unwrap().len(), 1);
    }
}
