use super::audit::AuditEntry;
use super::payment::PaymentRecord;
use super::signal::{CallbackEnvelope, GatewayResponse, StatusCheck, TransactionHandle};
use super::verification::VerificationFlag;
use crate::error::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Inserts a new record. Fails with `Conflict` if the id or reference number exists.
    async fn insert(&self, payment: PaymentRecord) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<PaymentRecord>>;
    async fn find_by_reference(&self, reference_number: &str) -> Result<Option<PaymentRecord>>;
    /// Writes `payment` only if the stored version still equals `expected_version`.
    ///
    /// On success the stored record (returned) carries `expected_version + 1`.
    /// Returns `Ok(None)` when another writer got there first.
    async fn compare_and_swap(
        &self,
        payment: PaymentRecord,
        expected_version: u64,
    ) -> Result<Option<PaymentRecord>>;
    async fn get_all(&self) -> Result<Vec<PaymentRecord>>;
    async fn non_terminal(&self) -> Result<Vec<PaymentRecord>> {
        let all = self.get_all().await?;
        Ok(all.into_iter().filter(|p| !p.status.is_terminal()).collect())
    }
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> Result<()>;
    /// Entries for one payment, oldest first.
    async fn entries_for(&self, payment_id: Uuid) -> Result<Vec<AuditEntry>>;
}

#[async_trait]
pub trait VerificationStore: Send + Sync {
    /// Returns the existing flag for the payment, or stores `flag`.
    /// The boolean is true only when `flag` was newly stored.
    async fn get_or_create(&self, flag: VerificationFlag) -> Result<(VerificationFlag, bool)>;
    async fn get(&self, payment_id: Uuid) -> Result<Option<VerificationFlag>>;
    async fn get_all(&self) -> Result<Vec<VerificationFlag>>;
}

/// Narrow view of the external payment processor.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_transaction(
        &self,
        amount: Decimal,
        currency: &str,
        reason: &str,
    ) -> Result<TransactionHandle>;
    async fn initiate(&self, handle: &TransactionHandle) -> Result<GatewayResponse>;
    async fn make_seamless_payment(
        &self,
        handle: &TransactionHandle,
        reason: &str,
        amount: Decimal,
        required_fields: &BTreeMap<String, String>,
    ) -> Result<GatewayResponse>;
    async fn check_status(&self, reference_number: &str) -> Result<StatusCheck>;
    async fn decrypt_callback(&self, raw_payload: &str) -> Result<CallbackEnvelope>;
}

/// Alerts operators about payments that need manual verification.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, payment: &PaymentRecord, reason: &str) -> Result<()>;
}

pub type PaymentStoreRef = Arc<dyn PaymentStore>;
pub type AuditLogRef = Arc<dyn AuditLog>;
pub type VerificationStoreRef = Arc<dyn VerificationStore>;
pub type PaymentGatewayRef = Arc<dyn PaymentGateway>;
pub type NotifierRef = Arc<dyn Notifier>;
