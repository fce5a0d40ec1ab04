use crate::domain::audit::{AuditEntry, AuditEvent};
use crate::domain::payment::PaymentRecord;
use crate::domain::ports::{AuditLogRef, NotifierRef, PaymentStoreRef, VerificationStoreRef};
use crate::domain::verification::VerificationFlag;
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Flags payments stuck in a non-terminal status and alerts operators.
///
/// Flag creation is get-or-create keyed by payment id, so sweeps may overlap with
/// each other, with manual flagging, and with reconciliation updates.
#[derive(Clone)]
pub struct EscalationWatchdog {
    payments: PaymentStoreRef,
    audit: AuditLogRef,
    verifications: VerificationStoreRef,
    notifier: NotifierRef,
}

impl EscalationWatchdog {
    pub fn new(
        payments: PaymentStoreRef,
        audit: AuditLogRef,
        verifications: VerificationStoreRef,
        notifier: NotifierRef,
    ) -> Self {
        Self {
            payments,
            audit,
            verifications,
            notifier,
        }
    }

    /// Ensures `payment` carries a verification flag.
    ///
    /// Operators are notified only when this call created the flag. A failed
    /// notification is recorded but the flag stays.
    pub async fn escalate(
        &self,
        payment: &PaymentRecord,
        reason: &str,
    ) -> Result<(VerificationFlag, bool)> {
        let (flag, created) = self
            .verifications
            .get_or_create(VerificationFlag::new(payment.id, reason))
            .await?;
        if !created {
            debug!(payment_id = %payment.id, "Payment already flagged for verification");
            return Ok((flag, false));
        }

        warn!(
            payment_id = %payment.id,
            reference = payment.reference_number.as_deref().unwrap_or("-"),
            status = %payment.status,
            "Payment flagged for verification: {}",
            reason
        );
        self.audit
            .append(AuditEntry::new(
                payment.id,
                AuditEvent::MarkedForVerification,
                "Payment marked as to-be-verified",
                json!({ "reason": reason, "status": payment.status }),
            ))
            .await?;

        if let Err(e) = self.notifier.notify(payment, reason).await {
            error!(payment_id = %payment.id, "Failed to notify operators: {}", e);
            self.audit
                .append(AuditEntry::new(
                    payment.id,
                    AuditEvent::NotificationFailed,
                    format!("Failed to send verification notice: {}", e),
                    json!({ "error": e.to_string() }),
                ))
                .await?;
        }
        Ok((flag, true))
    }

    /// Every verification flag raised so far.
    pub async fn flags(&self) -> Result<Vec<VerificationFlag>> {
        self.verifications.get_all().await
    }

    pub async fn check_overdue(&self, max_age: Duration) -> Result<Vec<PaymentRecord>> {
        self.check_overdue_as_of(Utc::now(), max_age).await
    }

    /// Escalates every non-terminal payment created more than `max_age` before `now`.
    /// Returns all overdue payments, whether their flag is new or not.
    pub async fn check_overdue_as_of(
        &self,
        now: DateTime<Utc>,
        max_age: Duration,
    ) -> Result<Vec<PaymentRecord>> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| PaymentError::ConfigError(format!("Invalid max age: {}", e)))?;
        let cutoff = now.checked_sub_signed(max_age).ok_or_else(|| {
            PaymentError::ConfigError(format!(
                "Max age of {}s reaches before the earliest representable time",
                max_age.num_seconds()
            ))
        })?;

        let mut overdue = Vec::new();
        let mut newly_flagged = 0usize;
        for payment in self.payments.non_terminal().await? {
            if payment.created_at >= cutoff {
                continue;
            }
            let reason = format!(
                "Payment {} for {} has been {} for more than {}s without confirmation and needs verification",
                payment.reference_number.as_deref().unwrap_or("(unassigned)"),
                payment.reason,
                payment.status,
                max_age.num_seconds()
            );
            let (_, created) = self.escalate(&payment, &reason).await?;
            if created {
                newly_flagged += 1;
            }
            overdue.push(payment);
        }

        if !overdue.is_empty() {
            info!(
                overdue = overdue.len(),
                newly_flagged, "Overdue payment sweep finished"
            );
        }
        Ok(overdue)
    }

    /// Sweeps every `every` until `shutdown` turns true or its sender is dropped.
    pub async fn run(&self, max_age: Duration, every: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.check_overdue(max_age).await {
                        error!("Overdue payment sweep failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Escalation watchdog stopped");
                        break;
                    }
                }
            }
        }
    }

    pub fn spawn(
        self,
        max_age: Duration,
        every: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(max_age, every, shutdown).await })
    }
}
