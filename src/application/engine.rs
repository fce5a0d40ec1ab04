use crate::application::watchdog::EscalationWatchdog;
use crate::config::GatewayConfig;
use crate::domain::audit::{AuditEntry, AuditEvent};
use crate::domain::payment::{NewPayment, PaymentChannel, PaymentRecord, PaymentStatus, SignalOutcome, ValidPayment};
use crate::domain::ports::{AuditLogRef, NotifierRef, PaymentGatewayRef, PaymentStoreRef, VerificationStoreRef};
use crate::domain::signal::{GatewayResponse, RedirectReturn, SignalSource};
use crate::domain::verification::VerificationFlag;
use crate::error::{PaymentError, Result};
use chrono::Utc;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Optimistic writes give up after this many lost races.
const MAX_WRITE_ATTEMPTS: usize = 8;

/// Statuses an operator may set on a cash payment.
const CASH_OPERATOR_STATUSES: [&str; 7] = [
    "PENDING",
    "COLLECTED",
    "DELIVERED",
    "COMPLETED",
    "SUCCESS",
    "FAILED",
    "CANCELLED",
];

/// What the caller gets back from a creation flow.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentReceipt {
    pub payment: PaymentRecord,
    pub message: String,
}

/// Result of a manual verification request.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationReceipt {
    pub flag: VerificationFlag,
    pub created: bool,
    pub message: String,
}

/// Counters from a pending-payment poll sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PendingPollReport {
    pub checked: usize,
    pub updated: usize,
    pub failed: usize,
}

/// Folds status signals from every entry path into payment records.
///
/// Each mutation is computed on a snapshot and written with compare-and-swap on the
/// record version, so a poll and a webhook racing for the same payment cannot
/// interleave the terminal check with the write. Audit entries are appended after
/// the write.
pub struct ReconciliationEngine {
    payments: PaymentStoreRef,
    audit: AuditLogRef,
    gateway: PaymentGatewayRef,
    watchdog: EscalationWatchdog,
    gateway_timeout: Duration,
}

impl ReconciliationEngine {
    /// Creates a new `ReconciliationEngine`.
    ///
    /// # Arguments
    ///
    /// * `payments` - Durable payment records.
    /// * `audit` - Append-only audit trail.
    /// * `verifications` - Verification flags, shared with the watchdog.
    /// * `gateway` - Adapter for the external payment processor.
    /// * `notifier` - Operator alerts for flagged payments.
    /// * `gateway_config` - Bounds every gateway call.
    pub fn new(
        payments: PaymentStoreRef,
        audit: AuditLogRef,
        verifications: VerificationStoreRef,
        gateway: PaymentGatewayRef,
        notifier: NotifierRef,
        gateway_config: &GatewayConfig,
    ) -> Self {
        let watchdog =
            EscalationWatchdog::new(payments.clone(), audit.clone(), verifications, notifier);
        Self {
            payments,
            audit,
            gateway,
            watchdog,
            gateway_timeout: gateway_config.timeout(),
        }
    }

    /// The watchdog sharing this engine's stores.
    pub fn watchdog(&self) -> &EscalationWatchdog {
        &self.watchdog
    }

    pub async fn get(&self, payment_id: Uuid) -> Result<PaymentRecord> {
        self.payments
            .get(payment_id)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("Payment {}", payment_id)))
    }

    pub async fn find_by_reference(&self, reference_number: &str) -> Result<PaymentRecord> {
        self.payments
            .find_by_reference(reference_number)
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("Payment {}", reference_number)))
    }

    pub async fn payments(&self) -> Result<Vec<PaymentRecord>> {
        self.payments.get_all().await
    }

    pub async fn audit_trail(&self, payment_id: Uuid) -> Result<Vec<AuditEntry>> {
        self.audit.entries_for(payment_id).await
    }

    /// Creates a server-to-server payment and submits it to the gateway.
    pub async fn create_seamless_payment(&self, request: NewPayment) -> Result<PaymentReceipt> {
        let payment = request.validate(PaymentChannel::Seamless)?;
        let mut required_fields = payment.required_fields.clone();
        if required_fields.is_empty() {
            required_fields = BTreeMap::from([("default".to_string(), "value".to_string())]);
        }
        let record = self.open(PaymentChannel::Seamless, payment).await?;

        let handle = match self
            .bounded(
                "create_transaction",
                self.gateway.create_transaction(
                    record.amount.value(),
                    record.currency.as_str(),
                    &record.reason,
                ),
            )
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                return Err(self
                    .fail_creation(&record, AuditEvent::GatewayCreateFailed, e)
                    .await);
            }
        };

        let response = match self
            .bounded(
                "make_seamless_payment",
                self.gateway.make_seamless_payment(
                    &handle,
                    &record.reason,
                    record.amount.value(),
                    &required_fields,
                ),
            )
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return Err(self
                    .fail_creation(&record, AuditEvent::GatewayInitiateFailed, e)
                    .await);
            }
        };

        self.accept_gateway_response(record, response).await
    }

    /// Creates a payment completed on the gateway's hosted page.
    pub async fn initiate_redirect_payment(&self, request: NewPayment) -> Result<PaymentReceipt> {
        let payment = request.validate(PaymentChannel::Redirect)?;
        let record = self.open(PaymentChannel::Redirect, payment).await?;

        let handle = match self
            .bounded(
                "create_transaction",
                self.gateway.create_transaction(
                    record.amount.value(),
                    record.currency.as_str(),
                    &record.reason,
                ),
            )
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                return Err(self
                    .fail_creation(&record, AuditEvent::GatewayCreateFailed, e)
                    .await);
            }
        };

        let response = match self
            .bounded("initiate", self.gateway.initiate(&handle))
            .await
        {
            Ok(response) => response,
            Err(e) => {
                return Err(self
                    .fail_creation(&record, AuditEvent::GatewayInitiateFailed, e)
                    .await);
            }
        };

        self.accept_gateway_response(record, response).await
    }

    /// Records an offline payment. It starts `PENDING` until an operator collects it.
    pub async fn create_cash_payment(&self, request: NewPayment) -> Result<PaymentReceipt> {
        let payment = request.validate(PaymentChannel::Cash)?;
        let record = PaymentRecord::new(Uuid::new_v4(), PaymentChannel::Cash, payment, Utc::now());
        self.payments.insert(record.clone()).await?;
        self.log(
            record.id,
            AuditEvent::CashPaymentCreated,
            "Cash payment record created",
            json!({
                "customer_name": record.customer.name,
                "customer_address": record.customer.address,
                "customer_phone": record.customer.phone,
                "amount": record.amount,
                "currency": record.currency,
            }),
        )
        .await?;
        info!(
            payment_id = %record.id,
            amount = %record.amount,
            currency = %record.currency,
            "Cash payment created"
        );
        Ok(PaymentReceipt {
            payment: record,
            message: "Cash payment recorded successfully. We will contact you to arrange delivery and payment collection.".to_string(),
        })
    }

    /// Folds a raw status into a payment. Every entry path ends here.
    ///
    /// A terminal payment is never changed; the signal is only recorded. Replaying
    /// the same signal is therefore harmless.
    pub async fn apply_signal(
        &self,
        payment_id: Uuid,
        raw_status: &str,
        source: SignalSource,
        payload: Value,
    ) -> Result<(PaymentRecord, SignalOutcome)> {
        let (record, outcome) = self
            .modify(payment_id, |record| {
                let outcome = record.reconcile(raw_status, Utc::now());
                let write = !matches!(outcome, SignalOutcome::Stale { .. });
                (outcome, write)
            })
            .await?;
        self.record_signal(&record, raw_status, source, payload, &outcome)
            .await?;
        Ok((record, outcome))
    }

    /// Pull-based status check by reference number.
    ///
    /// Terminal payments are answered from the store without calling the gateway.
    pub async fn poll_status(&self, reference_number: &str) -> Result<PaymentRecord> {
        let record = self.find_by_reference(reference_number).await?;
        if record.status.is_terminal() {
            return Ok(record);
        }

        let check = match self
            .bounded("check_status", self.gateway.check_status(reference_number))
            .await
        {
            Ok(check) => check,
            Err(e) => {
                error!(reference = reference_number, "Status check failed: {}", e);
                self.log(
                    record.id,
                    AuditEvent::PollFailed,
                    format!("Status check failed: {}", e),
                    json!({ "error": e.to_string() }),
                )
                .await?;
                return Err(e);
            }
        };

        if !check.success {
            warn!(reference = reference_number, "Gateway refused status check: {}", check.message);
            self.log(
                record.id,
                AuditEvent::PollRejected,
                format!("Gateway refused status check: {}", check.message),
                json!({ "message": check.message }),
            )
            .await?;
            return Err(PaymentError::GatewayRejected(check.message));
        }

        let raw_status = match check.status.trim() {
            "" if check.paid => "SUCCESS",
            "" => {
                warn!(reference = reference_number, "Status check returned no transaction status");
                self.log(
                    record.id,
                    AuditEvent::CallbackWithoutStatus,
                    "Status check returned no transaction status",
                    json!(check),
                )
                .await?;
                return Ok(record);
            }
            _ => check.status.as_str(),
        };
        let (record, _) = self
            .apply_signal(record.id, raw_status, SignalSource::Poll, json!(check))
            .await?;
        Ok(record)
    }

    /// Browser return from the gateway's hosted page.
    pub async fn handle_return(&self, params: RedirectReturn) -> Result<PaymentRecord> {
        let reference_number = params
            .reference_number
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| PaymentError::ValidationError("Missing reference number".to_string()))?;
        let record = self.find_by_reference(reference_number).await?;
        let payload = json!(params);

        match params.transaction_status.as_deref() {
            Some(status) if !status.trim().is_empty() => {
                let (record, _) = self
                    .apply_signal(record.id, status, SignalSource::RedirectReturn, payload)
                    .await?;
                Ok(record)
            }
            _ => {
                self.log(
                    record.id,
                    AuditEvent::CallbackWithoutStatus,
                    "Payment return received without a transaction status",
                    payload,
                )
                .await?;
                Ok(record)
            }
        }
    }

    /// Asynchronous result callback posted by the gateway.
    pub async fn handle_result(&self, raw_body: &str) -> Result<PaymentRecord> {
        let envelope = self
            .bounded("decrypt_callback", self.gateway.decrypt_callback(raw_body))
            .await?;
        let reference_number = envelope
            .reference_number
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .ok_or_else(|| PaymentError::ValidationError("Missing reference number".to_string()))?;
        let record = self.find_by_reference(reference_number).await?;

        match envelope.transaction_status.as_deref() {
            Some(status) if !status.trim().is_empty() => {
                let (record, _) = self
                    .apply_signal(record.id, status, SignalSource::Webhook, envelope.payload.clone())
                    .await?;
                Ok(record)
            }
            _ => {
                self.log(
                    record.id,
                    AuditEvent::CallbackWithoutStatus,
                    "Payment result received without a transaction status",
                    envelope.payload.clone(),
                )
                .await?;
                Ok(record)
            }
        }
    }

    /// Operator update of a cash payment (collected, delivered, failed...).
    pub async fn update_cash_status(
        &self,
        payment_id: Uuid,
        status: &str,
        actor: &str,
        notes: &str,
    ) -> Result<PaymentRecord> {
        let record = self.get(payment_id).await?;
        if record.channel != PaymentChannel::Cash {
            return Err(PaymentError::ValidationError(format!(
                "Payment {} is not a cash payment",
                payment_id
            )));
        }
        let normalized = status.trim().to_ascii_uppercase();
        if !CASH_OPERATOR_STATUSES.contains(&normalized.as_str()) {
            return Err(PaymentError::ValidationError(format!(
                "Invalid status: {}",
                status
            )));
        }

        let (record, _) = self
            .apply_signal(
                payment_id,
                &normalized,
                SignalSource::Operator,
                json!({ "changed_by": actor, "notes": notes }),
            )
            .await?;
        Ok(record)
    }

    /// Operator request to mark a payment as needing verification.
    /// Succeeds whether or not the flag already existed.
    pub async fn flag_for_verification(
        &self,
        reference_number: &str,
        reason: Option<&str>,
    ) -> Result<VerificationReceipt> {
        if reference_number.trim().is_empty() {
            return Err(PaymentError::ValidationError(
                "Missing reference number".to_string(),
            ));
        }
        let record = self.find_by_reference(reference_number).await?;
        let reason = reason.map(str::to_string).unwrap_or_else(|| {
            format!(
                "The payment {} for {} has not been confirmed and needs verification",
                reference_number, record.reason
            )
        });
        let (flag, created) = self.watchdog.escalate(&record, &reason).await?;
        let message = if created {
            "Payment marked as to-be-verified."
        } else {
            "Payment was already marked as to-be-verified."
        };
        Ok(VerificationReceipt {
            flag,
            created,
            message: message.to_string(),
        })
    }

    /// Polls the gateway for every open, referenced, non-cash payment created within `window`.
    ///
    /// Failures are counted and logged; they never stop the sweep.
    pub async fn poll_pending(&self, window: Duration) -> Result<PendingPollReport> {
        let window = chrono::Duration::from_std(window)
            .map_err(|e| PaymentError::ConfigError(format!("Invalid poll window: {}", e)))?;
        let cutoff = Utc::now().checked_sub_signed(window).ok_or_else(|| {
            PaymentError::ConfigError(format!(
                "Poll window of {}s reaches before the earliest representable time",
                window.num_seconds()
            ))
        })?;
        let mut report = PendingPollReport::default();

        for payment in self.payments.non_terminal().await? {
            if payment.channel == PaymentChannel::Cash || payment.created_at < cutoff {
                continue;
            }
            let Some(reference_number) = payment.reference_number.as_deref() else {
                continue;
            };
            report.checked += 1;
            match self.poll_status(reference_number).await {
                Ok(updated) if updated.status != payment.status => {
                    info!(
                        reference = reference_number,
                        from = %payment.status,
                        to = %updated.status,
                        "Pending payment updated by poll"
                    );
                    report.updated += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(reference = reference_number, "Error checking payment: {}", e);
                    report.failed += 1;
                }
            }
        }

        info!(
            checked = report.checked,
            updated = report.updated,
            failed = report.failed,
            "Pending payment poll finished"
        );
        Ok(report)
    }

    async fn open(&self, channel: PaymentChannel, payment: ValidPayment) -> Result<PaymentRecord> {
        let record = PaymentRecord::new(Uuid::new_v4(), channel, payment, Utc::now());
        self.payments.insert(record.clone()).await?;
        self.log(
            record.id,
            AuditEvent::Created,
            format!("{} payment record created", channel),
            json!({
                "amount": record.amount,
                "currency": record.currency,
                "payment_method": record.payment_method,
                "reason": record.reason,
            }),
        )
        .await?;
        info!(
            payment_id = %record.id,
            channel = %channel,
            amount = %record.amount,
            currency = %record.currency,
            "Payment record created"
        );
        Ok(record)
    }

    async fn accept_gateway_response(
        &self,
        record: PaymentRecord,
        response: GatewayResponse,
    ) -> Result<PaymentReceipt> {
        let reference_number = match response.reference_number.clone() {
            Some(reference) if response.success && !reference.trim().is_empty() => reference,
            _ => return self.reject(record, response).await,
        };

        let poll_url = response.poll_url.clone();
        let redirect_url = response.redirect_url.clone();
        let attached = self
            .modify(record.id, |record| {
                record.attach_gateway_reference(
                    reference_number.clone(),
                    poll_url.clone(),
                    redirect_url.clone(),
                    Utc::now(),
                );
                ((), true)
            })
            .await;
        let record = match attached {
            Ok((record, _)) => record,
            Err(e) => {
                return Err(self
                    .fail_creation(&record, AuditEvent::GatewayRejected, e)
                    .await);
            }
        };
        self.log(
            record.id,
            AuditEvent::GatewayAccepted,
            format!("{} payment initiated successfully", record.channel),
            json!({
                "reference_number": reference_number,
                "poll_url": response.poll_url,
                "redirect_url": response.redirect_url,
            }),
        )
        .await?;
        info!(payment_id = %record.id, reference = %reference_number, "Gateway accepted payment");

        let record = match response.status.as_deref() {
            Some(status) if !status.trim().is_empty() => {
                self.apply_signal(
                    record.id,
                    status,
                    SignalSource::SynchronousResponse,
                    json!(response),
                )
                .await?
                .0
            }
            _ => record,
        };

        Ok(PaymentReceipt {
            payment: record,
            message: "Payment initiated successfully".to_string(),
        })
    }

    /// The gateway answered but explicitly refused the payment.
    async fn reject(&self, record: PaymentRecord, response: GatewayResponse) -> Result<PaymentReceipt> {
        let message = if response.success || response.message.trim().is_empty() {
            "Gateway did not return a reference number".to_string()
        } else {
            response.message.clone()
        };
        warn!(payment_id = %record.id, "Gateway rejected payment: {}", message);
        self.log(
            record.id,
            AuditEvent::GatewayRejected,
            format!("{} payment failed: {}", record.channel, message),
            json!({ "error_message": message }),
        )
        .await?;

        let raw_status = response
            .status
            .as_deref()
            .filter(|s| {
                PaymentStatus::normalize(s, record.channel).is_some_and(|s| s.is_failure())
            })
            .unwrap_or("ERROR");
        let (record, _) = self
            .apply_signal(
                record.id,
                raw_status,
                SignalSource::SynchronousResponse,
                json!(response),
            )
            .await?;
        Ok(PaymentReceipt {
            payment: record,
            message,
        })
    }

    /// Marks a payment `ERROR` after the gateway could not be reached, or its answer
    /// could not be stored, and hands the cause back to the caller. Never retries.
    async fn fail_creation(
        &self,
        record: &PaymentRecord,
        event: AuditEvent,
        cause: PaymentError,
    ) -> PaymentError {
        error!(payment_id = %record.id, "{}: {}", event, cause);
        let logged = self
            .log(
                record.id,
                event,
                format!("{} payment failed: {}", record.channel, cause),
                json!({ "error": cause.to_string() }),
            )
            .await;
        if let Err(e) = logged {
            error!(payment_id = %record.id, "Failed to record gateway failure: {}", e);
        }
        let marked = self
            .apply_signal(
                record.id,
                PaymentStatus::Error.as_str(),
                SignalSource::Creation,
                json!({ "error": cause.to_string() }),
            )
            .await;
        if let Err(e) = marked {
            error!(payment_id = %record.id, "Failed to mark payment as failed: {}", e);
        }
        cause
    }

    async fn record_signal(
        &self,
        record: &PaymentRecord,
        raw_status: &str,
        source: SignalSource,
        payload: Value,
        outcome: &SignalOutcome,
    ) -> Result<()> {
        self.log(
            record.id,
            AuditEvent::SignalReceived,
            format!("{} signal received with status: {}", source, raw_status),
            json!({ "raw_status": raw_status, "source": source, "payload": payload }),
        )
        .await?;

        match outcome {
            SignalOutcome::Stale { current } => {
                warn!(
                    payment_id = %record.id,
                    %source,
                    current = %current,
                    raw_status,
                    "Ignoring signal for finalized payment"
                );
                self.log(
                    record.id,
                    AuditEvent::StaleSignalIgnored,
                    format!(
                        "Ignored {} from {} for payment already in {}",
                        raw_status, source, current
                    ),
                    json!({ "raw_status": raw_status, "source": source, "current_status": current }),
                )
                .await?;
            }
            SignalOutcome::Applied {
                from,
                to,
                unknown_raw,
                tier_assigned,
            } => {
                if let Some(raw) = unknown_raw {
                    warn!(payment_id = %record.id, %source, raw_status = %raw, "Unknown payment status");
                    self.log(
                        record.id,
                        AuditEvent::UnknownStatus,
                        format!("Unrecognized status {} mapped to {}", raw, PaymentStatus::Error),
                        json!({ "raw_status": raw, "source": source }),
                    )
                    .await?;
                }
                if from != to {
                    info!(payment_id = %record.id, %source, from = %from, to = %to, "Payment status changed");
                    self.log(
                        record.id,
                        AuditEvent::StatusUpdate,
                        format!("Status changed from {} → {}", from, to),
                        json!({ "old_status": from, "new_status": to, "source": source }),
                    )
                    .await?;
                } else {
                    debug!(payment_id = %record.id, %source, status = %to, "Status unchanged");
                }
                if let Some(tier) = tier_assigned {
                    info!(payment_id = %record.id, tier = %tier, "Reward tier assigned");
                    self.log(
                        record.id,
                        AuditEvent::TierAssigned,
                        format!("Reward tier {} assigned for {} {}", tier, record.amount, record.currency),
                        json!({ "tier": tier, "amount": record.amount }),
                    )
                    .await?;
                }
            }
        }
        Ok(())
    }

    /// Read-modify-write with compare-and-swap, retried on lost races.
    ///
    /// `change` returns its result and whether the record must be written.
    async fn modify<R, F>(&self, payment_id: Uuid, mut change: F) -> Result<(PaymentRecord, R)>
    where
        F: FnMut(&mut PaymentRecord) -> (R, bool),
    {
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let current = self.get(payment_id).await?;
            let expected = current.version;
            let mut next = current.clone();
            let (result, write) = change(&mut next);
            if !write {
                return Ok((current, result));
            }
            match self.payments.compare_and_swap(next, expected).await? {
                Some(stored) => return Ok((stored, result)),
                None => debug!(%payment_id, attempt, "Concurrent update detected, retrying"),
            }
        }
        Err(PaymentError::Conflict(format!(
            "Payment {} changed concurrently {} times",
            payment_id, MAX_WRITE_ATTEMPTS
        )))
    }

    async fn bounded<T>(&self, operation: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.gateway_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(PaymentError::GatewayTransport(format!(
                "{} timed out after {}s",
                operation,
                self.gateway_timeout.as_secs_f64()
            ))),
        }
    }

    async fn log(
        &self,
        payment_id: Uuid,
        event: AuditEvent,
        message: impl Into<String>,
        data: Value,
    ) -> Result<()> {
        self.audit
            .append(AuditEntry::new(payment_id, event, message, data))
            .await
    }
}
