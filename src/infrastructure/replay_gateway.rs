use crate::config::GatewayConfig;
use crate::domain::ports::PaymentGateway;
use crate::domain::signal::{CallbackEnvelope, GatewayResponse, StatusCheck, TransactionHandle};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

/// Gateway calls that can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOperation {
    CreateTransaction,
    Initiate,
    SeamlessPayment,
    CheckStatus,
}

#[derive(Default)]
struct ReplayState {
    references: VecDeque<String>,
    statuses: HashMap<String, String>,
    failures: HashSet<GatewayOperation>,
    rejection: Option<(String, Option<String>)>,
    withhold_reference: bool,
    initial_status: Option<String>,
    latency: Option<Duration>,
}

/// Offline gateway adapter driven by recorded outcomes.
///
/// Reference numbers, reported statuses, failures and rejections are scripted
/// ahead of each call. Result callbacks are plain JSON bodies. Used by the CLI
/// to replay gateway logs and by tests.
pub struct ReplayGateway {
    config: GatewayConfig,
    state: Mutex<ReplayState>,
}

impl ReplayGateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ReplayState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, ReplayState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The next accepted transaction is assigned `reference`.
    pub fn expect_reference(&self, reference: &str) {
        self.state().references.push_back(reference.to_string());
    }

    /// What `check_status` reports for `reference` from now on.
    pub fn set_status(&self, reference: &str, status: &str) {
        self.state()
            .statuses
            .insert(reference.to_string(), status.to_string());
    }

    /// The next call of `operation` fails with a transport error.
    pub fn fail_next(&self, operation: GatewayOperation) {
        self.state().failures.insert(operation);
    }

    /// The next initiate or seamless payment answers `success=false`, optionally
    /// reporting `status`.
    pub fn reject_next(&self, message: &str, status: Option<&str>) {
        self.state().rejection = Some((message.to_string(), status.map(str::to_string)));
    }

    /// The next initiate or seamless payment succeeds without a reference number.
    pub fn withhold_reference_next(&self) {
        self.state().withhold_reference = true;
    }

    /// Drops every scripted outcome not yet consumed.
    pub fn clear_script(&self) {
        let mut state = self.state();
        state.references.clear();
        state.failures.clear();
        state.rejection = None;
        state.withhold_reference = false;
        state.initial_status = None;
    }

    /// The next initiate or seamless payment already carries `status`.
    pub fn respond_with_status(&self, status: &str) {
        self.state().initial_status = Some(status.to_string());
    }

    /// Every call sleeps this long before answering.
    pub fn set_latency(&self, latency: Duration) {
        self.state().latency = Some(latency);
    }

    async fn begin(&self, operation: GatewayOperation) -> Result<()> {
        let (latency, failed) = {
            let mut state = self.state();
            (state.latency, state.failures.remove(&operation))
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if failed {
            return Err(PaymentError::GatewayTransport(format!(
                "{:?} failed: connection refused",
                operation
            )));
        }
        Ok(())
    }

    fn accept(&self, redirect: bool) -> GatewayResponse {
        let mut state = self.state();
        if let Some((message, status)) = state.rejection.take() {
            return GatewayResponse {
                success: false,
                message,
                status,
                ..Default::default()
            };
        }
        if std::mem::take(&mut state.withhold_reference) {
            return GatewayResponse {
                success: true,
                message: "Transaction initiated".to_string(),
                ..Default::default()
            };
        }
        let reference = state
            .references
            .pop_front()
            .unwrap_or_else(|| format!("RP-{}", Uuid::new_v4().simple()));
        let status = state.initial_status.take();
        state.statuses.insert(
            reference.clone(),
            status.clone().unwrap_or_else(|| "PENDING".to_string()),
        );
        let redirect_url = redirect.then(|| {
            format!(
                "https://pay.replay.local/redirect/{}?returnUrl={}&resultUrl={}",
                reference, self.config.return_url, self.config.result_url
            )
        });
        GatewayResponse {
            success: true,
            poll_url: Some(format!(
                "https://pay.replay.local/check?referenceNumber={}",
                reference
            )),
            reference_number: Some(reference),
            redirect_url,
            message: "Transaction initiated".to_string(),
            status,
        }
    }
}

#[async_trait]
impl PaymentGateway for ReplayGateway {
    async fn create_transaction(
        &self,
        amount: Decimal,
        currency: &str,
        reason: &str,
    ) -> Result<TransactionHandle> {
        self.begin(GatewayOperation::CreateTransaction).await?;
        Ok(TransactionHandle {
            amount,
            currency: currency.to_string(),
            reason: reason.to_string(),
            token: Uuid::new_v4().to_string(),
        })
    }

    async fn initiate(&self, _handle: &TransactionHandle) -> Result<GatewayResponse> {
        self.begin(GatewayOperation::Initiate).await?;
        Ok(self.accept(true))
    }

    async fn make_seamless_payment(
        &self,
        _handle: &TransactionHandle,
        _reason: &str,
        _amount: Decimal,
        required_fields: &BTreeMap<String, String>,
    ) -> Result<GatewayResponse> {
        self.begin(GatewayOperation::SeamlessPayment).await?;
        if required_fields.is_empty() {
            return Ok(GatewayResponse {
                success: false,
                message: "Required fields are missing".to_string(),
                ..Default::default()
            });
        }
        Ok(self.accept(false))
    }

    async fn check_status(&self, reference_number: &str) -> Result<StatusCheck> {
        self.begin(GatewayOperation::CheckStatus).await?;
        let status = self.state().statuses.get(reference_number).cloned();
        Ok(match status {
            Some(status) => StatusCheck {
                paid: matches!(
                    status.trim().to_ascii_uppercase().as_str(),
                    "SUCCESS" | "COMPLETED" | "PAID"
                ),
                success: true,
                message: format!("Transaction is {}", status),
                status,
            },
            None => StatusCheck {
                success: false,
                message: format!("Transaction {} not found", reference_number),
                ..Default::default()
            },
        })
    }

    async fn decrypt_callback(&self, raw_payload: &str) -> Result<CallbackEnvelope> {
        let payload: Value = serde_json::from_str(raw_payload).map_err(|e| {
            PaymentError::GatewayTransport(format!("Undecodable callback payload: {}", e))
        })?;
        let mut envelope: CallbackEnvelope = serde_json::from_value(payload.clone())
            .map_err(|e| PaymentError::GatewayTransport(format!("Malformed callback: {}", e)))?;
        envelope.payload = payload;
        Ok(envelope)
    }
}
