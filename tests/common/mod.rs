#![allow(dead_code)]

use async_trait::async_trait;
use plaquepay::application::engine::ReconciliationEngine;
use plaquepay::config::GatewayConfig;
use plaquepay::domain::payment::{CustomerInfo, NewPayment, PaymentRecord};
use plaquepay::domain::ports::Notifier;
use plaquepay::error::{PaymentError, Result};
use plaquepay::infrastructure::in_memory::{
    InMemoryAuditLog, InMemoryPaymentStore, InMemoryVerificationStore,
};
use plaquepay::infrastructure::replay_gateway::ReplayGateway;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Counts notifications; can be told to fail.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: AtomicUsize,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, _payment: &PaymentRecord, _reason: &str) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PaymentError::GatewayTransport("smtp unreachable".to_string()));
        }
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// An engine wired to in-memory stores and a scripted gateway.
pub struct Harness {
    pub engine: Arc<ReconciliationEngine>,
    pub gateway: Arc<ReplayGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub payments: InMemoryPaymentStore,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(GatewayConfig::default())
    }

    pub fn with_config(config: GatewayConfig) -> Self {
        let payments = InMemoryPaymentStore::new();
        let gateway = Arc::new(ReplayGateway::new(config.clone()));
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = ReconciliationEngine::new(
            Arc::new(payments.clone()),
            Arc::new(InMemoryAuditLog::new()),
            Arc::new(InMemoryVerificationStore::new()),
            gateway.clone(),
            notifier.clone(),
            &config,
        );
        Self {
            engine: Arc::new(engine),
            gateway,
            notifier,
            payments,
        }
    }

    /// Creates a seamless payment the gateway accepts as `reference`, still pending.
    pub async fn pending_seamless(&self, amount: Decimal, reference: &str) -> PaymentRecord {
        self.gateway.expect_reference(reference);
        self.engine
            .create_seamless_payment(support(amount))
            .await
            .unwrap()
            .payment
    }
}

/// A seamless support payment request.
pub fn support(amount: Decimal) -> NewPayment {
    NewPayment {
        amount,
        currency: "USD".to_string(),
        payment_method: "PZW211".to_string(),
        reason: String::new(),
        customer: CustomerInfo {
            email: "fan@example.com".to_string(),
            name: "Tendai Moyo".to_string(),
            phone: "+263771000000".to_string(),
            address: String::new(),
        },
        required_fields: BTreeMap::from([("customerPhoneNumber".to_string(), "0771000000".to_string())]),
    }
}

/// A cash payment request with the delivery details cash requires.
pub fn cash(amount: Decimal) -> NewPayment {
    let mut request = support(amount);
    request.payment_method = String::new();
    request.customer.address = "12 Samora Machel Ave, Harare".to_string();
    request.required_fields.clear();
    request
}
