use crate::config::NotificationConfig;
use crate::domain::payment::PaymentRecord;
use crate::domain::ports::Notifier;
use crate::error::Result;
use async_trait::async_trait;
use tracing::warn;

/// Operator notifier that writes verification notices to the log.
///
/// Mail delivery lives outside this crate; a log collector forwarding `WARN`
/// lines tagged `operator` is the expected consumer.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier {
    operators: Vec<String>,
}

impl LogNotifier {
    pub fn new(config: &NotificationConfig) -> Self {
        Self {
            operators: config.operators.clone(),
        }
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, payment: &PaymentRecord, reason: &str) -> Result<()> {
        let reference = payment.reference_number.as_deref().unwrap_or("(unassigned)");
        if self.operators.is_empty() {
            warn!(
                payment_id = %payment.id,
                "No operators configured; verification notice for {} not addressed",
                reference
            );
            return Ok(());
        }
        for operator in &self.operators {
            warn!(
                target: "operator",
                to = %operator,
                payment_id = %payment.id,
                "Payment Needs Verification: {}. {}",
                reference,
                reason
            );
        }
        Ok(())
    }
}
