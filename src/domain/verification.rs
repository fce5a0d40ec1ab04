use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Operator-visible marker that a payment needs manual investigation.
/// At most one exists per payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationFlag {
    pub payment_id: Uuid,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl VerificationFlag {
    pub fn new(payment_id: Uuid, reason: impl Into<String>) -> Self {
        Self {
            payment_id,
            reason: reason.into(),
            created_at: Utc::now(),
        }
    }
}
