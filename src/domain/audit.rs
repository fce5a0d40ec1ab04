use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Event tags written to the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEvent {
    Created,
    CashPaymentCreated,
    GatewayCreateFailed,
    GatewayInitiateFailed,
    GatewayAccepted,
    GatewayRejected,
    SignalReceived,
    StatusUpdate,
    UnknownStatus,
    StaleSignalIgnored,
    TierAssigned,
    PollFailed,
    PollRejected,
    CallbackWithoutStatus,
    MarkedForVerification,
    NotificationFailed,
}

impl AuditEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::CashPaymentCreated => "CASH_PAYMENT_CREATED",
            Self::GatewayCreateFailed => "GATEWAY_CREATE_FAILED",
            Self::GatewayInitiateFailed => "GATEWAY_INITIATE_FAILED",
            Self::GatewayAccepted => "GATEWAY_ACCEPTED",
            Self::GatewayRejected => "GATEWAY_REJECTED",
            Self::SignalReceived => "SIGNAL_RECEIVED",
            Self::StatusUpdate => "STATUS_UPDATE",
            Self::UnknownStatus => "UNKNOWN_STATUS",
            Self::StaleSignalIgnored => "STALE_SIGNAL_IGNORED",
            Self::TierAssigned => "TIER_ASSIGNED",
            Self::PollFailed => "POLL_FAILED",
            Self::PollRejected => "POLL_REJECTED",
            Self::CallbackWithoutStatus => "CALLBACK_WITHOUT_STATUS",
            Self::MarkedForVerification => "MARKED_FOR_VERIFICATION",
            Self::NotificationFailed => "NOTIFICATION_FAILED",
        }
    }
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One append-only line of a payment's audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub payment_id: Uuid,
    pub event: AuditEvent,
    pub message: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(payment_id: Uuid, event: AuditEvent, message: impl Into<String>, data: Value) -> Self {
        Self {
            payment_id,
            event,
            message: message.into(),
            data,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_audit_entry_serialization() {
        let entry = AuditEntry::new(
            Uuid::nil(),
            AuditEvent::UnknownStatus,
            "Unrecognized status",
            json!({ "raw_status": "BLAHBLAH" }),
        );
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["event"], "UNKNOWN_STATUS");
        assert_eq!(value["data"]["raw_status"], "BLAHBLAH");
    }
}
