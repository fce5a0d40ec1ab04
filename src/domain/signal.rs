//! Normalized values crossing the gateway boundary.
//!
//! Whatever shape the processor answers with, adapters convert it into one of
//! these types before the engine sees it.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Which entry path delivered a status signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalSource {
    /// Status carried in the create/initiate response itself.
    SynchronousResponse,
    /// Pull-based status query by reference number.
    Poll,
    /// Browser returning from the gateway's hosted page.
    RedirectReturn,
    /// Asynchronous result callback posted by the gateway.
    Webhook,
    /// Operator action (cash collection, manual failure).
    Operator,
    /// Internal failure while talking to the gateway during creation.
    Creation,
}

impl SignalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SynchronousResponse => "SYNCHRONOUS_RESPONSE",
            Self::Poll => "POLL",
            Self::RedirectReturn => "REDIRECT_RETURN",
            Self::Webhook => "WEBHOOK",
            Self::Operator => "OPERATOR",
            Self::Creation => "CREATION",
        }
    }
}

impl fmt::Display for SignalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque token for a transaction created at the gateway but not yet submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionHandle {
    pub amount: Decimal,
    pub currency: String,
    pub reason: String,
    pub token: String,
}

/// Answer to `initiate` and `make_seamless_payment`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GatewayResponse {
    pub success: bool,
    pub reference_number: Option<String>,
    pub redirect_url: Option<String>,
    pub poll_url: Option<String>,
    pub message: String,
    /// Transaction status, when the gateway already knows it.
    pub status: Option<String>,
}

/// Answer to `check_status`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatusCheck {
    pub success: bool,
    pub status: String,
    pub paid: bool,
    pub message: String,
}

/// Decoded result callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackEnvelope {
    #[serde(rename = "referenceNumber")]
    pub reference_number: Option<String>,
    #[serde(rename = "transactionStatus")]
    pub transaction_status: Option<String>,
    /// The full decoded body, kept for the audit trail.
    #[serde(skip)]
    pub payload: Value,
}

/// Query parameters of the browser redirect return.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RedirectReturn {
    #[serde(rename = "referenceNumber")]
    pub reference_number: Option<String>,
    #[serde(rename = "transactionStatus")]
    pub transaction_status: Option<String>,
}
