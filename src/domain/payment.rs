use super::tier::{RewardTier, classify};
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Represents a positive monetary amount for a payment.
///
/// This is a wrapper around `rust_decimal::Decimal` so that a zero or negative
/// contribution cannot be constructed.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(PaymentError::ValidationError(
                "Amount must be positive".to_string(),
            ))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = PaymentError;

    fn try_from(value: Decimal) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque currency tag. Carried through, never converted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Currency(String);

impl Currency {
    pub fn new(code: &str) -> Result<Self> {
        let code = code.trim();
        if code.is_empty() {
            return Err(PaymentError::ValidationError(
                "Currency is required".to_string(),
            ));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentChannel {
    /// Server-to-server payment completed without leaving the site.
    Seamless,
    /// Browser hop to the gateway's hosted page.
    Redirect,
    /// Offline collection by an operator.
    Cash,
}

impl PaymentChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Seamless => "SEAMLESS",
            Self::Redirect => "REDIRECT",
            Self::Cash => "CASH",
        }
    }
}

impl fmt::Display for PaymentChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Initiated,
    Pending,
    Processing,
    AuthorizationFailed,
    Declined,
    InsufficientFunds,
    ServiceUnavailable,
    TimeOut,
    Error,
    Cancelled,
    Closed,
    ClosedPeriodElapsed,
    Reversed,
    Terminated,
    PartiallyPaid,
    Success,
    Collected,
    Delivered,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 18] = [
        Self::Initiated,
        Self::Pending,
        Self::Processing,
        Self::AuthorizationFailed,
        Self::Declined,
        Self::InsufficientFunds,
        Self::ServiceUnavailable,
        Self::TimeOut,
        Self::Error,
        Self::Cancelled,
        Self::Closed,
        Self::ClosedPeriodElapsed,
        Self::Reversed,
        Self::Terminated,
        Self::PartiallyPaid,
        Self::Success,
        Self::Collected,
        Self::Delivered,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "INITIATED",
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::AuthorizationFailed => "AUTHORIZATION_FAILED",
            Self::Declined => "DECLINED",
            Self::InsufficientFunds => "INSUFFICIENT_FUNDS",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::TimeOut => "TIME_OUT",
            Self::Error => "ERROR",
            Self::Cancelled => "CANCELLED",
            Self::Closed => "CLOSED",
            Self::ClosedPeriodElapsed => "CLOSED_PERIOD_ELAPSED",
            Self::Reversed => "REVERSED",
            Self::Terminated => "TERMINATED",
            Self::PartiallyPaid => "PARTIALLY_PAID",
            Self::Success => "SUCCESS",
            Self::Collected => "COLLECTED",
            Self::Delivered => "DELIVERED",
        }
    }

    /// No further status or completion change is permitted once terminal.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            Self::Initiated | Self::Pending | Self::Processing | Self::PartiallyPaid
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success | Self::Collected | Self::Delivered)
    }

    pub fn is_failure(&self) -> bool {
        self.is_terminal() && !self.is_success()
    }

    pub fn is_cash_only(&self) -> bool {
        matches!(self, Self::Collected | Self::Delivered)
    }

    /// Normalizes a raw status reported by the gateway or an operator.
    ///
    /// Matching ignores surrounding whitespace and case. Cash-only statuses are
    /// only recognized for cash payments. Returns `None` for anything else.
    pub fn normalize(raw: &str, channel: PaymentChannel) -> Option<Self> {
        let upper = raw.trim().to_ascii_uppercase();
        let status = match upper.as_str() {
            "COMPLETED" | "PAID" => Self::Success,
            "FAILED" => Self::Error,
            other => Self::ALL.into_iter().find(|s| s.as_str() == other)?,
        };
        if status.is_cash_only() && channel != PaymentChannel::Cash {
            return None;
        }
        Some(status)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CustomerInfo {
    pub email: String,
    pub name: String,
    pub phone: String,
    pub address: String,
}

/// Creation input for a support payment, validated before anything is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPayment {
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: String,
    pub reason: String,
    pub customer: CustomerInfo,
    /// Extra gateway fields for seamless payments (card or wallet details).
    pub required_fields: BTreeMap<String, String>,
}

/// A `NewPayment` that passed validation for a given channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidPayment {
    pub amount: Amount,
    pub currency: Currency,
    pub payment_method: String,
    pub reason: String,
    pub customer: CustomerInfo,
    pub required_fields: BTreeMap<String, String>,
}

pub const CASH_PAYMENT_METHOD: &str = "CASH001";
pub const DEFAULT_REASON: &str = "Album Support";

impl NewPayment {
    pub fn validate(self, channel: PaymentChannel) -> Result<ValidPayment> {
        let amount = Amount::new(self.amount)?;
        let currency = Currency::new(&self.currency)?;
        require("customer email", &self.customer.email)?;
        if channel == PaymentChannel::Cash {
            require("customer name", &self.customer.name)?;
            require("customer address", &self.customer.address)?;
        }
        let payment_method = match channel {
            PaymentChannel::Cash => CASH_PAYMENT_METHOD.to_string(),
            PaymentChannel::Redirect if self.payment_method.trim().is_empty() => {
                "REDIRECT".to_string()
            }
            _ => {
                require("payment method", &self.payment_method)?;
                self.payment_method.trim().to_string()
            }
        };
        let reason = if self.reason.trim().is_empty() {
            DEFAULT_REASON.to_string()
        } else {
            self.reason.trim().to_string()
        };
        Ok(ValidPayment {
            amount,
            currency,
            payment_method,
            reason,
            customer: self.customer,
            required_fields: self.required_fields,
        })
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(PaymentError::ValidationError(format!(
            "Missing required field: {}",
            field
        )))
    } else {
        Ok(())
    }
}

/// One payment attempt. Never deleted; mutated only through [`PaymentRecord::reconcile`]
/// and [`PaymentRecord::attach_gateway_reference`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub reference_number: Option<String>,
    pub amount: Amount,
    pub currency: Currency,
    pub payment_method: String,
    pub channel: PaymentChannel,
    pub customer: CustomerInfo,
    pub reason: String,
    pub reward_tier: Option<RewardTier>,
    pub status: PaymentStatus,
    pub poll_url: Option<String>,
    pub redirect_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Incremented by the store on every successful write.
    pub version: u64,
}

/// What happened when a raw status signal was folded into a record.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalOutcome {
    /// The record was already terminal; nothing changed.
    Stale { current: PaymentStatus },
    Applied {
        from: PaymentStatus,
        to: PaymentStatus,
        /// Set when the raw value was not recognized and mapped to `ERROR`.
        unknown_raw: Option<String>,
        /// Set when a tier was assigned or corrected by this signal.
        tier_assigned: Option<RewardTier>,
    },
}

impl SignalOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, Self::Applied { from, to, .. } if from != to)
    }
}

impl PaymentRecord {
    pub fn new(id: Uuid, channel: PaymentChannel, payment: ValidPayment, now: DateTime<Utc>) -> Self {
        let status = match channel {
            PaymentChannel::Cash => PaymentStatus::Pending,
            _ => PaymentStatus::Initiated,
        };
        let reference_number = match channel {
            PaymentChannel::Cash => Some(format!("CASH-{}", id)),
            _ => None,
        };
        Self {
            id,
            reference_number,
            amount: payment.amount,
            currency: payment.currency,
            payment_method: payment.payment_method,
            channel,
            customer: payment.customer,
            reason: payment.reason,
            reward_tier: None,
            status,
            poll_url: None,
            redirect_url: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            version: 0,
        }
    }

    /// Folds a raw status into the record.
    ///
    /// Terminal records are left untouched. Unrecognized values become `ERROR`.
    /// A success status stamps `completed_at` and re-derives the tier from the amount;
    /// a failure status clears `completed_at`.
    pub fn reconcile(&mut self, raw_status: &str, now: DateTime<Utc>) -> SignalOutcome {
        if self.status.is_terminal() {
            return SignalOutcome::Stale {
                current: self.status,
            };
        }

        let from = self.status;
        let (to, unknown_raw) = match PaymentStatus::normalize(raw_status, self.channel) {
            Some(status) => (status, None),
            None => (PaymentStatus::Error, Some(raw_status.to_string())),
        };

        let mut tier_assigned = None;
        if to.is_success() {
            self.completed_at = Some(now);
            let expected = classify(self.amount.value());
            if self.reward_tier != Some(expected) {
                self.reward_tier = Some(expected);
                tier_assigned = Some(expected);
            }
        } else if to.is_failure() {
            self.completed_at = None;
            self.reward_tier = None;
        }

        self.status = to;
        self.updated_at = now;

        SignalOutcome::Applied {
            from,
            to,
            unknown_raw,
            tier_assigned,
        }
    }

    /// Records the identifiers the gateway assigned after a successful create call.
    pub fn attach_gateway_reference(
        &mut self,
        reference_number: String,
        poll_url: Option<String>,
        redirect_url: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.reference_number = Some(reference_number);
        self.poll_url = poll_url;
        self.redirect_url = redirect_url;
        self.updated_at = now;
    }
}
