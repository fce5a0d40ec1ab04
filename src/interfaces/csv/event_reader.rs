use crate::domain::payment::{CustomerInfo, NewPayment};
use crate::error::{PaymentError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::Read;

/// The kind of a replayed payment event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Create a seamless payment.
    Seamless,
    /// Create a redirect payment.
    Redirect,
    /// Record a cash payment.
    Cash,
    /// Gateway reports `status` for `reference` and the engine polls it.
    Poll,
    /// Browser return carrying `status`.
    Return,
    /// Result callback carrying `status`.
    Result,
    /// Operator status change on a cash payment.
    CashStatus,
    /// Manual verification request.
    Verify,
}

/// One row of a payment event log.
///
/// Columns not used by an event type may be left empty or omitted.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PaymentEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub reference: Option<String>,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub status: Option<String>,
    pub method: Option<String>,
    pub email: Option<String>,
    pub name: Option<String>,
    pub address: Option<String>,
}

impl PaymentEvent {
    /// Builds the creation request carried by a `seamless`, `redirect` or `cash` row.
    pub fn new_payment(&self) -> Result<NewPayment> {
        let amount = self.amount.ok_or_else(|| {
            PaymentError::ValidationError(format!("{:?} event requires an amount", self.event_type))
        })?;
        Ok(NewPayment {
            amount,
            currency: self.currency.clone().unwrap_or_default(),
            payment_method: self.method.clone().unwrap_or_default(),
            reason: String::new(),
            customer: CustomerInfo {
                email: self.email.clone().unwrap_or_default(),
                name: self.name.clone().unwrap_or_default(),
                phone: String::new(),
                address: self.address.clone().unwrap_or_default(),
            },
            required_fields: BTreeMap::new(),
        })
    }

    /// The `reference` column, required by every non-creation event.
    pub fn require_reference(&self) -> Result<&str> {
        self.reference
            .as_deref()
            .filter(|r| !r.is_empty())
            .ok_or_else(|| {
                PaymentError::ValidationError(format!(
                    "{:?} event requires a reference",
                    self.event_type
                ))
            })
    }
}

/// Reads payment events from a CSV source.
///
/// Whitespace is trimmed and short rows are accepted.
pub struct EventReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> EventReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes events, one `Result` per row.
    pub fn events(self) -> impl Iterator<Item = Result<PaymentEvent>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(PaymentError::from))
    }
}
