use crate::domain::payment::{PaymentChannel, PaymentRecord, PaymentStatus};
use crate::domain::tier::RewardTier;
use crate::error::Result;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashSet;
use std::io::Write;
use uuid::Uuid;

#[derive(Serialize)]
struct PaymentRow<'a> {
    id: Uuid,
    reference: Option<&'a str>,
    channel: PaymentChannel,
    amount: Decimal,
    currency: &'a str,
    status: PaymentStatus,
    tier: Option<RewardTier>,
    completed_at: Option<String>,
    flagged: bool,
}

/// Writes final payment state as CSV.
pub struct PaymentWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> PaymentWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// One row per payment; `flagged` marks ids present in `flagged`.
    pub fn write_payments(&mut self, payments: &[PaymentRecord], flagged: &HashSet<Uuid>) -> Result<()> {
        for payment in payments {
            self.writer.serialize(PaymentRow {
                id: payment.id,
                reference: payment.reference_number.as_deref(),
                channel: payment.channel,
                amount: payment.amount.value(),
                currency: payment.currency.as_str(),
                status: payment.status,
                tier: payment.reward_tier,
                completed_at: payment.completed_at.map(|t| t.to_rfc3339()),
                flagged: flagged.contains(&payment.id),
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::payment::{CustomerInfo, NewPayment};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn cash(amount: Decimal) -> PaymentRecord {
        let valid = NewPayment {
            amount,
            currency: "USD".to_string(),
            payment_method: String::new(),
            reason: String::new(),
            customer: CustomerInfo {
                email: "fan@example.com".to_string(),
                name: "Tendai".to_string(),
                phone: String::new(),
                address: "Harare".to_string(),
            },
            required_fields: BTreeMap::new(),
        }
        .validate(PaymentChannel::Cash)
        .unwrap();
        PaymentRecord::new(Uuid::new_v4(), PaymentChannel::Cash, valid, Utc::now())
    }

    #[test]
    fn test_write_payments() {
        let mut paid = cash(dec!(600));
        paid.reconcile("COLLECTED", Utc::now());
        let open = cash(dec!(20));
        let flagged = HashSet::from([open.id]);

        let mut out = Vec::new();
        PaymentWriter::new(&mut out)
            .write_payments(&[paid.clone(), open.clone()], &flagged)
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(
            lines[0],
            "id,reference,channel,amount,currency,status,tier,completed_at,flagged"
        );
        assert!(lines[1].starts_with(&format!("{},CASH-{},CASH,600,USD,COLLECTED,silver,", paid.id, paid.id)));
        assert!(lines[1].ends_with(",false"));
        assert_eq!(
            lines[2],
            format!("{},CASH-{},CASH,20,USD,PENDING,,,true", open.id, open.id)
        );
    }
}
