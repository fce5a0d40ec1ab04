use crate::domain::payment::PaymentRecord;
use serde::Serialize;

/// Dashboard counters over a set of payments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PaymentStats {
    pub total: usize,
    pub succeeded: usize,
    pub pending: usize,
    pub failed: usize,
    /// Successful payments that earned a physical plaque.
    pub plaques: usize,
}

pub fn summarize<'a>(payments: impl IntoIterator<Item = &'a PaymentRecord>) -> PaymentStats {
    payments
        .into_iter()
        .fold(PaymentStats::default(), |mut stats, payment| {
            stats.total += 1;
            if payment.status.is_success() {
                stats.succeeded += 1;
                if payment.reward_tier.is_some_and(|tier| tier.is_plaque()) {
                    stats.plaques += 1;
                }
            } else if payment.status.is_terminal() {
                stats.failed += 1;
            } else {
                stats.pending += 1;
            }
            stats
        })
}
