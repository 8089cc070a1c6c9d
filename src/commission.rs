use crate::error::Result;
use crate::settlement::DistributionRates;
use crate::store::Store;
use crate::types::{Amount, CommissionRecord, ContestId, Outcome};
use rust_decimal::Decimal;

/// Share of the pot kept by the platform for a given outcome.
pub fn commission_percentage(outcome: Outcome, rates: &DistributionRates) -> Decimal {
    match outcome {
        Outcome::Draw => Decimal::ONE - rates.draw_refund_rate,
        Outcome::SideA | Outcome::SideB => rates.commission_rate,
    }
}

/// Read side of the platform's revenue. Records are written by the
/// distribution engine inside the settlement transaction.
#[derive(Clone)]
pub struct CommissionLedger {
    store: Store,
}

impl CommissionLedger {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn commission_for_contest(
        &self,
        contest_id: ContestId,
    ) -> Result<Option<CommissionRecord>> {
        self.store.read(move |tx| tx.contest_commission(contest_id)).await
    }

    pub async fn commission_records(&self) -> Result<Vec<CommissionRecord>> {
        self.store.read(|tx| tx.commission_records()).await
    }

    pub async fn total_commission(&self) -> Result<Amount> {
        self.store.read(|tx| tx.total_commission()).await
    }
}
