use crate::clock::Clock;
use crate::config::Config;
use crate::effects::{AuditEntry, Effect, EffectDispatcher};
use crate::error::{LedgerError, Result};
use crate::store::Store;
use crate::types::{BetStatus, Contest, ContestId, ContestStatus, DistributionStatus};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Contest registry fed by the scheduling service. The ledger reads contests
/// for its timing rules and only writes the settlement fields itself.
#[derive(Clone)]
pub struct ContestBook {
    store: Store,
    clock: Arc<dyn Clock>,
    effects: EffectDispatcher,
    tx_budget: Duration,
}

impl ContestBook {
    pub fn new(
        store: Store,
        config: &Config,
        clock: Arc<dyn Clock>,
        effects: EffectDispatcher,
    ) -> Self {
        Self {
            store,
            clock,
            effects,
            tx_budget: config.bet_tx_timeout(),
        }
    }

    pub async fn schedule_contest(
        &self,
        side_a: &str,
        side_b: &str,
        start_time: DateTime<Utc>,
    ) -> Result<Contest> {
        let (side_a, side_b) = (side_a.trim(), side_b.trim());
        if side_a.is_empty() || side_b.is_empty() {
            return Err(LedgerError::Validation("both sides must be named".into()));
        }
        if side_a == side_b {
            return Err(LedgerError::Validation("sides must differ".into()));
        }
        if start_time <= self.clock.now() {
            return Err(LedgerError::Validation("contest must start in the future".into()));
        }

        let contest = Contest {
            id: Uuid::new_v4(),
            side_a: side_a.to_string(),
            side_b: side_b.to_string(),
            start_time,
            status: ContestStatus::Scheduled,
            outcome: None,
            distribution_status: DistributionStatus::None,
            distribution_error: None,
            pending_bets: 0,
            accepted_bets: 0,
            total_staked: 0,
            settled_at: None,
        };

        let inserted = contest.clone();
        self.store
            .run(self.tx_budget, move |tx| tx.insert_contest(&inserted))
            .await?;

        info!(
            "Scheduled contest {} ({} vs {}) at {}",
            contest.id, contest.side_a, contest.side_b, start_time
        );
        Ok(contest)
    }

    pub async fn mark_ongoing(&self, contest_id: ContestId) -> Result<Contest> {
        self.transition(contest_id, &[ContestStatus::Scheduled], ContestStatus::Ongoing, |_| Ok(()))
            .await
    }

    /// Only contests without matched bets can be called off; matched bets
    /// must be settled as a draw instead.
    pub async fn cancel_contest(&self, contest_id: ContestId) -> Result<Contest> {
        self.transition(
            contest_id,
            &[ContestStatus::Scheduled, ContestStatus::Ongoing],
            ContestStatus::Cancelled,
            move |tx| {
                let matched = tx.contest_bets(contest_id, BetStatus::Accepted)?;
                if !matched.is_empty() {
                    return Err(LedgerError::transition(
                        format!("contest with {} accepted bets", matched.len()),
                        ContestStatus::Cancelled,
                    ));
                }
                Ok(())
            },
        )
        .await
    }

    async fn transition<G>(
        &self,
        contest_id: ContestId,
        from: &'static [ContestStatus],
        to: ContestStatus,
        guard: G,
    ) -> Result<Contest>
    where
        G: FnOnce(&crate::store::LedgerTx<'_>) -> Result<()> + Send + 'static,
    {
        let contest = self
            .store
            .run(self.tx_budget, move |tx| {
                let current = tx.contest(contest_id)?;
                guard(tx)?;
                if !tx.try_set_contest_status(contest_id, from, to)? {
                    return Err(LedgerError::transition(current.status, to));
                }
                tx.contest(contest_id)
            })
            .await?;

        info!("Contest {} is now {}", contest_id, to);
        self.effects.dispatch(vec![Effect::Audit(AuditEntry::new(
            "contest.status",
            "contest",
            contest_id,
            None,
            json!({ "status": to.as_str() }),
            self.clock.now(),
        ))]);
        Ok(contest)
    }

    pub async fn contest(&self, contest_id: ContestId) -> Result<Contest> {
        self.store.read(move |tx| tx.contest(contest_id)).await
    }

    pub async fn failed_distributions(&self) -> Result<Vec<Contest>> {
        self.store
            .read(|tx| tx.contests_with_distribution(DistributionStatus::Failed))
            .await
    }
}
