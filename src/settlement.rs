//! Winnings distribution.
//!
//! Settlement runs in two steps. [`plan_distribution`] is pure integer
//! arithmetic over the positions of a contest. [`DistributionEngine`] claims
//! the contest's distribution guard, applies the plan in one serializable
//! transaction, and flips the guard to COMPLETED, or to FAILED when anything
//! goes wrong.

use crate::bets::{refund_effects, refund_open_bet, CancelReason};
use crate::clock::Clock;
use crate::commission::commission_percentage;
use crate::config::Config;
use crate::effects::{AuditEntry, Effect, EffectDispatcher, LedgerEvent};
use crate::error::{LedgerError, Result};
use crate::store::{NewTransaction, Store, WalletDelta};
use crate::types::{
    Amount, Bet, BetId, BetPayout, BetStatus, CommissionRecord, ContestId, ContestStatus,
    DistributionResult, DistributionStatus, Outcome, Side, TransactionType, UserId,
    PLATFORM_ACCOUNT,
};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DistributionRates {
    pub commission_rate: Decimal,
    pub draw_refund_rate: Decimal,
}

impl DistributionRates {
    pub fn from_config(config: &Config) -> Self {
        Self {
            commission_rate: config.commission_rate,
            draw_refund_rate: config.draw_refund_rate,
        }
    }
}

/// One bettor's stake on one side of a bet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub bet_id: BetId,
    pub holder: UserId,
    pub side: Side,
    pub stake: Amount,
}

impl Position {
    /// The creator backs `chosen_side`; the acceptor backs the other side
    /// with the same stake.
    pub fn from_bet(bet: &Bet) -> Result<[Position; 2]> {
        let acceptor = bet.acceptor_id.ok_or_else(|| {
            LedgerError::Internal(format!("accepted bet {} has no acceptor", bet.id))
        })?;
        Ok([
            Position {
                bet_id: bet.id,
                holder: bet.creator_id,
                side: bet.chosen_side,
                stake: bet.stake,
            },
            Position {
                bet_id: bet.id,
                holder: acceptor,
                side: bet.chosen_side.opposite(),
                stake: bet.stake,
            },
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedPosition {
    pub position: Position,
    pub status: BetStatus,
    /// Credited to the holder's available balance.
    pub credit: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionPlan {
    pub outcome: Outcome,
    pub total_pot: Amount,
    pub commission: Amount,
    pub distributable: Amount,
    pub winning_pot: Amount,
    pub total_paid: Amount,
    /// Floor-rounding dust left after proportional payouts.
    pub rounding_remainder: Amount,
    pub positions: Vec<PlannedPosition>,
}

fn overflow() -> LedgerError {
    LedgerError::Internal("settlement arithmetic overflow".into())
}

fn checked_sum<I: IntoIterator<Item = Amount>>(amounts: I) -> Result<Amount> {
    amounts
        .into_iter()
        .try_fold(0u64, |acc, a| acc.checked_add(a))
        .ok_or_else(overflow)
}

/// `floor(amount * rate)`.
pub fn apply_rate(amount: Amount, rate: Decimal) -> Result<Amount> {
    Decimal::from(amount)
        .checked_mul(rate)
        .map(|d| d.floor())
        .and_then(|d| d.to_u64())
        .ok_or_else(overflow)
}

/// Computes every credit of a settlement without touching the store.
///
/// Winner scenario: commission is `floor(pot * rate)`, and each winning
/// position gets `floor(stake * distributable / winning_pot)`, so payouts
/// never exceed `distributable`. If nobody backed the winning side the whole
/// pot is commission. Draw: each position gets `floor(stake * refund_rate)`
/// back and the rest is commission.
///
/// Always `commission + total_paid + rounding_remainder == total_pot`.
pub fn plan_distribution(
    positions: &[Position],
    outcome: Outcome,
    rates: &DistributionRates,
) -> Result<DistributionPlan> {
    let total_pot = checked_sum(positions.iter().map(|p| p.stake))?;

    let plan = match outcome.winning_side() {
        None => {
            let mut planned = Vec::with_capacity(positions.len());
            for position in positions {
                let refund =
                    apply_rate(position.stake, rates.draw_refund_rate)?.min(position.stake);
                planned.push(PlannedPosition {
                    position: *position,
                    status: BetStatus::Refunded,
                    credit: refund,
                });
            }
            let total_paid = checked_sum(planned.iter().map(|p| p.credit))?;
            DistributionPlan {
                outcome,
                total_pot,
                commission: total_pot - total_paid,
                distributable: total_paid,
                winning_pot: 0,
                total_paid,
                rounding_remainder: 0,
                positions: planned,
            }
        }
        Some(winning_side) => {
            let winning_pot = checked_sum(
                positions
                    .iter()
                    .filter(|p| p.side == winning_side)
                    .map(|p| p.stake),
            )?;

            // Unreachable through the engine: accepted bets always back both
            // sides and an empty contest completes before planning. Only
            // arbitrary position sets get here.
            if winning_pot == 0 {
                let planned = positions
                    .iter()
                    .map(|p| PlannedPosition {
                        position: *p,
                        status: BetStatus::Lost,
                        credit: 0,
                    })
                    .collect();
                DistributionPlan {
                    outcome,
                    total_pot,
                    commission: total_pot,
                    distributable: 0,
                    winning_pot,
                    total_paid: 0,
                    rounding_remainder: 0,
                    positions: planned,
                }
            } else {
                let commission = apply_rate(total_pot, rates.commission_rate)?.min(total_pot);
                let distributable = total_pot - commission;

                let mut planned = Vec::with_capacity(positions.len());
                for position in positions {
                    if position.side == winning_side {
                        let share = (position.stake as u128) * (distributable as u128)
                            / (winning_pot as u128);
                        planned.push(PlannedPosition {
                            position: *position,
                            status: BetStatus::Won,
                            credit: u64::try_from(share).map_err(|_| overflow())?,
                        });
                    } else {
                        planned.push(PlannedPosition {
                            position: *position,
                            status: BetStatus::Lost,
                            credit: 0,
                        });
                    }
                }

                let total_paid = checked_sum(planned.iter().map(|p| p.credit))?;
                let rounding_remainder = distributable
                    .checked_sub(total_paid)
                    .ok_or_else(|| LedgerError::Internal("payouts exceed distributable".into()))?;
                DistributionPlan {
                    outcome,
                    total_pot,
                    commission,
                    distributable,
                    winning_pot,
                    total_paid,
                    rounding_remainder,
                    positions: planned,
                }
            }
        }
    };

    if plan.commission + plan.total_paid + plan.rounding_remainder != plan.total_pot {
        return Err(LedgerError::Internal(format!(
            "distribution does not conserve the pot: {} + {} + {} != {}",
            plan.commission, plan.total_paid, plan.rounding_remainder, plan.total_pot
        )));
    }
    Ok(plan)
}

/// Bet-level status follows the creator's `chosen_side`.
fn bet_settlement(bet: &Bet, plan: &DistributionPlan) -> (BetStatus, Option<Amount>) {
    let creator = plan
        .positions
        .iter()
        .find(|p| p.position.bet_id == bet.id && p.position.holder == bet.creator_id);
    match creator {
        Some(p) if p.status == BetStatus::Lost => (BetStatus::Lost, None),
        Some(p) => (p.status, Some(p.credit)),
        None => (BetStatus::Lost, None),
    }
}

#[derive(Clone)]
pub struct DistributionEngine {
    store: Store,
    config: Config,
    clock: Arc<dyn Clock>,
    effects: EffectDispatcher,
}

impl DistributionEngine {
    pub fn new(
        store: Store,
        config: Config,
        clock: Arc<dyn Clock>,
        effects: EffectDispatcher,
    ) -> Self {
        Self {
            store,
            config,
            clock,
            effects,
        }
    }

    /// Settles every accepted bet of the contest exactly once.
    ///
    /// A concurrent or repeated call fails fast with `AlreadyProcessed` and
    /// mutates nothing. A failed attempt leaves the contest FAILED and can be
    /// run again.
    pub async fn distribute_winnings(
        &self,
        contest_id: ContestId,
        outcome: Outcome,
    ) -> Result<DistributionResult> {
        // 1. Claim the distribution guard
        let claimed_at = self.clock.now();
        self.store
            .run(self.config.bet_tx_timeout(), move |tx| {
                let contest = tx.contest(contest_id)?;
                if contest.status == ContestStatus::Cancelled {
                    return Err(LedgerError::transition(contest.status, ContestStatus::Finished));
                }
                if !tx.try_begin_distribution(contest_id, outcome, claimed_at)? {
                    return Err(LedgerError::AlreadyProcessed(contest_id.to_string()));
                }
                Ok(())
            })
            .await?;

        info!("Distribution of contest {} started (outcome {})", contest_id, outcome);

        // 2. Apply the whole settlement atomically
        let now = self.clock.now();
        match self.apply(contest_id, outcome, now).await {
            Ok((result, effects)) => {
                info!(
                    "Distribution of contest {} completed: pot {}, commission {}, paid {}, dust {}",
                    contest_id,
                    result.total_pot,
                    result.commission,
                    result.total_paid,
                    result.rounding_remainder
                );
                self.effects.dispatch(effects);
                Ok(result)
            }
            Err(err) => {
                error!("Distribution of contest {} failed: {}", contest_id, err);
                self.mark_failed(contest_id, &err).await;
                Err(err)
            }
        }
    }

    /// Re-runs a FAILED distribution with the outcome recorded on the contest.
    pub async fn retry_distribution(&self, contest_id: ContestId) -> Result<DistributionResult> {
        let contest = self.store.read(move |tx| tx.contest(contest_id)).await?;
        if contest.distribution_status != DistributionStatus::Failed {
            return Err(LedgerError::transition(
                contest.distribution_status,
                DistributionStatus::Processing,
            ));
        }
        let outcome = contest.outcome.ok_or_else(|| {
            LedgerError::Internal(format!("failed contest {} has no recorded outcome", contest_id))
        })?;
        warn!("Retrying distribution of contest {}", contest_id);
        self.distribute_winnings(contest_id, outcome).await
    }

    /// Moves claims stuck in PROCESSING (crash between claim and apply, or a
    /// lost failure write) to FAILED so they can be retried.
    ///
    /// A claim is stalled once it is older than the lock wait plus the
    /// distribution budget: any apply still holding it has been rolled back.
    pub async fn recover_stalled(&self) -> Result<Vec<ContestId>> {
        let horizon = self.config.lock_wait_timeout() + self.config.distribution_tx_timeout();
        let horizon = chrono::Duration::from_std(horizon)
            .map_err(|e| LedgerError::Internal(format!("distribution horizon: {}", e)))?;
        let now = self.clock.now();
        let cutoff = now - horizon;

        let released = self
            .store
            .run(self.config.bet_tx_timeout(), move |tx| {
                tx.fail_stalled_distributions(cutoff, "distribution stalled in PROCESSING")
            })
            .await?;

        let mut audits = Vec::with_capacity(released.len());
        for contest_id in &released {
            warn!("Released stalled distribution of contest {} to FAILED", contest_id);
            audits.push(Effect::Audit(AuditEntry::new(
                "contest.distribution_stalled",
                "contest",
                contest_id,
                Some(PLATFORM_ACCOUNT),
                json!({ "claimed_before": cutoff }),
                now,
            )));
        }
        self.effects.dispatch(audits);
        Ok(released)
    }

    async fn mark_failed(&self, contest_id: ContestId, err: &LedgerError) {
        let reason = err.to_string();
        let marked = self
            .store
            .run(self.config.bet_tx_timeout(), move |tx| {
                tx.fail_distribution(contest_id, &reason)
            })
            .await;
        match marked {
            Ok(true) => {
                self.effects.dispatch(vec![Effect::Audit(AuditEntry::new(
                    "contest.distribution_failed",
                    "contest",
                    contest_id,
                    Some(PLATFORM_ACCOUNT),
                    json!({ "error": err.to_string(), "kind": err.kind() }),
                    self.clock.now(),
                ))]);
            }
            Ok(false) => warn!("Contest {} was not PROCESSING when marking failure", contest_id),
            Err(e) => error!(
                "Contest {} left in PROCESSING until stalled-claim recovery: {}",
                contest_id, e
            ),
        }
    }

    async fn apply(
        &self,
        contest_id: ContestId,
        outcome: Outcome,
        now: DateTime<Utc>,
    ) -> Result<(DistributionResult, Vec<Effect>)> {
        let rates = DistributionRates::from_config(&self.config);
        self.store
            .run(self.config.distribution_tx_timeout(), move |tx| {
                let contest = tx.contest(contest_id)?;
                if contest.distribution_status != DistributionStatus::Processing {
                    return Err(LedgerError::AlreadyProcessed(contest_id.to_string()));
                }

                let mut effects = Vec::new();
                let mut result = DistributionResult::empty(contest_id, outcome);

                // Unmatched bets never locked an acceptor; hand the stakes back.
                for bet in tx.contest_bets(contest_id, BetStatus::Pending)? {
                    let refund = refund_open_bet(tx, bet.id, CancelReason::ContestSettled, now)?;
                    effects.extend(refund_effects(
                        &refund,
                        Some(PLATFORM_ACCOUNT),
                        CancelReason::ContestSettled,
                        now,
                    ));
                    result.cancelled_pending.push(bet.id);
                }

                let bets = tx.contest_bets(contest_id, BetStatus::Accepted)?;
                if bets.is_empty() {
                    tx.complete_distribution(contest_id, now)?;
                    return Ok((result, effects));
                }

                let mut positions = Vec::with_capacity(bets.len() * 2);
                for bet in &bets {
                    positions.extend(Position::from_bet(bet)?);
                }
                let plan = plan_distribution(&positions, outcome, &rates)?;

                // Wallets and ledger lines, one per position
                for planned in &plan.positions {
                    let p = planned.position;
                    let (delta, line, event) = match planned.status {
                        BetStatus::Won => (
                            WalletDelta::win(p.stake, planned.credit)?,
                            NewTransaction::new(TransactionType::BetWin, p.holder, planned.credit),
                            LedgerEvent::BetWon {
                                bet_id: p.bet_id,
                                payout: planned.credit,
                            },
                        ),
                        BetStatus::Lost => (
                            WalletDelta::loss(p.stake)?,
                            NewTransaction::new(TransactionType::BetLoss, p.holder, p.stake),
                            LedgerEvent::BetLost {
                                bet_id: p.bet_id,
                                stake: p.stake,
                            },
                        ),
                        _ => (
                            WalletDelta::release(p.stake, planned.credit)?,
                            NewTransaction::new(
                                TransactionType::BetRefund,
                                p.holder,
                                planned.credit,
                            ),
                            LedgerEvent::BetRefunded {
                                bet_id: p.bet_id,
                                refund: planned.credit,
                            },
                        ),
                    };
                    tx.apply_wallet_delta(p.holder, delta, now)?;
                    tx.record_transaction(
                        line.bet(p.bet_id, contest_id)
                            .notes(format!("settled {} on {}", planned.status, outcome)),
                        now,
                    )?;
                    effects.push(Effect::notify(p.holder, event));
                    result.payouts.push(BetPayout {
                        bet_id: p.bet_id,
                        user_id: p.holder,
                        side: p.side,
                        status: planned.status,
                        stake: p.stake,
                        credited: planned.credit,
                    });
                }

                for bet in &bets {
                    let (status, actual_win) = bet_settlement(bet, &plan);
                    if !tx.try_settle_bet(bet.id, status, actual_win, now)? {
                        return Err(LedgerError::Internal(format!(
                            "bet {} changed state during distribution",
                            bet.id
                        )));
                    }
                }

                // House share: commission plus rounding dust
                let percentage = commission_percentage(outcome, &rates);
                let house_cut = WalletDelta::credit(plan.commission)?;
                tx.apply_wallet_delta(PLATFORM_ACCOUNT, house_cut, now)?;
                let commission_line = tx.record_transaction(
                    NewTransaction::new(
                        TransactionType::Commission,
                        PLATFORM_ACCOUNT,
                        plan.commission,
                    )
                    .contest(contest_id)
                    .notes(format!("commission at {} on {}", percentage, outcome)),
                    now,
                )?;
                if plan.rounding_remainder > 0 {
                    let dust = WalletDelta::credit(plan.rounding_remainder)?;
                    tx.apply_wallet_delta(PLATFORM_ACCOUNT, dust, now)?;
                    tx.record_transaction(
                        NewTransaction::new(
                            TransactionType::Rounding,
                            PLATFORM_ACCOUNT,
                            plan.rounding_remainder,
                        )
                        .contest(contest_id)
                        .notes("floor-rounding remainder of proportional payouts"),
                        now,
                    )?;
                }
                tx.insert_commission(&CommissionRecord {
                    id: Uuid::new_v4(),
                    contest_id,
                    bet_id: None,
                    amount: plan.commission,
                    percentage,
                    rounding_remainder: plan.rounding_remainder,
                    transaction_id: commission_line.id,
                    created_at: now,
                })?;

                tx.complete_distribution(contest_id, now)?;

                effects.push(Effect::notify(
                    PLATFORM_ACCOUNT,
                    LedgerEvent::CommissionRecorded {
                        contest_id,
                        amount: plan.commission,
                        outcome,
                    },
                ));
                effects.push(Effect::Audit(AuditEntry::new(
                    "contest.distribute",
                    "contest",
                    contest_id,
                    Some(PLATFORM_ACCOUNT),
                    json!({
                        "outcome": outcome,
                        "bets": bets.len(),
                        "total_pot": plan.total_pot,
                        "commission": plan.commission,
                        "total_paid": plan.total_paid,
                        "rounding_remainder": plan.rounding_remainder,
                    }),
                    now,
                )));

                result.total_pot = plan.total_pot;
                result.commission = plan.commission;
                result.distributable = plan.distributable;
                result.total_paid = plan.total_paid;
                result.rounding_remainder = plan.rounding_remainder;
                Ok((result, effects))
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(side: Side, stake: Amount) -> Position {
        Position {
            bet_id: Uuid::new_v4(),
            holder: Uuid::new_v4(),
            side,
            stake,
        }
    }

    fn rates(commission: Decimal) -> DistributionRates {
        DistributionRates {
            commission_rate: commission,
            draw_refund_rate: dec!(0.975),
        }
    }

    #[test]
    fn proportional_payout_reference_scenario() {
        let positions = vec![
            position(Side::SideA, 10_000),
            position(Side::SideA, 15_000),
            position(Side::SideB, 20_000),
            position(Side::SideB, 5_000),
        ];
        let plan = plan_distribution(&positions, Outcome::SideA, &rates(dec!(0.05))).unwrap();

        assert_eq!(plan.total_pot, 50_000);
        assert_eq!(plan.commission, 2_500);
        assert_eq!(plan.distributable, 47_500);
        assert_eq!(plan.winning_pot, 25_000);
        let credits: Vec<Amount> = plan.positions.iter().map(|p| p.credit).collect();
        assert_eq!(credits, vec![19_000, 28_500, 0, 0]);
        assert_eq!(plan.positions[2].status, BetStatus::Lost);
        assert_eq!(plan.rounding_remainder, 0);
    }

    #[test]
    fn nobody_on_winning_side_makes_whole_pot_commission() {
        let positions = vec![position(Side::SideB, 700), position(Side::SideB, 300)];
        let plan = plan_distribution(&positions, Outcome::SideA, &rates(dec!(0.10))).unwrap();
        assert_eq!(plan.commission, 1_000);
        assert_eq!(plan.total_paid, 0);
        assert!(plan.positions.iter().all(|p| p.status == BetStatus::Lost && p.credit == 0));
    }

    #[test]
    fn draw_refunds_at_fixed_rate() {
        let positions = vec![position(Side::SideA, 10_000), position(Side::SideB, 333)];
        let plan = plan_distribution(&positions, Outcome::Draw, &rates(dec!(0.10))).unwrap();
        assert_eq!(plan.positions[0].credit, 9_750);
        assert_eq!(plan.positions[1].credit, 324); // floor(333 * 0.975) = 324
        assert!(plan.positions.iter().all(|p| p.status == BetStatus::Refunded));
        assert_eq!(plan.commission, 250 + 9);
    }

    #[test]
    fn flooring_dust_is_tracked() {
        let positions = vec![
            position(Side::SideA, 1),
            position(Side::SideA, 1),
            position(Side::SideA, 1),
            position(Side::SideB, 7),
        ];
        let plan = plan_distribution(&positions, Outcome::SideA, &rates(dec!(0.10))).unwrap();
        // pot 10, commission 1, distributable 9, each winner floor(1 * 9 / 3) = 3
        assert_eq!(plan.total_paid, 9);
        assert_eq!(plan.rounding_remainder, 0);

        let positions = vec![
            position(Side::SideA, 2),
            position(Side::SideA, 1),
            position(Side::SideB, 7),
        ];
        let plan = plan_distribution(&positions, Outcome::SideA, &rates(dec!(0.10))).unwrap();
        // distributable 9 over winning pot 3: floor(2*9/3)=6, floor(1*9/3)=3
        assert_eq!(plan.total_paid, 9);

        let positions = vec![
            position(Side::SideA, 1),
            position(Side::SideA, 1),
            position(Side::SideB, 9),
        ];
        let plan = plan_distribution(&positions, Outcome::SideA, &rates(dec!(0.10))).unwrap();
        // pot 11, commission 1, distributable 10, each winner floor(10/2) = 5
        assert_eq!(plan.total_paid, 10);

        let positions = vec![
            position(Side::SideA, 1),
            position(Side::SideA, 1),
            position(Side::SideA, 1),
            position(Side::SideB, 8),
        ];
        let plan = plan_distribution(&positions, Outcome::SideA, &rates(dec!(0.10))).unwrap();
        // pot 11, commission 1, distributable 10, each winner floor(10/3) = 3, dust 1
        assert_eq!(plan.total_paid, 9);
        assert_eq!(plan.rounding_remainder, 1);
    }

    #[test]
    fn empty_contest_plans_nothing() {
        let plan = plan_distribution(&[], Outcome::SideB, &rates(dec!(0.10))).unwrap();
        assert_eq!(plan.total_pot, 0);
        assert_eq!(plan.commission, 0);
        assert!(plan.positions.is_empty());
    }

    #[test]
    fn accepted_bet_yields_opposite_positions() {
        let bet = Bet {
            id: Uuid::new_v4(),
            creator_id: Uuid::new_v4(),
            acceptor_id: Some(Uuid::new_v4()),
            contest_id: Uuid::new_v4(),
            stake: 500,
            chosen_side: Side::SideB,
            status: BetStatus::Accepted,
            created_at: Utc::now(),
            accepted_at: Some(Utc::now()),
            settled_at: None,
            cancelled_at: None,
            cancellable_until: Utc::now(),
            actual_win: None,
        };
        let [creator, acceptor] = Position::from_bet(&bet).unwrap();
        assert_eq!(creator.side, Side::SideB);
        assert_eq!(acceptor.side, Side::SideA);
        assert_eq!(acceptor.holder, bet.acceptor_id.unwrap());

        let unmatched = Bet {
            acceptor_id: None,
            ..bet
        };
        assert!(Position::from_bet(&unmatched).is_err());
    }

    mod conservation {
        use super::*;
        use proptest::prelude::*;

        fn outcome() -> impl Strategy<Value = Outcome> {
            prop_oneof![Just(Outcome::SideA), Just(Outcome::SideB), Just(Outcome::Draw)]
        }

        proptest! {
            #[test]
            fn pot_is_fully_accounted(
                stakes in prop::collection::vec((any::<bool>(), 1u64..5_000_000), 0..40),
                outcome in outcome(),
                commission_bps in 0u32..=10_000,
                refund_bps in 0u32..=10_000,
            ) {
                let positions: Vec<Position> = stakes
                    .iter()
                    .map(|(a, stake)| position(if *a { Side::SideA } else { Side::SideB }, *stake))
                    .collect();
                let rates = DistributionRates {
                    commission_rate: Decimal::new(commission_bps as i64, 4),
                    draw_refund_rate: Decimal::new(refund_bps as i64, 4),
                };
                let plan = plan_distribution(&positions, outcome, &rates).unwrap();

                prop_assert_eq!(
                    plan.commission + plan.total_paid + plan.rounding_remainder,
                    plan.total_pot
                );
                prop_assert!(plan.total_paid <= plan.distributable);
                prop_assert_eq!(plan.positions.len(), positions.len());
                for p in &plan.positions {
                    match p.status {
                        BetStatus::Lost => prop_assert_eq!(p.credit, 0),
                        BetStatus::Refunded => prop_assert!(p.credit <= p.position.stake),
                        BetStatus::Won => prop_assert!(p.credit <= plan.distributable),
                        other => prop_assert!(false, "unexpected status {}", other),
                    }
                }
                if outcome != Outcome::Draw {
                    // dust is below one unit per winning position
                    let winners = plan
                        .positions
                        .iter()
                        .filter(|p| p.status == BetStatus::Won)
                        .count() as u64;
                    prop_assert!(plan.rounding_remainder <= winners);
                }
            }
        }
    }
}
