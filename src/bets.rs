//! Bet lifecycle: create, accept, cancel and expiry refunds.
//!
//! Cheap precondition checks run on a read snapshot before any write lock is
//! taken. They are advisory only; every money movement is decided again
//! inside the write transaction by conditional updates.

use crate::clock::Clock;
use crate::config::Config;
use crate::effects::{AuditEntry, Effect, EffectDispatcher, LedgerEvent};
use crate::error::{LedgerError, Result};
use crate::store::{sql_amount, ContestCounters, LedgerTx, NewTransaction, Store, WalletDelta};
use crate::types::{
    Amount, Bet, BetId, BetStatus, ContestId, ContestStatus, LedgerTransaction, Side,
    TransactionType,
    UserId, PLATFORM_ACCOUNT,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Who asked for a cancellation. Drives the audit trail only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    Creator,
    Admin,
    Expired,
    ContestSettled,
}

impl CancelReason {
    fn as_str(&self) -> &'static str {
        match self {
            CancelReason::Creator => "creator",
            CancelReason::Admin => "admin",
            CancelReason::Expired => "expired",
            CancelReason::ContestSettled => "contest settled unmatched",
        }
    }
}

/// Outcome of refunding an open bet.
#[derive(Debug, Clone)]
pub struct Refund {
    pub bet: Bet,
    /// `(user, amount)` for every party whose lock was released.
    pub refunded: Vec<(UserId, Amount)>,
}

#[derive(Clone)]
pub struct BetController {
    store: Store,
    config: Config,
    clock: Arc<dyn Clock>,
    effects: EffectDispatcher,
}

impl BetController {
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

    pub async fn create_bet(
        &self,
        user_id: UserId,
        contest_id: ContestId,
        stake: Amount,
        chosen_side: Side,
    ) -> Result<Bet> {
        // 1. Cheap checks outside the write lock
        if stake == 0 {
            return Err(LedgerError::Validation("stake must be positive".into()));
        }
        sql_amount(stake)?;

        let now = self.clock.now();
        let (user, contest, pending) = self
            .store
            .read(move |tx| {
                Ok((
                    tx.user(user_id)?,
                    tx.contest(contest_id)?,
                    tx.count_pending_bets(user_id)?,
                ))
            })
            .await?;

        if !user.active {
            return Err(LedgerError::Forbidden(format!("user {} is not active", user_id)));
        }
        if contest.status != ContestStatus::Scheduled {
            return Err(LedgerError::Validation(format!(
                "contest {} is {} and not open for betting",
                contest_id, contest.status
            )));
        }
        if contest.start_time - now <= self.config.bet_lead_time() {
            return Err(LedgerError::Validation(format!(
                "contest starts within {} minutes; betting is closed",
                self.config.bet_lead_time_mins
            )));
        }
        if pending >= self.config.max_pending_bets {
            return Err(LedgerError::Validation(format!(
                "user already has {} pending bets (max {})",
                pending, self.config.max_pending_bets
            )));
        }

        // 2. Lock funds and open the bet atomically
        let bet = Bet {
            id: Uuid::new_v4(),
            creator_id: user_id,
            acceptor_id: None,
            contest_id,
            stake,
            chosen_side,
            status: BetStatus::Pending,
            created_at: now,
            accepted_at: None,
            settled_at: None,
            cancelled_at: None,
            cancellable_until: now + self.config.cancellable_window(),
            actual_win: None,
        };

        let row = bet.clone();
        let lock_line = self
            .store
            .run(self.config.bet_tx_timeout(), move |tx| {
                tx.apply_wallet_delta(user_id, WalletDelta::lock(stake)?, now)?;
                tx.insert_bet(&row)?;
                let line = tx.record_transaction(
                    NewTransaction::new(TransactionType::BetLock, user_id, stake)
                        .bet(row.id, contest_id)
                        .notes("stake locked at creation"),
                    now,
                )?;
                tx.adjust_contest_counters(contest_id, ContestCounters::bet_created(stake)?)?;
                Ok(line)
            })
            .await?;

        info!(
            "Bet {} created: {} staked {} on {} in {}",
            bet.id, user_id, stake, chosen_side, contest_id
        );

        // 3. Best-effort side effects
        let created = LedgerEvent::BetCreated {
            bet_id: bet.id,
            contest_id,
            stake,
            side: chosen_side,
        };
        self.effects.dispatch(vec![
            Effect::Audit(AuditEntry::new(
                "bet.create",
                "bet",
                bet.id,
                Some(user_id),
                json!({ "stake": stake, "side": chosen_side, "lock_transaction": lock_line.id }),
                now,
            )),
            Effect::notify(user_id, created.clone()),
            Effect::broadcast(created),
        ]);
        Ok(bet)
    }

    pub async fn accept_bet(&self, acceptor_id: UserId, bet_id: BetId) -> Result<Bet> {
        // 1. Cheap checks outside the write lock
        let now = self.clock.now();
        let (acceptor, bet) = self
            .store
            .read(move |tx| Ok((tx.user(acceptor_id)?, tx.bet(bet_id)?)))
            .await?;
        let contest_id = bet.contest_id;
        let contest = self.store.read(move |tx| tx.contest(contest_id)).await?;

        if bet.creator_id == acceptor_id {
            return Err(LedgerError::Validation("cannot accept your own bet".into()));
        }
        if !acceptor.active {
            return Err(LedgerError::Forbidden(format!("user {} is not active", acceptor_id)));
        }
        match bet.status {
            BetStatus::Pending => {}
            BetStatus::Accepted => return Err(LedgerError::AlreadyAccepted),
            other => return Err(LedgerError::transition(other, BetStatus::Accepted)),
        }
        if contest.status != ContestStatus::Scheduled
            || contest.start_time - now <= self.config.bet_lead_time()
        {
            return Err(LedgerError::Validation(format!(
                "contest {} no longer accepts matches",
                contest.id
            )));
        }

        // 2. Claim the bet, then lock the acceptor's matching stake. A failed
        // debit aborts the transaction and the bet stays PENDING.
        let stake = bet.stake;
        let accepted = self
            .store
            .run(self.config.bet_tx_timeout(), move |tx| {
                if !tx.try_accept_bet(bet_id, acceptor_id, now)? {
                    let current = tx.bet(bet_id)?;
                    return Err(match current.status {
                        BetStatus::Accepted => LedgerError::AlreadyAccepted,
                        other => LedgerError::transition(other, BetStatus::Accepted),
                    });
                }
                tx.apply_wallet_delta(acceptor_id, WalletDelta::lock(stake)?, now)?;
                tx.record_transaction(
                    NewTransaction::new(TransactionType::BetLock, acceptor_id, stake)
                        .bet(bet_id, contest_id)
                        .notes("matching stake locked at acceptance"),
                    now,
                )?;
                tx.adjust_contest_counters(contest_id, ContestCounters::bet_accepted(stake)?)?;
                tx.bet(bet_id)
            })
            .await?;

        info!("Bet {} accepted by {}", bet_id, acceptor_id);

        let event = LedgerEvent::BetAccepted {
            bet_id,
            contest_id,
            acceptor_id,
        };
        self.effects.dispatch(vec![
            Effect::Audit(AuditEntry::new(
                "bet.accept",
                "bet",
                bet_id,
                Some(acceptor_id),
                json!({ "stake": stake }),
                now,
            )),
            Effect::notify(accepted.creator_id, event.clone()),
            Effect::notify(acceptor_id, event),
        ]);
        Ok(accepted)
    }

    /// Cancels an unmatched bet and refunds its stake.
    ///
    /// Creators may cancel only after the cancel delay; admins bypass both the
    /// ownership and delay rules. Nobody cancels once the contest started.
    pub async fn cancel_bet(
        &self,
        bet_id: BetId,
        requester_id: UserId,
        is_admin: bool,
    ) -> Result<Bet> {
        let now = self.clock.now();
        let bet = self.store.read(move |tx| tx.bet(bet_id)).await?;
        let contest_id = bet.contest_id;
        let contest = self.store.read(move |tx| tx.contest(contest_id)).await?;

        if bet.status != BetStatus::Pending {
            return Err(LedgerError::transition(bet.status, BetStatus::Cancelled));
        }
        if !is_admin {
            if bet.creator_id != requester_id {
                return Err(LedgerError::Forbidden("only the creator can cancel this bet".into()));
            }
            let allowed_from = bet.created_at + self.config.creator_cancel_delay();
            if now < allowed_from {
                return Err(LedgerError::Forbidden(format!(
                    "bet can be cancelled from {}",
                    allowed_from
                )));
            }
        }
        if now >= contest.start_time {
            return Err(LedgerError::Validation(format!(
                "contest {} has already started",
                contest_id
            )));
        }

        let reason = if is_admin { CancelReason::Admin } else { CancelReason::Creator };
        let refund = self
            .store
            .run(self.config.bet_tx_timeout(), move |tx| refund_open_bet(tx, bet_id, reason, now))
            .await?;

        info!("Bet {} cancelled by {} ({})", bet_id, requester_id, reason.as_str());
        self.effects.dispatch(refund_effects(&refund, Some(requester_id), reason, now));
        Ok(refund.bet)
    }

    /// Sweeper path: refunds a PENDING bet whose contest is about to start,
    /// has started, or no longer takes bets. The platform is the requester.
    pub async fn expire_bet(&self, bet_id: BetId) -> Result<Bet> {
        let now = self.clock.now();
        let cutoff = now + self.config.bet_lead_time();
        let refund = self
            .store
            .run(self.config.bet_tx_timeout(), move |tx| {
                let bet = tx.bet(bet_id)?;
                let contest = tx.contest(bet.contest_id)?;
                if contest.status == ContestStatus::Scheduled && contest.start_time > cutoff {
                    return Err(LedgerError::Validation(format!(
                        "bet {} is not expiring yet",
                        bet_id
                    )));
                }
                refund_open_bet(tx, bet_id, CancelReason::Expired, now)
            })
            .await?;

        info!("Bet {} expired unmatched; refunded {}", bet_id, refund.bet.stake);
        self.effects.dispatch(refund_effects(
            &refund,
            Some(PLATFORM_ACCOUNT),
            CancelReason::Expired,
            now,
        ));
        Ok(refund.bet)
    }

    /// One page of expiring bets, skipping the first `offset` candidates.
    pub async fn expiring_bets(&self, limit: u32, offset: u32) -> Result<Vec<Bet>> {
        let cutoff = self.clock.now() + self.config.bet_lead_time();
        self.store
            .read(move |tx| tx.expiring_bets(cutoff, limit, offset))
            .await
    }

    pub async fn bet(&self, bet_id: BetId) -> Result<Bet> {
        self.store.read(move |tx| tx.bet(bet_id)).await
    }

    /// PENDING bets on a contest, newest first.
    pub async fn open_bets(&self, contest_id: ContestId) -> Result<Vec<Bet>> {
        self.store
            .read(move |tx| tx.contest_bets(contest_id, BetStatus::Pending))
            .await
    }

    pub async fn bets_for_user(&self, user_id: UserId) -> Result<Vec<Bet>> {
        self.store.read(move |tx| tx.user_bets(user_id)).await
    }

    pub async fn bet_transactions(&self, bet_id: BetId) -> Result<Vec<LedgerTransaction>> {
        self.store.read(move |tx| tx.bet_transactions(bet_id)).await
    }
}

/// PENDING -> CANCELLED with the stake moved from locked back to available.
///
/// Shared by user/admin cancellation, the expiry sweeper and settlement of
/// contests that still have unmatched bets. Must run inside a write transaction.
pub(crate) fn refund_open_bet(
    tx: &LedgerTx<'_>,
    bet_id: BetId,
    reason: CancelReason,
    now: DateTime<Utc>,
) -> Result<Refund> {
    let bet = tx.bet(bet_id)?;
    if !tx.try_cancel_bet(bet_id, now)? {
        return Err(LedgerError::transition(bet.status, BetStatus::Cancelled));
    }

    // An unmatched bet only ever locked the creator's stake; the acceptor arm
    // covers a PENDING row that somehow carries an acceptor.
    let mut refunded = vec![(bet.creator_id, bet.stake)];
    if let Some(acceptor_id) = bet.acceptor_id {
        warn!("Cancelling bet {} that carries acceptor {}", bet_id, acceptor_id);
        refunded.push((acceptor_id, bet.stake));
    }

    let mut total: Amount = 0;
    for (user_id, amount) in &refunded {
        tx.apply_wallet_delta(*user_id, WalletDelta::release(*amount, *amount)?, now)?;
        tx.record_transaction(
            NewTransaction::new(TransactionType::BetRefund, *user_id, *amount)
                .bet(bet_id, bet.contest_id)
                .notes(format!("cancelled: {}", reason.as_str())),
            now,
        )?;
        total = total
            .checked_add(*amount)
            .ok_or_else(|| LedgerError::Internal("refund total overflow".into()))?;
    }

    tx.adjust_contest_counters(bet.contest_id, ContestCounters::bet_cancelled(total)?)?;

    Ok(Refund {
        bet: tx.bet(bet_id)?,
        refunded,
    })
}

pub(crate) fn refund_effects(
    refund: &Refund,
    actor: Option<UserId>,
    reason: CancelReason,
    now: DateTime<Utc>,
) -> Vec<Effect> {
    let mut effects = vec![Effect::Audit(AuditEntry::new(
        "bet.cancel",
        "bet",
        refund.bet.id,
        actor,
        json!({ "reason": reason.as_str(), "refunded": refund.refunded }),
        now,
    ))];
    for (user_id, amount) in &refund.refunded {
        effects.push(Effect::notify(
            *user_id,
            LedgerEvent::BetCancelled {
                bet_id: refund.bet.id,
                refunded: *amount,
            },
        ));
    }
    effects
}
