use super::{
    col_amount, col_enum, col_opt_amount, col_opt_time, col_opt_uuid, col_time, col_uuid, millis,
    sql_amount, LedgerTx,
};
use crate::error::{LedgerError, Result};
use crate::types::{Amount, Bet, BetId, BetStatus, ContestId, UserId};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

const BET_COLUMNS: &str = "b.id, b.creator_id, b.acceptor_id, b.contest_id, b.stake, b.chosen_side,
     b.status, b.created_at, b.accepted_at, b.settled_at, b.cancelled_at,
     b.cancellable_until, b.actual_win";

fn bet_from_row(row: &Row<'_>) -> rusqlite::Result<Bet> {
    Ok(Bet {
        id: col_uuid(row, 0)?,
        creator_id: col_uuid(row, 1)?,
        acceptor_id: col_opt_uuid(row, 2)?,
        contest_id: col_uuid(row, 3)?,
        stake: col_amount(row, 4)?,
        chosen_side: col_enum(row, 5)?,
        status: col_enum(row, 6)?,
        created_at: col_time(row, 7)?,
        accepted_at: col_opt_time(row, 8)?,
        settled_at: col_opt_time(row, 9)?,
        cancelled_at: col_opt_time(row, 10)?,
        cancellable_until: col_time(row, 11)?,
        actual_win: col_opt_amount(row, 12)?,
    })
}

impl LedgerTx<'_> {
    pub fn insert_bet(&self, bet: &Bet) -> Result<()> {
        self.conn().execute(
            "INSERT INTO bets (id, creator_id, acceptor_id, contest_id, stake, chosen_side,
                               status, created_at, accepted_at, settled_at, cancelled_at,
                               cancellable_until, actual_win)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                bet.id.to_string(),
                bet.creator_id.to_string(),
                bet.acceptor_id.map(|id| id.to_string()),
                bet.contest_id.to_string(),
                sql_amount(bet.stake)?,
                bet.chosen_side.as_str(),
                bet.status.as_str(),
                millis(bet.created_at),
                bet.accepted_at.map(millis),
                bet.settled_at.map(millis),
                bet.cancelled_at.map(millis),
                millis(bet.cancellable_until),
                bet.actual_win.map(sql_amount).transpose()?,
            ],
        )?;
        Ok(())
    }

    pub fn bet(&self, bet_id: BetId) -> Result<Bet> {
        self.conn()
            .query_row(
                &format!("SELECT {} FROM bets b WHERE b.id = ?1", BET_COLUMNS),
                [bet_id.to_string()],
                bet_from_row,
            )
            .optional()?
            .ok_or_else(|| LedgerError::not_found("bet", bet_id))
    }

    /// Single-statement compare-and-swap: assigns the acceptor only if the bet
    /// is still PENDING with no acceptor. Returns whether this caller won.
    pub fn try_accept_bet(
        &self,
        bet_id: BetId,
        acceptor_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let changed = self.conn().execute(
            "UPDATE bets
             SET acceptor_id = ?1, status = 'ACCEPTED', accepted_at = ?2
             WHERE id = ?3 AND status = 'PENDING' AND acceptor_id IS NULL",
            params![acceptor_id.to_string(), millis(now), bet_id.to_string()],
        )?;
        Ok(changed == 1)
    }

    /// PENDING -> CANCELLED. Returns false if the bet already left PENDING.
    pub fn try_cancel_bet(&self, bet_id: BetId, now: DateTime<Utc>) -> Result<bool> {
        let changed = self.conn().execute(
            "UPDATE bets SET status = 'CANCELLED', cancelled_at = ?1
             WHERE id = ?2 AND status = 'PENDING'",
            params![millis(now), bet_id.to_string()],
        )?;
        Ok(changed == 1)
    }

    /// ACCEPTED -> terminal settlement status. Returns false if already settled.
    pub fn try_settle_bet(
        &self,
        bet_id: BetId,
        status: BetStatus,
        actual_win: Option<Amount>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        if !BetStatus::Accepted.can_transition_to(status) {
            return Err(LedgerError::transition(BetStatus::Accepted, status));
        }
        let changed = self.conn().execute(
            "UPDATE bets SET status = ?1, actual_win = ?2, settled_at = ?3
             WHERE id = ?4 AND status = 'ACCEPTED'",
            params![
                status.as_str(),
                actual_win.map(sql_amount).transpose()?,
                millis(now),
                bet_id.to_string()
            ],
        )?;
        Ok(changed == 1)
    }

    pub fn count_pending_bets(&self, creator_id: UserId) -> Result<u32> {
        let count: u32 = self.conn().query_row(
            "SELECT COUNT(*) FROM bets WHERE creator_id = ?1 AND status = 'PENDING'",
            [creator_id.to_string()],
            |r| r.get(0),
        )?;
        Ok(count)
    }

    pub fn contest_bets(&self, contest_id: ContestId, status: BetStatus) -> Result<Vec<Bet>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {} FROM bets b WHERE b.contest_id = ?1 AND b.status = ?2
             ORDER BY b.created_at DESC, b.id",
            BET_COLUMNS
        ))?;
        let rows = stmt.query_map(params![contest_id.to_string(), status.as_str()], bet_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn user_bets(&self, user_id: UserId) -> Result<Vec<Bet>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {} FROM bets b WHERE b.creator_id = ?1 OR b.acceptor_id = ?1
             ORDER BY b.created_at DESC, b.id",
            BET_COLUMNS
        ))?;
        let rows = stmt.query_map([user_id.to_string()], bet_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// PENDING bets whose contest starts at or before `cutoff`, or whose
    /// contest no longer accepts bets at all. Ordered for stable paging.
    pub fn expiring_bets(
        &self,
        cutoff: DateTime<Utc>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Bet>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {} FROM bets b JOIN contests c ON c.id = b.contest_id
             WHERE b.status = 'PENDING'
               AND (c.start_time <= ?1 OR c.status <> 'scheduled')
             ORDER BY c.start_time, b.created_at, b.id
             LIMIT ?2 OFFSET ?3",
            BET_COLUMNS
        ))?;
        let rows = stmt.query_map(params![millis(cutoff), limit, offset], bet_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
