use super::{
    col_amount, col_enum, col_opt_enum, col_opt_time, col_time, col_uuid, millis, sql_amount,
    LedgerTx,
};
use crate::error::{LedgerError, Result};
use crate::types::{Amount, Contest, ContestId, ContestStatus, DistributionStatus, Outcome};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

const CONTEST_COLUMNS: &str = "id, side_a, side_b, start_time, status, outcome, distribution_status,
     distribution_error, pending_bets, accepted_bets, total_staked, settled_at";

fn contest_from_row(row: &Row<'_>) -> rusqlite::Result<Contest> {
    Ok(Contest {
        id: col_uuid(row, 0)?,
        side_a: row.get(1)?,
        side_b: row.get(2)?,
        start_time: col_time(row, 3)?,
        status: col_enum(row, 4)?,
        outcome: col_opt_enum(row, 5)?,
        distribution_status: col_enum(row, 6)?,
        distribution_error: row.get(7)?,
        pending_bets: col_amount(row, 8)?,
        accepted_bets: col_amount(row, 9)?,
        total_staked: col_amount(row, 10)?,
        settled_at: col_opt_time(row, 11)?,
    })
}

/// Signed change to a contest's aggregate counters.
#[derive(Debug, Default, Clone, Copy)]
pub struct ContestCounters {
    pub pending: i64,
    pub accepted: i64,
    pub staked: i64,
}

impl ContestCounters {
    pub fn bet_created(stake: Amount) -> Result<Self> {
        Ok(Self {
            pending: 1,
            accepted: 0,
            staked: sql_amount(stake)?,
        })
    }

    pub fn bet_accepted(stake: Amount) -> Result<Self> {
        Ok(Self {
            pending: -1,
            accepted: 1,
            staked: sql_amount(stake)?,
        })
    }

    pub fn bet_cancelled(stake: Amount) -> Result<Self> {
        Ok(Self {
            pending: -1,
            accepted: 0,
            staked: -sql_amount(stake)?,
        })
    }
}

impl LedgerTx<'_> {
    pub fn insert_contest(&self, contest: &Contest) -> Result<()> {
        self.conn().execute(
            "INSERT INTO contests (id, side_a, side_b, start_time, status, outcome,
                                   distribution_status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                contest.id.to_string(),
                contest.side_a,
                contest.side_b,
                millis(contest.start_time),
                contest.status.as_str(),
                contest.outcome.map(|o| o.as_str()),
                contest.distribution_status.as_str(),
            ],
        )?;
        Ok(())
    }

    pub fn contest(&self, contest_id: ContestId) -> Result<Contest> {
        self.conn()
            .query_row(
                &format!("SELECT {} FROM contests WHERE id = ?1", CONTEST_COLUMNS),
                [contest_id.to_string()],
                contest_from_row,
            )
            .optional()?
            .ok_or_else(|| LedgerError::not_found("contest", contest_id))
    }

    pub fn contests_with_distribution(&self, status: DistributionStatus) -> Result<Vec<Contest>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {} FROM contests WHERE distribution_status = ?1 ORDER BY start_time",
            CONTEST_COLUMNS
        ))?;
        let rows = stmt.query_map([status.as_str()], contest_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Moves the contest to `to` only if it is currently in one of `from`.
    pub fn try_set_contest_status(
        &self,
        contest_id: ContestId,
        from: &[ContestStatus],
        to: ContestStatus,
    ) -> Result<bool> {
        let allowed: Vec<&str> = from.iter().map(|s| s.as_str()).collect();
        let changed = self.conn().execute(
            "UPDATE contests SET status = ?1
             WHERE id = ?2 AND status IN (SELECT value FROM json_each(?3))",
            params![
                to.as_str(),
                contest_id.to_string(),
                serde_json::to_string(&allowed).map_err(|e| LedgerError::Internal(e.to_string()))?
            ],
        )?;
        Ok(changed == 1)
    }

    pub fn adjust_contest_counters(
        &self,
        contest_id: ContestId,
        delta: ContestCounters,
    ) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE contests
             SET pending_bets = pending_bets + ?1,
                 accepted_bets = accepted_bets + ?2,
                 total_staked = total_staked + ?3
             WHERE id = ?4",
            params![delta.pending, delta.accepted, delta.staked, contest_id.to_string()],
        )?;
        if changed == 0 {
            return Err(LedgerError::not_found("contest", contest_id));
        }
        Ok(())
    }

    /// Distribution guard: NONE|FAILED -> PROCESSING. Returns whether this
    /// caller now owns the distribution.
    pub fn try_begin_distribution(
        &self,
        contest_id: ContestId,
        outcome: Outcome,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let changed = self.conn().execute(
            "UPDATE contests
             SET distribution_status = 'PROCESSING', outcome = ?1, distribution_error = NULL,
                 distribution_started_at = ?2
             WHERE id = ?3 AND distribution_status IN ('NONE', 'FAILED') AND status <> 'cancelled'",
            params![outcome.as_str(), millis(now), contest_id.to_string()],
        )?;
        Ok(changed == 1)
    }

    /// Releases PROCESSING claims taken at or before `cutoff` to FAILED.
    ///
    /// Settlement is applied in a single transaction, so a claim still
    /// PROCESSING past its budget moved no money and is safe to retry.
    pub fn fail_stalled_distributions(
        &self,
        cutoff: DateTime<Utc>,
        reason: &str,
    ) -> Result<Vec<ContestId>> {
        let mut stmt = self.conn().prepare(
            "SELECT id FROM contests
             WHERE distribution_status = 'PROCESSING'
               AND COALESCE(distribution_started_at, 0) <= ?1
             ORDER BY start_time",
        )?;
        let stalled = stmt
            .query_map([millis(cutoff)], |row| col_uuid(row, 0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut released = Vec::with_capacity(stalled.len());
        for contest_id in stalled {
            if self.fail_distribution(contest_id, reason)? {
                released.push(contest_id);
            }
        }
        Ok(released)
    }

    pub fn complete_distribution(&self, contest_id: ContestId, now: DateTime<Utc>) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE contests
             SET distribution_status = 'COMPLETED', status = 'finished', settled_at = ?1,
                 pending_bets = 0, accepted_bets = 0
             WHERE id = ?2 AND distribution_status = 'PROCESSING'",
            params![millis(now), contest_id.to_string()],
        )?;
        if changed == 0 {
            return Err(LedgerError::Internal(format!(
                "contest {} left PROCESSING during distribution",
                contest_id
            )));
        }
        Ok(())
    }

    pub fn fail_distribution(&self, contest_id: ContestId, reason: &str) -> Result<bool> {
        let changed = self.conn().execute(
            "UPDATE contests SET distribution_status = 'FAILED', distribution_error = ?1
             WHERE id = ?2 AND distribution_status = 'PROCESSING'",
            params![reason, contest_id.to_string()],
        )?;
        Ok(changed == 1)
    }
}
