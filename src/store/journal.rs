use super::{col_amount, col_enum, col_opt_uuid, col_time, col_uuid, millis, sql_amount, LedgerTx};
use crate::error::{LedgerError, Result};
use crate::types::{
    Amount, BetId, CommissionRecord, ContestId, LedgerTransaction, TransactionStatus,
    TransactionType,
    UserId,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use rust_decimal::Decimal;
use std::str::FromStr;
use uuid::Uuid;

const TX_COLUMNS: &str =
    "id, tx_type, amount, user_id, bet_id, contest_id, status, reference, notes, created_at";

const COMMISSION_COLUMNS: &str =
    "id, contest_id, bet_id, amount, percentage, rounding_remainder, transaction_id, created_at";

/// Fields of a ledger line the caller chooses; id, status and time are filled in.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub tx_type: TransactionType,
    pub amount: Amount,
    pub user_id: UserId,
    pub bet_id: Option<BetId>,
    pub contest_id: Option<ContestId>,
    pub reference: Option<String>,
    pub notes: String,
}

impl NewTransaction {
    pub fn new(tx_type: TransactionType, user_id: UserId, amount: Amount) -> Self {
        Self {
            tx_type,
            amount,
            user_id,
            bet_id: None,
            contest_id: None,
            reference: None,
            notes: String::new(),
        }
    }

    pub fn bet(mut self, bet_id: BetId, contest_id: ContestId) -> Self {
        self.bet_id = Some(bet_id);
        self.contest_id = Some(contest_id);
        self
    }

    pub fn contest(mut self, contest_id: ContestId) -> Self {
        self.contest_id = Some(contest_id);
        self
    }

    pub fn reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }
}

fn transaction_from_row(row: &Row<'_>) -> rusqlite::Result<LedgerTransaction> {
    Ok(LedgerTransaction {
        id: col_uuid(row, 0)?,
        tx_type: col_enum(row, 1)?,
        amount: col_amount(row, 2)?,
        user_id: col_uuid(row, 3)?,
        bet_id: col_opt_uuid(row, 4)?,
        contest_id: col_opt_uuid(row, 5)?,
        status: col_enum(row, 6)?,
        reference: row.get(7)?,
        notes: row.get(8)?,
        created_at: col_time(row, 9)?,
    })
}

fn commission_from_row(row: &Row<'_>) -> rusqlite::Result<CommissionRecord> {
    let raw_pct: String = row.get(4)?;
    let percentage = Decimal::from_str(&raw_pct).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(CommissionRecord {
        id: col_uuid(row, 0)?,
        contest_id: col_uuid(row, 1)?,
        bet_id: col_opt_uuid(row, 2)?,
        amount: col_amount(row, 3)?,
        percentage,
        rounding_remainder: col_amount(row, 5)?,
        transaction_id: col_uuid(row, 6)?,
        created_at: col_time(row, 7)?,
    })
}

impl LedgerTx<'_> {
    /// Appends a confirmed ledger line. Lines are never updated afterwards.
    pub fn record_transaction(
        &self,
        new: NewTransaction,
        now: DateTime<Utc>,
    ) -> Result<LedgerTransaction> {
        let line = LedgerTransaction {
            id: Uuid::new_v4(),
            tx_type: new.tx_type,
            amount: new.amount,
            user_id: new.user_id,
            bet_id: new.bet_id,
            contest_id: new.contest_id,
            status: TransactionStatus::Confirmed,
            reference: new.reference,
            notes: new.notes,
            created_at: now,
        };

        self.conn().execute(
            "INSERT INTO ledger_transactions (id, tx_type, amount, user_id, bet_id, contest_id,
                                             status, reference, notes, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                line.id.to_string(),
                line.tx_type.as_str(),
                sql_amount(line.amount)?,
                line.user_id.to_string(),
                line.bet_id.map(|id| id.to_string()),
                line.contest_id.map(|id| id.to_string()),
                line.status.as_str(),
                line.reference,
                line.notes,
                millis(line.created_at),
            ],
        )?;
        Ok(line)
    }

    pub fn transaction_by_reference(&self, reference: &str) -> Result<Option<LedgerTransaction>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {} FROM ledger_transactions WHERE reference = ?1", TX_COLUMNS),
                [reference],
                transaction_from_row,
            )
            .optional()?)
    }

    pub fn user_transactions(&self, user_id: UserId) -> Result<Vec<LedgerTransaction>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {} FROM ledger_transactions WHERE user_id = ?1 ORDER BY created_at, rowid",
            TX_COLUMNS
        ))?;
        let rows = stmt.query_map([user_id.to_string()], transaction_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn bet_transactions(&self, bet_id: BetId) -> Result<Vec<LedgerTransaction>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {} FROM ledger_transactions WHERE bet_id = ?1 ORDER BY created_at, rowid",
            TX_COLUMNS
        ))?;
        let rows = stmt.query_map([bet_id.to_string()], transaction_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn insert_commission(&self, record: &CommissionRecord) -> Result<()> {
        self.conn().execute(
            "INSERT INTO commission_records (id, contest_id, bet_id, amount, percentage,
                                            rounding_remainder, transaction_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.id.to_string(),
                record.contest_id.to_string(),
                record.bet_id.map(|id| id.to_string()),
                sql_amount(record.amount)?,
                record.percentage.to_string(),
                sql_amount(record.rounding_remainder)?,
                record.transaction_id.to_string(),
                millis(record.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn contest_commission(&self, contest_id: ContestId) -> Result<Option<CommissionRecord>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {} FROM commission_records WHERE contest_id = ?1",
                    COMMISSION_COLUMNS
                ),
                [contest_id.to_string()],
                commission_from_row,
            )
            .optional()?)
    }

    pub fn commission_records(&self) -> Result<Vec<CommissionRecord>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {} FROM commission_records ORDER BY created_at, rowid",
            COMMISSION_COLUMNS
        ))?;
        let rows = stmt.query_map([], commission_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn total_commission(&self) -> Result<Amount> {
        let total: i64 = self.conn().query_row(
            "SELECT COALESCE(SUM(amount), 0) FROM commission_records",
            [],
            |r| r.get(0),
        )?;
        Amount::try_from(total)
            .map_err(|_| LedgerError::Internal("negative commission total".into()))
    }
}
