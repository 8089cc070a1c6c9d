//! Relational store backing the ledger.
//!
//! Every mutation runs inside one `BEGIN IMMEDIATE` SQLite transaction on a
//! fresh connection, so writers are serialized by the database itself and no
//! application-level lock is ever held. Lock waits are bounded by the busy
//! timeout, and a progress handler interrupts any statement that runs past the
//! transaction budget. Either way the whole transaction rolls back and the
//! caller sees [`LedgerError::Timeout`].

mod bets;
mod contests;
mod journal;
mod wallets;

use crate::error::{LedgerError, Result};
use crate::types::{Amount, PLATFORM_ACCOUNT};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use contests::ContestCounters;
pub use journal::NewTransaction;
pub use wallets::WalletDelta;

/// VM instructions between deadline checks.
const PROGRESS_OPS: i32 = 1_000;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id          TEXT PRIMARY KEY,
    username    TEXT NOT NULL UNIQUE,
    active      INTEGER NOT NULL DEFAULT 1,
    created_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS wallets (
    user_id         TEXT PRIMARY KEY REFERENCES users(id),
    balance         INTEGER NOT NULL DEFAULT 0 CHECK (balance >= 0),
    locked_balance  INTEGER NOT NULL DEFAULT 0 CHECK (locked_balance >= 0),
    total_won       INTEGER NOT NULL DEFAULT 0 CHECK (total_won >= 0),
    total_lost      INTEGER NOT NULL DEFAULT 0 CHECK (total_lost >= 0),
    updated_at      INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS contests (
    id                   TEXT PRIMARY KEY,
    side_a               TEXT NOT NULL,
    side_b               TEXT NOT NULL,
    start_time           INTEGER NOT NULL,
    status               TEXT NOT NULL,
    outcome              TEXT,
    distribution_status  TEXT NOT NULL DEFAULT 'NONE',
    distribution_error   TEXT,
    distribution_started_at INTEGER,
    pending_bets         INTEGER NOT NULL DEFAULT 0 CHECK (pending_bets >= 0),
    accepted_bets        INTEGER NOT NULL DEFAULT 0 CHECK (accepted_bets >= 0),
    total_staked         INTEGER NOT NULL DEFAULT 0 CHECK (total_staked >= 0),
    settled_at           INTEGER
);

CREATE TABLE IF NOT EXISTS bets (
    id                 TEXT PRIMARY KEY,
    creator_id         TEXT NOT NULL REFERENCES users(id),
    acceptor_id        TEXT REFERENCES users(id),
    contest_id         TEXT NOT NULL REFERENCES contests(id),
    stake              INTEGER NOT NULL CHECK (stake > 0),
    chosen_side        TEXT NOT NULL,
    status             TEXT NOT NULL,
    created_at         INTEGER NOT NULL,
    accepted_at        INTEGER,
    settled_at         INTEGER,
    cancelled_at       INTEGER,
    cancellable_until  INTEGER NOT NULL,
    actual_win         INTEGER,
    CHECK (acceptor_id IS NULL OR acceptor_id <> creator_id)
);

CREATE INDEX IF NOT EXISTS bets_by_contest ON bets (contest_id, status);
CREATE INDEX IF NOT EXISTS bets_by_creator ON bets (creator_id, status);

CREATE TABLE IF NOT EXISTS ledger_transactions (
    id          TEXT PRIMARY KEY,
    tx_type     TEXT NOT NULL,
    amount      INTEGER NOT NULL CHECK (amount >= 0),
    user_id     TEXT NOT NULL REFERENCES users(id),
    bet_id      TEXT REFERENCES bets(id),
    contest_id  TEXT REFERENCES contests(id),
    status      TEXT NOT NULL,
    reference   TEXT UNIQUE,
    notes       TEXT NOT NULL DEFAULT '',
    created_at  INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS ledger_by_user ON ledger_transactions (user_id, created_at);

CREATE TRIGGER IF NOT EXISTS ledger_confirmed_immutable
BEFORE UPDATE ON ledger_transactions
WHEN OLD.status = 'confirmed'
BEGIN
    SELECT RAISE(ABORT, 'confirmed ledger transactions are immutable');
END;

CREATE TRIGGER IF NOT EXISTS ledger_append_only
BEFORE DELETE ON ledger_transactions
BEGIN
    SELECT RAISE(ABORT, 'ledger transactions are append-only');
END;

CREATE TABLE IF NOT EXISTS commission_records (
    id                  TEXT PRIMARY KEY,
    contest_id          TEXT NOT NULL UNIQUE REFERENCES contests(id),
    bet_id              TEXT REFERENCES bets(id),
    amount              INTEGER NOT NULL CHECK (amount >= 0),
    percentage          TEXT NOT NULL,
    rounding_remainder  INTEGER NOT NULL DEFAULT 0,
    transaction_id      TEXT NOT NULL REFERENCES ledger_transactions(id),
    created_at          INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS audit_log (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    action      TEXT NOT NULL,
    entity      TEXT NOT NULL,
    entity_id   TEXT NOT NULL,
    actor       TEXT,
    details     TEXT NOT NULL,
    created_at  INTEGER NOT NULL
);
";

/// Handle to the ledger database. Cheap to clone; holds no connection.
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
    lock_wait: Duration,
}

/// One open store transaction. All wallet, bet, contest and journal mutations
/// hang off this type, so they can only happen inside a transaction.
pub struct LedgerTx<'c> {
    conn: &'c Connection,
}

impl Store {
    /// Opens (or creates) the database and applies the schema.
    pub fn open(path: impl AsRef<Path>, lock_wait: Duration) -> Result<Self> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
            lock_wait,
        };

        let conn = Connection::open(&store.path)?;
        conn.busy_timeout(lock_wait)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(SCHEMA)?;
        conn.execute(
            "INSERT OR IGNORE INTO users (id, username, active, created_at)
             VALUES (?1, 'platform', 1, 0)",
            [PLATFORM_ACCOUNT.to_string()],
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO wallets (user_id, updated_at) VALUES (?1, 0)",
            [PLATFORM_ACCOUNT.to_string()],
        )?;

        info!("Ledger store ready at {}", store.path.display());
        Ok(store)
    }

    pub(crate) fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.lock_wait)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    /// Runs `f` inside one serializable write transaction with the given budget.
    ///
    /// The transaction commits only if `f` returns `Ok` before the deadline.
    pub async fn run<T, F>(&self, budget: Duration, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&LedgerTx<'_>) -> Result<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.run_blocking(budget, f)).await?
    }

    /// Read-only snapshot. Never takes the write lock.
    pub async fn read<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&LedgerTx<'_>) -> Result<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = store.connect()?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
            let out = f(&LedgerTx { conn: &tx })?;
            tx.finish()?;
            Ok(out)
        })
        .await?
    }

    fn run_blocking<T, F>(&self, budget: Duration, f: F) -> Result<T>
    where
        F: FnOnce(&LedgerTx<'_>) -> Result<T>,
    {
        let started = Instant::now();
        let deadline = started + budget;

        let mut conn = self.connect()?;
        conn.progress_handler(PROGRESS_OPS, Some(move || Instant::now() >= deadline));

        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = f(&LedgerTx { conn: &tx });
        tx.progress_handler(0, None::<fn() -> bool>);

        match result {
            Ok(out) if Instant::now() < deadline => {
                tx.commit()?;
                debug!("Transaction committed in {:?}", started.elapsed());
                Ok(out)
            }
            Ok(_) => {
                if let Err(e) = tx.rollback() {
                    warn!("Rollback after budget overrun failed: {}", e);
                }
                warn!("Transaction exceeded its {:?} budget, rolled back", budget);
                Err(LedgerError::Timeout(format!(
                    "transaction exceeded its {:?} budget",
                    budget
                )))
            }
            Err(err) => {
                if let Err(e) = tx.rollback() {
                    warn!("Rollback failed: {}", e);
                }
                debug!("Transaction rolled back: {}", err);
                Err(err)
            }
        }
    }
}

impl<'c> LedgerTx<'c> {
    pub(crate) fn conn(&self) -> &Connection {
        self.conn
    }
}

pub(crate) fn sql_amount(amount: Amount) -> Result<i64> {
    i64::try_from(amount)
        .map_err(|_| LedgerError::Validation(format!("amount {} exceeds storable range", amount)))
}

pub(crate) fn millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn conversion_error(idx: usize, ty: Type, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, msg.into())
}

pub(crate) fn col_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, Type::Text, e.to_string()))
}

pub(crate) fn col_opt_uuid(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| Uuid::parse_str(&s).map_err(|e| conversion_error(idx, Type::Text, e.to_string())))
        .transpose()
}

pub(crate) fn col_amount(row: &Row<'_>, idx: usize) -> rusqlite::Result<Amount> {
    let raw: i64 = row.get(idx)?;
    Amount::try_from(raw).map_err(|e| conversion_error(idx, Type::Integer, e.to_string()))
}

pub(crate) fn col_opt_amount(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Amount>> {
    let raw: Option<i64> = row.get(idx)?;
    raw.map(|v| {
        Amount::try_from(v).map_err(|e| conversion_error(idx, Type::Integer, e.to_string()))
    })
    .transpose()
}

pub(crate) fn col_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: i64 = row.get(idx)?;
    Utc.timestamp_millis_opt(raw)
        .single()
        .ok_or_else(|| conversion_error(idx, Type::Integer, format!("bad timestamp {}", raw)))
}

pub(crate) fn col_opt_time(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<i64> = row.get(idx)?;
    match raw {
        Some(ms) => Utc
            .timestamp_millis_opt(ms)
            .single()
            .map(Some)
            .ok_or_else(|| conversion_error(idx, Type::Integer, format!("bad timestamp {}", ms))),
        None => Ok(None),
    }
}

pub(crate) fn col_enum<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, Type::Text, e))
}

pub(crate) fn col_opt_enum<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr<Err = String>,
{
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| s.parse().map_err(|e| conversion_error(idx, Type::Text, e)))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path().join("ledger.db"), Duration::from_secs(5)).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn failed_closure_rolls_back_everything() {
        let (_dir, store) = open_temp();
        let err = store
            .run(Duration::from_secs(5), |tx| {
                tx.conn().execute(
                    "INSERT INTO users (id, username, active, created_at)
                     VALUES ('x', 'ghost', 1, 0)",
                    [],
                )?;
                Err::<(), _>(LedgerError::Validation("abort".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        let count: i64 = store
            .read(|tx| {
                let sql = "SELECT COUNT(*) FROM users WHERE username = 'ghost'";
                Ok(tx.conn().query_row(sql, [], |r| r.get(0))?)
            })
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn overrunning_budget_times_out_and_rolls_back() {
        let (_dir, store) = open_temp();
        let err = store
            .run(Duration::from_millis(1), |tx| {
                tx.conn().execute(
                    "INSERT INTO users (id, username, active, created_at)
                     VALUES ('y', 'slow', 1, 0)",
                    [],
                )?;
                std::thread::sleep(Duration::from_millis(20));
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Timeout(_)));
        assert!(err.is_retryable());

        let count: i64 = store
            .read(|tx| {
                let sql = "SELECT COUNT(*) FROM users WHERE username = 'slow'";
                Ok(tx.conn().query_row(sql, [], |r| r.get(0))?)
            })
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn platform_wallet_exists_after_open() {
        let (_dir, store) = open_temp();
        let wallet = store
            .read(|tx| tx.wallet(PLATFORM_ACCOUNT))
            .await
            .unwrap();
        assert_eq!(wallet.balance, 0);
    }
}
