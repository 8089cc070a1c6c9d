use super::{col_amount, col_time, col_uuid, millis, sql_amount, LedgerTx};
use crate::error::{LedgerError, Result};
use crate::types::{Amount, User, UserId, Wallet};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

/// Signed change applied to one wallet row in a single conditional UPDATE.
///
/// The row is only touched if neither `balance` nor `locked_balance` would go
/// negative, so concurrent transactions compose without read-modify-write.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WalletDelta {
    pub balance: i64,
    pub locked: i64,
    pub won: i64,
    pub lost: i64,
}

impl WalletDelta {
    /// Moves `stake` from available to locked.
    pub fn lock(stake: Amount) -> Result<Self> {
        let stake = sql_amount(stake)?;
        Ok(Self {
            balance: -stake,
            locked: stake,
            ..Self::default()
        })
    }

    /// Releases `stake` from locked and credits `credit` to available.
    pub fn release(stake: Amount, credit: Amount) -> Result<Self> {
        Ok(Self {
            balance: sql_amount(credit)?,
            locked: -sql_amount(stake)?,
            ..Self::default()
        })
    }

    pub fn win(stake: Amount, payout: Amount) -> Result<Self> {
        let payout = sql_amount(payout)?;
        Ok(Self {
            balance: payout,
            locked: -sql_amount(stake)?,
            won: payout,
            lost: 0,
        })
    }

    /// Stake already left `balance` at lock time; only the lock is released.
    pub fn loss(stake: Amount) -> Result<Self> {
        let stake = sql_amount(stake)?;
        Ok(Self {
            locked: -stake,
            lost: stake,
            ..Self::default()
        })
    }

    pub fn credit(amount: Amount) -> Result<Self> {
        Ok(Self {
            balance: sql_amount(amount)?,
            ..Self::default()
        })
    }

    pub fn debit(amount: Amount) -> Result<Self> {
        Ok(Self {
            balance: -sql_amount(amount)?,
            ..Self::default()
        })
    }
}

impl LedgerTx<'_> {
    pub fn insert_user(&self, user: &User) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, username, active, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![user.id.to_string(), user.username, user.active, millis(user.created_at)],
        )?;
        self.conn().execute(
            "INSERT INTO wallets (user_id, updated_at) VALUES (?1, ?2)",
            params![user.id.to_string(), millis(user.created_at)],
        )?;
        Ok(())
    }

    pub fn username_taken(&self, username: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn()
            .query_row("SELECT 1 FROM users WHERE username = ?1", [username], |r| r.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    pub fn user(&self, user_id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, username, active, created_at FROM users WHERE id = ?1",
                [user_id.to_string()],
                |row| {
                    Ok(User {
                        id: col_uuid(row, 0)?,
                        username: row.get(1)?,
                        active: row.get(2)?,
                        created_at: col_time(row, 3)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| LedgerError::not_found("user", user_id))
    }

    pub fn set_user_active(&self, user_id: UserId, active: bool) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE users SET active = ?1 WHERE id = ?2",
            params![active, user_id.to_string()],
        )?;
        if changed == 0 {
            return Err(LedgerError::not_found("user", user_id));
        }
        Ok(())
    }

    pub fn wallet(&self, user_id: UserId) -> Result<Wallet> {
        self.conn()
            .query_row(
                "SELECT user_id, balance, locked_balance, total_won, total_lost, updated_at
                 FROM wallets WHERE user_id = ?1",
                [user_id.to_string()],
                |row| {
                    Ok(Wallet {
                        user_id: col_uuid(row, 0)?,
                        balance: col_amount(row, 1)?,
                        locked_balance: col_amount(row, 2)?,
                        total_won: col_amount(row, 3)?,
                        total_lost: col_amount(row, 4)?,
                        updated_at: col_time(row, 5)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| LedgerError::not_found("wallet", user_id))
    }

    /// Sum of `balance + locked_balance` over every wallet, platform included.
    pub fn total_holdings(&self) -> Result<Amount> {
        let total: i64 = self.conn().query_row(
            "SELECT COALESCE(SUM(balance + locked_balance), 0) FROM wallets",
            [],
            |r| r.get(0),
        )?;
        Amount::try_from(total).map_err(|_| LedgerError::Internal("negative holdings".into()))
    }

    /// Applies `delta` to the wallet, failing without any write if a guarded
    /// column would go negative.
    pub fn apply_wallet_delta(
        &self,
        user_id: UserId,
        delta: WalletDelta,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let changed = self.conn().execute(
            "UPDATE wallets
             SET balance = balance + ?1,
                 locked_balance = locked_balance + ?2,
                 total_won = total_won + ?3,
                 total_lost = total_lost + ?4,
                 updated_at = ?5
             WHERE user_id = ?6
               AND balance + ?1 >= 0
               AND locked_balance + ?2 >= 0",
            params![
                delta.balance,
                delta.locked,
                delta.won,
                delta.lost,
                millis(now),
                user_id.to_string()
            ],
        )?;

        if changed == 1 {
            return Ok(());
        }

        let wallet = self.wallet(user_id)?;
        if delta.balance < 0 && (wallet.balance as i128) + (delta.balance as i128) < 0 {
            return Err(LedgerError::InsufficientFunds {
                required: delta.balance.unsigned_abs(),
                available: wallet.balance,
            });
        }
        Err(LedgerError::Internal(format!(
            "locked balance of {} would go negative (locked {}, release {})",
            user_id,
            wallet.locked_balance,
            delta.locked.unsigned_abs()
        )))
    }
}
