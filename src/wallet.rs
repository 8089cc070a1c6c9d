use crate::clock::Clock;
use crate::config::Config;
use crate::effects::{AuditEntry, Effect, EffectDispatcher};
use crate::error::{LedgerError, Result};
use crate::store::{NewTransaction, Store, WalletDelta};
use crate::types::{Amount, LedgerTransaction, TransactionType, User, UserId, Wallet};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

const MAX_USERNAME_LEN: usize = 64;

/// User accounts and the gateway-facing wallet primitives.
///
/// Deposits and withdrawals are keyed by the payment provider's reference:
/// replaying a confirmation callback returns the original ledger line and
/// moves no money.
#[derive(Clone)]
pub struct WalletService {
    store: Store,
    clock: Arc<dyn Clock>,
    effects: EffectDispatcher,
    tx_budget: Duration,
}

impl WalletService {
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

    /// Creates an active user together with an empty wallet.
    pub async fn register_user(&self, username: &str) -> Result<User> {
        let username = username.trim().to_string();
        if username.is_empty() || username.len() > MAX_USERNAME_LEN {
            return Err(LedgerError::Validation(format!(
                "username must be 1..={} characters",
                MAX_USERNAME_LEN
            )));
        }

        let user = User {
            id: Uuid::new_v4(),
            username,
            active: true,
            created_at: self.clock.now(),
        };

        let created = user.clone();
        self.store
            .run(self.tx_budget, move |tx| {
                if tx.username_taken(&created.username)? {
                    return Err(LedgerError::Validation(format!(
                        "username {} is taken",
                        created.username
                    )));
                }
                tx.insert_user(&created)
            })
            .await?;

        info!("Registered user {} ({})", user.username, user.id);
        self.effects.dispatch(vec![Effect::Audit(AuditEntry::new(
            "user.register",
            "user",
            user.id,
            Some(user.id),
            json!({ "username": user.username }),
            user.created_at,
        ))]);
        Ok(user)
    }

    pub async fn set_user_active(&self, user_id: UserId, active: bool) -> Result<()> {
        self.store
            .run(self.tx_budget, move |tx| tx.set_user_active(user_id, active))
            .await?;
        info!("User {} active={}", user_id, active);
        self.effects.dispatch(vec![Effect::Audit(AuditEntry::new(
            "user.set_active",
            "user",
            user_id,
            None,
            json!({ "active": active }),
            self.clock.now(),
        ))]);
        Ok(())
    }

    pub async fn deposit(
        &self,
        user_id: UserId,
        amount: Amount,
        reference: &str,
    ) -> Result<LedgerTransaction> {
        self.move_funds(TransactionType::Deposit, user_id, amount, reference).await
    }

    pub async fn withdraw(
        &self,
        user_id: UserId,
        amount: Amount,
        reference: &str,
    ) -> Result<LedgerTransaction> {
        self.move_funds(TransactionType::Withdrawal, user_id, amount, reference).await
    }

    async fn move_funds(
        &self,
        tx_type: TransactionType,
        user_id: UserId,
        amount: Amount,
        reference: &str,
    ) -> Result<LedgerTransaction> {
        if amount == 0 {
            return Err(LedgerError::Validation("amount must be positive".into()));
        }
        let reference = reference.trim().to_string();
        if reference.is_empty() {
            return Err(LedgerError::Validation("payment reference is required".into()));
        }

        let now = self.clock.now();
        let (line, replayed) = self
            .store
            .run(self.tx_budget, move |tx| {
                if let Some(existing) = tx.transaction_by_reference(&reference)? {
                    if existing.user_id != user_id
                        || existing.tx_type != tx_type
                        || existing.amount != amount
                    {
                        return Err(LedgerError::Validation(format!(
                            "reference {} already used for a different movement",
                            reference
                        )));
                    }
                    return Ok((existing, true));
                }

                let delta = match tx_type {
                    TransactionType::Deposit => WalletDelta::credit(amount)?,
                    _ => WalletDelta::debit(amount)?,
                };
                tx.apply_wallet_delta(user_id, delta, now)?;
                let line = tx.record_transaction(
                    NewTransaction::new(tx_type, user_id, amount)
                        .reference(reference)
                        .notes(format!("gateway {}", tx_type)),
                    now,
                )?;
                Ok((line, false))
            })
            .await?;

        if replayed {
            warn!(
                "Replayed {} callback for reference {:?}; no funds moved",
                tx_type, line.reference
            );
            return Ok(line);
        }

        info!("{} of {} for {} confirmed", tx_type, amount, user_id);
        self.effects.dispatch(vec![Effect::Audit(AuditEntry::new(
            &format!("wallet.{}", tx_type),
            "wallet",
            user_id,
            Some(user_id),
            json!({ "amount": amount, "reference": line.reference, "transaction_id": line.id }),
            now,
        ))]);
        Ok(line)
    }

    pub async fn wallet(&self, user_id: UserId) -> Result<Wallet> {
        self.store.read(move |tx| tx.wallet(user_id)).await
    }

    pub async fn user(&self, user_id: UserId) -> Result<User> {
        self.store.read(move |tx| tx.user(user_id)).await
    }

    pub async fn transactions(&self, user_id: UserId) -> Result<Vec<LedgerTransaction>> {
        self.store.read(move |tx| tx.user_transactions(user_id)).await
    }

    /// Sum of available plus locked funds across all wallets.
    pub async fn total_holdings(&self) -> Result<Amount> {
        self.store.read(|tx| tx.total_holdings()).await
    }
}
