#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use wager_ledger::audit::SqliteAuditLog;
use wager_ledger::clock::{Clock, ManualClock};
use wager_ledger::effects::{EffectDispatcher, LedgerEvent, Notification, Recipient};
use wager_ledger::notify::Notifier;
use wager_ledger::types::{Amount, Contest, User};
use wager_ledger::{
    BetController, CommissionLedger, Config, ContestBook, DistributionEngine, ExpirySweeper, Store,
    WalletService,
};

#[derive(Default, Clone)]
pub struct RecordingNotifier {
    seen: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn events_for(&self, user_id: uuid::Uuid) -> Vec<LedgerEvent> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.recipient == Recipient::User(user_id))
            .map(|n| n.event.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
        self.seen.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

pub struct Harness {
    _dir: TempDir,
    pub config: Config,
    pub clock: ManualClock,
    shared_clock: Arc<dyn Clock>,
    pub store: Store,
    pub notifier: RecordingNotifier,
    pub audit: SqliteAuditLog,
    effects: EffectDispatcher,
    pub wallets: WalletService,
    pub contests: ContestBook,
    pub bets: BetController,
    pub engine: DistributionEngine,
    pub commission: CommissionLedger,
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_commission(rate: Decimal) -> Self {
        Self::with_config(Config {
            commission_rate: rate,
            ..Config::default()
        })
    }

    pub fn with_config(mut config: Config) -> Self {
        let dir = TempDir::new().unwrap();
        config.db_path = dir.path().join("ledger.db");

        let store = Store::open(&config.db_path, config.lock_wait_timeout()).unwrap();
        let clock = ManualClock::new(start_time());
        let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
        let notifier = RecordingNotifier::default();
        let audit = SqliteAuditLog::new(store.clone());
        let (effects, _worker) = EffectDispatcher::spawn(
            Arc::new(notifier.clone()),
            Arc::new(audit.clone()),
            config.effect_buffer,
        );

        let wallets =
            WalletService::new(store.clone(), &config, shared_clock.clone(), effects.clone());
        let contests =
            ContestBook::new(store.clone(), &config, shared_clock.clone(), effects.clone());
        let bets = BetController::new(
            store.clone(),
            config.clone(),
            shared_clock.clone(),
            effects.clone(),
        );
        let engine = DistributionEngine::new(
            store.clone(),
            config.clone(),
            shared_clock.clone(),
            effects.clone(),
        );

        Self {
            _dir: dir,
            commission: CommissionLedger::new(store.clone()),
            config,
            clock,
            shared_clock,
            store,
            notifier,
            audit,
            effects,
            wallets,
            contests,
            bets,
            engine,
        }
    }

    /// A second engine over the same ledger with different budgets.
    pub fn engine_with(&self, config: Config) -> DistributionEngine {
        let config = Config {
            db_path: self.config.db_path.clone(),
            ..config
        };
        DistributionEngine::new(
            self.store.clone(),
            config,
            self.shared_clock.clone(),
            self.effects.clone(),
        )
    }

    pub fn sweeper(&self) -> ExpirySweeper {
        ExpirySweeper::new(self.bets.clone(), self.config.sweep_interval())
    }

    pub async fn funded_user(&self, name: &str, amount: Amount) -> User {
        let user = self.wallets.register_user(name).await.unwrap();
        if amount > 0 {
            self.wallets
                .deposit(user.id, amount, &format!("dep-{}", name))
                .await
                .unwrap();
        }
        user
    }

    /// Contest starting `minutes` from the harness clock.
    pub async fn contest_in(&self, minutes: i64) -> Contest {
        self.contests
            .schedule_contest("Red", "Blue", self.clock.now() + Duration::minutes(minutes))
            .await
            .unwrap()
    }

    /// Lets the effect worker drain its queue.
    pub async fn settle_effects(&self) {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
}
