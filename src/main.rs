use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use wager_ledger::audit::{AuditLog, SqliteAuditLog};
use wager_ledger::clock::{Clock, SystemClock};
use wager_ledger::effects::EffectDispatcher;
use wager_ledger::notify::{LogNotifier, Notifier, WebhookNotifier};
use wager_ledger::{
    BetController, CommissionLedger, Config, ContestBook, DistributionEngine, ExpirySweeper, Store,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Setup Logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting wager ledger...");

    // 2. Load Config
    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Failed to load config: {:#}", e);
            return Ok(());
        }
    };
    info!(
        "Config loaded. Commission {}%, draw refund {}%",
        config.commission_rate * rust_decimal::Decimal::from(100),
        config.draw_refund_rate * rust_decimal::Decimal::from(100)
    );

    // 3. Initialize Components
    let store = Store::open(&config.db_path, config.lock_wait_timeout())?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let notifier: Arc<dyn Notifier> = match (&config.webhook_url, &config.webhook_secret) {
        (Some(url), Some(secret)) => {
            info!("Delivering notifications to {}", url);
            Arc::new(WebhookNotifier::new(url, secret)?)
        }
        _ => {
            warn!("No WEBHOOK_URL configured; notifications go to the log only");
            Arc::new(LogNotifier)
        }
    };
    let audit: Arc<dyn AuditLog> = Arc::new(SqliteAuditLog::new(store.clone()));
    let (effects, effect_worker) = EffectDispatcher::spawn(notifier, audit, config.effect_buffer);

    let bets = BetController::new(store.clone(), config.clone(), clock.clone(), effects.clone());
    let contests = ContestBook::new(store.clone(), &config, clock.clone(), effects.clone());
    let engine =
        DistributionEngine::new(store.clone(), config.clone(), clock.clone(), effects.clone());
    let commission = CommissionLedger::new(store.clone());

    // 4. Release claims a crashed run left in PROCESSING, then retry FAILED ones
    let stalled = engine.recover_stalled().await?;
    if !stalled.is_empty() {
        warn!("Released {} stalled distribution claim(s)", stalled.len());
    }
    for contest in contests.failed_distributions().await? {
        warn!(
            "Contest {} has a FAILED distribution ({}); retry pending",
            contest.id,
            contest.distribution_error.as_deref().unwrap_or("no error recorded")
        );
        if let Err(e) = engine.retry_distribution(contest.id).await {
            error!("Retry of contest {} failed: {}", contest.id, e);
        }
    }
    info!("Platform commission to date: {}", commission.total_commission().await?);

    // 5. Start Background Tasks
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper =
        ExpirySweeper::new(bets, config.sweep_interval()).with_batch_size(config.sweep_batch_size);
    let sweeper_task = tokio::spawn(async move {
        sweeper.run(shutdown_rx).await;
    });

    // 6. Run until interrupted
    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper_task.await {
        error!("Sweeper task ended abnormally: {}", e);
    }

    drop(contests);
    drop(engine);
    drop(effects);
    if let Err(e) = effect_worker.await {
        error!("Effect worker ended abnormally: {}", e);
    }

    Ok(())
}
