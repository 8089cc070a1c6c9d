use crate::bets::BetController;
use crate::error::{LedgerError, Result};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const DEFAULT_BATCH: u32 = 100;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub cancelled: usize,
    /// Bets matched or cancelled by someone else between listing and refund.
    pub skipped: usize,
    pub failed: usize,
}

/// Refunds PENDING bets that can no longer be matched because their contest
/// starts within the lead time, has started, or left the scheduled state.
pub struct ExpirySweeper {
    controller: BetController,
    interval: Duration,
    batch_size: u32,
}

impl ExpirySweeper {
    pub fn new(controller: BetController, interval: Duration) -> Self {
        Self {
            controller,
            interval,
            batch_size: DEFAULT_BATCH,
        }
    }

    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// One pass over every expiring bet, a page at a time. Each bet is
    /// refunded in its own transaction, so one failure never blocks the rest.
    ///
    /// Bets that stay PENDING after their attempt keep their place at the
    /// head of the ordering; later pages start past them.
    pub async fn sweep_once(&self) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let mut still_pending: u32 = 0;

        loop {
            let page = self
                .controller
                .expiring_bets(self.batch_size, still_pending)
                .await?;
            let page_len = page.len();

            for bet in page {
                match self.controller.expire_bet(bet.id).await {
                    Ok(_) => report.cancelled += 1,
                    Err(LedgerError::AlreadyAccepted)
                    | Err(LedgerError::InvalidStateTransition { .. }) => {
                        debug!("Bet {} left PENDING before expiry; skipping", bet.id);
                        report.skipped += 1;
                    }
                    Err(LedgerError::Validation(reason)) => {
                        debug!("Bet {} not expirable: {}", bet.id, reason);
                        report.skipped += 1;
                        still_pending += 1;
                    }
                    Err(e) => {
                        error!("Failed to expire bet {}: {}", bet.id, e);
                        report.failed += 1;
                        still_pending += 1;
                    }
                }
            }

            if page_len < self.batch_size as usize {
                break;
            }
        }

        if report.cancelled > 0 || report.failed > 0 {
            info!(
                "Expiry sweep: {} refunded, {} skipped, {} failed",
                report.cancelled, report.skipped, report.failed
            );
        }
        Ok(report)
    }

    /// Sweeps every `interval` until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Expiry sweeper started (every {:?})", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        warn!("Expiry sweep failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Expiry sweeper stopping");
                        break;
                    }
                }
            }
        }
    }
}
