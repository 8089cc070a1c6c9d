use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use dotenv::dotenv;
use anyhow::{bail, Context, Result};

#[derive(Clone, Debug)]
pub struct Config {
    pub db_path: PathBuf,
    pub commission_rate: Decimal, // 0.10
    pub draw_refund_rate: Decimal, // 0.975
    // Bet windows
    pub bet_lead_time_mins: i64, // 30
    pub cancellable_window_mins: i64, // 20
    pub creator_cancel_delay_mins: i64, // 30
    pub max_pending_bets: u32, // 10
    // Store budgets
    pub lock_wait_timeout_ms: u64, // 10000
    pub bet_tx_timeout_ms: u64, // 20000
    pub distribution_tx_timeout_ms: u64, // 60000
    // Background work
    pub sweep_interval_secs: u64,
    pub sweep_batch_size: u32, // 100
    pub effect_buffer: usize,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("wager-ledger.db"),
            commission_rate: dec!(0.10),
            draw_refund_rate: dec!(0.975),
            bet_lead_time_mins: 30,
            cancellable_window_mins: 20,
            creator_cancel_delay_mins: 30,
            max_pending_bets: 10,
            lock_wait_timeout_ms: 10_000,
            bet_tx_timeout_ms: 20_000,
            distribution_tx_timeout_ms: 60_000,
            sweep_interval_secs: 60,
            sweep_batch_size: 100,
            effect_buffer: 1024,
            webhook_url: None,
            webhook_secret: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from any key lookup, falling back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            db_path: lookup("LEDGER_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            commission_rate: parse_or(&lookup, "COMMISSION_RATE", defaults.commission_rate)?,
            draw_refund_rate: parse_or(&lookup, "DRAW_REFUND_RATE", defaults.draw_refund_rate)?,
            bet_lead_time_mins: parse_or(
                &lookup,
                "BET_LEAD_TIME_MINS",
                defaults.bet_lead_time_mins,
            )?,
            cancellable_window_mins: parse_or(
                &lookup,
                "CANCELLABLE_WINDOW_MINS",
                defaults.cancellable_window_mins,
            )?,
            creator_cancel_delay_mins: parse_or(
                &lookup,
                "CREATOR_CANCEL_DELAY_MINS",
                defaults.creator_cancel_delay_mins,
            )?,
            max_pending_bets: parse_or(&lookup, "MAX_PENDING_BETS", defaults.max_pending_bets)?,
            lock_wait_timeout_ms: parse_or(
                &lookup,
                "LOCK_WAIT_TIMEOUT_MS",
                defaults.lock_wait_timeout_ms,
            )?,
            bet_tx_timeout_ms: parse_or(&lookup, "BET_TX_TIMEOUT_MS", defaults.bet_tx_timeout_ms)?,
            distribution_tx_timeout_ms: parse_or(
                &lookup,
                "DISTRIBUTION_TX_TIMEOUT_MS",
                defaults.distribution_tx_timeout_ms,
            )?,
            sweep_interval_secs: parse_or(
                &lookup,
                "SWEEP_INTERVAL_SECS",
                defaults.sweep_interval_secs,
            )?,
            sweep_batch_size: parse_or(&lookup, "SWEEP_BATCH_SIZE", defaults.sweep_batch_size)?,
            effect_buffer: parse_or(&lookup, "EFFECT_BUFFER", defaults.effect_buffer)?,
            webhook_url: lookup("WEBHOOK_URL").filter(|v| !v.is_empty()),
            webhook_secret: lookup("WEBHOOK_SECRET").filter(|v| !v.is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, rate) in [
            ("COMMISSION_RATE", self.commission_rate),
            ("DRAW_REFUND_RATE", self.draw_refund_rate),
        ] {
            if rate < Decimal::ZERO || rate > Decimal::ONE {
                bail!("{} must be between 0 and 1, got {}", name, rate);
            }
        }

        for (name, value) in [
            ("BET_LEAD_TIME_MINS", self.bet_lead_time_mins),
            ("CANCELLABLE_WINDOW_MINS", self.cancellable_window_mins),
            ("CREATOR_CANCEL_DELAY_MINS", self.creator_cancel_delay_mins),
        ] {
            if value < 0 {
                bail!("{} must not be negative, got {}", name, value);
            }
        }

        for (name, value) in [
            ("LOCK_WAIT_TIMEOUT_MS", self.lock_wait_timeout_ms),
            ("BET_TX_TIMEOUT_MS", self.bet_tx_timeout_ms),
            ("DISTRIBUTION_TX_TIMEOUT_MS", self.distribution_tx_timeout_ms),
            ("SWEEP_INTERVAL_SECS", self.sweep_interval_secs),
        ] {
            if value == 0 {
                bail!("{} must be positive", name);
            }
        }

        if self.sweep_batch_size == 0 {
            bail!("SWEEP_BATCH_SIZE must be positive");
        }

        if self.webhook_url.is_some() && self.webhook_secret.is_none() {
            bail!("WEBHOOK_SECRET must be set when WEBHOOK_URL is set");
        }

        Ok(())
    }

    pub fn bet_lead_time(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.bet_lead_time_mins)
    }

    pub fn cancellable_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.cancellable_window_mins)
    }

    pub fn creator_cancel_delay(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.creator_cancel_delay_mins)
    }

    pub fn lock_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_wait_timeout_ms)
    }

    pub fn bet_tx_timeout(&self) -> Duration {
        Duration::from_millis(self.bet_tx_timeout_ms)
    }

    pub fn distribution_tx_timeout(&self) -> Duration {
        Duration::from_millis(self.distribution_tx_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => T::from_str(raw.trim()).with_context(|| format!("Invalid {}", key)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_reference_rules() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert_eq!(config.commission_rate, dec!(0.10));
        assert_eq!(config.draw_refund_rate, dec!(0.975));
        assert_eq!(config.bet_lead_time(), chrono::Duration::minutes(30));
        assert_eq!(config.max_pending_bets, 10);
        assert_eq!(config.distribution_tx_timeout(), Duration::from_secs(60));
        assert_eq!(config.sweep_batch_size, 100);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = Config::from_lookup(lookup_from(&[
            ("COMMISSION_RATE", "0.05"),
            ("MAX_PENDING_BETS", "3"),
            ("LEDGER_DB_PATH", "/tmp/ledger.db"),
        ]))
        .unwrap();
        assert_eq!(config.commission_rate, dec!(0.05));
        assert_eq!(config.max_pending_bets, 3);
        assert_eq!(config.db_path, PathBuf::from("/tmp/ledger.db"));
    }

    #[test]
    fn rejects_out_of_range_rates_and_garbage() {
        assert!(Config::from_lookup(lookup_from(&[("COMMISSION_RATE", "1.5")])).is_err());
        assert!(Config::from_lookup(lookup_from(&[("DRAW_REFUND_RATE", "-0.1")])).is_err());
        let err = Config::from_lookup(lookup_from(&[("MAX_PENDING_BETS", "many")])).unwrap_err();
        assert!(err.to_string().contains("MAX_PENDING_BETS"));
        assert!(Config::from_lookup(lookup_from(&[("SWEEP_BATCH_SIZE", "0")])).is_err());
    }

    #[test]
    fn webhook_requires_secret() {
        let url_only = lookup_from(&[("WEBHOOK_URL", "https://hooks.example")]);
        assert!(Config::from_lookup(url_only).is_err());
        assert!(Config::from_lookup(lookup_from(&[
            ("WEBHOOK_URL", "https://hooks.example"),
            ("WEBHOOK_SECRET", "s3cret"),
        ]))
        .is_ok());
    }
}
