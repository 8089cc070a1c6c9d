//! Peer-to-peer wagering ledger: escrowed stakes, atomic bet lifecycle and
//! exactly-once settlement of contests.

pub mod audit;
pub mod bets;
pub mod clock;
pub mod commission;
pub mod config;
pub mod contests;
pub mod effects;
pub mod error;
pub mod notify;
pub mod settlement;
pub mod store;
pub mod sweeper;
pub mod types;
pub mod wallet;

pub use bets::BetController;
pub use commission::CommissionLedger;
pub use config::Config;
pub use contests::ContestBook;
pub use error::{LedgerError, Result};
pub use settlement::{plan_distribution, DistributionEngine, DistributionRates, Position};
pub use store::Store;
pub use sweeper::{ExpirySweeper, SweepReport};
pub use wallet::WalletService;
