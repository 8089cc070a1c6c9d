use serde::{Deserialize, Serialize};
use rust_decimal::Decimal;
use uuid::Uuid;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

/// Minor currency units. All money arithmetic is integer.
pub type Amount = u64;

pub type UserId = Uuid;
pub type BetId = Uuid;
pub type ContestId = Uuid;

/// Owner of the house wallet that receives commission and rounding dust.
pub const PLATFORM_ACCOUNT: UserId = Uuid::nil();

// Text columns round-trip through these names, so they are part of the schema.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {} '{}'", stringify!($name), other)),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Side {
    SideA,
    SideB,
}

text_enum!(Side { SideA => "SIDE_A", SideB => "SIDE_B" });

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::SideA => Side::SideB,
            Side::SideB => Side::SideA,
        }
    }
}

/// Authoritative result of a contest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Outcome {
    SideA,
    SideB,
    Draw,
}

text_enum!(Outcome { SideA => "SIDE_A", SideB => "SIDE_B", Draw => "DRAW" });

impl Outcome {
    pub fn winning_side(&self) -> Option<Side> {
        match self {
            Outcome::SideA => Some(Side::SideA),
            Outcome::SideB => Some(Side::SideB),
            Outcome::Draw => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BetStatus {
    Pending,
    Accepted,
    Won,
    Lost,
    Refunded,
    Cancelled,
}

text_enum!(BetStatus {
    Pending => "PENDING",
    Accepted => "ACCEPTED",
    Won => "WON",
    Lost => "LOST",
    Refunded => "REFUNDED",
    Cancelled => "CANCELLED",
});

impl BetStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BetStatus::Won | BetStatus::Lost | BetStatus::Refunded | BetStatus::Cancelled
        )
    }

    /// `PENDING -> {ACCEPTED, CANCELLED}`, `ACCEPTED -> {WON, LOST, REFUNDED}`.
    pub fn can_transition_to(&self, next: BetStatus) -> bool {
        match self {
            BetStatus::Pending => matches!(next, BetStatus::Accepted | BetStatus::Cancelled),
            BetStatus::Accepted => {
                matches!(next, BetStatus::Won | BetStatus::Lost | BetStatus::Refunded)
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ContestStatus {
    Scheduled,
    Ongoing,
    Finished,
    Cancelled,
}

text_enum!(ContestStatus {
    Scheduled => "scheduled",
    Ongoing => "ongoing",
    Finished => "finished",
    Cancelled => "cancelled",
});

/// Guard preventing duplicate settlement of a contest.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DistributionStatus {
    None,
    Processing,
    Completed,
    Failed,
}

text_enum!(DistributionStatus {
    None => "NONE",
    Processing => "PROCESSING",
    Completed => "COMPLETED",
    Failed => "FAILED",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    BetLock,
    BetRefund,
    BetWin,
    BetLoss,
    Commission,
    Rounding,
}

text_enum!(TransactionType {
    Deposit => "deposit",
    Withdrawal => "withdrawal",
    BetLock => "lock",
    BetRefund => "refund",
    BetWin => "win",
    BetLoss => "loss",
    Commission => "commission",
    Rounding => "rounding",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransactionStatus {
    Pending,
    Confirmed,
    Failed,
}

text_enum!(TransactionStatus {
    Pending => "pending",
    Confirmed => "confirmed",
    Failed => "failed",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub user_id: UserId,
    pub balance: Amount,
    pub locked_balance: Amount,
    pub total_won: Amount,
    pub total_lost: Amount,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bet {
    pub id: BetId,
    pub creator_id: UserId,
    pub acceptor_id: Option<UserId>,
    pub contest_id: ContestId,
    pub stake: Amount,
    pub chosen_side: Side,
    pub status: BetStatus,
    pub created_at: DateTime<Utc>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellable_until: DateTime<Utc>,
    pub actual_win: Option<Amount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contest {
    pub id: ContestId,
    pub side_a: String,
    pub side_b: String,
    pub start_time: DateTime<Utc>,
    pub status: ContestStatus,
    pub outcome: Option<Outcome>,
    pub distribution_status: DistributionStatus,
    pub distribution_error: Option<String>,
    pub pending_bets: u64,
    pub accepted_bets: u64,
    pub total_staked: Amount,
    pub settled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: Uuid,
    pub tx_type: TransactionType,
    pub amount: Amount,
    pub user_id: UserId,
    pub bet_id: Option<BetId>,
    pub contest_id: Option<ContestId>,
    pub status: TransactionStatus,
    pub reference: Option<String>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionRecord {
    pub id: Uuid,
    pub contest_id: ContestId,
    pub bet_id: Option<BetId>,
    pub amount: Amount,
    pub percentage: Decimal,
    pub rounding_remainder: Amount,
    pub transaction_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Settlement result for one side of a bet. Every accepted bet yields two:
/// the creator's position on `chosen_side` and the acceptor's on the other.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetPayout {
    pub bet_id: BetId,
    pub user_id: UserId,
    pub side: Side,
    pub status: BetStatus,
    pub stake: Amount,
    /// Amount credited back to the bettor's balance (payout or draw refund).
    pub credited: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionResult {
    pub contest_id: ContestId,
    pub outcome: Outcome,
    pub total_pot: Amount,
    pub commission: Amount,
    pub distributable: Amount,
    pub total_paid: Amount,
    pub rounding_remainder: Amount,
    pub payouts: Vec<BetPayout>,
    pub cancelled_pending: Vec<BetId>,
}

impl DistributionResult {
    pub fn empty(contest_id: ContestId, outcome: Outcome) -> Self {
        Self {
            contest_id,
            outcome,
            total_pot: 0,
            commission: 0,
            distributable: 0,
            total_paid: 0,
            rounding_remainder: 0,
            payouts: Vec::new(),
            cancelled_pending: Vec::new(),
        }
    }

    pub fn winners(&self) -> impl Iterator<Item = &BetPayout> {
        self.payouts.iter().filter(|p| p.status == BetStatus::Won)
    }
}
