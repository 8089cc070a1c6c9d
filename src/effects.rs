//! Best-effort side effects of ledger operations.
//!
//! Financial operations return their effects alongside the committed result
//! and hand them to the [`EffectDispatcher`]. Delivery happens on a separate
//! worker, so a slow or failing notifier or audit sink can never hold a store
//! transaction open or roll one back.

use crate::audit::AuditLog;
use crate::notify::Notifier;
use crate::types::{Amount, BetId, ContestId, Outcome, Side, UserId};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "user_id", rename_all = "snake_case")]
pub enum Recipient {
    User(UserId),
    /// Every subscriber of the open-bets feed.
    Broadcast,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LedgerEvent {
    BetCreated {
        bet_id: BetId,
        contest_id: ContestId,
        stake: Amount,
        side: Side,
    },
    BetAccepted {
        bet_id: BetId,
        contest_id: ContestId,
        acceptor_id: UserId,
    },
    BetCancelled { bet_id: BetId, refunded: Amount },
    BetWon { bet_id: BetId, payout: Amount },
    BetLost { bet_id: BetId, stake: Amount },
    BetRefunded { bet_id: BetId, refund: Amount },
    CommissionRecorded {
        contest_id: ContestId,
        amount: Amount,
        outcome: Outcome,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: Recipient,
    pub event: LedgerEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: String,
    pub entity: String,
    pub entity_id: String,
    pub actor: Option<UserId>,
    pub details: Value,
    pub at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        action: &str,
        entity: &str,
        entity_id: impl ToString,
        actor: Option<UserId>,
        details: Value,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            action: action.to_string(),
            entity: entity.to_string(),
            entity_id: entity_id.to_string(),
            actor,
            details,
            at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Effect {
    Notify(Notification),
    Audit(AuditEntry),
}

impl Effect {
    pub fn notify(user_id: UserId, event: LedgerEvent) -> Self {
        Effect::Notify(Notification {
            recipient: Recipient::User(user_id),
            event,
        })
    }

    pub fn broadcast(event: LedgerEvent) -> Self {
        Effect::Notify(Notification {
            recipient: Recipient::Broadcast,
            event,
        })
    }
}

/// Cheap, cloneable handle that enqueues effects without ever blocking.
#[derive(Clone)]
pub struct EffectDispatcher {
    sender: mpsc::Sender<Vec<Effect>>,
}

impl EffectDispatcher {
    /// Starts the delivery worker. It exits once every handle is dropped.
    pub fn spawn(
        notifier: Arc<dyn Notifier>,
        audit: Arc<dyn AuditLog>,
        buffer_size: usize,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(buffer_size.max(1));
        let handle = tokio::spawn(delivery_worker(notifier, audit, receiver));
        (Self { sender }, handle)
    }

    pub fn dispatch(&self, effects: Vec<Effect>) {
        if effects.is_empty() {
            return;
        }
        match self.sender.try_send(effects) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!("Effect queue full; dropping {} effects", dropped.len());
            }
            Err(mpsc::error::TrySendError::Closed(dropped)) => {
                warn!("Effect worker stopped; dropping {} effects", dropped.len());
            }
        }
    }
}

async fn delivery_worker(
    notifier: Arc<dyn Notifier>,
    audit: Arc<dyn AuditLog>,
    mut receiver: mpsc::Receiver<Vec<Effect>>,
) {
    while let Some(batch) = receiver.recv().await {
        let mut notifications = Vec::new();
        let mut entries = Vec::new();
        for effect in batch {
            match effect {
                Effect::Notify(n) => notifications.push(n),
                Effect::Audit(a) => entries.push(a),
            }
        }

        // Audit entries keep their order; notifications fan out.
        for entry in entries {
            if let Err(e) = audit.record(&entry).await {
                warn!("Audit write failed for {} {}: {:#}", entry.entity, entry.entity_id, e);
            }
        }

        let results = join_all(notifications.iter().map(|n| notifier.notify(n))).await;
        for (n, result) in notifications.iter().zip(results) {
            if let Err(e) = result {
                warn!("Notification {:?} to {:?} failed: {:#}", n.event, n.recipient, e);
            }
        }
    }
    debug!("Effect worker stopped");
}
