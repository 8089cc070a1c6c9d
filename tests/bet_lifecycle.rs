mod common;

use chrono::Duration;
use common::Harness;
use futures_util::future::join_all;
use wager_ledger::effects::LedgerEvent;
use wager_ledger::types::{BetStatus, Side, TransactionType};
use wager_ledger::LedgerError;

#[tokio::test]
async fn create_bet_locks_stake_and_opens_bet() {
    let h = Harness::new();
    let alice = h.funded_user("alice", 50_000).await;
    let contest = h.contest_in(120).await;

    let bet = h.bets.create_bet(alice.id, contest.id, 10_000, Side::SideA).await.unwrap();
    assert_eq!(bet.status, BetStatus::Pending);
    assert_eq!(bet.acceptor_id, None);
    assert_eq!(bet.cancellable_until, bet.created_at + Duration::minutes(20));

    let wallet = h.wallets.wallet(alice.id).await.unwrap();
    assert_eq!(wallet.balance, 40_000);
    assert_eq!(wallet.locked_balance, 10_000);

    let contest = h.contests.contest(contest.id).await.unwrap();
    assert_eq!(contest.pending_bets, 1);
    assert_eq!(contest.total_staked, 10_000);

    let lines = h.bets.bet_transactions(bet.id).await.unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].tx_type, TransactionType::BetLock);
    assert_eq!(lines[0].amount, 10_000);

    let open = h.bets.open_bets(contest.id).await.unwrap();
    assert_eq!(open.len(), 1);

    h.settle_effects().await;
    assert!(h
        .notifier
        .events_for(alice.id)
        .iter()
        .any(|e| matches!(e, LedgerEvent::BetCreated { stake: 10_000, .. })));
}

#[tokio::test]
async fn insufficient_funds_leaves_no_trace() {
    let h = Harness::new();
    let bob = h.funded_user("bob", 5_000).await;
    let contest = h.contest_in(120).await;

    let err = h.bets.create_bet(bob.id, contest.id, 10_000, Side::SideB).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientFunds { required: 10_000, available: 5_000 }
    ));

    let wallet = h.wallets.wallet(bob.id).await.unwrap();
    assert_eq!((wallet.balance, wallet.locked_balance), (5_000, 0));
    assert!(h.bets.bets_for_user(bob.id).await.unwrap().is_empty());
    assert_eq!(h.wallets.transactions(bob.id).await.unwrap().len(), 1);
    let contest = h.contests.contest(contest.id).await.unwrap();
    assert_eq!((contest.pending_bets, contest.total_staked), (0, 0));
}

#[tokio::test]
async fn betting_closes_before_contest_start() {
    let h = Harness::new();
    let alice = h.funded_user("alice", 50_000).await;
    let soon = h.contest_in(30).await;

    let err = h.bets.create_bet(alice.id, soon.id, 1_000, Side::SideA).await.unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));

    let err = h.bets.create_bet(alice.id, soon.id, 0, Side::SideA).await.unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));
}

#[tokio::test]
async fn pending_bets_are_capped_per_user() {
    let h = Harness::new();
    let alice = h.funded_user("alice", 100_000).await;
    let contest = h.contest_in(120).await;

    for _ in 0..h.config.max_pending_bets {
        h.bets.create_bet(alice.id, contest.id, 100, Side::SideA).await.unwrap();
    }
    let err = h.bets.create_bet(alice.id, contest.id, 100, Side::SideA).await.unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));
}

#[tokio::test]
async fn inactive_users_cannot_bet() {
    let h = Harness::new();
    let alice = h.funded_user("alice", 10_000).await;
    let contest = h.contest_in(120).await;
    h.wallets.set_user_active(alice.id, false).await.unwrap();

    let err = h.bets.create_bet(alice.id, contest.id, 1_000, Side::SideA).await.unwrap_err();
    assert!(matches!(err, LedgerError::Forbidden(_)));
}

#[tokio::test]
async fn accept_locks_matching_stake() {
    let h = Harness::new();
    let alice = h.funded_user("alice", 20_000).await;
    let bob = h.funded_user("bob", 20_000).await;
    let contest = h.contest_in(120).await;
    let bet = h.bets.create_bet(alice.id, contest.id, 7_500, Side::SideA).await.unwrap();

    let accepted = h.bets.accept_bet(bob.id, bet.id).await.unwrap();
    assert_eq!(accepted.status, BetStatus::Accepted);
    assert_eq!(accepted.acceptor_id, Some(bob.id));
    assert!(accepted.accepted_at.is_some());

    let wallet = h.wallets.wallet(bob.id).await.unwrap();
    assert_eq!((wallet.balance, wallet.locked_balance), (12_500, 7_500));

    let contest = h.contests.contest(contest.id).await.unwrap();
    assert_eq!((contest.pending_bets, contest.accepted_bets), (0, 1));
    assert_eq!(contest.total_staked, 15_000);

    let err = h.bets.accept_bet(bob.id, bet.id).await.unwrap_err();
    assert!(matches!(err, LedgerError::AlreadyAccepted));
}

#[tokio::test]
async fn accept_rejects_own_bet_and_short_wallets() {
    let h = Harness::new();
    let alice = h.funded_user("alice", 20_000).await;
    let poor = h.funded_user("poor", 1_000).await;
    let contest = h.contest_in(120).await;
    let bet = h.bets.create_bet(alice.id, contest.id, 5_000, Side::SideB).await.unwrap();

    let err = h.bets.accept_bet(alice.id, bet.id).await.unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));

    let err = h.bets.accept_bet(poor.id, bet.id).await.unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFunds { .. }));

    let bet = h.bets.bet(bet.id).await.unwrap();
    assert_eq!(bet.status, BetStatus::Pending);
    assert_eq!(bet.acceptor_id, None);
    let wallet = h.wallets.wallet(poor.id).await.unwrap();
    assert_eq!((wallet.balance, wallet.locked_balance), (1_000, 0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_accepts_have_one_winner() {
    let h = Harness::new();
    let alice = h.funded_user("alice", 10_000).await;
    let contest = h.contest_in(120).await;
    let bet = h.bets.create_bet(alice.id, contest.id, 10_000, Side::SideA).await.unwrap();

    let mut takers = Vec::new();
    for i in 0..8 {
        takers.push(h.funded_user(&format!("taker{}", i), 10_000).await);
    }

    let attempts = takers.iter().map(|t| {
        let bets = h.bets.clone();
        let (taker, bet_id) = (t.id, bet.id);
        tokio::spawn(async move { bets.accept_bet(taker, bet_id).await })
    });
    let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for result in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(matches!(result, LedgerError::AlreadyAccepted), "unexpected {:?}", result);
    }

    let mut locked = 0;
    for taker in &takers {
        locked += h.wallets.wallet(taker.id).await.unwrap().locked_balance;
    }
    assert_eq!(locked, 10_000);
}

#[tokio::test]
async fn creator_cancel_respects_delay() {
    let h = Harness::new();
    let alice = h.funded_user("alice", 10_000).await;
    let contest = h.contest_in(180).await;
    let bet = h.bets.create_bet(alice.id, contest.id, 4_000, Side::SideA).await.unwrap();

    let err = h.bets.cancel_bet(bet.id, alice.id, false).await.unwrap_err();
    assert!(matches!(err, LedgerError::Forbidden(_)));

    h.clock.advance(Duration::minutes(31));
    let cancelled = h.bets.cancel_bet(bet.id, alice.id, false).await.unwrap();
    assert_eq!(cancelled.status, BetStatus::Cancelled);
    assert!(cancelled.cancelled_at.is_some());

    let wallet = h.wallets.wallet(alice.id).await.unwrap();
    assert_eq!((wallet.balance, wallet.locked_balance), (10_000, 0));
    let contest = h.contests.contest(contest.id).await.unwrap();
    assert_eq!((contest.pending_bets, contest.total_staked), (0, 0));

    let err = h.bets.cancel_bet(bet.id, alice.id, false).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidStateTransition { .. }));
}

#[tokio::test]
async fn bet_history_lands_in_audit_log() {
    let h = Harness::new();
    let alice = h.funded_user("alice", 10_000).await;
    let contest = h.contest_in(180).await;
    let bet = h.bets.create_bet(alice.id, contest.id, 2_500, Side::SideB).await.unwrap();
    h.clock.advance(Duration::minutes(31));
    h.bets.cancel_bet(bet.id, alice.id, false).await.unwrap();

    h.settle_effects().await;
    let entries = h.audit.entries_for(bet.id.to_string()).await.unwrap();
    let actions: Vec<_> = entries.iter().map(|(action, _)| action.as_str()).collect();
    assert_eq!(actions, vec!["bet.create", "bet.cancel"]);

    let cancel: serde_json::Value = serde_json::from_str(&entries[1].1).unwrap();
    assert_eq!(cancel["reason"], "creator");
}

#[tokio::test]
async fn only_creator_or_admin_cancels() {
    let h = Harness::new();
    let alice = h.funded_user("alice", 10_000).await;
    let mallory = h.funded_user("mallory", 0).await;
    let admin = h.funded_user("admin", 0).await;
    let contest = h.contest_in(180).await;
    let bet = h.bets.create_bet(alice.id, contest.id, 4_000, Side::SideA).await.unwrap();
    h.clock.advance(Duration::minutes(31));

    let err = h.bets.cancel_bet(bet.id, mallory.id, false).await.unwrap_err();
    assert!(matches!(err, LedgerError::Forbidden(_)));

    let cancelled = h.bets.cancel_bet(bet.id, admin.id, true).await.unwrap();
    assert_eq!(cancelled.status, BetStatus::Cancelled);
}

#[tokio::test]
async fn admin_skips_delay_but_not_matched_bets() {
    let h = Harness::new();
    let alice = h.funded_user("alice", 10_000).await;
    let bob = h.funded_user("bob", 10_000).await;
    let contest = h.contest_in(180).await;
    let open = h.bets.create_bet(alice.id, contest.id, 1_000, Side::SideA).await.unwrap();
    let matched = h.bets.create_bet(alice.id, contest.id, 1_000, Side::SideB).await.unwrap();
    h.bets.accept_bet(bob.id, matched.id).await.unwrap();

    h.bets.cancel_bet(open.id, bob.id, true).await.unwrap();

    let err = h.bets.cancel_bet(matched.id, alice.id, true).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidStateTransition { .. }));
    let wallet = h.wallets.wallet(bob.id).await.unwrap();
    assert_eq!(wallet.locked_balance, 1_000);
}

#[tokio::test]
async fn contest_with_matched_bets_cannot_be_cancelled() {
    let h = Harness::new();
    let alice = h.funded_user("alice", 10_000).await;
    let bob = h.funded_user("bob", 10_000).await;
    let contest = h.contest_in(180).await;
    let bet = h.bets.create_bet(alice.id, contest.id, 1_000, Side::SideA).await.unwrap();
    h.bets.accept_bet(bob.id, bet.id).await.unwrap();

    let err = h.contests.cancel_contest(contest.id).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidStateTransition { .. }));

    let empty = h.contest_in(180).await;
    let ongoing = h.contests.mark_ongoing(empty.id).await.unwrap();
    assert_eq!(ongoing.status.as_str(), "ongoing");
    let cancelled = h.contests.cancel_contest(empty.id).await.unwrap();
    assert_eq!(cancelled.status.as_str(), "cancelled");
}
