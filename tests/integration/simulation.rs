//! End-to-end engine simulation.
//!
//! Drives the full stack — bank, round engine, deposit desk, withdrawal
//! desk — against the in-memory store and the mock gateway, exercising
//! the flows a production deployment sees: fund → bet → settle →
//! rakeback, queued-bet carryover across rounds, deposit reconciliation
//! idempotency, and the withdrawal non-reversal policy.

use std::sync::Arc;

use rust_decimal_macros::dec;

use duelbook::config::{BettingConfig, DepositsConfig, WithdrawalsConfig};
use duelbook::engine::bank::Bank;
use duelbook::engine::deposits::DepositDesk;
use duelbook::engine::rounds::{BetPlacement, RoundEngine};
use duelbook::engine::withdrawals::WithdrawalDesk;
use duelbook::notify::RecordingNotifier;
use duelbook::storage::Store;
use duelbook::types::{Currency, PaymentStatus, Rates, RoundOutcome, Side, WithdrawalStatus};

use crate::mock_gateway::MockGateway;

const M: i64 = 1_000_000;
const BTC_ADDR: &str = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa";

struct Harness {
    store: Store,
    bank: Bank,
    engine: RoundEngine,
    deposits: DepositDesk,
    withdrawals: WithdrawalDesk,
    gateway: Arc<MockGateway>,
    notifier: Arc<RecordingNotifier>,
}

async fn harness() -> Harness {
    let store = Store::open_in_memory().await.unwrap();
    let gateway = Arc::new(MockGateway::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let rates = Rates::new(dec!(0.15), dec!(0.015)).unwrap();

    let deposits_cfg = DepositsConfig {
        per_payment_delay_ms: 0,
        ..DepositsConfig::default()
    };

    Harness {
        store: store.clone(),
        bank: Bank::new(store.clone(), notifier.clone()),
        engine: RoundEngine::new(store.clone(), notifier.clone(), &BettingConfig::default()),
        deposits: DepositDesk::new(
            store.clone(),
            gateway.clone(),
            notifier.clone(),
            rates,
            &deposits_cfg,
        )
        .unwrap(),
        withdrawals: WithdrawalDesk::new(
            store,
            gateway.clone(),
            notifier.clone(),
            rates,
            &WithdrawalsConfig::default(),
        )
        .unwrap(),
        gateway,
        notifier,
    }
}

#[tokio::test]
async fn test_full_round_lifecycle() {
    let h = harness().await;

    // Two players hand GP to the collector.
    h.bank.deposit_gp("alice", Some("Alice"), 100 * M).await.unwrap();
    h.bank.deposit_gp("bob", Some("Bob"), 100 * M).await.unwrap();

    // Round opens; both bet.
    h.engine.open_round("duel-1", "FighterRed", "FighterBlue").await.unwrap();
    h.engine
        .place_or_change_bet("alice", Some("Alice"), 10 * M, Side::Red)
        .await
        .unwrap();
    h.engine
        .place_or_change_bet("bob", Some("Bob"), 20 * M, Side::Blue)
        .await
        .unwrap();

    assert_eq!(h.bank.balance_of("alice").await.unwrap(), 90 * M);
    assert_eq!(h.bank.balance_of("bob").await.unwrap(), 80 * M);

    // Red wins.
    let report = h
        .engine
        .round_result("duel-1", RoundOutcome::Winner(Side::Red))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.total_pot, 30 * M);

    // floor(10M × 1.95) = 19.5M credited to alice; bob's stake is gone.
    assert_eq!(h.bank.balance_of("alice").await.unwrap(), 90 * M + 19_500_000);
    assert_eq!(h.bank.balance_of("bob").await.unwrap(), 80 * M);

    // Both accrued floor(amount × 0.003) rakeback, claimable on demand.
    assert_eq!(h.bank.rakeback_of("alice").await.unwrap(), 30_000);
    assert_eq!(h.bank.rakeback_of("bob").await.unwrap(), 60_000);

    let (claimed, balance) = h.bank.claim_rakeback("bob", None).await.unwrap();
    assert_eq!(claimed, 60_000);
    assert_eq!(balance, 80 * M + 60_000);

    // Stats reflect the outcome.
    let stats = h.engine.stats().await.unwrap();
    assert_eq!(stats.red_streak, 1);
    assert_eq!(stats.last_winner, Some(Side::Red));
    assert_eq!(stats.last_winners, vec![Side::Red]);

    // Per-user aggregates from bet history.
    let alice_stats = h.bank.bet_stats("alice").await.unwrap();
    assert_eq!(alice_stats.wins, 1);
    assert_eq!(alice_stats.net_profit, 9_500_000);
    let bob_stats = h.bank.bet_stats("bob").await.unwrap();
    assert_eq!(bob_stats.losses, 1);
    assert_eq!(bob_stats.net_profit, -20 * M);
}

#[tokio::test]
async fn test_queued_bet_carries_into_next_round() {
    let h = harness().await;
    h.bank.deposit_gp("carol", None, 10 * M).await.unwrap();

    // No round yet: the bet queues without holding funds.
    let placement = h
        .engine
        .place_or_change_bet("carol", None, 4 * M, Side::Blue)
        .await
        .unwrap();
    assert!(matches!(placement, BetPlacement::Queued { .. }));
    assert_eq!(h.bank.balance_of("carol").await.unwrap(), 10 * M);

    // The next round converts it into a live bet with a single debit.
    let report = h.engine.open_round("duel-2", "A", "B").await.unwrap();
    assert_eq!(report.placed.len(), 1);
    assert_eq!(report.placed[0].bettor_id, "carol");
    assert_eq!(h.bank.balance_of("carol").await.unwrap(), 6 * M);

    // Draw: carol is made whole.
    h.engine.round_result("duel-2", RoundOutcome::Draw).await.unwrap();
    assert_eq!(h.bank.balance_of("carol").await.unwrap(), 10 * M);
}

#[tokio::test]
async fn test_deposit_reconciliation_is_idempotent() {
    let h = harness().await;

    let invoice = h.deposits.create_deposit("dave", None, dec!(15)).await.unwrap();
    assert_eq!(invoice.amount_gp, 100 * M);

    // Lookup failures are survived, not fatal.
    h.gateway.set_error("gateway down");
    let report = h.deposits.run_cycle().await.unwrap();
    assert_eq!(report.completed, 0);
    assert_eq!(h.bank.balance_of("dave").await.unwrap(), 0);

    // Gateway recovers and reports completion: credited exactly once.
    h.gateway.clear_error();
    h.gateway.set_status(&invoice.txn_id, PaymentStatus::Completed);
    let report = h.deposits.run_cycle().await.unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(h.bank.balance_of("dave").await.unwrap(), 100 * M);

    // Re-polling the completed payment never re-credits.
    for _ in 0..3 {
        h.deposits.run_cycle().await.unwrap();
    }
    assert_eq!(h.bank.balance_of("dave").await.unwrap(), 100 * M);
    assert_eq!(h.notifier.messages_for("dave").len(), 1);

    // And the credited GP is immediately bettable.
    h.engine.open_round("duel-3", "A", "B").await.unwrap();
    let placement = h
        .engine
        .place_or_change_bet("dave", None, 50 * M, Side::Red)
        .await
        .unwrap();
    assert!(matches!(placement, BetPlacement::Placed { .. }));
}

#[tokio::test]
async fn test_withdrawal_failure_is_never_reversed() {
    let h = harness().await;
    h.bank.deposit_gp("erin", None, 100 * M).await.unwrap();
    h.gateway.fail_payouts(true);

    let receipt = h
        .withdrawals
        .request_withdrawal("erin", None, Currency::Btc, dec!(10), BTC_ADDR)
        .await
        .unwrap();
    assert_eq!(receipt.status, WithdrawalStatus::Failed);

    let debited = 100 * M - receipt.amount_gp;
    assert_eq!(h.bank.balance_of("erin").await.unwrap(), debited);

    // The record is parked for manual remediation, debit intact.
    let failed = h.withdrawals.failed_withdrawals().await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].amount_gp, receipt.amount_gp);

    // Later operator remediation completes it without touching GP.
    h.withdrawals
        .mark_completed(&receipt.withdrawal_id, Some("manual-chain-txn"))
        .await
        .unwrap();
    assert_eq!(h.bank.balance_of("erin").await.unwrap(), debited);
    assert!(h.withdrawals.failed_withdrawals().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_withdrawal_success_reaches_gateway_once() {
    let h = harness().await;
    h.bank.deposit_gp("frank", None, 100 * M).await.unwrap();

    let receipt = h
        .withdrawals
        .request_withdrawal("frank", None, Currency::Btc, dec!(10), BTC_ADDR)
        .await
        .unwrap();
    assert_eq!(receipt.status, WithdrawalStatus::Processing);

    let payouts = h.gateway.get_payouts();
    assert_eq!(payouts.len(), 1);
    assert_eq!(payouts[0].currency, Currency::Btc);
    assert_eq!(payouts[0].address, BTC_ADDR);
    assert_eq!(payouts[0].amount_usd, dec!(10));
}

#[tokio::test]
async fn test_balance_floor_holds_across_mixed_traffic() {
    let h = harness().await;
    h.bank.deposit_gp("gail", None, 5 * M).await.unwrap();

    // An over-debit beyond the balance clamps at zero at the ledger
    // level; every balance observed on the way stays non-negative.
    for delta in [-3 * M, 2 * M, -10 * M, 7 * M, -1] {
        let balance = if delta >= 0 {
            h.bank.deposit_gp("gail", None, delta).await.unwrap()
        } else {
            h.store
                .adjust_balance(
                    "gail",
                    None,
                    delta,
                    duelbook::types::LedgerReason::Bet,
                )
                .await
                .unwrap()
        };
        assert!(balance >= 0, "balance went negative: {balance}");
    }

    // The ledger replays to the stored balance even through clamps.
    let entries = h.store.recent_ledger("gail", 50).await.unwrap();
    let replayed: i64 = entries.iter().map(|e| e.delta).sum();
    assert_eq!(replayed, h.bank.balance_of("gail").await.unwrap());
}

#[tokio::test]
async fn test_restartable_rounds_void_in_flight_bets() {
    let h = harness().await;
    h.bank.deposit_gp("hank", None, 10 * M).await.unwrap();

    h.engine.open_round("duel-4", "A", "B").await.unwrap();
    h.engine
        .place_or_change_bet("hank", None, 2 * M, Side::Red)
        .await
        .unwrap();

    // Operator voids before a reset: everyone is refunded first.
    h.engine.void_round().await.unwrap();
    assert_eq!(h.bank.balance_of("hank").await.unwrap(), 10 * M);

    // The slot is free again and stats were untouched.
    h.engine.open_round("duel-5", "A", "B").await.unwrap();
    assert!(h.engine.stats().await.unwrap().last_winner.is_none());
}
