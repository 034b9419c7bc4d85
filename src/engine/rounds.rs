//! Round state machine, bet registry, and queued-bet carryover.
//!
//! Owns the process-wide singleton round slot (`Open → Closed →
//! Settled | Void`), the bets on the active round, and the per-bettor
//! queue of bets submitted while no round was open. All mutation goes
//! through one async mutex so balance checks against the current bet
//! can never race bet placement, close, or settlement.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::BettingConfig;
use crate::error::{EngineError, EngineResult};
use crate::notify::Notifier;
use crate::storage::Store;
use crate::types::{
    format_gp_full, Bet, BetOutcome, BetRecord, LedgerReason, QueuedBet, Round, RoundOutcome,
    RoundStatus, Side, Stats,
};

/// Winning bets pay `floor(amount * 1.95)`.
const WIN_PAYOUT_NUM: i64 = 195;
const WIN_PAYOUT_DEN: i64 = 100;

/// Every settled bet accrues `floor(amount * 0.003)` rakeback.
const RAKEBACK_NUM: i64 = 3;
const RAKEBACK_DEN: i64 = 1000;

fn win_payout(amount: i64) -> i64 {
    amount * WIN_PAYOUT_NUM / WIN_PAYOUT_DEN
}

fn rakeback(amount: i64) -> i64 {
    amount * RAKEBACK_NUM / RAKEBACK_DEN
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// What happened to each queued bet when a round opened.
#[derive(Debug, Clone)]
pub struct OpenRoundReport {
    pub round_id: String,
    /// Queued bets converted into live bets (balance debited).
    pub placed: Vec<Bet>,
    /// Queued bets dropped at replay time.
    pub dropped: Vec<DroppedQueuedBet>,
}

#[derive(Debug, Clone)]
pub struct DroppedQueuedBet {
    pub bettor_id: String,
    pub amount: i64,
    pub side: Side,
    /// Balance at replay time — the reason for the drop.
    pub balance: i64,
}

/// Result of a bet placement request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BetPlacement {
    /// The bet is live on the open round.
    Placed {
        round_id: String,
        /// True when this replaced an existing bet on the round.
        changed: bool,
        balance_after: i64,
    },
    /// No open round — the bet is held for the next one.
    Queued { replaced: Option<QueuedBet> },
}

/// Settlement summary for one round.
#[derive(Debug, Clone)]
pub struct SettlementReport {
    pub round_id: String,
    pub outcome: RoundOutcome,
    pub total_pot: i64,
    /// `(bettor_id, payout)` for each winning bet.
    pub winners: Vec<(String, i64)>,
    /// `(bettor_id, amount)` for each losing bet.
    pub losers: Vec<(String, i64)>,
    /// `(bettor_id, amount)` for each refunded bet (draw or void).
    pub refunded: Vec<(String, i64)>,
    /// Post-settlement streak stats; absent for draws and voids.
    pub stats: Option<Stats>,
}

/// Read-only view of the active round.
#[derive(Debug, Clone)]
pub struct RoundSnapshot {
    pub round_id: String,
    pub red_name: String,
    pub blue_name: String,
    pub status: RoundStatus,
    pub bets: Vec<Bet>,
    /// Seconds until automatic close, while the window is open.
    pub remaining_secs: Option<u64>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

struct RoundState {
    round: Option<Round>,
    queued: HashMap<String, QueuedBet>,
    closes_at: Option<Instant>,
}

/// The round state machine. One instance per process.
pub struct RoundEngine {
    store: Store,
    notifier: Arc<dyn Notifier>,
    min_bet: i64,
    max_bet: i64,
    window: Duration,
    state: Mutex<RoundState>,
}

impl RoundEngine {
    pub fn new(store: Store, notifier: Arc<dyn Notifier>, cfg: &BettingConfig) -> Self {
        Self {
            store,
            notifier,
            min_bet: cfg.min_bet_gp,
            max_bet: cfg.max_bet_gp,
            window: Duration::from_secs(cfg.window_secs),
            state: Mutex::new(RoundState {
                round: None,
                queued: HashMap::new(),
                closes_at: None,
            }),
        }
    }

    /// Fire-and-forget notify; delivery failure never affects the ledger.
    async fn notify(&self, user_id: &str, message: &str) {
        if let Err(e) = self.notifier.notify(user_id, message).await {
            warn!(user_id, error = %e, "Notification delivery failed");
        }
    }

    // -- Round lifecycle -------------------------------------------------

    /// Open a new round. Fails while another round is active. Replays
    /// every queued bet, dropping (and notifying) bettors whose balance
    /// no longer covers the queued amount, then clears the queue.
    pub async fn open_round(
        &self,
        round_id: &str,
        red_name: &str,
        blue_name: &str,
    ) -> EngineResult<OpenRoundReport> {
        let mut state = self.state.lock().await;

        if let Some(active) = &state.round {
            return Err(EngineError::InvalidStateTransition(format!(
                "round {} is still {}",
                active.round_id, active.status
            )));
        }

        let mut round = Round {
            round_id: round_id.to_string(),
            red_name: red_name.to_string(),
            blue_name: blue_name.to_string(),
            status: RoundStatus::Open,
            bets: Vec::new(),
            opened_at: Utc::now(),
        };

        let mut report = OpenRoundReport {
            round_id: round_id.to_string(),
            placed: Vec::new(),
            dropped: Vec::new(),
        };

        // Best-effort carryover: balances may have changed since queuing,
        // so each entry is re-checked at replay time.
        let queued: Vec<(String, QueuedBet)> = state.queued.drain().collect();
        for (bettor_id, queued_bet) in queued {
            let balance = self.store.balance_of(&bettor_id).await?;
            if balance >= queued_bet.amount {
                self.store
                    .adjust_balance(
                        &bettor_id,
                        queued_bet.display_name.as_deref(),
                        -queued_bet.amount,
                        LedgerReason::Bet,
                    )
                    .await?;
                round.upsert_bet(&bettor_id, queued_bet.amount, queued_bet.side);
                report.placed.push(Bet {
                    bettor_id: bettor_id.clone(),
                    amount: queued_bet.amount,
                    side: queued_bet.side,
                });
                self.notify(
                    &bettor_id,
                    &format!(
                        "Your queued bet of {} on {} was placed in round {}.",
                        format_gp_full(queued_bet.amount),
                        queued_bet.side,
                        round_id
                    ),
                )
                .await;
            } else {
                report.dropped.push(DroppedQueuedBet {
                    bettor_id: bettor_id.clone(),
                    amount: queued_bet.amount,
                    side: queued_bet.side,
                    balance,
                });
                self.notify(
                    &bettor_id,
                    &format!(
                        "Your queued bet of {} could not be placed — insufficient balance ({}).",
                        format_gp_full(queued_bet.amount),
                        format_gp_full(balance)
                    ),
                )
                .await;
            }
        }

        info!(
            round_id,
            red = red_name,
            blue = blue_name,
            carried = report.placed.len(),
            dropped = report.dropped.len(),
            "Round opened"
        );

        state.round = Some(round);
        state.closes_at = Some(Instant::now() + self.window);
        Ok(report)
    }

    /// Force the betting window closed. Idempotent on an already-closed
    /// round; an error when no round is active.
    pub async fn close_round(&self) -> EngineResult<bool> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let round = state
            .round
            .as_mut()
            .ok_or_else(|| EngineError::InvalidStateTransition("no active round".to_string()))?;

        if round.status == RoundStatus::Open {
            round.status = RoundStatus::Closed;
            let round_id = round.round_id.clone();
            state.closes_at = None;
            info!(round_id, "Betting closed");
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Countdown tick: close the round once its deadline has elapsed.
    /// Returns the round id when this tick performed the close.
    pub async fn tick(&self) -> EngineResult<Option<String>> {
        let mut state = self.state.lock().await;

        let expired = matches!(state.closes_at, Some(deadline) if Instant::now() >= deadline);
        if !expired {
            return Ok(None);
        }
        state.closes_at = None;

        match state.round.as_mut() {
            Some(round) if round.status == RoundStatus::Open => {
                round.status = RoundStatus::Closed;
                info!(round_id = %round.round_id, "Betting window elapsed, round closed");
                Ok(Some(round.round_id.clone()))
            }
            _ => Ok(None),
        }
    }

    /// Settle the active round. Rejected (idempotency guard) when the
    /// round id doesn't match the tracked round — including when the
    /// round was already settled and the slot cleared.
    pub async fn settle_round(
        &self,
        round_id: &str,
        outcome: RoundOutcome,
    ) -> EngineResult<SettlementReport> {
        let mut state = self.state.lock().await;

        // Terminal step: take the round out of the slot. Anything after
        // this point belongs to the next round.
        let mut round = match state.round.take() {
            Some(round) if round.round_id == round_id => round,
            other => {
                state.round = other;
                return Err(EngineError::InvalidStateTransition(format!(
                    "round {round_id} is not the active round or was already settled"
                )));
            }
        };
        state.closes_at = None;
        round.status = RoundStatus::Closed;

        let mut report = SettlementReport {
            round_id: round_id.to_string(),
            outcome,
            total_pot: round.total_pot(),
            winners: Vec::new(),
            losers: Vec::new(),
            refunded: Vec::new(),
            stats: None,
        };

        match outcome {
            RoundOutcome::Draw => {
                for bet in &round.bets {
                    self.store
                        .adjust_balance(
                            &bet.bettor_id,
                            None,
                            bet.amount,
                            LedgerReason::RoundRefund,
                        )
                        .await?;
                    self.store
                        .record_bet_history(&BetRecord {
                            user_id: bet.bettor_id.clone(),
                            round_id: round_id.to_string(),
                            side: bet.side,
                            amount: bet.amount,
                            outcome: BetOutcome::Refund,
                            payout: bet.amount,
                            created_at: Utc::now(),
                        })
                        .await?;
                    report.refunded.push((bet.bettor_id.clone(), bet.amount));
                }
            }
            RoundOutcome::Winner(winning_side) => {
                for bet in &round.bets {
                    let won = bet.side == winning_side;
                    if won {
                        let payout = win_payout(bet.amount);
                        let new_balance = self
                            .store
                            .adjust_balance(
                                &bet.bettor_id,
                                None,
                                payout,
                                LedgerReason::RoundWin,
                            )
                            .await?;
                        self.store
                            .record_bet_history(&BetRecord {
                                user_id: bet.bettor_id.clone(),
                                round_id: round_id.to_string(),
                                side: bet.side,
                                amount: bet.amount,
                                outcome: BetOutcome::Win,
                                payout,
                                created_at: Utc::now(),
                            })
                            .await?;
                        report.winners.push((bet.bettor_id.clone(), payout));
                        self.notify(
                            &bet.bettor_id,
                            &format!(
                                "You won {} on round {}. New balance: {}.",
                                format_gp_full(payout),
                                round_id,
                                format_gp_full(new_balance)
                            ),
                        )
                        .await;
                    } else {
                        self.store
                            .record_bet_history(&BetRecord {
                                user_id: bet.bettor_id.clone(),
                                round_id: round_id.to_string(),
                                side: bet.side,
                                amount: bet.amount,
                                outcome: BetOutcome::Loss,
                                payout: 0,
                                created_at: Utc::now(),
                            })
                            .await?;
                        report.losers.push((bet.bettor_id.clone(), bet.amount));
                    }

                    // Win or lose, every settled bet accrues rakeback.
                    let accrual = rakeback(bet.amount);
                    if accrual > 0 {
                        self.store.add_rakeback(&bet.bettor_id, accrual).await?;
                    }
                }

                report.stats = Some(self.store.record_winner(winning_side).await?);
            }
        }

        info!(
            round_id,
            outcome = ?outcome,
            pot = report.total_pot,
            winners = report.winners.len(),
            losers = report.losers.len(),
            refunded = report.refunded.len(),
            "Round settled"
        );

        Ok(report)
    }

    /// Trigger-boundary wrapper for external `round_result` deliveries:
    /// a result for an unknown or already-settled round is a logged
    /// no-op, not an error.
    pub async fn round_result(
        &self,
        round_id: &str,
        outcome: RoundOutcome,
    ) -> EngineResult<Option<SettlementReport>> {
        match self.settle_round(round_id, outcome).await {
            Ok(report) => Ok(Some(report)),
            Err(EngineError::InvalidStateTransition(reason)) => {
                warn!(round_id, reason, "Ignoring duplicate or stale round result");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Void the active round: refund every bet and clear the slot.
    /// No stats update, no rakeback.
    pub async fn void_round(&self) -> EngineResult<SettlementReport> {
        let mut state = self.state.lock().await;
        let mut round = state.round.take().ok_or_else(|| {
            EngineError::InvalidStateTransition("no active round to void".to_string())
        })?;
        state.closes_at = None;
        round.status = RoundStatus::Void;

        let mut report = SettlementReport {
            round_id: round.round_id.clone(),
            outcome: RoundOutcome::Draw,
            total_pot: round.total_pot(),
            winners: Vec::new(),
            losers: Vec::new(),
            refunded: Vec::new(),
            stats: None,
        };

        for bet in &round.bets {
            self.store
                .adjust_balance(
                    &bet.bettor_id,
                    None,
                    bet.amount,
                    LedgerReason::RoundRefund,
                )
                .await?;
            self.store
                .record_bet_history(&BetRecord {
                    user_id: bet.bettor_id.clone(),
                    round_id: round.round_id.clone(),
                    side: bet.side,
                    amount: bet.amount,
                    outcome: BetOutcome::Refund,
                    payout: bet.amount,
                    created_at: Utc::now(),
                })
                .await?;
            report.refunded.push((bet.bettor_id.clone(), bet.amount));
        }

        info!(round_id = %round.round_id, refunded = report.refunded.len(), "Round voided");
        Ok(report)
    }

    /// Operator escape hatch: atomically clear the round slot and drop
    /// the in-flight bets' association. Does NOT refund — the operator
    /// is expected to have settled or voided first. The queue survives.
    pub async fn force_reset(&self) -> Option<Round> {
        let mut state = self.state.lock().await;
        state.closes_at = None;
        let dropped = state.round.take();
        if let Some(round) = &dropped {
            warn!(
                round_id = %round.round_id,
                bets = round.bets.len(),
                "Active round force-reset; in-flight bets dropped without refund"
            );
        }
        dropped
    }

    // -- Bet placement ---------------------------------------------------

    /// Place a bet on the open round, or replace the caller's existing
    /// bet. With no open round the bet is queued for the next one.
    ///
    /// Replacement refunds the existing bet before debiting the new
    /// amount, so a bettor can always reduce or flip a bet using funds
    /// already committed to it.
    pub async fn place_or_change_bet(
        &self,
        bettor_id: &str,
        display_name: Option<&str>,
        amount: i64,
        side: Side,
    ) -> EngineResult<BetPlacement> {
        if amount < self.min_bet || amount > self.max_bet {
            return Err(EngineError::Validation(format!(
                "bet must be between {} and {}",
                format_gp_full(self.min_bet),
                format_gp_full(self.max_bet)
            )));
        }

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let user = self.store.get_or_create_user(bettor_id, display_name).await?;

        let betting_open = state
            .round
            .as_ref()
            .is_some_and(|r| r.status == RoundStatus::Open);

        if !betting_open {
            if user.balance < amount {
                return Err(EngineError::InsufficientBalance {
                    required: amount,
                    available: user.balance,
                });
            }
            let replaced = state.queued.insert(
                bettor_id.to_string(),
                QueuedBet {
                    amount,
                    side,
                    display_name: display_name.map(String::from),
                },
            );
            info!(
                bettor_id,
                amount,
                side = %side,
                replaced = replaced.is_some(),
                "Bet queued for next round"
            );
            return Ok(BetPlacement::Queued { replaced });
        }

        let Some(round) = state.round.as_mut() else {
            return Err(EngineError::InvalidStateTransition(
                "no active round".to_string(),
            ));
        };
        let existing = round.find_bet(bettor_id).cloned();

        // Funds committed to the current bet count toward the new one.
        let effective_balance = user.balance + existing.as_ref().map_or(0, |b| b.amount);
        if effective_balance < amount {
            return Err(EngineError::InsufficientBalance {
                required: amount,
                available: effective_balance,
            });
        }

        if let Some(existing_bet) = &existing {
            self.store
                .adjust_balance(
                    bettor_id,
                    display_name,
                    existing_bet.amount,
                    LedgerReason::BetChangeRefund,
                )
                .await?;
        }

        let balance_after = self
            .store
            .adjust_balance(bettor_id, display_name, -amount, LedgerReason::Bet)
            .await?;
        round.upsert_bet(bettor_id, amount, side);

        let round_id = round.round_id.clone();
        info!(
            bettor_id,
            round_id,
            amount,
            side = %side,
            changed = existing.is_some(),
            "Bet placed"
        );

        Ok(BetPlacement::Placed {
            round_id,
            changed: existing.is_some(),
            balance_after,
        })
    }

    /// Cancel the caller's bet on the open round, refunding its amount.
    /// Returns `(refunded, new_balance)`.
    pub async fn cancel_bet(&self, bettor_id: &str) -> EngineResult<(i64, i64)> {
        let mut state = self.state.lock().await;

        let round = state.round.as_mut().filter(|r| r.status == RoundStatus::Open).ok_or_else(
            || EngineError::InvalidStateTransition("betting window is closed".to_string()),
        )?;

        let bet = round.remove_bet(bettor_id).ok_or_else(|| {
            EngineError::InvalidStateTransition("no active bet this round".to_string())
        })?;

        let new_balance = self
            .store
            .adjust_balance(bettor_id, None, bet.amount, LedgerReason::BetCancel)
            .await?;

        info!(bettor_id, amount = bet.amount, "Bet cancelled");
        Ok((bet.amount, new_balance))
    }

    // -- Queue accessors -------------------------------------------------

    pub async fn queued_bet(&self, bettor_id: &str) -> Option<QueuedBet> {
        self.state.lock().await.queued.get(bettor_id).cloned()
    }

    /// Remove the caller's queued bet. Queued bets never held funds, so
    /// nothing is refunded.
    pub async fn cancel_queued_bet(&self, bettor_id: &str) -> EngineResult<QueuedBet> {
        self.state
            .lock()
            .await
            .queued
            .remove(bettor_id)
            .ok_or_else(|| {
                EngineError::InvalidStateTransition(
                    "no queued bet for the next round".to_string(),
                )
            })
    }

    // -- Read accessors --------------------------------------------------

    pub async fn snapshot(&self) -> Option<RoundSnapshot> {
        let state = self.state.lock().await;
        let round = state.round.as_ref()?;
        let remaining_secs = state.closes_at.and_then(|deadline| {
            let now = Instant::now();
            (deadline > now).then(|| (deadline - now).as_secs())
        });
        Some(RoundSnapshot {
            round_id: round.round_id.clone(),
            red_name: round.red_name.clone(),
            blue_name: round.blue_name.clone(),
            status: round.status,
            bets: round.bets.clone(),
            remaining_secs,
        })
    }

    pub async fn stats(&self) -> EngineResult<Stats> {
        self.store.stats().await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::RecordingNotifier;

    const M: i64 = 1_000_000;

    async fn engine() -> (RoundEngine, Store, Arc<RecordingNotifier>) {
        let store = Store::open_in_memory().await.unwrap();
        let notifier = Arc::new(RecordingNotifier::new());
        let engine = RoundEngine::new(
            store.clone(),
            notifier.clone(),
            &BettingConfig::default(),
        );
        (engine, store, notifier)
    }

    async fn fund(store: &Store, user: &str, amount: i64) {
        store
            .adjust_balance(user, None, amount, LedgerReason::GpDeposit)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_single_active_round() {
        let (engine, _, _) = engine().await;
        engine.open_round("r1", "Alice", "Bob").await.unwrap();

        let err = engine.open_round("r2", "Carol", "Dave").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidStateTransition(_)));

        // Closing the window doesn't free the slot either.
        engine.close_round().await.unwrap();
        let err = engine.open_round("r2", "Carol", "Dave").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidStateTransition(_)));

        // Settlement does.
        engine
            .settle_round("r1", RoundOutcome::Draw)
            .await
            .unwrap();
        engine.open_round("r2", "Carol", "Dave").await.unwrap();
    }

    #[tokio::test]
    async fn test_bet_bounds_rejected_before_mutation() {
        let (engine, store, _) = engine().await;
        fund(&store, "u1", 10 * M).await;
        engine.open_round("r1", "A", "B").await.unwrap();

        let err = engine
            .place_or_change_bet("u1", None, 500_000, Side::Red)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let err = engine
            .place_or_change_bet("u1", None, 2_000_000_000, Side::Red)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        assert_eq!(store.balance_of("u1").await.unwrap(), 10 * M);
    }

    #[tokio::test]
    async fn test_bet_replace_is_self_consistent() {
        let (engine, store, _) = engine().await;
        fund(&store, "u1", 10 * M).await;
        engine.open_round("r1", "A", "B").await.unwrap();

        engine
            .place_or_change_bet("u1", None, 8 * M, Side::Red)
            .await
            .unwrap();
        assert_eq!(store.balance_of("u1").await.unwrap(), 2 * M);

        // Changing to 9M works even though the standing balance is only
        // 2M: the existing 8M bet is refunded first.
        let placement = engine
            .place_or_change_bet("u1", None, 9 * M, Side::Blue)
            .await
            .unwrap();
        assert_eq!(
            placement,
            BetPlacement::Placed {
                round_id: "r1".to_string(),
                changed: true,
                balance_after: M,
            }
        );
        assert_eq!(store.balance_of("u1").await.unwrap(), 10 * M - 9 * M);

        let snapshot = engine.snapshot().await.unwrap();
        assert_eq!(snapshot.bets.len(), 1);
        assert_eq!(snapshot.bets[0].amount, 9 * M);
        assert_eq!(snapshot.bets[0].side, Side::Blue);
    }

    #[tokio::test]
    async fn test_insufficient_balance_rejected() {
        let (engine, store, _) = engine().await;
        fund(&store, "u1", 2 * M).await;
        engine.open_round("r1", "A", "B").await.unwrap();

        let err = engine
            .place_or_change_bet("u1", None, 5 * M, Side::Red)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InsufficientBalance { required, available }
                if required == 5 * M && available == 2 * M
        ));
        assert_eq!(store.balance_of("u1").await.unwrap(), 2 * M);
    }

    #[tokio::test]
    async fn test_cancel_bet_refunds() {
        let (engine, store, _) = engine().await;
        fund(&store, "u1", 5 * M).await;
        engine.open_round("r1", "A", "B").await.unwrap();
        engine
            .place_or_change_bet("u1", None, 3 * M, Side::Red)
            .await
            .unwrap();

        let (refunded, balance) = engine.cancel_bet("u1").await.unwrap();
        assert_eq!(refunded, 3 * M);
        assert_eq!(balance, 5 * M);

        let err = engine.cancel_bet("u1").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidStateTransition(_)));
    }

    #[tokio::test]
    async fn test_bet_queues_when_no_round_open() {
        let (engine, store, _) = engine().await;
        fund(&store, "u1", 5 * M).await;

        let placement = engine
            .place_or_change_bet("u1", Some("Alice"), 2 * M, Side::Red)
            .await
            .unwrap();
        assert!(matches!(placement, BetPlacement::Queued { replaced: None }));
        // Queuing holds no funds.
        assert_eq!(store.balance_of("u1").await.unwrap(), 5 * M);

        // Re-queue replaces.
        let placement = engine
            .place_or_change_bet("u1", Some("Alice"), 3 * M, Side::Blue)
            .await
            .unwrap();
        match placement {
            BetPlacement::Queued { replaced: Some(old) } => assert_eq!(old.amount, 2 * M),
            other => panic!("expected replaced queue entry, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_carryover_replays_and_drops() {
        let (engine, store, notifier) = engine().await;
        fund(&store, "rich", 5 * M).await;
        fund(&store, "poor", 5 * M).await;

        engine
            .place_or_change_bet("rich", None, 2 * M, Side::Red)
            .await
            .unwrap();
        engine
            .place_or_change_bet("poor", None, 4 * M, Side::Blue)
            .await
            .unwrap();

        // poor's balance drains after queuing.
        store
            .adjust_balance("poor", None, -4 * M, LedgerReason::GpWithdraw)
            .await
            .unwrap();

        let report = engine.open_round("r1", "A", "B").await.unwrap();
        assert_eq!(report.placed.len(), 1);
        assert_eq!(report.placed[0].bettor_id, "rich");
        assert_eq!(report.dropped.len(), 1);
        assert_eq!(report.dropped[0].bettor_id, "poor");
        assert_eq!(report.dropped[0].balance, M);

        // Exactly one debit for the placed bet, nothing for the drop.
        assert_eq!(store.balance_of("rich").await.unwrap(), 3 * M);
        assert_eq!(store.balance_of("poor").await.unwrap(), M);

        // Both bettors got told what happened.
        assert_eq!(notifier.messages_for("rich").len(), 1);
        assert_eq!(notifier.messages_for("poor").len(), 1);

        // The queue is cleared either way.
        assert!(engine.queued_bet("rich").await.is_none());
        assert!(engine.queued_bet("poor").await.is_none());
    }

    #[tokio::test]
    async fn test_settle_draw_refunds_everyone() {
        let (engine, store, _) = engine().await;
        fund(&store, "u1", 10 * M).await;
        fund(&store, "u2", 10 * M).await;
        engine.open_round("r1", "A", "B").await.unwrap();
        engine.place_or_change_bet("u1", None, M, Side::Red).await.unwrap();
        engine.place_or_change_bet("u2", None, 2 * M, Side::Blue).await.unwrap();

        let report = engine.settle_round("r1", RoundOutcome::Draw).await.unwrap();
        assert_eq!(report.refunded.len(), 2);
        assert!(report.winners.is_empty());

        assert_eq!(store.balance_of("u1").await.unwrap(), 10 * M);
        assert_eq!(store.balance_of("u2").await.unwrap(), 10 * M);
        // Draws accrue no rakeback and record no winner.
        assert_eq!(store.rakeback_of("u1").await.unwrap(), 0);
        assert!(store.stats().await.unwrap().last_winner.is_none());
    }

    #[tokio::test]
    async fn test_settle_winner_pays_and_accrues_rakeback() {
        let (engine, store, notifier) = engine().await;
        fund(&store, "winner", 10 * M).await;
        fund(&store, "loser", 10 * M).await;
        engine.open_round("r1", "A", "B").await.unwrap();
        engine
            .place_or_change_bet("winner", None, M, Side::Red)
            .await
            .unwrap();
        engine
            .place_or_change_bet("loser", None, M, Side::Blue)
            .await
            .unwrap();

        let report = engine
            .settle_round("r1", RoundOutcome::Winner(Side::Red))
            .await
            .unwrap();

        // floor(1,000,000 * 1.95) = 1,950,000
        assert_eq!(report.winners, vec![("winner".to_string(), 1_950_000)]);
        assert_eq!(report.losers, vec![("loser".to_string(), M)]);
        assert_eq!(store.balance_of("winner").await.unwrap(), 9 * M + 1_950_000);
        assert_eq!(store.balance_of("loser").await.unwrap(), 9 * M);

        // floor(1,000,000 * 0.003) = 3,000 for both sides.
        assert_eq!(store.rakeback_of("winner").await.unwrap(), 3_000);
        assert_eq!(store.rakeback_of("loser").await.unwrap(), 3_000);

        let stats = report.stats.unwrap();
        assert_eq!(stats.red_streak, 1);
        assert_eq!(stats.last_winner, Some(Side::Red));

        // Winner got a payout notification.
        assert_eq!(notifier.messages_for("winner").len(), 1);
        assert!(notifier.messages_for("loser").is_empty());

        // History recorded for both.
        let winner_stats = store.bet_stats("winner").await.unwrap();
        assert_eq!(winner_stats.wins, 1);
        assert_eq!(winner_stats.net_profit, 950_000);
    }

    #[tokio::test]
    async fn test_settlement_is_exactly_once() {
        let (engine, store, _) = engine().await;
        fund(&store, "u1", 10 * M).await;
        engine.open_round("r1", "A", "B").await.unwrap();
        engine.place_or_change_bet("u1", None, M, Side::Red).await.unwrap();

        engine
            .settle_round("r1", RoundOutcome::Winner(Side::Red))
            .await
            .unwrap();
        let balance = store.balance_of("u1").await.unwrap();

        // Second settlement is rejected and pays nothing.
        let err = engine
            .settle_round("r1", RoundOutcome::Winner(Side::Red))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidStateTransition(_)));
        assert_eq!(store.balance_of("u1").await.unwrap(), balance);

        // At the trigger boundary the duplicate is a quiet no-op.
        let result = engine
            .round_result("r1", RoundOutcome::Winner(Side::Red))
            .await
            .unwrap();
        assert!(result.is_none());

        // Unknown round ids are equally ignored.
        let result = engine
            .round_result("never-existed", RoundOutcome::Draw)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_closed_round_queues_new_bets() {
        let (engine, store, _) = engine().await;
        fund(&store, "u1", 10 * M).await;
        engine.open_round("r1", "A", "B").await.unwrap();
        engine.close_round().await.unwrap();

        let placement = engine
            .place_or_change_bet("u1", None, M, Side::Red)
            .await
            .unwrap();
        assert!(matches!(placement, BetPlacement::Queued { .. }));
        assert_eq!(store.balance_of("u1").await.unwrap(), 10 * M);
    }

    #[tokio::test]
    async fn test_void_round_refunds_without_stats() {
        let (engine, store, _) = engine().await;
        fund(&store, "u1", 10 * M).await;
        engine.open_round("r1", "A", "B").await.unwrap();
        engine.place_or_change_bet("u1", None, 2 * M, Side::Red).await.unwrap();

        let report = engine.void_round().await.unwrap();
        assert_eq!(report.refunded.len(), 1);
        assert_eq!(store.balance_of("u1").await.unwrap(), 10 * M);
        assert_eq!(store.rakeback_of("u1").await.unwrap(), 0);
        assert!(engine.snapshot().await.is_none());
    }

    #[tokio::test]
    async fn test_force_reset_drops_without_refund() {
        let (engine, store, _) = engine().await;
        fund(&store, "u1", 10 * M).await;
        engine.open_round("r1", "A", "B").await.unwrap();
        engine.place_or_change_bet("u1", None, 2 * M, Side::Red).await.unwrap();

        let dropped = engine.force_reset().await.unwrap();
        assert_eq!(dropped.bets.len(), 1);
        // Deliberately no refund.
        assert_eq!(store.balance_of("u1").await.unwrap(), 8 * M);
        assert!(engine.snapshot().await.is_none());

        // The slot is free for the next round.
        engine.open_round("r2", "C", "D").await.unwrap();
    }

    #[tokio::test]
    async fn test_countdown_tick_closes_round() {
        let store = Store::open_in_memory().await.unwrap();
        let notifier = Arc::new(RecordingNotifier::new());
        let cfg = BettingConfig {
            window_secs: 0, // deadline elapses immediately
            ..BettingConfig::default()
        };
        let engine = RoundEngine::new(store, notifier, &cfg);

        engine.open_round("r1", "A", "B").await.unwrap();
        let closed = engine.tick().await.unwrap();
        assert_eq!(closed.as_deref(), Some("r1"));
        assert_eq!(
            engine.snapshot().await.unwrap().status,
            RoundStatus::Closed
        );

        // Subsequent ticks are no-ops.
        assert!(engine.tick().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_queued_bet_accessors() {
        let (engine, store, _) = engine().await;
        fund(&store, "u1", 5 * M).await;

        engine
            .place_or_change_bet("u1", None, 2 * M, Side::Red)
            .await
            .unwrap();
        assert_eq!(engine.queued_bet("u1").await.unwrap().amount, 2 * M);

        let cancelled = engine.cancel_queued_bet("u1").await.unwrap();
        assert_eq!(cancelled.amount, 2 * M);
        assert!(engine.queued_bet("u1").await.is_none());
        assert!(engine.cancel_queued_bet("u1").await.is_err());
    }
}
