//! GP bank operations.
//!
//! The in-game deposit/withdraw surface: an external collector hands
//! over GP (deposit) or pays it out (withdraw), keyed by a user id the
//! caller has already resolved through its linking table. Unlike the
//! ledger's clamp-to-zero backstop, `withdraw_gp` hard-rejects an
//! overdraw so the collector never pays out more than the user holds.

use std::sync::Arc;

use tracing::info;

use crate::error::{EngineError, EngineResult};
use crate::notify::Notifier;
use crate::storage::Store;
use crate::types::{format_gp_full, LedgerReason, User, UserBetStats};

pub struct Bank {
    store: Store,
    notifier: Arc<dyn Notifier>,
}

impl Bank {
    pub fn new(store: Store, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// Credit GP handed to the collector in game.
    pub async fn deposit_gp(
        &self,
        user_id: &str,
        display_name: Option<&str>,
        amount: i64,
    ) -> EngineResult<i64> {
        if amount <= 0 {
            return Err(EngineError::Validation("deposit must be positive".to_string()));
        }
        let new_balance = self
            .store
            .adjust_balance(user_id, display_name, amount, LedgerReason::GpDeposit)
            .await?;
        info!(user_id, amount, new_balance, "GP deposit");
        Ok(new_balance)
    }

    /// Debit GP for an in-game payout. Rejects (rather than clamps) when
    /// the balance doesn't cover the requested amount.
    pub async fn withdraw_gp(&self, user_id: &str, amount: i64) -> EngineResult<i64> {
        if amount <= 0 {
            return Err(EngineError::Validation("withdrawal must be positive".to_string()));
        }
        let balance = self.store.balance_of(user_id).await?;
        if balance < amount {
            return Err(EngineError::InsufficientBalance {
                required: amount,
                available: balance,
            });
        }
        let new_balance = self
            .store
            .adjust_balance(user_id, None, -amount, LedgerReason::GpWithdraw)
            .await?;
        info!(user_id, amount, new_balance, "GP withdrawal");
        Ok(new_balance)
    }

    pub async fn balance_of(&self, user_id: &str) -> EngineResult<i64> {
        self.store.balance_of(user_id).await
    }

    pub async fn get_or_create_user(
        &self,
        user_id: &str,
        display_name: Option<&str>,
    ) -> EngineResult<User> {
        self.store.get_or_create_user(user_id, display_name).await
    }

    /// Operator credit.
    pub async fn admin_add_gp(
        &self,
        user_id: &str,
        display_name: Option<&str>,
        amount: i64,
    ) -> EngineResult<i64> {
        if amount <= 0 {
            return Err(EngineError::Validation("amount must be positive".to_string()));
        }
        let new_balance = self
            .store
            .adjust_balance(user_id, display_name, amount, LedgerReason::AdminAddGp)
            .await?;
        info!(user_id, amount, new_balance, "Admin GP credit");
        Ok(new_balance)
    }

    // -- Rakeback --------------------------------------------------------

    pub async fn rakeback_of(&self, user_id: &str) -> EngineResult<i64> {
        self.store.rakeback_of(user_id).await
    }

    /// Claim accrued rakeback into the balance. Returns
    /// `(claimed, new_balance)`; `(0, balance)` when nothing accrued.
    pub async fn claim_rakeback(
        &self,
        user_id: &str,
        display_name: Option<&str>,
    ) -> EngineResult<(i64, i64)> {
        let (claimed, new_balance) = self.store.claim_rakeback(user_id, display_name).await?;
        if claimed > 0 {
            info!(user_id, claimed, new_balance, "Rakeback claimed");
            let message = format!(
                "You claimed {} in rakeback. New balance: {}.",
                format_gp_full(claimed),
                format_gp_full(new_balance)
            );
            if let Err(e) = self.notifier.notify(user_id, &message).await {
                tracing::warn!(user_id, error = %e, "Notification delivery failed");
            }
        }
        Ok((claimed, new_balance))
    }

    // -- Read accessors --------------------------------------------------

    pub async fn bet_stats(&self, user_id: &str) -> EngineResult<UserBetStats> {
        self.store.bet_stats(user_id).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
