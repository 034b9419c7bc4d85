//! Withdrawal orchestrator.
//!
//! Two-phase: validate (address format, USD bounds, required balance,
//! operator wallet pre-check), then commit — debit the ledger, record
//! the withdrawal `pending`, and only then attempt the external payout.
//! A payout failure parks the record in `failed` with the debit intact;
//! the failed set is the manual remediation queue. The debit is never
//! rolled back automatically.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::WithdrawalsConfig;
use crate::error::{EngineError, EngineResult};
use crate::gateway::{PaymentGateway, PayoutRequest, WalletBalance};
use crate::notify::Notifier;
use crate::storage::Store;
use crate::types::{
    format_gp_full, CryptoWithdrawal, Currency, LedgerReason, Rates, WithdrawalStatus,
};

/// Safety buffer on the wallet pre-check for native coins (network fees
/// come out of the same balance). USDT payouts are 1:1 with USD.
const NATIVE_COIN_BUFFER: Decimal = dec!(1.01);

/// What the caller gets back after a committed withdrawal. `status` is
/// `Processing` when the payout was accepted and `Failed` when it needs
/// manual remediation — the GP debit stands in both cases.
#[derive(Debug, Clone)]
pub struct WithdrawalReceipt {
    pub withdrawal_id: String,
    pub amount_usd: Decimal,
    pub amount_gp: i64,
    pub currency: Currency,
    pub address: String,
    pub status: WithdrawalStatus,
    pub balance_after: i64,
    /// External transaction reference, when the payout was accepted.
    pub txn_ref: Option<String>,
}

/// Per-currency operator wallet balance, errors collected per entry.
#[derive(Debug, Clone)]
pub struct WalletBalanceEntry {
    pub currency: Currency,
    pub result: Result<WalletBalance, String>,
}

pub struct WithdrawalDesk {
    store: Store,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    rates: Rates,
    min_usd: Decimal,
    max_usd: Decimal,
    min_eth_for_gas: Decimal,
}

impl WithdrawalDesk {
    pub fn new(
        store: Store,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        rates: Rates,
        cfg: &WithdrawalsConfig,
    ) -> EngineResult<Self> {
        Ok(Self {
            store,
            gateway,
            notifier,
            rates,
            min_usd: decimal(cfg.min_usd)?,
            max_usd: decimal(cfg.max_usd)?,
            min_eth_for_gas: decimal(cfg.min_eth_for_gas)?,
        })
    }

    /// Fire-and-forget notify; delivery failure never affects the ledger.
    async fn notify(&self, user_id: &str, message: &str) {
        if let Err(e) = self.notifier.notify(user_id, message).await {
            warn!(user_id, error = %e, "Notification delivery failed");
        }
    }

    /// Request a crypto withdrawal of `amount_usd` to `address`.
    ///
    /// Everything up to the wallet pre-check rejects without touching
    /// the ledger. Past that point the debit is committed and is not
    /// rolled back, whatever the payout does.
    pub async fn request_withdrawal(
        &self,
        user_id: &str,
        display_name: Option<&str>,
        currency: Currency,
        amount_usd: Decimal,
        address: &str,
    ) -> EngineResult<WithdrawalReceipt> {
        // -- Phase (a): validate, no mutation -----------------------------

        if amount_usd <= Decimal::ZERO {
            return Err(EngineError::Validation(
                "withdrawal amount must be a positive USD value".to_string(),
            ));
        }
        if amount_usd < self.min_usd {
            return Err(EngineError::Validation(format!(
                "minimum withdrawal is ${:.2}",
                self.min_usd
            )));
        }
        if amount_usd > self.max_usd {
            return Err(EngineError::Validation(format!(
                "maximum withdrawal is ${:.2}",
                self.max_usd
            )));
        }
        currency.validate_address(address)?;

        let required_gp = self
            .rates
            .withdrawal_required_gp(amount_usd)
            .ok_or_else(|| EngineError::Validation("withdrawal amount out of range".to_string()))?;

        let user = self.store.get_or_create_user(user_id, display_name).await?;
        if user.balance < required_gp {
            return Err(EngineError::InsufficientBalance {
                required: required_gp,
                available: user.balance,
            });
        }

        self.precheck_operator_wallet(currency, amount_usd).await?;

        // -- Phase (b): commit, then attempt ------------------------------

        let withdrawal_id = format!("WD-{}", Uuid::new_v4());
        let balance_after = self
            .store
            .adjust_balance(user_id, display_name, -required_gp, LedgerReason::CryptoWithdrawal)
            .await?;

        let record = CryptoWithdrawal {
            withdrawal_id: withdrawal_id.clone(),
            user_id: user_id.to_string(),
            amount_gp: required_gp,
            amount_usd,
            currency,
            address: address.to_string(),
            status: WithdrawalStatus::Pending,
            txn_hash: None,
            created_at: Utc::now(),
            processed_at: None,
        };
        self.store.record_crypto_withdrawal(&record).await?;

        info!(
            user_id,
            withdrawal_id,
            amount_usd = %amount_usd,
            required_gp,
            currency = %currency,
            "Crypto withdrawal committed, attempting payout"
        );

        // The debit above was fast and local; this call is slow network
        // I/O and runs with no engine lock held.
        let payout = self
            .gateway
            .create_payout(&PayoutRequest {
                currency,
                address: address.to_string(),
                amount_usd,
            })
            .await;

        match payout {
            Ok(receipt) => {
                self.store
                    .update_withdrawal_status(
                        &withdrawal_id,
                        WithdrawalStatus::Processing,
                        receipt.txn_id.as_deref(),
                    )
                    .await?;
                info!(withdrawal_id, txn_ref = ?receipt.txn_id, "Payout accepted");

                self.notify(
                    user_id,
                    &format!(
                        "Withdrawal {} submitted: {} → ${:.2} {}. New balance: {}.",
                        withdrawal_id,
                        format_gp_full(required_gp),
                        amount_usd,
                        currency.display_name(),
                        format_gp_full(balance_after)
                    ),
                )
                .await;

                Ok(WithdrawalReceipt {
                    withdrawal_id,
                    amount_usd,
                    amount_gp: required_gp,
                    currency,
                    address: address.to_string(),
                    status: WithdrawalStatus::Processing,
                    balance_after,
                    txn_ref: receipt.txn_id,
                })
            }
            Err(e) => {
                // Terminal failure: keep the debit, park for manual
                // remediation. Never auto-refund.
                self.store
                    .update_withdrawal_status(&withdrawal_id, WithdrawalStatus::Failed, None)
                    .await?;
                error!(withdrawal_id, error = %e, "Payout failed — manual remediation required");

                self.notify(
                    user_id,
                    &format!(
                        "Withdrawal {} is pending manual processing. Your GP has been \
                         deducted; an operator will send ${:.2} {} to {} within 24 hours.",
                        withdrawal_id,
                        amount_usd,
                        currency.display_name(),
                        address
                    ),
                )
                .await;

                Ok(WithdrawalReceipt {
                    withdrawal_id,
                    amount_usd,
                    amount_gp: required_gp,
                    currency,
                    address: address.to_string(),
                    status: WithdrawalStatus::Failed,
                    balance_after,
                    txn_ref: None,
                })
            }
        }
    }

    /// Pre-check the operator wallet can actually fund this payout
    /// before committing any debit. ERC20 payouts additionally need an
    /// ETH balance to pay gas from.
    async fn precheck_operator_wallet(
        &self,
        currency: Currency,
        amount_usd: Decimal,
    ) -> EngineResult<()> {
        if currency == Currency::Usdt {
            let eth = self
                .gateway
                .wallet_balance(Currency::Eth)
                .await
                .map_err(EngineError::gateway)?;
            if eth.balance < self.min_eth_for_gas {
                return Err(EngineError::Gateway(format!(
                    "withdrawal temporarily unavailable: operator wallet holds {} ETH, \
                     below the {} ETH needed for ERC20 gas",
                    eth.balance, self.min_eth_for_gas
                )));
            }
        }

        let wallet = self
            .gateway
            .wallet_balance(currency)
            .await
            .map_err(EngineError::gateway)?;

        let buffer = if currency == Currency::Usdt {
            Decimal::ONE
        } else {
            NATIVE_COIN_BUFFER
        };
        let required = amount_usd * buffer;
        // Prefer the gateway's own USD valuation; fall back to the raw
        // balance for gateways that don't report one.
        let available = wallet.balance_usd.unwrap_or(wallet.balance);

        if available < required {
            return Err(EngineError::Gateway(format!(
                "withdrawal temporarily unavailable: operator {} wallet holds ${available}, \
                 ${required} required",
                currency.ticker()
            )));
        }
        Ok(())
    }

    /// Operator remediation: mark a withdrawal completed (payout sent,
    /// manually or by the gateway) and tell the user.
    pub async fn mark_completed(
        &self,
        withdrawal_id: &str,
        txn_hash: Option<&str>,
    ) -> EngineResult<CryptoWithdrawal> {
        let withdrawal = self
            .store
            .get_withdrawal(withdrawal_id)
            .await?
            .ok_or_else(|| {
                EngineError::Validation(format!("unknown withdrawal: {withdrawal_id}"))
            })?;

        self.store
            .update_withdrawal_status(withdrawal_id, WithdrawalStatus::Completed, txn_hash)
            .await?;
        info!(withdrawal_id, "Withdrawal completed");

        self.notify(
            &withdrawal.user_id,
            &format!(
                "Crypto withdrawal complete: ${:.2} {} sent to {}.",
                withdrawal.amount_usd,
                withdrawal.currency.display_name(),
                withdrawal.address
            ),
        )
        .await;

        self.store
            .get_withdrawal(withdrawal_id)
            .await?
            .ok_or_else(|| {
                EngineError::Validation(format!("unknown withdrawal: {withdrawal_id}"))
            })
    }

    // -- Read accessors --------------------------------------------------

    /// Withdrawals awaiting a payout attempt's resolution.
    pub async fn pending_withdrawals(&self) -> EngineResult<Vec<CryptoWithdrawal>> {
        self.store.withdrawals_by_status(WithdrawalStatus::Pending).await
    }

    /// The manual remediation queue.
    pub async fn failed_withdrawals(&self) -> EngineResult<Vec<CryptoWithdrawal>> {
        self.store.withdrawals_by_status(WithdrawalStatus::Failed).await
    }

    pub async fn recent_withdrawals(
        &self,
        user_id: &str,
        limit: u32,
    ) -> EngineResult<Vec<CryptoWithdrawal>> {
        self.store.recent_withdrawals(user_id, limit).await
    }

    /// Operator wallet balances across currencies, one gateway query
    /// each; a failing currency doesn't fail the others.
    pub async fn wallet_balances(&self, currencies: &[Currency]) -> Vec<WalletBalanceEntry> {
        let mut entries = Vec::with_capacity(currencies.len());
        for &currency in currencies {
            let result = self
                .gateway
                .wallet_balance(currency)
                .await
                .map_err(|e| e.to_string());
            entries.push(WalletBalanceEntry { currency, result });
        }
        entries
    }
}

fn decimal(value: f64) -> EngineResult<Decimal> {
    Decimal::from_f64_retain(value)
        .ok_or_else(|| EngineError::Validation(format!("invalid USD amount in config: {value}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
