//! Crypto deposit intake and reconciliation.
//!
//! Intake creates a gateway invoice and records it `pending`; the
//! reconciler cycle then converges stored statuses with the gateway's
//! ground truth on a fixed interval. Payments are polled serially with
//! a small delay between lookups, a single payment's failure never
//! aborts the rest of the cycle, and the credit on completion is issued
//! exactly once — guarded by the status stored before the update.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use crate::config::DepositsConfig;
use crate::error::{EngineError, EngineResult};
use crate::gateway::{InvoiceRequest, PaymentGateway};
use crate::notify::Notifier;
use crate::storage::Store;
use crate::types::{format_gp_full, CryptoPayment, LedgerReason, PaymentStatus, Rates};

/// Invoice details returned to the caller for display.
#[derive(Debug, Clone)]
pub struct DepositInvoice {
    pub txn_id: String,
    pub amount_usd: Decimal,
    /// GP the user will be credited on completion.
    pub amount_gp: i64,
    pub currency: String,
    pub wallet_hash: Option<String>,
    pub invoice_url: Option<String>,
    pub source_amount: Option<Decimal>,
}

/// Summary of one reconciler cycle.
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    /// Stale pending payments transitioned to `expired`.
    pub expired: u64,
    /// Pending payments polled this cycle.
    pub checked: usize,
    /// Payments that completed and credited this cycle.
    pub completed: usize,
}

pub struct DepositDesk {
    store: Store,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn Notifier>,
    rates: Rates,
    min_usd: Decimal,
    max_usd: Decimal,
    lookback: ChronoDuration,
    per_payment_delay: Duration,
}

impl DepositDesk {
    pub fn new(
        store: Store,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        rates: Rates,
        cfg: &DepositsConfig,
    ) -> EngineResult<Self> {
        Ok(Self {
            store,
            gateway,
            notifier,
            rates,
            min_usd: decimal(cfg.min_usd)?,
            max_usd: decimal(cfg.max_usd)?,
            lookback: ChronoDuration::hours(cfg.lookback_hours),
            per_payment_delay: Duration::from_millis(cfg.per_payment_delay_ms),
        })
    }

    // -- Intake ----------------------------------------------------------

    /// Create a deposit invoice for `amount_usd` and record it pending.
    /// The GP credit lands later, when the reconciler sees the invoice
    /// complete.
    pub async fn create_deposit(
        &self,
        user_id: &str,
        display_name: Option<&str>,
        amount_usd: Decimal,
    ) -> EngineResult<DepositInvoice> {
        if amount_usd <= Decimal::ZERO {
            return Err(EngineError::Validation(
                "deposit amount must be a positive USD value".to_string(),
            ));
        }
        if amount_usd < self.min_usd {
            return Err(EngineError::Validation(format!(
                "minimum deposit is ${:.2}",
                self.min_usd
            )));
        }
        if amount_usd > self.max_usd {
            return Err(EngineError::Validation(format!(
                "maximum deposit is ${:.2}",
                self.max_usd
            )));
        }

        let amount_gp = self
            .rates
            .deposit_gp(amount_usd)
            .ok_or_else(|| EngineError::Validation("deposit amount out of range".to_string()))?;

        self.store.get_or_create_user(user_id, display_name).await?;

        let invoice = self
            .gateway
            .create_invoice(&InvoiceRequest {
                order_id: user_id.to_string(),
                amount_usd,
                order_name: format!("{} GP Deposit", format_gp_full(amount_gp)),
            })
            .await
            .map_err(EngineError::gateway)?;

        // The creation response is sparse; the details call carries the
        // payment address and hosted page.
        let details = self
            .gateway
            .get_invoice(&invoice.txn_id)
            .await
            .map_err(EngineError::gateway)?;

        let currency = details
            .source_currency
            .or(invoice.source_currency)
            .unwrap_or_else(|| "USDT".to_string());
        let wallet_hash = details.wallet_hash.or(invoice.wallet_hash);
        let invoice_url = details.invoice_url.or(invoice.invoice_url);
        let source_amount = details.source_amount.or(invoice.source_amount);

        let payment = CryptoPayment {
            txn_id: invoice.txn_id.clone(),
            user_id: user_id.to_string(),
            amount_usd,
            amount_gp,
            currency: currency.clone(),
            wallet_hash: wallet_hash.clone(),
            invoice_url: invoice_url.clone(),
            status: PaymentStatus::Pending,
            created_at: Utc::now(),
            confirmed_at: None,
        };
        self.store.record_crypto_payment(&payment).await?;

        info!(
            user_id,
            txn_id = %invoice.txn_id,
            amount_usd = %amount_usd,
            amount_gp,
            "Crypto deposit created"
        );

        Ok(DepositInvoice {
            txn_id: invoice.txn_id,
            amount_usd,
            amount_gp,
            currency,
            wallet_hash,
            invoice_url,
            source_amount,
        })
    }

    // -- Reconciliation --------------------------------------------------

    /// One reconciler cycle: expire stale invoices, then poll every
    /// pending payment inside the lookback window, serialized with a
    /// small delay between lookups. Per-payment failures are logged and
    /// skipped; the cycle always runs to the end of its list.
    pub async fn run_cycle(&self) -> EngineResult<ReconcileReport> {
        let cutoff = Utc::now() - self.lookback;
        let mut report = ReconcileReport::default();

        report.expired = self.store.expire_stale_pending(cutoff).await?;
        if report.expired > 0 {
            info!(expired = report.expired, "Stale pending deposits expired");
        }

        let pending = self.store.pending_payments_since(cutoff).await?;
        if pending.is_empty() {
            return Ok(report);
        }

        info!(count = pending.len(), "Checking pending crypto payments");

        for payment in pending {
            report.checked += 1;

            match self.gateway.check_status(&payment.txn_id).await {
                Ok(remote) => {
                    if remote.status != payment.status {
                        self.reconcile_payment(&payment, remote.status, &mut report)
                            .await?;
                    }
                }
                Err(e) => {
                    // Skip this payment; the next tick retries it.
                    warn!(txn_id = %payment.txn_id, error = %e, "Payment status lookup failed");
                }
            }

            sleep(self.per_payment_delay).await;
        }

        Ok(report)
    }

    /// Persist a status change, crediting the ledger exactly once on the
    /// transition into `Completed`.
    async fn reconcile_payment(
        &self,
        payment: &CryptoPayment,
        new_status: PaymentStatus,
        report: &mut ReconcileReport,
    ) -> EngineResult<()> {
        self.store
            .update_payment_status(&payment.txn_id, new_status)
            .await?;
        info!(
            txn_id = %payment.txn_id,
            from = %payment.status,
            to = %new_status,
            "Payment status changed"
        );

        // The guard is the status stored *before* this update: a payment
        // already completed never re-enters the pending poll set, so the
        // credit cannot be issued twice.
        if new_status == PaymentStatus::Completed && payment.status != PaymentStatus::Completed {
            let new_balance = self
                .store
                .adjust_balance(
                    &payment.user_id,
                    None,
                    payment.amount_gp,
                    LedgerReason::CryptoDeposit,
                )
                .await?;
            report.completed += 1;

            info!(
                user_id = %payment.user_id,
                txn_id = %payment.txn_id,
                amount_gp = payment.amount_gp,
                new_balance,
                "Crypto deposit completed and credited"
            );

            let message = format!(
                "Crypto deposit confirmed: ${:.2} → {}. New balance: {}.",
                payment.amount_usd,
                format_gp_full(payment.amount_gp),
                format_gp_full(new_balance)
            );
            if let Err(e) = self.notifier.notify(&payment.user_id, &message).await {
                warn!(user_id = %payment.user_id, error = %e, "Notification delivery failed");
            }
        }

        Ok(())
    }

    // -- Read accessors --------------------------------------------------

    pub async fn recent_deposits(
        &self,
        user_id: &str,
        limit: u32,
    ) -> EngineResult<Vec<CryptoPayment>> {
        self.store.recent_payments(user_id, limit).await
    }
}

fn decimal(value: f64) -> EngineResult<Decimal> {
    Decimal::from_f64_retain(value)
        .ok_or_else(|| EngineError::Validation(format!("invalid USD amount in config: {value}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
