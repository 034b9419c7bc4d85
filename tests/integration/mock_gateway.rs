//! Mock payment gateway for integration testing.
//!
//! Provides a deterministic `PaymentGateway` implementation that issues
//! invoices, advances their statuses under test control, accepts or
//! rejects payouts, and reports wallet balances — all in-memory with no
//! external dependencies.

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;

use duelbook::gateway::{
    Invoice, InvoiceRequest, InvoiceStatus, PaymentGateway, PayoutReceipt, PayoutRequest,
    WalletBalance,
};
use duelbook::types::{Currency, PaymentStatus};

/// A mock payment gateway for deterministic testing.
///
/// All state is in-memory. Invoice statuses, wallet balances, and
/// failure injection are fully controllable from test code.
pub struct MockGateway {
    statuses: Mutex<HashMap<String, PaymentStatus>>,
    balances: Mutex<HashMap<Currency, Decimal>>,
    payouts: Mutex<Vec<PayoutRequest>>,
    payout_fails: Mutex<bool>,
    /// If set, all invoice status lookups will return this error.
    force_error: Mutex<Option<String>>,
    invoice_counter: Mutex<u32>,
}

impl MockGateway {
    /// Create a mock with generously funded operator wallets.
    pub fn new() -> Self {
        let mut balances = HashMap::new();
        balances.insert(Currency::Btc, Decimal::from(100_000));
        balances.insert(Currency::Usdt, Decimal::from(100_000));
        balances.insert(Currency::Ltc, Decimal::from(100_000));
        balances.insert(Currency::Eth, Decimal::ONE);

        Self {
            statuses: Mutex::new(HashMap::new()),
            balances: Mutex::new(balances),
            payouts: Mutex::new(Vec::new()),
            payout_fails: Mutex::new(false),
            force_error: Mutex::new(None),
            invoice_counter: Mutex::new(0),
        }
    }

    /// Advance an invoice to a new status (simulates the user paying).
    pub fn set_status(&self, txn_id: &str, status: PaymentStatus) {
        self.statuses.lock().unwrap().insert(txn_id.to_string(), status);
    }

    /// Set an operator wallet balance.
    pub fn set_balance(&self, currency: Currency, balance: Decimal) {
        self.balances.lock().unwrap().insert(currency, balance);
    }

    /// Make all subsequent payouts fail.
    pub fn fail_payouts(&self, fail: bool) {
        *self.payout_fails.lock().unwrap() = fail;
    }

    /// Force all status lookups to return an error.
    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    /// Clear any forced error.
    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    /// Get all payout requests accepted so far.
    pub fn get_payouts(&self) -> Vec<PayoutRequest> {
        self.payouts.lock().unwrap().clone()
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<Invoice> {
        let mut counter = self.invoice_counter.lock().unwrap();
        *counter += 1;
        let txn_id = format!("mock-txn-{counter}");
        self.statuses
            .lock()
            .unwrap()
            .insert(txn_id.clone(), PaymentStatus::Pending);
        Ok(Invoice {
            txn_id,
            wallet_hash: Some("mock-wallet-address".to_string()),
            invoice_url: Some("https://mock.example/invoice".to_string()),
            source_currency: Some("USDT".to_string()),
            source_amount: Some(request.amount_usd),
        })
    }

    async fn get_invoice(&self, txn_id: &str) -> Result<Invoice> {
        Ok(Invoice {
            txn_id: txn_id.to_string(),
            wallet_hash: Some("mock-wallet-address".to_string()),
            invoice_url: Some("https://mock.example/invoice".to_string()),
            source_currency: Some("USDT".to_string()),
            source_amount: None,
        })
    }

    async fn check_status(&self, txn_id: &str) -> Result<InvoiceStatus> {
        if let Some(msg) = self.force_error.lock().unwrap().as_ref() {
            anyhow::bail!("{msg}");
        }
        let status = self
            .statuses
            .lock()
            .unwrap()
            .get(txn_id)
            .copied()
            .unwrap_or(PaymentStatus::Pending);
        Ok(InvoiceStatus { status })
    }

    async fn create_payout(&self, request: &PayoutRequest) -> Result<PayoutReceipt> {
        if *self.payout_fails.lock().unwrap() {
            anyhow::bail!("mock payout rejected");
        }
        let mut payouts = self.payouts.lock().unwrap();
        payouts.push(request.clone());
        Ok(PayoutReceipt {
            txn_id: Some(format!("mock-payout-{}", payouts.len())),
        })
    }

    async fn wallet_balance(&self, currency: Currency) -> Result<WalletBalance> {
        let balance = self
            .balances
            .lock()
            .unwrap()
            .get(&currency)
            .copied()
            .unwrap_or(Decimal::ZERO);
        Ok(WalletBalance {
            currency,
            balance,
            balance_usd: None,
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}
