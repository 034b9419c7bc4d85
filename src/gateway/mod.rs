//! Payment gateway integrations.
//!
//! Defines the `PaymentGateway` trait and provides the Plisio
//! implementation. The engine only ever talks to the trait, so tests
//! substitute an in-memory gateway and the desks don't care which
//! processor is behind the invoices and payouts.

pub mod plisio;

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::types::{Currency, PaymentStatus};

/// Request to create a deposit invoice denominated in USD.
#[derive(Debug, Clone)]
pub struct InvoiceRequest {
    /// Caller-side order reference (the user id; the gateway client
    /// adds a uniqueness suffix).
    pub order_id: String,
    pub amount_usd: Decimal,
    /// Human-readable order description shown on the payment page.
    pub order_name: String,
}

/// A created (or fetched) deposit invoice.
#[derive(Debug, Clone, Default)]
pub struct Invoice {
    pub txn_id: String,
    /// Address the user sends funds to.
    pub wallet_hash: Option<String>,
    /// Hosted payment page URL.
    pub invoice_url: Option<String>,
    /// Ticker of the currency the invoice is payable in.
    pub source_currency: Option<String>,
    /// Amount due in the source currency.
    pub source_amount: Option<Decimal>,
}

/// Current status of an invoice as reported by the gateway.
#[derive(Debug, Clone)]
pub struct InvoiceStatus {
    pub status: PaymentStatus,
}

/// Request to pay out crypto to a user's wallet.
#[derive(Debug, Clone)]
pub struct PayoutRequest {
    pub currency: Currency,
    pub address: String,
    pub amount_usd: Decimal,
}

/// Receipt for an accepted payout.
#[derive(Debug, Clone)]
pub struct PayoutReceipt {
    /// External transaction reference, when the gateway provides one.
    pub txn_id: Option<String>,
}

/// Operator wallet balance in one currency.
#[derive(Debug, Clone)]
pub struct WalletBalance {
    pub currency: Currency,
    pub balance: Decimal,
    pub balance_usd: Option<Decimal>,
}

/// Abstraction over crypto payment processors.
///
/// Invoice queries are cheap and safe to repeat; `create_payout` moves
/// real funds and must only be called after the caller has committed
/// the corresponding ledger debit.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a deposit invoice and return its id.
    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<Invoice>;

    /// Fetch full invoice details (payment address, hosted page).
    async fn get_invoice(&self, txn_id: &str) -> Result<Invoice>;

    /// Query the current status of an invoice.
    async fn check_status(&self, txn_id: &str) -> Result<InvoiceStatus>;

    /// Send crypto to an external address.
    async fn create_payout(&self, request: &PayoutRequest) -> Result<PayoutReceipt>;

    /// Operator wallet balance for one currency.
    async fn wallet_balance(&self, currency: Currency) -> Result<WalletBalance>;

    /// Gateway name for logging and identification.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------
