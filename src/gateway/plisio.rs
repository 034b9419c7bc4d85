//! Plisio crypto-payment gateway integration.
//!
//! Invoice creation, status polling, payouts, and wallet balances.
//! Plisio wraps every response in a `{status, data}` envelope; `status`
//! is `"success"` or `"error"`, with the error message inside `data`.
//!
//! API docs: https://plisio.net/documentation
//! Base URL: https://plisio.net/api/v1
//! Auth: `api_key` query parameter on every request.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use super::{
    Invoice, InvoiceRequest, InvoiceStatus, PaymentGateway, PayoutReceipt, PayoutRequest,
    WalletBalance,
};
use crate::types::{Currency, PaymentStatus};

const GATEWAY_NAME: &str = "plisio";

// ---------------------------------------------------------------------------
// API response types (Plisio JSON → Rust)
// ---------------------------------------------------------------------------

/// The `{status, data}` envelope around every Plisio response.
#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Invoice shape from `/invoices/new` and `/operations/{txn_id}`.
/// We only deserialize the fields we need.
#[derive(Debug, Deserialize)]
struct PlisioInvoice {
    txn_id: String,
    #[serde(default)]
    wallet_hash: Option<String>,
    #[serde(default)]
    invoice_url: Option<String>,
    #[serde(default)]
    source_currency: Option<String>,
    #[serde(default)]
    source_amount: Option<Decimal>,
    #[serde(default)]
    status: Option<String>,
}

/// Payout shape from `/operations/withdraw`.
#[derive(Debug, Deserialize)]
struct PlisioPayout {
    #[serde(default)]
    txn_id: Option<String>,
    #[serde(default)]
    id: Option<String>,
}

/// Balance shape from `/balances/{currency}`. Amounts arrive as strings.
#[derive(Debug, Deserialize)]
struct PlisioBalance {
    #[serde(default)]
    balance: Option<String>,
    #[serde(default)]
    balance_usd: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Plisio platform client.
pub struct PlisioClient {
    http: Client,
    api_key: SecretString,
    base_url: String,
}

impl PlisioClient {
    pub fn new(api_key: SecretString, base_url: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("duelbook/0.1.0 (wagering-ledger)")
            .build()
            .context("Failed to build HTTP client for Plisio")?;

        Ok(Self {
            http,
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://plisio.net/api/v1".to_string()),
        })
    }

    // -- Internal helpers ------------------------------------------------

    /// GET a Plisio endpoint, unwrap the envelope, and deserialize the
    /// payload. The api_key is appended to every query.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}/{}", self.base_url, path);
        debug!(url = %url, "Plisio request");

        let resp = self
            .http
            .get(&url)
            .query(query)
            .query(&[("api_key", self.api_key.expose_secret())])
            .send()
            .await
            .context("Plisio API request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Plisio API error {status}: {body}");
        }

        let envelope: Envelope = resp
            .json()
            .await
            .context("Failed to parse Plisio response envelope")?;

        if envelope.status != "success" {
            let message = envelope
                .data
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("Plisio API error");
            anyhow::bail!("Plisio error: {message}");
        }

        serde_json::from_value(envelope.data).context("Failed to parse Plisio response data")
    }

    fn to_invoice(inv: PlisioInvoice) -> Invoice {
        Invoice {
            txn_id: inv.txn_id,
            wallet_hash: inv.wallet_hash,
            invoice_url: inv.invoice_url,
            source_currency: inv.source_currency,
            source_amount: inv.source_amount,
        }
    }
}

#[async_trait]
impl PaymentGateway for PlisioClient {
    async fn create_invoice(&self, request: &InvoiceRequest) -> Result<Invoice> {
        // order_number must be unique per invoice; a repeat deposit from
        // the same user would otherwise collide.
        let order_number = format!("{}-{}", request.order_id, uuid::Uuid::new_v4());

        let invoice: PlisioInvoice = self
            .get_json(
                "invoices/new",
                &[
                    ("order_number", order_number),
                    ("order_name", request.order_name.clone()),
                    ("source_currency", "USD".to_string()),
                    ("source_amount", request.amount_usd.round_dp(2).to_string()),
                    ("currency", "USDT".to_string()),
                    // Status is converged by polling, not callbacks.
                    ("callback_url", "none".to_string()),
                ],
            )
            .await?;

        debug!(txn_id = %invoice.txn_id, "Plisio invoice created");
        Ok(Self::to_invoice(invoice))
    }

    async fn get_invoice(&self, txn_id: &str) -> Result<Invoice> {
        let invoice: PlisioInvoice = self
            .get_json(&format!("operations/{txn_id}"), &[])
            .await?;
        Ok(Self::to_invoice(invoice))
    }

    async fn check_status(&self, txn_id: &str) -> Result<InvoiceStatus> {
        let invoice: PlisioInvoice = self
            .get_json(&format!("operations/{txn_id}"), &[])
            .await?;
        let status = invoice
            .status
            .as_deref()
            .map(PaymentStatus::from_gateway)
            .unwrap_or(PaymentStatus::Pending);
        Ok(InvoiceStatus { status })
    }

    async fn create_payout(&self, request: &PayoutRequest) -> Result<PayoutReceipt> {
        let payout: PlisioPayout = self
            .get_json(
                "operations/withdraw",
                &[
                    ("currency", request.currency.ticker().to_string()),
                    ("to", request.address.clone()),
                    ("amount", request.amount_usd.round_dp(2).to_string()),
                    ("type", "cash_out".to_string()),
                ],
            )
            .await?;

        Ok(PayoutReceipt {
            txn_id: payout.txn_id.or(payout.id),
        })
    }

    async fn wallet_balance(&self, currency: Currency) -> Result<WalletBalance> {
        let ticker = currency.ticker().to_lowercase();
        let balance: PlisioBalance = self
            .get_json(
                &format!("balances/{ticker}"),
                &[("currency", ticker.clone())],
            )
            .await?;

        Ok(WalletBalance {
            currency,
            balance: balance
                .balance
                .as_deref()
                .and_then(|b| b.parse().ok())
                .unwrap_or(Decimal::ZERO),
            balance_usd: balance.balance_usd.as_deref().and_then(|b| b.parse().ok()),
        })
    }

    fn name(&self) -> &str {
        GATEWAY_NAME
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_error_message_extraction() {
        let raw = r#"{"status":"error","data":{"message":"Invalid api key","code":1}}"#;
        let envelope: Envelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.status, "error");
        assert_eq!(
            envelope.data.get("message").and_then(|m| m.as_str()),
            Some("Invalid api key")
        );
    }

    #[test]
    fn test_invoice_deserializes_partial_fields() {
        let raw = r#"{"txn_id":"abc123","invoice_url":"https://plisio.net/invoice/abc123"}"#;
        let invoice: PlisioInvoice = serde_json::from_str(raw).unwrap();
        assert_eq!(invoice.txn_id, "abc123");
        assert!(invoice.wallet_hash.is_none());
        assert!(invoice.status.is_none());
    }

    #[test]
    fn test_balance_string_amounts_parse() {
        let raw = r#"{"balance":"0.00421","balance_usd":"180.55"}"#;
        let balance: PlisioBalance = serde_json::from_str(raw).unwrap();
        assert_eq!(balance.balance.as_deref().unwrap().parse::<Decimal>().unwrap(),
                   "0.00421".parse::<Decimal>().unwrap());
    }

    #[test]
    fn test_payout_falls_back_to_id() {
        let raw = r#"{"id":"wd-77"}"#;
        let payout: PlisioPayout = serde_json::from_str(raw).unwrap();
        assert_eq!(payout.txn_id.or(payout.id).as_deref(), Some("wd-77"));
    }

    #[test]
    fn test_client_builds_without_network() {
        let client = PlisioClient::new(SecretString::new("test-key".into()), None).unwrap();
        assert_eq!(client.name(), "plisio");
    }
}
