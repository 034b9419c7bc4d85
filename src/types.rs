//! Shared types for the DUELBOOK engine.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that storage, gateway,
//! and engine modules can depend on them without circular references.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{EngineError, EngineResult};

// ---------------------------------------------------------------------------
// Sides & rounds
// ---------------------------------------------------------------------------

/// The two corners of a duel round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Red,
    Blue,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Red => "red",
            Side::Blue => "blue",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Red => write!(f, "RED"),
            Side::Blue => write!(f, "BLUE"),
        }
    }
}

impl std::str::FromStr for Side {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "red" => Ok(Side::Red),
            "blue" => Ok(Side::Blue),
            other => Err(EngineError::Validation(format!("unknown side: {other}"))),
        }
    }
}

/// Round lifecycle status. Legal transitions: Open → Closed → Settled | Void.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundStatus {
    Open,
    Closed,
    Settled,
    Void,
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundStatus::Open => write!(f, "OPEN"),
            RoundStatus::Closed => write!(f, "CLOSED"),
            RoundStatus::Settled => write!(f, "SETTLED"),
            RoundStatus::Void => write!(f, "VOID"),
        }
    }
}

/// The delivered result of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    Winner(Side),
    Draw,
}

impl std::str::FromStr for RoundOutcome {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "draw" => Ok(RoundOutcome::Draw),
            other => Ok(RoundOutcome::Winner(other.parse()?)),
        }
    }
}

/// A single bettor's stake on the active round.
/// At most one bet per bettor per round; re-placement replaces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bet {
    pub bettor_id: String,
    pub amount: i64,
    pub side: Side,
}

/// A bet submitted while no round was open, held for the next round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedBet {
    pub amount: i64,
    pub side: Side,
    pub display_name: Option<String>,
}

/// The process-wide singleton round. Exactly one round may be Open or
/// Closed at a time; the slot is cleared once settlement completes.
#[derive(Debug, Clone)]
pub struct Round {
    pub round_id: String,
    pub red_name: String,
    pub blue_name: String,
    pub status: RoundStatus,
    pub bets: Vec<Bet>,
    pub opened_at: DateTime<Utc>,
}

impl Round {
    pub fn find_bet(&self, bettor_id: &str) -> Option<&Bet> {
        self.bets.iter().find(|b| b.bettor_id == bettor_id)
    }

    pub fn upsert_bet(&mut self, bettor_id: &str, amount: i64, side: Side) {
        match self.bets.iter_mut().find(|b| b.bettor_id == bettor_id) {
            Some(existing) => {
                existing.amount = amount;
                existing.side = side;
            }
            None => self.bets.push(Bet {
                bettor_id: bettor_id.to_string(),
                amount,
                side,
            }),
        }
    }

    pub fn remove_bet(&mut self, bettor_id: &str) -> Option<Bet> {
        let idx = self.bets.iter().position(|b| b.bettor_id == bettor_id)?;
        Some(self.bets.remove(idx))
    }

    pub fn total_pot(&self) -> i64 {
        self.bets.iter().map(|b| b.amount).sum()
    }

    pub fn side_total(&self, side: Side) -> i64 {
        self.bets
            .iter()
            .filter(|b| b.side == side)
            .map(|b| b.amount)
            .sum()
    }
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "round {} [{}] {} vs {} ({} bets, pot {})",
            self.round_id,
            self.status,
            self.red_name,
            self.blue_name,
            self.bets.len(),
            format_gp_short(self.total_pot()),
        )
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Why a balance was mutated. One tag per ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerReason {
    Bet,
    BetCancel,
    BetChangeRefund,
    RoundWin,
    RoundRefund,
    RakebackClaim,
    GpDeposit,
    GpWithdraw,
    CryptoDeposit,
    CryptoWithdrawal,
    AdminAddGp,
}

impl LedgerReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerReason::Bet => "bet",
            LedgerReason::BetCancel => "bet-cancel",
            LedgerReason::BetChangeRefund => "bet-change-refund",
            LedgerReason::RoundWin => "round-win",
            LedgerReason::RoundRefund => "round-refund",
            LedgerReason::RakebackClaim => "rakeback-claim",
            LedgerReason::GpDeposit => "gp-deposit",
            LedgerReason::GpWithdraw => "gp-withdraw",
            LedgerReason::CryptoDeposit => "crypto-deposit",
            LedgerReason::CryptoWithdrawal => "crypto-withdrawal",
            LedgerReason::AdminAddGp => "admin-add-gp",
        }
    }
}

impl fmt::Display for LedgerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for LedgerReason {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bet" => Ok(LedgerReason::Bet),
            "bet-cancel" => Ok(LedgerReason::BetCancel),
            "bet-change-refund" => Ok(LedgerReason::BetChangeRefund),
            "round-win" => Ok(LedgerReason::RoundWin),
            "round-refund" => Ok(LedgerReason::RoundRefund),
            "rakeback-claim" => Ok(LedgerReason::RakebackClaim),
            "gp-deposit" => Ok(LedgerReason::GpDeposit),
            "gp-withdraw" => Ok(LedgerReason::GpWithdraw),
            "crypto-deposit" => Ok(LedgerReason::CryptoDeposit),
            "crypto-withdrawal" => Ok(LedgerReason::CryptoWithdrawal),
            "admin-add-gp" => Ok(LedgerReason::AdminAddGp),
            other => Err(EngineError::Validation(format!("unknown ledger reason: {other}"))),
        }
    }
}

/// Immutable, append-only record of a single balance mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub user_id: String,
    pub delta: i64,
    pub reason: LedgerReason,
    pub created_at: DateTime<Utc>,
}

/// A ledger-owned user. Created on first reference, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub display_name: Option<String>,
    /// Balance in the smallest GP unit. Never negative.
    pub balance: i64,
    /// Rakeback accrued but not yet claimed into the balance.
    pub rakeback_unclaimed: i64,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Bet history & stats
// ---------------------------------------------------------------------------

/// How a settled bet came out for the bettor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BetOutcome {
    Win,
    Loss,
    Refund,
}

impl BetOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetOutcome::Win => "win",
            BetOutcome::Loss => "loss",
            BetOutcome::Refund => "refund",
        }
    }
}

impl std::str::FromStr for BetOutcome {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "win" => Ok(BetOutcome::Win),
            "loss" => Ok(BetOutcome::Loss),
            "refund" => Ok(BetOutcome::Refund),
            other => Err(EngineError::Validation(format!("unknown bet outcome: {other}"))),
        }
    }
}

/// One settled bet, appended at settlement for every bet in the round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetRecord {
    pub user_id: String,
    pub round_id: String,
    pub side: Side,
    pub amount: i64,
    pub outcome: BetOutcome,
    pub payout: i64,
    pub created_at: DateTime<Utc>,
}

/// Aggregates over a user's bet history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserBetStats {
    pub total_bets: u64,
    pub total_wagered: i64,
    pub wins: u64,
    pub losses: u64,
    pub refunds: u64,
    pub net_profit: i64,
    /// Consecutive wins counted back from the most recent bet,
    /// broken by the first loss (refunds don't break it).
    pub current_streak: u64,
}

/// Process-wide outcome stats, mutated only at settlement.
#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub red_streak: u32,
    pub blue_streak: u32,
    pub last_winner: Option<Side>,
    /// Ring of the last 50 winning sides, oldest first.
    pub last_winners: Vec<Side>,
}

impl Stats {
    /// Count of wins per side over the stored ring.
    pub fn last_counts(&self) -> (usize, usize) {
        let red = self.last_winners.iter().filter(|s| **s == Side::Red).count();
        (red, self.last_winners.len() - red)
    }
}

// ---------------------------------------------------------------------------
// Crypto payments & withdrawals
// ---------------------------------------------------------------------------

/// Deposit-invoice status as tracked internally.
/// `Pending → Confirming → Completed` is the only path that credits,
/// and it credits exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Confirming,
    Completed,
    Expired,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Confirming => "confirming",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Expired => "expired",
            PaymentStatus::Failed => "failed",
        }
    }

    /// Map a gateway-reported invoice status onto the internal set.
    /// Unknown strings stay `Pending` so the reconciler keeps watching.
    pub fn from_gateway(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "new" | "pending" => PaymentStatus::Pending,
            "pending internal" | "confirming" => PaymentStatus::Confirming,
            "completed" | "mismatch" => PaymentStatus::Completed,
            "expired" => PaymentStatus::Expired,
            "cancelled" | "error" | "failed" => PaymentStatus::Failed,
            _ => PaymentStatus::Pending,
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "confirming" => Ok(PaymentStatus::Confirming),
            "completed" => Ok(PaymentStatus::Completed),
            "expired" => Ok(PaymentStatus::Expired),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(EngineError::Validation(format!("unknown payment status: {other}"))),
        }
    }
}

/// A crypto deposit invoice and its reconciliation state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoPayment {
    /// Gateway transaction id. Unique.
    pub txn_id: String,
    pub user_id: String,
    pub amount_usd: Decimal,
    /// GP credited when the invoice completes.
    pub amount_gp: i64,
    /// Source currency ticker as reported by the gateway.
    pub currency: String,
    /// Payment address the user sends funds to.
    pub wallet_hash: Option<String>,
    /// Hosted payment page.
    pub invoice_url: Option<String>,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

/// Withdrawal record status. The GP debit is applied atomically with
/// record creation and is never reversed: a payout failure parks the
/// record in `Failed` for manual operator remediation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WithdrawalStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl WithdrawalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Processing => "processing",
            WithdrawalStatus::Completed => "completed",
            WithdrawalStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for WithdrawalStatus {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(WithdrawalStatus::Pending),
            "processing" => Ok(WithdrawalStatus::Processing),
            "completed" => Ok(WithdrawalStatus::Completed),
            "failed" => Ok(WithdrawalStatus::Failed),
            other => Err(EngineError::Validation(format!("unknown withdrawal status: {other}"))),
        }
    }
}

/// A crypto withdrawal and its payout state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoWithdrawal {
    pub withdrawal_id: String,
    pub user_id: String,
    pub amount_gp: i64,
    pub amount_usd: Decimal,
    pub currency: Currency,
    pub address: String,
    pub status: WithdrawalStatus,
    /// External transaction reference once the payout is accepted.
    pub txn_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Currencies
// ---------------------------------------------------------------------------

/// Currencies the gateway can hold and pay out.
/// ETH is held for ERC20 gas only — not user-withdrawable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    Btc,
    Usdt,
    Ltc,
    Eth,
}

impl Currency {
    pub fn ticker(&self) -> &'static str {
        match self {
            Currency::Btc => "BTC",
            Currency::Usdt => "USDT",
            Currency::Ltc => "LTC",
            Currency::Eth => "ETH",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Currency::Btc => "Bitcoin (BTC)",
            Currency::Usdt => "USDT (ERC20)",
            Currency::Ltc => "Litecoin (LTC)",
            Currency::Eth => "Ethereum (ETH)",
        }
    }

    /// Validate a destination address for this currency.
    pub fn validate_address(&self, address: &str) -> EngineResult<()> {
        let ok = match self {
            // 1..., 3..., or bc1... with 25–62 alphanumeric chars after.
            Currency::Btc => {
                let rest = address
                    .strip_prefix("bc1")
                    .or_else(|| address.strip_prefix('1'))
                    .or_else(|| address.strip_prefix('3'));
                match rest {
                    Some(rest) => {
                        (25..=62).contains(&rest.len())
                            && rest.chars().all(|c| c.is_ascii_alphanumeric())
                    }
                    None => false,
                }
            }
            // ERC20: 0x followed by exactly 40 hex digits.
            Currency::Usdt => {
                address.len() == 42
                    && address.starts_with("0x")
                    && address[2..].chars().all(|c| c.is_ascii_hexdigit())
            }
            // L or M followed by 26–33 base58 chars.
            Currency::Ltc => {
                let rest = address
                    .strip_prefix('L')
                    .or_else(|| address.strip_prefix('M'));
                match rest {
                    Some(rest) => {
                        (26..=33).contains(&rest.len())
                            && rest.chars().all(|c| {
                                c.is_ascii_alphanumeric() && !matches!(c, '0' | 'O' | 'I' | 'l')
                            })
                    }
                    None => false,
                }
            }
            Currency::Eth => {
                return Err(EngineError::Validation(
                    "ETH is not available for withdrawal".to_string(),
                ))
            }
        };

        if ok {
            Ok(())
        } else {
            Err(EngineError::Validation(format!(
                "invalid {} address",
                self.display_name()
            )))
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ticker())
    }
}

impl std::str::FromStr for Currency {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BTC" => Ok(Currency::Btc),
            "USDT" => Ok(Currency::Usdt),
            "LTC" => Ok(Currency::Ltc),
            "ETH" => Ok(Currency::Eth),
            other => Err(EngineError::Validation(format!("unknown currency: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// GP/USD conversion
// ---------------------------------------------------------------------------

const MILLION_GP: Decimal = dec!(1_000_000);

/// GP/USD conversion rates with a withdrawal spread.
///
/// Deposits buy GP at the face price; withdrawals sell GP back at a
/// less favorable rate (face price minus the spread), so a round trip
/// costs the user the spread.
#[derive(Debug, Clone, Copy)]
pub struct Rates {
    pub gp_per_usd_deposit: Decimal,
    pub gp_per_usd_withdrawal: Decimal,
}

impl Rates {
    /// Build rates from the USD price of 1M GP and the withdrawal spread
    /// (both in USD per 1M GP).
    pub fn new(usd_per_million_gp: Decimal, withdrawal_spread: Decimal) -> EngineResult<Self> {
        if usd_per_million_gp <= Decimal::ZERO || withdrawal_spread >= usd_per_million_gp {
            return Err(EngineError::Validation(
                "conversion rates must be positive and spread below the face price".to_string(),
            ));
        }
        Ok(Rates {
            gp_per_usd_deposit: MILLION_GP / usd_per_million_gp,
            gp_per_usd_withdrawal: MILLION_GP / (usd_per_million_gp - withdrawal_spread),
        })
    }

    /// GP credited for a deposit of `usd`, floored to whole GP.
    pub fn deposit_gp(&self, usd: Decimal) -> Option<i64> {
        (usd * self.gp_per_usd_deposit).floor().to_i64()
    }

    /// GP the user must pay for a withdrawal of `usd`, rounded up.
    pub fn withdrawal_required_gp(&self, usd: Decimal) -> Option<i64> {
        (usd * self.gp_per_usd_withdrawal).ceil().to_i64()
    }
}

// ---------------------------------------------------------------------------
// GP amount formatting & parsing
// ---------------------------------------------------------------------------

/// Format a GP amount in short form: `1.5m`, `500k`, `2b`, `950`.
pub fn format_gp_short(amount: i64) -> String {
    fn scaled(amount: i64, factor: i64, suffix: char) -> String {
        if amount % factor == 0 {
            format!("{}{}", amount / factor, suffix)
        } else {
            format!("{:.1}{}", amount as f64 / factor as f64, suffix)
        }
    }

    if amount >= 1_000_000_000 {
        scaled(amount, 1_000_000_000, 'b')
    } else if amount >= 1_000_000 {
        scaled(amount, 1_000_000, 'm')
    } else if amount >= 1_000 {
        scaled(amount, 1_000, 'k')
    } else {
        group_thousands(amount)
    }
}

/// Format a GP amount in full form: `1.5m (1,500,000 GP)`.
pub fn format_gp_full(amount: i64) -> String {
    format!("{} ({} GP)", format_gp_short(amount), group_thousands(amount))
}

fn group_thousands(amount: i64) -> String {
    let digits = amount.abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if amount < 0 {
        out.push('-');
    }
    let first = digits.len() % 3;
    for (i, c) in digits.chars().enumerate() {
        if i != 0 && (i + 3 - first) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Parse a GP amount with an optional `k`/`m`/`b` suffix: `500k`, `1.5m`,
/// `1b`, or a plain integer. Returns None for malformed or non-positive
/// input.
pub fn parse_gp_amount(input: &str) -> Option<i64> {
    let s = input.trim().to_lowercase();
    if s.is_empty() {
        return None;
    }

    let (number, factor) = match s.chars().last()? {
        'k' => (&s[..s.len() - 1], 1_000f64),
        'm' => (&s[..s.len() - 1], 1_000_000f64),
        'b' => (&s[..s.len() - 1], 1_000_000_000f64),
        _ => (s.as_str(), 1f64),
    };

    if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }

    let value: f64 = number.parse().ok()?;
    if !value.is_finite() || value <= 0.0 {
        return None;
    }

    let amount = (value * factor).floor() as i64;
    (amount > 0).then_some(amount)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
